// Abstract syntax tree. Flat tagged enums, one per syntactic category;
// every node carries the source line it starts on. L-values are exactly
// the `Name` and `Index` expression nodes.

use smol_str::SmolStr;

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct FuncBody {
    pub params: Vec<SmolStr>,
    pub is_vararg: bool,
    pub block: Block,
    pub line: u32,
    pub end_line: u32,
}

/// Target path of `function a.b.c:m(...)`.
#[derive(Debug, Clone)]
pub struct FuncName {
    pub base: SmolStr,
    pub path: Vec<SmolStr>,
    pub method: Option<SmolStr>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Local {
        names: Vec<SmolStr>,
        exprs: Vec<Expression>,
        line: u32,
    },
    Assign {
        targets: Vec<Expression>,
        exprs: Vec<Expression>,
        line: u32,
    },
    /// Expression statement; the parser guarantees the node is a call.
    Call { expr: Expression, line: u32 },
    If {
        /// Condition/body pairs: `if`, then each `elseif`.
        arms: Vec<(Expression, Block)>,
        else_block: Option<Block>,
        line: u32,
    },
    While {
        cond: Expression,
        body: Block,
        line: u32,
    },
    Repeat {
        body: Block,
        cond: Expression,
        line: u32,
    },
    NumericFor {
        var: SmolStr,
        start: Expression,
        end: Expression,
        step: Option<Expression>,
        body: Block,
        line: u32,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expression>,
        body: Block,
        line: u32,
    },
    Do { body: Block, line: u32 },
    Function {
        name: FuncName,
        body: FuncBody,
        line: u32,
    },
    LocalFunction {
        name: SmolStr,
        body: FuncBody,
        line: u32,
    },
    Return { exprs: Vec<Expression>, line: u32 },
    Break { line: u32 },
}

impl Statement {
    pub fn line(&self) -> u32 {
        match self {
            Statement::Local { line, .. }
            | Statement::Assign { line, .. }
            | Statement::Call { line, .. }
            | Statement::If { line, .. }
            | Statement::While { line, .. }
            | Statement::Repeat { line, .. }
            | Statement::NumericFor { line, .. }
            | Statement::GenericFor { line, .. }
            | Statement::Do { line, .. }
            | Statement::Function { line, .. }
            | Statement::LocalFunction { line, .. }
            | Statement::Return { line, .. }
            | Statement::Break { line } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

#[derive(Debug, Clone)]
pub enum TableField {
    /// `expr` - array item with the next implicit integer key.
    Item(Expression),
    /// `name = expr`.
    Named(SmolStr, Expression),
    /// `[key] = expr`.
    Keyed(Expression, Expression),
}

#[derive(Debug, Clone)]
pub enum Expression {
    Nil(u32),
    True(u32),
    False(u32),
    Number(f64, u32),
    Str(Vec<u8>, u32),
    Vararg(u32),
    Name(SmolStr, u32),
    /// `obj[key]`; `obj.name` desugars to a string key.
    Index {
        obj: Box<Expression>,
        key: Box<Expression>,
        line: u32,
    },
    Call {
        func: Box<Expression>,
        args: Vec<Expression>,
        line: u32,
    },
    /// `obj:name(args)`.
    MethodCall {
        obj: Box<Expression>,
        name: SmolStr,
        args: Vec<Expression>,
        line: u32,
    },
    Function(Box<FuncBody>),
    Table {
        fields: Vec<TableField>,
        line: u32,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        line: u32,
    },
    UnOp {
        op: UnOp,
        operand: Box<Expression>,
        line: u32,
    },
    /// Parenthesized expression: truncates multiple results to one.
    Paren(Box<Expression>),
}

impl Expression {
    pub fn line(&self) -> u32 {
        match self {
            Expression::Nil(l)
            | Expression::True(l)
            | Expression::False(l)
            | Expression::Number(_, l)
            | Expression::Str(_, l)
            | Expression::Vararg(l)
            | Expression::Name(_, l)
            | Expression::Index { line: l, .. }
            | Expression::Call { line: l, .. }
            | Expression::MethodCall { line: l, .. }
            | Expression::Table { line: l, .. }
            | Expression::BinOp { line: l, .. }
            | Expression::UnOp { line: l, .. } => *l,
            Expression::Function(body) => body.line,
            Expression::Paren(e) => e.line(),
        }
    }

    /// May this expression appear on the left of an assignment?
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expression::Name(..) | Expression::Index { .. })
    }

    /// Is this a call node (function call or method call)?
    pub fn is_call(&self) -> bool {
        matches!(self, Expression::Call { .. } | Expression::MethodCall { .. })
    }

    /// Can the expression produce multiple values (open call or vararg)?
    pub fn is_multret(&self) -> bool {
        self.is_call() || matches!(self, Expression::Vararg(_))
    }
}
