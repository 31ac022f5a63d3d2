mod instruction;

pub use instruction::Instruction;

/// Instruction argument layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// The Lua 5.1 opcode set (38 opcodes), numbered exactly as the reference
/// runtime numbers them - the encoded words are binary compatible.
///
/// Notation: R(x) register, K(x) constant, RK(x) register-or-constant
/// (top bit of the 9-bit field selects the constant pool), U(x) upvalue,
/// G[k] global under key k in the function's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // R(A) := R(B)
    LoadK,     // R(A) := K(Bx)
    LoadBool,  // R(A) := (B ~= 0); if C ~= 0 then pc++
    LoadNil,   // R(A) ... R(B) := nil (inclusive range, not a count)
    GetUpval,  // R(A) := U(B)
    GetGlobal, // R(A) := G[K(Bx)]
    GetTable,  // R(A) := R(B)[RK(C)]
    SetGlobal, // G[K(Bx)] := R(A)
    SetUpval,  // U(B) := R(A)
    SetTable,  // R(A)[RK(B)] := RK(C)
    NewTable,  // R(A) := {} (array hint B, hash hint C; both fb-encoded)
    Self_,     // R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Add,       // R(A) := RK(B) + RK(C)
    Sub,       // R(A) := RK(B) - RK(C)
    Mul,       // R(A) := RK(B) * RK(C)
    Div,       // R(A) := RK(B) / RK(C)
    Mod,       // R(A) := RK(B) % RK(C)
    Pow,       // R(A) := RK(B) ^ RK(C)
    Unm,       // R(A) := -R(B)
    Not,       // R(A) := not R(B)
    Len,       // R(A) := #R(B)
    Concat,    // R(A) := R(B) .. ... .. R(C)
    Jmp,       // pc += sBx
    Eq,        // if (RK(B) == RK(C)) ~= A then pc++
    Lt,        // if (RK(B) <  RK(C)) ~= A then pc++
    Le,        // if (RK(B) <= RK(C)) ~= A then pc++
    Test,      // if boolean(R(A)) ~= C then pc++
    TestSet,   // if boolean(R(B)) == C then R(A) := R(B) else pc++
    Call,      // R(A)..R(A+C-2) := R(A)(R(A+1)..R(A+B-1)); B=0/C=0 use top
    TailCall,  // return R(A)(R(A+1)..R(A+B-1)), reusing the frame
    Return,    // return R(A)..R(A+B-2); B=0 returns up to top
    ForLoop,   // R(A) += R(A+2); if in range { pc += sBx; R(A+3) := R(A) }
    ForPrep,   // R(A) -= R(A+2); pc += sBx
    TForLoop,  // R(A+3..A+2+C) := R(A)(R(A+1), R(A+2)); test R(A+3)
    SetList,   // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    Close,     // close all upvalues for stack slots >= R(A)
    Closure,   // R(A) := closure(Proto(Bx)); consumes pseudo-instructions
    Vararg,    // R(A)..R(A+B-2) := ...; B=0 copies all
}

pub const NUM_OPCODES: usize = OpCode::Vararg as usize + 1;

impl OpCode {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        debug_assert!((byte as usize) < NUM_OPCODES);
        unsafe { std::mem::transmute(byte) }
    }

    pub fn mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }

    /// Comparison and test opcodes are always followed by a JMP which the
    /// test either falls into or skips.
    pub fn is_test(self) -> bool {
        use OpCode::*;
        matches!(self, Eq | Lt | Le | Test | TestSet)
    }

    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetGlobal => "GETGLOBAL",
            GetTable => "GETTABLE",
            SetGlobal => "SETGLOBAL",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Close => "CLOSE",
            Closure => "CLOSURE",
            Vararg => "VARARG",
        }
    }
}
