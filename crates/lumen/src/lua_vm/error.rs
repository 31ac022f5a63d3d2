use smol_str::SmolStr;
use thiserror::Error;

/// Lightweight error kind; the Result stays small because the runtime
/// error *value* (often a string with position info, but any Lua value)
/// lives on the VM in `error_value`, not in the enum.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LuaError {
    /// Malformed token; reported where the offending byte appears.
    #[error("{chunk}:{line}: {message}")]
    Lex {
        chunk: SmolStr,
        line: u32,
        column: u32,
        message: String,
    },

    /// Unexpected token; the parser aborts on the first one.
    #[error("{chunk}:{line}: {message}")]
    Parse {
        chunk: SmolStr,
        line: u32,
        column: u32,
        message: String,
    },

    /// Resource overflow or semantic misuse found while generating code.
    #[error("{chunk}:{line}: {message}")]
    Compile {
        chunk: SmolStr,
        line: u32,
        message: String,
    },

    /// A value was raised at run time; fetch it with
    /// [`LuaVM::take_error_value`](super::LuaVM::take_error_value) or
    /// format it with [`LuaVM::error_message`](super::LuaVM::error_message).
    #[error("runtime error")]
    Runtime,

    #[error("stack overflow")]
    StackOverflow,
}

pub type LuaResult<T> = Result<T, LuaError>;

impl LuaError {
    pub fn is_runtime(&self) -> bool {
        matches!(self, LuaError::Runtime)
    }
}
