use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("syntax error: line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn syntax_error<T>(message: impl Into<String>, line: usize, column: usize) -> Result<T> {
    Err(Error::Syntax {
        message: message.into(),
        line,
        column,
    })
}

pub fn runtime_error<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::Runtime {
        message: message.into(),
    })
}
