use thiserror::Error;

pub type AtrestResult<T> = Result<T, AtrestError>;

#[derive(Debug, Error)]
pub enum AtrestError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
