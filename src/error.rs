use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Request timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Cannot add parent to root context")]
    RootParent,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Truncated buffer")]
    Truncated,

    #[error("Varint overflows 64 bits")]
    Overflow,
}

pub type Result<T> = std::result::Result<T, TracerError>;
