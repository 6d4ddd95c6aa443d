use thiserror::Error;

/// Fatal error classes. Every one of these terminates the process; the
/// remote-helper protocol has no in-session recovery.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing or malformed secret key: {0}")]
    ConfigMissing(String),

    #[error("object too large: {size} bytes")]
    InputTooLarge { size: usize },

    #[error("corrupt data: {0}")]
    Corruption(String),

    #[error("object store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
