use thiserror::Error;

/// Errors produced by the tcpchat protocol layer.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ciborium::de::Error<std::io::Error>> for ChatError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        ChatError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for ChatError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        ChatError::Codec(e.to_string())
    }
}

impl ChatError {
    /// Whether this error ends the connection it occurred on.
    ///
    /// Codec errors are confined to a single frame; everything else on the
    /// read path means the byte stream can no longer be trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(self, ChatError::Codec(_))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
