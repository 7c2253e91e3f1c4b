//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Channel("receiver dropped".to_string());
        assert_eq!(err.to_string(), "Channel error: receiver dropped");

        let err = Error::Config("Invalid log filter: x".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid log filter: x");
    }
}
