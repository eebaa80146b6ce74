//! Error taxonomy shared across the Haloy crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("container start error: {0}")]
    Start(String),

    #[error("health check failed: {0}")]
    Health(String),

    #[error("container stop error: {0}")]
    Stop(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind string, carried in terminal log entries
    /// so clients can dispatch on failure class without parsing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::Auth(_) => "AuthError",
            Error::NotFound(_) => "NotFound",
            Error::Image(_) => "ImageError",
            Error::Start(_) => "StartError",
            Error::Health(_) => "HealthError",
            Error::Stop(_) => "StopError",
            Error::Store(_) => "StoreError",
            Error::Crypto(_) => "CryptoError",
            Error::Runtime(_) => "RuntimeError",
            Error::Timeout(_) => "Timeout",
            Error::Internal(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::Validation("x".into()).kind(), "ValidationError");
        assert_eq!(Error::Health("x".into()).kind(), "HealthError");
        assert_eq!(Error::NotFound("x".into()).kind(), "NotFound");
        assert_eq!(Error::Crypto("x".into()).kind(), "CryptoError");
    }

    #[test]
    fn messages_carry_cause() {
        let err = Error::Image("pull failed: no such image".into());
        assert_eq!(err.to_string(), "image error: pull failed: no such image");
    }
}
