use thiserror::Error;

pub type GordianResult<T> = Result<T, GordianError>;

/// Failure kinds surfaced by the key hierarchy and the archive pipeline.
///
/// The variants are deliberately coarse: callers branch on the kind (re-prompt
/// on `Authentication`, report corruption on `Data`/`Integrity`, fix their code
/// on `Logic`), never on the message text.
#[derive(Debug, Error)]
pub enum GordianError {
    /// Malformed encodings: needles, headers, hex, oversized key material.
    #[error("data error: {0}")]
    Data(String),

    /// Cipher initialization, wrap/unwrap, AEAD or signature computation failures.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Wrong password. Carries no detail about the guess.
    #[error("authentication failed")]
    Authentication,

    /// Operation invoked in a state that does not allow it.
    #[error("logic error: {0}")]
    Logic(String),

    /// Digest, length or signature mismatch while reading back stored data.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GordianError {
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap this error so it can travel through `std::io::Read`/`Write` layers.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }

    /// Recover an error previously wrapped with [`GordianError::into_io`].
    pub fn from_io(err: std::io::Error) -> Self {
        let wrapped = err
            .get_ref()
            .is_some_and(|inner| inner.is::<GordianError>());
        if wrapped {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<GordianError>() {
                    Ok(own) => *own,
                    Err(other) => Self::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
                };
            }
            return Self::integrity("stream failed");
        }
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_wrapping_preserves_kind() {
        let err = GordianError::integrity("digest mismatch").into_io();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let back = GordianError::from_io(err);
        assert!(matches!(back, GordianError::Integrity(msg) if msg == "digest mismatch"));
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        assert!(matches!(GordianError::from_io(err), GordianError::Io(_)));
    }

    #[test]
    fn authentication_message_is_opaque() {
        assert_eq!(GordianError::Authentication.to_string(), "authentication failed");
    }
}
