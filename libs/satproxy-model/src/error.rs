//! Register model errors

use crate::byte_order::ByteOrder;
use thiserror::Error;

/// Errors raised while building or interpreting register metadata
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("Invalid byte order: {0}")]
    InvalidByteOrder(String),

    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    #[error("Invalid register type: {0}")]
    InvalidRegisterKind(String),

    #[error("Byte order {order} cannot hold a {words}-register value")]
    IncompatibleByteOrder { order: ByteOrder, words: usize },

    #[error("Expected {expected} register words, got {actual}")]
    WordCountMismatch { expected: usize, actual: usize },

    /// The register map contradicts itself
    #[error("Register map for '{outstation}' is inconsistent: {reason}")]
    Inconsistent { outstation: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::IncompatibleByteOrder {
            order: ByteOrder::BigEndian16,
            words: 2,
        };
        assert_eq!(
            err.to_string(),
            "Byte order AB cannot hold a 2-register value"
        );

        let err = ModelError::Inconsistent {
            outstation: "A1".to_string(),
            reason: "overlap".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Register map for 'A1' is inconsistent: overlap"
        );
    }
}
