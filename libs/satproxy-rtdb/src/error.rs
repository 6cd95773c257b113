//! Error types for satproxy-rtdb

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtdbError {
    #[error("Outstation not found: {0}")]
    OutstationNotFound(String),

    #[error("No value for {outstation} index {index}")]
    ValueNotFound { outstation: String, index: u32 },

    #[error("Outstation {0} has never delivered an accepted update")]
    NoContact(String),
}

pub type Result<T> = std::result::Result<T, RtdbError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_outstation_not_found_error() {
        let err = RtdbError::OutstationNotFound("A1".to_string());
        assert_eq!(err.to_string(), "Outstation not found: A1");
    }

    #[test]
    fn test_value_not_found_error() {
        let err = RtdbError::ValueNotFound {
            outstation: "A1".to_string(),
            index: 3,
        };
        assert_eq!(err.to_string(), "No value for A1 index 3");
    }

    #[test]
    fn test_error_debug_format() {
        let err = RtdbError::NoContact("B7".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("NoContact"));
        assert!(debug_str.contains("B7"));
    }
}
