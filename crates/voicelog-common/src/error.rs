//! Error types shared across voicelog crates

use thiserror::Error;

/// Result type alias for shared voicelog operations
pub type Result<T> = std::result::Result<T, VoicelogError>;

/// Main error type for voicelog-common
#[derive(Error, Debug)]
pub enum VoicelogError {
    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

impl VoicelogError {
    pub fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        VoicelogError::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_names_field_and_value() {
        let err = VoicelogError::invalid("record kind", "voicemail");
        assert_eq!(
            err.to_string(),
            "Invalid value for record kind: \"voicemail\""
        );
    }
}
