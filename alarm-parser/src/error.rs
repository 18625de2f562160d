//! Error types for alarm payload decoding

use thiserror::Error;

/// Errors that can occur while decoding a pushed alarm notification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The XML document did not parse or had no root element
    #[error("Malformed alarm XML: {0}")]
    MalformedXml(String),

    /// The multipart body or its boundary could not be parsed
    #[error("Multipart parsing failed: {0}")]
    MultipartParse(String),
}

/// Result type alias for decoding operations
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let error = DecodeError::MalformedXml("unexpected end of stream".to_string());
        assert_eq!(error.to_string(), "Malformed alarm XML: unexpected end of stream");

        let error = DecodeError::MultipartParse("missing boundary".to_string());
        assert_eq!(error.to_string(), "Multipart parsing failed: missing boundary");
    }
}
