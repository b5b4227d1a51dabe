use std::path::PathBuf;
use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation service.
///
/// Each variant carries the context of its own failure domain (filesystem, decoding,
/// model inference, rendering) so that the HTTP boundary can log the full cause while
/// only telling the caller whether the request itself was at fault.
#[derive(Error, Debug)]
pub enum MobileSamError {
    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Decode error: uploaded bytes are not a valid image")]
    Decode {
        #[source]
        source: image::ImageError,
    },

    #[error("Decode error: image has degenerate dimensions {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Render error: {operation} failed: {reason}")]
    Render { operation: String, reason: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Worker error: {operation} failed")]
    Worker {
        operation: String,
        #[source]
        source: BoxedError,
    },
}

pub type Result<T> = std::result::Result<T, MobileSamError>;

impl MobileSamError {
    /// Shorthand for model failures whose source only offers a `Display` impl.
    pub fn model(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Model {
            operation: operation.into(),
            source: reason.to_string().into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Errors caused by the request itself rather than by the service.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Convert image crate errors to image processing errors.
///
/// Decoding failures are mapped to `Decode` explicitly in the preprocessor, so anything
/// arriving here comes from resizing or encoding.
impl From<image::ImageError> for MobileSamError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for MobileSamError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Convert ndarray shape errors to model errors.
///
/// Shape errors only occur while moving tensors in and out of the sessions.
impl From<ndarray::ShapeError> for MobileSamError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert blocking task failures (panics inside `spawn_blocking`) to worker errors.
impl From<tokio::task::JoinError> for MobileSamError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker {
            operation: "blocking task join".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validation_is_client_error() {
        assert!(MobileSamError::validation("file", "is required").is_client_error());
        assert!(!MobileSamError::EmptyImage {
            width: 0,
            height: 0
        }
        .is_client_error());
        assert!(!MobileSamError::model("decoder run", "boom").is_client_error());
    }

    #[test]
    fn test_display_hides_source_detail() {
        let err = MobileSamError::model("decoder run", "CUDA out of memory");
        assert_eq!(err.to_string(), "Model error: decoder run failed");

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("CUDA out of memory"));
    }
}
