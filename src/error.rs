//! Centralized error types for the inferscale controller core

use thiserror::Error;

/// Controller error types
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration parsing or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cluster API calls for service, pod, or secret discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Queueing model inputs violate the stability/validity contract
    #[error("Model invalid: {0}")]
    ModelInvalid(String),

    /// Sizing targets cannot be met even at minimal load
    #[error("Sizing infeasible: {0}")]
    Infeasible(String),

    /// The caller's cancellation token fired mid-operation
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP request or response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("service_name is required".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: service_name is required"
        );
    }

    #[test]
    fn test_error_display_discovery() {
        let err = Error::Discovery("service default/pool not found".into());
        assert_eq!(
            err.to_string(),
            "Discovery error: service default/pool not found"
        );
    }

    #[test]
    fn test_error_display_model_invalid() {
        let err = Error::ModelInvalid("lambda exceeds stable region".into());
        assert_eq!(err.to_string(), "Model invalid: lambda exceeds stable region");
    }

    #[test]
    fn test_error_display_infeasible() {
        let err = Error::Infeasible("TTFT target below intrinsic prefill time".into());
        assert_eq!(
            err.to_string(),
            "Sizing infeasible: TTFT target below intrinsic prefill time"
        );
    }

    #[test]
    fn test_error_display_cancelled() {
        assert_eq!(Error::Cancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }

    #[test]
    fn test_result_type_alias() {
        let ok: Result<u32> = Ok(42);
        assert!(matches!(ok, Ok(42)));

        let err: Result<u32> = Err(Error::Cancelled);
        assert!(err.is_err());
    }
}
