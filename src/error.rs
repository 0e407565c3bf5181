//! Error types for the chat core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("No active team")]
    NoActiveTeam,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Temporary message cannot be deleted: {0}")]
    TemporaryId(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Team changed before the request completed")]
    TeamChanged,

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether the user can retry the operation that failed.
    /// Validation failures never reach the network and are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Gateway(_) | ChatError::Feed(_) | ChatError::Http(_)
        )
    }

    /// Whether the operation was refused before touching any state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyBody
                | ChatError::NoActiveTeam
                | ChatError::NotAuthenticated
                | ChatError::TemporaryId(_)
                | ChatError::InvalidId(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::NotFound("profile".to_string());
        assert_eq!(format!("{}", err), "Not found: profile");

        let err = ChatError::Gateway("503 Service Unavailable".to_string());
        assert_eq!(format!("{}", err), "Gateway error: 503 Service Unavailable");

        let err = ChatError::TemporaryId("temp-1".to_string());
        assert_eq!(
            format!("{}", err),
            "Temporary message cannot be deleted: temp-1"
        );

        assert_eq!(format!("{}", ChatError::EmptyBody), "Message body is empty");
    }

    #[test]
    fn test_chat_error_debug() {
        let err = ChatError::NoActiveTeam;
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("NoActiveTeam"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChatError::Gateway("offline".to_string()).is_retryable());
        assert!(ChatError::Feed("closed".to_string()).is_retryable());
        assert!(!ChatError::EmptyBody.is_retryable());
        assert!(!ChatError::TeamChanged.is_retryable());
    }

    #[test]
    fn test_validation_classification() {
        assert!(ChatError::EmptyBody.is_validation());
        assert!(ChatError::NotAuthenticated.is_validation());
        assert!(ChatError::TemporaryId("temp-x".to_string()).is_validation());
        assert!(!ChatError::Gateway("offline".to_string()).is_validation());
        assert!(!ChatError::TeamChanged.is_validation());
    }

    #[test]
    fn test_json_error_from_serde() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ChatError = serde_err.into();
        assert!(matches!(err, ChatError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(test_fn().unwrap(), 42);

        fn test_err_fn() -> Result<i32> {
            Err(ChatError::NotFound("test".to_string()))
        }
        assert!(test_err_fn().is_err());
    }
}
