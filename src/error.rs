use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("SLACK_USER_TOKEN environment variable not set")]
    MissingToken,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("network error: {0}")]
    Transport(String),

    #[error("Slack API error on {method}: {error}")]
    Api { method: String, error: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read file at {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file at {}: {source}", path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization error: {0}")]
    JsonSerialize(String),

    #[error("JSON parse error in {}: {error}", path.display())]
    JsonParse { path: PathBuf, error: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("unknown conversation type: {0}")]
    UnknownConversationType(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// Errors that must abort the whole run rather than fail a single
    /// conversation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackupError::MissingToken | BackupError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_missing_token_display() {
        let err = BackupError::MissingToken;
        assert_eq!(
            err.to_string(),
            "SLACK_USER_TOKEN environment variable not set"
        );
    }

    #[test]
    fn test_auth_display() {
        let err = BackupError::Auth("invalid_auth".to_string());
        assert_eq!(err.to_string(), "authentication failed: invalid_auth");
    }

    #[test]
    fn test_rate_limited_display() {
        let err = BackupError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "rate limited: retry after 30s");
    }

    #[test]
    fn test_api_display() {
        let err = BackupError::Api {
            method: "conversations.history".to_string(),
            error: "channel_not_found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Slack API error on conversations.history: channel_not_found"
        );
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Io(_)));
    }

    #[test]
    fn test_read_file_display_and_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = BackupError::ReadFile {
            path: PathBuf::from("/archive/general/2024-01-17.json"),
            source: io_err,
        };
        assert!(err.to_string().contains("/archive/general/2024-01-17.json"));
        assert!(err.to_string().starts_with("failed to read file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_write_file_display_and_source() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        let err = BackupError::WriteFile {
            path: PathBuf::from("/archive/channels.json"),
            source: io_err,
        };
        assert!(err.to_string().contains("/archive/channels.json"));
        assert!(err.to_string().starts_with("failed to write file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BackupError::MissingToken.is_fatal());
        assert!(BackupError::Auth("token_revoked".to_string()).is_fatal());
        assert!(
            !BackupError::Api {
                method: "conversations.info".to_string(),
                error: "channel_not_found".to_string(),
            }
            .is_fatal()
        );
        assert!(!BackupError::Transport("connection reset".to_string()).is_fatal());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<BackupError>();
        assert_sync::<BackupError>();
    }
}
