// ABOUTME: Error types for the execution surface
// Covers connection setup, command failures and file transfer on local and remote hosts

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication rejected for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("Host key rejected: {0}")]
    HostKey(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh_keys::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "Command `{command}` failed (exit status {}): {output}",
        status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
    )]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("Session has not been started")]
    SessionNotStarted,

    #[error("File transfer to {path} failed: {reason}")]
    Transfer { path: String, reason: String },
}
