use thiserror::Error;

/// Error surface of the collection framework.
///
/// Collectors recover locally wherever they can; what reaches this type is
/// either fatal for a single collection attempt or a lifecycle violation the
/// caller must observe. Cloneable so the exactly-once adapter can cache a
/// failure and continuous collectors can hand out their last error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("configuration: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("platform unsupported: {0}")]
    Platform(String),

    #[error("collector already running")]
    AlreadyRunning,

    #[error("output channel closed")]
    ChannelClosed,

    #[error("collection cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Classify a pseudo-file open failure: missing files and permission
    /// problems carry different recovery policies for the collectors.
    pub fn from_open(path: &std::path::Path, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Self::Permission(path.display().to_string())
            }
            _ => Self::Parse(format!("{}: {}", path.display(), err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn open_errors_classify_by_kind() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(
            AgentError::from_open(Path::new("/proc/stat"), &missing),
            AgentError::NotFound("/proc/stat".to_string())
        );

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            AgentError::from_open(Path::new("/dev/kmsg"), &denied),
            AgentError::Permission(_)
        ));
    }
}
