use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NfdError>;

#[derive(Debug, Error)]
pub enum NfdError {
    /// An external tool exited non-zero
    #[error("command `{command}` failed ({status}): {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The host-wide lock could not be taken; nothing was touched
    #[error("failed to acquire lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid VM descriptor: {0}")]
    Descriptor(String),

    /// Every NIC was attempted; these are the ones that did not converge
    #[error("deactivation finished with {} failure(s): {}", .failures.len(), summarize(.failures))]
    Deactivation { failures: Vec<NfdError> },
}

impl NfdError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Name of the failing command, if this error came from the executor
    pub fn failed_command(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { command, .. } | Self::CommandSpawn { command, .. } => {
                Some(command)
            }
            _ => None,
        }
    }
}

fn summarize(failures: &[NfdError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deactivation_error_lists_every_failure() {
        let err = NfdError::Deactivation {
            failures: vec![
                NfdError::Config("first".into()),
                NfdError::CommandFailed {
                    command: "iptables -t mangle -X one-1-0-nfdhcpd".into(),
                    status: "exit status: 1".into(),
                    output: "Too many links".into(),
                },
            ],
        };

        let text = err.to_string();
        assert!(text.starts_with("deactivation finished with 2 failure(s)"));
        assert!(text.contains("first"));
        assert!(text.contains("Too many links"));
    }

    #[test]
    fn failed_command_is_exposed() {
        let err = NfdError::CommandFailed {
            command: "iptables -t mangle -N x".into(),
            status: "exit status: 1".into(),
            output: String::new(),
        };
        assert_eq!(err.failed_command(), Some("iptables -t mangle -N x"));
        assert_eq!(NfdError::Config("x".into()).failed_command(), None);
    }
}
