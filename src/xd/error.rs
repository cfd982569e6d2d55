// Error types for Xeryon XD communication
//
// Every failure carries the wire command that caused it so a log line is
// enough to reproduce the transaction by hand.

/// Coarse classification used by callers to choose a retry/logging policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Channel-level failure: disconnect, write error, read timeout
    Transport,
    /// A reply arrived but did not decode as expected
    Protocol,
    /// Unknown controller name
    NotFound,
    /// Bad axis index, axis count or port settings
    Configuration,
}

#[derive(Debug, thiserror::Error)]
pub enum XdError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Transport error on '{command}': {source}")]
    Transport {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout waiting for reply to '{command}'")]
    Timeout { command: String },

    #[error("Malformed reply to '{command}': '{reply}' ({reason})")]
    Protocol {
        command: String,
        reply: String,
        reason: String,
    },

    #[error("No controller named '{name}'")]
    NotFound { name: String },

    #[error("Axis {index} out of range (controller has {count} axes)")]
    InvalidAxis { index: usize, count: usize },

    #[error("Axis count {count} not supported (1..={max})")]
    InvalidAxisCount { count: usize, max: usize },
}

impl XdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            XdError::Transport { .. } | XdError::Timeout { .. } => ErrorKind::Transport,
            XdError::Protocol { .. } => ErrorKind::Protocol,
            XdError::NotFound { .. } => ErrorKind::NotFound,
            XdError::Serial(_) | XdError::InvalidAxis { .. } | XdError::InvalidAxisCount { .. } => {
                ErrorKind::Configuration
            }
        }
    }

    /// The wire command associated with the failure, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            XdError::Transport { command, .. }
            | XdError::Timeout { command }
            | XdError::Protocol { command, .. } => Some(command),
            _ => None,
        }
    }

    pub(crate) fn protocol(command: &str, reply: &str, reason: impl Into<String>) -> Self {
        XdError::Protocol {
            command: command.to_string(),
            reply: reply.to_string(),
            reason: reason.into(),
        }
    }

    /// Map an io error from the line transport, splitting out timeouts
    pub(crate) fn from_io(command: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            XdError::Timeout {
                command: command.to_string(),
            }
        } else {
            XdError::Transport {
                command: command.to_string(),
                source: err,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, XdError>;
