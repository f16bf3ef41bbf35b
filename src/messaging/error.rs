use std::fmt;

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Transport-level failures surfaced by a message channel.
///
/// Everything here maps to a communication error on the connector side; the
/// handler never sees these because its channel delivers requests, it does
/// not issue them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No endpoint is listening under the requested target identifier.
    NoReceiver { target: String },
    /// The receiver went away (or dropped its responder) before replying.
    Disconnected { message: String },
}

impl ChannelError {
    pub fn disconnected(message: impl Into<String>) -> Self {
        ChannelError::Disconnected {
            message: message.into(),
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NoReceiver { target } => {
                write!(f, "no message receiver registered for '{target}'")
            }
            ChannelError::Disconnected { message } => {
                write!(f, "channel disconnected: {message}")
            }
        }
    }
}

impl std::error::Error for ChannelError {}
