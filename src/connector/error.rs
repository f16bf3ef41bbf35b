use std::fmt;

use crate::messaging::error::ChannelError;

/// Errors surfaced by the connector, either from `build()`/`start()` or
/// through the error callback once a flow is underway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Invalid static setup. Fatal; the call site must be fixed.
    Configuration { message: String },
    /// Channel or handshake failure. Retrying is the caller's choice.
    Communication { message: String },
    /// The handler completed the flow but it failed. When the handler
    /// passed along a redirect URL, the surface was still navigated there
    /// so the provider's own error page is visible.
    HandlerReported {
        message: String,
        redirect_url: Option<String>,
    },
    /// The flow ended without an outcome, usually because the user closed
    /// the authentication tab.
    Cancelled { message: Option<String> },
}

impl ConnectorError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            ConnectorError::Communication { message } => {
                write!(f, "communication error: {message}")
            }
            ConnectorError::HandlerReported { message, .. } => {
                write!(f, "handler reported an error: {message}")
            }
            ConnectorError::Cancelled { message } => match message {
                Some(message) => write!(f, "flow cancelled: {message}"),
                None => f.write_str("flow cancelled"),
            },
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<ChannelError> for ConnectorError {
    fn from(err: ChannelError) -> Self {
        ConnectorError::Communication {
            message: err.to_string(),
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_failures_become_communication_errors() {
        let err = ConnectorError::from(ChannelError::NoReceiver {
            target: "handler-ext".into(),
        });
        match &err {
            ConnectorError::Communication { message } => {
                assert!(message.contains("handler-ext"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.to_string().starts_with("communication error:"));
    }
}
