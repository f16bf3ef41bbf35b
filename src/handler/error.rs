use std::fmt;

use crate::handler::tabs::TabApiError;
use crate::messaging::types::TerminalOutcome;

/// Errors the handler turns into terminal `error` replies. The handler has
/// no synchronous caller once a flow is underway, so nothing here is ever
/// propagated upward; every variant renders into the reply message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The sender's origin is not in the trusted-caller allow-list.
    UntrustedCaller { origin: String },
    /// The request itself is unusable (malformed payload, missing
    /// `redirect_uri`).
    InvalidRequest { message: String },
    /// Neither tab acquisition strategy produced a tab.
    TabCreation { message: String },
}

impl HandlerError {
    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::UntrustedCaller { origin } => {
                write!(f, "untrusted caller: {origin}")
            }
            HandlerError::InvalidRequest { message } => f.write_str(message),
            HandlerError::TabCreation { message } => {
                write!(f, "could not open a tab for the flow: {message}")
            }
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<TabApiError> for HandlerError {
    fn from(err: TabApiError) -> Self {
        HandlerError::TabCreation {
            message: err.message,
        }
    }
}

impl From<HandlerError> for TerminalOutcome {
    fn from(err: HandlerError) -> Self {
        TerminalOutcome::Error {
            message: err.to_string(),
            redirect_url: None,
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_renders_its_message_verbatim() {
        let err = HandlerError::invalid_request("URL must have a 'redirect_uri' parameter");
        assert_eq!(err.to_string(), "URL must have a 'redirect_uri' parameter");
    }

    #[test]
    fn tab_errors_bridge_into_terminal_outcomes() {
        let err = HandlerError::from(TabApiError::new("window quota exceeded"));
        let outcome = TerminalOutcome::from(err);
        match outcome {
            TerminalOutcome::Error { message, redirect_url } => {
                assert!(message.contains("window quota exceeded"));
                assert_eq!(redirect_url, None);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
