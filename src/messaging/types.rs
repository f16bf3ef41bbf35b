use serde::{Deserialize, Serialize};

/// Messages sent from the connector to the extension-side handler.
///
/// The wire shape mirrors the JS sample this crate is ported from: an
/// internally tagged JSON object with a snake_case `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorMessage {
    /// Handshake probe; the handler answers with [`HandlerMessage::Pong`].
    Ping,
    /// An intercepted identity-provider navigation to offload.
    SsoRequest { url: String },
    /// Host-initiated abandonment of the caller's active flow, if any.
    Stop,
}

impl ConnectorMessage {
    /// Short discriminator for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorMessage::Ping => "ping",
            ConnectorMessage::SsoRequest { .. } => "sso_request",
            ConnectorMessage::Stop => "stop",
        }
    }
}

/// Messages sent from the handler back to the connector.
///
/// `redirectUrl` keeps the JS field casing; `redirectUri` is accepted as an
/// input alias because older sample variants emitted that spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerMessage {
    /// Handshake acknowledgement.
    Pong,
    /// The flow reached a URL matching the expected redirect prefix.
    Success {
        #[serde(rename = "redirectUrl", alias = "redirectUri")]
        redirect_url: String,
    },
    /// The flow failed; `redirect_url` is present when the provider produced
    /// an error page worth showing to the user.
    Error {
        message: String,
        #[serde(
            rename = "redirectUrl",
            alias = "redirectUri",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        redirect_url: Option<String>,
    },
    /// The user abandoned the flow (closed the tab) before completion.
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl HandlerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerMessage::Pong => "pong",
            HandlerMessage::Success { .. } => "success",
            HandlerMessage::Error { .. } => "error",
            HandlerMessage::Cancel { .. } => "cancel",
        }
    }
}

/// The single result produced per flow.
///
/// One `TerminalOutcome` is both the payload delivered to the original caller
/// and the trigger for flow teardown; the handler converts it into the
/// terminal [`HandlerMessage`] when replying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Success {
        redirect_url: String,
    },
    Error {
        message: String,
        redirect_url: Option<String>,
    },
    Cancelled {
        message: Option<String>,
    },
}

impl TerminalOutcome {
    /// Short discriminator for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TerminalOutcome::Success { .. } => "success",
            TerminalOutcome::Error { .. } => "error",
            TerminalOutcome::Cancelled { .. } => "cancel",
        }
    }

    pub fn into_message(self) -> HandlerMessage {
        match self {
            TerminalOutcome::Success { redirect_url } => HandlerMessage::Success { redirect_url },
            TerminalOutcome::Error {
                message,
                redirect_url,
            } => HandlerMessage::Error {
                message,
                redirect_url,
            },
            TerminalOutcome::Cancelled { message } => HandlerMessage::Cancel { message },
        }
    }
}
