//! Message channel between the embedded connector and the extension handler.
//!
//! The protocol is request/response: the connector sends `ping`, `sso_request`
//! and `stop` payloads ([`ConnectorMessage`]) through a [`MessageSender`], and
//! the handler answers each request through the one-shot [`Responder`] it
//! receives alongside the payload. [`InMemoryChannel`] wires both halves
//! together in-process for tests and embedders without a host transport.

pub mod channel;
pub mod error;
pub mod types;

pub use channel::{
    CallerIdentity, InMemoryChannel, InMemoryEndpoint, InMemoryReceiver, MessageReceiver,
    MessageSender, RequestListener, Responder,
};
pub use error::{ChannelError, ChannelResult};
pub use types::{ConnectorMessage, HandlerMessage, TerminalOutcome};
