//! Extension-side flow handler: authorization, tab lifecycle, and the
//! flow-per-caller state machine.
//!
//! [`SsoHandler`] listens on a message channel, validates each sender
//! against a [`TrustedCallers`] allow-list, opens a browser tab through the
//! injected [`TabHost`] for every accepted request, and resolves each flow
//! with exactly one terminal reply when the tab reaches the expected
//! redirect, the user closes it, or the optional deadline elapses.

pub mod allowlist;
pub mod api;
pub mod error;
pub mod flow;
pub mod tabs;

pub use allowlist::{TrustedCaller, TrustedCallers};
pub use api::{SsoHandler, SsoHandlerBuilder};
pub use error::{HandlerError, HandlerResult};
pub use flow::FlowKey;
pub use tabs::{
    acquire_tab, InMemoryTabHost, TabApiError, TabHost, TabHostCall, TabId, TabRef,
    TabRemovedListener, TabResult, TabUrlListener, WindowId,
};
