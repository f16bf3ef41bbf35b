//! SSO offload relay for sandboxed embedded browsing surfaces.
//!
//! Certain identity-provider flows cannot complete inside an isolated web
//! app frame or a packaged app's web view: cross-origin storage rules,
//! popup blocking, and policy constraints get in the way. This crate splits
//! the flow between two components joined only by an asynchronous message
//! channel:
//!
//! - [`connector::Connector`] runs inside the embedded surface. It cancels
//!   navigations matching a configured URL filter before they load and
//!   delegates them to the handler, then applies the returned redirect URL
//!   back to the surface.
//! - [`handler::SsoHandler`] runs inside the trusted extension process. It
//!   validates each caller against an allow-list, opens a real browser tab
//!   for the identity-provider URL, watches the tab until it reaches the
//!   `redirect_uri` target or the user closes it, and reports exactly one
//!   terminal outcome per flow.
//!
//! Host capabilities (tab lifecycle, navigation interception, the message
//! channel itself) are injected traits; in-memory implementations of all
//! three ship with the crate, so the full round trip can run without a
//! browser:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sso_relay_rs::connector::{Connector, RequestFilter};
//! use sso_relay_rs::connector::InMemoryFrameSurface;
//! use sso_relay_rs::handler::{InMemoryTabHost, SsoHandler, TrustedCallers};
//! use sso_relay_rs::messaging::InMemoryChannel;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = InMemoryChannel::new();
//! let tabs = InMemoryTabHost::new();
//!
//! let handler = SsoHandler::builder(Arc::new(tabs.clone()))
//!     .trusted_callers(TrustedCallers::new().trust("isolated-app://demo"))
//!     .build();
//! let _attached = handler.attach(&channel.receiver("handler-ext"));
//!
//! let surface = InMemoryFrameSurface::new();
//! let connector = Connector::builder()
//!     .target("handler-ext")
//!     .surface(Arc::new(surface.clone()))
//!     .messenger(Arc::new(channel.endpoint("isolated-app://demo")))
//!     .filter(RequestFilter::parse(["https://sso.example.com/*"])?)
//!     .build()?;
//! connector.start().await?;
//!
//! surface.navigate("https://sso.example.com/login?redirect_uri=https%3A%2F%2Fapp%2Fcb");
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod handler;
pub mod messaging;
pub mod platform;
pub mod util;
