//! Embedded-side connector: navigation interception and delegation.
//!
//! The [`Connector`] sits inside a sandboxed browsing surface, cancels
//! navigations matching its [`RequestFilter`] before they load, and hands
//! them to the extension handler over the message channel. Two surface
//! capability shapes are supported behind one internal seam: a blocking
//! webRequest-style listener API and an interceptor-factory API.

pub mod api;
pub mod error;
pub mod filter;
mod interceptor;
pub mod surface;

pub use api::{Connector, ConnectorBuilder, ErrorCallback, SuccessCallback};
pub use error::{ConnectorError, ConnectorResult};
pub use filter::{PatternError, RequestFilter, ResourceType, UrlPattern};
pub use surface::{
    BeforeRequestHandler, BlockingListener, BlockingResponse, EmbeddedSurface,
    InMemoryFrameSurface, InMemoryWebViewSurface, InterceptedNavigation, InterceptorFactory,
    ListenerId, NavigationEvent, PendingNavigation, RequestInterceptor, WebRequestApi,
};
