use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::connector::error::{ConnectorError, ConnectorResult};
use crate::connector::filter::RequestFilter;
use crate::connector::interceptor::{select_interceptor, InterceptCallback, NavigationInterceptor};
use crate::connector::surface::{EmbeddedSurface, NavigationEvent};
use crate::messaging::channel::MessageSender;
use crate::messaging::error::ChannelError;
use crate::messaging::types::{ConnectorMessage, HandlerMessage};
use crate::platform::runtime;
use crate::util::Subscription;

pub type SuccessCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;
pub type ErrorCallback = Arc<dyn Fn(&ConnectorError) + Send + Sync + 'static>;

enum LifecycleState {
    Stopped,
    Starting,
    Started(Subscription),
}

/// Embedded-side connector.
///
/// Bridges navigation events inside an embedded browsing surface to the
/// extension handler: matching navigations are cancelled in the surface and
/// delegated over the message channel, and the handler's terminal outcome is
/// applied back as the surface's navigation target. Clones share state.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    target: String,
    filter: RequestFilter,
    interceptor: Arc<dyn NavigationInterceptor>,
    messenger: Arc<dyn MessageSender>,
    on_success: SuccessCallback,
    on_error: ErrorCallback,
    state: Mutex<LifecycleState>,
    in_flight: AtomicBool,
    // Bumped on stop(); a reply carrying an older value is discarded.
    session: AtomicU64,
}

pub struct ConnectorBuilder {
    target: String,
    surface: Option<Arc<dyn EmbeddedSurface>>,
    messenger: Option<Arc<dyn MessageSender>>,
    filter: Option<RequestFilter>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ConnectorBuilder {
    /// Address of the handler extension the connector delegates to.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn surface(mut self, surface: Arc<dyn EmbeddedSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn messenger(mut self, messenger: Arc<dyn MessageSender>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn filter(mut self, filter: RequestFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Invoked with the redirect URL after it was applied to the surface.
    /// Defaults to an info log line.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Invoked with every runtime error once started. Defaults to a warn
    /// log line; never panics.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConnectorError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> ConnectorResult<Connector> {
        if self.target.is_empty() {
            return Err(ConnectorError::configuration("a handler target id is required"));
        }
        let surface = self
            .surface
            .ok_or_else(|| ConnectorError::configuration("an embedded surface is required"))?;
        let messenger = self
            .messenger
            .ok_or_else(|| ConnectorError::configuration("a message channel is required"))?;
        let filter = self
            .filter
            .ok_or_else(|| ConnectorError::configuration("a request filter is required"))?;
        if filter.is_empty() {
            return Err(ConnectorError::configuration(
                "the request filter needs at least one URL pattern",
            ));
        }
        let interceptor = select_interceptor(surface).ok_or_else(|| {
            ConnectorError::configuration("the embedded surface exposes no interception capability")
        })?;

        Ok(Connector {
            inner: Arc::new(ConnectorInner {
                target: self.target,
                filter,
                interceptor,
                messenger,
                on_success: self
                    .on_success
                    .unwrap_or_else(|| Arc::new(|url| log::info!("sso flow completed: {url}"))),
                on_error: self
                    .on_error
                    .unwrap_or_else(|| Arc::new(|err| log::warn!("sso flow failed: {err}"))),
                state: Mutex::new(LifecycleState::Stopped),
                in_flight: AtomicBool::new(false),
                session: AtomicU64::new(0),
            }),
        })
    }
}

impl Connector {
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(3000);

    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder {
            target: String::new(),
            surface: None,
            messenger: None,
            filter: None,
            on_success: None,
            on_error: None,
        }
    }

    /// Starts the connector with the default handshake timeout.
    pub async fn start(&self) -> ConnectorResult<()> {
        self.start_with_timeout(Self::DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    /// Pings the handler, requires a `pong` within `timeout`, then attaches
    /// the interception listener. No listener is left behind on failure;
    /// starting an already started connector is a configuration error.
    pub async fn start_with_timeout(&self, timeout: Duration) -> ConnectorResult<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                LifecycleState::Stopped => *state = LifecycleState::Starting,
                _ => return Err(ConnectorError::configuration("already started")),
            }
        }

        if let Err(err) = self.handshake(timeout).await {
            let mut state = self.inner.state.lock().unwrap();
            if matches!(*state, LifecycleState::Starting) {
                *state = LifecycleState::Stopped;
            }
            return Err(err);
        }

        let subscription = self
            .inner
            .interceptor
            .attach(&self.inner.filter, self.intercept_callback());

        let mut state = self.inner.state.lock().unwrap();
        match *state {
            LifecycleState::Starting => {
                *state = LifecycleState::Started(subscription);
                log::debug!("connector started against {}", self.inner.target);
                Ok(())
            }
            // stop() won the race against the handshake; roll the attach
            // back and report the aborted startup.
            _ => {
                drop(state);
                subscription.detach();
                Err(ConnectorError::Cancelled {
                    message: Some("stopped before startup completed".into()),
                })
            }
        }
    }

    /// Detaches interception and notifies the handler that any open flow is
    /// abandoned. Idempotent; safe to call while `start` is pending.
    pub fn stop(&self) {
        let previous = {
            let mut state = self.inner.state.lock().unwrap();
            std::mem::replace(&mut *state, LifecycleState::Stopped)
        };
        match previous {
            LifecycleState::Stopped => {}
            LifecycleState::Starting => {
                self.inner.session.fetch_add(1, Ordering::SeqCst);
                log::debug!("stopped while the handshake was still pending");
            }
            LifecycleState::Started(subscription) => {
                subscription.detach();
                self.inner.session.fetch_add(1, Ordering::SeqCst);
                self.inner.in_flight.store(false, Ordering::SeqCst);
                let messenger = Arc::clone(&self.inner.messenger);
                let target = self.inner.target.clone();
                runtime::spawn_detached(async move {
                    let Ok(payload) = serde_json::to_value(&ConnectorMessage::Stop) else {
                        return;
                    };
                    if let Err(err) = messenger.notify(&target, payload).await {
                        log::debug!("stop notification did not reach the handler: {err}");
                    }
                });
            }
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(*self.inner.state.lock().unwrap(), LifecycleState::Started(_))
    }

    async fn handshake(&self, timeout: Duration) -> ConnectorResult<()> {
        let payload = serde_json::to_value(&ConnectorMessage::Ping)
            .map_err(|err| ConnectorError::communication(format!("could not encode ping: {err}")))?;
        let request = self.inner.messenger.request(&self.inner.target, payload);
        match runtime::timeout(timeout, request).await {
            None => Err(ConnectorError::communication(format!(
                "connection timed out after {} ms; the handler extension may not be installed or enabled",
                timeout.as_millis()
            ))),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(reply)) => match serde_json::from_value::<HandlerMessage>(reply) {
                Ok(HandlerMessage::Pong) => Ok(()),
                _ => Err(ConnectorError::communication("unexpected response to ping")),
            },
        }
    }

    fn intercept_callback(&self) -> InterceptCallback {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |event: NavigationEvent| {
            if let Some(inner) = weak.upgrade() {
                Connector { inner }.on_intercepted(event);
            }
        })
    }

    /// Runs synchronously inside the interception listener; the adapter has
    /// already cancelled the navigation in the surface by the time this is
    /// called.
    fn on_intercepted(&self, event: NavigationEvent) {
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            // One response at a time: duplicates are forwarded without
            // expecting a reply so the handler can focus the open tab.
            log::debug!("intercepted {} while a request is in flight, nudging", event.url);
            let connector = self.clone();
            runtime::spawn_detached(async move {
                connector.nudge(event.url).await;
            });
            return;
        }

        log::debug!("intercepted {}, delegating to {}", event.url, self.inner.target);
        let session = self.inner.session.load(Ordering::SeqCst);
        let connector = self.clone();
        runtime::spawn_detached(async move {
            connector.delegate(event.url, session).await;
        });
    }

    async fn nudge(self, url: String) {
        let Ok(payload) = serde_json::to_value(&ConnectorMessage::SsoRequest { url }) else {
            return;
        };
        if let Err(err) = self.inner.messenger.notify(&self.inner.target, payload).await {
            log::debug!("nudge did not reach the handler: {err}");
        }
    }

    async fn delegate(self, url: String, session: u64) {
        let payload = match serde_json::to_value(&ConnectorMessage::SsoRequest { url }) {
            Ok(payload) => payload,
            Err(err) => {
                if self.session_current(session) {
                    self.inner.in_flight.store(false, Ordering::SeqCst);
                    self.emit_error(&ConnectorError::communication(format!(
                        "could not encode the request: {err}"
                    )));
                }
                return;
            }
        };

        let result = self.inner.messenger.request(&self.inner.target, payload).await;

        // A reply that straddles stop(), or stop() plus a restart, belongs
        // to the session that sent the request; it must neither reach the
        // callbacks nor touch the new session's in-flight flag.
        if !self.session_current(session) {
            log::debug!("discarding a reply from a stopped session");
            return;
        }
        self.inner.in_flight.store(false, Ordering::SeqCst);
        self.apply_reply(result);
    }

    fn session_current(&self, session: u64) -> bool {
        self.inner.session.load(Ordering::SeqCst) == session && self.is_started()
    }

    fn apply_reply(&self, result: Result<Value, ChannelError>) {
        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                self.emit_error(&ConnectorError::from(err));
                return;
            }
        };

        match serde_json::from_value::<HandlerMessage>(reply) {
            Ok(HandlerMessage::Success { redirect_url }) => {
                self.inner.interceptor.update_target(&redirect_url);
                (self.inner.on_success)(&redirect_url);
            }
            Ok(HandlerMessage::Error {
                message,
                redirect_url,
            }) => {
                if let Some(url) = &redirect_url {
                    self.inner.interceptor.update_target(url);
                }
                self.emit_error(&ConnectorError::HandlerReported {
                    message,
                    redirect_url,
                });
            }
            Ok(HandlerMessage::Cancel { message }) => {
                self.emit_error(&ConnectorError::Cancelled { message });
            }
            Ok(HandlerMessage::Pong) | Err(_) => {
                self.emit_error(&ConnectorError::communication(
                    "unexpected response from the handler",
                ));
            }
        }
    }

    fn emit_error(&self, err: &ConnectorError) {
        (self.inner.on_error)(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::surface::InMemoryWebViewSurface;
    use crate::messaging::channel::InMemoryChannel;

    fn sso_filter() -> RequestFilter {
        RequestFilter::parse(["https://sso.example.com/*"]).unwrap()
    }

    fn assert_configuration(result: ConnectorResult<Connector>, fragment: &str) {
        match result {
            Err(ConnectorError::Configuration { message }) => {
                assert!(message.contains(fragment), "got: {message}");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("build unexpectedly succeeded"),
        }
    }

    #[test]
    fn build_rejects_missing_pieces() {
        let channel = InMemoryChannel::new();
        let surface = InMemoryWebViewSurface::new();

        assert_configuration(
            Connector::builder()
                .surface(Arc::new(surface.clone()))
                .messenger(Arc::new(channel.endpoint("isolated-app://demo")))
                .filter(sso_filter())
                .build(),
            "target id",
        );
        assert_configuration(
            Connector::builder()
                .target("handler-ext")
                .messenger(Arc::new(channel.endpoint("isolated-app://demo")))
                .filter(sso_filter())
                .build(),
            "surface",
        );
        assert_configuration(
            Connector::builder()
                .target("handler-ext")
                .surface(Arc::new(surface.clone()))
                .filter(sso_filter())
                .build(),
            "channel",
        );
        assert_configuration(
            Connector::builder()
                .target("handler-ext")
                .surface(Arc::new(surface.clone()))
                .messenger(Arc::new(channel.endpoint("isolated-app://demo")))
                .build(),
            "filter",
        );
    }

    #[test]
    fn build_rejects_an_empty_filter() {
        let channel = InMemoryChannel::new();
        assert_configuration(
            Connector::builder()
                .target("handler-ext")
                .surface(Arc::new(InMemoryWebViewSurface::new()))
                .messenger(Arc::new(channel.endpoint("isolated-app://demo")))
                .filter(RequestFilter::new(Vec::new()))
                .build(),
            "at least one URL pattern",
        );
    }

    #[test]
    fn build_rejects_a_surface_without_capabilities() {
        struct Inert;
        impl EmbeddedSurface for Inert {
            fn set_navigation_target(&self, _url: &str) {}
        }

        let channel = InMemoryChannel::new();
        assert_configuration(
            Connector::builder()
                .target("handler-ext")
                .surface(Arc::new(Inert))
                .messenger(Arc::new(channel.endpoint("isolated-app://demo")))
                .filter(sso_filter())
                .build(),
            "interception capability",
        );
    }
}
