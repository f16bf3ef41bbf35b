use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::connector::filter::{RequestFilter, ResourceType};

/// One navigation observed inside an embedded surface, normalized across
/// both capability shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    pub url: String,
    pub resource_type: ResourceType,
}

impl NavigationEvent {
    pub fn main_frame(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resource_type: ResourceType::MainFrame,
        }
    }
}

/// Identifier of one attached blocking listener (capability shape A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Verdict a blocking listener returns synchronously for each delivered
/// navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockingResponse {
    pub cancel: bool,
}

pub type BlockingListener = Arc<dyn Fn(&NavigationEvent) -> BlockingResponse + Send + Sync>;

/// Capability shape A: packaged-app web views expose a webRequest-style API
/// where attached listeners see matching navigations before they commit and
/// can cancel them via their synchronous return value. The host applies the
/// filter; listeners only see matching events.
pub trait WebRequestApi: Send + Sync {
    fn add_on_before_request(&self, filter: RequestFilter, listener: BlockingListener)
        -> ListenerId;
    fn remove_on_before_request(&self, id: ListenerId);
}

/// A navigation pending inside an interceptor (capability shape B). Calling
/// [`prevent_default`](PendingNavigation::prevent_default) before the handler
/// returns cancels the navigation.
pub struct PendingNavigation {
    url: String,
    resource_type: ResourceType,
    prevented: AtomicBool,
}

impl PendingNavigation {
    pub fn new(url: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            url: url.into(),
            resource_type,
            prevented: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn prevent_default(&self) {
        self.prevented.store(true, Ordering::SeqCst);
    }

    pub fn default_prevented(&self) -> bool {
        self.prevented.load(Ordering::SeqCst)
    }
}

pub type BeforeRequestHandler = Arc<dyn Fn(&PendingNavigation) + Send + Sync>;

/// Live interception handle created by an [`InterceptorFactory`]. Holds at
/// most one before-request handler; `destroy` tears the interception down
/// for good.
pub trait RequestInterceptor: Send + Sync {
    fn set_before_request_handler(&self, handler: BeforeRequestHandler);
    fn destroy(&self);
}

/// Capability shape B: isolated-web-app frames mint interceptor handles per
/// filter instead of taking listener registrations.
pub trait InterceptorFactory: Send + Sync {
    fn create_interceptor(&self, filter: &RequestFilter) -> Arc<dyn RequestInterceptor>;
}

/// The embedded browsing surface an application hands to the connector.
///
/// A surface exposes at most one of the two interception capabilities;
/// which one decides the adapter the connector selects at construction.
/// `set_navigation_target` is how a completed flow's redirect URL is applied
/// back to the surface.
pub trait EmbeddedSurface: Send + Sync {
    fn web_request(&self) -> Option<Arc<dyn WebRequestApi>> {
        None
    }

    fn interceptor_factory(&self) -> Option<Arc<dyn InterceptorFactory>> {
        None
    }

    fn set_navigation_target(&self, url: &str);
}

/// Record of one navigation a test drove through an in-memory surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedNavigation {
    pub url: String,
    pub cancelled: bool,
}

#[derive(Default)]
struct WebViewState {
    listeners: Vec<(ListenerId, RequestFilter, BlockingListener)>,
    target: Option<String>,
    log: Vec<InterceptedNavigation>,
}

/// In-memory surface with the shape-A capability. Tests drive navigations
/// through [`navigate`](Self::navigate); matching attached listeners run
/// synchronously and their cancel verdicts are recorded.
#[derive(Clone)]
pub struct InMemoryWebViewSurface {
    state: Arc<Mutex<WebViewState>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryWebViewSurface {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WebViewState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Simulates the surface starting a top-level navigation to `url`.
    /// Returns whether a listener cancelled it.
    pub fn navigate(&self, url: &str) -> bool {
        self.navigate_event(NavigationEvent::main_frame(url))
    }

    pub fn navigate_event(&self, event: NavigationEvent) -> bool {
        let listeners = {
            let state = self.state.lock().unwrap();
            state
                .listeners
                .iter()
                .filter(|(_, filter, _)| filter.matches_str(&event.url, event.resource_type))
                .map(|(_, _, listener)| Arc::clone(listener))
                .collect::<Vec<_>>()
        };

        let mut cancelled = false;
        for listener in &listeners {
            cancelled |= listener(&event).cancel;
        }
        if !listeners.is_empty() {
            self.state.lock().unwrap().log.push(InterceptedNavigation {
                url: event.url.clone(),
                cancelled,
            });
        }
        cancelled
    }

    pub fn navigation_target(&self) -> Option<String> {
        self.state.lock().unwrap().target.clone()
    }

    pub fn intercepted(&self) -> Vec<InterceptedNavigation> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().unwrap().listeners.len()
    }
}

impl Default for InMemoryWebViewSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl WebRequestApi for InMemoryWebViewSurface {
    fn add_on_before_request(
        &self,
        filter: RequestFilter,
        listener: BlockingListener,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state.lock().unwrap().listeners.push((id, filter, listener));
        id
    }

    fn remove_on_before_request(&self, id: ListenerId) {
        self.state
            .lock()
            .unwrap()
            .listeners
            .retain(|(listener_id, _, _)| *listener_id != id);
    }
}

impl EmbeddedSurface for InMemoryWebViewSurface {
    fn web_request(&self) -> Option<Arc<dyn WebRequestApi>> {
        Some(Arc::new(self.clone()))
    }

    fn set_navigation_target(&self, url: &str) {
        self.state.lock().unwrap().target = Some(url.to_string());
    }
}

struct InMemoryInterceptor {
    filter: RequestFilter,
    handler: Mutex<Option<BeforeRequestHandler>>,
    destroyed: AtomicBool,
}

impl RequestInterceptor for InMemoryInterceptor {
    fn set_before_request_handler(&self, handler: BeforeRequestHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        *self.handler.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct FrameState {
    interceptors: Vec<Arc<InMemoryInterceptor>>,
    target: Option<String>,
    log: Vec<InterceptedNavigation>,
}

/// In-memory surface with the shape-B capability.
#[derive(Clone)]
pub struct InMemoryFrameSurface {
    state: Arc<Mutex<FrameState>>,
}

impl InMemoryFrameSurface {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FrameState::default())),
        }
    }

    /// Simulates the frame starting a top-level navigation to `url`.
    /// Returns whether an interceptor prevented it.
    pub fn navigate(&self, url: &str) -> bool {
        self.navigate_event(NavigationEvent::main_frame(url))
    }

    pub fn navigate_event(&self, event: NavigationEvent) -> bool {
        let handlers = {
            let state = self.state.lock().unwrap();
            state
                .interceptors
                .iter()
                .filter(|interceptor| {
                    !interceptor.destroyed.load(Ordering::SeqCst)
                        && interceptor.filter.matches_str(&event.url, event.resource_type)
                })
                .filter_map(|interceptor| interceptor.handler.lock().unwrap().clone())
                .collect::<Vec<_>>()
        };

        let mut cancelled = false;
        for handler in &handlers {
            let pending = PendingNavigation::new(event.url.clone(), event.resource_type);
            handler(&pending);
            cancelled |= pending.default_prevented();
        }
        if !handlers.is_empty() {
            self.state.lock().unwrap().log.push(InterceptedNavigation {
                url: event.url.clone(),
                cancelled,
            });
        }
        cancelled
    }

    pub fn navigation_target(&self) -> Option<String> {
        self.state.lock().unwrap().target.clone()
    }

    pub fn intercepted(&self) -> Vec<InterceptedNavigation> {
        self.state.lock().unwrap().log.clone()
    }

    /// Interceptors created and not yet destroyed.
    pub fn live_interceptor_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .interceptors
            .iter()
            .filter(|interceptor| !interceptor.destroyed.load(Ordering::SeqCst))
            .count()
    }
}

impl Default for InMemoryFrameSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptorFactory for InMemoryFrameSurface {
    fn create_interceptor(&self, filter: &RequestFilter) -> Arc<dyn RequestInterceptor> {
        let interceptor = Arc::new(InMemoryInterceptor {
            filter: filter.clone(),
            handler: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });
        self.state.lock().unwrap().interceptors.push(Arc::clone(&interceptor));
        interceptor
    }
}

impl EmbeddedSurface for InMemoryFrameSurface {
    fn interceptor_factory(&self) -> Option<Arc<dyn InterceptorFactory>> {
        Some(Arc::new(self.clone()))
    }

    fn set_navigation_target(&self, url: &str) {
        self.state.lock().unwrap().target = Some(url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sso_filter() -> RequestFilter {
        RequestFilter::parse(["https://sso.example.com/*"]).unwrap()
    }

    #[test]
    fn web_view_applies_the_filter_before_delivery() {
        let surface = InMemoryWebViewSurface::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let id = surface.add_on_before_request(
            sso_filter(),
            Arc::new(move |event| {
                captured.lock().unwrap().push(event.url.clone());
                BlockingResponse { cancel: true }
            }),
        );

        assert!(surface.navigate("https://sso.example.com/login"));
        assert!(!surface.navigate("https://unrelated.example/page"));
        assert_eq!(seen.lock().unwrap().as_slice(), &["https://sso.example.com/login"]);
        assert_eq!(surface.intercepted().len(), 1);

        surface.remove_on_before_request(id);
        assert!(!surface.navigate("https://sso.example.com/login"));
        assert_eq!(surface.listener_count(), 0);
    }

    #[test]
    fn web_view_ignores_non_matching_resource_types() {
        let surface = InMemoryWebViewSurface::new();
        let _ = surface.add_on_before_request(
            sso_filter(),
            Arc::new(|_| BlockingResponse { cancel: true }),
        );

        let cancelled = surface.navigate_event(NavigationEvent {
            url: "https://sso.example.com/login".into(),
            resource_type: ResourceType::Image,
        });
        assert!(!cancelled);
    }

    #[test]
    fn frame_interceptor_prevents_matching_navigations() {
        let surface = InMemoryFrameSurface::new();
        let interceptor = surface.create_interceptor(&sso_filter());
        interceptor.set_before_request_handler(Arc::new(|pending| {
            pending.prevent_default();
        }));

        assert!(surface.navigate("https://sso.example.com/login"));
        assert!(!surface.navigate("https://unrelated.example/page"));
        assert_eq!(surface.live_interceptor_count(), 1);

        interceptor.destroy();
        assert!(!surface.navigate("https://sso.example.com/login"));
        assert_eq!(surface.live_interceptor_count(), 0);
    }

    #[test]
    fn surfaces_record_the_applied_target() {
        let surface = InMemoryFrameSurface::new();
        surface.set_navigation_target("https://client.example/cb?code=1");
        assert_eq!(
            surface.navigation_target().as_deref(),
            Some("https://client.example/cb?code=1")
        );
    }
}
