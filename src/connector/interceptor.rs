use std::sync::Arc;

use crate::connector::filter::RequestFilter;
use crate::connector::surface::{
    BlockingResponse, EmbeddedSurface, InterceptorFactory, NavigationEvent, WebRequestApi,
};
use crate::util::Subscription;

pub(crate) type InterceptCallback = Arc<dyn Fn(NavigationEvent) + Send + Sync + 'static>;

/// Capability-neutral interception seam the connector drives. One adapter
/// exists per surface capability shape; the shape is decided once at
/// construction by [`select_interceptor`], never re-branched at call sites.
///
/// `attach` registers interception for `filter` and reports every matching
/// navigation through `callback` after cancelling it in the surface.
pub(crate) trait NavigationInterceptor: Send + Sync {
    fn attach(&self, filter: &RequestFilter, callback: InterceptCallback) -> Subscription;
    fn update_target(&self, url: &str);
}

/// Picks the adapter matching the capability the surface exposes. `None`
/// when the surface exposes neither capability.
pub(crate) fn select_interceptor(
    surface: Arc<dyn EmbeddedSurface>,
) -> Option<Arc<dyn NavigationInterceptor>> {
    if let Some(api) = surface.web_request() {
        return Some(Arc::new(WebRequestAdapter { surface, api }));
    }
    if let Some(factory) = surface.interceptor_factory() {
        return Some(Arc::new(FrameAdapter { surface, factory }));
    }
    None
}

struct WebRequestAdapter {
    surface: Arc<dyn EmbeddedSurface>,
    api: Arc<dyn WebRequestApi>,
}

impl NavigationInterceptor for WebRequestAdapter {
    fn attach(&self, filter: &RequestFilter, callback: InterceptCallback) -> Subscription {
        let id = self.api.add_on_before_request(
            filter.clone(),
            Arc::new(move |event| {
                callback(event.clone());
                BlockingResponse { cancel: true }
            }),
        );
        let api = Arc::clone(&self.api);
        Subscription::new(move || api.remove_on_before_request(id))
    }

    fn update_target(&self, url: &str) {
        self.surface.set_navigation_target(url);
    }
}

struct FrameAdapter {
    surface: Arc<dyn EmbeddedSurface>,
    factory: Arc<dyn InterceptorFactory>,
}

impl NavigationInterceptor for FrameAdapter {
    fn attach(&self, filter: &RequestFilter, callback: InterceptCallback) -> Subscription {
        let interceptor = self.factory.create_interceptor(filter);
        interceptor.set_before_request_handler(Arc::new(move |pending| {
            pending.prevent_default();
            callback(NavigationEvent {
                url: pending.url().to_string(),
                resource_type: pending.resource_type(),
            });
        }));
        Subscription::new(move || interceptor.destroy())
    }

    fn update_target(&self, url: &str) {
        self.surface.set_navigation_target(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::surface::{InMemoryFrameSurface, InMemoryWebViewSurface};
    use std::sync::Mutex;

    struct InertSurface;

    impl EmbeddedSurface for InertSurface {
        fn set_navigation_target(&self, _url: &str) {}
    }

    fn sso_filter() -> RequestFilter {
        RequestFilter::parse(["https://sso.example.com/*"]).unwrap()
    }

    #[test]
    fn surfaces_without_capabilities_have_no_adapter() {
        assert!(select_interceptor(Arc::new(InertSurface)).is_none());
    }

    #[test]
    fn web_request_adapter_cancels_and_forwards() {
        let surface = InMemoryWebViewSurface::new();
        let interceptor = select_interceptor(Arc::new(surface.clone())).unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let subscription = interceptor.attach(
            &sso_filter(),
            Arc::new(move |event| captured.lock().unwrap().push(event.url)),
        );

        assert!(surface.navigate("https://sso.example.com/login"));
        assert_eq!(seen.lock().unwrap().as_slice(), &["https://sso.example.com/login"]);

        interceptor.update_target("https://client.example/cb");
        assert_eq!(
            surface.navigation_target().as_deref(),
            Some("https://client.example/cb")
        );

        drop(subscription);
        assert!(!surface.navigate("https://sso.example.com/login"));
        assert_eq!(surface.listener_count(), 0);
    }

    #[test]
    fn frame_adapter_prevents_and_forwards() {
        let surface = InMemoryFrameSurface::new();
        let interceptor = select_interceptor(Arc::new(surface.clone())).unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let subscription = interceptor.attach(
            &sso_filter(),
            Arc::new(move |event| captured.lock().unwrap().push(event.url)),
        );

        assert!(surface.navigate("https://sso.example.com/login"));
        assert_eq!(seen.lock().unwrap().as_slice(), &["https://sso.example.com/login"]);

        drop(subscription);
        assert_eq!(surface.live_interceptor_count(), 0);
        assert!(!surface.navigate("https://sso.example.com/login"));
    }
}
