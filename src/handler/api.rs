use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::handler::allowlist::TrustedCallers;
use crate::handler::error::HandlerError;
use crate::handler::flow::{
    classify_redirect, expected_redirect_prefix, ActiveFlows, FlowKey, FlowRecord,
};
use crate::handler::tabs::{acquire_tab, TabHost, TabId, TabRef};
use crate::messaging::channel::{CallerIdentity, MessageReceiver, Responder};
use crate::messaging::types::{ConnectorMessage, HandlerMessage, TerminalOutcome};
use crate::platform::runtime;
use crate::util::subscribe;
use crate::util::Subscription;

/// Extension-side flow handler.
///
/// Owns the flow-per-caller state machine: validates the sender against the
/// allow-list, opens a tab for each accepted `sso_request`, observes the tab
/// until the redirect matches, the user closes it, or the optional deadline
/// elapses, and delivers exactly one terminal reply per flow. Clones share
/// state.
#[derive(Clone)]
pub struct SsoHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    tab_host: Arc<dyn TabHost>,
    trusted: TrustedCallers,
    flow_timeout: Option<Duration>,
    flows: ActiveFlows,
}

pub struct SsoHandlerBuilder {
    tab_host: Arc<dyn TabHost>,
    trusted: TrustedCallers,
    flow_timeout: Option<Duration>,
}

impl SsoHandlerBuilder {
    /// Trusted caller origins. Without any entries, every request is
    /// rejected as untrusted.
    pub fn trusted_callers(mut self, trusted: TrustedCallers) -> Self {
        self.trusted = trusted;
        self
    }

    /// Enables the per-flow deadline. Flows still pending when it elapses
    /// fail with a "timed out" error reply and their tab is closed.
    pub fn flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> SsoHandler {
        if self.trusted.is_empty() {
            log::warn!("no trusted callers configured; every request will be rejected");
        }
        SsoHandler {
            inner: Arc::new(HandlerInner {
                tab_host: self.tab_host,
                trusted: self.trusted,
                flow_timeout: self.flow_timeout,
                flows: ActiveFlows::default(),
            }),
        }
    }
}

impl SsoHandler {
    pub fn builder(tab_host: Arc<dyn TabHost>) -> SsoHandlerBuilder {
        SsoHandlerBuilder {
            tab_host,
            trusted: TrustedCallers::new(),
            flow_timeout: None,
        }
    }

    /// Subscribes this handler's dispatch to a channel receiver. Dropping
    /// the returned guard detaches it.
    pub fn attach(&self, receiver: &dyn MessageReceiver) -> Subscription {
        let handler = self.clone();
        receiver.on_request(Arc::new(move |caller, payload, responder| {
            handler.handle_message(caller, payload, responder);
        }))
    }

    /// Entry point for one inbound request. Authorization runs before the
    /// payload is even parsed; untrusted senders never reach flow state or
    /// the tab host.
    pub fn handle_message(&self, caller: CallerIdentity, payload: Value, responder: Responder) {
        if !self.inner.trusted.contains(&caller.origin) {
            log::warn!("rejecting request from untrusted origin {caller}");
            let err = HandlerError::UntrustedCaller {
                origin: caller.origin,
            };
            responder.send(TerminalOutcome::from(err).into_message());
            return;
        }

        let message = match serde_json::from_value::<ConnectorMessage>(payload) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("unparseable request from {caller}: {err}");
                let err = HandlerError::invalid_request(format!("unrecognized request: {err}"));
                responder.send(TerminalOutcome::from(err).into_message());
                return;
            }
        };

        log::debug!("handling {} from {caller}", message.kind());
        match message {
            ConnectorMessage::Ping => {
                responder.send(HandlerMessage::Pong);
            }
            ConnectorMessage::SsoRequest { url } => {
                self.start_flow(FlowKey::new(caller.origin), url, responder);
            }
            ConnectorMessage::Stop => {
                self.cancel_flow_for(&FlowKey::new(caller.origin));
            }
        }
    }

    pub fn active_flow_count(&self) -> usize {
        self.inner.flows.len()
    }

    pub fn has_flow_for(&self, origin: &str) -> bool {
        self.inner.flows.contains(&FlowKey::new(origin))
    }

    fn start_flow(&self, key: FlowKey, url: String, responder: Responder) {
        let prefix = match expected_redirect_prefix(&url) {
            Ok(prefix) => prefix,
            Err(err) => {
                log::debug!("rejecting sso request from {key}: {err}");
                responder.send(TerminalOutcome::from(err).into_message());
                return;
            }
        };

        let seq = match self.inner.flows.reserve(&key, prefix, responder) {
            Ok(seq) => seq,
            Err(existing_tab) => {
                // Duplicate request for an active key: focus the open flow's
                // window instead of starting a second one, and leave the
                // duplicate unanswered. The first request's reply stands.
                log::debug!("flow for {key} already active, focusing its window");
                if let Some(tab) = existing_tab {
                    let host = Arc::clone(&self.inner.tab_host);
                    runtime::spawn_detached(async move {
                        if let Err(err) = host.focus_window(tab.window_id).await {
                            log::debug!("could not focus {}: {err}", tab.window_id);
                        }
                    });
                }
                return;
            }
        };

        if let Some(timeout) = self.inner.flow_timeout {
            let guard = self.start_timeout(key.clone(), seq, timeout);
            self.inner.flows.add_observers(&key, seq, vec![guard]);
        }

        let handler = self.clone();
        runtime::spawn_detached(async move {
            handler.open_and_observe(key, seq, url).await;
        });
    }

    async fn open_and_observe(self, key: FlowKey, seq: u64, url: String) {
        let tab = match acquire_tab(self.inner.tab_host.as_ref(), &url).await {
            Ok(tab) => tab,
            Err(err) => {
                log::warn!("tab acquisition failed for {key}: {err}");
                self.finish(&key, seq, TerminalOutcome::from(HandlerError::from(err)), false);
                return;
            }
        };

        // The flow may have been cancelled while the tab was created; this
        // task then owns the orphan and closes it. On success the record
        // hands back the redirect prefix the observers watch for.
        let Some(prefix) = self.inner.flows.attach_tab(&key, seq, tab) else {
            log::debug!("flow for {key} ended during tab creation, closing {}", tab.tab_id);
            self.close_tab_detached(tab.tab_id);
            return;
        };

        self.attach_observers(&key, seq, tab, prefix);
    }

    fn attach_observers(&self, key: &FlowKey, seq: u64, tab: TabRef, prefix: String) {
        let url_observer = {
            let weak = Arc::downgrade(&self.inner);
            let key = key.clone();
            self.inner.tab_host.on_tab_url_changed(
                tab.tab_id,
                Arc::new(move |new_url| {
                    if let Some(handler) = upgrade(&weak) {
                        if let Some(outcome) = classify_redirect(&new_url, &prefix) {
                            handler.finish(&key, seq, outcome, true);
                        }
                    }
                }),
            )
        };

        let removal_observer = {
            let weak = Arc::downgrade(&self.inner);
            let key = key.clone();
            self.inner.tab_host.on_tab_removed(Arc::new(move |removed| {
                if removed != tab.tab_id {
                    return;
                }
                if let Some(handler) = upgrade(&weak) {
                    let outcome = TerminalOutcome::Cancelled {
                        message: Some("authentication tab was closed".into()),
                    };
                    // The tab is already gone; nothing to close.
                    handler.finish(&key, seq, outcome, false);
                }
            }))
        };

        if !self
            .inner
            .flows
            .add_observers(key, seq, vec![url_observer, removal_observer])
        {
            // Dropping the guards right here detaches both listeners; the
            // finisher that removed the record already dealt with the tab.
            log::debug!("flow for {key} ended before its observers attached");
        }
    }

    fn start_timeout(&self, key: FlowKey, seq: u64, timeout: Duration) -> Subscription {
        let (armed, disarm) = subscribe::tracked();
        let weak = Arc::downgrade(&self.inner);
        runtime::spawn_detached(async move {
            runtime::sleep(timeout).await;
            if !armed.load(Ordering::SeqCst) {
                return;
            }
            if let Some(handler) = upgrade(&weak) {
                let outcome = TerminalOutcome::Error {
                    message: "authentication flow timed out".into(),
                    redirect_url: None,
                };
                handler.finish(&key, seq, outcome, true);
            }
        });
        Subscription::new(disarm)
    }

    /// The single terminal transition. Idempotent: the record is removed
    /// first, so whichever trigger gets here first wins and every later
    /// call for the same flow is a no-op. Observer guards are dropped
    /// before the reply goes out, so a second trigger cannot even fire.
    fn finish(&self, key: &FlowKey, seq: u64, outcome: TerminalOutcome, close_tab: bool) {
        let record = match self.inner.flows.take_if_current(key, seq) {
            Some(record) => record,
            None => return,
        };
        let FlowRecord {
            responder,
            tab,
            observers,
            created_at,
            ..
        } = record;
        drop(observers);

        let age = Utc::now().signed_duration_since(created_at);
        log::debug!(
            "flow for {key} ended with {} after {} ms",
            outcome.label(),
            age.num_milliseconds()
        );

        if !responder.send(outcome.into_message()) {
            log::debug!("terminal reply for {key} had nowhere to go");
        }

        if close_tab {
            if let Some(tab) = tab {
                self.close_tab_detached(tab.tab_id);
            }
        }
    }

    /// Host-initiated cancellation (`stop` message): clear the record and
    /// close the tab without a terminal reply, since the caller already
    /// gave up on the flow.
    fn cancel_flow_for(&self, key: &FlowKey) {
        let Some(record) = self.inner.flows.take_any(key) else {
            return;
        };
        log::debug!("flow for {key} stopped by its caller");
        let FlowRecord { tab, observers, .. } = record;
        drop(observers);
        if let Some(tab) = tab {
            self.close_tab_detached(tab.tab_id);
        }
    }

    fn close_tab_detached(&self, tab: TabId) {
        let host = Arc::clone(&self.inner.tab_host);
        runtime::spawn_detached(async move {
            if let Err(err) = host.close_tab(tab).await {
                log::debug!("ignoring close failure for {tab}: {err}");
            }
        });
    }
}

fn upgrade(weak: &Weak<HandlerInner>) -> Option<SsoHandler> {
    weak.upgrade().map(|inner| SsoHandler { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tabs::InMemoryTabHost;
    use serde_json::json;
    use std::sync::Mutex;

    fn capture() -> (Responder, Arc<Mutex<Vec<Value>>>) {
        let sent: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&sent);
        let responder = Responder::new(move |value| captured.lock().unwrap().push(value));
        (responder, sent)
    }

    fn demo_caller() -> CallerIdentity {
        CallerIdentity::new("isolated-app://demo")
    }

    fn handler_with(host: &InMemoryTabHost) -> SsoHandler {
        SsoHandler::builder(Arc::new(host.clone()))
            .trusted_callers(TrustedCallers::new().trust("isolated-app://demo"))
            .build()
    }

    #[test]
    fn ping_gets_pong() {
        let host = InMemoryTabHost::new();
        let handler = handler_with(&host);
        let (responder, sent) = capture();

        handler.handle_message(demo_caller(), json!({"type": "ping"}), responder);
        assert_eq!(sent.lock().unwrap().as_slice(), &[json!({"type": "pong"})]);
    }

    #[test]
    fn untrusted_senders_never_reach_the_tab_host() {
        let host = InMemoryTabHost::new();
        let handler = handler_with(&host);
        let (responder, sent) = capture();

        handler.handle_message(
            CallerIdentity::new("https://evil.example"),
            json!({"type": "sso_request", "url": "https://idp.example/auth?redirect_uri=https%3A%2F%2Fcb"}),
            responder,
        );

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let message = sent[0]["message"].as_str().unwrap();
        assert!(message.contains("untrusted"), "got: {message}");
        assert!(host.calls().is_empty());
        assert_eq!(handler.active_flow_count(), 0);
    }

    #[test]
    fn missing_redirect_uri_is_rejected_before_any_tab_work() {
        let host = InMemoryTabHost::new();
        let handler = handler_with(&host);
        let (responder, sent) = capture();

        handler.handle_message(
            demo_caller(),
            json!({"type": "sso_request", "url": "https://idp.example/auth"}),
            responder,
        );

        let sent = sent.lock().unwrap();
        assert_eq!(
            sent[0],
            json!({
                "type": "error",
                "message": "URL must have a 'redirect_uri' parameter"
            })
        );
        assert!(host.calls().is_empty());
        assert_eq!(handler.active_flow_count(), 0);
    }

    #[test]
    fn empty_redirect_uri_is_rejected_before_any_tab_work() {
        let host = InMemoryTabHost::new();
        let handler = handler_with(&host);
        let (responder, sent) = capture();

        handler.handle_message(
            demo_caller(),
            json!({"type": "sso_request", "url": "https://idp.example/auth?redirect_uri="}),
            responder,
        );

        let sent = sent.lock().unwrap();
        assert_eq!(
            sent[0],
            json!({
                "type": "error",
                "message": "URL must have a 'redirect_uri' parameter"
            })
        );
        assert!(host.calls().is_empty());
        assert_eq!(handler.active_flow_count(), 0);
    }

    #[test]
    fn unrecognized_payloads_get_an_error_reply() {
        let host = InMemoryTabHost::new();
        let handler = handler_with(&host);
        let (responder, sent) = capture();

        handler.handle_message(demo_caller(), json!({"type": "reboot"}), responder);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "error");
        assert_eq!(handler.active_flow_count(), 0);
    }
}
