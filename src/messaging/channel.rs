use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::messaging::error::{ChannelError, ChannelResult};
use crate::messaging::types::HandlerMessage;
use crate::util::Subscription;

/// Identity of the endpoint that issued an inbound request.
///
/// The transport is responsible for stamping this; receivers use it for the
/// allow-list check, so a transport that cannot attest the origin must not be
/// used with the handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub origin: String,
}

impl CallerIdentity {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin)
    }
}

type ReplyFn = Box<dyn FnOnce(Value) + Send + 'static>;

/// One-shot reply slot handed to the receiver with every inbound request.
///
/// Clones share the same slot: whichever clone replies first wins, every
/// later send is ignored and reports `false`. This is what makes "exactly one
/// terminal reply per flow" cheap to uphold even when several observers race.
#[derive(Clone)]
pub struct Responder {
    reply: Arc<Mutex<Option<ReplyFn>>>,
}

impl Responder {
    pub fn new<F>(reply: F) -> Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        Self {
            reply: Arc::new(Mutex::new(Some(Box::new(reply)))),
        }
    }

    /// A responder with no reply channel, used for notification-style
    /// deliveries where the sender is not awaiting an answer.
    pub fn noop() -> Self {
        Self {
            reply: Arc::new(Mutex::new(None)),
        }
    }

    /// Sends `message` if this slot has not been used yet.
    pub fn send(&self, message: HandlerMessage) -> bool {
        match serde_json::to_value(&message) {
            Ok(value) => self.send_value(value),
            Err(err) => {
                log::warn!("failed to serialize {} reply: {err}", message.kind());
                false
            }
        }
    }

    /// Raw variant of [`send`](Responder::send) for transports and tests that
    /// deal in untyped JSON.
    pub fn send_value(&self, value: Value) -> bool {
        let reply = self.reply.lock().unwrap().take();
        match reply {
            Some(reply) => {
                reply(value);
                true
            }
            None => false,
        }
    }

    /// Whether a reply can still be sent through this slot.
    pub fn is_open(&self) -> bool {
        self.reply.lock().unwrap().is_some()
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Listener invoked for every request delivered to a receiver.
pub type RequestListener = Arc<dyn Fn(CallerIdentity, Value, Responder) + Send + Sync + 'static>;

/// Connector-side half of the messaging capability: fire requests at a remote
/// endpoint addressed by a stable identifier.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait MessageSender: Send + Sync {
    /// Sends `payload` to `target` and awaits exactly one reply.
    async fn request(&self, target: &str, payload: Value) -> ChannelResult<Value>;

    /// Sends `payload` to `target` without expecting a reply. Used for
    /// duplicate-navigation nudges and the `stop` notification.
    async fn notify(&self, target: &str, payload: Value) -> ChannelResult<()>;
}

/// Handler-side half of the messaging capability: deliver inbound requests,
/// each paired with the caller's identity and a one-shot responder.
pub trait MessageReceiver: Send + Sync {
    fn on_request(&self, listener: RequestListener) -> Subscription;
}

#[derive(Default)]
struct BusState {
    listeners: HashMap<String, Vec<(u64, RequestListener)>>,
}

struct BusInner {
    state: Mutex<BusState>,
    next_listener_id: AtomicU64,
    requests: AtomicUsize,
    notifies: AtomicUsize,
}

/// In-process message bus implementing both channel halves.
///
/// Mirrors the request/response flavor of the host messaging primitive:
/// `endpoint(origin)` produces a sender whose requests arrive stamped with
/// that origin, and `receiver(target)` produces the attachment point a
/// handler listens on. Requests to a target nobody listens on fail with
/// [`ChannelError::NoReceiver`]; a request whose responder is dropped
/// unreplied fails with [`ChannelError::Disconnected`].
#[derive(Clone)]
pub struct InMemoryChannel {
    inner: Arc<BusInner>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                next_listener_id: AtomicU64::new(1),
                requests: AtomicUsize::new(0),
                notifies: AtomicUsize::new(0),
            }),
        }
    }

    /// A sender whose requests carry `origin` as the caller identity.
    pub fn endpoint(&self, origin: impl Into<String>) -> InMemoryEndpoint {
        InMemoryEndpoint {
            bus: Arc::clone(&self.inner),
            origin: origin.into(),
        }
    }

    /// The attachment point for listeners serving `target`.
    pub fn receiver(&self, target: impl Into<String>) -> InMemoryReceiver {
        InMemoryReceiver {
            bus: Arc::clone(&self.inner),
            target: target.into(),
        }
    }

    /// Number of `request` deliveries so far (replied or not).
    pub fn request_count(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    /// Number of `notify` deliveries so far.
    pub fn notify_count(&self) -> usize {
        self.inner.notifies.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self, target: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.listeners.get(target).map_or(0, Vec::len)
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BusInner {
    fn listeners_for(&self, target: &str) -> Vec<RequestListener> {
        let state = self.state.lock().unwrap();
        state
            .listeners
            .get(target)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    fn deliver(
        &self,
        target: &str,
        origin: &str,
        payload: &Value,
        responder: &Responder,
    ) -> ChannelResult<()> {
        // Listeners are cloned out before invocation so a listener that
        // re-enters the bus (detaching itself, attaching another) cannot
        // deadlock on the state mutex.
        let listeners = self.listeners_for(target);
        if listeners.is_empty() {
            return Err(ChannelError::NoReceiver {
                target: target.to_string(),
            });
        }
        for listener in listeners {
            listener(
                CallerIdentity::new(origin),
                payload.clone(),
                responder.clone(),
            );
        }
        Ok(())
    }
}

/// Sender half produced by [`InMemoryChannel::endpoint`].
#[derive(Clone)]
pub struct InMemoryEndpoint {
    bus: Arc<BusInner>,
    origin: String,
}

impl InMemoryEndpoint {
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl MessageSender for InMemoryEndpoint {
    async fn request(&self, target: &str, payload: Value) -> ChannelResult<Value> {
        self.bus.requests.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = async_channel::bounded(1);
        let responder = Responder::new(move |value| {
            let _ = tx.try_send(value);
        });
        self.bus.deliver(target, &self.origin, &payload, &responder)?;
        drop(responder);

        rx.recv().await.map_err(|_| {
            ChannelError::disconnected("receiver dropped the request without replying")
        })
    }

    async fn notify(&self, target: &str, payload: Value) -> ChannelResult<()> {
        self.bus.notifies.fetch_add(1, Ordering::SeqCst);
        self.bus
            .deliver(target, &self.origin, &payload, &Responder::noop())
    }
}

/// Receiver half produced by [`InMemoryChannel::receiver`].
pub struct InMemoryReceiver {
    bus: Arc<BusInner>,
    target: String,
}

impl MessageReceiver for InMemoryReceiver {
    fn on_request(&self, listener: RequestListener) -> Subscription {
        let id = self.bus.next_listener_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.bus.state.lock().unwrap();
            state
                .listeners
                .entry(self.target.clone())
                .or_default()
                .push((id, listener));
        }

        let bus = Arc::downgrade(&self.bus);
        let target = self.target.clone();
        Subscription::new(move || {
            if let Some(bus) = Weak::upgrade(&bus) {
                let mut state = bus.state.lock().unwrap();
                if let Some(entries) = state.listeners.get_mut(&target) {
                    entries.retain(|(entry_id, _)| *entry_id != id);
                    if entries.is_empty() {
                        state.listeners.remove(&target);
                    }
                }
            }
        })
    }
}
