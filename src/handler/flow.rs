use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use url::Url;

use crate::handler::error::{HandlerError, HandlerResult};
use crate::handler::tabs::TabRef;
use crate::messaging::channel::Responder;
use crate::messaging::types::TerminalOutcome;
use crate::util::Subscription;

/// Stable identity of the caller a flow belongs to. One flow at a time may
/// exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey(String);

impl FlowKey {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-progress offload. Mutated only through [`ActiveFlows`] and
/// destroyed exactly once by the handler's finish routine.
pub(crate) struct FlowRecord {
    pub seq: u64,
    pub expected_redirect_prefix: String,
    pub responder: Responder,
    pub tab: Option<TabRef>,
    pub observers: Vec<Subscription>,
    pub created_at: DateTime<Utc>,
}

/// Owned flow-tracking state, one container per handler instance. Keeping it
/// instance-scoped rather than module-global gives every test a fresh map.
///
/// Records carry a sequence number minted at reservation; removal by
/// sequence is how stale observers and timers from an earlier flow are
/// prevented from touching a newer flow under the same key.
#[derive(Default)]
pub(crate) struct ActiveFlows {
    flows: Mutex<HashMap<FlowKey, FlowRecord>>,
    next_seq: AtomicU64,
}

impl ActiveFlows {
    /// Reserves `key` for a new flow before any tab work starts. Fails with
    /// the existing record's tab handle when the key is already active, so
    /// the caller can focus it.
    pub fn reserve(
        &self,
        key: &FlowKey,
        expected_redirect_prefix: String,
        responder: Responder,
    ) -> Result<u64, Option<TabRef>> {
        let mut flows = self.flows.lock().unwrap();
        if let Some(existing) = flows.get(key) {
            return Err(existing.tab);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        flows.insert(
            key.clone(),
            FlowRecord {
                seq,
                expected_redirect_prefix,
                responder,
                tab: None,
                observers: Vec::new(),
                created_at: Utc::now(),
            },
        );
        Ok(seq)
    }

    /// Binds the opened tab to the reserved record and hands back the
    /// record's expected redirect prefix for observer wiring. `None` means
    /// the flow ended while the tab was being created; the caller owns the
    /// orphan.
    pub fn attach_tab(&self, key: &FlowKey, seq: u64, tab: TabRef) -> Option<String> {
        let mut flows = self.flows.lock().unwrap();
        match flows.get_mut(key) {
            Some(record) if record.seq == seq => {
                record.tab = Some(tab);
                Some(record.expected_redirect_prefix.clone())
            }
            _ => None,
        }
    }

    /// Stores observer guards on the record. `false` means the flow already
    /// ended; the guards are returned to the caller's scope and detach on
    /// drop.
    pub fn add_observers(&self, key: &FlowKey, seq: u64, observers: Vec<Subscription>) -> bool {
        let mut flows = self.flows.lock().unwrap();
        match flows.get_mut(key) {
            Some(record) if record.seq == seq => {
                record.observers.extend(observers);
                true
            }
            _ => false,
        }
    }

    /// Removes and returns the record if `seq` still identifies it. This is
    /// the only path terminal transitions take; a stale trigger holding an
    /// old sequence gets `None` and must do nothing.
    pub fn take_if_current(&self, key: &FlowKey, seq: u64) -> Option<FlowRecord> {
        let mut flows = self.flows.lock().unwrap();
        match flows.get(key) {
            Some(record) if record.seq == seq => flows.remove(key),
            _ => None,
        }
    }

    /// Removes the record regardless of sequence (host-initiated cancel).
    pub fn take_any(&self, key: &FlowKey) -> Option<FlowRecord> {
        self.flows.lock().unwrap().remove(key)
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.flows.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flows.lock().unwrap().len()
    }
}

/// Extracts the `redirect_uri` query parameter that defines a flow's
/// completion prefix. A missing or empty value rejects the request; an
/// empty prefix would match every URL the tab ever visits.
pub(crate) fn expected_redirect_prefix(url: &str) -> HandlerResult<String> {
    let parsed = Url::parse(url)
        .map_err(|err| HandlerError::invalid_request(format!("invalid request URL: {err}")))?;
    parsed
        .query_pairs()
        .find(|(name, _)| name == "redirect_uri")
        .filter(|(_, value)| !value.is_empty())
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| HandlerError::invalid_request("URL must have a 'redirect_uri' parameter"))
}

/// Checks a navigated URL against the flow's expected prefix.
///
/// Completion is a prefix match, never an exact match, because providers
/// append their own query parameters to the redirect target. A matching URL
/// that itself carries an OAuth `error`/`error_code` parameter resolves the
/// flow as failed while still reporting the URL, so the embedding
/// application can show the provider's error page.
pub(crate) fn classify_redirect(url: &str, expected_prefix: &str) -> Option<TerminalOutcome> {
    if !url.starts_with(expected_prefix) {
        return None;
    }
    if let Some((name, value)) = oauth_error_param(url) {
        return Some(TerminalOutcome::Error {
            message: format!("authentication provider reported {name}={value}"),
            redirect_url: Some(url.to_string()),
        });
    }
    Some(TerminalOutcome::Success {
        redirect_url: url.to_string(),
    })
}

fn oauth_error_param(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(name, _)| name == "error" || name == "error_code")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
}
