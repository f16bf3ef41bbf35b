use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::util::Subscription;

/// Host-assigned identifier of a browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u32);

/// Host-assigned identifier of a browser window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab {}", self.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window {}", self.0)
    }
}

/// Ownership handles for a tab opened on behalf of one flow. The handler
/// exclusively owns the tab's lifecycle until the flow reaches a terminal
/// outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabRef {
    pub tab_id: TabId,
    pub window_id: WindowId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabApiError {
    pub message: String,
}

impl TabApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TabApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab API error: {}", self.message)
    }
}

impl std::error::Error for TabApiError {}

pub type TabResult<T> = Result<T, TabApiError>;

/// Listener for URL changes of one specific tab. Receives the tab's new URL.
pub type TabUrlListener = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// Listener for tab removal anywhere in the host. Receives the removed id.
pub type TabRemovedListener = Arc<dyn Fn(TabId) + Send + Sync + 'static>;

/// Browser tab and window capability consumed by the handler.
///
/// Library consumers implement this against the host extension API
/// (`chrome.tabs` / `chrome.windows` or equivalents). Observer registrations
/// return a [`Subscription`] whose drop fully unregisters the listener.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait TabHost: Send + Sync {
    /// The most recently focused ordinary browser window, if one exists.
    /// App windows and devtools windows do not count.
    async fn last_focused_window(&self) -> TabResult<Option<WindowId>>;

    /// Opens `url` in a new foreground tab inside `window`.
    async fn open_tab(&self, window: WindowId, url: &str) -> TabResult<TabRef>;

    /// Opens `url` in a new standalone window.
    async fn open_window(&self, url: &str) -> TabResult<TabRef>;

    async fn focus_window(&self, window: WindowId) -> TabResult<()>;

    async fn close_tab(&self, tab: TabId) -> TabResult<()>;

    fn on_tab_url_changed(&self, tab: TabId, listener: TabUrlListener) -> Subscription;

    fn on_tab_removed(&self, listener: TabRemovedListener) -> Subscription;
}

/// Opens `url` per the tab acquisition policy: reuse the most recently
/// focused ordinary window by opening a tab inside it and focusing that
/// window; fall back to a standalone window when no such window exists or
/// the tab cannot be opened there.
pub async fn acquire_tab(host: &dyn TabHost, url: &str) -> TabResult<TabRef> {
    match host.last_focused_window().await {
        Ok(Some(window)) => match host.open_tab(window, url).await {
            Ok(tab) => {
                if let Err(err) = host.focus_window(window).await {
                    log::debug!("could not focus {window}: {err}");
                }
                return Ok(tab);
            }
            Err(err) => {
                log::debug!("opening a tab in {window} failed, using a new window: {err}");
            }
        },
        Ok(None) => {}
        Err(err) => {
            log::debug!("last-focused-window lookup failed, using a new window: {err}");
        }
    }
    host.open_window(url).await
}

/// One recorded [`InMemoryTabHost`] operation, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabHostCall {
    LastFocusedWindow,
    OpenTab { window: WindowId, url: String },
    OpenWindow { url: String },
    FocusWindow { window: WindowId },
    CloseTab { tab: TabId },
}

#[derive(Debug, Clone)]
struct TabEntry {
    window_id: WindowId,
    url: String,
}

#[derive(Default)]
struct HostState {
    windows: Vec<WindowId>,
    focused: Option<WindowId>,
    tabs: HashMap<TabId, TabEntry>,
    url_listeners: HashMap<TabId, Vec<(u64, TabUrlListener)>>,
    removed_listeners: Vec<(u64, TabRemovedListener)>,
    calls: Vec<TabHostCall>,
    open_tab_failure: Option<String>,
    open_window_failure: Option<String>,
}

/// Scripted tab host backed by plain maps.
///
/// Serves tests and embedders that want to exercise the handler without a
/// browser: windows and tabs are rows in a table, and the test drives
/// navigation and user closure through [`navigate_tab`](Self::navigate_tab)
/// and [`remove_tab`](Self::remove_tab). Every async operation is recorded
/// and can be failure-injected.
#[derive(Clone)]
pub struct InMemoryTabHost {
    state: Arc<Mutex<HostState>>,
    next_tab_id: Arc<AtomicU32>,
    next_window_id: Arc<AtomicU32>,
    next_listener_id: Arc<AtomicU64>,
}

impl InMemoryTabHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState::default())),
            next_tab_id: Arc::new(AtomicU32::new(1)),
            next_window_id: Arc::new(AtomicU32::new(1)),
            next_listener_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Adds an ordinary browser window and marks it most recently focused.
    pub fn add_window(&self) -> WindowId {
        let id = WindowId(self.next_window_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.windows.push(id);
        state.focused = Some(id);
        id
    }

    /// Makes every subsequent [`TabHost::open_tab`] fail with `message`.
    pub fn fail_open_tab(&self, message: impl Into<String>) {
        self.state.lock().unwrap().open_tab_failure = Some(message.into());
    }

    /// Makes every subsequent [`TabHost::open_window`] fail with `message`.
    pub fn fail_open_window(&self, message: impl Into<String>) {
        self.state.lock().unwrap().open_window_failure = Some(message.into());
    }

    /// Simulates the tab navigating to `url`, firing its URL observers.
    pub fn navigate_tab(&self, tab: TabId, url: impl Into<String>) {
        let url = url.into();
        let listeners = {
            let mut state = self.state.lock().unwrap();
            match state.tabs.get_mut(&tab) {
                Some(entry) => entry.url = url.clone(),
                None => return,
            }
            state
                .url_listeners
                .get(&tab)
                .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>())
                .unwrap_or_default()
        };

        for listener in listeners {
            listener(url.clone());
        }
    }

    /// Simulates the user closing the tab, firing removal observers.
    pub fn remove_tab(&self, tab: TabId) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            if state.tabs.remove(&tab).is_none() {
                return;
            }
            state
                .removed_listeners
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect::<Vec<_>>()
        };

        for listener in listeners {
            listener(tab);
        }
    }

    pub fn calls(&self) -> Vec<TabHostCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn open_tab_count(&self) -> usize {
        self.state.lock().unwrap().tabs.len()
    }

    pub fn tab_url(&self, tab: TabId) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.tabs.get(&tab).map(|entry| entry.url.clone())
    }

    pub fn tab_window(&self, tab: TabId) -> Option<WindowId> {
        let state = self.state.lock().unwrap();
        state.tabs.get(&tab).map(|entry| entry.window_id)
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.state.lock().unwrap().focused
    }

    pub fn url_listener_count(&self, tab: TabId) -> usize {
        let state = self.state.lock().unwrap();
        state.url_listeners.get(&tab).map_or(0, Vec::len)
    }

    pub fn removed_listener_count(&self) -> usize {
        self.state.lock().unwrap().removed_listeners.len()
    }

    fn insert_tab(&self, window_id: WindowId, url: &str, state: &mut HostState) -> TabRef {
        let tab_id = TabId(self.next_tab_id.fetch_add(1, Ordering::SeqCst));
        state.tabs.insert(
            tab_id,
            TabEntry {
                window_id,
                url: url.to_string(),
            },
        );
        TabRef { tab_id, window_id }
    }
}

impl Default for InMemoryTabHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl TabHost for InMemoryTabHost {
    async fn last_focused_window(&self) -> TabResult<Option<WindowId>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TabHostCall::LastFocusedWindow);
        Ok(state.focused)
    }

    async fn open_tab(&self, window: WindowId, url: &str) -> TabResult<TabRef> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TabHostCall::OpenTab {
            window,
            url: url.to_string(),
        });
        if let Some(message) = &state.open_tab_failure {
            return Err(TabApiError::new(message.clone()));
        }
        if !state.windows.contains(&window) {
            return Err(TabApiError::new(format!("no such {window}")));
        }
        Ok(self.insert_tab(window, url, &mut state))
    }

    async fn open_window(&self, url: &str) -> TabResult<TabRef> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TabHostCall::OpenWindow {
            url: url.to_string(),
        });
        if let Some(message) = &state.open_window_failure {
            return Err(TabApiError::new(message.clone()));
        }
        let window = WindowId(self.next_window_id.fetch_add(1, Ordering::SeqCst));
        state.windows.push(window);
        state.focused = Some(window);
        Ok(self.insert_tab(window, url, &mut state))
    }

    async fn focus_window(&self, window: WindowId) -> TabResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TabHostCall::FocusWindow { window });
        if !state.windows.contains(&window) {
            return Err(TabApiError::new(format!("no such {window}")));
        }
        state.focused = Some(window);
        Ok(())
    }

    async fn close_tab(&self, tab: TabId) -> TabResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TabHostCall::CloseTab { tab });
        if state.tabs.remove(&tab).is_none() {
            return Err(TabApiError::new(format!("no such {tab}")));
        }
        Ok(())
    }

    fn on_tab_url_changed(&self, tab: TabId, listener: TabUrlListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            state
                .url_listeners
                .entry(tab)
                .or_default()
                .push((id, listener));
        }

        let state = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = Weak::upgrade(&state) {
                let mut state = state.lock().unwrap();
                if let Some(entries) = state.url_listeners.get_mut(&tab) {
                    entries.retain(|(entry_id, _)| *entry_id != id);
                    if entries.is_empty() {
                        state.url_listeners.remove(&tab);
                    }
                }
            }
        })
    }

    fn on_tab_removed(&self, listener: TabRemovedListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            state.removed_listeners.push((id, listener));
        }

        let state = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = Weak::upgrade(&state) {
                let mut state = state.lock().unwrap();
                state
                    .removed_listeners
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }
}
