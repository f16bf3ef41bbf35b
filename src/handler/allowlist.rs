use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata recorded alongside one trusted caller origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedCaller {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Static allow-list of caller origins the handler will serve.
///
/// Consulted synchronously for every inbound request; origins absent from
/// the list get an error reply and never reach flow state or the tab host.
/// The JSON form maps origins to [`TrustedCaller`] entries:
///
/// ```json
/// {
///   "isolated-app://demo": { "name": "Demo app" },
///   "https://app.example": {}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustedCallers {
    entries: HashMap<String, TrustedCaller>,
}

impl TrustedCallers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the allow-list from its static JSON configuration form.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Adds `origin` with empty metadata.
    pub fn trust(self, origin: impl Into<String>) -> Self {
        self.trust_with(origin, TrustedCaller::default())
    }

    pub fn trust_with(mut self, origin: impl Into<String>, caller: TrustedCaller) -> Self {
        self.entries.insert(origin.into(), caller);
        self
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.entries.contains_key(origin)
    }

    pub fn get(&self, origin: &str) -> Option<&TrustedCaller> {
        self.entries.get(origin)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
