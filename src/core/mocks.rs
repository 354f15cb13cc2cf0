//! Mock Resolution Layer for web requests and LLM prompts.
//!
//! Outbound calls made from nondet blocks are resolved against registered mocks in
//! registration order; the first match wins. Web mocks also require the HTTP method
//! to match. Patterns are either exact (whole URL), substring, or regex search.
//!
//! Presence in the registry is the success signal: an empty body, `0`, `false` or
//! `{}` are valid responses. When nothing matches, a `MockNotFound` error lists every
//! registered pattern, unless live fallback is enabled and a live handler is set.
//!
//! Mocks may be scoped to the leader, to validators, or to a single node so a test
//! can show different external data to different parties.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::validators::NodeRole;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockKind {
    Web,
    Llm,
}

impl fmt::Display for MockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockKind::Web => f.write_str("web"),
            MockKind::Llm => f.write_str("LLM"),
        }
    }
}

/// Which parties a mock is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockScope {
    #[default]
    All,
    Leader,
    Validators,
    /// One node, whether it is leading or validating.
    Node(usize),
}

impl MockScope {
    pub fn applies_to(&self, role: NodeRole) -> bool {
        match self {
            MockScope::All => true,
            MockScope::Leader => role.is_leader(),
            MockScope::Validators => !role.is_leader(),
            MockScope::Node(i) => role.node() == *i,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Pattern {
    /// Whole-string equality.
    Exact(String),
    /// Substring containment.
    Contains(String),
    /// Regex search anywhere in the string.
    Regex(Regex),
}

impl Pattern {
    pub fn exact(s: impl Into<String>) -> Self {
        Pattern::Exact(s.into())
    }

    pub fn contains(s: impl Into<String>) -> Self {
        Pattern::Contains(s.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Exact(s) => text == s,
            Pattern::Contains(s) => text.contains(s.as_str()),
            Pattern::Regex(re) => re.is_match(text),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Pattern::Exact(s) => format!("exact:{}", s),
            Pattern::Contains(s) => format!("contains:{}", s),
            Pattern::Regex(re) => format!("regex:{}", re.as_str()),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.describe() == other.describe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

fn default_status() -> u16 {
    200
}

impl WebResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn json(value: &Value) -> Self {
        let mut response = Self::ok(value.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn body_json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl WebRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebMock {
    pub pattern: Pattern,
    pub method: String,
    pub response: WebResponse,
    pub scope: MockScope,
    used: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmMock {
    pub pattern: Pattern,
    pub response: Value,
    pub scope: MockScope,
    used: bool,
}

/// Ordered web and LLM mocks with per-entry "used" flags for strict-mode auditing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockRegistry {
    web: Vec<WebMock>,
    llm: Vec<LlmMock>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_web(&mut self, pattern: Pattern, method: &str, response: WebResponse, scope: MockScope) -> usize {
        self.web.push(WebMock {
            pattern,
            method: method.to_ascii_uppercase(),
            response,
            scope,
            used: false,
        });
        self.web.len() - 1
    }

    pub fn register_llm(&mut self, pattern: Pattern, response: Value, scope: MockScope) -> usize {
        self.llm.push(LlmMock {
            pattern,
            response,
            scope,
            used: false,
        });
        self.llm.len() - 1
    }

    pub fn resolve_web(&mut self, url: &str, method: &str, role: NodeRole) -> Option<WebResponse> {
        let method = method.to_ascii_uppercase();
        let entry = self
            .web
            .iter_mut()
            .find(|m| m.method == method && m.scope.applies_to(role) && m.pattern.matches(url))?;
        entry.used = true;
        Some(entry.response.clone())
    }

    pub fn resolve_llm(&mut self, prompt: &str, role: NodeRole) -> Option<Value> {
        let entry = self
            .llm
            .iter_mut()
            .find(|m| m.scope.applies_to(role) && m.pattern.matches(prompt))?;
        entry.used = true;
        Some(entry.response.clone())
    }

    pub fn registered_patterns(&self, kind: MockKind) -> Vec<String> {
        match kind {
            MockKind::Web => self
                .web
                .iter()
                .map(|m| format!("{} {}", m.method, m.pattern.describe()))
                .collect(),
            MockKind::Llm => self.llm.iter().map(|m| m.pattern.describe()).collect(),
        }
    }

    /// Patterns that were never matched, web first.
    pub fn unused(&self) -> Vec<String> {
        let web = self
            .web
            .iter()
            .filter(|m| !m.used)
            .map(|m| format!("web {} {}", m.method, m.pattern.describe()));
        let llm = self
            .llm
            .iter()
            .filter(|m| !m.used)
            .map(|m| format!("llm {}", m.pattern.describe()));
        web.chain(llm).collect()
    }

    /// Removes every mock and returns the ones that were never matched.
    pub fn clear(&mut self) -> Vec<String> {
        let unused = self.unused();
        self.web.clear();
        self.llm.clear();
        unused
    }

    pub fn len(&self) -> usize {
        self.web.len() + self.llm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.web.is_empty() && self.llm.is_empty()
    }
}

/// Real network fallback for web requests.
pub trait LiveWeb: Send + Sync {
    fn fetch(&self, request: &WebRequest, timeout: Duration) -> Result<WebResponse>;
}

/// Real provider fallback for LLM prompts.
pub trait LiveLlm: Send + Sync {
    fn prompt(&self, prompt: &str, timeout: Duration) -> Result<Value>;
}

/// Registry plus optional live handlers. Live calls block the thread; exceeding the
/// timeout turns the response into an error after the fact.
#[derive(Clone)]
pub struct MockLayer {
    registry: MockRegistry,
    live_web: Option<Arc<dyn LiveWeb>>,
    live_llm: Option<Arc<dyn LiveLlm>>,
    live_fallback: bool,
    timeout: Duration,
}

impl fmt::Debug for MockLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockLayer")
            .field("registry", &self.registry)
            .field("live_web", &self.live_web.is_some())
            .field("live_llm", &self.live_llm.is_some())
            .field("live_fallback", &self.live_fallback)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MockLayer {
    pub fn new(live_fallback: bool, timeout: Duration) -> Self {
        Self {
            registry: MockRegistry::new(),
            live_web: None,
            live_llm: None,
            live_fallback,
            timeout,
        }
    }

    pub fn registry(&self) -> &MockRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MockRegistry {
        &mut self.registry
    }

    pub(crate) fn replace_registry(&mut self, registry: MockRegistry) -> MockRegistry {
        std::mem::replace(&mut self.registry, registry)
    }

    pub fn set_live_web(&mut self, handler: Option<Arc<dyn LiveWeb>>) {
        self.live_web = handler;
    }

    pub fn set_live_llm(&mut self, handler: Option<Arc<dyn LiveLlm>>) {
        self.live_llm = handler;
    }

    pub fn set_live_fallback(&mut self, enabled: bool) {
        self.live_fallback = enabled;
    }

    pub fn live_fallback(&self) -> bool {
        self.live_fallback
    }

    pub fn fetch_web(&mut self, request: &WebRequest, role: NodeRole) -> Result<WebResponse> {
        if let Some(response) = self.registry.resolve_web(&request.url, &request.method, role) {
            debug!(url = %request.url, method = %request.method, ?role, "web mock hit");
            return Ok(response);
        }
        match (&self.live_web, self.live_fallback) {
            (Some(handler), true) => {
                let handler = Arc::clone(handler);
                self.with_timeout(&request.url, || handler.fetch(request, self.timeout))
            }
            _ => {
                let registered = self.registry.registered_patterns(MockKind::Web);
                warn!(url = %request.url, method = %request.method, "no web mock matched");
                Err(SimError::MockNotFound {
                    kind: MockKind::Web,
                    target: format!("{} {}", request.method, request.url),
                    registered,
                })
            }
        }
    }

    pub fn prompt_llm(&mut self, prompt: &str, role: NodeRole) -> Result<Value> {
        if let Some(response) = self.registry.resolve_llm(prompt, role) {
            debug!(?role, "llm mock hit");
            return Ok(response);
        }
        match (&self.live_llm, self.live_fallback) {
            (Some(handler), true) => {
                let handler = Arc::clone(handler);
                self.with_timeout("llm prompt", || handler.prompt(prompt, self.timeout))
            }
            _ => {
                let registered = self.registry.registered_patterns(MockKind::Llm);
                let preview: String = prompt.chars().take(100).collect();
                warn!(prompt = %preview, "no LLM mock matched");
                Err(SimError::MockNotFound {
                    kind: MockKind::Llm,
                    target: format!("prompt: {}", preview),
                    registered,
                })
            }
        }
    }

    fn with_timeout<T>(&self, what: &str, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let out = call()?;
        if started.elapsed() > self.timeout {
            return Err(SimError::Live(format!(
                "{} exceeded timeout of {} ms",
                what,
                self.timeout.as_millis()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LEADER: NodeRole = NodeRole::Leader(0);

    #[test]
    fn test_first_match_wins_in_registration_order() {
        let mut reg = MockRegistry::new();
        reg.register_web(Pattern::regex("example\\.com").unwrap(), "GET", WebResponse::ok("regex"), MockScope::All);
        reg.register_web(Pattern::exact("https://example.com/a"), "GET", WebResponse::ok("exact"), MockScope::All);
        let hit = reg.resolve_web("https://example.com/a", "GET", LEADER).unwrap();
        assert_eq!(hit.body, "regex");
    }

    #[test]
    fn test_exact_registered_first_wins_over_regex() {
        let mut reg = MockRegistry::new();
        reg.register_web(Pattern::exact("https://example.com/a"), "GET", WebResponse::ok("exact"), MockScope::All);
        reg.register_web(Pattern::regex("example\\.com").unwrap(), "GET", WebResponse::ok("regex"), MockScope::All);
        assert_eq!(reg.resolve_web("https://example.com/a", "GET", LEADER).unwrap().body, "exact");
        assert_eq!(reg.resolve_web("https://example.com/b", "GET", LEADER).unwrap().body, "regex");
    }

    #[test]
    fn test_method_must_match() {
        let mut reg = MockRegistry::new();
        reg.register_web(Pattern::contains("api"), "post", WebResponse::ok("{}"), MockScope::All);
        assert!(reg.resolve_web("https://api.test", "GET", LEADER).is_none());
        assert!(reg.resolve_web("https://api.test", "POST", LEADER).is_some());
    }

    #[test]
    fn test_falsy_llm_response_is_a_hit() {
        let mut reg = MockRegistry::new();
        reg.register_llm(Pattern::contains("empty"), json!(""), MockScope::All);
        reg.register_llm(Pattern::contains("zero"), json!(0), MockScope::All);
        reg.register_llm(Pattern::contains("obj"), json!({}), MockScope::All);
        assert_eq!(reg.resolve_llm("give me empty", LEADER), Some(json!("")));
        assert_eq!(reg.resolve_llm("zero please", LEADER), Some(json!(0)));
        assert_eq!(reg.resolve_llm("an obj", LEADER), Some(json!({})));
        assert_eq!(reg.resolve_llm("nothing", LEADER), None);
    }

    #[test]
    fn test_scopes_filter_by_role() {
        let mut reg = MockRegistry::new();
        reg.register_llm(Pattern::contains("q"), json!("leader"), MockScope::Leader);
        reg.register_llm(Pattern::contains("q"), json!("node2"), MockScope::Node(2));
        reg.register_llm(Pattern::contains("q"), json!("validators"), MockScope::Validators);
        assert_eq!(reg.resolve_llm("q", NodeRole::Leader(0)), Some(json!("leader")));
        assert_eq!(reg.resolve_llm("q", NodeRole::Validator(2)), Some(json!("node2")));
        assert_eq!(reg.resolve_llm("q", NodeRole::Validator(1)), Some(json!("validators")));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut reg = MockRegistry::new();
        reg.register_web(Pattern::contains("price"), "GET", WebResponse::json(&json!({"price": 100})), MockScope::All);
        let a = reg.resolve_web("https://feed/price", "GET", LEADER);
        let b = reg.resolve_web("https://feed/price", "GET", LEADER);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unused_tracking_and_clear() {
        let mut reg = MockRegistry::new();
        reg.register_web(Pattern::contains("a"), "GET", WebResponse::ok(""), MockScope::All);
        reg.register_llm(Pattern::contains("b"), json!(true), MockScope::All);
        assert_eq!(reg.unused().len(), 2);
        reg.resolve_llm("b", LEADER);
        assert_eq!(reg.unused(), vec!["web GET contains:a".to_string()]);
        let unused = reg.clear();
        assert_eq!(unused.len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_not_found_lists_registered_patterns() {
        let mut layer = MockLayer::new(false, Duration::from_secs(1));
        layer
            .registry_mut()
            .register_web(Pattern::regex("known\\.com").unwrap(), "GET", WebResponse::ok(""), MockScope::All);
        let err = layer.fetch_web(&WebRequest::get("https://unknown.com"), LEADER).unwrap_err();
        match err {
            SimError::MockNotFound { kind, registered, .. } => {
                assert_eq!(kind, MockKind::Web);
                assert_eq!(registered, vec!["GET regex:known\\.com".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct EchoWeb;

    impl LiveWeb for EchoWeb {
        fn fetch(&self, request: &WebRequest, _timeout: Duration) -> Result<WebResponse> {
            Ok(WebResponse::ok(format!("live:{}", request.url)))
        }
    }

    #[test]
    fn test_live_fallback_only_when_enabled() {
        let mut layer = MockLayer::new(false, Duration::from_secs(5));
        layer.set_live_web(Some(Arc::new(EchoWeb)));
        assert!(layer.fetch_web(&WebRequest::get("https://x"), LEADER).is_err());

        layer.set_live_fallback(true);
        let response = layer.fetch_web(&WebRequest::get("https://x"), LEADER).unwrap();
        assert_eq!(response.body, "live:https://x");
    }
}
