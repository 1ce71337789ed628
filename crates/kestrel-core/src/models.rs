use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Browser engine a cookie set was minted with. Pools are partitioned by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    Firefox,
    Chromium,
}

impl BrowserEngine {
    pub const ALL: [BrowserEngine; 2] = [BrowserEngine::Firefox, BrowserEngine::Chromium];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserEngine::Firefox => "firefox",
            BrowserEngine::Chromium => "chromium",
        }
    }
}

impl fmt::Display for BrowserEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BrowserEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "firefox" => Ok(BrowserEngine::Firefox),
            "chromium" | "chrome" => Ok(BrowserEngine::Chromium),
            _ => Err(format!("Unknown browser engine: {s}")),
        }
    }
}

/// A single browser cookie, serialized with the browser's own field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Unix seconds; `-1` for session cookies.
    #[serde(default = "default_cookie_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_cookie_expiry() -> f64 {
    -1.0
}

/// Render cookies as a `Cookie:` request header value.
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Bounds applied to every newly acquired identity.
#[derive(Debug, Clone, Copy)]
pub struct IdentityPolicy {
    pub ttl: TimeDelta,
    pub usable_times: u32,
}

impl IdentityPolicy {
    /// Sentinel for "effectively unlimited" checkouts.
    pub const NON_EXPIRING_USES: u32 = 10_000;
}

impl Default for IdentityPolicy {
    /// Three days, five checkouts.
    fn default() -> Self {
        Self {
            ttl: TimeDelta::days(3),
            usable_times: 5,
        }
    }
}

/// A browser session identity: the cookies a real browser received after
/// setting a delivery location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySet {
    pub id: Uuid,
    pub engine: BrowserEngine,
    pub postcode: String,
    pub location: String,
    pub cookies: Vec<Cookie>,
    pub expires_at: DateTime<Utc>,
    pub usable_times: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl IdentitySet {
    pub fn new(
        engine: BrowserEngine,
        postcode: impl Into<String>,
        location: impl Into<String>,
        cookies: Vec<Cookie>,
        policy: IdentityPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            postcode: postcode.into(),
            location: location.into(),
            cookies,
            expires_at: Utc::now() + policy.ttl,
            usable_times: policy.usable_times,
            last_used: None,
        }
    }

    /// Whether the set may still be handed out.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.usable_times > 0 && self.expires_at > now
    }
}

/// Rotation behaviour of a proxy line, as sold by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Static,
    #[default]
    Dynamic,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Static => "static",
            ProxyType::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(ProxyType::Static),
            "dynamic" => Ok(ProxyType::Dynamic),
            _ => Err(format!("Unknown proxy type: {s}")),
        }
    }
}

/// Partition key of the proxy pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyPartition {
    pub tag: String,
    pub provider: String,
    pub proxy_type: ProxyType,
}

impl ProxyPartition {
    pub const DEFAULT_TAG: &'static str = "general";
    pub const DEFAULT_PROVIDER: &'static str = "iproyal";

    pub fn new(tag: impl Into<String>, provider: impl Into<String>, proxy_type: ProxyType) -> Self {
        Self {
            tag: tag.into(),
            provider: provider.into(),
            proxy_type,
        }
    }
}

impl Default for ProxyPartition {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TAG, Self::DEFAULT_PROVIDER, ProxyType::default())
    }
}

impl fmt::Display for ProxyPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tag, self.provider, self.proxy_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: Uuid,
    pub tag: String,
    pub provider: String,
    pub proxy_type: ProxyType,
    pub content: String,
    pub last_used: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    /// Parse the provider line into a proxy URL plus routing headers.
    pub fn endpoint(&self) -> Result<ProxyEndpoint, AppError> {
        ProxyEndpoint::parse(&self.content)
    }
}

/// A proxy line resolved into something an HTTP client can use.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEndpoint {
    /// `http://[user:pass@]host:port`
    pub url: String,
    /// Provider routing options (`X-Country`, `X-Session`, ...).
    pub headers: Vec<(String, String)>,
}

impl ProxyEndpoint {
    /// Parse `host:port[:user:pass][:key-value...]`.
    ///
    /// Trailing `key-value` segments (`country-us`, `session-ab12`,
    /// `lifetime-30m`, `state-ny`, `streaming-1`) become `X-Key` headers.
    pub fn parse(content: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = content.trim().split(':').collect();
        if parts.len() < 2 || parts.len() == 3 || parts[0].is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Malformed proxy line: '{content}'"
            )));
        }

        let host = parts[0];
        let port: u16 = parts[1].parse().map_err(|_| {
            AppError::InvalidInput(format!("Malformed proxy port in '{content}'"))
        })?;

        let url = if parts.len() >= 4 {
            format!("http://{}:{}@{host}:{port}", parts[2], parts[3])
        } else {
            format!("http://{host}:{port}")
        };

        let mut headers = Vec::new();
        for option in parts.iter().skip(4) {
            let (key, value) = option.split_once('-').ok_or_else(|| {
                AppError::InvalidInput(format!("Malformed proxy option '{option}'"))
            })?;
            let mut chars = key.chars();
            let name = match chars.next() {
                Some(first) => format!("X-{}{}", first.to_ascii_uppercase(), chars.as_str()),
                None => continue,
            };
            headers.push((name, value.to_string()));
        }

        Ok(Self { url, headers })
    }
}

/// A category to be written into the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub depth: i32,
    pub ancestor: Option<String>,
    pub parent: Option<String>,
    pub path: String,
    pub url: String,
    pub is_leaf: bool,
}

/// A stored category node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    /// `-1` marks synthetic/unplaced nodes; real nodes start at 0.
    pub depth: i32,
    pub ancestor: Option<String>,
    pub parent: Option<String>,
    pub path: String,
    pub url: String,
    pub is_leaf: bool,
}

impl Category {
    pub fn from_new(id: Uuid, new: NewCategory) -> Self {
        Self {
            id,
            name: new.name,
            depth: new.depth,
            ancestor: new.ancestor,
            parent: new.parent,
            path: new.path,
            url: new.url,
            is_leaf: new.is_leaf,
        }
    }
}
