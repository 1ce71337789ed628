use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kestrel_core::acquire::AcquiredIdentity;
use kestrel_core::models::{
    BrowserEngine, Category, Cookie, IdentitySet, NewCategory, ProxyPartition, ProxyRecord,
    ProxyType,
};

fn default_true() -> bool {
    true
}

fn default_tag() -> String {
    ProxyPartition::DEFAULT_TAG.to_string()
}

fn default_provider() -> String {
    ProxyPartition::DEFAULT_PROVIDER.to_string()
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct FetchCookieRequest {
    /// Partition to draw from; the server's default engine when omitted.
    #[schema(value_type = Option<String>, example = "chromium")]
    pub engine: Option<BrowserEngine>,
    /// `false` skips the pool and runs a fresh browser acquisition.
    #[serde(default = "default_true")]
    pub do_fetch_pool: bool,
    /// Postcode for a fresh acquisition.
    pub postcode: Option<String>,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct FillCookieRequest {
    #[schema(value_type = Option<String>, example = "chromium")]
    pub engine: Option<BrowserEngine>,
    pub postcode: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct IdentityResponse {
    /// Pool entry id; absent for identities that never entered the pool.
    pub id: Option<Uuid>,
    pub engine: String,
    pub postcode: String,
    pub location: String,
    #[schema(value_type = Vec<Object>)]
    pub cookies: Vec<Cookie>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usable_times: Option<u32>,
}

impl From<IdentitySet> for IdentityResponse {
    fn from(set: IdentitySet) -> Self {
        Self {
            id: Some(set.id),
            engine: set.engine.to_string(),
            postcode: set.postcode,
            location: set.location,
            cookies: set.cookies,
            expires_at: Some(set.expires_at),
            usable_times: Some(set.usable_times),
        }
    }
}

impl From<AcquiredIdentity> for IdentityResponse {
    fn from(identity: AcquiredIdentity) -> Self {
        Self {
            id: None,
            engine: identity.engine.to_string(),
            postcode: identity.postcode,
            location: identity.location,
            cookies: identity.cookies,
            expires_at: None,
            usable_times: None,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FetchCookieResponse {
    pub request_id: Uuid,
    /// `ok` or `pool empty`.
    pub message: &'static str,
    pub identity: Option<IdentityResponse>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FillCookieResponse {
    pub request_id: Uuid,
    pub identity: IdentityResponse,
    /// `false` when the partition was full or unknown.
    pub pool_add_ok: bool,
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ProxyReplaceRequest {
    pub proxies: Vec<String>,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    #[schema(value_type = String, example = "static")]
    pub proxy_type: ProxyType,
}

impl ProxyReplaceRequest {
    pub fn partition(&self) -> ProxyPartition {
        ProxyPartition::new(self.tag.clone(), self.provider.clone(), self.proxy_type)
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ProxyRotateRequest {
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    #[schema(value_type = String, example = "static")]
    pub proxy_type: ProxyType,
}

impl From<ProxyRotateRequest> for ProxyPartition {
    fn from(body: ProxyRotateRequest) -> Self {
        ProxyPartition::new(body.tag, body.provider, body.proxy_type)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProxyReplaceResponse {
    pub request_id: Uuid,
    /// `ok` or `failed`.
    pub message: &'static str,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProxyResponse {
    pub id: Uuid,
    pub tag: String,
    pub provider: String,
    pub proxy_type: String,
    pub content: String,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<ProxyRecord> for ProxyResponse {
    fn from(record: ProxyRecord) -> Self {
        Self {
            id: record.id,
            tag: record.tag,
            provider: record.provider,
            proxy_type: record.proxy_type.to_string(),
            content: record.content,
            last_used: record.last_used,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProxyRotateResponse {
    pub request_id: Uuid,
    /// `ok` or `pool empty`.
    pub message: &'static str,
    pub proxy: Option<ProxyResponse>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProxyFormatResponse {
    pub request_id: Uuid,
    pub proxies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct NewCategoryRequest {
    pub name: String,
    pub depth: i32,
    pub ancestor: Option<String>,
    pub parent: Option<String>,
    pub path: String,
    pub url: String,
    pub is_leaf: bool,
}

impl From<NewCategoryRequest> for NewCategory {
    fn from(body: NewCategoryRequest) -> Self {
        NewCategory {
            name: body.name,
            depth: body.depth,
            ancestor: body.ancestor,
            parent: body.parent,
            path: body.path,
            url: body.url,
            is_leaf: body.is_leaf,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CategoryReplaceResponse {
    pub request_id: Uuid,
    /// `ok` or `failed`.
    pub message: &'static str,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
    pub depth: i32,
    pub ancestor: Option<String>,
    pub parent: Option<String>,
    pub path: String,
    pub url: String,
    pub is_leaf: bool,
}

impl From<Category> for CategoryResponse {
    fn from(c: Category) -> Self {
        Self {
            id: c.id,
            name: c.name,
            depth: c.depth,
            ancestor: c.ancestor,
            parent: c.parent,
            path: c.path,
            url: c.url,
            is_leaf: c.is_leaf,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CategoryLookupResponse {
    pub request_id: Uuid,
    pub category: Option<CategoryResponse>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CategoryListResponse {
    pub request_id: Uuid,
    pub count: usize,
    pub categories: Vec<CategoryResponse>,
}

impl CategoryListResponse {
    pub fn new(request_id: Uuid, categories: Vec<Category>) -> Self {
        Self {
            request_id,
            count: categories.len(),
            categories: categories.into_iter().map(CategoryResponse::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct NameQuery {
    pub name: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct DepthQuery {
    /// Stored depth; rows marked `-1` match only `-1`.
    pub depth: i32,
    /// Match `depth` exactly instead of `depth` and shallower.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct AncestorQuery {
    pub ancestor: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ParentQuery {
    pub parent: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LeafQuery {
    pub is_leaf: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AncestorsAndDepthRequest {
    pub ancestors: Vec<String>,
    pub depth: i32,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PartitionSize {
    pub current: usize,
    pub max: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PoolSizeResponse {
    pub request_id: Uuid,
    /// Keyed by engine name.
    pub size: BTreeMap<String, PartitionSize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TaskQueueResponse {
    pub request_id: Uuid,
    /// Fill tasks waiting in the queue.
    pub size: usize,
    pub capacity: usize,
    /// Maintenance tasks currently running.
    pub active: usize,
}

// ---------------------------------------------------------------------------
// Health / Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub request_id: Uuid,
    pub status: &'static str,
    /// `ok`, `error`, or `disabled` when running without a database.
    pub database: &'static str,
    pub pools_initialized: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
