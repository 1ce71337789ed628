use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router, middleware};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use kestrel_core::acquire::IdentityProvider;
use kestrel_core::models::{NewCategory, ProxyPartition};
use kestrel_core::proxy::split_lines;

use crate::auth::require_admin_token;
use crate::context::{RequestId, request_context};
use crate::dto::{
    AncestorQuery, AncestorsAndDepthRequest, CategoryListResponse, CategoryLookupResponse,
    CategoryReplaceResponse, DepthQuery, FetchCookieRequest, FetchCookieResponse,
    FillCookieRequest, FillCookieResponse, HealthResponse, LeafQuery, NameQuery,
    NewCategoryRequest, ParentQuery, PartitionSize, PoolSizeResponse, ProxyFormatResponse,
    ProxyReplaceRequest, ProxyReplaceResponse, ProxyRotateRequest, ProxyRotateResponse,
    TaskQueueResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Largest accepted request body (proxy lists and category trees).
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/proxy/replace", post(replace_proxies))
        .route("/category/replace", post(replace_categories))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let api = Router::new()
        .route("/cookie/fetch", post(fetch_cookie))
        .route("/cookie/fill", post(fill_cookie))
        .route("/proxy/rotate", post(rotate_proxy))
        .route("/proxy/format", post(format_proxies))
        .route("/category/get_by_name", get(get_category_by_name))
        .route("/category/get_by_depth", get(get_categories_by_depth))
        .route("/category/get_by_ancestor", get(get_categories_by_ancestor))
        .route("/category/get_by_parent", get(get_categories_by_parent))
        .route("/category/get_by_leaf", get(get_categories_by_leaf))
        .route(
            "/category/get_by_ancestors_and_depth",
            post(get_categories_by_ancestors_and_depth),
        )
        .route("/meta/cookie/pool", get(cookie_pool_size))
        .route("/meta/cookie/task", get(cookie_task_queue));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public
        .merge(api)
        .merge(admin)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(request_context))
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/cookie/fetch",
    request_body = FetchCookieRequest,
    responses(
        (status = 200, description = "Identity from the pool, or a fresh one", body = FetchCookieResponse),
        (status = 502, description = "Browser acquisition failed", body = crate::dto::ErrorResponse),
        (status = 504, description = "Browser step timed out", body = crate::dto::ErrorResponse),
    ),
    tag = "cookies"
)]
pub async fn fetch_cookie(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    axum::Json(body): axum::Json<FetchCookieRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = body.engine.unwrap_or(state.default_engine);

    if !body.do_fetch_pool {
        tracing::info!(%engine, "Execute new browser acquisition");
        let identity = state
            .provider
            .acquire(engine, body.postcode.as_deref())
            .await?;
        return Ok(axum::Json(FetchCookieResponse {
            request_id,
            message: "ok",
            identity: Some(identity.into()),
        }));
    }

    let section = state.identities.lock().enter().await;
    let before = state.identities.pool_size(engine).await;
    let identity = state.identities.get(engine, Some(&section)).await;
    let after = state.identities.pool_size(engine).await;
    drop(section);
    tracing::info!(%engine, before, after, "Pool size before/after fetching");

    let response = FetchCookieResponse {
        request_id,
        message: if identity.is_some() { "ok" } else { "pool empty" },
        identity: identity.map(Into::into),
    };
    Ok(axum::Json(response))
}

#[utoipa::path(
    post,
    path = "/cookie/fill",
    request_body = FillCookieRequest,
    responses(
        (status = 200, description = "Fresh identity and whether the pool took it", body = FillCookieResponse),
        (status = 502, description = "Browser acquisition failed", body = crate::dto::ErrorResponse),
        (status = 504, description = "Browser step timed out", body = crate::dto::ErrorResponse),
    ),
    tag = "cookies"
)]
pub async fn fill_cookie(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    axum::Json(body): axum::Json<FillCookieRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = body.engine.unwrap_or(state.default_engine);
    let identity = state
        .provider
        .acquire(engine, body.postcode.as_deref())
        .await?;

    let section = state.identities.lock().enter().await;
    let before = state.identities.pool_size(engine).await;
    let pool_add_ok = state
        .identities
        .add(
            engine,
            &identity.postcode,
            &identity.location,
            identity.cookies.clone(),
            Some(&section),
        )
        .await;
    let after = state.identities.pool_size(engine).await;
    drop(section);
    tracing::info!(%engine, before, after, "Pool size before/after adding");

    Ok(axum::Json(FillCookieResponse {
        request_id,
        identity: identity.into(),
        pool_add_ok,
    }))
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/proxy/replace",
    request_body = ProxyReplaceRequest,
    responses(
        (status = 200, description = "Partition replaced, or left untouched on failure", body = ProxyReplaceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin endpoints disabled"),
    ),
    security(("bearer" = [])),
    tag = "proxies"
)]
pub async fn replace_proxies(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    axum::Json(body): axum::Json<ProxyReplaceRequest>,
) -> impl IntoResponse {
    let partition = body.partition();
    let ok = state.proxies.replace(&partition, &body.proxies).await;

    axum::Json(ProxyReplaceResponse {
        request_id,
        message: if ok { "ok" } else { "failed" },
        total: body.proxies.len(),
    })
}

#[utoipa::path(
    post,
    path = "/proxy/rotate",
    request_body = ProxyRotateRequest,
    responses(
        (status = 200, description = "Least recently used proxy of the partition", body = ProxyRotateResponse),
    ),
    tag = "proxies"
)]
pub async fn rotate_proxy(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    axum::Json(body): axum::Json<ProxyRotateRequest>,
) -> impl IntoResponse {
    let partition = ProxyPartition::from(body);
    let proxy = state.proxies.rotate(&partition).await;

    axum::Json(ProxyRotateResponse {
        request_id,
        message: if proxy.is_some() { "ok" } else { "pool empty" },
        proxy: proxy.map(Into::into),
    })
}

#[utoipa::path(
    post,
    path = "/proxy/format",
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 200, description = "One trimmed proxy line per entry", body = ProxyFormatResponse),
    ),
    tag = "proxies"
)]
pub async fn format_proxies(
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: String,
) -> impl IntoResponse {
    axum::Json(ProxyFormatResponse {
        request_id,
        proxies: split_lines(&body),
    })
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/category/replace",
    request_body = Vec<NewCategoryRequest>,
    responses(
        (status = 200, description = "Category store replaced, or left untouched on failure", body = CategoryReplaceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin endpoints disabled"),
    ),
    security(("bearer" = [])),
    tag = "categories"
)]
pub async fn replace_categories(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    axum::Json(body): axum::Json<Vec<NewCategoryRequest>>,
) -> impl IntoResponse {
    let total = body.len();
    let categories: Vec<NewCategory> = body.into_iter().map(NewCategory::from).collect();
    let ok = state.categories.replace(&categories).await;

    axum::Json(CategoryReplaceResponse {
        request_id,
        message: if ok { "ok" } else { "failed" },
        total,
    })
}

#[utoipa::path(
    get,
    path = "/category/get_by_name",
    params(NameQuery),
    responses(
        (status = 200, description = "The category, or null when unknown", body = CategoryLookupResponse),
    ),
    tag = "categories"
)]
pub async fn get_category_by_name(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<NameQuery>,
) -> impl IntoResponse {
    let category = state.categories.get_by_name(&query.name).await;
    axum::Json(CategoryLookupResponse {
        request_id,
        category: category.map(Into::into),
    })
}

#[utoipa::path(
    get,
    path = "/category/get_by_depth",
    params(DepthQuery),
    responses(
        (status = 200, description = "Categories at (or above) the depth", body = CategoryListResponse),
    ),
    tag = "categories"
)]
pub async fn get_categories_by_depth(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<DepthQuery>,
) -> impl IntoResponse {
    let (categories, _) = state
        .categories
        .get_by_depth(query.depth, query.strict)
        .await;
    axum::Json(CategoryListResponse::new(request_id, categories))
}

#[utoipa::path(
    get,
    path = "/category/get_by_ancestor",
    params(AncestorQuery),
    responses(
        (status = 200, description = "Categories under the top-level ancestor", body = CategoryListResponse),
    ),
    tag = "categories"
)]
pub async fn get_categories_by_ancestor(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<AncestorQuery>,
) -> impl IntoResponse {
    let categories = state.categories.get_by_ancestor(&query.ancestor).await;
    axum::Json(CategoryListResponse::new(request_id, categories))
}

#[utoipa::path(
    get,
    path = "/category/get_by_parent",
    params(ParentQuery),
    responses(
        (status = 200, description = "Direct children of the parent", body = CategoryListResponse),
    ),
    tag = "categories"
)]
pub async fn get_categories_by_parent(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<ParentQuery>,
) -> impl IntoResponse {
    let categories = state.categories.get_by_parent(&query.parent).await;
    axum::Json(CategoryListResponse::new(request_id, categories))
}

#[utoipa::path(
    get,
    path = "/category/get_by_leaf",
    params(LeafQuery),
    responses(
        (status = 200, description = "Leaf or inner categories", body = CategoryListResponse),
    ),
    tag = "categories"
)]
pub async fn get_categories_by_leaf(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<LeafQuery>,
) -> impl IntoResponse {
    let categories = state.categories.get_by_leaf(query.is_leaf).await;
    axum::Json(CategoryListResponse::new(request_id, categories))
}

#[utoipa::path(
    post,
    path = "/category/get_by_ancestors_and_depth",
    request_body = AncestorsAndDepthRequest,
    responses(
        (status = 200, description = "Categories under any of the ancestors at the depth", body = CategoryListResponse),
    ),
    tag = "categories"
)]
pub async fn get_categories_by_ancestors_and_depth(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    axum::Json(body): axum::Json<AncestorsAndDepthRequest>,
) -> impl IntoResponse {
    let categories = state
        .categories
        .get_by_ancestors_and_depth(&body.ancestors, body.depth)
        .await;
    axum::Json(CategoryListResponse::new(request_id, categories))
}

// ---------------------------------------------------------------------------
// Metadata / Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/meta/cookie/pool",
    responses(
        (status = 200, description = "Current and maximum size per partition", body = PoolSizeResponse),
    ),
    tag = "system"
)]
pub async fn cookie_pool_size(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> impl IntoResponse {
    let mut size = BTreeMap::new();
    for engine in state.identities.partitions() {
        size.insert(
            engine.to_string(),
            PartitionSize {
                current: state.identities.pool_size(engine).await,
                max: state.identities.max_pool_size(engine),
            },
        );
    }
    axum::Json(PoolSizeResponse { request_id, size })
}

#[utoipa::path(
    get,
    path = "/meta/cookie/task",
    responses(
        (status = 200, description = "Maintenance queue depth", body = TaskQueueResponse),
    ),
    tag = "system"
)]
pub async fn cookie_task_queue(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> impl IntoResponse {
    let scheduler = &state.scheduler;
    axum::Json(TaskQueueResponse {
        request_id,
        size: scheduler.queue().len(),
        capacity: scheduler.queue().capacity(),
        active: scheduler.supervisor().active(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> impl IntoResponse {
    let db_status = match &state.database {
        None => "disabled",
        Some(db) => match db.health_check().await {
            Ok(()) => "ok",
            Err(_) => "error",
        },
    };

    let pools_initialized = state.identities.is_initialized();
    let healthy = pools_initialized && db_status != "error";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        request_id,
        status: if healthy { "healthy" } else { "unhealthy" },
        database: db_status,
        pools_initialized,
    };

    (status, axum::Json(response))
}
