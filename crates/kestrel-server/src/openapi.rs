use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kestrel API",
        version = "0.3.0",
        description = "Identity, proxy and category pools for the crawl fleet."
    ),
    paths(
        crate::routes::fetch_cookie,
        crate::routes::fill_cookie,
        crate::routes::replace_proxies,
        crate::routes::rotate_proxy,
        crate::routes::format_proxies,
        crate::routes::replace_categories,
        crate::routes::get_category_by_name,
        crate::routes::get_categories_by_depth,
        crate::routes::get_categories_by_ancestor,
        crate::routes::get_categories_by_parent,
        crate::routes::get_categories_by_leaf,
        crate::routes::get_categories_by_ancestors_and_depth,
        crate::routes::cookie_pool_size,
        crate::routes::cookie_task_queue,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::FetchCookieRequest,
        crate::dto::FetchCookieResponse,
        crate::dto::FillCookieRequest,
        crate::dto::FillCookieResponse,
        crate::dto::IdentityResponse,
        crate::dto::ProxyReplaceRequest,
        crate::dto::ProxyReplaceResponse,
        crate::dto::ProxyRotateRequest,
        crate::dto::ProxyRotateResponse,
        crate::dto::ProxyResponse,
        crate::dto::ProxyFormatResponse,
        crate::dto::NewCategoryRequest,
        crate::dto::CategoryReplaceResponse,
        crate::dto::CategoryResponse,
        crate::dto::CategoryLookupResponse,
        crate::dto::CategoryListResponse,
        crate::dto::AncestorsAndDepthRequest,
        crate::dto::PartitionSize,
        crate::dto::PoolSizeResponse,
        crate::dto::TaskQueueResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "cookies", description = "Cookie identity pool"),
        (name = "proxies", description = "Proxy pool"),
        (name = "categories", description = "Category tree store"),
        (name = "system", description = "Health and pool status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI document.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Admin token. Set via KESTREL_ADMIN_TOKEN environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
