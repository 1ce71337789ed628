use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tower::ServiceExt;

use kestrel_client::HeadlessDriver;
use kestrel_core::acquire::DriverIdentityProvider;
use kestrel_core::config::{PoolBackendKind, PoolConfig};
use kestrel_core::driver::SiteProfile;
use kestrel_core::scheduler::SchedulerConfig;
use kestrel_db::Database;
use kestrel_server::routes;
use kestrel_server::state::AppState;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    _container: Option<ContainerAsync<GenericImage>>,
}

impl TestApp {
    /// Send one request through a clone of the router and decode the JSON reply.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_admin(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

fn build(
    database: Option<Database>,
    pools: &PoolConfig,
    admin_token: Option<&str>,
    container: Option<ContainerAsync<GenericImage>>,
) -> TestApp {
    let provider = DriverIdentityProvider::new(
        HeadlessDriver::Unavailable,
        Arc::new(SiteProfile::default()),
    );
    let state = Arc::new(
        AppState::new(
            database,
            pools,
            SchedulerConfig::default(),
            provider,
            admin_token.map(str::to_string),
        )
        .expect("Failed to build app state"),
    );
    TestApp {
        router: routes::router(state.clone()),
        state,
        _container: container,
    }
}

/// In-memory app with the admin token set.
pub fn setup_memory_app() -> TestApp {
    build(None, &PoolConfig::default(), Some(TEST_ADMIN_TOKEN), None)
}

/// In-memory app with admin endpoints disabled.
pub fn setup_memory_app_no_auth() -> TestApp {
    build(None, &PoolConfig::default(), None, None)
}

/// Spin up a PostgreSQL container and return an app with every pool in it.
pub async fn setup_pg_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "kestrel_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/kestrel_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let pools = PoolConfig {
        backend: PoolBackendKind::Postgres,
        ..PoolConfig::default()
    };
    build(Some(db), &pools, Some(TEST_ADMIN_TOKEN), Some(container))
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
