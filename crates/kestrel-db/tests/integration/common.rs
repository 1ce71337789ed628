use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// SQL migration statements, executed one at a time.
const MIGRATIONS: &[&str] = &[
    // 001_cookie_sets.sql
    r#"CREATE TABLE IF NOT EXISTS cookie_sets (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        browser_type VARCHAR(20) NOT NULL,
        postcode VARCHAR(20) NOT NULL,
        location VARCHAR NOT NULL,
        cookies JSONB NOT NULL,
        expires TIMESTAMPTZ NOT NULL,
        usable_times INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_used TIMESTAMPTZ,
        CONSTRAINT chk_cookie_sets_browser_type CHECK (browser_type IN ('firefox', 'chromium')),
        CONSTRAINT chk_cookie_sets_usable_times CHECK (usable_times >= 0)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cookie_sets_selection
        ON cookie_sets(browser_type, expires ASC, last_used DESC)"#,
    // 002_proxies.sql
    r#"CREATE TABLE IF NOT EXISTS proxies (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        tag VARCHAR(100) NOT NULL DEFAULT 'general',
        proxy_type VARCHAR(20) NOT NULL DEFAULT 'dynamic',
        provider VARCHAR(100) NOT NULL DEFAULT 'iproyal',
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_used TIMESTAMPTZ,
        CONSTRAINT chk_proxies_proxy_type CHECK (proxy_type IN ('static', 'dynamic')),
        CONSTRAINT chk_proxies_content CHECK (length(btrim(content)) > 0)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_proxies_partition
        ON proxies(tag, provider, proxy_type, last_used ASC NULLS FIRST)"#,
    // 003_categories.sql
    r#"CREATE TABLE IF NOT EXISTS categories (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name VARCHAR NOT NULL,
        depth INTEGER NOT NULL,
        ancestor VARCHAR,
        parent VARCHAR,
        path VARCHAR NOT NULL,
        url VARCHAR NOT NULL,
        is_leaf BOOLEAN NOT NULL DEFAULT FALSE,
        CONSTRAINT chk_categories_depth CHECK (depth >= -1),
        CONSTRAINT uq_categories_name_depth UNIQUE (name, depth)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_categories_ancestor ON categories(ancestor, depth)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it will stop the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
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

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/kestrel_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
