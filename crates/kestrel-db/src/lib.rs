pub mod backend;
pub mod category_store;
pub mod config;
pub mod database;
pub mod identity_store;
pub mod proxy_store;

pub use backend::{CategoryBackend, IdentityBackend, ProxyBackend, build_identity_pool};
pub use category_store::PgCategoryStore;
pub use config::DatabaseConfig;
pub use database::Database;
pub use identity_store::PgIdentityStore;
pub use proxy_store::PgProxyStore;
