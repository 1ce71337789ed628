pub mod common;

mod category_store_tests;
mod identity_store_tests;
mod proxy_store_tests;
