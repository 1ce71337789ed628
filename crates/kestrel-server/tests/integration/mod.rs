pub mod common;

mod api_tests;
mod pg_api_tests;
