//! REST API server: pool routes, admin authentication, DTOs and OpenAPI documentation.

pub mod auth;
pub mod config;
pub mod context;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
