//! eVaka API gateway
//!
//! Terminates browser sessions and forwards requests to the backend
//! services with a trusted identity header.

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod services;
