//! # site-pulse Library
//!
//! Event ingestion, sanitization, storage and aggregation for the storefront
//! analytics pipeline, plus the chatbot, webhook relay, feature settings and
//! retention cycle built on top of it.

pub mod analytics;
pub mod auth;
pub mod chatbot;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod retention;
pub mod sanitize;
pub mod server;
pub mod settings;
pub mod telemetry;
pub mod webhooks;
pub use migration;
