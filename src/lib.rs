pub mod app_context;
pub mod config;
pub mod core;
pub mod observability;
pub mod pipeline;
pub mod protocols;
pub mod server;
