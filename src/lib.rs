pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod normalize;
pub mod relay;
pub mod upstream;
