pub mod config;
pub mod display;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod notify;
pub mod server;
pub mod service;
pub mod types;
