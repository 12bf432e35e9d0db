pub mod api;
pub mod auth;
pub mod blob;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod receipt;
pub mod scheduler;
pub mod topology;
pub mod wal;
