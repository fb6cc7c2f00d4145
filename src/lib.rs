pub mod config;
pub mod error;
pub mod linkage;
pub mod reconcile;
pub mod render;
pub mod server;
pub mod shutdown;
pub mod tracker;
pub mod webhook;
