pub mod auth;
pub mod config;
pub mod error;
pub mod rest;
pub mod retry;
pub mod types;
pub mod websocket;
pub use error::{Result, UpstoxError};
