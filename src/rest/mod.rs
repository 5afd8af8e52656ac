pub mod client;

pub use client::UpstoxService;
