pub mod config;
pub mod error;
pub mod stores;
pub mod transport;
pub mod types;
