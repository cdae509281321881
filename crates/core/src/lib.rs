pub mod accounts;
pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod outbound;
pub mod platform;
pub mod signature;
pub mod store;
pub mod types;
