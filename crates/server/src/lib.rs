mod api;
pub mod gateway;
pub mod platforms;
mod webhooks;

pub use gateway::Gateway;
pub use platforms::{build_clients, build_receivers, ReceiverMap};
