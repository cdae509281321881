//! Facebook Pages and Instagram business accounts, both delivered through
//! the Graph API webhook envelope.

pub mod client;
pub mod events;
pub mod normalize;
pub mod receiver;

pub use client::{MetaClient, DEFAULT_GRAPH_API};
pub use receiver::{hub_handshake, verify_hub_signature, MetaReceiver};
