//! Twitter / X through the Account Activity API (push) and API v2
//! (replies, mentions timeline).

pub mod client;
pub mod events;
pub mod normalize;
pub mod receiver;

pub use client::{TwitterClient, DEFAULT_TWITTER_API};
pub use receiver::{crc_response, verify_twitter_signature, TwitterReceiver};
