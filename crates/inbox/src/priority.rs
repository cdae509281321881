use unibox_core::types::{MessageType, NewMessage, Priority, Sender, Sentiment};

/// Senders at or above this audience get their DMs and mentions bumped.
pub const INFLUENCER_FOLLOWERS: u64 = 10_000;

fn is_notable(sender: &Sender) -> bool {
    sender.verified == Some(true) || sender.follower_count.is_some_and(|n| n >= INFLUENCER_FOLLOWERS)
}

/// Priority of a freshly ingested message.
pub fn derive_priority(message: &NewMessage, sentiment: Sentiment) -> Priority {
    if matches!(
        message.message_type,
        MessageType::Like | MessageType::Follow | MessageType::Share
    ) {
        return Priority::Low;
    }
    if sentiment == Sentiment::Negative {
        return Priority::High;
    }
    if matches!(message.message_type, MessageType::DirectMessage | MessageType::Mention)
        && is_notable(&message.sender)
    {
        return Priority::High;
    }
    Priority::Medium
}
