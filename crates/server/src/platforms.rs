use std::collections::HashMap;
use std::sync::Arc;
use unibox_core::accounts::AccountRegistry;
use unibox_core::config::PlatformsConfig;
use unibox_core::platform::WebhookReceiver;
use unibox_core::types::PlatformType;
use unibox_inbox::ClientMap;
use unibox_linkedin::{LinkedInClient, LinkedInReceiver};
use unibox_meta::{MetaClient, MetaReceiver};
use unibox_tiktok::{TikTokClient, TikTokReceiver};
use unibox_twitter::{TwitterClient, TwitterReceiver};
use unibox_youtube::{YouTubeClient, YouTubeReceiver};

pub type ReceiverMap = HashMap<PlatformType, Arc<dyn WebhookReceiver>>;

/// Webhook receivers for every platform with secrets configured.
pub fn build_receivers(platforms: &PlatformsConfig, accounts: Arc<AccountRegistry>) -> ReceiverMap {
    let mut receivers: ReceiverMap = HashMap::new();
    for (platform, meta) in [
        (PlatformType::Facebook, &platforms.facebook),
        (PlatformType::Instagram, &platforms.instagram),
    ] {
        if let Some(cfg) = meta {
            receivers.insert(
                platform,
                Arc::new(MetaReceiver::new(
                    platform,
                    cfg.app_secret.clone(),
                    cfg.verify_token.clone(),
                    accounts.clone(),
                )),
            );
        }
    }
    if let Some(cfg) = &platforms.twitter {
        receivers.insert(
            PlatformType::Twitter,
            Arc::new(TwitterReceiver::new(cfg.consumer_secret.clone(), accounts.clone())),
        );
    }
    if let Some(cfg) = &platforms.linkedin {
        receivers.insert(
            PlatformType::Linkedin,
            Arc::new(LinkedInReceiver::new(cfg.client_secret.clone(), accounts.clone())),
        );
    }
    if let Some(cfg) = &platforms.tiktok {
        receivers.insert(
            PlatformType::Tiktok,
            Arc::new(TikTokReceiver::new(
                cfg.client_secret.clone(),
                cfg.signature_tolerance_secs,
                accounts.clone(),
            )),
        );
    }
    if let Some(cfg) = &platforms.youtube {
        receivers.insert(
            PlatformType::Youtube,
            Arc::new(YouTubeReceiver::new(
                cfg.verify_token.clone(),
                cfg.hub_secret.clone(),
                accounts,
            )),
        );
    }
    receivers
}

/// Outbound clients for the same set of platforms.
pub fn build_clients(platforms: &PlatformsConfig) -> ClientMap {
    let mut clients: ClientMap = HashMap::new();
    for (platform, meta) in [
        (PlatformType::Facebook, &platforms.facebook),
        (PlatformType::Instagram, &platforms.instagram),
    ] {
        if let Some(cfg) = meta {
            clients.insert(platform, Arc::new(MetaClient::new(platform, cfg.api_base.clone())));
        }
    }
    if let Some(cfg) = &platforms.twitter {
        clients.insert(PlatformType::Twitter, Arc::new(TwitterClient::new(cfg.api_base.clone())));
    }
    if let Some(cfg) = &platforms.linkedin {
        clients.insert(PlatformType::Linkedin, Arc::new(LinkedInClient::new(cfg.api_base.clone())));
    }
    if let Some(cfg) = &platforms.tiktok {
        clients.insert(PlatformType::Tiktok, Arc::new(TikTokClient::new(cfg.api_base.clone())));
    }
    if let Some(cfg) = &platforms.youtube {
        clients.insert(PlatformType::Youtube, Arc::new(YouTubeClient::new(cfg.api_base.clone())));
    }
    clients
}
