use crate::types::PlatformType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A social account connected to the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    /// Local identity; every inbox message belongs to exactly one.
    pub id: String,
    pub organization_id: String,
    pub platform: PlatformType,
    /// The platform's own id for the account: page id, Instagram business
    /// id, Twitter user id, LinkedIn organization id, TikTok open id or
    /// YouTube channel id.
    pub platform_account_id: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Access token used for replies and backfill. Loaded from config or the
    /// credential store.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    /// TikTok business id for the comment API.
    #[serde(default)]
    pub business_id: Option<String>,
}

/// Self-origin context handed to a normalizer: who "we" are on the platform.
#[derive(Debug, Clone, Copy)]
pub struct AccountContext<'a> {
    pub account_id: &'a str,
    pub platform_account_id: &'a str,
    pub username: Option<&'a str>,
}

impl ConnectedAccount {
    pub fn context(&self) -> AccountContext<'_> {
        AccountContext {
            account_id: &self.id,
            platform_account_id: &self.platform_account_id,
            username: self.username.as_deref(),
        }
    }
}

impl AccountContext<'_> {
    /// True when `author_id` is the connected account itself.
    pub fn is_self(&self, author_id: &str) -> bool {
        !author_id.is_empty() && author_id == self.platform_account_id
    }
}

/// Explicit organization/account scope carried by every inbox operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountScope {
    pub organization_id: String,
    pub account_ids: BTreeSet<String>,
}

impl AccountScope {
    pub fn new(
        organization_id: impl Into<String>,
        account_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            account_ids: account_ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.account_ids.contains(account_id)
    }

    pub fn is_empty(&self) -> bool {
        self.account_ids.is_empty()
    }
}

/// Lookup table of connected accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    by_id: HashMap<String, ConnectedAccount>,
    by_platform_id: HashMap<(PlatformType, String), String>,
}

impl AccountRegistry {
    pub fn new(accounts: impl IntoIterator<Item = ConnectedAccount>) -> Self {
        let mut registry = Self::default();
        for account in accounts {
            registry.insert(account);
        }
        registry
    }

    pub fn insert(&mut self, account: ConnectedAccount) {
        self.by_platform_id.insert(
            (account.platform, account.platform_account_id.clone()),
            account.id.clone(),
        );
        self.by_id.insert(account.id.clone(), account);
    }

    pub fn get(&self, account_id: &str) -> Option<&ConnectedAccount> {
        self.by_id.get(account_id)
    }

    /// Resolve the connected account a webhook event is addressed to.
    pub fn find(&self, platform: PlatformType, platform_account_id: &str) -> Option<&ConnectedAccount> {
        self.by_platform_id
            .get(&(platform, platform_account_id.to_string()))
            .and_then(|id| self.by_id.get(id))
    }

    pub fn for_platform(&self, platform: PlatformType) -> impl Iterator<Item = &ConnectedAccount> {
        self.by_id.values().filter(move |a| a.platform == platform)
    }

    /// All accounts owned by an organization.
    pub fn scope_for_org(&self, organization_id: &str) -> AccountScope {
        AccountScope::new(
            organization_id,
            self.by_id
                .values()
                .filter(|a| a.organization_id == organization_id)
                .map(|a| a.id.clone()),
        )
    }

    pub fn accounts_in_scope<'a>(
        &'a self,
        scope: &'a AccountScope,
    ) -> impl Iterator<Item = &'a ConnectedAccount> + 'a {
        scope.account_ids.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_account(id: &str, org: &str, platform: PlatformType, external: &str) -> ConnectedAccount {
    ConnectedAccount {
        id: id.to_string(),
        organization_id: org.to_string(),
        platform,
        platform_account_id: external.to_string(),
        username: None,
        access_token: Some("token".to_string()),
        business_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_resolves_platform_identifier() {
        let registry = AccountRegistry::new([
            test_account("fb-1", "org", PlatformType::Facebook, "page-1"),
            test_account("tw-1", "org", PlatformType::Twitter, "page-1"),
        ]);
        assert_eq!(registry.find(PlatformType::Facebook, "page-1").unwrap().id, "fb-1");
        assert_eq!(registry.find(PlatformType::Twitter, "page-1").unwrap().id, "tw-1");
        assert!(registry.find(PlatformType::Tiktok, "page-1").is_none());
    }

    #[test]
    fn scope_only_includes_org_accounts() {
        let registry = AccountRegistry::new([
            test_account("a", "org-1", PlatformType::Facebook, "1"),
            test_account("b", "org-2", PlatformType::Facebook, "2"),
        ]);
        let scope = registry.scope_for_org("org-1");
        assert!(scope.contains("a"));
        assert!(!scope.contains("b"));
        assert_eq!(registry.accounts_in_scope(&scope).count(), 1);
    }

    #[test]
    fn context_detects_self_origin() {
        let account = test_account("a", "org", PlatformType::Twitter, "99");
        assert!(account.context().is_self("99"));
        assert!(!account.context().is_self("100"));
        assert!(!account.context().is_self(""));
    }
}
