use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-account access tokens, kept apart from the main config.
/// File is written with restrictive permissions (0o600 on Unix).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialStore {
    /// Local account id -> access token
    tokens: HashMap<String, String>,
}

impl CredentialStore {
    /// Load credentials from file, or start empty if not found.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let store: CredentialStore = serde_json::from_str(&data)?;
            info!("Loaded {} credentials from {}", store.tokens.len(), path.display());
            Ok(store)
        } else {
            Ok(Self::default())
        }
    }

    /// Save credentials to file with restrictive permissions.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_string_pretty(&self)?;
        std::fs::write(path, &data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        info!("Saved {} credentials to {} (0o600)", self.tokens.len(), path.display());
        Ok(())
    }

    pub fn get(&self, account_id: &str) -> Option<&str> {
        self.tokens.get(account_id).map(|s| s.as_str())
    }

    pub fn set(&mut self, account_id: String, token: String) {
        self.tokens.insert(account_id, token);
    }

    pub fn remove(&mut self, account_id: &str) -> Option<String> {
        self.tokens.remove(account_id)
    }

    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".unibox/credentials.json")
    }
}

/// Mask a secret value for safe display in logs.
/// Shows first 4 and last 4 chars, the rest as `****`.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "****".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}****{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("EAAB1234567890abcdef"), "EAAB****cdef");
    }

    #[test]
    fn save_and_reload() {
        let dir = std::env::temp_dir().join(format!("unibox-cred-{}", uuid::Uuid::new_v4()));
        let path = dir.join("credentials.json");
        let mut store = CredentialStore::default();
        store.set("fb-main".into(), "EAAB-token".into());
        store.save(&path).unwrap();

        let loaded = CredentialStore::load(&path).unwrap();
        assert_eq!(loaded.get("fb-main"), Some("EAAB-token"));
        std::fs::remove_dir_all(dir).ok();
    }
}
