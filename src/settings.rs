use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{SniperError, SniperResult};
use crate::solana::wallet::WalletManager;

pub const SETTINGS_FILE: &str = ".settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiCredentials {
    pub api_id: String,
    pub api_hash: String,
}

/// User-editable settings persisted next to the binary. Missing keys take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub secret_key: String,
    pub snipe_amount: f64, // SOL per buy
    pub slippage_pct: f64,
    pub max_buy_attempts: u32,
    pub rpc_url: String,
    pub watched_channels: Vec<String>,
    pub api_credentials: ApiCredentials,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            snipe_amount: 0.1,
            slippage_pct: 25.0,
            max_buy_attempts: 2,
            rpc_url: String::new(),
            watched_channels: Vec::new(),
            api_credentials: ApiCredentials::default(),
        }
    }
}

fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> SniperError {
    SniperError::ConfigError(format!("invalid {} '{}': {}", key, value, reason))
}

impl Settings {
    /// Fails closed on anything that would make trading unsafe.
    pub fn validate(&self) -> SniperResult<()> {
        if self.secret_key.trim().is_empty() {
            return Err(SniperError::ConfigError(
                "secretKey is empty; run `settings new-wallet` or `settings set secretKey <key>`".to_string(),
            ));
        }
        WalletManager::new(&self.secret_key)?;
        if self.rpc_url.trim().is_empty() {
            return Err(SniperError::ConfigError("rpcUrl is empty".to_string()));
        }
        if !(self.snipe_amount > 0.0) {
            return Err(SniperError::ConfigError(format!(
                "snipeAmount must be positive, got {}",
                self.snipe_amount
            )));
        }
        if !(0.0..=100.0).contains(&self.slippage_pct) {
            return Err(SniperError::ConfigError(format!(
                "slippagePct must be within 0..=100, got {}",
                self.slippage_pct
            )));
        }
        if self.max_buy_attempts == 0 {
            return Err(SniperError::ConfigError("maxBuyAttempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Updates one key by its file name. `watchedChannels` takes a comma list.
    pub fn set(&mut self, key: &str, value: &str) -> SniperResult<()> {
        match key {
            "secretKey" => {
                WalletManager::new(value)?;
                self.secret_key = value.to_string();
            }
            "snipeAmount" => self.snipe_amount = value.parse().map_err(|e| invalid(key, value, e))?,
            "slippagePct" => self.slippage_pct = value.parse().map_err(|e| invalid(key, value, e))?,
            "maxBuyAttempts" => self.max_buy_attempts = value.parse().map_err(|e| invalid(key, value, e))?,
            "rpcUrl" => self.rpc_url = value.to_string(),
            "watchedChannels" => {
                self.watched_channels = value
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            }
            "apiId" => self.api_credentials.api_id = value.to_string(),
            "apiHash" => self.api_credentials.api_hash = value.to_string(),
            other => {
                return Err(SniperError::ConfigError(format!("unknown settings key '{}'", other)));
            }
        }
        Ok(())
    }

    /// Key/value lines for display; the secret is shown as its public key.
    pub fn describe(&self) -> Vec<(String, String)> {
        let wallet = if self.secret_key.is_empty() {
            "<not set>".to_string()
        } else {
            WalletManager::new(&self.secret_key)
                .map(|w| w.get_public_key().to_string())
                .unwrap_or_else(|_| "<invalid secretKey>".to_string())
        };
        vec![
            ("publicKey".to_string(), wallet),
            ("snipeAmount".to_string(), self.snipe_amount.to_string()),
            ("slippagePct".to_string(), self.slippage_pct.to_string()),
            ("maxBuyAttempts".to_string(), self.max_buy_attempts.to_string()),
            ("rpcUrl".to_string(), self.rpc_url.clone()),
            ("watchedChannels".to_string(), self.watched_channels.join(",")),
            ("apiId".to_string(), self.api_credentials.api_id.clone()),
            (
                "apiHash".to_string(),
                if self.api_credentials.api_hash.is_empty() { "" } else { "<set>" }.to_string(),
            ),
        ]
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file, writing defaults first when it does not exist.
    /// A file that exists but does not parse is an error and is left untouched.
    pub fn load(&self) -> SniperResult<Settings> {
        if !self.path.exists() {
            info!("No settings at {}; writing defaults", self.path.display());
            let defaults = Settings::default();
            self.save(&defaults)?;
            return Ok(defaults);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            SniperError::ConfigError(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| SniperError::ConfigError(format!("cannot parse {}: {}", self.path.display(), e)))
    }

    /// Rewrites the whole file through a temp file and rename.
    pub fn save(&self, settings: &Settings) -> SniperResult<()> {
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| SniperError::ConfigError(format!("cannot serialize settings: {}", e)))?;
        let tmp = self.path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SniperError::ConfigError(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn set(&self, key: &str, value: &str) -> SniperResult<Settings> {
        let mut settings = self.load()?;
        settings.set(key, value)?;
        self.save(&settings)?;
        Ok(settings)
    }

    /// Generates a keypair, stores it and returns the wallet.
    pub fn new_wallet(&self) -> SniperResult<WalletManager> {
        let mut settings = self.load()?;
        let (wallet, secret) = WalletManager::generate();
        settings.secret_key = secret;
        self.save(&settings)?;
        info!("Generated wallet {}", wallet.get_public_key());
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempFile(PathBuf);

    impl TempFile {
        fn new() -> Self {
            Self(std::env::temp_dir().join(format!("sniper-settings-{}.json", uuid::Uuid::new_v4())))
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn missing_file_writes_defaults() {
        let file = TempFile::new();
        let store = SettingsStore::new(&file.0);

        let settings = store.load().unwrap();
        assert_eq!(settings, Settings::default());
        assert!(file.0.exists());

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&file.0).unwrap()).unwrap();
        assert_eq!(raw["snipeAmount"], 0.1);
        assert_eq!(raw["maxBuyAttempts"], 2);
        assert_eq!(raw["apiCredentials"]["apiHash"], "");
    }

    #[test]
    fn missing_keys_take_defaults() {
        let file = TempFile::new();
        fs::write(&file.0, r#"{"slippagePct": 40, "watchedChannels": ["alpha"]}"#).unwrap();

        let settings = SettingsStore::new(&file.0).load().unwrap();
        assert_eq!(settings.slippage_pct, 40.0);
        assert_eq!(settings.watched_channels, vec!["alpha".to_string()]);
        assert_eq!(settings.snipe_amount, 0.1);
        assert_eq!(settings.max_buy_attempts, 2);
    }

    #[test]
    fn malformed_file_is_fatal_and_kept() {
        let file = TempFile::new();
        fs::write(&file.0, "{not json").unwrap();

        let err = SettingsStore::new(&file.0).load().unwrap_err();
        assert_eq!(err.disposition(), crate::error::Disposition::Fatal);
        assert_eq!(fs::read_to_string(&file.0).unwrap(), "{not json");
    }

    #[test]
    fn set_persists_and_validates_values() {
        let file = TempFile::new();
        let store = SettingsStore::new(&file.0);

        store.set("snipeAmount", "0.25").unwrap();
        store.set("watchedChannels", "alpha, beta,").unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.snipe_amount, 0.25);
        assert_eq!(reloaded.watched_channels, vec!["alpha".to_string(), "beta".to_string()]);

        assert!(store.set("snipeAmount", "lots").is_err());
        assert!(store.set("secretKey", "not-a-key").is_err());
        assert!(store.set("colour", "blue").is_err());
        assert_eq!(store.load().unwrap(), reloaded);
    }

    #[test]
    fn empty_secret_fails_validation_until_wallet_generated() {
        let file = TempFile::new();
        let store = SettingsStore::new(&file.0);
        store.set("rpcUrl", "http://localhost:8899").unwrap();

        let err = store.load().unwrap().validate().unwrap_err();
        assert_eq!(err.disposition(), crate::error::Disposition::Fatal);

        let wallet = store.new_wallet().unwrap();
        let settings = store.load().unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.describe()[0].1, wallet.get_public_key().to_string());
        assert!(!settings.describe().iter().any(|(_, v)| v == &settings.secret_key));
    }
}
