use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLOB_BASE_URL: &str = "https://clob.polymarket.com";
pub const DEFAULT_GAMMA_BASE_URL: &str = "https://gamma-api.polymarket.com";
pub const POLYGON_CHAIN_ID: u64 = 137;

/// Source of raw configuration values. `Settings::load` reads the process
/// environment; tests pass a closure over a fixed map.
struct Vars<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => Ok(v
                .parse::<u64>()
                .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
        }
    }

    fn get_u8(&self, key: &str) -> Result<Option<u8>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => Ok(Some(
                v.parse::<u8>()
                    .map_err(|e| anyhow!("{key} invalid int: {e}"))?,
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Listener
    pub host: String,
    pub port: u16,
    pub relay_secret: Option<String>,

    // Wallet
    pub private_key: Option<String>,
    pub proxy_wallet_address: Option<String>,
    pub signature_type: Option<u8>,

    // Pre-derived L2 credentials
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,

    // Upstreams
    pub clob_base_url: String,
    pub gamma_base_url: String,
    pub chain_id: u64,
    pub upstream_timeout_ms: u64,

    // Trade submission
    pub trade_max_retries: u32,
    pub trade_retry_delay_ms: u64,

    pub region: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);

        let region = vars
            .get("RAILWAY_REGION")
            .or_else(|| vars.get("FLY_REGION"))
            .unwrap_or_else(|| "unknown".to_string());

        let s = Self {
            host: vars.get_string("HOST", "0.0.0.0"),
            port: u16::try_from(vars.get_u64("PORT", 3000)?)
                .map_err(|e| anyhow!("PORT out of range: {e}"))?,
            relay_secret: vars.get("RELAY_SECRET"),
            private_key: vars.get("POLYMARKET_PRIVATE_KEY"),
            proxy_wallet_address: vars.get("PROXY_WALLET_ADDRESS"),
            signature_type: vars.get_u8("POLY_SIGNATURE_TYPE")?,
            api_key: vars.get("POLYMARKET_API_KEY"),
            api_secret: vars.get("POLYMARKET_API_SECRET"),
            api_passphrase: vars.get("POLYMARKET_PASSPHRASE"),
            clob_base_url: vars
                .get_string("CLOB_BASE_URL", DEFAULT_CLOB_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            gamma_base_url: vars
                .get_string("GAMMA_BASE_URL", DEFAULT_GAMMA_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            chain_id: vars.get_u64("CHAIN_ID", POLYGON_CHAIN_ID)?,
            upstream_timeout_ms: vars.get_u64("UPSTREAM_TIMEOUT_MS", 10_000)?,
            trade_max_retries: u32::try_from(vars.get_u64("TRADE_MAX_RETRIES", 3)?)
                .map_err(|e| anyhow!("TRADE_MAX_RETRIES out of range: {e}"))?,
            trade_retry_delay_ms: vars.get_u64("TRADE_RETRY_DELAY_MS", 500)?,
            region,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn has_wallet(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy_wallet_address.is_some()
    }

    /// Key and secret present. The passphrase is only required to actually
    /// use the stored credentials instead of deriving new ones.
    pub fn has_l2_creds(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.trade_max_retries < 1 {
            return Err(anyhow!(
                "TRADE_MAX_RETRIES must be >= 1 (got {})",
                self.trade_max_retries
            ));
        }
        if self.upstream_timeout_ms < 1 {
            return Err(anyhow!(
                "UPSTREAM_TIMEOUT_MS must be >= 1 (got {})",
                self.upstream_timeout_ms
            ));
        }
        if let Some(t) = self.signature_type {
            if t > 2 {
                return Err(anyhow!("POLY_SIGNATURE_TYPE must be 0|1|2 (got {t})"));
            }
        }
        for (key, url) in [
            ("CLOB_BASE_URL", &self.clob_base_url),
            ("GAMMA_BASE_URL", &self.gamma_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("{key} must be an http(s) URL (got {url})"));
            }
        }
        Ok(())
    }
}
