use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;

use crate::{
    clob::{
        auth::ApiCreds,
        client::ClobClient,
        order::{MarketOrderArgs, OrderSigner, SignatureType},
    },
    config::Settings,
    normalizer::NormalizedOrder,
    trade::OrderVenue,
    utils::truncate,
};

pub struct ClobSession {
    signer: PrivateKeySigner,
    funder: Address,
    signature_type: SignatureType,
    creds: ApiCreds,
}

impl ClobSession {
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn funder(&self) -> Address {
        self.funder
    }

    pub fn creds(&self) -> &ApiCreds {
        &self.creds
    }
}

/// Wallet material parsed from settings; shared by every derivation.
struct Wallet {
    signer: PrivateKeySigner,
    funder: Address,
    signature_type: SignatureType,
}

fn load_wallet(settings: &Settings) -> Result<Wallet> {
    let pk = settings
        .private_key
        .as_deref()
        .ok_or_else(|| anyhow!("POLYMARKET_PRIVATE_KEY not set"))?;
    let signer: PrivateKeySigner = pk
        .trim_start_matches("0x")
        .parse()
        .map_err(|e| anyhow!("POLYMARKET_PRIVATE_KEY invalid: {e}"))?;

    let funder = match settings.proxy_wallet_address.as_deref() {
        Some(addr) => addr
            .parse::<Address>()
            .with_context(|| format!("PROXY_WALLET_ADDRESS invalid: {addr}"))?,
        None => signer.address(),
    };

    let signature_type = match settings.signature_type {
        Some(code) => SignatureType::from_code(code)
            .ok_or_else(|| anyhow!("POLY_SIGNATURE_TYPE must be 0|1|2 (got {code})"))?,
        None if settings.proxy_wallet_address.is_some() => SignatureType::GnosisSafe,
        None => SignatureType::Eoa,
    };

    Ok(Wallet {
        signer,
        funder,
        signature_type,
    })
}

fn configured_creds(settings: &Settings) -> Option<ApiCreds> {
    Some(ApiCreds {
        api_key: settings.api_key.clone()?,
        secret: settings.api_secret.clone()?,
        passphrase: settings.api_passphrase.clone()?,
    })
}

pub struct SessionCache {
    settings: Arc<Settings>,
    client: ClobClient,
    slot: RwLock<Option<Arc<ClobSession>>>,
    init: tokio::sync::Mutex<()>,
    configured_creds_rejected: AtomicBool,
}

impl SessionCache {
    pub fn new(settings: Arc<Settings>, client: ClobClient) -> Self {
        Self {
            settings,
            client,
            slot: RwLock::new(None),
            init: tokio::sync::Mutex::new(()),
            configured_creds_rejected: AtomicBool::new(false),
        }
    }

    pub fn cached(&self) -> Option<Arc<ClobSession>> {
        self.slot.read().clone()
    }

    /// The shared session, building it if this is the first use.
    pub async fn get(&self) -> Result<Arc<ClobSession>> {
        if let Some(s) = self.cached() {
            return Ok(s);
        }

        let _guard = self.init.lock().await;
        if let Some(s) = self.cached() {
            return Ok(s);
        }

        let session = Arc::new(self.build().await?);
        *self.slot.write() = Some(session.clone());
        Ok(session)
    }

    /// Drops `used` after the upstream refused its credentials. A session
    /// derived since then is left in place.
    pub fn invalidate(&self, used: &Arc<ClobSession>) {
        let mut slot = self.slot.write();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, used)) {
            *slot = None;
            self.configured_creds_rejected.store(true, Ordering::SeqCst);
            log::warn!("clob.session.invalidated api_key={}", truncate(&used.creds.api_key, 8));
        }
    }

    async fn build(&self) -> Result<ClobSession> {
        let wallet = load_wallet(&self.settings)?;
        let funder_s = wallet.funder.to_string();

        let stored = configured_creds(&self.settings)
            .filter(|_| !self.configured_creds_rejected.load(Ordering::SeqCst));

        let creds = match stored {
            Some(creds) => {
                log::info!(
                    "clob.session.stored_creds sig_type={} funder={}",
                    wallet.signature_type as u8,
                    truncate(&funder_s, 10)
                );
                creds
            }
            None => {
                log::info!("clob.session.deriving_api_key");
                let creds = self
                    .client
                    .create_or_derive_api_key(&wallet.signer)
                    .await
                    .context("derive API key")?;
                log::info!(
                    "clob.session.derived sig_type={} funder={} api_key={}",
                    wallet.signature_type as u8,
                    truncate(&funder_s, 10),
                    truncate(&creds.api_key, 8)
                );
                creds
            }
        };

        Ok(ClobSession {
            signer: wallet.signer,
            funder: wallet.funder,
            signature_type: wallet.signature_type,
            creds,
        })
    }
}

#[async_trait]
impl OrderVenue for SessionCache {
    async fn ensure_ready(&self) -> Result<()> {
        self.get().await.map(|_| ())
    }

    async fn tick_size(&self, token_id: &str) -> Result<String> {
        self.client.tick_size(token_id).await
    }

    async fn midpoint(&self, token_id: &str) -> Result<f64> {
        self.client.midpoint(token_id).await
    }

    async fn submit_market_order(&self, order: &NormalizedOrder) -> Result<JsonValue> {
        let session = self.get().await?;

        let neg_risk = self.client.neg_risk(&order.token_id).await.unwrap_or_else(|e| {
            log::debug!("clob.neg_risk_fallback error={e}");
            false
        });
        let fee_rate_bps = self
            .client
            .fee_rate_bps(&order.token_id)
            .await
            .unwrap_or_else(|e| {
                log::debug!("clob.fee_rate_fallback error={e}");
                0
            });

        let signed = OrderSigner {
            signer: &session.signer,
            funder: session.funder,
            signature_type: session.signature_type,
            chain_id: self.client.chain_id(),
        }
        .sign_market_order(&MarketOrderArgs {
            token_id: &order.token_id,
            side: order.side,
            amount: order.size,
            price: order.price,
            tick: order.tick(),
            fee_rate_bps,
            neg_risk,
        })?;

        let body = serde_json::to_string(&signed.post_body(&session.creds.api_key, order.order_type))?;
        let reply = self
            .client
            .post_order(&body, &session.creds, session.address())
            .await?;

        if reply.status == StatusCode::UNAUTHORIZED {
            self.invalidate(&session);
        }
        Ok(reply.body)
    }
}
