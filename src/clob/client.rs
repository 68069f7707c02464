use std::time::Duration;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderMap, Method, StatusCode};
use serde_json::Value as JsonValue;

use crate::{
    clob::auth::{l1_headers, l2_headers, ApiCreds},
    utils::{json_or_raw, now_secs, truncate, value_as_f64},
};

#[derive(Debug, Clone)]
pub struct ClobClient {
    http: reqwest::Client,
    base_url: String,
    chain_id: u64,
}

/// Status and JSON body of a call whose non-2xx responses are data, not errors.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: JsonValue,
}

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
        .context("build http client")
}

impl ClobClient {
    pub fn new(http: reqwest::Client, base_url: &str, chain_id: u64) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_public(&self, path: &str, token_id: &str) -> Result<JsonValue> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = resp.status();
        let text = resp.text().await.with_context(|| format!("GET {path} body"))?;
        if !status.is_success() {
            return Err(anyhow!("GET {path} -> {status}: {}", truncate(&text, 200)));
        }
        serde_json::from_str(&text).with_context(|| format!("GET {path} json"))
    }

    pub async fn midpoint(&self, token_id: &str) -> Result<f64> {
        let v = self.get_public("/midpoint", token_id).await?;
        v.get("mid")
            .and_then(value_as_f64)
            .ok_or_else(|| anyhow!("midpoint missing in {v}"))
    }

    /// Tick size as the decimal string the CLOB reports (e.g. `"0.01"`).
    pub async fn tick_size(&self, token_id: &str) -> Result<String> {
        let v = self.get_public("/tick-size", token_id).await?;
        match v.get("minimum_tick_size") {
            Some(JsonValue::String(s)) => Ok(s.clone()),
            Some(JsonValue::Number(n)) => Ok(n.to_string()),
            _ => Err(anyhow!("minimum_tick_size missing in {v}")),
        }
    }

    pub async fn neg_risk(&self, token_id: &str) -> Result<bool> {
        let v = self.get_public("/neg-risk", token_id).await?;
        v.get("neg_risk")
            .and_then(|x| x.as_bool())
            .ok_or_else(|| anyhow!("neg_risk missing in {v}"))
    }

    pub async fn fee_rate_bps(&self, token_id: &str) -> Result<u64> {
        let v = self.get_public("/fee-rate", token_id).await?;
        v.get("base_fee")
            .and_then(value_as_f64)
            .filter(|f| *f >= 0.0)
            .map(|f| f as u64)
            .ok_or_else(|| anyhow!("base_fee missing in {v}"))
    }

    async fn l1_call(&self, method: Method, path: &str, signer: &PrivateKeySigner) -> Result<ApiCreds> {
        let headers = l1_headers(signer, self.chain_id, now_secs(), 0)?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .request(method.clone(), &url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("{method} {path}"))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("{method} {path} -> {status}: {}", truncate(&text, 200)));
        }
        serde_json::from_str(&text).with_context(|| format!("{method} {path} creds"))
    }

    pub async fn derive_api_key(&self, signer: &PrivateKeySigner) -> Result<ApiCreds> {
        self.l1_call(Method::GET, "/auth/derive-api-key", signer).await
    }

    pub async fn create_api_key(&self, signer: &PrivateKeySigner) -> Result<ApiCreds> {
        self.l1_call(Method::POST, "/auth/api-key", signer).await
    }

    /// Existing key for this wallet if there is one, otherwise a new one.
    pub async fn create_or_derive_api_key(&self, signer: &PrivateKeySigner) -> Result<ApiCreds> {
        match self.derive_api_key(signer).await {
            Ok(creds) => Ok(creds),
            Err(e) => {
                log::info!("clob.derive_api_key_failed error={e}; creating");
                self.create_api_key(signer).await
            }
        }
    }

    /// `POST /order` with L2 headers. Rejections come back as a reply, not an `Err`.
    pub async fn post_order(
        &self,
        body: &str,
        creds: &ApiCreds,
        address: Address,
    ) -> Result<UpstreamReply> {
        let path = "/order";
        let headers: HeaderMap = l2_headers(creds, address, now_secs(), "POST", path, Some(body))?;
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .context("POST /order")?;
        let status = resp.status();
        let text = resp.text().await.context("POST /order body")?;
        let mut body = json_or_raw(text.as_bytes());
        if !status.is_success() {
            if let JsonValue::Object(map) = &mut body {
                map.entry("error")
                    .or_insert_with(|| JsonValue::String(format!("upstream status {status}")));
            } else {
                body = serde_json::json!({ "error": format!("upstream status {status}") });
            }
        }
        Ok(UpstreamReply { status, body })
    }
}
