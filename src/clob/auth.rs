use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::eip712_domain;
use anyhow::{anyhow, Context, Result};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";
const CLOB_AUTH_TYPE: &str = "ClobAuth(address address,string timestamp,uint256 nonce,string message)";

pub const POLY_ADDRESS: &str = "poly_address";
pub const POLY_SIGNATURE: &str = "poly_signature";
pub const POLY_TIMESTAMP: &str = "poly_timestamp";
pub const POLY_NONCE: &str = "poly_nonce";
pub const POLY_API_KEY: &str = "poly_api_key";
pub const POLY_PASSPHRASE: &str = "poly_passphrase";

/// L2 API credentials. Field names follow the CLOB's JSON.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiCreds {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for ApiCreds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCreds")
            .field("api_key", &crate::utils::truncate(&self.api_key, 8))
            .finish_non_exhaustive()
    }
}

fn header(name: &'static str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let value = HeaderValue::from_str(value).with_context(|| format!("header {name}"))?;
    Ok((HeaderName::from_static(name), value))
}

/// EIP-712 digest of the `ClobAuth` struct under `ClobAuthDomain`.
pub fn clob_auth_digest(chain_id: u64, address: Address, timestamp: u64, nonce: u64) -> B256 {
    let domain = eip712_domain! {
        name: "ClobAuthDomain",
        version: "1",
        chain_id: chain_id,
    };

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(keccak256(CLOB_AUTH_TYPE).as_slice());
    encoded.extend_from_slice(address.into_word().as_slice());
    encoded.extend_from_slice(keccak256(timestamp.to_string()).as_slice());
    encoded.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
    encoded.extend_from_slice(keccak256(CLOB_AUTH_MESSAGE).as_slice());
    let struct_hash = keccak256(&encoded);

    let mut digest_input = Vec::with_capacity(2 + 32 + 32);
    digest_input.extend_from_slice(&[0x19, 0x01]);
    digest_input.extend_from_slice(domain.hash_struct().as_slice());
    digest_input.extend_from_slice(struct_hash.as_slice());
    keccak256(&digest_input)
}

/// 65-byte `r || s || v` hex signature with the `0x` prefix the CLOB expects.
pub fn sign_digest(signer: &PrivateKeySigner, digest: &B256) -> Result<String> {
    let sig = signer
        .sign_hash_sync(digest)
        .map_err(|e| anyhow!("wallet signing failed: {e}"))?;
    Ok(format!("0x{}", hex::encode(sig.as_bytes())))
}

pub fn l1_headers(
    signer: &PrivateKeySigner,
    chain_id: u64,
    timestamp: u64,
    nonce: u64,
) -> Result<HeaderMap> {
    let address = signer.address();
    let digest = clob_auth_digest(chain_id, address, timestamp, nonce);
    let signature = sign_digest(signer, &digest)?;

    let mut headers = HeaderMap::new();
    for (name, value) in [
        header(POLY_ADDRESS, &address.to_string())?,
        header(POLY_SIGNATURE, &signature)?,
        header(POLY_TIMESTAMP, &timestamp.to_string())?,
        header(POLY_NONCE, &nonce.to_string())?,
    ] {
        headers.insert(name, value);
    }
    Ok(headers)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(secret)
        .or_else(|_| STANDARD.decode(secret))
        .or_else(|_| URL_SAFE_NO_PAD.decode(secret))
        .map_err(|e| anyhow!("API secret is not base64: {e}"))
}

/// url-safe base64 HMAC-SHA256 over `timestamp + method + path + body`.
pub fn l2_signature(
    secret: &str,
    timestamp: u64,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<String> {
    let key = decode_secret(secret)?;
    let mut mac =
        HmacSha256::new_from_slice(&key).map_err(|e| anyhow!("invalid HMAC key: {e}"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    if let Some(b) = body {
        mac.update(b.as_bytes());
    }
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

pub fn l2_headers(
    creds: &ApiCreds,
    address: Address,
    timestamp: u64,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<HeaderMap> {
    let signature = l2_signature(&creds.secret, timestamp, method, path, body)?;

    let mut headers = HeaderMap::new();
    for (name, value) in [
        header(POLY_ADDRESS, &address.to_string())?,
        header(POLY_SIGNATURE, &signature)?,
        header(POLY_TIMESTAMP, &timestamp.to_string())?,
        header(POLY_API_KEY, &creds.api_key)?,
        header(POLY_PASSPHRASE, &creds.passphrase)?,
    ] {
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "cmVsYXktdGVzdC1zZWNyZXQtMDEyMzQ1Njc4OWFiY2RlZg==";

    fn test_signer() -> PrivateKeySigner {
        "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
            .parse()
            .unwrap()
    }

    #[test]
    fn l2_signature_matches_known_vector() {
        let sig = l2_signature(
            SECRET,
            1_700_000_000,
            "POST",
            "/order",
            Some(r#"{"orderType":"FAK"}"#),
        )
        .unwrap();
        assert_eq!(sig, "D5DEVYxWgGRgstNIYQOMDJEwcG05kxAguqcNlz1GM_E=");

        let sig = l2_signature(SECRET, 1_700_000_000, "GET", "/auth/api-keys", None).unwrap();
        assert_eq!(sig, "15t_h_wFtWACuMdsvezxrwFoppT5WcDlaeuIsRtcHd0=");
    }

    #[test]
    fn l2_secret_accepts_unpadded_and_standard_base64() {
        let unpadded = SECRET.trim_end_matches('=');
        let a = l2_signature(SECRET, 1, "GET", "/x", None).unwrap();
        let b = l2_signature(unpadded, 1, "GET", "/x", None).unwrap();
        assert_eq!(a, b);
        assert!(l2_signature("***", 1, "GET", "/x", None).is_err());
    }

    #[test]
    fn l2_headers_carry_credentials() {
        let creds = ApiCreds {
            api_key: "key-1".to_string(),
            secret: SECRET.to_string(),
            passphrase: "pass-1".to_string(),
        };
        let h = l2_headers(&creds, Address::ZERO, 42, "POST", "/order", Some("{}")).unwrap();
        assert_eq!(h.get(POLY_API_KEY).unwrap(), "key-1");
        assert_eq!(h.get(POLY_PASSPHRASE).unwrap(), "pass-1");
        assert_eq!(h.get(POLY_TIMESTAMP).unwrap(), "42");
        assert!(h.get(POLY_SIGNATURE).is_some());
    }

    #[test]
    fn l1_headers_sign_with_wallet_address() {
        let signer = test_signer();
        let h = l1_headers(&signer, 137, 1_700_000_000, 0).unwrap();
        assert_eq!(
            h.get(POLY_ADDRESS).unwrap().to_str().unwrap(),
            signer.address().to_string()
        );
        assert_eq!(h.get(POLY_NONCE).unwrap(), "0");
        let sig = h.get(POLY_SIGNATURE).unwrap().to_str().unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 2 + 130);
    }

    #[test]
    fn clob_auth_digest_depends_on_every_field() {
        let a = clob_auth_digest(137, Address::ZERO, 1, 0);
        assert_ne!(a, clob_auth_digest(80002, Address::ZERO, 1, 0));
        assert_ne!(a, clob_auth_digest(137, Address::ZERO, 2, 0));
        assert_ne!(a, clob_auth_digest(137, Address::ZERO, 1, 1));
        assert_eq!(a, clob_auth_digest(137, Address::ZERO, 1, 0));
    }

    #[test]
    fn creds_debug_hides_secret() {
        let creds = ApiCreds {
            api_key: "0123456789abcdef".to_string(),
            secret: "TOP-SECRET".to_string(),
            passphrase: "PASS".to_string(),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("TOP-SECRET"));
        assert!(!dbg.contains("PASS"));
        assert!(dbg.contains("01234567"));
    }
}
