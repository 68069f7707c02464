use anyhow::{Context, Result};
use axum::body::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{config::Settings, error::RelayError};

pub const RELAY_SECRET_HEADER: &str = "x-relay-secret";

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// Bodies are relayed as raw bytes, so upstream must answer uncompressed.
const STRIPPED: [&str; 4] = ["host", "content-length", "accept-encoding", RELAY_SECRET_HEADER];

#[derive(Debug, Clone)]
struct Route {
    prefix: &'static str,
    base: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamRoutes {
    routes: Vec<Route>,
    fallback: String,
}

impl UpstreamRoutes {
    pub fn new(clob_base_url: &str, gamma_base_url: &str) -> Self {
        Self {
            routes: vec![Route {
                prefix: "/gamma",
                base: gamma_base_url.trim_end_matches('/').to_string(),
            }],
            fallback: clob_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.clob_base_url, &settings.gamma_base_url)
    }

    /// Absolute upstream URL for a relay path (query string included).
    pub fn resolve(&self, path_and_query: &str) -> String {
        let path = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{path_and_query}")
        };

        for route in &self.routes {
            let Some(rest) = path.strip_prefix(route.prefix) else {
                continue;
            };
            if rest.is_empty() || rest.starts_with('?') {
                return format!("{}/{}", route.base, rest);
            }
            if rest.starts_with('/') {
                return format!("{}{}", route.base, rest);
            }
        }
        format!("{}{}", self.fallback, path)
    }

    /// True when `url` points at one of the configured upstream origins.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(target) = Url::parse(url) else {
            return false;
        };
        if !matches!(target.scheme(), "http" | "https") {
            return false;
        }
        let origin = target.origin();
        self.routes
            .iter()
            .map(|r| r.base.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
            .filter_map(|base| Url::parse(base).ok())
            .any(|base| base.origin() == origin)
    }
}

fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Caller headers minus hop-by-hop headers, `Host`, `Content-Length` and the
/// relay secret.
pub fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_tokens(headers);
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !HOP_BY_HOP.contains(&name)
                && !STRIPPED.contains(&name)
                && !listed.iter().any(|t| t == name)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Caller headers named `POLY_*` (pre-computed auth headers for `/order`).
pub fn poly_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("poly_"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Header map from a JSON object. Non-string scalars are stringified;
/// entries that are not valid header names or values are skipped.
pub fn headers_from_json(map: &serde_json::Map<String, JsonValue>) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (k, v) in map {
        let value = match v {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            _ => continue,
        };
        match (
            HeaderName::from_bytes(k.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => log::debug!("proxy.header_skipped name={k}"),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct ProxyReply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

pub async fn forward(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ProxyReply> {
    let mut req = http.request(method.clone(), url).headers(headers);
    if !body.is_empty() {
        req = req.body(body);
    }
    let resp = req.send().await.with_context(|| format!("{method} {url}"))?;

    let status = resp.status();
    let content_type = resp.headers().get(CONTENT_TYPE).cloned();
    let body = resp
        .bytes()
        .await
        .with_context(|| format!("{method} {url} body"))?;

    log::info!(
        "proxy.forward method={} url={} status={} bytes={}",
        method,
        url,
        status.as_u16(),
        body.len()
    );
    Ok(ProxyReply {
        status,
        content_type,
        body,
    })
}

/// `POST /proxy` body.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyRequest {
    pub url: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: serde_json::Map<String, JsonValue>,
    pub body: Option<JsonValue>,
}

#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    /// Resolves the target and builds the outgoing request. `path` is routed
    /// through the table; an absolute `url` must point at a configured host.
    pub fn prepare(self, routes: &UpstreamRoutes) -> Result<PreparedRequest, RelayError> {
        let url = match (self.url, self.path) {
            (Some(url), _) if !url.trim().is_empty() => {
                if !routes.is_allowed(&url) {
                    return Err(RelayError::BadRequest(format!(
                        "url not allowed: {url} (only the configured upstream hosts)"
                    )));
                }
                url
            }
            (_, Some(path)) if !path.trim().is_empty() => routes.resolve(path.trim()),
            _ => return Err(RelayError::BadRequest("Missing 'url'".to_string())),
        };

        let method_s = self.method.unwrap_or_else(|| "POST".to_string());
        let method = Method::from_bytes(method_s.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| RelayError::BadRequest(format!("Invalid method: {method_s}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(headers_from_json(&self.headers));
        let headers = forwardable_request_headers(&headers);

        let body = match self.body {
            None | Some(JsonValue::Null) => Bytes::new(),
            Some(JsonValue::String(s)) => Bytes::from(s),
            Some(other) => Bytes::from(other.to_string()),
        };

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
        })
    }
}
