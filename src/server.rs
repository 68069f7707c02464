use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value as JsonValue};
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::{
    clob::{
        client::{build_http_client, ClobClient},
        session::SessionCache,
    },
    config::Settings,
    error::RelayError,
    proxy::{
        forward, forwardable_request_headers, headers_from_json, poly_headers, ProxyRequest,
        UpstreamRoutes, RELAY_SECRET_HEADER,
    },
    retrier::{BackoffPolicy, FixedDelay, RetryOutcome},
    trade::{execute_trade, parse_trade_request, OrderVenue, TradeReport},
    utils::{json_or_raw, now_ms, truncate},
};

const BODY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub venue: Arc<dyn OrderVenue>,
    pub policy: Arc<dyn BackoffPolicy>,
    pub http: reqwest::Client,
    pub routes: Arc<UpstreamRoutes>,
}

impl AppState {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let http = build_http_client(Duration::from_millis(settings.upstream_timeout_ms))?;
        let clob = ClobClient::new(http.clone(), &settings.clob_base_url, settings.chain_id);
        let venue: Arc<dyn OrderVenue> = Arc::new(SessionCache::new(settings.clone(), clob));
        let policy: Arc<dyn BackoffPolicy> = Arc::new(FixedDelay {
            max_attempts: settings.trade_max_retries,
            delay: Duration::from_millis(settings.trade_retry_delay_ms),
        });
        let routes = Arc::new(UpstreamRoutes::from_settings(&settings));
        Ok(Self {
            settings,
            venue,
            policy,
            http,
            routes,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Other methods on these paths (e.g. `DELETE /order`) go upstream.
        .route("/health", get(health).fallback(forward_any))
        .route("/trade", post(trade).fallback(forward_any))
        .route("/order", post(order).fallback(forward_any))
        .route("/proxy", post(proxy).fallback(forward_any))
        .fallback(forward_any)
        .layer(middleware::from_fn_with_state(state.clone(), require_secret))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        // Outermost, so preflights are answered before the secret check.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve_relay(settings: Settings) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("relay addr parse {}:{}", settings.host, settings.port))?;

    log::info!(
        "relay.start url=http://{} region={} wallet={} proxy={} l2_creds={} auth={}",
        addr,
        settings.region,
        settings.has_wallet(),
        settings.has_proxy(),
        settings.has_l2_creds(),
        settings.relay_secret.is_some()
    );

    let app = build_router(AppState::from_settings(settings)?);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn require_secret(State(st): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(secret) = st.settings.relay_secret.as_deref() {
        let given = req
            .headers()
            .get(RELAY_SECRET_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if !bool::from(given.ct_eq(secret.as_bytes())) {
            log::warn!("auth.rejected method={} path={}", req.method(), req.uri().path());
            return RelayError::Unauthorized.into_response();
        }
    }
    next.run(req).await
}

async fn health(State(st): State<AppState>) -> Json<JsonValue> {
    let s = &st.settings;
    Json(json!({
        "status": "ok",
        "ts": now_ms(),
        "region": s.region,
        "hasWallet": s.has_wallet(),
        "hasProxy": s.has_proxy(),
        "hasL2Creds": s.has_l2_creds(),
    }))
}

fn order_id(payload: &JsonValue) -> JsonValue {
    payload
        .get("orderID")
        .or_else(|| payload.get("order_id"))
        .cloned()
        .unwrap_or(JsonValue::Null)
}

fn trade_response(report: TradeReport) -> Response {
    let TradeReport { order, outcome } = report;
    match outcome {
        RetryOutcome::Filled { attempt, payload } => Json(json!({
            "success": true,
            "submitted": true,
            "orderID": order_id(&payload),
            "data": payload,
            "finalPrice": order.price,
            "tickSize": order.tick_size,
            "attempt": attempt,
        }))
        .into_response(),
        RetryOutcome::Exhausted { last_error, .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "submitted": false,
                "error": last_error,
                "finalPrice": order.price,
                "tickSize": order.tick_size,
            })),
        )
            .into_response(),
    }
}

async fn trade(State(st): State<AppState>, body: Bytes) -> Response {
    let body: JsonValue = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
    let intent = match parse_trade_request(&body) {
        Ok(intent) => intent,
        Err(e) => {
            log::info!("trade.invalid error={e}");
            return e.into_response();
        }
    };

    let trade_id = Uuid::new_v4().to_string();
    match execute_trade(st.venue.as_ref(), st.policy.as_ref(), &intent, &trade_id).await {
        Ok(report) => trade_response(report),
        Err(e) => {
            log::error!("trade.error id={trade_id} error={e:#}");
            RelayError::Internal(format!("{e:#}")).into_response()
        }
    }
}

/// Forwards a pre-signed order. `{order, headers}` sends `order` with the
/// given headers; any other body is sent verbatim with the caller's
/// `POLY_*` headers.
async fn order(State(st): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let wrapped = serde_json::from_slice::<JsonValue>(&body).ok().and_then(|v| {
        let order = v.get("order")?;
        let headers = v.get("headers")?.as_object()?;
        Some((order.to_string(), headers_from_json(headers)))
    });

    let (payload, mut out_headers) = match wrapped {
        Some((order, hdrs)) => (Bytes::from(order), hdrs),
        None if body.iter().all(u8::is_ascii_whitespace) => {
            return RelayError::BadRequest("Missing 'order' or 'headers'".to_string())
                .into_response();
        }
        None => (body, poly_headers(&headers)),
    };
    out_headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
    let out_headers = forwardable_request_headers(&out_headers);

    let url = st.routes.resolve("/order");
    log::info!("order.forward bytes={}", payload.len());
    match forward(&st.http, Method::POST, &url, out_headers, payload).await {
        Ok(reply) => {
            let data = json_or_raw(&reply.body);
            log::info!(
                "order.reply status={} body={}",
                reply.status.as_u16(),
                truncate(&String::from_utf8_lossy(&reply.body), 300)
            );
            (
                reply.status,
                Json(json!({
                    "success": reply.status.is_success(),
                    "status": reply.status.as_u16(),
                    "orderID": order_id(&data),
                    "data": data,
                })),
            )
                .into_response()
        }
        Err(e) => {
            log::error!("order.error error={e:#}");
            RelayError::Upstream(format!("{e:#}")).into_response()
        }
    }
}

async fn proxy(State(st): State<AppState>, body: Bytes) -> Response {
    let req: ProxyRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) if body.is_empty() => ProxyRequest::default(),
        Err(e) => return RelayError::BadRequest(format!("Invalid JSON body: {e}")).into_response(),
    };
    let prepared = match req.prepare(&st.routes) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    match forward(
        &st.http,
        prepared.method,
        &prepared.url,
        prepared.headers,
        prepared.body,
    )
    .await
    {
        Ok(reply) => (
            reply.status,
            Json(json!({
                "success": reply.status.is_success(),
                "status": reply.status.as_u16(),
                "data": json_or_raw(&reply.body),
            })),
        )
            .into_response(),
        Err(e) => {
            log::warn!("proxy.error error={e:#}");
            RelayError::Upstream(format!("{e:#}")).into_response()
        }
    }
}

async fn forward_any(
    State(st): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = st.routes.resolve(path);

    match forward(&st.http, method, &url, forwardable_request_headers(&headers), body).await {
        Ok(reply) => {
            let mut resp = (reply.status, reply.body).into_response();
            match reply.content_type {
                Some(ct) => {
                    resp.headers_mut().insert(CONTENT_TYPE, ct);
                }
                None => {
                    resp.headers_mut().remove(CONTENT_TYPE);
                }
            }
            resp
        }
        Err(e) => {
            log::warn!("proxy.error error={e:#}");
            RelayError::Upstream(format!("{e:#}")).into_response()
        }
    }
}
