use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{
    error::RelayError,
    normalizer::{normalize, round_amount, NormalizedOrder, OrderType, Side, TradeIntent},
    retrier::{submit_with_retry, BackoffPolicy, RetryOutcome},
    utils::{truncate, value_as_f64},
};

/// Upstream order book as the trade flow sees it.
#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Makes sure an authenticated client exists. Fails when the wallet is
    /// not configured or credentials cannot be obtained.
    async fn ensure_ready(&self) -> Result<()>;

    async fn tick_size(&self, token_id: &str) -> Result<String>;

    async fn midpoint(&self, token_id: &str) -> Result<f64>;

    /// Signs and posts one market order. A payload without `success: true`
    /// is a rejection.
    async fn submit_market_order(&self, order: &NormalizedOrder) -> Result<JsonValue>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeReport {
    pub order: NormalizedOrder,
    pub outcome: RetryOutcome,
}

const MISSING_FIELDS: &str = "Missing: tokenId, side, amount/size";

fn non_empty_str(body: &JsonValue, key: &str) -> Option<String> {
    match body.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_zero_number(body: &JsonValue, key: &str) -> Option<f64> {
    body.get(key).and_then(value_as_f64).filter(|x| *x != 0.0)
}

/// Validates a `/trade` body. `amount` wins over `size` when both are given.
pub fn parse_trade_request(body: &JsonValue) -> Result<TradeIntent, RelayError> {
    let token_id = non_empty_str(body, "tokenId");
    let side = non_empty_str(body, "side");
    let amount = non_zero_number(body, "amount").or_else(|| non_zero_number(body, "size"));

    let (Some(token_id), Some(side), Some(amount)) = (token_id, side, amount) else {
        return Err(RelayError::BadRequest(MISSING_FIELDS.to_string()));
    };

    let side = Side::parse(&side)
        .ok_or_else(|| RelayError::BadRequest(format!("Invalid side: {side} (BUY|SELL)")))?;
    if amount < 0.0 {
        return Err(RelayError::BadRequest(format!(
            "Invalid amount: {amount} (must be positive)"
        )));
    }
    if round_amount(amount) == 0.0 {
        return Err(RelayError::BadRequest(format!(
            "Invalid amount: {amount} (rounds to 0.00)"
        )));
    }
    let order_type = match non_empty_str(body, "orderType") {
        None => OrderType::default(),
        Some(t) => OrderType::parse(&t)
            .ok_or_else(|| RelayError::BadRequest(format!("Invalid orderType: {t} (FAK|FOK)")))?,
    };

    Ok(TradeIntent {
        token_id,
        side,
        amount,
        price: non_zero_number(body, "price"),
        order_type,
    })
}

/// Normalizes `intent` against live market data and submits it under `policy`.
///
/// Only client setup failures are returned as `Err`; lookup failures fall
/// back to defaults and submission failures end up in the outcome.
pub async fn execute_trade(
    venue: &dyn OrderVenue,
    policy: &dyn BackoffPolicy,
    intent: &TradeIntent,
    trade_id: &str,
) -> Result<TradeReport> {
    venue.ensure_ready().await?;

    let tick_size = match venue.tick_size(&intent.token_id).await {
        Ok(t) => Some(t),
        Err(e) => {
            log::info!("trade.tick_size_fallback id={trade_id} error={e}");
            None
        }
    };

    let midpoint = if intent.price.is_none() {
        match venue.midpoint(&intent.token_id).await {
            Ok(m) => Some(m),
            Err(e) => {
                log::info!("trade.midpoint_fallback id={trade_id} error={e}");
                None
            }
        }
    } else {
        None
    };

    let order = normalize(intent, tick_size.as_deref(), midpoint);
    log::info!(
        "trade.submit id={} side={} amount={} token={} price={} type={} tick={}",
        trade_id,
        order.side.as_str(),
        order.size,
        truncate(&order.token_id, 20),
        order.price,
        order.order_type.as_str(),
        order.tick_size
    );

    let order_ref = &order;
    let outcome = submit_with_retry(policy, trade_id, move |_| {
        venue.submit_market_order(order_ref)
    })
    .await;

    match &outcome {
        RetryOutcome::Filled { attempt, payload } => log::info!(
            "trade.filled id={} attempt={} result={}",
            trade_id,
            attempt,
            truncate(&payload.to_string(), 300)
        ),
        RetryOutcome::Exhausted { attempts, last_error } => log::error!(
            "trade.failed id={trade_id} attempts={attempts} error={last_error}"
        ),
    }

    Ok(TradeReport { order, outcome })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::retrier::FixedDelay;

    /// Scripted venue: counts every upstream call and replays queued
    /// submission results (`Err` strings become errors).
    #[derive(Default)]
    pub(crate) struct MockVenue {
        pub ready_error: Option<String>,
        pub tick: Option<String>,
        pub mid: Option<f64>,
        pub results: Mutex<VecDeque<std::result::Result<JsonValue, String>>>,
        pub calls: AtomicU32,
        pub submissions: Mutex<Vec<NormalizedOrder>>,
    }

    impl MockVenue {
        pub(crate) fn with_results(results: Vec<std::result::Result<JsonValue, String>>) -> Self {
            Self {
                tick: Some("0.01".to_string()),
                mid: Some(0.5),
                results: Mutex::new(results.into()),
                ..Default::default()
            }
        }

        pub(crate) fn total_calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OrderVenue for MockVenue {
        async fn ensure_ready(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.ready_error {
                Some(e) => Err(anyhow!(e.clone())),
                None => Ok(()),
            }
        }

        async fn tick_size(&self, _token_id: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tick.clone().ok_or_else(|| anyhow!("tick lookup failed"))
        }

        async fn midpoint(&self, _token_id: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.mid.ok_or_else(|| anyhow!("midpoint lookup failed"))
        }

        async fn submit_market_order(&self, order: &NormalizedOrder) -> Result<JsonValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.submissions.lock().push(order.clone());
            match self.results.lock().pop_front() {
                Some(Ok(v)) => Ok(v),
                Some(Err(e)) => Err(anyhow!(e)),
                None => Err(anyhow!("no scripted result")),
            }
        }
    }

    fn policy() -> FixedDelay {
        FixedDelay {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }

    fn intent(price: Option<f64>) -> TradeIntent {
        TradeIntent {
            token_id: "123".to_string(),
            side: Side::Sell,
            amount: 7.777,
            price,
            order_type: OrderType::Fok,
        }
    }

    #[test]
    fn parses_full_body() {
        let t = parse_trade_request(&json!({
            "tokenId": "123", "side": "buy", "amount": "12.5", "price": 0.41, "orderType": "FOK"
        }))
        .unwrap();
        assert_eq!(t.token_id, "123");
        assert_eq!(t.side, Side::Buy);
        assert_eq!(t.amount, 12.5);
        assert_eq!(t.price, Some(0.41));
        assert_eq!(t.order_type, OrderType::Fok);
    }

    #[test]
    fn size_is_an_alias_for_amount() {
        let t = parse_trade_request(&json!({"tokenId": "1", "side": "SELL", "size": 3})).unwrap();
        assert_eq!(t.amount, 3.0);
        assert_eq!(t.order_type, OrderType::Fak);
        assert_eq!(t.price, None);
    }

    #[test]
    fn missing_fields_are_rejected() {
        for body in [
            json!({}),
            json!({"side": "BUY", "amount": 1}),
            json!({"tokenId": "1", "amount": 1}),
            json!({"tokenId": "1", "side": "BUY"}),
            json!({"tokenId": "1", "side": "BUY", "amount": 0}),
            json!({"tokenId": "", "side": "BUY", "amount": 1}),
        ] {
            let err = parse_trade_request(&body).unwrap_err();
            assert_eq!(err.to_string(), MISSING_FIELDS, "body={body}");
        }
    }

    #[test]
    fn invalid_side_order_type_and_amount_are_rejected() {
        assert!(parse_trade_request(&json!({"tokenId": "1", "side": "HOLD", "amount": 1})).is_err());
        assert!(parse_trade_request(
            &json!({"tokenId": "1", "side": "BUY", "amount": 1, "orderType": "GTC"})
        )
        .is_err());
        assert!(parse_trade_request(&json!({"tokenId": "1", "side": "BUY", "amount": -2})).is_err());
    }

    #[test]
    fn sub_cent_amount_is_rejected_before_submission() {
        let err = parse_trade_request(&json!({"tokenId": "1", "side": "BUY", "amount": 0.004}))
            .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
        assert!(err.to_string().contains("rounds to 0.00"));

        let t = parse_trade_request(&json!({"tokenId": "1", "side": "BUY", "amount": 0.006})).unwrap();
        assert_eq!(round_amount(t.amount), 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_filled() {
        let venue = MockVenue::with_results(vec![
            Err("timeout".to_string()),
            Ok(json!({"success": false, "errorMsg": "no match"})),
            Ok(json!({"success": true, "orderID": "0x1"})),
        ]);
        let report = execute_trade(&venue, &policy(), &intent(Some(0.456)), "t1")
            .await
            .unwrap();

        assert!(matches!(report.outcome, RetryOutcome::Filled { attempt: 3, .. }));
        assert_eq!(report.order.price, 0.46);
        assert_eq!(report.order.size, 7.78);
        assert_eq!(venue.submissions.lock().len(), 3);
        // ready + tick + 3 submissions; midpoint skipped because a price was given
        assert_eq!(venue.total_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_last_error_after_exhaustion() {
        let venue = MockVenue::with_results(vec![
            Err("a".to_string()),
            Err("b".to_string()),
            Ok(json!({"error": "not enough balance / allowance"})),
            Ok(json!({"success": true})),
        ]);
        let report = execute_trade(&venue, &policy(), &intent(Some(0.5)), "t2")
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            RetryOutcome::Exhausted {
                attempts: 3,
                last_error: "not enough balance / allowance".to_string(),
            }
        );
        assert_eq!(venue.submissions.lock().len(), 3);
    }

    #[tokio::test]
    async fn falls_back_when_lookups_fail() {
        let venue = MockVenue {
            tick: None,
            mid: None,
            results: Mutex::new(vec![Ok(json!({"success": true}))].into()),
            ..Default::default()
        };
        let report = execute_trade(&venue, &policy(), &intent(None), "t3").await.unwrap();
        assert_eq!(report.order.tick_size, "0.01");
        assert_eq!(report.order.price, 0.5);
    }

    #[tokio::test]
    async fn uses_midpoint_when_price_absent() {
        let venue = MockVenue {
            tick: Some("0.001".to_string()),
            mid: Some(0.3337),
            results: Mutex::new(vec![Ok(json!({"success": true}))].into()),
            ..Default::default()
        };
        let report = execute_trade(&venue, &policy(), &intent(None), "t4").await.unwrap();
        assert_eq!(report.order.tick_size, "0.001");
        assert_eq!(report.order.price, 0.334);
    }

    #[tokio::test]
    async fn setup_failure_skips_lookups_and_submission() {
        let venue = MockVenue {
            ready_error: Some("POLYMARKET_PRIVATE_KEY not set".to_string()),
            ..Default::default()
        };
        let err = execute_trade(&venue, &policy(), &intent(None), "t5").await.unwrap_err();
        assert_eq!(err.to_string(), "POLYMARKET_PRIVATE_KEY not set");
        assert_eq!(venue.total_calls(), 1);
    }
}
