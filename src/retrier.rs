use std::{future::Future, time::Duration};

use serde_json::Value as JsonValue;

/// Decides whether another attempt follows attempt `attempt` (1-based) and
/// how long to wait before it. `None` stops.
pub trait BackoffPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Fixed attempt count, constant delay, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Filled { attempt: u32, payload: JsonValue },
    Exhausted { attempts: u32, last_error: String },
}

/// Error string of a payload the upstream did not accept.
pub fn rejection_reason(payload: &JsonValue) -> String {
    ["error", "errorMsg"]
        .iter()
        .filter_map(|k| payload.get(*k))
        .filter_map(|v| match v {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Null | JsonValue::String(_) => None,
            other => Some(other.to_string()),
        })
        .next()
        .unwrap_or_else(|| "Order rejected".to_string())
}

fn is_accepted(payload: &JsonValue) -> bool {
    payload.get("success").and_then(|v| v.as_bool()) == Some(true)
}

/// Runs `submit` until the upstream accepts the order or the policy stops.
///
/// A rejected payload and an `Err` are both failures; neither is treated as
/// fatal. `label` only tags log lines.
pub async fn submit_with_retry<P, F, Fut>(policy: &P, label: &str, mut submit: F) -> RetryOutcome
where
    P: BackoffPolicy + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<JsonValue>>,
{
    let mut attempt: u32 = 1;
    loop {
        let last_error = match submit(attempt).await {
            Ok(payload) if is_accepted(&payload) => {
                return RetryOutcome::Filled { attempt, payload };
            }
            Ok(payload) => {
                let reason = rejection_reason(&payload);
                log::warn!("trade.attempt_rejected id={label} attempt={attempt} error={reason}");
                reason
            }
            Err(e) => {
                let reason = e.to_string();
                log::warn!("trade.attempt_error id={label} attempt={attempt} error={reason}");
                reason
            }
        };

        match policy.next_delay(attempt) {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error,
                };
            }
        }
    }
}
