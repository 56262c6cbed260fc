//! SimulatedTransport - a scriptable stand-in for the push gateway.
//!
//! Used by tests and the demo binary. Outcomes can be scripted per token; a
//! token without a script gets the fallback outcome.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::domain::{DeliveryOutcome, DeviceToken, NotificationPayload};
use crate::ports::Transport;

/// A delivery the transport has seen.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCall {
    pub token: DeviceToken,
    pub title: String,
    /// The gateway document the payload was rendered to.
    pub document: Value,
    pub priority: u8,
}

#[derive(Debug, Default)]
struct Script {
    per_token: HashMap<DeviceToken, VecDeque<DeliveryOutcome>>,
    fallback: Option<DeliveryOutcome>,
    calls: Vec<DeliveryCall>,
}

#[derive(Debug, Default)]
pub struct SimulatedTransport {
    script: Mutex<Script>,
    latency: Mutex<Duration>,
    next_gateway_id: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome for every unscripted call. Without one, calls succeed.
    pub fn with_fallback(self, outcome: DeliveryOutcome) -> Self {
        self.script.lock().fallback = Some(outcome);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Queue outcomes for `token`, consumed one per call in order.
    pub fn script<I>(&self, token: &DeviceToken, outcomes: I)
    where
        I: IntoIterator<Item = DeliveryOutcome>,
    {
        self.script
            .lock()
            .per_token
            .entry(token.clone())
            .or_default()
            .extend(outcomes);
    }

    pub fn calls(&self) -> Vec<DeliveryCall> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.lock().calls.len()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, token: &DeviceToken, payload: &NotificationPayload) -> Option<DeliveryOutcome> {
        let mut script = self.script.lock();
        script.calls.push(DeliveryCall {
            token: token.clone(),
            title: payload.title.clone(),
            document: payload.to_gateway_json(),
            priority: payload.priority.as_gateway_value(),
        });
        let scripted = script.per_token.get_mut(token).and_then(VecDeque::pop_front);
        scripted.or_else(|| script.fallback.clone())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn deliver(&self, token: &DeviceToken, payload: &NotificationPayload) -> DeliveryOutcome {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let outcome = self.next_outcome(token, payload).unwrap_or_else(|| {
            let n = self.next_gateway_id.fetch_add(1, Ordering::SeqCst);
            DeliveryOutcome::delivered(format!("sim-{n:08}"))
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order_then_fall_back() {
        let transport = SimulatedTransport::new();
        let token = DeviceToken::new("tok");
        let payload = NotificationPayload::new("hi", "there");
        transport.script(
            &token,
            [
                DeliveryOutcome::transient("ServerError"),
                DeliveryOutcome::permanent("Unregistered"),
            ],
        );

        assert_eq!(
            transport.deliver(&token, &payload).await,
            DeliveryOutcome::transient("ServerError")
        );
        assert_eq!(
            transport.deliver(&token, &payload).await,
            DeliveryOutcome::permanent("Unregistered")
        );
        assert!(matches!(
            transport.deliver(&token, &payload).await,
            DeliveryOutcome::Delivered { gateway_id } if gateway_id.starts_with("sim-")
        ));
        assert_eq!(transport.call_count(), 3);
        let first = &transport.calls()[0];
        assert_eq!(first.title, "hi");
        assert_eq!(first.document["aps"]["alert"]["body"], "there");
        assert_eq!(first.priority, 5);
    }

    #[tokio::test]
    async fn fallback_applies_to_unscripted_tokens() {
        let transport =
            SimulatedTransport::new().with_fallback(DeliveryOutcome::transient("ServerError"));
        let outcome = transport
            .deliver(&DeviceToken::new("any"), &NotificationPayload::new("t", "b"))
            .await;
        assert_eq!(outcome, DeliveryOutcome::transient("ServerError"));
        assert_eq!(transport.peak_in_flight(), 1);
    }
}
