//! Failover SMS gateway — primary provider with an optional fallback, plus
//! the bulk path.
//!
//! Failure policy: configuration errors surface immediately (a bad token on
//! the primary will not be cured by the fallback's token); transient
//! provider/network errors get exactly one fallback attempt; per-recipient
//! hard rejections are recorded and never abort the rest of a batch.

use std::sync::Arc;
use std::time::Duration;

use courtline_core::error::{CourtlineError, Result};

use crate::phone;
use crate::provider::SmsProvider;

/// Max recipients per native bulk provider call.
const BULK_CHUNK: usize = 1000;
/// Sequential batches larger than this get a pacing delay between sends.
const PACING_THRESHOLD: usize = 10;

/// One message bound for one recipient.
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub to: String,
    pub body: String,
}

/// Outcome of one delivered message.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Canonical international address the message went to.
    pub address: String,
    /// Provider that carried the message.
    pub provider: String,
    /// True when the fallback provider carried it after a primary failure.
    pub fallback: bool,
    pub cost: f64,
    /// Primary error retained for diagnostics on fallback deliveries.
    pub error: Option<String>,
}

/// Aggregated outcome of a bulk send.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<(String, String)>,
    pub total_cost: f64,
}

pub struct SmsGateway {
    primary: Arc<dyn SmsProvider>,
    fallback: Option<Arc<dyn SmsProvider>>,
    country_code: String,
    per_segment_rate: f64,
    pacing: Duration,
}

impl SmsGateway {
    pub fn new(
        primary: Arc<dyn SmsProvider>,
        fallback: Option<Arc<dyn SmsProvider>>,
        country_code: String,
        per_segment_rate: f64,
        pacing: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            country_code,
            per_segment_rate,
            pacing,
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Send one message, failing over to the fallback provider on a
    /// transient primary failure.
    pub async fn send(&self, raw_address: &str, body: &str) -> Result<DeliveryAttempt> {
        let address = phone::normalize(raw_address, &self.country_code)?;
        let cost = phone::estimate_cost(body, 1, self.per_segment_rate);

        match self.primary.send(&address, body).await {
            Ok(()) => Ok(DeliveryAttempt {
                address,
                provider: self.primary.id().to_string(),
                fallback: false,
                cost,
                error: None,
            }),
            Err(primary_err) if primary_err.is_transient() => {
                let Some(fallback) = &self.fallback else {
                    return Err(CourtlineError::DeliveryFailed {
                        primary: primary_err.to_string(),
                        fallback: None,
                    });
                };
                tracing::warn!(
                    "Primary provider {} failed, trying {}: {primary_err}",
                    self.primary.id(),
                    fallback.id()
                );
                match fallback.send(&address, body).await {
                    Ok(()) => {
                        tracing::info!("Failover delivery via {} to {address}", fallback.id());
                        Ok(DeliveryAttempt {
                            address,
                            provider: fallback.id().to_string(),
                            fallback: true,
                            cost,
                            error: Some(primary_err.to_string()),
                        })
                    }
                    Err(fallback_err) => Err(CourtlineError::DeliveryFailed {
                        primary: primary_err.to_string(),
                        fallback: Some(fallback_err.to_string()),
                    }),
                }
            }
            // Config errors and hard rejections are not retried.
            Err(e) => Err(e),
        }
    }

    /// Send a batch. When every message carries the same body and the
    /// primary provider has a native multi-recipient call, one provider
    /// request covers up to `BULK_CHUNK` recipients; otherwise messages go
    /// out one by one with pacing on large batches.
    pub async fn send_bulk(&self, messages: &[OutboundSms]) -> BatchResult {
        let mut result = BatchResult::default();
        if messages.is_empty() {
            return result;
        }

        let shared_body = messages
            .iter()
            .all(|m| m.body == messages[0].body)
            .then(|| messages[0].body.as_str());

        if let Some(body) = shared_body {
            if self.primary.supports_bulk() {
                self.send_bulk_native(messages, body, &mut result).await;
                return result;
            }
        }

        // Degraded path: sequential sends with light pacing.
        let pace = messages.len() > PACING_THRESHOLD;
        for (i, message) in messages.iter().enumerate() {
            if pace && i > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            match self.send(&message.to, &message.body).await {
                Ok(attempt) => {
                    result.successful += 1;
                    result.total_cost += attempt.cost;
                }
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((message.to.clone(), e.to_string()));
                }
            }
        }
        result
    }

    async fn send_bulk_native(&self, messages: &[OutboundSms], body: &str, result: &mut BatchResult) {
        // Normalize up front; bad numbers drop out without touching the rest.
        let mut recipients = Vec::with_capacity(messages.len());
        for message in messages {
            match phone::normalize(&message.to, &self.country_code) {
                Ok(address) => recipients.push(address),
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((message.to.clone(), e.to_string()));
                }
            }
        }

        for chunk in recipients.chunks(BULK_CHUNK) {
            match self.primary.send_batch(chunk, body).await {
                Ok(()) => {
                    result.successful += chunk.len();
                    result.total_cost += phone::estimate_cost(body, chunk.len(), self.per_segment_rate);
                }
                Err(e) if e.is_transient() && self.bulk_fallback().is_some() => {
                    let fallback = self.bulk_fallback().expect("checked above");
                    tracing::warn!(
                        "Bulk call on {} failed, retrying chunk via {}: {e}",
                        self.primary.id(),
                        fallback.id()
                    );
                    match fallback.send_batch(chunk, body).await {
                        Ok(()) => {
                            result.successful += chunk.len();
                            result.total_cost +=
                                phone::estimate_cost(body, chunk.len(), self.per_segment_rate);
                        }
                        Err(fe) => {
                            result.failed += chunk.len();
                            result.errors.push((
                                format!("chunk of {}", chunk.len()),
                                CourtlineError::DeliveryFailed {
                                    primary: e.to_string(),
                                    fallback: Some(fe.to_string()),
                                }
                                .to_string(),
                            ));
                        }
                    }
                }
                Err(e) => {
                    result.failed += chunk.len();
                    result.errors.push((format!("chunk of {}", chunk.len()), e.to_string()));
                }
            }
        }
    }

    fn bulk_fallback(&self) -> Option<&Arc<dyn SmsProvider>> {
        self.fallback.as_ref().filter(|f| f.supports_bulk())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        FailTransient,
        FailConfig,
        RejectRecipient,
    }

    struct MockProvider {
        name: &'static str,
        bulk: bool,
        behavior: Behavior,
        send_calls: AtomicUsize,
        batch_calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(name: &'static str, bulk: bool, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                bulk,
                behavior,
                send_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
            })
        }

        fn outcome(&self) -> Result<()> {
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::FailTransient => Err(CourtlineError::provider("gateway timeout")),
                Behavior::FailConfig => Err(CourtlineError::config("missing credentials")),
                Behavior::RejectRecipient => Err(CourtlineError::rejected("blocked number")),
            }
        }
    }

    #[async_trait]
    impl SmsProvider for MockProvider {
        fn id(&self) -> &str {
            self.name
        }

        fn supports_bulk(&self) -> bool {
            self.bulk
        }

        async fn send(&self, _to: &str, _body: &str) -> Result<()> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.outcome()
        }

        async fn send_batch(&self, _to: &[String], _body: &str) -> Result<()> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.outcome()
        }
    }

    fn gateway(
        primary: Arc<MockProvider>,
        fallback: Option<Arc<MockProvider>>,
    ) -> SmsGateway {
        SmsGateway::new(
            primary,
            fallback.map(|f| f as Arc<dyn SmsProvider>),
            "966".into(),
            0.05,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_fallback_invoked_exactly_once() {
        let primary = MockProvider::new("primary-sms", false, Behavior::FailTransient);
        let fallback = MockProvider::new("fallback-sms", false, Behavior::Succeed);
        let gw = gateway(primary.clone(), Some(fallback.clone()));

        let attempt = gw.send("+966501111111", "hi").await.unwrap();
        assert!(attempt.fallback);
        assert_eq!(attempt.provider, "fallback-sms");
        assert!(attempt.error.as_deref().unwrap().contains("gateway timeout"));
        assert_eq!(primary.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_config_error_skips_fallback() {
        let primary = MockProvider::new("primary-sms", false, Behavior::FailConfig);
        let fallback = MockProvider::new("fallback-sms", false, Behavior::Succeed);
        let gw = gateway(primary, Some(fallback.clone()));

        let err = gw.send("0501111111", "hi").await.unwrap_err();
        assert!(matches!(err, CourtlineError::Config(_)));
        assert_eq!(fallback.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_both_fail_carries_both_errors() {
        let primary = MockProvider::new("primary-sms", false, Behavior::FailTransient);
        let fallback = MockProvider::new("fallback-sms", false, Behavior::FailTransient);
        let gw = gateway(primary, Some(fallback));

        let err = gw.send("0501111111", "hi").await.unwrap_err();
        match err {
            CourtlineError::DeliveryFailed { primary, fallback } => {
                assert!(primary.contains("gateway timeout"));
                assert!(fallback.is_some());
            }
            other => panic!("expected DeliveryFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_bulk_identical_bodies_single_native_call() {
        let primary = MockProvider::new("primary-sms", true, Behavior::Succeed);
        let gw = gateway(primary.clone(), None);

        let messages: Vec<OutboundSms> = (0..3)
            .map(|i| OutboundSms {
                to: format!("05011111{i}1"),
                body: "training at 5pm".into(),
            })
            .collect();
        let result = gw.send_bulk(&messages).await;
        assert_eq!(result.successful, 3);
        assert_eq!(primary.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(primary.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bulk_chunks_at_provider_limit() {
        let primary = MockProvider::new("primary-sms", true, Behavior::Succeed);
        let gw = gateway(primary.clone(), None);

        // 1001 identical-body recipients → two native calls.
        let messages: Vec<OutboundSms> = (0..1001)
            .map(|i| OutboundSms {
                to: format!("9665010{i:05}"),
                body: "season renewal open".into(),
            })
            .collect();
        let result = gw.send_bulk(&messages).await;
        assert_eq!(result.successful, 1001);
        assert_eq!(primary.batch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(primary.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bulk_heterogeneous_bodies_sequential() {
        let primary = MockProvider::new("primary-sms", true, Behavior::Succeed);
        let gw = gateway(primary.clone(), None);

        let messages: Vec<OutboundSms> = (0..3)
            .map(|i| OutboundSms {
                to: format!("05011111{i}1"),
                body: format!("personal message {i}"),
            })
            .collect();
        let result = gw.send_bulk(&messages).await;
        assert_eq!(result.successful, 3);
        assert_eq!(primary.batch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(primary.send_calls.load(Ordering::SeqCst), 3);
    }

    fn personal_messages(n: usize) -> Vec<OutboundSms> {
        (0..n)
            .map(|i| OutboundSms {
                to: format!("9665011{i:05}"),
                body: format!("personal message {i}"),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_sequential_batch_not_paced() {
        let primary = MockProvider::new("primary-sms", false, Behavior::Succeed);
        let gw = SmsGateway::new(
            primary.clone() as Arc<dyn SmsProvider>,
            None,
            "966".into(),
            0.05,
            Duration::from_secs(60),
        );

        // At the threshold (10), no pacing sleeps: virtual time stands still.
        let start = tokio::time::Instant::now();
        let result = gw.send_bulk(&personal_messages(10)).await;
        assert_eq!(result.successful, 10);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_sequential_batch_paced_between_sends() {
        let primary = MockProvider::new("primary-sms", false, Behavior::Succeed);
        let gw = SmsGateway::new(
            primary.clone() as Arc<dyn SmsProvider>,
            None,
            "966".into(),
            0.05,
            Duration::from_secs(60),
        );

        // 11 messages → 10 pacing delays (none before the first send).
        let start = tokio::time::Instant::now();
        let result = gw.send_bulk(&personal_messages(11)).await;
        assert_eq!(result.successful, 11);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_bulk_rejection_does_not_abort_batch() {
        let primary = MockProvider::new("primary-sms", false, Behavior::RejectRecipient);
        let gw = gateway(primary.clone(), None);

        let messages: Vec<OutboundSms> = (0..3)
            .map(|i| OutboundSms {
                to: format!("05011111{i}1"),
                body: format!("msg {i}"),
            })
            .collect();
        let result = gw.send_bulk(&messages).await;
        assert_eq!(result.failed, 3);
        assert_eq!(result.errors.len(), 3);
        // Every recipient was still attempted.
        assert_eq!(primary.send_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bulk_invalid_number_dropped_without_provider_call() {
        let primary = MockProvider::new("primary-sms", true, Behavior::Succeed);
        let gw = gateway(primary.clone(), None);

        let messages = vec![
            OutboundSms { to: "0501111111".into(), body: "hi".into() },
            OutboundSms { to: "nonsense".into(), body: "hi".into() },
        ];
        let result = gw.send_bulk(&messages).await;
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(primary.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bulk_cost_aggregation() {
        let primary = MockProvider::new("primary-sms", true, Behavior::Succeed);
        let gw = gateway(primary, None);

        let messages: Vec<OutboundSms> = (0..4)
            .map(|i| OutboundSms {
                to: format!("05011111{i}1"),
                body: "short".into(),
            })
            .collect();
        let result = gw.send_bulk(&messages).await;
        // 1 segment * 0.05 * 4 recipients
        assert!((result.total_cost - 0.20).abs() < 1e-9);
    }
}
