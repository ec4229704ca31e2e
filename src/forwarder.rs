//! decodes webhook payloads and relays each contained alert to the broker
use std::sync::Arc;

use thiserror::Error;

use crate::{
    alert::{AlertBatch, DecodeError},
    metrics::Metrics,
    stomp::AlertPublisher,
};

/// failure of one end-to-end forward call
#[derive(Debug, Error)]
pub enum ForwardError {
    /// the payload never yielded a batch, nothing was published
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// at least one alert of the batch could not be published
    #[error("{failed} of {total} alerts failed to publish")]
    Publish { failed: usize, total: usize },
}

/// forwards every alert of a webhook batch onto a broker topic
pub struct Forwarder<P> {
    publisher: P,
    metrics: Arc<Metrics>,
}

impl<P: AlertPublisher> Forwarder<P> {
    pub fn new(publisher: P, metrics: Arc<Metrics>) -> Self {
        Self { publisher, metrics }
    }

    /// decode `payload` and publish each alert onto `topic`, in arrival order
    ///
    /// a failed publish does not abort the remaining alerts of the batch, it
    /// only fails the overall call once every alert was attempted. publishing
    /// is strictly sequential so the broker sees alerts in payload order.
    pub async fn forward(&self, topic: &str, payload: &[u8]) -> Result<(), ForwardError> {
        let batch = AlertBatch::decode(payload)?;

        let total = batch.alerts.len();
        let mut failed = 0_usize;

        for alert in &batch.alerts {
            match self.publisher.publish(topic, alert).await {
                Ok(()) => {
                    self.metrics.record_publish_success();
                    tracing::debug!(topic, "published alert");
                }
                Err(err) => {
                    failed += 1;
                    self.metrics.record_publish_failure();
                    tracing::error!(topic, error = %err, "failed to publish alert");
                }
            }
        }

        if failed > 0 {
            return Err(ForwardError::Publish { failed, total });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex};

    use async_trait::async_trait;
    use prometheus::Registry;

    use super::*;
    use crate::{alert::Alert, stomp::PublishError};

    /// records publish calls and fails the attempts listed in `fail_on`
    struct StubPublisher {
        fail_on: Vec<usize>,
        published: Mutex<Vec<(String, String)>>,
    }

    impl StubPublisher {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                fail_on,
                published: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AlertPublisher for StubPublisher {
        async fn publish(&self, topic: &str, alert: &Alert) -> Result<(), PublishError> {
            let mut published = self.published.lock().unwrap();
            let attempt = published.len();

            published.push((
                topic.to_string(),
                alert.labels.get("alertname").cloned().unwrap_or_default(),
            ));

            if self.fail_on.contains(&attempt) {
                return Err(PublishError::Send(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "broken pipe",
                )));
            }

            Ok(())
        }
    }

    fn forwarder(fail_on: Vec<usize>) -> Forwarder<StubPublisher> {
        let metrics = Arc::new(Metrics::new(&Registry::new()).unwrap());
        Forwarder::new(StubPublisher::new(fail_on), metrics)
    }

    fn batch(names: &[&str]) -> Vec<u8> {
        let alerts: Vec<serde_json::Value> = names
            .iter()
            .map(|name| serde_json::json!({ "labels": { "alertname": name } }))
            .collect();
        serde_json::to_vec(&serde_json::json!({ "alerts": alerts })).unwrap()
    }

    fn publish_count(forwarder: &Forwarder<StubPublisher>, result: &str) -> u64 {
        forwarder
            .metrics
            .broker_requests
            .with_label_values(&[result])
            .get()
    }

    #[tokio::test]
    async fn empty_batch_succeeds_without_publishing() {
        let forwarder = forwarder(vec![]);

        forwarder.forward("kubernetes", &batch(&[])).await.unwrap();

        assert!(forwarder.publisher.published.lock().unwrap().is_empty());
        assert_eq!(publish_count(&forwarder, "ok"), 0);
        assert_eq!(publish_count(&forwarder, "not_ok"), 0);
    }

    #[tokio::test]
    async fn publishes_every_alert_in_arrival_order() {
        let forwarder = forwarder(vec![]);

        forwarder
            .forward("kubernetes", &batch(&["First", "Second", "Third"]))
            .await
            .unwrap();

        let published = forwarder.publisher.published.lock().unwrap();
        assert_eq!(
            *published,
            [
                ("kubernetes".to_string(), "First".to_string()),
                ("kubernetes".to_string(), "Second".to_string()),
                ("kubernetes".to_string(), "Third".to_string()),
            ]
        );
        assert_eq!(publish_count(&forwarder, "ok"), 3);
    }

    #[tokio::test]
    async fn decode_failure_short_circuits() {
        let forwarder = forwarder(vec![]);

        let err = forwarder
            .forward("kubernetes", br#"{"alerts":[{"labels":"#)
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Decode(_)));
        assert!(forwarder.publisher.published.lock().unwrap().is_empty());
        assert_eq!(publish_count(&forwarder, "not_ok"), 0);
    }

    #[tokio::test]
    async fn failed_publish_does_not_abort_remaining_alerts() {
        let forwarder = forwarder(vec![1]);

        let err = forwarder
            .forward("kubernetes", &batch(&["First", "Second", "Third"]))
            .await
            .unwrap_err();

        match err {
            ForwardError::Publish { failed, total } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected publish failure, got {:?}", other),
        }

        assert_eq!(forwarder.publisher.published.lock().unwrap().len(), 3);
        assert_eq!(publish_count(&forwarder, "ok"), 2);
        assert_eq!(publish_count(&forwarder, "not_ok"), 1);
    }
}
