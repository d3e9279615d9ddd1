//! Acknowledging deliveries and publishing completion records.

use async_trait::async_trait;

use crate::transport::CompletionRecord;

/// Errors talking to the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Acknowledgment failed: {0}")]
    Ack(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Acknowledges that a delivered job has been handled.
#[async_trait]
pub trait DeliveryReceipt: Send + Sync {
    async fn ack(&self) -> Result<(), TransportError>;
}

/// Publishes completion records for successful jobs.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, record: &CompletionRecord) -> Result<(), TransportError>;
}

/// Receipt for transports whose reply doubles as the acknowledgment (HTTP,
/// CLI).
pub struct ImmediateReceipt;

#[async_trait]
impl DeliveryReceipt for ImmediateReceipt {
    async fn ack(&self) -> Result<(), TransportError> {
        tracing::debug!("Delivery acknowledged");
        Ok(())
    }
}

/// Publisher that only logs the record.
pub struct LogPublisher;

#[async_trait]
impl ResultPublisher for LogPublisher {
    async fn publish(&self, record: &CompletionRecord) -> Result<(), TransportError> {
        tracing::info!(
            task_id = record.task_id,
            timestamp = %record.timestamp,
            "Job complete"
        );
        Ok(())
    }
}

/// Publisher that POSTs the record as JSON.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ResultPublisher for WebhookPublisher {
    async fn publish(&self, record: &CompletionRecord) -> Result<(), TransportError> {
        let response = self.client.post(&self.url).json(record).send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Publish(format!(
                "{} answered {}",
                self.url,
                response.status()
            )));
        }

        tracing::debug!(task_id = record.task_id, url = %self.url, "Completion record published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_immediate_receipt_and_log_publisher() {
        assert!(ImmediateReceipt.ack().await.is_ok());
        let record = CompletionRecord {
            task_id: 1,
            timestamp: json!("now"),
        };
        assert!(LogPublisher.publish(&record).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_publisher_reports_unreachable_endpoint() {
        // Port 9 (discard) on loopback is not expected to run an HTTP server.
        let publisher = WebhookPublisher::new("http://127.0.0.1:9/results");
        let record = CompletionRecord {
            task_id: 1,
            timestamp: json!("now"),
        };
        assert!(publisher.publish(&record).await.is_err());
    }
}
