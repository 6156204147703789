//! Delivery handler seam: what the worker calls to push a row out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::message::OutboxMessage;

/// Performs one external delivery of an outbox row.
///
/// Returning `Ok` marks the row SENT; any error counts as a failed attempt.
/// Implementations may be called again for the same row (at-least-once), so
/// the receiving side must tolerate duplicates.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, message: &OutboxMessage) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: DeliveryHandler + ?Sized> DeliveryHandler for Arc<T> {
    async fn deliver(&self, message: &OutboxMessage) -> Result<(), DeliveryError> {
        (**self).deliver(message).await
    }
}

/// Dispatches each row to the handler registered for its topic.
#[derive(Clone, Default)]
pub struct TopicRouter {
    routes: HashMap<String, Arc<dyn DeliveryHandler>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for a topic.
    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn DeliveryHandler>) {
        self.routes.insert(topic.into(), handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn route(mut self, topic: impl Into<String>, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.register(topic, handler);
        self
    }

    /// Returns the registered topics, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

#[async_trait]
impl DeliveryHandler for TopicRouter {
    async fn deliver(&self, message: &OutboxMessage) -> Result<(), DeliveryError> {
        let handler = self
            .routes
            .get(&message.topic)
            .ok_or_else(|| DeliveryError::NoRoute(message.topic.clone()))?;
        handler.deliver(message).await
    }
}

/// POSTs the row payload as JSON to a fixed URL.
///
/// Connection failures, timeouts and 5xx responses are retryable delivery
/// errors. 2xx and 4xx both count as delivered: a 4xx is the collaborator's
/// business answer (already recorded on its side), not a transport problem.
#[derive(Clone)]
pub struct HttpDeliveryHandler {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpDeliveryHandler {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the per-request timeout (default 10 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryHandler for HttpDeliveryHandler {
    #[tracing::instrument(skip(self, message), fields(id = %message.id, topic = %message.topic, url = %self.url))]
    async fn deliver(&self, message: &OutboxMessage) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&message.payload)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "delivery response");

        if status.is_server_error() {
            return Err(DeliveryError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        if status.is_client_error() {
            tracing::info!(status = status.as_u16(), "collaborator declined message");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::message::{OutboxId, OutboxStatus};

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryHandler for CountingHandler {
        async fn deliver(&self, _message: &OutboxMessage) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message(topic: &str) -> OutboxMessage {
        OutboxMessage {
            id: OutboxId::new(7),
            event_type: None,
            topic: topic.to_string(),
            payload: serde_json::json!({}),
            status: OutboxStatus::InProgress,
            created_at: Utc::now(),
            updated_at: None,
            last_error: None,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn router_dispatches_by_topic() {
        let reserve = Arc::new(CountingHandler::default());
        let charge = Arc::new(CountingHandler::default());
        let router = TopicRouter::new()
            .route("inventory.reserve", reserve.clone())
            .route("payment.charge", charge.clone());

        router.deliver(&message("payment.charge")).await.unwrap();
        router.deliver(&message("payment.charge")).await.unwrap();
        router.deliver(&message("inventory.reserve")).await.unwrap();

        assert_eq!(reserve.calls.load(Ordering::SeqCst), 1);
        assert_eq!(charge.calls.load(Ordering::SeqCst), 2);
        assert_eq!(router.topics(), vec!["inventory.reserve", "payment.charge"]);
    }

    #[tokio::test]
    async fn router_rejects_unknown_topic() {
        let router = TopicRouter::new();
        let err = router.deliver(&message("nowhere")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NoRoute(topic) if topic == "nowhere"));
    }

    mod http {
        use axum::Router;
        use axum::http::StatusCode;
        use axum::routing::post;

        use super::*;

        async fn serve() -> String {
            let app = Router::new()
                .route("/ok", post(|| async { StatusCode::OK }))
                .route("/declined", post(|| async { StatusCode::BAD_REQUEST }))
                .route("/broken", post(|| async { StatusCode::SERVICE_UNAVAILABLE }));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{addr}")
        }

        #[tokio::test]
        async fn success_and_client_errors_count_as_delivered() {
            let base = serve().await;
            let client = reqwest::Client::new();

            let ok = HttpDeliveryHandler::new(client.clone(), format!("{base}/ok"));
            assert!(ok.deliver(&message("t")).await.is_ok());

            let declined = HttpDeliveryHandler::new(client, format!("{base}/declined"));
            assert!(declined.deliver(&message("t")).await.is_ok());
        }

        #[tokio::test]
        async fn server_errors_are_retryable() {
            let base = serve().await;
            let handler = HttpDeliveryHandler::new(reqwest::Client::new(), format!("{base}/broken"));
            let err = handler.deliver(&message("t")).await.unwrap_err();
            assert!(matches!(err, DeliveryError::UnexpectedStatus { status: 503, .. }));
        }

        #[tokio::test]
        async fn unreachable_endpoint_is_transport_error() {
            // Bind then drop to get a port nothing listens on
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let handler = HttpDeliveryHandler::new(reqwest::Client::new(), format!("http://{addr}/x"))
                .with_timeout(Duration::from_secs(2));
            let err = handler.deliver(&message("t")).await.unwrap_err();
            assert!(matches!(err, DeliveryError::Transport(_)));
        }
    }
}
