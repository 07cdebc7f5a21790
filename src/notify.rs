use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

/// Upper bound on a single outbound webhook call.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// One resolved webhook destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
    pub kind: SinkKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound transport. Errors are transport failures; non-2xx statuses come back as `Ok`.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn post_json(&self, url: &str, body: &str) -> Result<SenderResponse, String>;
}

pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpSender {
    async fn post_json(&self, url: &str, body: &str) -> Result<SenderResponse, String> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(SenderResponse { status, body })
    }
}

fn capture(body: String) -> Option<ResponseBody> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => Some(ResponseBody::Json(value.to_string())),
        Err(_) => Some(ResponseBody::Text(body)),
    }
}

/// Post `payload` to one sink and describe what happened. Never fails:
/// timeouts, transport errors and non-2xx answers all become a failed record.
pub async fn deliver(
    sender: &dyn WebhookSender,
    sink: &Sink,
    booking_id: Ulid,
    event: EventKind,
    payload: String,
    recorded_at: NaiveDateTime,
) -> NotificationRecord {
    let started = Instant::now();
    let result = tokio::time::timeout(WEBHOOK_TIMEOUT, sender.post_json(&sink.url, &payload)).await;
    metrics::histogram!(crate::observability::WEBHOOK_DURATION_SECONDS, "sink" => sink.kind.as_str())
        .record(started.elapsed().as_secs_f64());

    let (status, response, http_status, error) = match result {
        Ok(Ok(resp)) if (200..300).contains(&resp.status) => {
            (DeliveryStatus::Sent, capture(resp.body), Some(resp.status), None)
        }
        Ok(Ok(resp)) => {
            let err = format!("HTTP {}", resp.status);
            (DeliveryStatus::Failed, capture(resp.body), Some(resp.status), Some(err))
        }
        Ok(Err(e)) => (DeliveryStatus::Failed, None, None, Some(e)),
        Err(_) => (
            DeliveryStatus::Failed,
            None,
            None,
            Some(format!("timed out after {}s", WEBHOOK_TIMEOUT.as_secs())),
        ),
    };

    metrics::counter!(
        crate::observability::WEBHOOK_DELIVERIES_TOTAL,
        "sink" => sink.kind.as_str(),
        "event" => event.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
    match &error {
        None => tracing::info!(%booking_id, event = event.as_str(), sink = sink.kind.as_str(), "webhook delivered"),
        Some(e) => tracing::warn!(%booking_id, event = event.as_str(), sink = sink.kind.as_str(), url = %sink.url, error = %e, "webhook delivery failed"),
    }

    NotificationRecord {
        id: Ulid::new(),
        booking_id,
        event,
        sink: sink.kind,
        url: sink.url.clone(),
        status,
        payload,
        response,
        http_status,
        error,
        recorded_at,
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Behavior {
        Reply(u16, String),
        Refuse(String),
        Hang,
    }

    /// Captures every post; replies 200 `{"ok":true}` unless told otherwise per URL.
    #[derive(Default)]
    pub struct RecordingSender {
        calls: Mutex<Vec<(String, serde_json::Value)>>,
        behaviors: Mutex<HashMap<String, Behavior>>,
    }

    impl RecordingSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn behave(&self, url: &str, behavior: Behavior) {
            self.behaviors.lock().unwrap().insert(url.to_string(), behavior);
        }

        pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, url: &str) -> Vec<serde_json::Value> {
            self.calls()
                .into_iter()
                .filter(|(u, _)| u == url)
                .map(|(_, body)| body)
                .collect()
        }
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn post_json(&self, url: &str, body: &str) -> Result<SenderResponse, String> {
            let value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
            self.calls.lock().unwrap().push((url.to_string(), value));
            let behavior = self.behaviors.lock().unwrap().get(url).cloned();
            match behavior {
                None => Ok(SenderResponse {
                    status: 200,
                    body: r#"{"ok":true}"#.into(),
                }),
                Some(Behavior::Reply(status, body)) => Ok(SenderResponse { status, body }),
                Some(Behavior::Refuse(e)) => Err(e),
                Some(Behavior::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err("unreachable".into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Behavior, RecordingSender};
    use super::*;

    fn sink(url: &str) -> Sink {
        Sink {
            kind: SinkKind::Global,
            url: url.into(),
        }
    }

    fn at() -> NaiveDateTime {
        CivilDate::from_ymd(2025, 12, 10)
            .unwrap()
            .at(CivilTime::hm(12, 0).unwrap())
    }

    #[tokio::test]
    async fn success_parses_json_response() {
        let sender = RecordingSender::new();
        let record = deliver(&sender, &sink("http://hook"), Ulid::new(), EventKind::Created, "{}".into(), at()).await;
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.http_status, Some(200));
        assert_eq!(record.response, Some(ResponseBody::Json(r#"{"ok":true}"#.into())));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn non_2xx_is_failed_with_raw_body() {
        let sender = RecordingSender::new();
        sender.behave("http://hook", Behavior::Reply(502, "bad gateway".into()));
        let record = deliver(&sender, &sink("http://hook"), Ulid::new(), EventKind::Created, "{}".into(), at()).await;
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("HTTP 502"));
        assert_eq!(record.response, Some(ResponseBody::Text("bad gateway".into())));
    }

    #[tokio::test]
    async fn transport_error_is_recorded() {
        let sender = RecordingSender::new();
        sender.behave("http://hook", Behavior::Refuse("connection refused".into()));
        let record = deliver(&sender, &sink("http://hook"), Ulid::new(), EventKind::Canceled, "{}".into(), at()).await;
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("connection refused"));
        assert!(record.response.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sink_times_out() {
        let sender = RecordingSender::new();
        sender.behave("http://hook", Behavior::Hang);
        let record = deliver(&sender, &sink("http://hook"), Ulid::new(), EventKind::Created, "{}".into(), at()).await;
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("timed out after 10s"));
    }
}
