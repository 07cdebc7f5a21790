use futures::future::join_all;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{self, Sink};

use super::Engine;
use super::store::LedgerKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub sink: SinkKind,
    pub url: String,
    pub status: DeliveryStatus,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

/// Outcome of one fan-out. `skipped` lists sinks the ledger already covered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: Vec<SinkReport>,
    pub skipped: Vec<SinkKind>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.count(DeliveryStatus::Sent)
    }

    pub fn failed(&self) -> usize {
        self.count(DeliveryStatus::Failed)
    }

    fn count(&self, status: DeliveryStatus) -> usize {
        self.attempted.iter().filter(|r| r.status == status).count()
    }
}

impl Engine {
    /// Global sink when configured and toggled on; professional sink when
    /// active and subscribed to `event`.
    pub fn resolve_sinks(&self, professional_id: Ulid, event: EventKind) -> Vec<Sink> {
        let mut sinks = Vec::with_capacity(2);
        let global = self.store.settings().webhook;
        if global.enabled_for(event)
            && let Some(url) = global.url.filter(|u| !u.is_empty())
        {
            sinks.push(Sink {
                kind: SinkKind::Global,
                url,
            });
        }
        if let Some(hook) = self.store.professional_webhook(&professional_id)
            && hook.active
            && !hook.url.is_empty()
            && hook.events.contains(&event)
        {
            sinks.push(Sink {
                kind: SinkKind::Professional,
                url: hook.url,
            });
        }
        sinks
    }

    /// Deliver `payload` and record each attempt. Sink failures stay inside
    /// the report.
    ///
    /// Lifecycle events go to every resolved sink concurrently. Ledgered events
    /// (reminders and follow-ups) hold one claim per booking and event: sinks
    /// are tried in order and the first successful delivery ends the attempt,
    /// so a booking never has two sent records for the same reminder.
    pub async fn dispatch(&self, booking: &Booking, payload: &WebhookPayload) -> DispatchReport {
        let sinks = self.resolve_sinks(booking.professional_id, payload.event);
        if sinks.is_empty() {
            return DispatchReport::default();
        }
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(booking_id = %booking.id, error = %e, "webhook payload encoding failed");
                return DispatchReport::default();
            }
        };

        if payload.event.dedup() == Dedup::Never {
            let attempts = sinks
                .into_iter()
                .map(|sink| self.attempt(booking, payload.event, sink, body.clone()));
            return DispatchReport {
                attempted: join_all(attempts).await,
                skipped: Vec::new(),
            };
        }

        let key = LedgerKey {
            booking_id: booking.id,
            event: payload.event,
        };
        if !self.store.try_claim(key) {
            tracing::debug!(booking_id = %booking.id, event = payload.event.as_str(), "ledger claim held, skipping");
            metrics::counter!(crate::observability::LEDGER_SKIPS_TOTAL, "event" => payload.event.as_str())
                .increment(1);
            return DispatchReport {
                attempted: Vec::new(),
                skipped: sinks.iter().map(|s| s.kind).collect(),
            };
        }

        let mut report = DispatchReport::default();
        let mut outcome = DeliveryStatus::Failed;
        let mut remaining = sinks.into_iter();
        for sink in remaining.by_ref() {
            let attempt = self.attempt(booking, payload.event, sink, body.clone()).await;
            let delivered = attempt.status == DeliveryStatus::Sent;
            report.attempted.push(attempt);
            if delivered {
                outcome = DeliveryStatus::Sent;
                break;
            }
        }
        report.skipped.extend(remaining.map(|s| s.kind));
        self.store.settle(key, outcome);
        report
    }

    async fn attempt(&self, booking: &Booking, event: EventKind, sink: Sink, body: String) -> SinkReport {
        let record = notify::deliver(
            self.sender.as_ref(),
            &sink,
            booking.id,
            event,
            body,
            self.clock.now(),
        )
        .await;
        let report = SinkReport {
            sink: sink.kind,
            url: sink.url,
            status: record.status,
            http_status: record.http_status,
            error: record.error.clone(),
        };
        if let Err(e) = self.persist_and_apply(Event::NotificationRecorded { record }).await {
            tracing::error!(booking_id = %booking.id, error = %e, "failed to journal notification record");
        }
        report
    }
}
