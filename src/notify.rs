use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Post-commit broadcast of engine events.
///
/// The engine publishes only after an event is durable and applied, so
/// subscribers never see work that could still be rolled back.
pub struct NotifyHub {
    sender: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound message channel (email, WhatsApp, SMS...). Best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, message: &str) -> Result<(), NotifyError> {
        info!(to, "notification: {message}");
        Ok(())
    }
}

/// Recipient and text for events that warrant a message to the occupant.
pub fn message_for(event: &Event) -> Option<(String, String)> {
    let message = match event {
        Event::BookingReserved { booking } => {
            let c = booking.coordinate;
            Some((
                booking.occupant.phone.clone(),
                format!(
                    "Dear {}, your booking is confirmed. Room: {}, Bed: {}. Join date: {}.",
                    booking.occupant.name,
                    c.room_label(),
                    c.bed,
                    booking.occupant.join_date
                ),
            ))
        }
        Event::PaymentRecorded { payment } => Some((
            payment.phone.clone(),
            format!(
                "Dear {}, we received your payment of {}. Room: {}, Bed: {}.",
                payment.name, payment.amount, payment.room_label, payment.bed_label
            ),
        )),
        _ => None,
    };
    message.filter(|(to, _)| !to.is_empty() && to != "N/A")
}

/// Deliver a single message, swallowing the failure after logging it.
pub async fn deliver(notifier: &dyn Notifier, to: &str, message: &str) {
    if let Err(e) = notifier.notify(to, message).await {
        warn!("dropping notification to {to}: {e}");
        metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
    }
}

/// Background task: forward committed events to the notifier until the hub closes.
pub async fn run_dispatcher(mut rx: broadcast::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some((to, message)) = message_for(&event) {
                    deliver(notifier.as_ref(), &to, &message).await;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("notification dispatcher lagged, skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("notify hub closed, dispatcher exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::sync::Mutex;
    use ulid::Ulid;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, to: &str, message: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((to.into(), message.into()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _to: &str, _message: &str) -> Result<(), NotifyError> {
            Err(NotifyError("gateway down".into()))
        }
    }

    fn booking() -> Booking {
        Booking {
            id: Ulid::new(),
            coordinate: Coordinate::new(2, 3, 1),
            occupant: Occupant {
                name: "Kiran".into(),
                phone: "9876543210".into(),
                join_date: "2025-07-01".into(),
                ..Default::default()
            },
            user_id: "u7".into(),
            amount_paid: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let event = Event::BookingReleased {
            id: Ulid::new(),
            coordinate: Coordinate::new(1, 1, 1),
        };
        hub.send(&event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::PaymentDeleted {
            id: Ulid::new(),
            booking_id: None,
        });
    }

    #[test]
    fn reservation_message_names_room_and_bed() {
        let (to, msg) = message_for(&Event::BookingReserved { booking: booking() }).unwrap();
        assert_eq!(to, "9876543210");
        assert!(msg.contains("Kiran"));
        assert!(msg.contains("Room: 203, Bed: 1"));
    }

    #[test]
    fn no_message_for_unreachable_payer_or_other_events() {
        let payment = Payment {
            id: Ulid::new(),
            user_id: "admin".into(),
            booking_id: None,
            name: "Admin".into(),
            phone: "N/A".into(),
            room_label: "N/A".into(),
            bed_label: "N/A".into(),
            amount: 100,
            authorization_code: "X".into(),
            created_at: 0,
        };
        assert!(message_for(&Event::PaymentRecorded { payment }).is_none());
        assert!(
            message_for(&Event::BookingReleased {
                id: Ulid::new(),
                coordinate: Coordinate::new(1, 1, 1)
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn dispatcher_forwards_and_exits_when_hub_dropped() {
        let hub = NotifyHub::new();
        let recording = Arc::new(Recording::default());
        let task = tokio::spawn(run_dispatcher(hub.subscribe(), recording.clone()));

        hub.send(&Event::BookingReserved { booking: booking() });
        drop(hub);
        task.await.unwrap();

        let sent = recording.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "9876543210");
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed() {
        deliver(&Failing, "9876543210", "hello").await;
    }
}
