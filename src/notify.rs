use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use ulid::Ulid;

/// A message pushed to a patient's live subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event: String,
    pub payload_json: String,
}

/// Receiving end handed to a transport (SSE, websocket...). Dropping it unsubscribes
/// on the next broadcast.
pub struct Subscription {
    pub patient_id: Ulid,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

/// Patient → live subscriber registry. One per engine, never global.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, Vec<mpsc::UnboundedSender<Notification>>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, patient_id: Ulid) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.entry(patient_id).or_default().push(tx);
        metrics::gauge!(crate::observability::NOTIFY_SUBSCRIBERS).increment(1.0);
        Subscription { patient_id, rx }
    }

    /// Deliver to every live subscriber of `patient_id`. Subscribers whose receiver is
    /// gone are dropped. Returns the number of deliveries.
    pub fn broadcast(&self, patient_id: Ulid, event: &str, payload_json: &str) -> usize {
        let Some(mut senders) = self.channels.get_mut(&patient_id) else {
            return 0;
        };
        let msg = Notification {
            event: event.to_string(),
            payload_json: payload_json.to_string(),
        };
        let before = senders.len();
        senders.retain(|tx| tx.send(msg.clone()).is_ok());
        let delivered = senders.len();
        let pruned = before - delivered;
        let now_empty = senders.is_empty();
        drop(senders);

        if pruned > 0 {
            debug!("pruned {pruned} dead subscribers for patient {patient_id}");
            metrics::gauge!(crate::observability::NOTIFY_SUBSCRIBERS).decrement(pruned as f64);
        }
        if now_empty {
            self.channels.remove_if(&patient_id, |_, v| v.is_empty());
        }
        delivered
    }

    pub fn subscriber_count(&self, patient_id: &Ulid) -> usize {
        self.channels.get(patient_id).map_or(0, |v| v.len())
    }
}
