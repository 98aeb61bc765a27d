use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::{Ms, now_ms};
use crate::observability::OUTBOX_PROCESSED_TOTAL;
use crate::outbox::{OutboxLog, OutboxSource};
use crate::store::StoreError;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Mark every pending `event_type` event processed. Returns how many were marked.
///
/// Delivery to patients (email, SMS) happens downstream of the processed marker.
pub async fn pump_once(
    outbox: &dyn OutboxSource,
    event_type: &str,
    now: Ms,
) -> Result<usize, StoreError> {
    let mut marked = 0;
    for event in outbox.pending(event_type).await? {
        if outbox.mark_processed(event.id, now).await? {
            debug!(id = %event.id, aggregate = %event.aggregate_id, "outbox event processed");
            marked += 1;
        }
    }
    metrics::counter!(OUTBOX_PROCESSED_TOTAL).increment(marked as u64);
    Ok(marked)
}

/// Background task that drains the outbox every `every`.
pub async fn run_pump(outbox: Arc<dyn OutboxSource>, every: Duration, event_type: &'static str) {
    let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
    loop {
        interval.tick().await;
        match pump_once(outbox.as_ref(), event_type, now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("pumped {n} {event_type} events"),
            Err(e) => warn!("outbox pump failed: {e}"),
        }
    }
}

/// Background task that rewrites the outbox log once enough records pile up.
pub async fn run_compactor(log: Arc<OutboxLog>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appended = log.appends_since_compact().await;
        if appended < threshold {
            continue;
        }
        match log.compact().await {
            Ok(()) => info!("compacted outbox after {appended} appends, {} live events", log.len().await),
            Err(e) => warn!("outbox compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{APPOINTMENT_CANCELLED, MemoryOutbox, OutboxEvent, OutboxSink};
    use ulid::Ulid;

    #[tokio::test]
    async fn marks_only_matching_pending_events() {
        let outbox = MemoryOutbox::new();
        for _ in 0..3 {
            outbox
                .append(OutboxEvent::new(APPOINTMENT_CANCELLED, Ulid::new(), "{}".into()))
                .await
                .unwrap();
        }
        outbox
            .append(OutboxEvent::new("AppointmentBooked", Ulid::new(), "{}".into()))
            .await
            .unwrap();

        assert_eq!(pump_once(&outbox, APPOINTMENT_CANCELLED, 42).await.unwrap(), 3);
        // second pass has nothing left
        assert_eq!(pump_once(&outbox, APPOINTMENT_CANCELLED, 43).await.unwrap(), 0);

        let events = outbox.events().await;
        let processed: Vec<_> = events.iter().filter_map(|e| e.processed_at).collect();
        assert_eq!(processed, vec![42, 42, 42]);
        assert_eq!(outbox.pending("AppointmentBooked").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_pump_drains_on_tick() {
        let outbox = Arc::new(MemoryOutbox::new());
        outbox
            .append(OutboxEvent::new(APPOINTMENT_CANCELLED, Ulid::new(), "{}".into()))
            .await
            .unwrap();

        let task = tokio::spawn(run_pump(
            outbox.clone(),
            Duration::from_secs(30),
            APPOINTMENT_CANCELLED,
        ));
        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(outbox.pending(APPOINTMENT_CANCELLED).await.unwrap().is_empty());

        outbox
            .append(OutboxEvent::new(APPOINTMENT_CANCELLED, Ulid::new(), "{}".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(outbox.pending(APPOINTMENT_CANCELLED).await.unwrap().is_empty());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn compactor_drops_processed_events() {
        let dir = std::env::temp_dir().join(format!("clinic_sched_test_pump_{}", Ulid::new()));
        let log = Arc::new(OutboxLog::open(&dir.join("outbox.log")).unwrap());
        for _ in 0..3 {
            log.append(OutboxEvent::new(APPOINTMENT_CANCELLED, Ulid::new(), "{}".into()))
                .await
                .unwrap();
        }
        assert_eq!(pump_once(log.as_ref(), APPOINTMENT_CANCELLED, 1).await.unwrap(), 3);
        assert_eq!(log.len().await, 3);

        let task = tokio::spawn(run_compactor(log.clone(), 3));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(log.is_empty().await);
        assert_eq!(log.appends_since_compact().await, 0);
        task.abort();

        // reopening sees the compacted log
        drop(log);
        let reopened = OutboxLog::open(&dir.join("outbox.log")).unwrap();
        assert!(reopened.is_empty().await);
    }
}
