mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::resolve_rule;
pub use conflict::active_overlaps;
pub use error::{ConflictReason, EngineError, Entity, ErrorKind};
pub use queries::{SlotBoard, compile_professional_slots};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::config::Config;
use crate::notify::NotifyHub;
use crate::outbox::OutboxSink;
use crate::store::{AppointmentStore, BlockStore, Directory};

/// Availability-and-booking engine. Stateless apart from the admission locks;
/// every operation reads its inputs fresh from the collaborators.
pub struct Engine {
    appointments: Arc<dyn AppointmentStore>,
    blocks: Arc<dyn BlockStore>,
    directory: Arc<dyn Directory>,
    outbox: Arc<dyn OutboxSink>,
    notify: Arc<NotifyHub>,
    config: Config,
    /// Professional id → admission lock. Overlap count and insert happen under it.
    /// Entries live only while some task holds or awaits the lock.
    booking_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        blocks: Arc<dyn BlockStore>,
        directory: Arc<dyn Directory>,
        outbox: Arc<dyn OutboxSink>,
        notify: Arc<NotifyHub>,
        config: Config,
    ) -> Self {
        Self {
            appointments,
            blocks,
            directory,
            outbox,
            notify,
            config,
            booking_locks: DashMap::new(),
        }
    }

    /// Wire every repository role to a single store.
    pub fn with_store<S>(
        store: Arc<S>,
        outbox: Arc<dyn OutboxSink>,
        notify: Arc<NotifyHub>,
        config: Config,
    ) -> Self
    where
        S: AppointmentStore + BlockStore + Directory + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store,
            outbox,
            notify,
            config,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    /// Serialize against every other admission or status change of `professional_id`.
    async fn admit(&self, professional_id: Ulid) -> Admission<'_> {
        let lock = self
            .booking_locks
            .entry(professional_id)
            .or_default()
            .value()
            .clone();
        Admission {
            locks: &self.booking_locks,
            professional_id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held while one professional's appointments are checked and written.
struct Admission<'a> {
    locks: &'a DashMap<Ulid, Arc<Mutex<()>>>,
    professional_id: Ulid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own handle left: nobody is waiting.
        self.locks
            .remove_if(&self.professional_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
