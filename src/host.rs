use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::engine::Engine;
use crate::model::now_ms;
use crate::notify::NotifyHub;
use crate::outbox::{APPOINTMENT_CANCELLED, OutboxLog};
use crate::pump;
use crate::store::{AppointmentStore, BlockStore, Directory, StoreError};

/// An engine plus the background work on its outbox. The engine, the pump and the
/// compactor all hold the same `OutboxLog`, so events the engine appends are pumped
/// without reopening the file.
pub struct Host {
    engine: Arc<Engine>,
    outbox: Arc<OutboxLog>,
    tasks: Vec<JoinHandle<()>>,
}

impl Host {
    /// Open the outbox at `config.outbox_path`, build the engine over `store` and spawn
    /// the pump and the compactor. Must be called inside a tokio runtime.
    pub fn start<S>(store: Arc<S>, config: Config) -> io::Result<Self>
    where
        S: AppointmentStore + BlockStore + Directory + 'static,
    {
        let outbox = Arc::new(OutboxLog::open(&config.outbox_path)?);
        let (every, threshold) = (config.pump_interval, config.compact_threshold);
        let engine = Arc::new(Engine::with_store(
            store,
            outbox.clone(),
            Arc::new(NotifyHub::new()),
            config,
        ));

        let tasks = vec![
            tokio::spawn(pump::run_pump(outbox.clone(), every, APPOINTMENT_CANCELLED)),
            tokio::spawn(pump::run_compactor(outbox.clone(), threshold)),
        ];
        Ok(Self {
            engine,
            outbox,
            tasks,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn outbox(&self) -> &Arc<OutboxLog> {
        &self.outbox
    }

    /// Stop the background tasks, then drain whatever is still pending.
    pub async fn shutdown(self) -> Result<usize, StoreError> {
        for task in &self.tasks {
            task.abort();
        }
        let drained = pump::pump_once(self.outbox.as_ref(), APPOINTMENT_CANCELLED, now_ms()).await?;
        info!("drained {drained} events on shutdown");
        Ok(drained)
    }
}
