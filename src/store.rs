use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Failure of a backing store. The engine propagates it untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;

    async fn insert(&self, appointment: Appointment) -> Result<(), StoreError>;

    /// Full replace by id.
    async fn update(&self, appointment: Appointment) -> Result<(), StoreError>;

    /// Non-cancelled appointments of a professional overlapping `window`, ordered by start.
    async fn overlapping_for_professional(
        &self,
        professional_id: Ulid,
        window: Span,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Non-cancelled appointments of a patient overlapping `window`, ordered by start.
    async fn overlapping_for_patient(
        &self,
        patient_id: Ulid,
        window: Span,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Every appointment of a patient, any status, ordered by start.
    async fn list_for_patient(&self, patient_id: Ulid) -> Result<Vec<Appointment>, StoreError>;

    async fn count_active_overlapping(
        &self,
        professional_id: Ulid,
        window: Span,
    ) -> Result<usize, StoreError> {
        Ok(self
            .overlapping_for_professional(professional_id, window)
            .await?
            .len())
    }

    async fn exists_active_overlapping_for_patient(
        &self,
        patient_id: Ulid,
        window: Span,
    ) -> Result<bool, StoreError> {
        Ok(!self
            .overlapping_for_patient(patient_id, window)
            .await?
            .is_empty())
    }
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Open and closed blocks of a professional overlapping `window`, ordered by start.
    async fn overlapping_blocks(
        &self,
        professional_id: Ulid,
        window: Span,
    ) -> Result<Vec<AvailabilityBlock>, StoreError>;

    async fn insert_block(&self, block: AvailabilityBlock) -> Result<(), StoreError>;

    /// Returns false if the block did not exist.
    async fn delete_block(&self, id: Ulid) -> Result<bool, StoreError>;
}

/// Read-only lookup of professionals and patients.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn professional(&self, id: Ulid) -> Result<Option<Professional>, StoreError>;

    async fn patient(&self, id: Ulid) -> Result<Option<Patient>, StoreError>;

    async fn professionals(&self, ids: &[Ulid]) -> Result<Vec<Professional>, StoreError>;

    async fn patients(&self, ids: &[Ulid]) -> Result<Vec<Patient>, StoreError>;
}

// ── Timeline ─────────────────────────────────────────────────────

pub trait Timed {
    fn id(&self) -> Ulid;
    fn span(&self) -> Span;
}

impl Timed for Appointment {
    fn id(&self) -> Ulid {
        self.id
    }
    fn span(&self) -> Span {
        self.span
    }
}

impl Timed for AvailabilityBlock {
    fn id(&self) -> Ulid {
        self.id
    }
    fn span(&self) -> Span {
        self.span
    }
}

/// Items of one owner kept sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct Timeline<T> {
    items: Vec<T>,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Timed> Timeline<T> {
    /// Insert maintaining sort order; equal starts keep insertion order.
    pub fn insert(&mut self, item: T) {
        let start = item.span().start;
        let pos = self.items.partition_point(|i| i.span().start <= start);
        self.items.insert(pos, item);
    }

    /// Replace the item with the same id, or insert it. Keeps its slot when the start
    /// is unchanged. Returns the previous item.
    pub fn upsert(&mut self, item: T) -> Option<T> {
        let id = item.id();
        match self.items.iter().position(|i| i.id() == id) {
            Some(pos) if self.items[pos].span().start == item.span().start => {
                Some(std::mem::replace(&mut self.items[pos], item))
            }
            Some(pos) => {
                let old = self.items.remove(pos);
                self.insert(item);
                Some(old)
            }
            None => {
                self.insert(item);
                None
            }
        }
    }

    pub fn remove(&mut self, id: Ulid) -> Option<T> {
        let pos = self.items.iter().position(|i| i.id() == id)?;
        Some(self.items.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&T> {
        self.items.iter().find(|i| i.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &T> {
        let right_bound = self.items.partition_point(|i| i.span().start < query.end);
        let query = *query;
        self.items[..right_bound]
            .iter()
            .filter(move |i| i.span().end > query.start)
    }
}

// ── In-memory implementation ─────────────────────────────────────

pub struct InMemoryStore {
    appointments: DashMap<Ulid, Timeline<Appointment>>,
    blocks: DashMap<Ulid, Timeline<AvailabilityBlock>>,
    /// Reverse lookup: appointment or block id → professional id
    entity_to_professional: DashMap<Ulid, Ulid>,
    /// Patient → appointment ids
    patient_appointments: DashMap<Ulid, Vec<Ulid>>,
    professionals: DashMap<Ulid, Professional>,
    patients: DashMap<Ulid, Patient>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            appointments: DashMap::new(),
            blocks: DashMap::new(),
            entity_to_professional: DashMap::new(),
            patient_appointments: DashMap::new(),
            professionals: DashMap::new(),
            patients: DashMap::new(),
        }
    }

    pub fn add_professional(&self, professional: Professional) {
        self.professionals.insert(professional.id(), professional);
    }

    pub fn add_patient(&self, patient: Patient) {
        self.patients.insert(patient.id(), patient);
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.iter().map(|e| e.value().len()).sum()
    }

    fn find_appointment(&self, id: &Ulid) -> Option<Appointment> {
        let pro = *self.entity_to_professional.get(id)?;
        self.appointments
            .get(&pro)
            .and_then(|tl| tl.get(*id).cloned())
    }

    /// Insert or replace in place. The id stays resolvable throughout: when the
    /// owning professional or patient changes, the new entry lands before the old one goes.
    fn put_appointment(&self, appointment: Appointment) {
        let (id, pro, patient) = (
            appointment.id,
            appointment.professional_id,
            appointment.patient_id,
        );
        let previous_pro = self.entity_to_professional.get(&id).map(|e| *e.value());
        let mut replaced = self
            .appointments
            .entry(pro)
            .or_default()
            .upsert(appointment);
        self.entity_to_professional.insert(id, pro);
        {
            let mut ids = self.patient_appointments.entry(patient).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        if let Some(prev) = previous_pro
            && prev != pro
            && let Some(old) = self.appointments.get_mut(&prev).and_then(|mut tl| tl.remove(id))
        {
            replaced = Some(old);
        }
        if let Some(old) = replaced
            && old.patient_id != patient
            && let Some(mut ids) = self.patient_appointments.get_mut(&old.patient_id)
        {
            ids.retain(|a| *a != id);
        }
    }

    fn patient_appointments_sorted(&self, patient_id: &Ulid) -> Vec<Appointment> {
        let ids = self
            .patient_appointments
            .get(patient_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out: Vec<Appointment> = ids
            .iter()
            .filter_map(|id| self.find_appointment(id))
            .collect();
        out.sort_by_key(|a| a.span.start);
        out
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.find_appointment(&id))
    }

    async fn insert(&self, appointment: Appointment) -> Result<(), StoreError> {
        self.put_appointment(appointment);
        Ok(())
    }

    async fn update(&self, appointment: Appointment) -> Result<(), StoreError> {
        self.put_appointment(appointment);
        Ok(())
    }

    async fn overlapping_for_professional(
        &self,
        professional_id: Ulid,
        window: Span,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .appointments
            .get(&professional_id)
            .map(|tl| {
                tl.overlapping(&window)
                    .filter(|a| a.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn overlapping_for_patient(
        &self,
        patient_id: Ulid,
        window: Span,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut out = self.patient_appointments_sorted(&patient_id);
        out.retain(|a| a.is_active() && a.span.overlaps(&window));
        Ok(out)
    }

    async fn list_for_patient(&self, patient_id: Ulid) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.patient_appointments_sorted(&patient_id))
    }
}

#[async_trait]
impl BlockStore for InMemoryStore {
    async fn overlapping_blocks(
        &self,
        professional_id: Ulid,
        window: Span,
    ) -> Result<Vec<AvailabilityBlock>, StoreError> {
        Ok(self
            .blocks
            .get(&professional_id)
            .map(|tl| tl.overlapping(&window).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_block(&self, block: AvailabilityBlock) -> Result<(), StoreError> {
        self.entity_to_professional
            .insert(block.id, block.professional_id);
        self.blocks
            .entry(block.professional_id)
            .or_default()
            .insert(block);
        Ok(())
    }

    async fn delete_block(&self, id: Ulid) -> Result<bool, StoreError> {
        let Some(pro) = self.entity_to_professional.get(&id).map(|e| *e.value()) else {
            return Ok(false);
        };
        let removed = self
            .blocks
            .get_mut(&pro)
            .and_then(|mut tl| tl.remove(id))
            .is_some();
        if removed {
            self.entity_to_professional.remove(&id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl Directory for InMemoryStore {
    async fn professional(&self, id: Ulid) -> Result<Option<Professional>, StoreError> {
        Ok(self.professionals.get(&id).map(|e| e.value().clone()))
    }

    async fn patient(&self, id: Ulid) -> Result<Option<Patient>, StoreError> {
        Ok(self.patients.get(&id).map(|e| e.value().clone()))
    }

    async fn professionals(&self, ids: &[Ulid]) -> Result<Vec<Professional>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.professionals.get(id).map(|e| e.value().clone()))
            .collect())
    }

    async fn patients(&self, ids: &[Ulid]) -> Result<Vec<Patient>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.patients.get(id).map(|e| e.value().clone()))
            .collect())
    }
}
