use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{SLOT_QUERIES_TOTAL, SLOT_QUERY_DURATION_SECONDS};

use super::conflict::{validate_query, validate_window};
use super::{Engine, EngineError};

/// Everything the professional slot view needs, already fetched.
pub struct SlotBoard<'a> {
    pub professional_id: Ulid,
    pub professional_name: Option<&'a str>,
    /// Closed blocks are skipped.
    pub blocks: &'a [AvailabilityBlock],
    /// Cancelled appointments are skipped.
    pub busy: &'a [Appointment],
    pub patient_names: &'a HashMap<Ulid, String>,
}

/// Subdivide each open block, clipped to `window`, into `step`-long slots and attach
/// the overlapping bookings. Output follows block order, then time within a block.
pub fn compile_professional_slots(
    board: &SlotBoard<'_>,
    window: Span,
    step: Ms,
    include: SlotFilter,
) -> Vec<SlotView> {
    let mut out = Vec::new();
    for block in board.blocks.iter().filter(|b| b.open) {
        let Some(clipped) = block.span.clamp_to(&window) else {
            continue;
        };
        let location_type = block.effective_location();

        for slot in clipped.subdivide(step) {
            let bookings: Vec<BookingItem> = board
                .busy
                .iter()
                .filter(|a| a.is_active() && a.span.overlaps(&slot))
                .map(|a| BookingItem {
                    appointment_id: a.id,
                    patient_id: a.patient_id,
                    patient_name: board.patient_names.get(&a.patient_id).cloned(),
                })
                .collect();
            let overlap_count = bookings.len();
            if !include.keeps(overlap_count) {
                continue;
            }
            out.push(SlotView {
                professional_id: board.professional_id,
                professional_name: board.professional_name.map(str::to_string),
                span: slot,
                location_type,
                status: if overlap_count == 0 {
                    SlotStatus::Available
                } else {
                    SlotStatus::Booked
                },
                overlap_count,
                bookings,
            });
        }
    }
    out
}

impl Engine {
    pub async fn professional_slots(
        &self,
        professional_id: Ulid,
        from: Ms,
        to: Ms,
        step_minutes: i64,
        include: SlotFilter,
    ) -> Result<Vec<SlotView>, EngineError> {
        let (window, step) = validate_query(from, to, step_minutes)?;
        let started = Instant::now();

        let blocks = self.blocks.overlapping_blocks(professional_id, window).await?;
        let busy = self
            .appointments
            .overlapping_for_professional(professional_id, window)
            .await?;
        let professional_name = self
            .directory
            .professional(professional_id)
            .await?
            .map(|p| p.person.full_name);

        let patient_ids: Vec<Ulid> = busy
            .iter()
            .map(|a| a.patient_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let patient_names: HashMap<Ulid, String> = if patient_ids.is_empty() {
            HashMap::new()
        } else {
            self.directory
                .patients(&patient_ids)
                .await?
                .into_iter()
                .map(|p| (p.id(), p.person.full_name))
                .collect()
        };

        let board = SlotBoard {
            professional_id,
            professional_name: professional_name.as_deref(),
            blocks: &blocks,
            busy: &busy,
            patient_names: &patient_names,
        };
        let slots = compile_professional_slots(&board, window, step, include);
        debug!(
            professional = %professional_id,
            blocks = blocks.len(),
            bookings = busy.len(),
            slots = slots.len(),
            "compiled professional slots"
        );
        record_query("professional", started);
        Ok(slots)
    }

    /// One BOOKED slot per active appointment of the patient in the window.
    /// `step_minutes` is accepted for symmetry with the professional view and ignored.
    pub async fn patient_slots(
        &self,
        patient_id: Ulid,
        from: Ms,
        to: Ms,
        _step_minutes: i64,
    ) -> Result<Vec<SlotView>, EngineError> {
        let window = validate_window(from, to)?;
        let started = Instant::now();

        let mine = self
            .appointments
            .overlapping_for_patient(patient_id, window)
            .await?;

        let professional_ids: Vec<Ulid> = mine
            .iter()
            .map(|a| a.professional_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let professional_names: HashMap<Ulid, String> = if professional_ids.is_empty() {
            HashMap::new()
        } else {
            self.directory
                .professionals(&professional_ids)
                .await?
                .into_iter()
                .map(|p| (p.id(), p.person.full_name))
                .collect()
        };

        let mut out = Vec::with_capacity(mine.len());
        for a in mine.iter().filter(|a| a.is_active()) {
            let location_type = self
                .blocks
                .overlapping_blocks(a.professional_id, a.span)
                .await?
                .iter()
                .find(|b| b.open)
                .map(AvailabilityBlock::effective_location)
                .unwrap_or_default();
            out.push(SlotView {
                professional_id: a.professional_id,
                professional_name: professional_names.get(&a.professional_id).cloned(),
                span: a.span,
                location_type,
                status: SlotStatus::Booked,
                overlap_count: 1,
                // TODO: resolve the patient's own name once callers need it in this view.
                bookings: vec![BookingItem {
                    appointment_id: a.id,
                    patient_id: a.patient_id,
                    patient_name: None,
                }],
            });
        }
        record_query("patient", started);
        Ok(out)
    }

    /// Open-block sub-intervals with no active appointment.
    pub async fn free_slots(
        &self,
        professional_id: Ulid,
        from: Ms,
        to: Ms,
        step_minutes: i64,
    ) -> Result<Vec<Span>, EngineError> {
        Ok(self
            .professional_slots(professional_id, from, to, step_minutes, SlotFilter::Available)
            .await?
            .into_iter()
            .map(|s| s.span)
            .collect())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.load_appointment(id).await
    }

    /// Non-cancelled appointments of a professional overlapping `[from, to)`.
    pub async fn appointments_by_professional(
        &self,
        professional_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Appointment>, EngineError> {
        let window = validate_window(from, to)?;
        Ok(self
            .appointments
            .overlapping_for_professional(professional_id, window)
            .await?)
    }

    /// Every appointment of a patient, cancelled included, by start.
    pub async fn appointments_by_patient(
        &self,
        patient_id: Ulid,
    ) -> Result<Vec<Appointment>, EngineError> {
        Ok(self.appointments.list_for_patient(patient_id).await?)
    }
}

fn record_query(view: &'static str, started: Instant) {
    metrics::counter!(SLOT_QUERIES_TOTAL, "view" => view).increment(1);
    metrics::histogram!(SLOT_QUERY_DURATION_SECONDS, "view" => view)
        .record(started.elapsed().as_secs_f64());
}
