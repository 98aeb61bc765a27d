use serde_json::json;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, BOOKINGS_TOTAL, CANCELLATIONS_TOTAL};
use crate::outbox::{APPOINTMENT_CANCELLED, OutboxEvent};

use super::availability::resolve_rule;
use super::conflict::{active_overlaps, check_capacity, check_len, validate_span};
use super::{Admission, ConflictReason, Engine, EngineError, Entity};

impl Engine {
    /// Admit a booking if it falls inside the professional's weekly availability and
    /// the overbooking limit is not reached.
    pub async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let result = self.try_book(req).await;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => observability::booking_outcome(&result))
            .increment(1);
        result
    }

    async fn try_book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let span = validate_span(req.start, req.end)?;
        check_len(req.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        check_len(
            req.location_name.as_deref(),
            MAX_LOCATION_NAME_LEN,
            "location name too long",
        )?;

        let professional = self
            .directory
            .professional(req.professional_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Professional, req.professional_id))?;
        if self.directory.patient(req.patient_id).await?.is_none() {
            return Err(EngineError::NotFound(Entity::Patient, req.patient_id));
        }

        let Some(rule) = resolve_rule(&professional.availability, &span, self.config.tz_availability)
        else {
            warn!(
                professional = %req.professional_id,
                start = %format_utc(span.start),
                "booking outside availability"
            );
            return Err(EngineError::Conflict(ConflictReason::OutsideAvailability));
        };
        let location_type = req.location_type.unwrap_or(rule.location_type);
        let location_name = req.location_name.or_else(|| rule.location_name.clone());

        let _admission = self.admit(req.professional_id).await;

        let existing = self
            .appointments
            .overlapping_for_professional(req.professional_id, span)
            .await?;
        if let Err(e) = check_capacity(active_overlaps(&existing, &span), self.config.max_concurrent()) {
            warn!(
                professional = %req.professional_id,
                start = %format_utc(span.start),
                limit = self.config.overbook_limit,
                "overbooking limit reached"
            );
            return Err(e);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            professional_id: req.professional_id,
            patient_id: req.patient_id,
            span,
            status: AppointmentStatus::Scheduled,
            cancel_reason: None,
            notes: req.notes,
            location_type,
            location_name,
        };
        self.appointments.insert(appointment.clone()).await?;
        info!(
            id = %appointment.id,
            professional = %appointment.professional_id,
            patient = %appointment.patient_id,
            start = %format_utc(span.start),
            "appointment booked"
        );
        Ok(appointment)
    }

    /// Overwrite the status. Any transition is accepted.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let _admission = self.admit_appointment(id).await?;
        // Reload under the lock: a concurrent cancel may have landed.
        let mut appointment = self.load_appointment(id).await?;

        appointment.status = status;
        self.appointments.update(appointment.clone()).await?;
        info!(%id, ?status, "appointment status updated");
        Ok(appointment)
    }

    /// Cancel and publish `AppointmentCancelled`. Cancelling twice is a no-op.
    pub async fn cancel(&self, id: Ulid, reason: &str) -> Result<(), EngineError> {
        check_len(Some(reason), MAX_REASON_LEN, "reason too long")?;
        let _admission = self.admit_appointment(id).await?;
        let mut appointment = self.load_appointment(id).await?;

        if appointment.is_cancelled() {
            debug!(%id, "already cancelled");
            return Ok(());
        }

        appointment.cancel(Some(reason.to_string()));
        self.appointments.update(appointment.clone()).await?;

        let payload = json!({
            "appointmentId": appointment.id.to_string(),
            "professionalId": appointment.professional_id.to_string(),
            "patientId": appointment.patient_id.to_string(),
            "startTs": format_utc(appointment.span.start),
            "endTs": format_utc(appointment.span.end),
            "reason": reason,
        })
        .to_string();
        self.outbox
            .append(OutboxEvent::new(APPOINTMENT_CANCELLED, appointment.id, payload.clone()))
            .await
            .map_err(EngineError::Outbox)?;
        let delivered = self
            .notify
            .broadcast(appointment.patient_id, APPOINTMENT_CANCELLED, &payload);

        metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
        info!(%id, patient = %appointment.patient_id, delivered, "appointment cancelled");
        Ok(())
    }

    pub async fn add_open_block(
        &self,
        professional_id: Ulid,
        span: Span,
        reason: Option<String>,
        location_type: Option<LocationType>,
    ) -> Result<AvailabilityBlock, EngineError> {
        self.add_block(professional_id, span, true, reason, location_type)
            .await
    }

    pub async fn add_closed_block(
        &self,
        professional_id: Ulid,
        span: Span,
        reason: Option<String>,
    ) -> Result<AvailabilityBlock, EngineError> {
        self.add_block(professional_id, span, false, reason, None)
            .await
    }

    async fn add_block(
        &self,
        professional_id: Ulid,
        span: Span,
        open: bool,
        reason: Option<String>,
        location_type: Option<LocationType>,
    ) -> Result<AvailabilityBlock, EngineError> {
        let span = validate_span(span.start, span.end)?;
        check_len(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        if self.directory.professional(professional_id).await?.is_none() {
            return Err(EngineError::NotFound(Entity::Professional, professional_id));
        }

        let block = AvailabilityBlock {
            id: Ulid::new(),
            professional_id,
            span,
            open,
            reason,
            location_type,
        };
        self.blocks.insert_block(block.clone()).await?;
        info!(id = %block.id, professional = %professional_id, open, "availability block added");
        Ok(block)
    }

    pub async fn remove_block(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.blocks.delete_block(id).await? {
            return Err(EngineError::NotFound(Entity::Block, id));
        }
        info!(%id, "availability block removed");
        Ok(())
    }

    pub(super) async fn load_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.appointments
            .get(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Appointment, id))
    }

    /// Status changes take the owning professional's admission lock so they serialize
    /// with bookings and with each other. Callers reload the appointment under it.
    async fn admit_appointment(&self, id: Ulid) -> Result<Admission<'_>, EngineError> {
        let appointment = self.load_appointment(id).await?;
        Ok(self.admit(appointment.professional_id).await)
    }
}
