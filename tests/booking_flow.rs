use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveTime, TimeZone, Weekday};
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use clinic_sched::config::Config;
use clinic_sched::engine::{ConflictReason, Engine};
use clinic_sched::model::*;
use clinic_sched::notify::NotifyHub;
use clinic_sched::outbox::{APPOINTMENT_CANCELLED, OutboxLog, OutboxSource};
use clinic_sched::pump;
use clinic_sched::store::InMemoryStore;

// ── Test infrastructure ──────────────────────────────────────

fn outbox_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("clinic_sched_int_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("outbox.log")
}

/// Buenos Aires wall clock on Monday 2025-10-20.
fn monday(h: u32, m: u32) -> Ms {
    chrono_tz::America::Argentina::Buenos_Aires
        .with_ymd_and_hms(2025, 10, 20, h, m, 0)
        .single()
        .unwrap()
        .timestamp_millis()
}

struct Clinic {
    engine: Arc<Engine>,
    store: Arc<InMemoryStore>,
    outbox: Arc<OutboxLog>,
    doctor: Ulid,
}

fn open_clinic(path: &std::path::Path) -> Clinic {
    let store = Arc::new(InMemoryStore::new());
    let morning = AvailabilitySlot::new(
        Weekday::Mon,
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        LocationType::Hospital,
    )
    .unwrap()
    .with_location_name("Hospital de Clínicas");
    let doctor = Professional::new("Dr. Ruiz", vec![morning]);
    let doctor_id = doctor.id();
    store.add_professional(doctor);

    let outbox = Arc::new(OutboxLog::open(path).unwrap());
    let engine = Arc::new(Engine::with_store(
        store.clone(),
        outbox.clone(),
        Arc::new(NotifyHub::new()),
        Config::default(),
    ));
    Clinic {
        engine,
        store,
        outbox,
        doctor: doctor_id,
    }
}

impl Clinic {
    fn patient(&self, name: &str) -> Ulid {
        let p = Patient::new(name);
        let id = p.id();
        self.store.add_patient(p);
        id
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn book_view_cancel_and_pump() {
    let path = outbox_path();
    let clinic = open_clinic(&path);
    let ana = clinic.patient("Ana");
    let mut inbox = clinic.engine.notify().subscribe(ana);

    let (start, end) = (monday(10, 0), monday(10, 30));
    let appt = assert_ok!(
        clinic
            .engine
            .book(BookingRequest::new(clinic.doctor, ana, start, end))
            .await
    );
    assert_eq!(appt.location_name.as_deref(), Some("Hospital de Clínicas"));

    assert_ok!(
        clinic
            .engine
            .add_open_block(clinic.doctor, Span::new(monday(9, 0), monday(11, 0)), None, None)
            .await
    );
    let slots = assert_ok!(
        clinic
            .engine
            .professional_slots(clinic.doctor, monday(0, 0), monday(23, 0), 30, SlotFilter::Booked)
            .await
    );
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].span, appt.span);
    assert_eq!(slots[0].bookings[0].patient_name.as_deref(), Some("Ana"));

    let mine = assert_ok!(clinic.engine.patient_slots(ana, monday(0, 0), monday(23, 0), 30).await);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].professional_name.as_deref(), Some("Dr. Ruiz"));

    assert_ok!(clinic.engine.cancel(appt.id, "reprogramado").await);
    assert_ok!(clinic.engine.cancel(appt.id, "reprogramado").await);
    let note = inbox.recv().await.unwrap();
    assert_eq!(note.event, APPOINTMENT_CANCELLED);
    assert!(inbox.try_recv().is_none());

    let pending = assert_ok!(clinic.outbox.pending(APPOINTMENT_CANCELLED).await);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].aggregate_id, appt.id);

    assert_eq!(assert_ok!(pump::pump_once(clinic.outbox.as_ref(), APPOINTMENT_CANCELLED, now_ms()).await), 1);
    assert!(assert_ok!(clinic.outbox.pending(APPOINTMENT_CANCELLED).await).is_empty());

    // the processed marker survives a restart
    drop(clinic);
    let reopened = OutboxLog::open(&path).unwrap();
    assert_eq!(reopened.len().await, 1);
    assert!(assert_ok!(reopened.pending(APPOINTMENT_CANCELLED).await).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_patients_respect_overbooking_limit() {
    let clinic = open_clinic(&outbox_path());
    let patients: Vec<Ulid> = (0..10).map(|i| clinic.patient(&format!("p{i}"))).collect();
    let (start, end) = (monday(11, 0), monday(11, 20));

    let attempts = patients.iter().map(|&p| {
        let engine = clinic.engine.clone();
        let req = BookingRequest::new(clinic.doctor, p, start, end);
        tokio::spawn(async move { engine.book(req).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, clinic.engine.config().max_concurrent());
    for r in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(r.is_conflict(ConflictReason::OverbookingLimit));
    }

    // afternoon is outside the weekly rule
    let late = BookingRequest::new(clinic.doctor, patients[0], monday(15, 0), monday(15, 30));
    let err = assert_err!(clinic.engine.book(late).await);
    assert!(err.is_conflict(ConflictReason::OutsideAvailability));
}
