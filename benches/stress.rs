use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveTime, Weekday};
use ulid::Ulid;

use clinic_sched::config::Config;
use clinic_sched::engine::Engine;
use clinic_sched::model::*;
use clinic_sched::notify::NotifyHub;
use clinic_sched::outbox::MemoryOutbox;
use clinic_sched::store::InMemoryStore;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
/// Monday 2025-01-06 00:00 UTC.
const BASE: i64 = 1_736_121_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

struct Bench {
    engine: Arc<Engine>,
    store: Arc<InMemoryStore>,
}

/// Engine in UTC with every professional available all day, every day.
fn setup(overbook_limit: u32) -> Bench {
    let store = Arc::new(InMemoryStore::new());
    let config = Config {
        overbook_limit,
        tz_availability: chrono_tz::UTC,
        ..Config::default()
    };
    let engine = Arc::new(Engine::with_store(
        store.clone(),
        Arc::new(MemoryOutbox::new()),
        Arc::new(NotifyHub::new()),
        config,
    ));
    Bench { engine, store }
}

fn all_week() -> Vec<AvailabilitySlot> {
    let (open, close) = (
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
    );
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .filter_map(|d| AvailabilitySlot::new(d, open, close, LocationType::Hospital))
    .collect()
}

fn add_professional(bench: &Bench) -> Ulid {
    let p = Professional::new(format!("pro-{}", Ulid::new()), all_week());
    let id = p.id();
    bench.store.add_professional(p);
    id
}

fn add_patient(bench: &Bench) -> Ulid {
    let p = Patient::new(format!("patient-{}", Ulid::new()));
    let id = p.id();
    bench.store.add_patient(p);
    id
}

/// Twenty half-hour appointments per day, never crossing midnight.
fn slot(i: usize) -> (Ms, Ms) {
    let start = BASE + (i / 20) as i64 * DAY + (i % 20) as i64 * HOUR;
    (start, start + HOUR / 2)
}

async fn phase1_sequential(bench: &Bench) {
    let pro = add_professional(bench);
    let patient = add_patient(bench);
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (s, e) = slot(i);
        let t = Instant::now();
        bench
            .engine
            .book(BookingRequest::new(pro, patient, s, e))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book latency", &mut latencies);
}

async fn phase2_contention(bench: &Bench) {
    let pro = add_professional(bench);
    let n_tasks = 50;
    let (s, e) = slot(0);
    let admitted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = bench.engine.clone();
        let patient = add_patient(bench);
        let admitted = admitted.clone();
        handles.push(tokio::spawn(async move {
            if engine.book(BookingRequest::new(pro, patient, s, e)).await.is_ok() {
                admitted.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let ok = admitted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} racing bookings on one window: {ok} admitted (limit {}) in {:.2}ms",
        bench.engine.config().max_concurrent(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    assert_eq!(ok, bench.engine.config().max_concurrent());
}

async fn phase3_slots_under_load(bench: &Bench) {
    let pro = add_professional(bench);
    let patient = add_patient(bench);
    for day in 0..30 {
        let s = BASE + day * DAY + 8 * HOUR;
        bench
            .engine
            .add_open_block(pro, Span::new(s, s + 10 * HOUR), None, None)
            .await
            .unwrap();
    }
    for i in 0..200 {
        let (s, e) = slot(i);
        bench
            .engine
            .book(BookingRequest::new(pro, patient, s, e))
            .await
            .unwrap();
    }

    // Writers keep booking other professionals while readers compile slots.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for _ in 0..5 {
        let engine = bench.engine.clone();
        let stop = stop.clone();
        let wpro = add_professional(bench);
        let wpatient = add_patient(bench);
        writers.push(tokio::spawn(async move {
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let (s, e) = slot(i % 7000);
                let _ = engine.book(BookingRequest::new(wpro, wpatient, s, e)).await;
                i += 1;
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..10 {
        let engine = bench.engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(200);
            for _ in 0..200 {
                let t = Instant::now();
                engine
                    .professional_slots(pro, BASE, BASE + 30 * DAY, 30, SlotFilter::All)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("professional_slots (30 days, 30 min step)", &mut all);
}

#[tokio::main]
async fn main() {
    println!("=== clinic-sched stress benchmark ===\n");
    let bench = setup(3);

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] concurrent admission on one window");
    phase2_contention(&bench).await;

    println!("\n[phase 3] slot query latency under booking load");
    phase3_slots_under_load(&bench).await;

    println!("\n=== done ===");
}
