use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::future::join_all;
use ulid::Ulid;

use bookings::availability::Availability;
use bookings::config::Config;
use bookings::error::BookingError;
use bookings::model::{Guest, NewReservation, RoomId};
use bookings::notify::{Dispatcher, LogTransport, TemplateSet};
use bookings::reservation::Orchestrator;
use bookings::storage::Store;

const ROOMS: RoomId = 20;

/// Wall-clock time of each call made during one phase.
#[derive(Default)]
struct Latencies(Vec<Duration>);

impl Latencies {
    fn record(&mut self, took: Duration) {
        self.0.push(took);
    }

    fn absorb(&mut self, other: Latencies) {
        self.0.extend(other.0);
    }

    /// Nearest-rank: the smallest sample with at least `q` of the samples at or below it.
    fn nearest_rank(sorted: &[Duration], q: f64) -> Duration {
        let rank = (q * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    fn report(mut self, what: &str) {
        if self.0.is_empty() {
            println!("  {what}: nothing timed");
            return;
        }
        self.0.sort_unstable();
        let calls = self.0.len();
        let mean = self.0.iter().sum::<Duration>() / calls as u32;
        let us = |q: f64| Self::nearest_rank(&self.0, q).as_micros();
        println!(
            "  {what} over {calls} calls: mean {}us | median {}us | 95th {}us | 99th {}us | worst {}us",
            mean.as_micros(),
            us(0.50),
            us(0.95),
            us(0.99),
            us(1.0),
        );
    }
}

fn night(i: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Days::new(i)
}

fn request(i: u64, nights: u64) -> NewReservation {
    NewReservation {
        guest: Guest {
            first_name: "Bench".into(),
            last_name: format!("Guest {i}"),
            email: format!("bench{i}@example.com"),
            phone: "555-0100".into(),
        },
        start: night(i),
        end: night(i + nights),
    }
}

struct Bench {
    store: Arc<Store>,
    availability: Arc<Availability>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<Dispatcher>,
}

async fn setup() -> Bench {
    let dir = std::env::temp_dir().join(format!("bookings_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let config = Config {
        data_dir: PathBuf::from(&dir),
        ..Config::default()
    };
    let store = Arc::new(Store::open(config.wal_path()).unwrap());
    for id in 1..=ROOMS {
        store.create_room(id, format!("Room {id}")).await.unwrap();
    }
    let mut mail = config.mail.clone();
    mail.queue_capacity = 100_000;
    let dispatcher = Arc::new(Dispatcher::start(Arc::new(LogTransport), TemplateSet::builtin(), &mail));
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), dispatcher.clone(), &config));
    println!("  {ROOMS} rooms, wal at {}", config.wal_path().display());
    Bench {
        availability: Arc::new(Availability::new(store.clone())),
        store,
        orchestrator,
        dispatcher,
    }
}

async fn phase1_sequential(bench: &Bench) {
    let n = 2000;
    let mut latencies = Latencies::default();
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        bench
            .orchestrator
            .create_reservation(request(i, 1), 1)
            .await
            .unwrap();
        latencies.record(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    latencies.report("create_reservation");
}

async fn phase2_concurrent(bench: &Bench) {
    let n_tasks: RoomId = 10;
    let n_per_task = 200;
    let start = Instant::now();

    let handles = (0..n_tasks).map(|t| {
        let orch = bench.orchestrator.clone();
        // Rooms 2..=11, one writer per room.
        let room = 2 + t;
        tokio::spawn(async move {
            for i in 0..n_per_task {
                orch.create_reservation(request(i, 1), room).await.unwrap();
            }
        })
    });
    for h in join_all(handles).await {
        h.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_search_under_load(bench: &Bench) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..5u32 {
        let orch = bench.orchestrator.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let room = 12 + w;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = orch.create_reservation(request(i, 2), room).await;
                i += 2;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let readers = (0..n_readers).map(|r| {
        let availability = bench.availability.clone();
        tokio::spawn(async move {
            let mut latencies = Latencies::default();
            for i in 0..reads_per_reader as u64 {
                let s = (r * 37 + i) % 1000;
                let t = Instant::now();
                availability
                    .search_available_rooms(night(s), night(s + 3))
                    .await
                    .unwrap();
                latencies.record(t.elapsed());
            }
            latencies
        })
    });

    let mut all = Latencies::default();
    for h in join_all(readers).await {
        all.absorb(h.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    all.report("search_available_rooms");
}

async fn phase4_contention(bench: &Bench) {
    // Every task fights for the same few nights of one room.
    let n_tasks = 500u64;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles = (0..n_tasks).map(|i| {
        let orch = bench.orchestrator.clone();
        let (won, lost) = (won.clone(), lost.clone());
        tokio::spawn(async move {
            match orch.create_reservation(request(i % 30, 1 + i % 3), ROOMS).await {
                Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                Err(BookingError::RoomUnavailable { .. }) => lost.fetch_add(1, Ordering::Relaxed),
                Err(e) => panic!("unexpected error: {e}"),
            };
        })
    });
    for h in join_all(handles).await {
        h.unwrap();
    }

    let committed = bench.store.room_reservations(ROOMS).await.unwrap();
    let double_booked = committed
        .windows(2)
        .filter(|w| w[0].span.overlaps(&w[1].span))
        .count();
    println!(
        "  {n_tasks} racing requests in {:.2}s: {} won, {} rejected, {double_booked} overlaps",
        start.elapsed().as_secs_f64(),
        won.load(Ordering::Relaxed),
        lost.load(Ordering::Relaxed),
    );
}

#[tokio::main]
async fn main() {
    println!("=== bookings stress benchmark ===\n");

    println!("[setup]");
    let bench = setup().await;

    println!("\n[phase 1] sequential commit throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] concurrent commits across rooms");
    phase2_concurrent(&bench).await;

    println!("\n[phase 3] search latency under write load");
    phase3_search_under_load(&bench).await;

    println!("\n[phase 4] single-room contention");
    phase4_contention(&bench).await;

    println!("\n[compaction]");
    let t = Instant::now();
    let events = bench.store.compact_wal().await.unwrap();
    println!("  {events} events rewritten in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    bench.dispatcher.shutdown(Duration::from_secs(30)).await;
    println!("\n=== benchmark complete ===");
}
