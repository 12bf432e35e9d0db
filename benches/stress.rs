use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use hostelbeds::auth::AuthorizationCodes;
use hostelbeds::engine::{Engine, EngineError};
use hostelbeds::model::{Coordinate, Occupant, PaymentRequest};
use hostelbeds::notify::NotifyHub;
use hostelbeds::topology::Topology;

const CODE: &str = "BENCH";

fn open_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("hostelbeds_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(
        dir.join("hostel.wal"),
        Arc::new(Topology::default()),
        AuthorizationCodes::new([CODE]),
        Arc::new(NotifyHub::new()),
    )
    .expect("open engine");
    Arc::new(engine)
}

fn occupant(i: usize) -> Occupant {
    Occupant {
        name: format!("guest {i}"),
        phone: format!("90000{i:05}"),
        email: format!("guest{i}@example.com"),
        join_date: "2025-01-01".into(),
        ..Default::default()
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

async fn phase1_sequential(engine: &Arc<Engine>) {
    let beds: Vec<Coordinate> = engine.topology().coordinates().collect();
    let rounds = 25;
    let mut latencies = Vec::with_capacity(beds.len() * rounds);
    let start = Instant::now();

    for round in 0..rounds {
        let mut ids = Vec::with_capacity(beds.len());
        for (i, bed) in beds.iter().enumerate() {
            let t = Instant::now();
            let booking = engine
                .reserve(*bed, occupant(round * 1000 + i), None)
                .await
                .expect("reserve free bed");
            latencies.push(t.elapsed());
            ids.push(booking.id);
        }
        for id in ids {
            engine.release(id).await.expect("release");
        }
    }

    let elapsed = start.elapsed();
    let n = latencies.len();
    let ops = (n * 2) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} reserve/release pairs in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("reserve latency", &mut latencies);
}

/// Every task races for every bed; exactly one reservation per bed may win.
async fn phase2_contention(engine: &Arc<Engine>) {
    let n_tasks = 16;
    let beds: Arc<Vec<Coordinate>> = Arc::new(engine.topology().coordinates().collect());
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let beds = beds.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let mut won = Vec::new();
            for (i, bed) in beds.iter().enumerate() {
                match engine.reserve(*bed, occupant(t * 1000 + i), None).await {
                    Ok(booking) => won.push(booking.id),
                    Err(EngineError::Conflict(_)) => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            won
        }));
    }

    let mut winners = Vec::new();
    for h in handles {
        winners.extend(h.await.expect("task panicked"));
    }
    let elapsed = start.elapsed();
    assert_eq!(winners.len(), beds.len(), "every bed has exactly one winner");
    println!(
        "  {n_tasks} tasks x {} beds: {} won, {} conflicts in {:.2}s",
        beds.len(),
        winners.len(),
        conflicts.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );

    for id in winners {
        engine.release(id).await.expect("release");
    }
}

/// Shifts between two halves of the building while readers poll availability.
async fn phase3_reads_under_shifts(engine: &Arc<Engine>) {
    let beds: Vec<Coordinate> = engine.topology().coordinates().collect();
    let (left, right) = beds.split_at(beds.len() / 2);
    let mut movers = Vec::new();
    for (i, bed) in left.iter().enumerate() {
        let booking = engine.reserve(*bed, occupant(i), None).await.expect("reserve");
        movers.push(booking.id);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let shifts = Arc::new(AtomicUsize::new(0));
    let mut writers = Vec::new();
    for (w, id) in movers.iter().copied().enumerate() {
        let engine = engine.clone();
        let stop = stop.clone();
        let shifts = shifts.clone();
        let targets = [left[w], right[w % right.len()]];
        writers.push(tokio::spawn(async move {
            let mut i = 1;
            while !stop.load(Ordering::Relaxed) {
                if engine.shift(id, targets[i % 2]).await.is_ok() {
                    shifts.fetch_add(1, Ordering::Relaxed);
                }
                i += 1;
            }
        }));
    }

    let n_readers = 8;
    let reads_per_reader = 2000;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        let rooms: Vec<(u32, u32)> = beds.iter().map(|c| (c.floor, c.room)).collect();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let (floor, room) = rooms[(r * 7 + i) % rooms.len()];
                let t = Instant::now();
                engine.list_available(floor, room).expect("known room");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }

    println!("  {} shifts completed during reads", shifts.load(Ordering::Relaxed));
    print_latency("availability query", &mut all);
}

async fn phase4_payments(engine: &Arc<Engine>) {
    let bookings = engine.bookings().await;
    let n_per_booking = 20;
    let start = Instant::now();

    let mut handles = Vec::new();
    for booking in bookings.iter() {
        let engine = engine.clone();
        let booking_id = booking.id;
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_booking);
            for _ in 0..n_per_booking {
                let t = Instant::now();
                engine
                    .record_payment(PaymentRequest {
                        booking_id: Some(booking_id),
                        amount: 500,
                        authorization_code: CODE.into(),
                        ..Default::default()
                    })
                    .await
                    .expect("record payment");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.expect("payer panicked"));
    }
    let elapsed = start.elapsed();
    for booking in &bookings {
        let paid = engine.booking(booking.id).await.map_or(0, |b| b.amount_paid);
        assert_eq!(paid, 500 * n_per_booking as i64, "amount paid tracks ledger");
    }
    println!(
        "  {} payments in {:.2}s = {:.0} ops/sec",
        all.len(),
        elapsed.as_secs_f64(),
        all.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("payment latency", &mut all);
}

async fn phase5_compaction(engine: &Arc<Engine>) {
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_wal().await.expect("compact");
    println!(
        "  compacted {appends} appends in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== hostelbeds stress benchmark ===\n");
    let engine = open_engine();
    println!("beds: {}\n", engine.topology().total_beds());

    println!("[phase 1] sequential reserve/release throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended reservations");
    phase2_contention(&engine).await;

    println!("\n[phase 3] availability reads under shift load");
    phase3_reads_under_shifts(&engine).await;

    println!("\n[phase 4] concurrent payments");
    phase4_payments(&engine).await;

    println!("\n[phase 5] WAL compaction");
    phase5_compaction(&engine).await;

    println!("\n=== done ===");
}
