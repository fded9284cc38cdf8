use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Duration as Days, NaiveDate, Weekday};
use ulid::Ulid;

use slotwise::catalog::Catalog;
use slotwise::clock::FixedClock;
use slotwise::collab::Collaborators;
use slotwise::config::EngineConfig;
use slotwise::model::*;
use slotwise::observability::init_logging;
use slotwise::tenant::TenantManager;
use slotwise::timegrid::minutes_to_time;

const STAFF: usize = 8;

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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

struct Shop {
    business_id: Ulid,
    service_id: Ulid,
    staff: Vec<Ulid>,
}

fn shop_catalog() -> (Shop, Catalog) {
    let days = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .map(|day| DaySchedule {
        day,
        is_open: true,
        windows: vec![TimeWindow { open: 8 * 60, close: 20 * 60 }],
    })
    .collect();
    let business = Business {
        id: Ulid::new(),
        name: "Bench Barbers".into(),
        schedule: WeeklySchedule { days },
        booking: BookingConfig {
            slot_duration: 30,
            buffer_time: 0,
            min_advance_minutes: 0,
            max_advance_days: 365,
            requires_confirmation: false,
            deposit: DepositPolicy::none(),
            cancellation: CancellationPolicy {
                allow_cancellation: true,
                hours_before_appointment: 24,
                penalty_percentage: 50,
            },
            allow_reschedule: true,
        },
    };
    let service = Service {
        id: Ulid::new(),
        name: "Cut".into(),
        duration: 30,
        price: 3000,
        final_price: 3000,
        active: true,
    };
    let staff: Vec<Staff> = (0..STAFF)
        .map(|i| Staff {
            id: Ulid::new(),
            name: format!("Barber {i}"),
            service_ids: vec![service.id],
            active: true,
        })
        .collect();
    let shop = Shop {
        business_id: business.id,
        service_id: service.id,
        staff: staff.iter().map(|s| s.id).collect(),
    };
    let catalog = Catalog {
        business: Some(business),
        services: vec![service],
        staff,
        promotions: Vec::new(),
    };
    (shop, catalog)
}

/// The `n`th distinct half-hour slot of one staff member: 24 per day.
fn nth_slot(n: usize) -> (NaiveDate, String) {
    let date = first_day() + Days::days((n / 24) as i64);
    let start: Minutes = 8 * 60 + (n % 24) as Minutes * 30;
    (date, minutes_to_time(start))
}

fn request(shop: &Shop, staff: Option<Ulid>, date: NaiveDate, time: String) -> BookingRequest {
    BookingRequest {
        business_id: shop.business_id,
        client_id: Ulid::new(),
        staff_id: staff,
        service_ids: vec![shop.service_id],
        date,
        start_time: time,
        discount_code: None,
        notes: None,
    }
}

async fn new_shop(tm: &TenantManager) -> Shop {
    let (shop, catalog) = shop_catalog();
    tm.load_catalog(shop.business_id, catalog).await.unwrap();
    shop
}

async fn phase1_sequential(tm: &TenantManager) {
    let shop = new_shop(tm).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let (date, time) = nth_slot(i / STAFF);
        let staff = shop.staff[i % STAFF];
        let t = Instant::now();
        tm.create_booking(request(&shop, Some(staff), date, time)).await.unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contention(tm: Arc<TenantManager>) {
    let shop = Arc::new(new_shop(&tm).await);
    let rounds = 100;
    let racers = 16;
    let mut winners = 0;
    let mut conflicts = 0;
    let start = Instant::now();

    for round in 0..rounds {
        let (date, time) = nth_slot(round);
        let mut handles = Vec::new();
        for _ in 0..racers {
            let tm = tm.clone();
            let shop = shop.clone();
            let time = time.clone();
            handles.push(tokio::spawn(async move {
                tm.create_booking(request(&shop, Some(shop.staff[0]), date, time)).await
            }));
        }
        let mut won = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => won += 1,
                Err(_) => conflicts += 1,
            }
        }
        assert_eq!(won, 1, "round {round}: {won} bookings for one slot");
        winners += won;
    }

    println!(
        "  {rounds} rounds x {racers} racers: {winners} winners, {conflicts} conflicts in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

async fn phase3_read_under_load(tm: Arc<TenantManager>) {
    let shop = Arc::new(new_shop(&tm).await);
    // pre-fill the first day for every staff member but the last
    for n in 0..12 {
        let (date, time) = nth_slot(n * 2);
        for staff in &shop.staff[..STAFF - 1] {
            tm.create_booking(request(&shop, Some(*staff), date, time.clone()))
                .await
                .unwrap();
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let written = Arc::new(AtomicUsize::new(0));
    let mut writer_handles = Vec::new();
    for w in 0..4 {
        let tm = tm.clone();
        let shop = shop.clone();
        let stop = stop.clone();
        let written = written.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                // later days, one writer per staff member
                let (date, time) = nth_slot(24 + i);
                if tm
                    .create_booking(request(&shop, Some(shop.staff[w]), date, time))
                    .await
                    .is_ok()
                {
                    written.fetch_add(1, Ordering::Relaxed);
                }
                i += 1;
            }
        }));
    }

    let n_readers = 8;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let tm = tm.clone();
        let shop = shop.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                tm.check_availability(shop.business_id, first_day(), &[shop.service_id], None)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    println!("  {} bookings written during reads", written.load(Ordering::Relaxed));
    print_latency("availability query", &mut all_latencies);
}

async fn phase4_many_businesses(tm: Arc<TenantManager>) {
    let n_businesses = 50;
    let bookings_each = 20;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_businesses {
        let tm = tm.clone();
        handles.push(tokio::spawn(async move {
            let shop = new_shop(&tm).await;
            for i in 0..bookings_each {
                let (date, time) = nth_slot(i);
                tm.create_booking(request(&shop, None, date, time)).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    println!(
        "  {n_businesses} businesses x {bookings_each} bookings in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    init_logging(&std::env::var("SLOTWISE_LOG").unwrap_or_else(|_| "warn".into()));

    let dir = std::env::temp_dir().join(format!("slotwise_bench_{}", Ulid::new()));
    let config = EngineConfig {
        data_dir: dir.clone(),
        ..EngineConfig::from_env()
    };
    let collab = Collaborators {
        clock: Arc::new(FixedClock::new(first_day().pred_opt().unwrap().and_hms_opt(6, 0, 0).unwrap())),
        ..Collaborators::default()
    };
    let tm = Arc::new(TenantManager::new(config, collab));

    println!("=== slotwise stress benchmark ===");
    println!("data dir: {}\n", dir.display());

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&tm).await;

    println!("\n[phase 2] concurrent creates for one slot");
    phase2_contention(tm.clone()).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(tm.clone()).await;

    println!("\n[phase 4] many businesses");
    phase4_many_businesses(tm.clone()).await;

    let _ = std::fs::remove_dir_all(&dir);
}
