use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;

async fn connect(host: &str, port: u16, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("rollcall")
        .password("rollcall");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// A session tomorrow, so every booking lands before the cutoff.
async fn create_session(client: &tokio_postgres::Client, capacity: u32) -> Ulid {
    let sid = Ulid::new();
    let start = now_ms() + 24 * HOUR;
    let end = start + HOUR;
    client
        .batch_execute(&format!(
            r#"INSERT INTO sessions (id, capacity, start, "end") VALUES ('{sid}', {capacity}, {start}, {end})"#
        ))
        .await
        .unwrap();
    sid
}

async fn new_member(client: &tokio_postgres::Client) -> Ulid {
    let member = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO entitlements (member_id, credits) VALUES ('{member}', 100)"
        ))
        .await
        .unwrap();
    member
}

async fn book(client: &tokio_postgres::Client, member: Ulid, sid: Ulid) -> Ulid {
    let bid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, member_id, session_id) VALUES ('{bid}', '{member}', '{sid}')"
        ))
        .await
        .unwrap();
    bid
}

async fn session_counts(client: &tokio_postgres::Client, sid: Ulid) -> (String, String) {
    let msgs = client
        .simple_query(&format!("SELECT * FROM sessions WHERE id = '{sid}'"))
        .await
        .unwrap();
    for msg in msgs {
        if let SimpleQueryMessage::Row(row) = msg {
            return (
                row.get("booked").unwrap_or("?").to_string(),
                row.get("waitlisted").unwrap_or("?").to_string(),
            );
        }
    }
    ("?".into(), "?".into())
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let n = 2000;

    let mut members = Vec::with_capacity(n);
    for _ in 0..n {
        members.push(new_member(&client).await);
    }
    // Half the requests overflow into the waitlist.
    let sid = create_session(&client, (n / 2) as u32).await;

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for member in members {
        let t = Instant::now();
        book(&client, member, sid).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

/// Many connections in one tenant race for the last seats of one session.
async fn phase2_seat_race(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    let capacity = 20;
    let sid = create_session(&setup, capacity).await;

    let n_tasks = 50;
    let n_per_task = 20;
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            for _ in 0..n_per_task {
                let member = new_member(&client).await;
                book(&client, member, sid).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    let (booked, waitlisted) = session_counts(&setup, sid).await;
    println!(
        "  {n_tasks} tasks x {n_per_task} requests = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!("  capacity={capacity}, booked={booked}, waitlisted={waitlisted}");
}

/// Cancellations on a full session, each one promoting the head of the waitlist.
async fn phase3_cancel_churn(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let capacity = 10;
    let n = 500;
    let sid = create_session(&client, capacity).await;

    let mut bookings = Vec::with_capacity(n);
    for _ in 0..n {
        let member = new_member(&client).await;
        bookings.push(book(&client, member, sid).await);
    }

    let mut latencies = Vec::with_capacity(n);
    for bid in bookings {
        let t = Instant::now();
        client
            .batch_execute(&format!("DELETE FROM bookings WHERE id = '{bid}'"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let (booked, waitlisted) = session_counts(&client, sid).await;
    print_latency("cancel + promote latency", &mut latencies);
    println!("  after churn: booked={booked}, waitlisted={waitlisted}");
}

async fn phase4_roster_under_load(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    let sid = create_session(&setup, 100).await;
    for _ in 0..150 {
        let member = new_member(&setup).await;
        book(&setup, member, sid).await;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let wsid = create_session(&client, 50).await;
            while !stop.load(Ordering::Relaxed) {
                let member = new_member(&client).await;
                let bid = book(&client, member, wsid).await;
                let _ = client
                    .batch_execute(&format!("DELETE FROM bookings WHERE id = '{bid}'"))
                    .await;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let tenant = tenant.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let table = if i % 2 == 0 { "roster" } else { "waitlist" };
                let t = Instant::now();
                client
                    .simple_query(&format!("SELECT * FROM {table} WHERE session_id = '{sid}'"))
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

    print_latency("roster/waitlist query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;
    let start = Instant::now();
    let success = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            let sid = create_session(&client, 5).await;
            for _ in 0..ops_per_conn {
                let member = new_member(&client).await;
                book(&client, member, sid).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} bookings each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROLLCALL_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROLLCALL_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROLLCALL_PORT");

    println!("=== rollcall contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent seat race");
    phase2_seat_race(&host, port).await;

    println!("\n[phase 3] cancellation churn");
    phase3_cancel_churn(&host, port).await;

    println!("\n[phase 4] roster reads under write load");
    phase4_roster_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
