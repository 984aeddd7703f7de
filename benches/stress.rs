use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 1, 7)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid bench epoch")
}

/// Wire timestamp `hours` after the bench epoch.
fn at(hours: i64) -> String {
    (epoch() + chrono::Duration::hours(hours))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("shiftd")
        .user("shiftd")
        .password(std::env::var("SHIFTD_PASSWORD").unwrap_or_else(|_| "shiftd".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// First row's `column` of a simple query.
async fn first_value(client: &tokio_postgres::Client, sql: &str, column: &str) -> String {
    let messages = client.simple_query(sql).await.expect(sql);
    messages
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get(column).map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no {column} in reply to {sql}"))
}

/// Register a fresh business and return a session already authorized as its
/// admin, plus the token for further sessions.
async fn fresh_business(host: &str, port: u16) -> (tokio_postgres::Client, String) {
    let client = connect(host, port).await;
    let tag = Ulid::new();
    let token = first_value(
        &client,
        &format!("INSERT INTO businesses (name, email) VALUES ('Bench {tag}', '{tag}@bench.test')"),
        "token",
    )
    .await;
    authorize(&client, &token).await;
    (client, token)
}

async fn authorize(client: &tokio_postgres::Client, token: &str) {
    client
        .batch_execute(&format!("SET SESSION AUTHORIZATION '{token}'"))
        .await
        .unwrap();
}

async fn hire(client: &tokio_postgres::Client, name: &str) -> String {
    first_value(
        client,
        &format!(
            "INSERT INTO employees (name, email, role) VALUES ('{name}', '{}@bench.test', 'staff')",
            Ulid::new()
        ),
        "id",
    )
    .await
}

/// Sorted latency samples of one phase.
struct Samples(Vec<Duration>);

impl Samples {
    fn new(mut raw: Vec<Duration>) -> Self {
        raw.sort_unstable();
        Self(raw)
    }

    fn ms(d: Duration) -> f64 {
        d.as_secs_f64() * 1e3
    }

    fn quantile(&self, q: f64) -> Duration {
        let last = self.0.len() - 1;
        self.0[((last as f64) * q).round() as usize]
    }

    fn report(&self, label: &str) {
        let Some(max) = self.0.last() else {
            println!("  {label}: no samples");
            return;
        };
        let mean = self.0.iter().sum::<Duration>() / self.0.len() as u32;
        println!(
            "  {label}: n={} mean={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.0.len(),
            Self::ms(mean),
            Self::ms(self.quantile(0.50)),
            Self::ms(self.quantile(0.95)),
            Self::ms(self.quantile(0.99)),
            Self::ms(*max),
        );
    }
}

async fn phase1_sequential(host: &str, port: u16) {
    let (client, _) = fresh_business(host, port).await;
    let employee = hire(&client, "Solo").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as i64 {
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO shifts (employee_id, start_time, end_time) VALUES ('{employee}', '{}', '{}')",
                at(i * 2),
                at(i * 2 + 1)
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} shifts in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    Samples::new(latencies).report("write latency");
}

/// Many sessions racing for the same slots of one employee: exactly one
/// insert per slot may win.
async fn phase2_contended(host: &str, port: u16) {
    let (client, token) = fresh_business(host, port).await;
    let employee = hire(&client, "Contended").await;

    let n_tasks = 10;
    let slots = 200i64;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let token = token.clone();
        let employee = employee.clone();
        let (won, lost) = (won.clone(), lost.clone());
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            authorize(&client, &token).await;
            for slot in 0..slots {
                let result = client
                    .batch_execute(&format!(
                        "INSERT INTO shifts (employee_id, start_time, end_time) VALUES ('{employee}', '{}', '{}')",
                        at(slot * 3),
                        at(slot * 3 + 2)
                    ))
                    .await;
                match result {
                    Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as i64 * slots;
    println!(
        "  {n_tasks} sessions x {slots} slots = {total} attempts in {:.2}s ({:.0} ops/sec)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  won={} (expected {slots}), refused={}",
        won.load(Ordering::Relaxed),
        lost.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let (setup, token) = fresh_business(host, port).await;
    let mut staff = Vec::new();
    for i in 0..20 {
        let id = hire(&setup, &format!("Staff {i}")).await;
        for day in 0..20i64 {
            setup
                .batch_execute(&format!(
                    "INSERT INTO shifts (employee_id, start_time, end_time) VALUES ('{id}', '{}', '{}')",
                    at(day * 24 + 9),
                    at(day * 24 + 17)
                ))
                .await
                .unwrap();
        }
        staff.push(id);
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, employee) in staff.iter().take(5).cloned().enumerate() {
        let host = host.to_string();
        let token = token.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            authorize(&client, &token).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let base = 10_000 + (w as i64) * 100_000 + i * 2;
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO shifts (employee_id, start_time, end_time) VALUES ('{employee}', '{}', '{}')",
                        at(base),
                        at(base + 1)
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let token = token.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            authorize(&client, &token).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let page = (r + i) % 5 + 1;
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM shifts WHERE start_date = '2030-01-07' AND end_date = '2030-01-20' \
                         AND page = {page} AND per_page = 50"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::with_capacity(n_readers * reads_per_reader);
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    Samples::new(all_latencies).report("paginated shift listing");
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let (client, _) = fresh_business(&host, port).await;
            let employee = hire(&client, "Storm").await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&format!(
                        "INSERT INTO shifts (employee_id, start_time, end_time) VALUES ('{employee}', '{}', '{}')",
                        at(i * 2),
                        at(i * 2 + 1)
                    ))
                    .await
                    .unwrap();
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
        "  {n_conns} businesses, {ops_per_conn} shifts each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SHIFTD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SHIFTD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SHIFTD_PORT");

    println!("=== shiftd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Every phase registers its own business.

    println!("[phase 1] sequential shift inserts");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended inserts on one employee");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
