use std::{
    thread,
    time::{Duration, Instant},
};
use taskpool::{parallel_map, BackpressurePolicy, Config, EntryState, PoolError, Scheduler, ThreadPoolInner};
use tracing::info;

fn intensive_calc(base: u64) -> u64 {
    let mut r: u64 = 0;
    for i in 0..100_000u64 {
        r = (r.wrapping_add(base * 31 + i)) ^ (r << 1);
    }
    r % 10_000
}

fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // more tasks than core + queue, so overflow workers and backpressure kick in
    let pool = ThreadPoolInner::with_config(
        Config::bounded(2, 4, 2)
            .with_keep_alive(Duration::from_secs(30))
            .with_policy(BackpressurePolicy::CallerRuns)
            .with_thread_prefix("demo-pool-"),
    )?;
    let handles = (1..=8)
        .map(|id| {
            pool.submit(move || {
                thread::sleep(Duration::from_millis(200));
                format!("task-{id} executed by {}", thread::current().name().unwrap_or("?"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    for handle in handles {
        match handle.wait() {
            Ok(line) => info!("{line}"),
            Err(e) => info!(error = %e, "task failed"),
        }
    }
    info!(metrics = ?pool.metrics(), "custom pool done");
    pool.shutdown_timeout(Duration::from_secs(5));

    let scheduler = Scheduler::new(2)?;
    let scheduled_at = Instant::now();
    let entry = scheduler.schedule(Duration::from_millis(500), move || {
        info!(elapsed = ?scheduled_at.elapsed(), "delayed task fired");
    })?;
    if entry.wait_timeout(Duration::from_secs(2)) != EntryState::Completed {
        info!("scheduled task did not finish in time");
    }
    scheduler.shutdown();

    let cf_pool = ThreadPoolInner::with_config(Config::fixed(4).with_thread_prefix("cf-"))?;
    let a = cf_pool.submit(|| intensive_calc(5))?;
    let b = cf_pool.submit(|| intensive_calc(6))?;
    let combined = cf_pool.combine(a, b, |a, b| a + b).then_apply(&cf_pool, |sum| sum * 10);
    match combined.wait_timeout(Duration::from_secs(5)) {
        Ok(value) => info!(value, "(a + b) * 10"),
        Err(e) => info!(error = %e, "combination failed"),
    }
    cf_pool.shutdown_timeout(Duration::from_secs(5));

    let squares = parallel_map(vec![Some(1), None, Some(3), Some(4)], |x: i64| x * x, Duration::from_secs(2));
    info!(?squares, "parallel squares");

    Ok(())
}
