#[cfg(test)]
mod tests {
    use crossbeam::channel;
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };
    use taskpool::{parallel_map, BackpressurePolicy, Config, ThreadPoolInner};

    fn measure<T>(name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        println!("✓ {}: {:?}", name, start.elapsed());
        result
    }

    /// Tracks how many tasks run at the same time.
    #[derive(Default)]
    struct Concurrency {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Concurrency {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn load_test_1_never_exceeds_max_workers() {
        println!("\n=== LOAD TEST 1: saturation with C=2, M=4, Q=2 ===");
        let pool = ThreadPoolInner::with_config(
            Config::bounded(2, 4, 2)
                .with_policy(BackpressurePolicy::CallerRuns)
                .with_thread_prefix("load-"),
        )
        .unwrap();
        let (release, gate) = channel::bounded::<()>(0);
        let tracker = Arc::new(Concurrency::default());

        // max + queue blocking tasks fill every worker and every slot
        let blocked: Vec<_> = (0..6)
            .map(|i| {
                let gate = gate.clone();
                let tracker = tracker.clone();
                pool.submit(move || {
                    tracker.enter();
                    let _ = gate.recv();
                    tracker.exit();
                    i
                })
                .unwrap()
            })
            .collect();

        let metrics = pool.metrics();
        assert_eq!(metrics.live_workers, 4);
        assert_eq!(metrics.queued_tasks, 2);

        let caller = thread::current().id();
        let overflow = pool.submit(move || thread::current().id() == caller).unwrap();
        assert_eq!(overflow.wait(), Ok(true));
        assert_eq!(pool.metrics().caller_runs, 1);
        assert_eq!(pool.metrics().live_workers, 4);

        drop(release);
        let values: Vec<i32> = blocked.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(values, (0..6).collect::<Vec<_>>());

        assert!(pool.shutdown_timeout(Duration::from_secs(5)));
        let metrics = pool.metrics();
        assert_eq!(metrics.largest_pool_size, 4);
        assert_eq!(metrics.completed_tasks, 7);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 4);
        println!("  peak concurrency: {}", tracker.peak.load(Ordering::SeqCst));
    }

    #[test]
    fn load_test_2_short_tasks_on_demo_pool() {
        println!("\n=== LOAD TEST 2: 8 sleeping tasks on C=2, M=4, Q=2 ===");
        let pool = ThreadPoolInner::with_config(Config::bounded(2, 4, 2).with_thread_prefix("demo-pool-")).unwrap();

        let results = measure("8 tasks @ 200ms", || {
            let handles: Vec<_> = (1..=8)
                .map(|id| {
                    pool.submit(move || {
                        thread::sleep(Duration::from_millis(200));
                        format!("task-{id}")
                    })
                    .unwrap()
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.wait().unwrap())
                .collect::<HashSet<_>>()
        });

        assert_eq!(results.len(), 8);
        let metrics = pool.metrics();
        assert!(metrics.largest_pool_size <= 4);
        println!("  caller runs: {}", metrics.caller_runs);
        pool.shutdown();
    }

    #[test]
    fn load_test_3_many_submitters() {
        println!("\n=== LOAD TEST 3: 4 submitters x 2500 tasks ===");
        let pool = ThreadPoolInner::with_config(Config::bounded(4, 8, 16)).unwrap();
        let sum = Arc::new(AtomicUsize::new(0));

        measure("10k tasks", || {
            let submitters: Vec<_> = (0..4)
                .map(|_| {
                    let pool = pool.clone();
                    let sum = sum.clone();
                    thread::spawn(move || {
                        let handles: Vec<_> = (0..2500)
                            .map(|i| {
                                let sum = sum.clone();
                                pool.submit(move || {
                                    sum.fetch_add(i, Ordering::Relaxed);
                                    i * 2
                                })
                                .unwrap()
                            })
                            .collect();
                        handles.into_iter().map(|h| h.wait().unwrap()).sum::<usize>()
                    })
                })
                .collect();

            let doubled: usize = submitters.into_iter().map(|t| t.join().unwrap()).sum();
            assert_eq!(doubled, 4 * 2 * (0..2500).sum::<usize>());
        });

        assert!(pool.shutdown_timeout(Duration::from_secs(5)));
        let metrics = pool.metrics();
        assert_eq!(sum.load(Ordering::Relaxed), 4 * (0..2500).sum::<usize>());
        assert_eq!(metrics.completed_tasks, 10_000);
        assert_eq!(metrics.total_submitted, 10_000);
        assert!(metrics.largest_pool_size <= 8);
        println!("  caller runs: {}", metrics.caller_runs);
        println!("  success rate: {:.1}%", metrics.success_rate() * 100.0);
    }

    #[test]
    fn load_test_4_discard_oldest_accounts_for_every_task() {
        println!("\n=== LOAD TEST 4: discard-oldest under pressure ===");
        let pool = ThreadPoolInner::with_config(
            Config::bounded(1, 2, 4).with_policy(BackpressurePolicy::DiscardOldest),
        )
        .unwrap();

        let handles: Vec<_> = (0..200)
            .map(|_| {
                pool.submit(|| thread::sleep(Duration::from_millis(1)))
                    .unwrap()
            })
            .collect();

        let (mut done, mut dropped) = (0, 0);
        for handle in handles {
            match handle.wait() {
                Ok(()) => done += 1,
                Err(e) => {
                    assert_eq!(e, taskpool::TaskError::Discarded);
                    dropped += 1;
                }
            }
        }

        assert!(pool.shutdown_timeout(Duration::from_secs(5)));
        let metrics = pool.metrics();
        assert_eq!(done + dropped, 200);
        assert_eq!(metrics.discarded_tasks, dropped);
        assert_eq!(metrics.completed_tasks, done);
        println!("  completed: {}, discarded: {}", done, dropped);
    }

    #[test]
    fn load_test_5_cached_pool_grows_and_shrinks() {
        println!("\n=== LOAD TEST 5: hand-off pool ===");
        let pool = ThreadPoolInner::with_config(Config::cached().with_keep_alive(Duration::from_millis(100))).unwrap();
        let (release, gate) = channel::bounded::<()>(0);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                pool.submit(move || gate.recv().is_err()).unwrap()
            })
            .collect();
        assert_eq!(pool.metrics().live_workers, 16);

        drop(release);
        assert!(handles.into_iter().all(|h| h.wait() == Ok(true)));

        thread::sleep(Duration::from_millis(1000));
        assert_eq!(pool.metrics().live_workers, 0);
        assert_eq!(pool.metrics().largest_pool_size, 16);
        assert!(pool.shutdown_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn load_test_6_parallel_map_large_batch() {
        println!("\n=== LOAD TEST 6: parallel map over 1000 inputs ===");
        let inputs: Vec<Option<u64>> = (0..1000).map(|i| if i % 10 == 0 { None } else { Some(i) }).collect();

        let results = measure("1000 squares", || parallel_map(inputs, |x| x * x, Duration::from_secs(5)));

        assert_eq!(results.len(), 1000);
        for (i, slot) in results.iter().enumerate() {
            let i = i as u64;
            if i % 10 == 0 {
                assert_eq!(*slot, None);
            } else {
                assert_eq!(*slot, Some(i * i));
            }
        }
    }
}
