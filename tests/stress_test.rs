//! Stress tests for managed tasks

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use veda_managed::prelude::*;

fn executor(name: &str, threads: usize) -> ManagedExecutor {
    let config = Config::builder()
        .num_threads(threads)
        .max_queue_size(100_000)
        .build()
        .unwrap();
    ManagedExecutor::new(name, config).unwrap()
}

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_tasks() {
    let executor = executor("many", 8);

    let tasks: Vec<Task<u64>> = (0..20_000u64)
        .map(|i| executor.submit(move || i % 7).unwrap())
        .collect();
    let sum: u64 = tasks.iter().map(|t| t.get().unwrap()).sum();

    let expected: u64 = (0..20_000u64).map(|i| i % 7).sum();
    assert_eq!(sum, expected);

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(30)));
    assert_eq!(executor.execution_stats().completed, 20_000);
    assert_eq!(executor.active_count(), 0);
}

#[test]
#[ignore]
fn stress_test_concurrent_submitters_and_callbacks() {
    let executor = Arc::new(executor("callbacks", 4));
    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let executor = executor.clone();
            let successes = successes.clone();
            let failures = failures.clone();
            thread::spawn(move || {
                for i in 0..1_000 {
                    let task = executor
                        .try_submit(move || if (t + i) % 5 == 0 { Err("unlucky") } else { Ok(i) })
                        .unwrap();
                    let (s, f) = (successes.clone(), failures.clone());
                    // inline, so callbacks of tasks drained after shutdown still run
                    task.on_success_with(
                        move |_, _| {
                            s.fetch_add(1, Ordering::SeqCst);
                        },
                        Arc::new(DirectExecutor),
                    )
                    .on_failure_with(
                        move |_, _| {
                            f.fetch_add(1, Ordering::SeqCst);
                        },
                        Arc::new(DirectExecutor),
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(30)));

    assert_eq!(successes.load(Ordering::SeqCst) + failures.load(Ordering::SeqCst), 8_000);
    assert_eq!(failures.load(Ordering::SeqCst), 1_600);
    let stats = executor.execution_stats();
    assert_eq!(stats.failed, 1_600);
    assert_eq!(stats.completed, 6_400);
}

#[test]
#[ignore]
fn stress_test_cancel_storm() {
    let executor = executor("cancel", 4);
    let balance = Arc::new(Mutex::new((0usize, 0usize)));
    let b = balance.clone();
    let executor = executor.with_context_provider(move || -> Arc<dyn ExecutionContext> {
        let (b1, b2) = (b.clone(), b.clone());
        Arc::new(FnContext::new(
            move || {
                b1.lock().0 += 1;
                Ok(())
            },
            move || {
                b2.lock().1 += 1;
                Ok(())
            },
        ))
    });

    let tasks: Vec<Task<()>> = (0..5_000)
        .map(|_| {
            executor
                .execute(|| {
                    for _ in 0..100 {
                        if is_interrupted() {
                            return;
                        }
                        thread::yield_now();
                    }
                })
                .unwrap()
        })
        .collect();

    let cancelled = tasks
        .iter()
        .enumerate()
        .filter(|(i, task)| i % 2 == 0 && task.cancel(true))
        .count();

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(30)));

    for task in &tasks {
        assert!(task.is_done());
        assert!(task.start_time() == 0 || task.start_time() <= task.completion_time());
    }
    assert_eq!(tasks.iter().filter(|t| t.is_cancelled()).count(), cancelled);

    let (installs, uninstalls) = *balance.lock();
    assert_eq!(installs, uninstalls);
    assert_eq!(executor.execution_stats().cancelled as usize, cancelled);
}

#[test]
#[ignore]
fn stress_test_hang_scan_while_busy() {
    let config = Config::builder()
        .num_threads(4)
        .hung_threshold(Duration::from_millis(5))
        .build()
        .unwrap();
    let executor = Arc::new(ManagedExecutor::new("scan", config).unwrap());

    let scanner = {
        let executor = executor.clone();
        thread::spawn(move || {
            let mut reports = 0;
            for _ in 0..200 {
                reports += executor.hung_tasks().len();
                thread::sleep(Duration::from_millis(1));
            }
            reports
        })
    };

    let tasks: Vec<Task<()>> = (0..400)
        .map(|_| executor.execute(|| thread::sleep(Duration::from_millis(2))).unwrap())
        .collect();
    for task in &tasks {
        task.get().unwrap();
    }

    assert!(scanner.join().unwrap() > 0);
    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(30)));
    assert!(executor.hung_tasks().is_empty());
}
