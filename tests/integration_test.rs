use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use veda_managed::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pool(threads: usize) -> Arc<CpuPool> {
    let config = Config::builder().num_threads(threads).build().unwrap();
    Arc::new(CpuPool::new(&config).unwrap())
}

/// Occupies the (single) worker of `pool` until the returned sender is used
/// or dropped.
fn block_worker(pool: &Arc<CpuPool>) -> Sender<()> {
    let (release_tx, release_rx): (Sender<()>, Receiver<()>) = bounded(0);
    let (started_tx, started_rx) = bounded(1);
    pool.execute(Box::new(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    }))
    .unwrap();
    started_rx.recv_timeout(WAIT).unwrap();
    release_tx
}

#[derive(Debug)]
struct Boom(&'static str);

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

#[test]
fn test_value_without_context() {
    init_logging();
    let pool = pool(2);

    let task = Task::builder(pool.clone(), || 42)
        .hung_threshold(Duration::from_millis(10_000))
        .build();
    task.execute().unwrap();

    assert_eq!(task.get().unwrap(), 42);
    assert!(task.cause().is_none());
    assert!(task.is_done());
    assert!(!task.is_cancelled());
    assert!(!task.is_task_hang());
}

#[test]
fn test_failure_reaches_get_cause_and_failure_callback() {
    init_logging();
    let pool = pool(2);
    let successes = Arc::new(AtomicUsize::new(0));
    let (failure_tx, failure_rx) = bounded(4);

    let task: Task<i32> = Task::try_builder(pool.clone(), || Err::<i32, _>(Boom("E"))).build();
    let s = successes.clone();
    task.on_success(move |_, _| {
        s.fetch_add(1, Ordering::SeqCst);
    })
    .on_failure(move |task, failure| {
        failure_tx.send((task.id(), failure.clone())).unwrap();
    });
    task.execute().unwrap();

    let err = task.get().unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.downcast_ref::<Boom>().unwrap().0, "E");
    assert!(task.cause().unwrap().ptr_eq(failure));

    let (id, delivered) = failure_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(id, task.id());
    assert!(delivered.ptr_eq(failure));

    // exactly once, and never the success path
    assert!(failure_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(successes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_hang_detection_tracks_completion() {
    init_logging();
    let pool = pool(1);

    let task = Task::builder(pool.clone(), || thread::sleep(Duration::from_millis(200)))
        .hung_threshold(Duration::from_millis(50))
        .build();
    task.execute().unwrap();

    thread::sleep(Duration::from_millis(100));
    assert!(task.is_task_hang());
    assert_eq!(task.state(), TaskState::Running);

    task.get().unwrap();
    assert!(!task.is_task_hang());
}

thread_local! {
    static STORE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn store_top() -> Option<String> {
    STORE.with(|store| store.borrow().last().cloned())
}

#[test]
fn test_context_is_visible_inside_and_gone_after() {
    init_logging();
    let pool = pool(1);
    let context: Arc<dyn ExecutionContext> = Arc::new(FnContext::new(
        || {
            STORE.with(|store| store.borrow_mut().push("X".to_string()));
            Ok(())
        },
        || {
            STORE.with(|store| store.borrow_mut().pop());
            Ok(())
        },
    ));

    let inside = Task::builder(pool.clone(), store_top).context(context).build();
    inside.execute().unwrap();
    assert_eq!(inside.get().unwrap().as_deref(), Some("X"));

    // same single worker, no context this time
    let after = Task::builder(pool.clone(), store_top).build();
    after.execute().unwrap();
    assert_eq!(after.get().unwrap(), None);

    // nothing leaked onto the caller's thread either
    assert_eq!(store_top(), None);
}

#[test]
fn test_cancel_before_start() {
    init_logging();
    let pool = pool(1);
    let release = block_worker(&pool);
    let hits = Arc::new(AtomicUsize::new(0));

    let task = Task::builder(pool.clone(), || 1).build();
    let (s, f) = (hits.clone(), hits.clone());
    task.on_success(move |_, _| {
        s.fetch_add(1, Ordering::SeqCst);
    })
    .on_failure(move |_, _| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    task.execute().unwrap();

    assert!(task.cancel(true));
    drop(release);

    // let the worker reach the cancelled job
    let probe = Task::builder(pool.clone(), || ()).build();
    probe.execute().unwrap();
    probe.get().unwrap();

    assert!(task.is_cancelled());
    assert_eq!(task.start_time(), 0);
    assert_eq!(task.completion_time(), 0);
    assert_eq!(task.task_run_time(), Duration::ZERO);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(matches!(task.get(), Err(Error::Cancelled)));
}

#[test]
fn test_callback_registered_after_completion() {
    init_logging();
    let pool = pool(2);

    let task = Task::builder(pool.clone(), || "done".to_string()).build();
    task.execute().unwrap();
    task.get().unwrap();

    let (tx, rx) = bounded(2);
    let direct_tx = tx.clone();
    task.on_success(move |_, value| tx.send(value.clone()).unwrap());
    task.on_success_with(
        move |_, value| direct_tx.send(format!("direct {}", value)).unwrap(),
        Arc::new(DirectExecutor),
    );

    let mut seen = vec![
        rx.recv_timeout(WAIT).unwrap(),
        rx.recv_timeout(WAIT).unwrap(),
    ];
    seen.sort();
    assert_eq!(seen, vec!["direct done".to_string(), "done".to_string()]);
}

#[test]
fn test_timestamps_are_monotone() {
    init_logging();
    let pool = pool(4);

    let tasks: Vec<Task<u64>> = (0..50u64)
        .map(|i| {
            let task = Task::builder(pool.clone(), move || {
                if i % 10 == 0 {
                    thread::sleep(Duration::from_millis(5));
                }
                i * 2
            })
            .build();
            task.execute().unwrap();
            task
        })
        .collect();

    for (i, task) in tasks.iter().enumerate() {
        assert_eq!(task.get().unwrap(), i as u64 * 2);
        assert!(0 < task.submission_time());
        assert!(task.submission_time() <= task.start_time());
        assert!(task.start_time() <= task.completion_time());
        assert_eq!(
            task.task_run_time(),
            Duration::from_millis(task.completion_time() - task.start_time())
        );
    }
}

#[test]
fn test_terminal_reads_are_stable() {
    init_logging();
    let pool = pool(2);

    let task = Task::builder(pool.clone(), || 7).build();
    task.execute().unwrap();
    task.get().unwrap();

    let first = (task.completion_time(), task.task_run_time(), task.state());
    thread::sleep(Duration::from_millis(20));
    for _ in 0..3 {
        assert_eq!((task.completion_time(), task.task_run_time(), task.state()), first);
        assert_eq!(task.get().unwrap(), 7);
        assert!(task.is_done());
        assert!(!task.is_task_hang());
        assert!(!task.cancel(true));
    }
}

#[test]
fn test_run_time_grows_while_running() {
    init_logging();
    let pool = pool(1);
    let (release_tx, release_rx) = bounded::<()>(0);
    let (started_tx, started_rx) = bounded(1);

    let task = Task::builder(pool.clone(), move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    })
    .build();
    task.execute().unwrap();
    started_rx.recv_timeout(WAIT).unwrap();

    thread::sleep(Duration::from_millis(30));
    let running = task.task_run_time();
    assert!(running >= Duration::from_millis(20));
    assert_eq!(task.completion_time(), 0);

    release_tx.send(()).unwrap();
    task.get().unwrap();
    assert!(task.task_run_time() >= running);
}

#[test]
fn test_get_timeout_does_not_abort_work() {
    init_logging();
    let pool = pool(1);

    let task = Task::builder(pool.clone(), || {
        thread::sleep(Duration::from_millis(100));
        1
    })
    .build();
    task.execute().unwrap();

    assert!(matches!(task.get_timeout(Duration::from_millis(10)), Err(Error::Timeout)));
    assert_eq!(task.get_timeout(WAIT).unwrap(), 1);
}

#[test]
fn test_context_symmetry_under_failure() {
    init_logging();
    let pool = pool(4);
    let balance = Arc::new(Mutex::new((0usize, 0usize)));

    let tasks: Vec<Task<()>> = (0..20)
        .map(|i| {
            let (b1, b2) = (balance.clone(), balance.clone());
            let task = Task::try_builder(pool.clone(), move || {
                if i % 3 == 0 {
                    Err(Boom("odd one"))
                } else {
                    Ok(())
                }
            })
            .context(Arc::new(FnContext::new(
                move || {
                    b1.lock().0 += 1;
                    Ok(())
                },
                move || {
                    b2.lock().1 += 1;
                    Ok(())
                },
            )))
            .build();
            task.execute().unwrap();
            task
        })
        .collect();

    let failed = tasks.iter().filter(|t| t.get().is_err()).count();

    assert_eq!(failed, 7);
    assert_eq!(*balance.lock(), (20, 20));
}

#[test]
fn test_hung_tasks_reported_by_executor() {
    init_logging();
    let config = Config::builder()
        .num_threads(2)
        .hung_threshold(Duration::from_millis(30))
        .build()
        .unwrap();
    let executor = ManagedExecutor::new("hang-check", config).unwrap();
    let (release_tx, release_rx) = bounded::<()>(0);

    let slow = executor
        .execute(move || {
            let _ = release_rx.recv();
        })
        .unwrap();
    let fast = executor.submit(|| 1).unwrap();
    fast.get().unwrap();

    thread::sleep(Duration::from_millis(60));
    let hung = executor.hung_tasks();
    assert_eq!(hung.len(), 1);
    assert_eq!(hung[0].id, slow.id());
    assert!(hung[0].hung);

    release_tx.send(()).unwrap();
    slow.get().unwrap();
    executor.shutdown();
    assert!(executor.await_termination(WAIT));
    assert!(executor.hung_tasks().is_empty());
}
