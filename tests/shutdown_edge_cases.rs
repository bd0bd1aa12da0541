use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use threadmill::{TaskError, ThreadPool};

#[test]
fn test_shutdown_lets_queued_tasks_drain() {
    let pool = ThreadPool::fixed(2);
    let completed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let completed = completed.clone();
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(10));
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        })
        .collect();

    // Seal immediately; the backlog must still drain.
    pool.shutdown();
    assert!(pool.is_shut_down());
    for handle in &handles {
        handle.wait_done();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 10);
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_now_cancels_queued_tasks() {
    let pool = ThreadPool::fixed(1);
    let gate = Arc::new(threadmill::CountdownGate::new(1));

    // Occupy the only worker so the rest of the submissions stay queued.
    let blocker_gate = gate.clone();
    let blocker = pool
        .submit(move || {
            blocker_gate.wait();
        })
        .unwrap();

    let queued: Vec<_> = (0..5).map(|i| pool.submit(move || i).unwrap()).collect();
    while pool.queued_tasks() < 5 {
        std::thread::sleep(Duration::from_millis(1));
    }

    pool.shutdown_now();
    gate.count_down();
    blocker.wait_done();

    for handle in &queued {
        handle.wait_done();
        assert!(handle.is_cancelled());
        assert_eq!(handle.get(), Err(TaskError::Cancelled));
    }
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_now_signals_running_task() {
    let pool = ThreadPool::fixed(1);
    let observed = Arc::new(AtomicUsize::new(0));

    let saw = observed.clone();
    let handle = pool
        .submit_cancellable(move |token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            saw.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // Give the worker time to claim the task, then interrupt it.
    std::thread::sleep(Duration::from_millis(20));
    pool.shutdown_now();

    handle.wait_done();
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_await_termination_times_out_while_running() {
    let pool = ThreadPool::fixed(1);
    pool.submit(|| std::thread::sleep(Duration::from_millis(200)))
        .unwrap();
    pool.shutdown();
    assert!(!pool.await_termination(Duration::from_millis(10)));
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_daemon_pool_drop_does_not_join() {
    let pool = ThreadPool::fixed_with_config(
        1,
        threadmill::PoolConfig {
            daemon: true,
            ..Default::default()
        },
    );
    let gate = Arc::new(threadmill::CountdownGate::new(1));
    let held = gate.clone();
    pool.submit(move || held.wait()).unwrap();

    // Dropping a daemon pool must not block on the stuck worker.
    drop(pool);
    gate.count_down();
}
