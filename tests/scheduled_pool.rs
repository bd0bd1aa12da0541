use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use threadmill::ScheduledPool;

#[test]
fn test_one_shot_fires_after_delay() {
    let pool = ScheduledPool::new(1);
    let armed = Instant::now();
    let handle = pool
        .schedule(move || armed.elapsed(), Duration::from_millis(40))
        .unwrap();
    assert!(handle.get().unwrap() >= Duration::from_millis(40));
}

#[test]
fn test_one_shots_fire_in_due_time_order() {
    let pool = ScheduledPool::new(1);
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let slots = [
        (Duration::from_millis(60), "third"),
        (Duration::from_millis(20), "first"),
        (Duration::from_millis(40), "second"),
    ];
    let handles: Vec<_> = slots
        .iter()
        .map(|&(delay, label)| {
            let order = order.clone();
            pool.schedule(move || order.lock().push(label), delay).unwrap()
        })
        .collect();

    for handle in &handles {
        handle.wait_done();
    }
    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[test]
fn test_cancelled_one_shot_never_runs() {
    let pool = ScheduledPool::new(1);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let handle = pool
        .schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(30),
        )
        .unwrap();
    assert!(handle.cancel(false));
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(handle.is_cancelled());
}

#[test]
fn test_fixed_delay_never_overlaps_itself() {
    let pool = ScheduledPool::new(4);
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let handle = {
        let active = active.clone();
        let overlaps = overlaps.clone();
        let runs = runs.clone();
        pool.schedule_with_fixed_delay(
            move || {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                // execution longer than the delay
                std::thread::sleep(Duration::from_millis(15));
                runs.fetch_add(1, Ordering::SeqCst);
                active.fetch_sub(1, Ordering::SeqCst);
            },
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
        .unwrap()
    };

    std::thread::sleep(Duration::from_millis(150));
    handle.cancel();
    std::thread::sleep(Duration::from_millis(40));

    assert!(runs.load(Ordering::SeqCst) >= 3);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_fixed_rate_keeps_nominal_schedule() {
    let pool = ScheduledPool::new(2);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let started = Instant::now();
    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(105));
    handle.cancel();
    let elapsed = started.elapsed();
    let seen = fired.load(Ordering::SeqCst);
    // nominal count over the window is elapsed/period; allow slack for a
    // loaded machine but require real periodicity
    assert!(seen >= 4, "saw only {seen} firings in {elapsed:?}");
}

#[test]
fn test_panicking_periodic_task_is_suppressed() {
    let pool = ScheduledPool::new(1);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("bad tick");
            },
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(handle.is_cancelled());
}
