use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use threadmill::{CountdownGate, RendezvousBarrier, SingleSlot, TaskError};

#[test]
fn test_gate_releases_after_exactly_n_signals() {
    let gate = Arc::new(CountdownGate::new(4));
    let released = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let gate = gate.clone();
            let released = released.clone();
            thread::spawn(move || {
                gate.wait();
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for _ in 0..3 {
        gate.count_down();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }
    gate.count_down();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 3);

    // the (N+1)-th signal is a quiet no-op
    gate.count_down();
    assert_eq!(gate.count(), 0);
}

#[test]
fn test_barrier_hand_off_once_per_generation_of_four() {
    let parties = 4;
    let generations = Arc::new(AtomicUsize::new(0));
    let tally = generations.clone();
    let barrier = Arc::new(RendezvousBarrier::with_action(parties, move || {
        tally.fetch_add(1, Ordering::SeqCst);
    }));

    for round in 0..3 {
        let mut joins = Vec::new();
        for _ in 0..parties {
            let barrier = barrier.clone();
            joins.push(thread::spawn(move || barrier.wait().unwrap()));
        }
        let results: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_leader).count(), 1);
        assert!(results.iter().all(|r| r.generation == round as u64));
        assert_eq!(generations.load(Ordering::SeqCst), round + 1);
    }
}

#[test]
fn test_reset_breaks_two_of_four_waiters() {
    let barrier = Arc::new(RendezvousBarrier::new(4));
    let mut joins = Vec::new();
    for _ in 0..2 {
        let barrier = barrier.clone();
        joins.push(thread::spawn(move || barrier.wait()));
    }
    while barrier.waiting() < 2 {
        thread::sleep(Duration::from_millis(1));
    }

    barrier.reset();
    for join in joins {
        assert_eq!(join.join().unwrap(), Err(TaskError::BrokenBarrier));
    }
}

#[test]
fn test_gate_wait_timeout_never_disturbs_counters() {
    let gate = Arc::new(CountdownGate::new(2));
    assert!(!gate.wait_timeout(Duration::from_millis(10)));
    // the impatient waiter changed nothing for anyone else
    assert_eq!(gate.count(), 2);
    gate.count_down();
    gate.count_down();
    assert!(gate.wait_timeout(Duration::from_millis(10)));
}

#[test]
fn test_slot_alternates_between_producer_and_consumer() {
    let slot = Arc::new(SingleSlot::new());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let producer = {
        let slot = slot.clone();
        thread::spawn(move || {
            for i in 0..50u32 {
                slot.put(i);
            }
        })
    };
    let consumer = {
        let slot = slot.clone();
        let seen = seen.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                seen.lock().push(slot.take());
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
    assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    assert!(slot.is_empty());
}
