//! Multi-threaded semaphore tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tr_core::SemError;
use tr_pthread::sync::semaphore::api;
use tr_pthread::{CancelFlag, ObjectTable, Timespec, NULL_ID};

fn wait_for_waiters(table: &ObjectTable, sem: u32, count: u32) {
    let semaphore = table.get(sem).unwrap();
    let start = Instant::now();
    while semaphore.waiters() < count {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "only {} of {} waiters blocked",
            semaphore.waiters(),
            count
        );
        thread::yield_now();
    }
}

#[test]
fn test_every_waiter_released_once() {
    const WAITERS: usize = 16;

    let table = Arc::new(ObjectTable::new());
    let sem = api::sem_init(&table, false, 0).unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let table = Arc::clone(&table);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                api::sem_wait(&table, sem, None).unwrap();
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for _ in 0..WAITERS {
        api::sem_post(&table, sem).unwrap();
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(released.load(Ordering::SeqCst), WAITERS);
    assert_eq!(api::sem_getvalue(&table, sem).unwrap(), 0);
    assert_eq!(table.get(sem).unwrap().waiters(), 0);
}

#[test]
fn test_posts_after_all_waiters_parked() {
    const WAITERS: u32 = 8;

    let table = Arc::new(ObjectTable::new());
    let mut sem = api::sem_init(&table, false, 0).unwrap();
    let id = sem;

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || api::sem_wait(&table, id, None))
        })
        .collect();

    wait_for_waiters(&table, id, WAITERS);
    assert_eq!(api::sem_destroy(&table, &mut sem), Err(SemError::Busy));

    for _ in 0..WAITERS {
        api::sem_post(&table, id).unwrap();
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    api::sem_destroy(&table, &mut sem).unwrap();
    assert_eq!(sem, NULL_ID);
}

#[test]
fn test_producer_consumer_counts_balance() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const ITEMS: usize = 500;

    let table = Arc::new(ObjectTable::new());
    let sem = api::sem_init(&table, false, 0).unwrap();
    let consumed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..ITEMS {
                    api::sem_post(&table, sem).unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let table = Arc::clone(&table);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                for _ in 0..ITEMS {
                    api::sem_wait(&table, sem, None).unwrap();
                    consumed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in producers.into_iter().chain(consumers) {
        handle.join().unwrap();
    }

    assert_eq!(consumed.load(Ordering::Relaxed), PRODUCERS * ITEMS);
    assert_eq!(api::sem_getvalue(&table, sem).unwrap(), 0);
}

#[test]
fn test_mixed_timed_and_untimed_waiters() {
    let table = Arc::new(ObjectTable::new());
    let mut sem = api::sem_init(&table, false, 0).unwrap();
    let id = sem;

    let timed: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let deadline = Timespec::after(Duration::from_millis(50));
                api::sem_timedwait(&table, id, &deadline, None)
            })
        })
        .collect();

    for handle in timed {
        assert_eq!(handle.join().unwrap(), Err(SemError::TimedOut));
    }
    assert_eq!(table.get(id).unwrap().waiters(), 0);

    let untimed = {
        let table = Arc::clone(&table);
        thread::spawn(move || api::sem_wait(&table, id, None))
    };
    wait_for_waiters(&table, id, 1);
    api::sem_post(&table, id).unwrap();
    assert_eq!(untimed.join().unwrap(), Ok(()));

    api::sem_destroy(&table, &mut sem).unwrap();
}

#[test]
fn test_cancel_one_of_many() {
    let table = Arc::new(ObjectTable::new());
    let sem = api::sem_init(&table, false, 0).unwrap();

    let victim_flag = Arc::new(CancelFlag::new());
    let victim = {
        let table = Arc::clone(&table);
        let flag = Arc::clone(&victim_flag);
        thread::spawn(move || api::sem_wait(&table, sem, Some(&flag)))
    };
    let bystander_flag = Arc::new(CancelFlag::new());
    let bystander = {
        let table = Arc::clone(&table);
        let flag = Arc::clone(&bystander_flag);
        thread::spawn(move || api::sem_wait(&table, sem, Some(&flag)))
    };

    wait_for_waiters(&table, sem, 2);
    victim_flag.request();
    api::sem_interrupt(&table, sem).unwrap();

    assert_eq!(victim.join().unwrap(), Err(SemError::Canceled));
    wait_for_waiters(&table, sem, 1);

    api::sem_post(&table, sem).unwrap();
    assert_eq!(bystander.join().unwrap(), Ok(()));
    assert_eq!(table.get(sem).unwrap().waiters(), 0);
}
