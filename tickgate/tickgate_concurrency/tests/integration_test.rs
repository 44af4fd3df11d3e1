//! Integration tests for tickgate_concurrency.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tickgate_concurrency::sync::Descending;
use tickgate_concurrency::*;
use tickgate_core::{init_logging, DispatcherConfig, LogLevel, WorkError};

// Initialize logging for tests
fn init_tracing() {
    let _ = init_logging(LogLevel::Debug);
}

#[test]
fn test_producers_keep_their_posting_order() {
    init_tracing();

    let dispatcher = MainThreadDispatcher::new(&DispatcherConfig::with_budget_ms(5.0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let handle = dispatcher.handle();
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for seq in 0..200 {
                    let seen = Arc::clone(&seen);
                    handle.post(move || seen.lock().push((producer, seq))).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    while dispatcher.pending() > 0 {
        dispatcher.pump();
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), 800);

    // Items from one producer run in the order that producer posted them
    for producer in 0..4 {
        let sequence: Vec<_> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(sequence, (0..200).collect::<Vec<_>>());
    }
}

#[test]
fn test_budget_spreads_slow_work_over_ticks() {
    init_tracing();

    let dispatcher = MainThreadDispatcher::with_budget(Duration::from_millis(10));
    let handle = dispatcher.handle();
    for _ in 0..6 {
        handle
            .post(|| thread::sleep(Duration::from_millis(4)))
            .unwrap();
    }

    let mut ticks = 0;
    while dispatcher.pending() > 0 {
        let report = dispatcher.pump();
        assert!(report.executed >= 1);
        // Never more than the budget allows, plus the item that crossed it
        assert!(report.executed <= 3);
        ticks += 1;
    }

    assert!(ticks >= 2);
    let stats = dispatcher.stats();
    assert_eq!(stats.items_executed, 6);
    assert!(stats.budget_exhausted_cycles >= 1);
}

#[test]
fn test_blocking_send_from_many_threads() {
    init_tracing();

    let dispatcher = MainThreadDispatcher::default();
    let total = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (1..=8)
        .map(|n| {
            let handle = dispatcher.handle();
            let total = Arc::clone(&total);
            thread::spawn(move || {
                handle
                    .send(move || total.fetch_add(n, Ordering::SeqCst) + n)
                    .unwrap()
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while workers.iter().any(|w| !w.is_finished()) {
        assert!(Instant::now() < deadline, "producers never unblocked");
        dispatcher.pump();
        thread::sleep(Duration::from_millis(1));
    }

    for worker in workers {
        assert!(worker.join().unwrap() <= 36);
    }
    assert_eq!(total.load(Ordering::SeqCst), 36);
}

#[test]
fn test_shutdown_unblocks_pending_senders() {
    init_tracing();

    let dispatcher = MainThreadDispatcher::default();
    let handle = dispatcher.handle();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let worker = thread::spawn(move || handle.send(move || flag.store(true, Ordering::SeqCst)));

    while dispatcher.pending() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    dispatcher.shutdown();

    match worker.join().unwrap() {
        Err(tickgate_core::Error::Work(WorkError::Abandoned)) => {}
        other => panic!("Expected abandoned work, got {:?}", other),
    }
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_priority_queue_feeds_dispatcher() {
    init_tracing();

    let queue: Arc<ConcurrentPriorityQueue<&'static str, u8, Descending>> =
        Arc::new(ConcurrentPriorityQueue::new());
    queue.enqueue("decorate", 1);
    queue.enqueue("physics", 9);
    queue.enqueue("audio", 5);

    let dispatcher = MainThreadDispatcher::default();
    let handle = dispatcher.handle();
    let order = Arc::new(Mutex::new(Vec::new()));

    while let Some((job, _)) = queue.try_dequeue() {
        let order = Arc::clone(&order);
        handle.post(move || order.lock().push(job)).unwrap();
    }
    dispatcher.pump();

    assert_eq!(*order.lock(), vec!["physics", "audio", "decorate"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_resources_handed_to_designated_thread() {
    init_tracing();

    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&constructed);
    let pool = AsyncResourcePool::with_factory(move |count: usize| {
        let start = counter.fetch_add(count, Ordering::SeqCst);
        async move { Ok::<_, anyhow::Error>((start..start + count).collect::<Vec<usize>>()) }
    });

    let dispatcher = MainThreadDispatcher::default();
    let handle = dispatcher.handle();

    // Await resources in the runtime and hand them over as completions
    let mut futures = Vec::new();
    for _ in 0..5 {
        let resource = pool.request_resource().await.unwrap();
        futures.push(handle.enqueue_with(move || resource * 10).unwrap());
    }

    // The designated thread here is the test task itself
    let report = dispatcher.pump();
    assert_eq!(report.executed, 5);

    let mut results = Vec::new();
    for future in futures {
        results.push(future.await.unwrap());
    }
    assert_eq!(results, vec![0, 10, 20, 30, 40]);

    // Resources go back and are reused before any new refill
    pool.release_resource(99);
    assert_eq!(pool.request_resource().await.unwrap(), 5);
    assert_eq!(pool.request_resource().await.unwrap(), 99);
    assert_eq!(pool.stats().refills_started, 3);
}
