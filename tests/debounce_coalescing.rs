use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use repatch::DebounceScheduler;

fn counting_scheduler(runs: &Arc<AtomicUsize>) -> DebounceScheduler {
    let runs = Arc::clone(runs);
    DebounceScheduler::new(move || {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test]
async fn rapid_starts_coalesce_into_one_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let sched = counting_scheduler(&runs);

    let mut waiters = Vec::new();
    for _ in 0..5 {
        waiters.push(sched.start());
    }
    for waiter in waiters {
        waiter.await;
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn starts_during_run_queue_exactly_one_trailing_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceLock<DebounceScheduler>> = Arc::new(OnceLock::new());

    let sched = {
        let runs = Arc::clone(&runs);
        let slot = Arc::clone(&slot);
        DebounceScheduler::new(move || {
            let runs = Arc::clone(&runs);
            let slot = Arc::clone(&slot);
            async move {
                let n = runs.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    // Three requests from inside the first run must still
                    // produce a single trailing run.
                    let sched = slot.get().expect("scheduler registered");
                    for _ in 0..3 {
                        let _ = sched.start();
                    }
                }
            }
        })
    };
    let _ = slot.set(sched.clone());

    sched.start().await;

    // Give the trailing run room to execute.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn idle_scheduler_runs_again_on_the_next_start() {
    let runs = Arc::new(AtomicUsize::new(0));
    let sched = counting_scheduler(&runs);

    sched.start().await;
    sched.start().await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn start_while_scheduled_joins_the_pending_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let sched = counting_scheduler(&runs);

    let first = sched.start();
    let second = sched.start();
    first.await;
    second.await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
