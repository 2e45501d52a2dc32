// tests/scheduler_jobs.rs
//
// DigestScheduler lifecycle and job table against a live timer loop.
// Jobs use a yearly trigger so only `trigger_now` makes them fire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::mpsc;

use standup_digest::DigestScheduler;

const YEARLY: &str = "0 0 1 1 *";

fn scheduler() -> DigestScheduler {
    DigestScheduler::new(Tz::UTC, Duration::from_secs(300))
}

async fn recv_within(rx: &mut mpsc::UnboundedReceiver<()>, ms: u64) -> bool {
    matches!(tokio::time::timeout(Duration::from_millis(ms), rx.recv()).await, Ok(Some(())))
}

#[tokio::test]
async fn rescheduling_same_id_keeps_one_entry_with_new_trigger() {
    let s = scheduler();
    assert!(s.schedule("daily_digest", "0 17 * * 1-5", || async { anyhow::Ok(()) }));
    assert!(s.schedule("daily_digest", "30 8 * * *", || async { anyhow::Ok(()) }));

    let jobs = s.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        jobs["daily_digest"].trigger,
        "cron[minute='30', hour='8', day='*', month='*', day_of_week='*']"
    );
    assert!(jobs["daily_digest"].next_run_time.is_some());
}

#[tokio::test]
async fn malformed_expression_returns_false_and_leaves_table_alone() {
    let s = scheduler();
    assert!(s.schedule("a", YEARLY, || async { anyhow::Ok(()) }));
    assert!(!s.schedule("a", "not a cron", || async { anyhow::Ok(()) }));
    assert!(!s.schedule("b", "0 25 * * *", || async { anyhow::Ok(()) }));

    let jobs = s.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert!(jobs["a"].trigger.contains("month='1'"));
}

#[tokio::test]
async fn unschedule_missing_is_false_and_idempotent() {
    let s = scheduler();
    assert!(s.schedule("a", YEARLY, || async { anyhow::Ok(()) }));
    let before = s.list_jobs();

    assert!(!s.unschedule("nope"));
    assert_eq!(s.list_jobs(), before);

    assert!(s.unschedule("a"));
    assert!(!s.unschedule("a"));
    assert!(s.list_jobs().is_empty());
    assert!(!s.trigger_now("a"));
}

#[tokio::test]
async fn trigger_now_fires_once_and_keeps_cadence() {
    let s = scheduler();
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(s.schedule("job", YEARLY, move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            anyhow::Ok(())
        }
    }));
    let next_before = s.list_jobs()["job"].next_run_time;

    s.start().await;
    assert!(s.trigger_now("job"));
    assert!(recv_within(&mut rx, 2_000).await, "job should fire");
    assert!(!recv_within(&mut rx, 200).await, "job should fire only once");

    assert_eq!(s.list_jobs()["job"].next_run_time, next_before);
    s.stop().await;
}

#[tokio::test]
async fn nothing_fires_while_stopped() {
    let s = scheduler();
    let (tx, mut rx) = mpsc::unbounded_channel();
    s.schedule("job", YEARLY, move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            anyhow::Ok(())
        }
    });

    assert!(s.list_jobs()["job"].pending);
    assert!(s.trigger_now("job"));
    assert!(!recv_within(&mut rx, 200).await);

    // Armed on start, still within the grace window.
    s.start().await;
    assert!(!s.list_jobs()["job"].pending);
    assert!(recv_within(&mut rx, 2_000).await);
    s.stop().await;
}

#[tokio::test]
async fn running_job_suppresses_overlapping_firing() {
    let s = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = runs.clone();
    s.schedule("slow", YEARLY, move || {
        let tx = tx.clone();
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_millis(400)).await;
            anyhow::Ok(())
        }
    });

    s.start().await;
    s.trigger_now("slow");
    assert!(recv_within(&mut rx, 2_000).await);
    assert!(s.list_jobs()["slow"].running);

    s.trigger_now("slow");
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!s.list_jobs()["slow"].running);

    // Free again: a new trigger runs.
    s.trigger_now("slow");
    assert!(recv_within(&mut rx, 2_000).await);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    s.stop().await;
}

#[tokio::test]
async fn failing_job_stays_scheduled() {
    let s = scheduler();
    let (tx, mut rx) = mpsc::unbounded_channel();
    s.schedule("flaky", YEARLY, move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            Err::<(), _>(anyhow::anyhow!("upstream exploded"))
        }
    });

    s.start().await;
    s.trigger_now("flaky");
    assert!(recv_within(&mut rx, 2_000).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(s.contains("flaky"));
    assert!(s.is_running());
    s.trigger_now("flaky");
    assert!(recv_within(&mut rx, 2_000).await, "still fires after an error");
    s.stop().await;
}

#[tokio::test]
async fn start_and_stop_are_idempotent_and_stop_abandons_in_flight() {
    let s = scheduler();
    let (tx, mut rx) = mpsc::unbounded_channel();
    s.schedule("long", YEARLY, move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        }
    });

    s.stop().await;
    s.start().await;
    s.start().await;
    assert!(s.is_running());

    s.trigger_now("long");
    assert!(recv_within(&mut rx, 2_000).await);

    tokio::time::timeout(Duration::from_secs(2), s.stop())
        .await
        .expect("stop should not wait for the in-flight job");
    s.stop().await;

    assert!(!s.is_running());
    let jobs = s.list_jobs();
    assert!(jobs["long"].pending);
    assert!(!jobs["long"].running);
}

#[tokio::test]
async fn unschedule_and_reschedule_does_not_overlap_in_flight_run() {
    let s = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let make = |runs: Arc<AtomicUsize>, tx: mpsc::UnboundedSender<()>| {
        move || {
            let tx = tx.clone();
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
                tokio::time::sleep(Duration::from_millis(400)).await;
                anyhow::Ok(())
            }
        }
    };
    s.schedule("digest", YEARLY, make(runs.clone(), tx.clone()));

    s.start().await;
    s.trigger_now("digest");
    assert!(recv_within(&mut rx, 2_000).await);

    assert!(s.unschedule("digest"));
    assert!(s.is_job_running("digest"));
    assert!(s.schedule("digest", YEARLY, make(runs.clone(), tx.clone())));
    assert!(s.list_jobs()["digest"].running);

    s.trigger_now("digest");
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!s.is_job_running("digest"));
    s.stop().await;
}
