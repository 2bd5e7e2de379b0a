//! Integration tests for task groups and cancellation scopes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use rosetta_op_runtime::{CancellationScope, SignalWatcher, TaskGroup};
use tokio::sync::mpsc;
use tokio::time::timeout;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_all_tasks_succeed() {
    let root = CancellationScope::new();
    let mut group = TaskGroup::new(&root);
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..5 {
        let finished = finished.clone();
        group.register(format!("worker-{}", i), move |_scope| async move {
            tokio::time::sleep(Duration::from_millis(10 * i)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let scope = group.scope();

    timeout(JOIN_TIMEOUT, group.run().join())
        .await
        .expect("join timed out")
        .expect("no task failed");

    assert_eq!(finished.load(Ordering::SeqCst), 5);
    assert!(!scope.is_cancelled());
    assert!(!root.is_cancelled());
}

#[tokio::test]
async fn test_first_failure_cancels_the_others() {
    let root = CancellationScope::new();
    let mut group = TaskGroup::new(&root);
    let observed = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let observed = observed.clone();
        group.register(format!("waiter-{}", i), move |scope| async move {
            scope.cancelled().await;
            assert!(scope.is_cancelled());
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    group.register("failing", |_scope| async move {
        Err(anyhow!("embedded node exited with status 1"))
    });
    let scope = group.scope();

    let failure = timeout(JOIN_TIMEOUT, group.run().join())
        .await
        .expect("join timed out")
        .expect_err("failure should surface");

    assert_eq!(failure.task(), "failing");
    assert_eq!(
        failure.error().to_string(),
        "embedded node exited with status 1"
    );
    assert!(scope.is_cancelled());
    assert_eq!(observed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_join_waits_for_slow_tasks_after_failure() {
    let root = CancellationScope::new();
    let mut group = TaskGroup::new(&root);
    let cleaned_up = Arc::new(AtomicBool::new(false));

    group.register("fails-fast", |_scope| async move { Err(anyhow!("boom")) });
    {
        let cleaned_up = cleaned_up.clone();
        group.register("slow-cleanup", move |scope| async move {
            scope.cancelled().await;
            // Still cleaning up after the failure was observed
            tokio::time::sleep(Duration::from_millis(100)).await;
            cleaned_up.store(true, Ordering::SeqCst);
            Ok(())
        });
    }

    let result = timeout(JOIN_TIMEOUT, group.run().join())
        .await
        .expect("join timed out");

    assert!(result.is_err());
    assert!(cleaned_up.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_only_first_of_many_failures_is_surfaced() {
    let root = CancellationScope::new();
    let mut group = TaskGroup::new(&root);

    group.register("first", |_scope| async move { Err(anyhow!("first error")) });
    group.register("second", |scope| async move {
        scope.cancelled().await;
        Err(anyhow!("second error"))
    });

    let failure = timeout(JOIN_TIMEOUT, group.run().join())
        .await
        .expect("join timed out")
        .unwrap_err();

    assert_eq!(failure.task(), "first");
}

#[tokio::test]
async fn test_repeated_cancellation_has_no_extra_effect() {
    let root = CancellationScope::new();
    let mut group = TaskGroup::new(&root);
    let wakeups = Arc::new(AtomicUsize::new(0));

    {
        let wakeups = wakeups.clone();
        group.register("waiter", move |scope| async move {
            scope.cancelled().await;
            wakeups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let running = group.run();
    let scope = running.scope();
    let canceller = {
        let scope = scope.clone();
        tokio::spawn(async move { scope.cancel() })
    };
    scope.cancel();
    root.cancel();
    canceller.await.unwrap();

    timeout(JOIN_TIMEOUT, running.join())
        .await
        .expect("join timed out")
        .expect("cancellation is not a failure");

    scope.cancel();
    assert!(scope.is_cancelled());
    assert_eq!(wakeups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_signal_shuts_down_group_cleanly() {
    let (tx, rx) = mpsc::channel(2);
    let root = CancellationScope::new();
    let handle = SignalWatcher::new(rx)
        .on_signal({
            let root = root.clone();
            move || root.cancel()
        })
        .spawn();

    let mut group = TaskGroup::new(&root);
    group.register("server", |scope| async move {
        scope.cancelled().await;
        Ok(())
    });
    let running = group.run();

    assert!(!handle.signal_received());
    tx.send("SIGTERM").await.unwrap();
    tx.send("SIGTERM").await.unwrap();

    timeout(JOIN_TIMEOUT, running.join())
        .await
        .expect("join timed out")
        .expect("clean shutdown");
    assert!(handle.signal_received());
}
