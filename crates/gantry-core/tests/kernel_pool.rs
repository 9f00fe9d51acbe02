//! Kernel pool lifecycle tests against the scripted mock worker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockLauncher, MockOptions, MockStats, SLOW_SPEC, eventually, test_config};
use gantry_core::{CoreConfig, Error, KernelCreate, KernelId, KernelPool, KernelStatus};

fn pool_with(config: CoreConfig, launcher: MockLauncher) -> (KernelPool, Arc<MockStats>) {
    let stats = Arc::clone(&launcher.stats);
    (KernelPool::new(config, Arc::new(launcher)), stats)
}

#[tokio::test]
async fn test_absent_kernel_is_not_found() {
    let (pool, _) = pool_with(test_config(), MockLauncher::new());
    let missing = KernelId::from("missing");

    assert!(matches!(pool.get(&missing), Err(Error::KernelNotFound(_))));
    assert!(matches!(pool.interrupt(&missing).await, Err(Error::KernelNotFound(_))));
    assert!(matches!(pool.restart(&missing).await, Err(Error::KernelNotFound(_))));
    assert!(matches!(pool.channel(&missing), Err(Error::KernelNotFound(_))));

    // Shutdown and status updates on an absent id are silent.
    pool.shutdown(&missing).await;
    pool.update_status(&missing, KernelStatus::Busy);
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_create_and_list() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());

    let kernel = pool
        .create(KernelCreate::default().for_notebook("nb-1"))
        .await
        .unwrap();
    assert_eq!(kernel.status, KernelStatus::Idle);
    assert_eq!(kernel.name, "python3");
    assert_eq!(kernel.notebook_id.as_deref(), Some("nb-1"));
    assert_eq!(kernel.execution_count, 0);

    let listed = pool.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, kernel.id);
    assert_eq!(MockStats::get(&stats.launched), 1);
}

#[tokio::test]
async fn test_unknown_spec_is_start_failure() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());

    let err = pool.create(KernelCreate::named("julia")).await.unwrap_err();
    assert!(matches!(err, Error::StartFailure(_)));
    assert_eq!(MockStats::get(&stats.launched), 0);
}

#[tokio::test]
async fn test_lru_eviction_keeps_most_recent() {
    let config = CoreConfig {
        max_kernels: 2,
        ..test_config()
    };
    let (pool, stats) = pool_with(config, MockLauncher::new());

    let a = pool.create(KernelCreate::default()).await.unwrap();
    let b = pool.create(KernelCreate::default()).await.unwrap();

    // Touch `a` so `b` becomes the least recently active.
    pool.update_status(&a.id, KernelStatus::Idle);

    let c = pool.create(KernelCreate::default()).await.unwrap();
    assert_eq!(pool.len(), 2);
    assert!(pool.get(&a.id).is_ok());
    assert!(matches!(pool.get(&b.id), Err(Error::KernelNotFound(_))));
    assert!(pool.get(&c.id).is_ok());
    assert_eq!(MockStats::get(&stats.shutdowns), 1);

    // No further touches: `a` is now oldest.
    let d = pool.create(KernelCreate::default()).await.unwrap();
    let ids: Vec<_> = pool.list().into_iter().map(|k| k.id).collect();
    assert_eq!(ids, vec![c.id, d.id]);
}

#[tokio::test]
async fn test_pool_never_exceeds_capacity_under_concurrent_creates() {
    let config = CoreConfig {
        max_kernels: 3,
        ..test_config()
    };
    let (pool, _) = pool_with(config, MockLauncher::new());
    let pool = Arc::new(pool);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.create(KernelCreate::default()).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
        assert!(pool.len() <= 3);
    }
    assert_eq!(pool.len(), 3);
}

#[tokio::test]
async fn test_start_timeout_leaves_no_record() {
    let config = CoreConfig {
        kernel_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let (pool, stats) = pool_with(
        config,
        MockLauncher::with_options(MockOptions {
            never_ready: true,
            ..MockOptions::default()
        }),
    );

    let err = pool.create(KernelCreate::default()).await.unwrap_err();
    assert!(matches!(err, Error::StartFailure(_)));
    assert!(pool.is_empty());
    assert!(pool.list().is_empty());
    // The half-started worker was torn down.
    assert_eq!(MockStats::get(&stats.shutdowns), 1);
}

#[tokio::test]
async fn test_restart_resets_counter_and_status() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());
    let kernel = pool.create(KernelCreate::default()).await.unwrap();

    {
        let slot = pool.acquire(&kernel.id).await.unwrap();
        slot.record_execution();
        slot.record_execution();
    }
    pool.update_status(&kernel.id, KernelStatus::Busy);
    assert_eq!(pool.get(&kernel.id).unwrap().execution_count, 2);

    let restarted = pool.restart(&kernel.id).await.unwrap();
    assert_eq!(restarted.id, kernel.id);
    assert_eq!(restarted.execution_count, 0);
    assert_eq!(restarted.status, KernelStatus::Idle);
    assert_eq!(pool.get(&kernel.id).unwrap().status, KernelStatus::Idle);
    assert_eq!(MockStats::get(&stats.restarts), 1);
}

#[tokio::test]
async fn test_failed_restart_removes_kernel() {
    let (pool, _) = pool_with(
        test_config(),
        MockLauncher::with_options(MockOptions {
            fail_restart: true,
            ..MockOptions::default()
        }),
    );
    let kernel = pool.create(KernelCreate::default()).await.unwrap();

    let err = pool.restart(&kernel.id).await.unwrap_err();
    assert!(matches!(err, Error::StartFailure(_)));
    assert!(matches!(pool.get(&kernel.id), Err(Error::KernelNotFound(_))));
}

#[tokio::test]
async fn test_interrupt_marks_idle() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());
    let kernel = pool.create(KernelCreate::default()).await.unwrap();

    pool.update_status(&kernel.id, KernelStatus::Busy);
    pool.interrupt(&kernel.id).await.unwrap();

    assert_eq!(pool.get(&kernel.id).unwrap().status, KernelStatus::Idle);
    assert_eq!(MockStats::get(&stats.interrupts), 1);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());
    let kernel = pool.create(KernelCreate::default()).await.unwrap();

    pool.shutdown(&kernel.id).await;
    pool.shutdown(&kernel.id).await;

    assert!(pool.is_empty());
    assert_eq!(MockStats::get(&stats.shutdowns), 1);
}

#[tokio::test]
async fn test_shutdown_all() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());
    for _ in 0..3 {
        pool.create(KernelCreate::default()).await.unwrap();
    }

    pool.shutdown_all().await;
    assert!(pool.is_empty());
    assert_eq!(MockStats::get(&stats.shutdowns), 3);
}

#[tokio::test]
async fn test_slot_drop_returns_kernel_to_idle() {
    let (pool, _) = pool_with(test_config(), MockLauncher::new());
    let kernel = pool.create(KernelCreate::default()).await.unwrap();

    let slot = pool.acquire(&kernel.id).await.unwrap();
    assert_eq!(pool.get(&kernel.id).unwrap().status, KernelStatus::Busy);
    drop(slot);
    assert_eq!(pool.get(&kernel.id).unwrap().status, KernelStatus::Idle);
}

#[tokio::test]
async fn test_dead_kernels_are_pruned() {
    let (pool, _) = pool_with(
        test_config(),
        MockLauncher::with_options(MockOptions {
            die_on_submit: true,
            ..MockOptions::default()
        }),
    );
    let kernel = pool.create(KernelCreate::default()).await.unwrap();

    let channel = pool.channel(&kernel.id).unwrap();
    channel.submit("print('x')", false, true).await.unwrap();

    let pruned = pool.prune_dead().await;
    assert_eq!(pruned, vec![kernel.id.clone()]);
    assert!(matches!(pool.get(&kernel.id), Err(Error::KernelNotFound(_))));
}

#[tokio::test]
async fn test_dead_kernel_disappears_from_lookups() {
    let (pool, stats) = pool_with(
        test_config(),
        MockLauncher::with_options(MockOptions {
            die_on_submit: true,
            ..MockOptions::default()
        }),
    );
    let kernel = pool.create(KernelCreate::default()).await.unwrap();
    let other = pool.create(KernelCreate::default()).await.unwrap();

    let channel = pool.channel(&kernel.id).unwrap();
    channel.submit("print('x')", false, true).await.unwrap();

    let ids: Vec<_> = pool.list().into_iter().map(|k| k.id).collect();
    assert_eq!(ids, vec![other.id.clone()]);
    assert!(matches!(pool.get(&kernel.id), Err(Error::KernelNotFound(_))));
    assert!(matches!(pool.interrupt(&kernel.id).await, Err(Error::KernelNotFound(_))));
    assert!(matches!(pool.restart(&kernel.id).await, Err(Error::KernelNotFound(_))));
    assert!(matches!(pool.acquire(&kernel.id).await, Err(Error::KernelNotFound(_))));

    // The dead worker is still torn down.
    assert!(eventually(|| MockStats::get(&stats.shutdowns) == 1).await);
    assert_eq!(pool.get(&other.id).unwrap().status, KernelStatus::Idle);
}

#[tokio::test]
async fn test_starting_kernel_is_listed_as_starting() {
    let (pool, _) = pool_with(test_config(), MockLauncher::new());
    let pool = Arc::new(pool);

    let slow = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.create(KernelCreate::named(SLOW_SPEC)).await })
    };

    assert!(eventually(|| pool.len() == 1).await);
    let listed = pool.list();
    assert_eq!(listed[0].status, KernelStatus::Starting);
    assert_eq!(listed[0].name, SLOW_SPEC);

    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::StartFailure(_)));
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_slow_start_does_not_block_shutdown() {
    let (pool, stats) = pool_with(test_config(), MockLauncher::new());
    let pool = Arc::new(pool);
    let ready = pool.create(KernelCreate::default()).await.unwrap();

    let slow = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.create(KernelCreate::named(SLOW_SPEC)).await })
    };
    assert!(eventually(|| pool.len() == 2).await);

    tokio::time::timeout(Duration::from_millis(500), pool.shutdown(&ready.id))
        .await
        .expect("shutdown waited for a starting kernel");
    assert!(matches!(pool.get(&ready.id), Err(Error::KernelNotFound(_))));
    assert_eq!(MockStats::get(&stats.shutdowns), 1);

    // Shutting down the starting kernel itself returns at once too.
    let starting = pool.list()[0].id.clone();
    tokio::time::timeout(Duration::from_millis(500), pool.shutdown(&starting))
        .await
        .expect("shutdown of a starting kernel blocked");
    assert!(pool.is_empty());

    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::StartFailure(_)));
    assert_eq!(MockStats::get(&stats.shutdowns), 2);
}

#[tokio::test]
async fn test_create_waits_when_pool_is_full_of_starting_kernels() {
    let config = CoreConfig {
        max_kernels: 1,
        ..test_config()
    };
    let (pool, _) = pool_with(config, MockLauncher::new());
    let pool = Arc::new(pool);

    let slow = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.create(KernelCreate::named(SLOW_SPEC)).await })
    };
    assert!(eventually(|| pool.len() == 1).await);

    // Starting kernels are not evicted; this create waits for the slot.
    let kernel = pool.create(KernelCreate::default()).await.unwrap();
    assert_eq!(kernel.status, KernelStatus::Idle);

    assert!(matches!(slow.await.unwrap(), Err(Error::StartFailure(_))));
    let ids: Vec<_> = pool.list().into_iter().map(|k| k.id).collect();
    assert_eq!(ids, vec![kernel.id]);
}

#[tokio::test]
async fn test_zero_capacity_config_still_bounds_pool() {
    let config = CoreConfig {
        max_kernels: 0,
        ..test_config()
    };
    let (pool, _) = pool_with(config, MockLauncher::new());

    pool.create(KernelCreate::default()).await.unwrap();
    let last = pool.create(KernelCreate::default()).await.unwrap();

    assert_eq!(pool.len(), 1);
    assert_eq!(pool.list()[0].id, last.id);
}
