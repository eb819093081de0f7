//! Pool rotation under concurrent load, plus monitor-triggered rotation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticker_browser::monitor::{spawn_health_monitor, spawn_memory_monitor};
use ticker_browser::{
    BrowserError, BrowserPool, BrowserSession, MemorySampler, PageHandle, SessionLauncher,
};
use ticker_common::PoolConfig;

#[derive(Default)]
struct MockSession {
    closed: AtomicBool,
    close_calls: AtomicUsize,
    unhealthy: bool,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>, BrowserError> {
        Err(BrowserError::Cdp("no pages".into()))
    }

    async fn probe(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::ProbeFailed("used after close".into()));
        }
        if self.unhealthy {
            return Err(BrowserError::ProbeFailed("unresponsive".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Launches sessions; the first `unhealthy_first` of them fail every probe.
#[derive(Default)]
struct MockLauncher {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    unhealthy_first: usize,
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        tokio::task::yield_now().await;
        let mut sessions = self.sessions.lock().unwrap();
        let session = Arc::new(MockSession {
            unhealthy: sessions.len() < self.unhealthy_first,
            ..Default::default()
        });
        sessions.push(Arc::clone(&session));
        Ok(session)
    }
}

impl MockLauncher {
    fn all(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_under_concurrent_load() {
    let launcher = Arc::new(MockLauncher::default());
    let config = PoolConfig {
        max_requests: 7,
        ..Default::default()
    };
    let pool = BrowserPool::new(launcher.clone(), config).await.unwrap();

    // session id -> outstanding leases observed by the test
    let borrowed: Arc<Mutex<HashMap<u64, usize>>> = Arc::default();

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        let borrowed = Arc::clone(&borrowed);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let lease = pool.acquire().unwrap();
                let id = lease.session_id();
                {
                    let mut map = borrowed.lock().unwrap();
                    *map.entry(id).or_default() += 1;
                    assert!(map.len() <= 2, "more than two sessions borrowed at once: {map:?}");
                }

                lease.probe().await.expect("borrowed session was closed");
                tokio::task::yield_now().await;
                lease.probe().await.expect("borrowed session was closed");

                {
                    let mut map = borrowed.lock().unwrap();
                    let count = map.get_mut(&id).unwrap();
                    *count -= 1;
                    if *count == 0 {
                        map.remove(&id);
                    }
                }
                lease.release().await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    // let any scheduled rotation finish
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stats = pool.stats();
        if stats.retiring_id.is_none() && !stats.rotating {
            break;
        }
    }
    pool.shutdown().await;

    let stats = pool.stats();
    assert!(stats.rotations > 0);
    assert_eq!(stats.launched, stats.closed);

    let sessions = launcher.all();
    assert_eq!(sessions.len() as u64, stats.launched);
    for session in sessions {
        assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_rotates_unresponsive_session() {
    let launcher = Arc::new(MockLauncher {
        unhealthy_first: 1,
        ..Default::default()
    });
    let config = PoolConfig {
        monitor_interval_secs: 1,
        probe_timeout_secs: 1,
        health_failure_threshold: 3,
        ..Default::default()
    };
    let pool = BrowserPool::new(launcher.clone(), config).await.unwrap();
    pool.register_monitor(spawn_health_monitor(pool.clone()));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(pool.stats().rotations, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stats = pool.stats();
    assert_eq!(stats.rotations, 1);
    assert_eq!(stats.active_id, Some(1));
    assert!(launcher.all()[0].closed.load(Ordering::SeqCst));

    // the healthy replacement is left alone
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pool.stats().rotations, 1);

    pool.shutdown().await;
}

struct FixedMemory(f64);

impl MemorySampler for FixedMemory {
    fn used_percent(&mut self) -> Option<f64> {
        Some(self.0)
    }
}

#[tokio::test(start_paused = true)]
async fn test_memory_monitor_rotates_over_threshold() {
    let launcher = Arc::new(MockLauncher::default());
    let config = PoolConfig {
        monitor_interval_secs: 30,
        ..Default::default()
    };
    let pool = BrowserPool::new(launcher, config).await.unwrap();
    pool.register_monitor(spawn_memory_monitor(pool.clone(), FixedMemory(91.0)));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(pool.stats().rotations, 1);

    pool.shutdown().await;
    assert_eq!(pool.stats().launched, pool.stats().closed);
}

#[tokio::test(start_paused = true)]
async fn test_memory_monitor_ignores_normal_usage() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(launcher, PoolConfig::default()).await.unwrap();
    pool.register_monitor(spawn_memory_monitor(pool.clone(), FixedMemory(40.0)));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(pool.stats().rotations, 0);
    pool.shutdown().await;
}
