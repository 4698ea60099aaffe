//! Scheduler and persister working together

use crate::common::mount_page;
use newscover::config::{CrawlerConfig, SchedulerConfig};
use newscover::crawler::{
    Channels, CoverHooks, JobCompletion, JobExecutor, JobHandle, MemoryPubSub, Persister,
    TokioExecutor,
};
use newscover::storage::{Backend, MemoryBackend};
use newscover::{Schedule, Scheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::MockServer;

/// Holds every completion until the test lets go of it
#[derive(Default)]
struct Parked {
    completions: Mutex<Vec<JobCompletion>>,
    submissions: AtomicUsize,
}

impl JobExecutor for Parked {
    fn submit(&self, _schedule: Schedule, completion: JobCompletion) -> JobHandle {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let handle = completion.handle();
        self.completions.lock().unwrap().push(completion);
        handle
    }
}

fn fast_ticks() -> SchedulerConfig {
    SchedulerConfig { tick_interval: 10 }
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_two_fires_one_submission() {
    let backend = Arc::new(MemoryBackend::new());
    let mut s = Schedule::new("tester", "http://h.com", Duration::from_secs(3600));
    backend.save_schedule(&mut s).unwrap();

    let executor = Arc::new(Parked::default());
    let scheduler = Scheduler::new(
        backend,
        executor.clone(),
        &SchedulerConfig::default(),
        CoverHooks::new(),
    );
    scheduler.add(&s);

    assert!(scheduler.fire(s.id).is_some());
    assert!(scheduler.fire(s.id).is_none());
    assert_eq!(executor.submissions.load(Ordering::SeqCst), 1);

    executor.completions.lock().unwrap().pop().unwrap().succeeded(&[]);
    assert!(scheduler.fire(s.id).is_some());
    assert_eq!(executor.submissions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_scheduler_covers_periodically() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "<title>Home</title>", 2..).await;

    let backend = Arc::new(MemoryBackend::new());
    let mut s = Schedule::new("tester", &server.uri(), Duration::from_millis(150));
    backend.save_schedule(&mut s).unwrap();

    let successes = Arc::new(AtomicUsize::new(0));
    let hooks = {
        let successes = Arc::clone(&successes);
        CoverHooks::new().on_success(move |_, items| {
            assert_eq!(items.len(), 1);
            successes.fetch_add(1, Ordering::SeqCst);
        })
    };

    let executor = TokioExecutor::new(backend.clone(), CrawlerConfig::default()).unwrap();
    let scheduler = Scheduler::new(backend.clone(), Arc::new(executor), &fast_ticks(), hooks);
    scheduler.start(None).await.unwrap();

    assert!(eventually(|| successes.load(Ordering::SeqCst) >= 2).await);
    scheduler.stop().await;

    assert_eq!(backend.list_news(s.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_persister_keeps_running_scheduler_in_sync() {
    let backend = Arc::new(MemoryBackend::new());
    let persister = Persister::new(
        Arc::new(MemoryPubSub::new()),
        backend.clone(),
        Channels::with_prefix("it"),
    );

    let executor = Arc::new(Parked::default());
    let scheduler = Scheduler::new(backend.clone(), executor, &fast_ticks(), CoverHooks::new());
    scheduler.start(Some(persister.clone())).await.unwrap();
    assert_eq!(scheduler.job_count(), 0);

    let mut s = Schedule::new("tester", "http://h.com", Duration::from_secs(3600));
    let created = backend.save_schedule(&mut s).unwrap();
    assert!(created);
    assert!(persister.notify_saved(&s, created).await);
    assert!(eventually(|| scheduler.contains(s.id)).await);

    backend.delete_schedule(s.id).unwrap();
    assert!(persister.notify_deleted(&s).await);
    assert!(eventually(|| !scheduler.contains(s.id)).await);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_scheduler_runs_without_pubsub() {
    let backend = Arc::new(MemoryBackend::new());
    let mut s = Schedule::new("tester", "http://h.com", Duration::from_secs(3600));
    backend.save_schedule(&mut s).unwrap();

    let persister = Persister::new(
        Arc::new(MemoryPubSub::unreachable()),
        backend.clone(),
        Channels::default(),
    );
    let scheduler = Scheduler::new(
        backend,
        Arc::new(Parked::default()),
        &fast_ticks(),
        CoverHooks::new(),
    );

    scheduler.start(Some(persister.clone())).await.unwrap();
    assert!(scheduler.is_running());
    assert!(scheduler.contains(s.id));

    assert!(!persister.notify_saved(&s, false).await);
    assert!(!persister.notify_deleted(&s).await);
    assert!(scheduler.contains(s.id));

    scheduler.stop().await;
}
