//! Integration tests for the engine
//!
//! These tests drive full runs against in-memory listers and processors, and
//! one end-to-end run against a wiremock server, checking what ends up in
//! the state directory between runs.

use async_trait::async_trait;
use harvest_engine::config::{Config, OutputConfig, SourceConfig, UserAgentConfig};
use harvest_engine::crawler::url_list_orchestrator;
use harvest_engine::item::ListingError;
use harvest_engine::storage::{temp_path_for, CheckpointStore, DedupIndex, StatePaths};
use harvest_engine::{
    CrawlOrchestrator, EngineConfig, EngineError, ItemError, ItemLister, ItemProcessor,
    ProcessSummary, RunOutcome, WorkItem,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Lists a fixed set of ids
struct StaticLister(Vec<String>);

impl StaticLister {
    fn new(ids: &[&str]) -> Self {
        Self(ids.iter().map(|id| id.to_string()).collect())
    }
}

#[async_trait]
impl ItemLister for StaticLister {
    async fn list(&self) -> Result<Vec<WorkItem>, ListingError> {
        Ok(self.0.iter().map(WorkItem::new).collect())
    }
}

/// Always fails to list
struct BrokenLister;

#[async_trait]
impl ItemLister for BrokenLister {
    async fn list(&self) -> Result<Vec<WorkItem>, ListingError> {
        Err(ListingError::Unreachable("index page returned 500".to_string()))
    }
}

/// Scripted processor
///
/// Each id may have a queue of errors to return on its first calls; once the
/// queue is empty the id succeeds. Ids in `always_fail` never succeed.
#[derive(Default)]
struct Scripted {
    calls: Mutex<Vec<String>>,
    script: Mutex<HashMap<String, Vec<ItemError>>>,
    always_fail: Vec<(String, ItemError)>,
    cancel_on: Option<(String, CancellationToken)>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    work: Duration,
}

impl Scripted {
    fn fail_first(self, id: &str, errors: Vec<ItemError>) -> Self {
        self.script.lock().unwrap().insert(id.to_string(), errors);
        self
    }

    fn fail_always(mut self, id: &str, error: ItemError) -> Self {
        self.always_fail.push((id.to_string(), error));
        self
    }

    fn cancel_when(mut self, id: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((id.to_string(), token));
        self
    }

    fn taking(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
    }
}

#[async_trait]
impl ItemProcessor for Scripted {
    async fn process(&self, item: &WorkItem) -> Result<ProcessSummary, ItemError> {
        let id = item.id().to_string();
        self.calls.lock().unwrap().push(id.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some((target, token)) = &self.cancel_on {
            if *target == id {
                token.cancel();
            }
        }

        if let Some((_, error)) = self.always_fail.iter().find(|(target, _)| *target == id) {
            return Err(error.clone());
        }

        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.get_mut(&id).and_then(|errors| {
                if errors.is_empty() {
                    None
                } else {
                    Some(errors.remove(0))
                }
            })
        };
        match scripted {
            Some(error) => Err(error),
            None => Ok(ProcessSummary::with_subitems(1)),
        }
    }
}

fn engine(batch_size: usize, max_attempts: u32) -> EngineConfig {
    EngineConfig {
        max_concurrency: 4,
        batch_size,
        base_delay_ms: 0,
        max_delay_ms: 50,
        max_attempts,
        item_timeout_ms: 5_000,
        ..EngineConfig::default()
    }
}

fn dedup_at(dir: &Path) -> DedupIndex {
    DedupIndex::load(&StatePaths::new(dir).dedup).unwrap()
}

#[tokio::test]
async fn test_resume_never_reprocesses_done_items() {
    let dir = TempDir::new().unwrap();
    let ids = ["a", "b", "c", "d", "e", "f"];

    // First run is interrupted while the second batch is in flight
    let token = CancellationToken::new();
    let first = Arc::new(Scripted::default().cancel_when("c", token.clone()));
    let summary = CrawlOrchestrator::new(engine(2, 1), dir.path(), StaticLister::new(&ids), first.clone())
        .unwrap()
        .with_cancellation(token)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    assert_eq!(summary.batches, 2);
    assert_eq!(first.calls(), vec!["a", "b", "c", "d"]);

    let checkpoint = CheckpointStore::read(&StatePaths::new(dir.path()).checkpoint)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.batch_index, 1);
    assert!(!checkpoint.completed);
    assert_eq!(checkpoint.resolved_ids, vec!["c", "d"]);

    // Second run picks up the rest and continues batch numbering
    let second = Arc::new(Scripted::default());
    let summary = CrawlOrchestrator::new(engine(2, 1), dir.path(), StaticLister::new(&ids), second.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(second.calls(), vec!["e", "f"]);
    assert_eq!(summary.stats.skipped_duplicate, 4);
    assert_eq!(summary.stats.processed, 2);

    let checkpoint = CheckpointStore::read(&StatePaths::new(dir.path()).checkpoint)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.batch_index, 2);
    assert!(checkpoint.completed);

    // A third run has nothing left to do
    let third = Arc::new(Scripted::default());
    let summary = CrawlOrchestrator::new(engine(2, 1), dir.path(), StaticLister::new(&ids), third.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(third.calls().is_empty());
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.stats.skipped_duplicate, 6);
}

#[tokio::test]
async fn test_item_failing_every_attempt() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(
        Scripted::default().fail_always("C", ItemError::Transient("connection reset".into())),
    );

    let summary = CrawlOrchestrator::new(
        engine(2, 2),
        dir.path(),
        StaticLister::new(&["A", "B", "C", "D"]),
        processor.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.stats.processed, 3);
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(summary.stats.retried, 1);
    assert_eq!(summary.batches, 3);
    assert_eq!(processor.calls_for("C"), 2);

    let dedup = dedup_at(dir.path());
    for id in ["A", "B", "D"] {
        assert!(dedup.is_done(id), "{} should be done", id);
    }
    let record = dedup.record("C").unwrap();
    assert!(!dedup.is_done("C"));
    assert_eq!(record.attempts, 2);
    assert!(record.retryable);
}

#[tokio::test]
async fn test_item_succeeding_on_retry() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(
        Scripted::default().fail_first("C", vec![ItemError::Transient("503".into())]),
    );

    let summary = CrawlOrchestrator::new(
        engine(2, 2),
        dir.path(),
        StaticLister::new(&["A", "B", "C", "D"]),
        processor.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stats.processed, 4);
    assert_eq!(summary.stats.failed, 0);
    assert_eq!(summary.stats.retried, 1);
    assert_eq!(processor.calls(), vec!["A", "B", "C", "D", "C"]);

    let dedup = dedup_at(dir.path());
    assert!(["A", "B", "C", "D"].iter().all(|id| dedup.is_done(id)));
}

#[tokio::test]
async fn test_one_bad_item_does_not_affect_the_batch() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let processor = Arc::new(
        Scripted::default().fail_always("item-6", ItemError::Permanent("HTTP 410".into())),
    );

    let summary = CrawlOrchestrator::new(engine(10, 3), dir.path(), StaticLister::new(&refs), processor.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.stats.processed, 9);
    assert_eq!(summary.stats.failed, 1);
    // Permanent failures are not retried
    assert_eq!(processor.calls_for("item-6"), 1);
    assert!(dedup_at(dir.path()).is_permanently_failed("item-6"));

    // And are skipped by later runs unless forced
    let later = Arc::new(Scripted::default());
    let summary = CrawlOrchestrator::new(engine(10, 3), dir.path(), StaticLister::new(&refs), later.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(later.calls().is_empty());
    assert_eq!(summary.stats.skipped_permanent, 1);

    let forced = Arc::new(Scripted::default());
    let config = EngineConfig {
        force_reprocess: true,
        ..engine(10, 3)
    };
    CrawlOrchestrator::new(config, dir.path(), StaticLister::new(&refs), forced.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(forced.calls().len(), 10);
    assert!(dedup_at(dir.path()).is_done("item-6"));
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..20).map(|i| format!("n{}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let processor = Arc::new(Scripted::default().taking(Duration::from_millis(15)));

    let config = EngineConfig {
        max_concurrency: 3,
        ..engine(10, 1)
    };
    let summary = CrawlOrchestrator::new(config, dir.path(), StaticLister::new(&refs), processor.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.stats.processed, 20);
    let max = processor.max_active.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {} concurrent calls", max);
    assert!(max >= 2);
}

#[tokio::test]
async fn test_throttling_backs_off_and_cools_down() {
    let dir = TempDir::new().unwrap();
    let ids = ["t1", "t2", "t3", "t4"];
    let mut processor = Scripted::default();
    for id in ids {
        processor = processor.fail_first(
            id,
            vec![ItemError::Throttled {
                retry_after: Some(Duration::from_millis(5)),
            }],
        );
    }
    let processor = Arc::new(processor);

    let config = EngineConfig {
        max_concurrency: 1,
        throttle_threshold: 2,
        cooldown_ms: 20,
        ..engine(4, 2)
    };
    let summary = CrawlOrchestrator::new(config, dir.path(), StaticLister::new(&ids), processor.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.stats.throttled, 4);
    assert!(summary.stats.cooldowns >= 1);
    assert_eq!(summary.stats.retried, 4);
    assert_eq!(summary.stats.processed, 4);
    assert_eq!(summary.stats.failed, 0);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(Scripted::default());

    let failure = CrawlOrchestrator::new(engine(2, 1), dir.path(), BrokenLister, processor.clone())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(failure.error, EngineError::Listing(_)));
        assert!(processor.calls().is_empty());
    assert!(!StatePaths::new(dir.path()).checkpoint.exists());
}

#[tokio::test]
async fn test_dedup_write_failure_stops_before_checkpoint() {
    let dir = TempDir::new().unwrap();
    let paths = StatePaths::new(dir.path());
    std::fs::create_dir(temp_path_for(&paths.dedup)).unwrap();

    let failure = CrawlOrchestrator::new(
        engine(2, 1),
        dir.path(),
        StaticLister::new(&["a", "b", "c"]),
        Scripted::default(),
    )
    .unwrap()
    .run()
    .await
    .unwrap_err();

    assert!(matches!(failure.error, EngineError::Persistence(_)));
    assert_eq!(failure.partial.processed, 2);
    // The checkpoint never claims a batch whose dedup records were not written
    assert!(CheckpointStore::read(&paths.checkpoint).unwrap().is_none());
    assert!(dedup_at(dir.path()).is_empty());
}

#[tokio::test]
async fn test_checkpoint_write_failure_keeps_dedup_progress() {
    let dir = TempDir::new().unwrap();
    let paths = StatePaths::new(dir.path());
    std::fs::create_dir(temp_path_for(&paths.checkpoint)).unwrap();

    let failure = CrawlOrchestrator::new(
        engine(2, 1),
        dir.path(),
        StaticLister::new(&["a", "b", "c"]),
        Scripted::default(),
    )
    .unwrap()
    .run()
    .await
    .unwrap_err();
    assert!(matches!(failure.error, EngineError::Persistence(_)));

    // Once storage recovers, the next run only does the unfinished work
    std::fs::remove_dir(temp_path_for(&paths.checkpoint)).unwrap();
    let processor = Arc::new(Scripted::default());
    let summary = CrawlOrchestrator::new(
        engine(2, 1),
        dir.path(),
        StaticLister::new(&["a", "b", "c"]),
        processor.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(processor.calls(), vec!["c"]);
    assert_eq!(summary.stats.skipped_duplicate, 2);
}

#[tokio::test]
async fn test_url_list_end_to_end() {
    let server = MockServer::start().await;
    for page in ["/one", "/two"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("<html>{}</html>", page)),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let list = dir.path().join("urls.txt");
    std::fs::write(
        &list,
        format!(
            "# test list\n{0}/one\n{0}/two\n{0}/missing\nnot a url\n{0}/one#again\n",
            server.uri()
        ),
    )
    .unwrap();

    let config = Config {
        engine: engine(2, 1),
        source: SourceConfig {
            url_list: list.display().to_string(),
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            state_dir: dir.path().join("state").display().to_string(),
            content_dir: dir.path().join("content").display().to_string(),
        },
    };

    let summary = url_list_orchestrator(&config).unwrap().run().await.unwrap();

    assert_eq!(summary.stats.listed, 5);
    assert_eq!(summary.stats.skipped_duplicate, 1);
    assert_eq!(summary.stats.processed, 2);
    assert_eq!(summary.stats.failed, 2);
    assert_eq!(summary.stats.subitems_done, 2);

    let written = std::fs::read_dir(dir.path().join("content")).unwrap().count();
    assert_eq!(written, 2);

    // Both failures were permanent, so a second run has nothing to do
    let summary = url_list_orchestrator(&config).unwrap().run().await.unwrap();
    assert_eq!(summary.stats.processed, 0);
    assert_eq!(summary.stats.skipped_duplicate, 3);
    assert_eq!(summary.stats.skipped_permanent, 2);
    assert_eq!(summary.batches, 0);
}
