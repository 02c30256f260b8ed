//! Integration test: per-run event/log broker.
//!
//! ## Scenarios
//! 1. A late subscriber gets the backlog first, then live entries, in order and exactly once.
//! 2. A subscriber that never reads is evicted without stalling anyone else.
//! 3. The severity filter applies to backlog and live delivery, events included.
//! 4. A failing log store does not affect recording or delivery.
//! 5. Hub routing: empty run ids share the system broker, queries page the store.

use std::sync::Arc;
use std::time::Duration;

use redpaths_core::model::{EventType, LogEntry, LogLevel, LogPage, LogQuery};
use redpaths_core::{
    BrokerConfig, BrokerHub, LogRepository, RunBroker, StoreError, StoreResult, SYSTEM_RUN,
};
use serde_json::json;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn drain(sub: &mut redpaths_core::Subscription) -> Vec<LogEntry> {
    let mut out = Vec::new();
    while let Some(entry) = sub.try_recv() {
        out.push(entry);
    }
    out
}

// ===========================================================================
// 1. Backfill then live
// ===========================================================================

#[tokio::test]
async fn test_backfill_then_live_without_duplicates() {
    let broker = RunBroker::new("run-1", "proj", BrokerConfig::default(), None);
    for i in 0..5 {
        broker.log(Some("A"), LogLevel::Info, format!("early {}", i), None);
    }

    let mut sub = broker.register_client(LogLevel::Debug);
    assert_eq!(sub.pending_backlog(), 5);
    broker.log(Some("A"), LogLevel::Info, "live 0", None);
    broker.event(Some("A"), EventType::HostDiscovered, json!({ "ip": "10.0.0.5" }));
    settle().await;

    let got = drain(&mut sub);
    let ids: Vec<u64> = got.iter().map(|e| e.id).collect();
    assert_eq!(ids, (1..=7).collect::<Vec<u64>>(), "ordered, no gaps, no repeats");
    assert_eq!(got[5].message, "live 0");
    assert_eq!(got[6].stream_event(), "host_discovered");
    broker.close();
}

// ===========================================================================
// 2. Slow consumer isolation
// ===========================================================================

#[tokio::test]
async fn test_slow_consumer_is_evicted() {
    let config = BrokerConfig {
        client_queue_capacity: 4,
        ..BrokerConfig::default()
    };
    let broker = RunBroker::new("run-2", "proj", config, None);
    let mut slow = broker.register_client(LogLevel::Debug);
    let mut fast = broker.register_client(LogLevel::Debug);

    let total = 10;
    let reader = tokio::spawn(async move {
        let mut ids = Vec::new();
        while ids.len() < total {
            match fast.recv().await {
                Some(entry) => ids.push(entry.id),
                None => break,
            }
        }
        ids
    });

    for i in 0..total {
        broker.log(None, LogLevel::Info, format!("m{}", i), None);
        settle().await;
    }

    let fast_ids = reader.await.unwrap();
    assert_eq!(fast_ids.len(), total, "fast client sees every entry");
    assert_eq!(broker.client_count(), 0, "slow evicted, fast dropped after reading");

    let buffered = drain(&mut slow);
    assert_eq!(buffered.len(), 4, "slow client keeps only what fit before eviction");
    assert!(slow.recv().await.is_none(), "evicted queue is closed");
    broker.close();
}

// ===========================================================================
// 3. Severity filter
// ===========================================================================

#[tokio::test]
async fn test_severity_filter_applies_to_backlog_and_live() {
    let broker = RunBroker::new("run-3", "proj", BrokerConfig::default(), None);
    broker.log(None, LogLevel::Debug, "noise", None);
    broker.log(None, LogLevel::Warning, "backlog warning", None);

    let mut sub = broker.register_client(LogLevel::Warning);
    broker.log(None, LogLevel::Info, "info", None);
    broker.event(Some("A"), EventType::ModuleStart, json!({}));
    broker.log(None, LogLevel::Error, "boom", None);
    broker.event(Some("A"), EventType::ModuleError, json!({ "error": "boom" }));
    settle().await;

    let got = drain(&mut sub);
    let tags: Vec<&str> = got.iter().map(|e| e.stream_event()).collect();
    assert_eq!(tags, vec!["log", "log", "module_error"]);
    assert!(got.iter().all(|e| e.severity() >= LogLevel::Warning));
    broker.close();
}

// ===========================================================================
// 4. Persistence failure
// ===========================================================================

struct BrokenLogs;

impl LogRepository for BrokenLogs {
    fn insert_log(&self, _entry: &LogEntry) -> StoreResult<()> {
        Err(StoreError::Poisoned)
    }

    fn logs_for_run(&self, _run_uid: &str) -> StoreResult<Vec<LogEntry>> {
        Err(StoreError::Poisoned)
    }

    fn logs_for_project(&self, _project_uid: &str, _query: &LogQuery) -> StoreResult<LogPage> {
        Err(StoreError::Poisoned)
    }
}

#[tokio::test]
async fn test_store_failure_is_not_fatal() {
    let logs: Arc<dyn LogRepository> = Arc::new(BrokenLogs);
    let broker = RunBroker::new("run-4", "proj", BrokerConfig::default(), Some(logs));
    let mut sub = broker.register_client(LogLevel::Info);

    let entry = broker.log(Some("A"), LogLevel::Info, "still here", None);
    settle().await;

    assert_eq!(entry.id, 1);
    assert_eq!(broker.entry_count(), 1);
    let got = drain(&mut sub);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message, "still here");
    broker.close();
}

// ===========================================================================
// 5. Hub routing and queries
// ===========================================================================

#[tokio::test]
async fn test_hub_routes_and_queries() {
    let hub = BrokerHub::new(BrokerConfig::default(), None);
    let system = hub.broker("", "");
    assert_eq!(system.run_id(), SYSTEM_RUN);
    assert_eq!(system.project_uid(), "SYSTEM");
    assert_eq!(hub.broker(SYSTEM_RUN, "other").run_id(), SYSTEM_RUN);
    assert_eq!(hub.len(), 1);

    let logger = hub.logger("run-5", "proj");
    for i in 0..6 {
        logger.for_module("A").info(format!("a{}", i));
    }
    logger.for_module("B").warning("b0");
    logger.event(EventType::ScanStart, json!({}));

    let broker = hub.get("run-5").unwrap();
    let page = broker.query(&LogQuery {
        module_key: Some("A".into()),
        limit: Some(2),
        offset: 1,
        ..Default::default()
    });
    assert_eq!(page.total, 6);
    assert_eq!(page.count, 2);
    assert_eq!(page.logs[0].message, "a1");

    let warnings = broker.query(&LogQuery {
        min_level: Some(LogLevel::Warning),
        ..Default::default()
    });
    assert_eq!(warnings.total, 1);

    let events = broker.query(&LogQuery {
        event_type: Some("scan_start".into()),
        ..Default::default()
    });
    assert_eq!(events.total, 1);
    assert_eq!(events.limit, LogQuery::DEFAULT_LIMIT);
    hub.shutdown();
}
