//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 提交位掩码行为场景 (投递 / 失败重试 / 新 sink 回填 / 保留压缩)
//! - 基于 SQLite 与本地 HTTP 接收端的端到端测试

#[cfg(test)]
mod contract_tests {
    use contracts::{full_mask, transaction_id, MetadataRecord, SinkKind};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_pending_predicate_is_bitwise() {
        let mut record = MetadataRecord::new("k", "v", chrono::Utc::now());
        // A retired high bit must not make the record look delivered
        record.committed_mask = 1 << 63;
        assert!(!record.is_fully_committed(0b11));
        assert_eq!(record.missing_bits(0b11), 0b11);

        record.committed_mask |= 0b11;
        assert!(record.is_fully_committed(full_mask([1, 2])));
    }

    #[test]
    fn test_transaction_id_is_stable() {
        let at = chrono::DateTime::from_timestamp_micros(1_700_000_000_000_001).unwrap();
        assert_eq!(transaction_id(at, "k"), transaction_id(at, "k"));
        assert_ne!(transaction_id(at, "k"), transaction_id(at, "j"));
    }

    #[test]
    fn test_kind_table_is_closed() {
        assert_eq!(SinkKind::ALL.len(), 3);
        assert!("webhook".parse::<SinkKind>().is_err());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use contracts::{
        ContractError, DeliveryAdapter, MetadataRecord, QueueStore, RetentionPolicy,
        SinkDescriptor, SinkStore,
    };
    use dispatcher::{AdapterFactory, Distributor, DistributorConfig};
    use queue_store::{MemoryStore, Producer};
    use retention::RetentionCompactor;
    use tokio_util::sync::CancellationToken;

    const OK: u8 = 0;
    const FAIL: u8 = 1;
    const HANG: u8 = 2;

    type Calls = Arc<Mutex<Vec<(String, String)>>>;

    /// Sink whose behavior can be switched between polls
    struct SwitchSink {
        name: String,
        mode: Arc<AtomicU8>,
        calls: Calls,
    }

    impl DeliveryAdapter for SwitchSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, record: &MetadataRecord) -> Result<(), ContractError> {
            self.calls
                .lock()
                .unwrap()
                .push((self.name.clone(), record.key.clone()));
            match self.mode.load(Ordering::SeqCst) {
                OK => Ok(()),
                FAIL => Err(ContractError::delivery(&self.name, "receiver down")),
                _ => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    /// Factory handing out switchable sinks by instance id
    #[derive(Clone, Default)]
    struct Harness {
        modes: Arc<Mutex<HashMap<String, Arc<AtomicU8>>>>,
        calls: Calls,
    }

    impl Harness {
        fn set(&self, instance_id: &str, mode: u8) {
            self.mode(instance_id).store(mode, Ordering::SeqCst);
        }

        fn mode(&self, instance_id: &str) -> Arc<AtomicU8> {
            self.modes
                .lock()
                .unwrap()
                .entry(instance_id.to_string())
                .or_insert_with(|| Arc::new(AtomicU8::new(OK)))
                .clone()
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, instance_id: &str) -> usize {
            self.calls().iter().filter(|(s, _)| s == instance_id).count()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    impl AdapterFactory for Harness {
        type Adapter = SwitchSink;

        fn build(&self, d: &SinkDescriptor) -> Result<SwitchSink, ContractError> {
            if d.kind != "switch" {
                return Err(ContractError::UnknownSinkKind {
                    instance_id: d.instance_id.clone(),
                    kind: d.kind.clone(),
                });
            }
            Ok(SwitchSink {
                name: d.instance_id.clone(),
                mode: self.mode(&d.instance_id),
                calls: self.calls.clone(),
            })
        }
    }

    async fn register(store: &MemoryStore, id: &str, bit: u64) {
        let d = SinkDescriptor::new(id, bit, "switch", &serde_json::json!({})).unwrap();
        store.register_sink(&d).await.unwrap();
    }

    fn distributor(store: &Arc<MemoryStore>, harness: &Harness) -> Distributor<MemoryStore, Harness> {
        Distributor::with_factory(
            store.clone(),
            harness.clone(),
            DistributorConfig {
                poll_interval: Duration::from_millis(10),
                delivery_timeout: Duration::from_millis(100),
            },
        )
    }

    async fn mask(store: &MemoryStore, record: &MetadataRecord) -> u64 {
        store
            .get(&record.transaction_id)
            .await
            .unwrap()
            .map(|r| r.committed_mask)
            .unwrap_or_default()
    }

    async fn poll(d: &mut Distributor<MemoryStore, Harness>) -> dispatcher::PollReport {
        d.poll(&CancellationToken::new()).await.unwrap()
    }

    /// Scenario A: two healthy sinks, one poll, both bits set
    #[tokio::test]
    async fn test_scenario_a_single_poll_full_delivery() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;
        let record = Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();

        let mut d = distributor(&store, &harness);
        let report = poll(&mut d).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(harness.calls_for("S1"), 1);
        assert_eq!(harness.calls_for("S2"), 1);
        assert_eq!(mask(&store, &record).await, 3);
    }

    /// Scenario B: one sink fails, recovers, and only it is retried
    #[tokio::test]
    async fn test_scenario_b_failed_sink_retried_after_recovery() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;
        harness.set("S2", FAIL);
        let record = Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();

        let mut d = distributor(&store, &harness);
        poll(&mut d).await;
        assert_eq!(mask(&store, &record).await, 1);

        harness.set("S2", OK);
        harness.clear();
        poll(&mut d).await;
        assert_eq!(mask(&store, &record).await, 3);
        assert_eq!(harness.calls(), vec![("S2".to_string(), "K".to_string())]);
    }

    /// Scenario C: a sink added later is backfilled, and only it is invoked
    #[tokio::test]
    async fn test_scenario_c_new_sink_backfills_history() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;
        let producer = Producer::new();
        let mut records = Vec::new();
        for key in ["a", "b", "c"] {
            records.push(producer.enqueue(store.as_ref(), key, &1).await.unwrap());
        }

        let mut d = distributor(&store, &harness);
        poll(&mut d).await;
        for r in &records {
            assert_eq!(mask(&store, r).await, 3);
        }

        register(&store, "S3", 4).await;
        harness.clear();
        let report = poll(&mut d).await;
        assert_eq!(report.full_mask, 7);
        assert_eq!(report.records_selected, 3);
        assert_eq!(harness.calls_for("S3"), 3);
        assert_eq!(harness.calls().len(), 3);
        for r in &records {
            // exactly the new bit was added
            assert_eq!(mask(&store, r).await, 7);
        }
    }

    /// Scenario D: compaction archives the oldest five even if one is undelivered
    #[tokio::test]
    async fn test_scenario_d_compaction_ignores_commit_state() {
        let store = Arc::new(MemoryStore::new());
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;

        let producer = Producer::new();
        let mut records = Vec::new();
        for i in 0..6 {
            records.push(producer.enqueue(store.as_ref(), "K", &i).await.unwrap());
        }
        for (i, r) in records.iter().enumerate() {
            // The second-oldest record never reached S2
            let bits = if i == 1 { 1 } else { 3 };
            store.mark_committed(&r.transaction_id, bits).await.unwrap();
        }

        let compactor =
            RetentionCompactor::new(store.clone(), 5, RetentionPolicy::IgnoreCommitState).unwrap();
        let report = compactor.compact(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.records_archived, 5);

        let left = store.records_for_key("K").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].transaction_id, records[5].transaction_id);
        let archived = store.archived_for_key("K").await.unwrap();
        assert_eq!(archived.len(), 5);
        assert_eq!(archived[1].committed_mask, 1);
    }

    /// Scenario D variant: the undelivered record is archived by the default policy
    #[tokio::test]
    async fn test_default_policy_archives_undelivered_record() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;
        harness.set("S2", FAIL);

        let producer = Producer::new();
        let oldest = producer.enqueue(store.as_ref(), "K", &0).await.unwrap();
        let mut d = distributor(&store, &harness);
        poll(&mut d).await;
        harness.set("S2", OK);
        for i in 1..6 {
            producer.enqueue(store.as_ref(), "K", &i).await.unwrap();
        }
        // S2 is healthy again but compaction runs first
        let compactor =
            RetentionCompactor::new(store.clone(), 5, RetentionPolicy::default()).unwrap();
        compactor.compact(&CancellationToken::new()).await.unwrap();

        let archived = store.archived_for_key("K").await.unwrap();
        assert!(archived
            .iter()
            .any(|r| r.transaction_id == oldest.transaction_id && r.committed_mask == 1));
        assert_eq!(store.records_for_key("K").await.unwrap().len(), 1);

        // The survivor still reaches both sinks
        harness.clear();
        poll(&mut d).await;
        assert!(harness.calls().iter().all(|(_, key)| key == "K"));
        assert_eq!(harness.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_require_fully_delivered_keeps_undelivered_record() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;

        let producer = Producer::new();
        let mut records = Vec::new();
        for i in 0..6 {
            records.push(producer.enqueue(store.as_ref(), "K", &i).await.unwrap());
        }
        for (i, r) in records.iter().enumerate() {
            let bits = if i == 0 { 1 } else { 3 };
            store.mark_committed(&r.transaction_id, bits).await.unwrap();
        }

        let compactor = RetentionCompactor::with_factory(
            store.clone(),
            harness,
            5,
            RetentionPolicy::RequireFullyDelivered,
        )
        .unwrap();
        let report = compactor.compact(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.records_archived, 4);
        assert!(store
            .get(&records[0].transaction_id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.records_for_key("K").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_require_fully_delivered_skips_unusable_sink_bits() {
        let store = Arc::new(MemoryStore::new());
        for (id, bit, kind) in [("audit", 1, "log"), ("stream", 2, "kafka")] {
            let d = SinkDescriptor::new(id, bit, kind, &serde_json::json!({})).unwrap();
            store.register_sink(&d).await.unwrap();
        }
        let producer = Producer::new();
        for i in 0..5 {
            producer.enqueue(store.as_ref(), "K", &i).await.unwrap();
        }

        let mut d = Distributor::new(store.clone(), DistributorConfig::default());
        let report = d.poll(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.full_mask, 1);
        assert_eq!(report.delivered, 5);

        let compactor =
            RetentionCompactor::new(store.clone(), 5, RetentionPolicy::RequireFullyDelivered)
                .unwrap();
        let report = compactor.compact(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.records_archived, 5);
        assert_eq!(store.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bits_are_monotonic_across_polls() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;
        register(&store, "S3", 4).await;
        let record = Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();
        let mut d = distributor(&store, &harness);

        let mut previous = 0;
        for (s1, s2, s3) in [(OK, FAIL, FAIL), (FAIL, OK, FAIL), (FAIL, FAIL, FAIL), (OK, OK, OK)] {
            harness.set("S1", s1);
            harness.set("S2", s2);
            harness.set("S3", s3);
            poll(&mut d).await;
            let current = mask(&store, &record).await;
            assert_eq!(current & previous, previous, "bit cleared: {previous:#b} -> {current:#b}");
            previous = current;
        }
        assert_eq!(previous, 7);
    }

    #[tokio::test]
    async fn test_idle_poll_makes_no_calls_and_no_writes() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        let mut d = distributor(&store, &harness);

        // Empty queue
        let writes = store.write_count().await;
        let report = poll(&mut d).await;
        assert!(report.is_idle());
        assert_eq!(store.write_count().await, writes);

        // Everything already delivered
        Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();
        poll(&mut d).await;
        harness.clear();
        let writes = store.write_count().await;
        let report = poll(&mut d).await;
        assert_eq!(report.records_selected, 0);
        assert!(harness.calls().is_empty());
        assert_eq!(store.write_count().await, writes);
    }

    #[tokio::test]
    async fn test_unknown_kind_drops_only_that_sink() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        let odd = SinkDescriptor::new("odd", 2, "carrier-pigeon", &serde_json::json!({})).unwrap();
        store.register_sink(&odd).await.unwrap();
        let record = Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();

        let mut d = distributor(&store, &harness);
        let report = poll(&mut d).await;
        assert_eq!(report.active_sinks, 1);
        assert_eq!(report.full_mask, 1);
        assert_eq!(mask(&store, &record).await, 1);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_persisted_bits() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        register(&store, "S2", 2).await;
        harness.set("S2", HANG);
        let record = Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();

        let mut d = Distributor::with_factory(
            store.clone(),
            harness.clone(),
            DistributorConfig {
                poll_interval: Duration::from_millis(10),
                delivery_timeout: Duration::from_secs(3600),
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = d.poll(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(mask(&store, &record).await, 1);

        harness.set("S2", OK);
        d.poll(&CancellationToken::new()).await.unwrap();
        assert_eq!(mask(&store, &record).await, 3);
    }

    #[tokio::test]
    async fn test_retired_bit_cannot_be_reused_while_referenced() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        Producer::new().enqueue(store.as_ref(), "K", "V").await.unwrap();
        let mut d = distributor(&store, &harness);
        poll(&mut d).await;

        store.retire_sink("S1").await.unwrap();
        let reuse = SinkDescriptor::new("S9", 1, "switch", &serde_json::json!({})).unwrap();
        assert!(matches!(
            store.register_sink(&reuse).await,
            Err(ContractError::BitStillReferenced { bit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_loops_deliver_and_compact_until_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::default();
        register(&store, "S1", 1).await;
        let producer = Producer::new();
        for i in 0..7 {
            producer.enqueue(store.as_ref(), "K", &i).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let distributor_task = distributor(&store, &harness).spawn(cancel.clone());
        let compactor_task = RetentionCompactor::new(store.clone(), 5, RetentionPolicy::default())
            .unwrap()
            .with_interval(Duration::from_millis(10))
            .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let metrics = distributor_task.await.unwrap();
        let archived = compactor_task.await.unwrap();

        assert_eq!(archived, 5);
        assert_eq!(store.depth().await.unwrap(), 2);
        assert!(metrics[0].1.delivered_count >= 2);
    }
}

#[cfg(test)]
mod sqlite_e2e_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{QueueStore, SinkStore};
    use dispatcher::{Distributor, DistributorConfig};
    use queue_store::{Producer, SqliteStore};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    /// Local HTTP receiver that records JSON bodies and answers 200
    async fn receiver() -> (String, Arc<Mutex<Vec<serde_json::Value>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let sink = bodies.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let bodies = sink.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let body = loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf).into_owned();
                        let Some(head_end) = text.find("\r\n\r\n") else {
                            continue;
                        };
                        let length = text[..head_end]
                            .lines()
                            .filter_map(|l| l.split_once(':'))
                            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= head_end + 4 + length {
                            break text[head_end + 4..].to_string();
                        }
                    };
                    if let Ok(json) = serde_json::from_str(&body) {
                        bodies.lock().unwrap().push(json);
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        (format!("http://{addr}/metadata"), bodies)
    }

    #[tokio::test]
    async fn test_config_to_delivery_on_disk() {
        let (url, bodies) = receiver().await;
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("fanout.db");
        let config = format!(
            r#"
[store]
url = "sqlite://{}"

[[sinks]]
instance_id = "audit-log"
bit = 1
kind = "log"

[[sinks]]
instance_id = "receiver"
bit = 2
kind = "http"
config = {{ url = "{url}", token = "t0k3n" }}
"#,
            db.display()
        );
        let blueprint = ConfigLoader::load_from_str(&config, ConfigFormat::Toml).unwrap();

        let store = Arc::new(
            SqliteStore::connect(&blueprint.store.url, blueprint.store.max_connections)
                .await
                .unwrap(),
        );
        for seed in &blueprint.sinks {
            store.register_sink(&seed.to_descriptor().unwrap()).await.unwrap();
        }

        let producer = Producer::new();
        let first = producer
            .enqueue(store.as_ref(), "throttle.ips", &vec!["10.0.0.1"])
            .await
            .unwrap();
        let second = producer
            .enqueue(store.as_ref(), "feature.flags", &serde_json::json!({"beta": true}))
            .await
            .unwrap();

        let mut distributor =
            Distributor::new(store.clone(), DistributorConfig::from(&blueprint.distributor));
        let report = distributor.poll(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.delivered, 4);

        for record in [&first, &second] {
            let stored = store.get(&record.transaction_id).await.unwrap().unwrap();
            assert_eq!(stored.committed_mask, 3);
        }

        let bodies = bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["key"], "throttle.ips");
        assert_eq!(bodies[0]["value"], r#"["10.0.0.1"]"#);
        assert_eq!(bodies[1]["key"], "feature.flags");

        // Reopening the file sees the same state
        drop(distributor);
        let reopened = SqliteStore::connect(&blueprint.store.url, 1).await.unwrap();
        assert!(reopened.pending(3).await.unwrap().is_empty());
        assert_eq!(reopened.load_sinks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_receiver_stays_pending() {
        // Bind then drop to get a port nothing listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let descriptor = contracts::SinkDescriptor::new(
            "receiver",
            1,
            "http",
            &serde_json::json!({ "url": format!("http://{addr}/"), "timeout_ms": 500 }),
        )
        .unwrap();
        store.register_sink(&descriptor).await.unwrap();
        let record = Producer::new()
            .enqueue(store.as_ref(), "k", &1)
            .await
            .unwrap();

        let mut distributor = Distributor::new(
            store.clone(),
            DistributorConfig {
                poll_interval: Duration::from_millis(10),
                delivery_timeout: Duration::from_secs(2),
            },
        );
        let report = distributor.poll(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed + report.timed_out, 1);
        let stored = store.get(&record.transaction_id).await.unwrap().unwrap();
        assert_eq!(stored.committed_mask, 0);
    }
}
