//! Pipeline wiring
//!
//! [`Pipeline`] owns the flow aggregator, the rule engine, the store
//! and the three tasks that drive them:
//!
//! 1. **Ingestion** - consumes raw datagrams (one channel message per
//!    datagram) and runs parse -> demux -> aggregate synchronously,
//!    then queues a fire-and-forget flow snapshot write.
//! 2. **Window timer** - summarizes live flows every window period and
//!    feeds the batch through detection.
//! 3. **Persistence writer** - drains the bounded write queue into
//!    SQLite on the blocking pool; faults are logged and swallowed.
//!
//! The capture facility keeps the channel sender; dropping it (or
//! calling [`Pipeline::shutdown`]) winds the pipeline down. Construct
//! at capture start, shut down at capture stop - there is no hidden
//! global state.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::clock;
use crate::config::PipelineConfig;
use crate::detect::{Alert, AlertSink, DetectionDispatcher, RuleEngine};
use crate::error::{Error, Result};
use crate::flow::{FlowAggregator, FlowKey};
use crate::net::{parser, transport};
use crate::stats::{Counters, PipelineStats};
use crate::store::{AlertRecord, FlowRecord, Store};

// ============================================================================
// PERSISTENCE QUEUE
// ============================================================================

/// One durability request for the writer task.
#[derive(Debug)]
pub enum PersistRequest {
    Flow(FlowRecord),
    Alert(AlertRecord),
}

/// Cloneable handle to the bounded persistence queue.
///
/// Submission never blocks: a full queue rejects the request
/// (drop-newest) so ingestion and detection keep moving regardless of
/// store latency.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<PersistRequest>,
}

impl PersistHandle {
    pub fn submit(&self, request: PersistRequest) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::QueueClosed,
        })
    }
}

impl AlertSink for PersistHandle {
    fn persist(&self, alert: Alert) -> Result<()> {
        self.submit(PersistRequest::Alert(alert.into()))
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    aggregator: Arc<FlowAggregator>,
    store: Arc<Store>,
    counters: Arc<Counters>,
    persist: PersistHandle,
    config: PipelineConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the three pipeline tasks. Must be called on a tokio
    /// runtime. The store is opened by the caller so that an unusable
    /// database fails loudly before any capture starts.
    pub fn start(config: PipelineConfig, store: Store, packets: mpsc::Receiver<Vec<u8>>) -> Self {
        let store = Arc::new(store);
        let aggregator = Arc::new(FlowAggregator::new(config.idle_timeout_ms));
        let counters = Arc::new(Counters::default());

        let (persist_tx, persist_rx) = mpsc::channel(config.persist_queue_capacity);
        let persist = PersistHandle { tx: persist_tx };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_ingest(
            packets,
            Arc::clone(&aggregator),
            persist.clone(),
            Arc::clone(&counters),
            shutdown_rx.clone(),
        )));

        let dispatcher = DetectionDispatcher::new(
            RuleEngine::with_defaults(config.thresholds.clone()),
            persist.clone(),
        );
        tasks.push(tokio::spawn(run_window_timer(
            Arc::clone(&aggregator),
            dispatcher,
            Arc::clone(&counters),
            config.window_period_ms,
            shutdown_rx,
        )));

        // SQLite work stays off the async workers
        let writer_store = Arc::clone(&store);
        let writer_counters = Arc::clone(&counters);
        tasks.push(tokio::task::spawn_blocking(move || {
            run_writer(persist_rx, writer_store, writer_counters)
        }));

        log::info!(
            "[pipeline] started (window {} ms, idle timeout {} ms)",
            config.window_period_ms,
            config.idle_timeout_ms
        );

        Self {
            aggregator,
            store,
            counters,
            persist,
            config,
            shutdown_tx,
            tasks,
        }
    }

    /// Feed one raw datagram through parse -> demux -> aggregate
    /// synchronously. The ingestion task calls this for every channel
    /// message; callers that own their own delivery loop may call it
    /// directly.
    pub fn process_packet(&self, datagram: &[u8]) {
        self.process_packet_at(datagram, clock::now_ms());
    }

    /// Timestamped variant of [`Self::process_packet`] for replay and
    /// tests.
    pub fn process_packet_at(&self, datagram: &[u8], now_ms: i64) {
        ingest_one(
            &self.aggregator,
            &self.persist,
            &self.counters,
            datagram,
            now_ms,
        );
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot(self.aggregator.len())
    }

    /// Presentation read: most recent alerts, newest first, bounded by
    /// the configured limit.
    pub fn recent_alerts(&self) -> Result<Vec<AlertRecord>> {
        self.store.recent_alerts(self.config.recent_alert_limit)
    }

    /// Retention sweep: delete stored flows and alerts older than the
    /// cutoff. Returns (flows removed, alerts removed).
    pub fn prune_older_than(&self, cutoff_ms: i64) -> Result<(usize, usize)> {
        let flows = self.store.prune_flows(cutoff_ms)?;
        let alerts = self.store.prune_alerts(cutoff_ms)?;
        Ok((flows, alerts))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stop the pipeline: ingestion finishes its in-flight datagram,
    /// the timer finishes any in-flight emission, and the persistence
    /// queue is drained before the writer exits.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        let writer = self.tasks.pop();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        // Ingestion and the timer have dropped their queue handles by
        // now; dropping ours closes the queue so the writer can drain
        // and exit.
        drop(self.persist);
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        log::info!("[pipeline] stopped");
    }
}

// ============================================================================
// TASKS
// ============================================================================

/// Parse -> demux -> aggregate for one datagram, then queue the flow
/// snapshot write. Every fault in here is contained: malformed input is
/// counted and skipped, a full queue drops the write.
fn ingest_one(
    aggregator: &FlowAggregator,
    persist: &PersistHandle,
    counters: &Counters,
    datagram: &[u8],
    now_ms: i64,
) {
    counters.packets_seen.fetch_add(1, Ordering::Relaxed);

    let Some(ip) = parser::parse(datagram) else {
        counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let (src_port, dst_port) = transport::extract_ports(ip.protocol, &ip.payload);
    if transport::carries_ports(ip.protocol) && src_port.is_none() {
        counters.ports_missing.fetch_add(1, Ordering::Relaxed);
    }

    let key = FlowKey::new(ip.src, ip.dst, src_port, dst_port, ip.protocol);
    let payload_len = ip.payload.len();
    let agg = aggregator.update(key.clone(), payload_len, now_ms);

    // Fire-and-forget durability; never blocks the packet path
    let record = FlowRecord::from_aggregate(&key, &agg);
    match persist.submit(PersistRequest::Flow(record)) {
        Ok(()) => {}
        Err(Error::QueueFull) => {
            counters.writes_dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("[persist] queue full, flow write dropped");
        }
        Err(e) => log::debug!("[persist] flow write not queued: {}", e),
    }
}

async fn run_ingest(
    mut packets: mpsc::Receiver<Vec<u8>>,
    aggregator: Arc<FlowAggregator>,
    persist: PersistHandle,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("[pipeline] ingestion task started");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender means the pipeline is gone
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = packets.recv() => {
                match received {
                    Some(datagram) => ingest_one(
                        &aggregator,
                        &persist,
                        &counters,
                        &datagram,
                        clock::now_ms(),
                    ),
                    // Capture side closed its sender
                    None => break,
                }
            }
        }
    }
    log::info!("[pipeline] ingestion task stopped");
}

async fn run_window_timer(
    aggregator: Arc<FlowAggregator>,
    dispatcher: DetectionDispatcher<PersistHandle>,
    counters: Arc<Counters>,
    period_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_millis(period_ms);
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!("[pipeline] window timer started ({} ms period)", period_ms);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now_ms = clock::now_ms();
                let batch = aggregator.emit_window(now_ms);
                if batch.is_empty() {
                    continue;
                }
                log::debug!("[window] {} flows summarized", batch.len());
                let raised = dispatcher.dispatch(&batch, now_ms);
                if raised > 0 {
                    counters.alerts_raised.fetch_add(raised, Ordering::Relaxed);
                }
            }
        }
    }
    log::info!("[pipeline] window timer stopped");
}

/// Drains the write queue into the store. Runs on the blocking pool;
/// exits once every queue sender is gone and the queue is empty.
fn run_writer(
    mut requests: mpsc::Receiver<PersistRequest>,
    store: Arc<Store>,
    counters: Arc<Counters>,
) {
    log::info!("[persist] writer started");
    while let Some(request) = requests.blocking_recv() {
        let result = match request {
            PersistRequest::Flow(record) => store.upsert_flow(&record),
            PersistRequest::Alert(record) => store.insert_alert(&record),
        };
        // At-most-once: a failed write is counted, never retried
        if let Err(e) = result {
            counters.writes_failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("[persist] write failed: {}", e);
        }
    }
    log::info!("[persist] queue drained, writer stopped");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::detect::RuleThresholds;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Minimal IPv4/TCP datagram: 20-byte header plus `payload_len`
    /// bytes of payload starting with the given port pair.
    fn tcp_packet(src_port: u16, dst_port: u16, payload_len: usize) -> Vec<u8> {
        assert!(payload_len >= 4);
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[9] = 6; // TCP
        packet[12..16].copy_from_slice(&[10, 0, 0, 1]);
        packet[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let mut payload = vec![0u8; payload_len];
        payload[0..2].copy_from_slice(&src_port.to_be_bytes());
        payload[2..4].copy_from_slice(&dst_port.to_be_bytes());
        packet.extend_from_slice(&payload);
        packet
    }

    struct CollectingSink(Mutex<Vec<Alert>>);

    impl AlertSink for &CollectingSink {
        fn persist(&self, alert: Alert) -> Result<()> {
            self.0.lock().push(alert);
            Ok(())
        }
    }

    /// End-to-end through the component chain, deterministic clock:
    /// 501 packets of 100 payload bytes, same 5-tuple, 1 ms apart,
    /// inside one window.
    #[test]
    fn test_packet_train_end_to_end() {
        let aggregator = FlowAggregator::new(60_000);
        let (persist_tx, _persist_rx) = mpsc::channel(1024);
        let persist = PersistHandle { tx: persist_tx };
        let counters = Counters::default();

        let packet = tcp_packet(1000, 80, 100);
        for i in 0..501i64 {
            ingest_one(&aggregator, &persist, &counters, &packet, i);
        }

        let batch = aggregator.emit_window(500);
        assert_eq!(batch.len(), 1);

        let vector = &batch[0];
        assert_eq!(vector.packets, 501);
        assert_eq!(vector.bytes, 50_100);
        assert!((vector.avg_packet_size - 100.0).abs() < 1e-9);
        assert!((vector.avg_iat_ms - 1.0).abs() < 1e-9);
        assert_eq!(vector.flow_key, "10.0.0.1|10.0.0.2|1000|80|6");

        let sink = CollectingSink(Mutex::new(Vec::new()));
        let dispatcher = DetectionDispatcher::new(
            RuleEngine::with_defaults(RuleThresholds::default()),
            &sink,
        );
        let raised = dispatcher.dispatch(&batch, 500);

        assert_eq!(raised, 1);
        let alerts = sink.0.lock();
        assert_eq!(alerts[0].alert_type, "high_packet_rate");
        assert_eq!(alerts[0].confidence, 0.8);
    }

    #[test]
    fn test_malformed_datagrams_are_counted_and_skipped() {
        let aggregator = FlowAggregator::new(60_000);
        let (persist_tx, _persist_rx) = mpsc::channel(16);
        let persist = PersistHandle { tx: persist_tx };
        let counters = Counters::default();

        ingest_one(&aggregator, &persist, &counters, &[], 0);
        ingest_one(&aggregator, &persist, &counters, &[0x60, 0, 0], 0);
        ingest_one(&aggregator, &persist, &counters, &[0x45; 10], 0);

        let stats = counters.snapshot(aggregator.len());
        assert_eq!(stats.packets_seen, 3);
        assert_eq!(stats.packets_dropped, 3);
        assert_eq!(stats.live_flows, 0);
    }

    #[test]
    fn test_full_queue_drops_newest_without_blocking() {
        let aggregator = FlowAggregator::new(60_000);
        // Capacity 1 and no reader: every write after the first drops
        let (persist_tx, _persist_rx) = mpsc::channel(1);
        let persist = PersistHandle { tx: persist_tx };
        let counters = Counters::default();

        let packet = tcp_packet(1000, 80, 10);
        for i in 0..5 {
            ingest_one(&aggregator, &persist, &counters, &packet, i);
        }

        let stats = counters.snapshot(aggregator.len());
        // Aggregation kept going even though durability fell behind
        assert_eq!(stats.packets_seen, 5);
        assert_eq!(stats.writes_dropped, 4);
        assert_eq!(aggregator.get(&key_of(&packet)).unwrap().packets, 5);
    }

    fn key_of(packet: &[u8]) -> FlowKey {
        let ip = parser::parse(packet).unwrap();
        let (src_port, dst_port) = transport::extract_ports(ip.protocol, &ip.payload);
        FlowKey::new(ip.src, ip.dst, src_port, dst_port, ip.protocol)
    }

    /// Full async pipeline against an in-memory store: packets in
    /// through the channel, alert out through the store.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipeline_detects_packet_train() {
        init_logs();

        let config = PipelineConfig {
            window_period_ms: 100,
            ..Default::default()
        };
        let (packet_tx, packet_rx) = mpsc::channel(2048);
        let pipeline = Pipeline::start(config, Store::open_in_memory().unwrap(), packet_rx);

        let packet = tcp_packet(1000, 80, 100);
        for _ in 0..501 {
            packet_tx.send(packet.clone()).await.unwrap();
        }

        // Wait for a window tick and the writer to land the alert
        let mut alerts = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            alerts = pipeline.recent_alerts().unwrap();
            if !alerts.is_empty() {
                break;
            }
        }

        assert!(!alerts.is_empty(), "no alert raised within timeout");
        assert_eq!(alerts[0].alert_type, "high_packet_rate");
        assert_eq!(alerts[0].confidence, 0.8);

        let stats = pipeline.stats();
        assert_eq!(stats.packets_seen, 501);
        assert_eq!(stats.packets_dropped, 0);
        assert!(stats.alerts_raised >= 1);

        // The per-packet flow snapshot reached the store too
        let flow = pipeline
            .store()
            .flow_by_key("10.0.0.1|10.0.0.2|1000|80|6")
            .unwrap()
            .expect("flow snapshot not persisted");
        assert_eq!(flow.packets, 501);
        assert_eq!(flow.bytes, 50_100);

        tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
            .await
            .expect("shutdown hung");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipeline_shutdown_is_clean_when_idle() {
        init_logs();

        let (_packet_tx, packet_rx) = mpsc::channel(16);
        let pipeline = Pipeline::start(
            PipelineConfig::default(),
            Store::open_in_memory().unwrap(),
            packet_rx,
        );

        tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
            .await
            .expect("shutdown hung");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retention_sweep_through_pipeline() {
        init_logs();

        let (_packet_tx, packet_rx) = mpsc::channel(16);
        let pipeline = Pipeline::start(
            PipelineConfig::default(),
            Store::open_in_memory().unwrap(),
            packet_rx,
        );

        pipeline
            .store()
            .insert_alert(&AlertRecord {
                alert_type: "high_packet_rate".to_string(),
                message: "High packet rate detected".to_string(),
                ts_ms: 100,
                confidence: 0.8,
                evidence: "{}".to_string(),
            })
            .unwrap();

        let (flows, alerts) = pipeline.prune_older_than(500).unwrap();
        assert_eq!((flows, alerts), (0, 1));
        assert!(pipeline.recent_alerts().unwrap().is_empty());

        pipeline.shutdown().await;
    }
}
