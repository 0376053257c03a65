//! The [WindowedStreamProcessor] is the entry point of the engine. Events are hash partitioned by
//! key onto a fixed set of shards, each shard runs as its own tokio task with a bounded ingestion
//! queue. Fired windows flow through a bounded output queue (or a callback) back to the caller.
//!
//! Lifecycle:
//!
//! ```text
//!  Running --stop()--> Draining --(every shard drained)--> Stopped
//! ```
//!
//! Once `stop` is called no new events are accepted, the events already queued are processed, and
//! every window still open is fired.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Error;
use crate::Result;
use crate::aggregator::Aggregator;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineSettings, Settings, WindowConfig};
use crate::message::{StreamEvent, WindowResult};
use crate::metrics::WindowMetrics;
use crate::processor::shard::{Shard, ShardComponents};
use crate::trigger::TriggerPolicy;
use crate::windower::WindowAssigner;

mod shard;

type ResultCallback<T> = Arc<dyn Fn(WindowResult<T>) + Send + Sync>;

/// Where the shards deliver the fired windows.
pub(crate) enum ResultSink<T> {
    /// bounded output queue read by [WindowedStreamProcessor::poll_result]
    Channel(mpsc::Sender<WindowResult<T>>),
    /// invoked from the shard task, must not block
    Callback(ResultCallback<T>),
}

impl<T> Clone for ResultSink<T> {
    fn clone(&self) -> Self {
        match self {
            ResultSink::Channel(tx) => ResultSink::Channel(tx.clone()),
            ResultSink::Callback(callback) => ResultSink::Callback(Arc::clone(callback)),
        }
    }
}

impl<T: Send + 'static> ResultSink<T> {
    /// Delivers the result, waiting for room in the output queue. There is no timeout, a shard
    /// stays blocked here until a consumer polls. Returns false if the receiving side is gone.
    pub(crate) async fn emit(&self, result: WindowResult<T>) -> bool {
        match self {
            ResultSink::Channel(tx) => tx.send(result).await.is_ok(),
            ResultSink::Callback(callback) => {
                callback(result);
                true
            }
        }
    }
}

/// Lifecycle state of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    /// accepting events
    Running = 0,
    /// stop was requested, queued events are processed and open windows fired
    Draining = 1,
    Stopped = 2,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessorState::Running,
            1 => ProcessorState::Draining,
            _ => ProcessorState::Stopped,
        }
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorState::Running => write!(f, "running"),
            ProcessorState::Draining => write!(f, "draining"),
            ProcessorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Builds a [WindowedStreamProcessor].
pub struct ProcessorBuilder<A: Aggregator> {
    window: WindowConfig,
    engine: EngineSettings,
    aggregator: A,
    clock: Arc<dyn Clock>,
    callback: Option<ResultCallback<A::Output>>,
}

impl<A: Aggregator> ProcessorBuilder<A> {
    pub fn new(window: WindowConfig, aggregator: A) -> Self {
        Self {
            window,
            engine: EngineSettings::default(),
            aggregator,
            clock: Arc::new(SystemClock),
            callback: None,
        }
    }

    /// Builder from the complete [Settings], usually loaded from the environment.
    pub fn from_settings(settings: Settings, aggregator: A) -> Self {
        Self::new(settings.window, aggregator).engine(settings.engine)
    }

    pub fn engine(mut self, engine: EngineSettings) -> Self {
        self.engine = engine;
        self
    }

    /// Clock used for processing time triggers, [SystemClock] by default.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Delivers the fired windows to the callback instead of the output queue. The callback runs on
    /// the shard task, so it must be quick and never block.
    pub fn callback(
        mut self,
        callback: impl Fn(WindowResult<A::Output>) + Send + Sync + 'static,
    ) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Validates the settings and starts the shards. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<WindowedStreamProcessor<A::Output>> {
        self.engine.validate()?;

        let (sink, output_rx) = match self.callback {
            Some(callback) => (ResultSink::Callback(callback), None),
            None => {
                let (tx, rx) = mpsc::channel(self.engine.output_queue_capacity);
                (ResultSink::Channel(tx), Some(tokio::sync::Mutex::new(rx)))
            }
        };

        let aggregator = Arc::new(self.aggregator);
        let metrics = WindowMetrics::new();
        let cln_token = CancellationToken::new();

        let mut shard_txs = Vec::with_capacity(self.engine.num_shards);
        let mut shard_handles = Vec::with_capacity(self.engine.num_shards);
        for id in 0..self.engine.num_shards {
            let (tx, rx) = mpsc::channel(self.engine.ingest_queue_capacity);
            let shard = Shard::new(
                id,
                ShardComponents {
                    assigner: WindowAssigner::from(&self.window),
                    trigger: TriggerPolicy::from(&self.window),
                    aggregator: Arc::clone(&aggregator),
                    sink: sink.clone(),
                    clock: Arc::clone(&self.clock),
                    time_domain: self.engine.time_domain,
                    tick_interval: self.engine.tick_interval,
                    metrics: metrics.clone(),
                },
            );
            shard_txs.push(tx);
            shard_handles.push(tokio::spawn(
                shard.run(ReceiverStream::new(rx), cln_token.clone()),
            ));
        }

        info!(
            window = %self.window.kind().tag(),
            num_shards = self.engine.num_shards,
            time_domain = ?self.engine.time_domain,
            "Windowed stream processor started"
        );

        Ok(WindowedStreamProcessor {
            shard_txs,
            output_rx,
            shard_handles: parking_lot::Mutex::new(shard_handles),
            state: AtomicU8::new(ProcessorState::Running as u8),
            cln_token,
            ingest_timeout: self.engine.ingest_timeout,
            metrics,
        })
    }
}

/// Groups a stream of events into windows per partition key and emits one aggregated
/// [WindowResult] per fired window.
///
/// All the methods take `&self`, wrap the processor in an [Arc] to ingest and poll from different
/// tasks.
pub struct WindowedStreamProcessor<T> {
    shard_txs: Vec<mpsc::Sender<StreamEvent>>,
    /// None when the results are delivered to a callback
    output_rx: Option<tokio::sync::Mutex<mpsc::Receiver<WindowResult<T>>>>,
    shard_handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    state: AtomicU8,
    cln_token: CancellationToken,
    ingest_timeout: Duration,
    metrics: WindowMetrics,
}

impl<T: Send + 'static> WindowedStreamProcessor<T> {
    /// Starts a processor with the default [EngineSettings] and the wall clock.
    pub fn new<A>(window: WindowConfig, aggregator: A) -> Result<Self>
    where
        A: Aggregator<Output = T>,
    {
        ProcessorBuilder::new(window, aggregator).build()
    }

    /// Routes the event to the shard owning its partition key. Waits up to the ingest timeout for
    /// room in the shard's queue and returns [Error::QueueFull] if there is none. Events are
    /// validated by the shard, invalid ones are counted and dropped there.
    pub async fn ingest(&self, event: StreamEvent) -> Result<()> {
        if self.state() != ProcessorState::Running {
            return Err(Error::Stopped);
        }

        let shard = self.shard_for(&event.partition_key());
        let tx = self
            .shard_txs
            .get(shard)
            .ok_or_else(|| Error::Shard(format!("no shard at index {shard}")))?;

        match tx.send_timeout(event, self.ingest_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(event)) => Err(Error::QueueFull(format!(
                "ingestion queue of shard {shard} is full, event {} not accepted",
                event.id()
            ))),
            Err(SendTimeoutError::Closed(_)) => Err(Error::Stopped),
        }
    }

    /// Waits up to `timeout` for the next fired window. Returns None on timeout, once the
    /// processor has stopped and every result was consumed, or if a callback was configured.
    pub async fn poll_result(&self, timeout: Duration) -> Option<WindowResult<T>> {
        let output_rx = self.output_rx.as_ref()?;
        tokio::time::timeout(timeout, async { output_rx.lock().await.recv().await })
            .await
            .ok()
            .flatten()
    }

    /// Stops accepting events, drains the shards and waits for them to finish. Results fired while
    /// draining remain available through `poll_result`. Calling it again is a no-op.
    ///
    /// Draining fires every open window, so with the output queue the consumer must keep calling
    /// `poll_result` while `stop` runs: a shard blocked on a full output queue never finishes and
    /// `stop` does not return.
    pub async fn stop(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                ProcessorState::Running as u8,
                ProcessorState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }
        info!("Stopping windowed stream processor");

        self.cln_token.cancel();
        let handles = std::mem::take(&mut *self.shard_handles.lock());

        let mut result = Ok(());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(?e, "Shard task failed");
                result = Err(Error::Shard(format!("shard task failed: {e}")));
            }
        }

        self.state
            .store(ProcessorState::Stopped as u8, Ordering::SeqCst);
        info!(metrics = ?self.metrics.snapshot(), "Windowed stream processor stopped");
        result
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Counters of the processor, register them into a [prometheus_client::registry::Registry] to
    /// export them.
    pub fn metrics(&self) -> &WindowMetrics {
        &self.metrics
    }

    fn shard_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shard_txs.len() as u64) as usize
    }
}

impl<T> Drop for WindowedStreamProcessor<T> {
    fn drop(&mut self) {
        // let the shard tasks wind down if stop was never called
        self.cln_token.cancel();
    }
}
