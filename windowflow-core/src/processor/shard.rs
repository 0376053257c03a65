//! A shard owns a disjoint slice of the partition keys and the [WindowStateStore] for them. It runs
//! a single cooperative loop: read an event, assign it to windows, fire whatever is complete and
//! emit the results. Nothing in a shard is shared with other shards.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::Result;
use crate::aggregator::Aggregator;
use crate::clock::Clock;
use crate::config::{TimeDomain, WindowKindTag};
use crate::message::{StreamEvent, WindowResult};
use crate::metrics::WindowMetrics;
use crate::processor::ResultSink;
use crate::store::{WindowInstance, WindowStateStore};
use crate::trigger::TriggerPolicy;
use crate::windower::{WindowAssigner, WindowOperation};

pub(crate) struct Shard<A: Aggregator> {
    id: usize,
    assigner: WindowAssigner,
    trigger: TriggerPolicy,
    store: WindowStateStore,
    aggregator: Arc<A>,
    sink: ResultSink<A::Output>,
    clock: Arc<dyn Clock>,
    time_domain: TimeDomain,
    /// Maximum event time seen by this shard, "now" for [TimeDomain::EventTime].
    max_event_time: i64,
    /// Latest "now" handed to the trigger policy, it never moves backwards.
    last_now: i64,
    tick_interval: Duration,
    metrics: WindowMetrics,
}

/// Everything a shard needs apart from its own state.
pub(crate) struct ShardComponents<A: Aggregator> {
    pub(crate) assigner: WindowAssigner,
    pub(crate) trigger: TriggerPolicy,
    pub(crate) aggregator: Arc<A>,
    pub(crate) sink: ResultSink<A::Output>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) time_domain: TimeDomain,
    pub(crate) tick_interval: Duration,
    pub(crate) metrics: WindowMetrics,
}

impl<A: Aggregator> Shard<A> {
    pub(crate) fn new(id: usize, components: ShardComponents<A>) -> Self {
        let kind = components.assigner.kind();
        Self {
            id,
            assigner: components.assigner,
            trigger: components.trigger,
            store: WindowStateStore::new(kind),
            aggregator: components.aggregator,
            sink: components.sink,
            clock: components.clock,
            time_domain: components.time_domain,
            max_event_time: i64::MIN,
            last_now: i64::MIN,
            tick_interval: components.tick_interval,
            metrics: components.metrics,
        }
    }

    /// Runs the shard till the cancellation token is cancelled or all the senders are dropped, then
    /// processes whatever is still queued and force-fires every open window.
    pub(crate) async fn run(
        mut self,
        mut events: ReceiverStream<StreamEvent>,
        cln_token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cln_token.cancelled() => {
                    info!(shard = self.id, "Shard received stop signal, draining");
                    break;
                }

                read_event = events.next() => {
                    match read_event {
                        Some(event) => self.process_event(event).await,
                        // all the senders are gone
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    let now = self.now();
                    self.fire_expired(now).await;
                }
            }
        }

        // stop accepting new events but process the ones which made it into the queue
        events.close();
        while let Some(event) = events.next().await {
            self.process_event(event).await;
        }

        self.drain().await;
    }

    /// "now" as seen by the trigger policy. Like a watermark it only moves forward, a clock
    /// stepping back must not reopen windows which have already fired.
    fn now(&mut self) -> i64 {
        let observed = match self.time_domain {
            TimeDomain::ProcessingTime => self.clock.now_millis(),
            TimeDomain::EventTime => self.max_event_time,
        };
        self.last_now = self.last_now.max(observed);
        self.last_now
    }

    /// Validates, assigns and appends the event, then fires every window which is complete.
    pub(crate) async fn process_event(&mut self, event: StreamEvent) {
        let validated = event.validate().and_then(|key| {
            self.assigner
                .assign(&key, event.event_time(), &self.store)
                .map(|operations| (key, operations))
        });
        let (key, operations) = match validated {
            Ok(validated) => validated,
            Err(e) => {
                debug!(shard = self.id, ?e, "Dropping invalid event");
                self.metrics.events_dropped_invalid.inc();
                return;
            }
        };
        self.metrics.events_processed.inc();
        self.max_event_time = self.max_event_time.max(event.event_time());

        let now = self.now();
        if let Err(e) = self.apply(key, event, operations, now).await {
            debug!(shard = self.id, ?e, now, "Dropping late event");
            self.metrics.events_dropped_late.inc();
        }

        self.fire_expired(now).await;
    }

    /// Applies the window operations of the event to the store. Returns [Error::LateEvent] if the
    /// event could not be appended to any window.
    async fn apply(
        &mut self,
        key: Arc<str>,
        event: StreamEvent,
        operations: Vec<WindowOperation>,
        now: i64,
    ) -> Result<()> {
        let event_time = event.event_time();
        let mut appended = false;
        for operation in operations {
            match operation {
                WindowOperation::Close(window) => {
                    // the previous session fires before the next one is opened
                    if self.store.mark_triggered(&key, window.start) {
                        self.emit_triggered().await;
                    }
                }
                WindowOperation::Open(window) | WindowOperation::Append(window) => {
                    if self.trigger.is_closed(&window, now) {
                        debug!(shard = self.id, key = %key, %window, event_time, "Window already closed");
                        continue;
                    }
                    self.store
                        .get_or_create(&key, window.start, window.end)
                        .append(event.clone());
                    appended = true;
                }
            }
        }

        if appended {
            Ok(())
        } else {
            Err(Error::LateEvent {
                event_time,
                key: key.to_string(),
            })
        }
    }

    /// Fires every open window whose deadline has passed at `now`.
    pub(crate) async fn fire_expired(&mut self, now: i64) {
        let trigger = self.trigger;
        let marked = self
            .store
            .mark_expired(|instance| trigger.should_fire(instance, now));
        if marked > 0 {
            self.emit_triggered().await;
        }
    }

    async fn emit_triggered(&mut self) {
        for instance in self.store.remove_triggered() {
            self.emit(instance).await;
        }
    }

    /// Force-fires every open window and leaves the store empty.
    pub(crate) async fn drain(&mut self) {
        let instances = self.store.drain_all();
        info!(
            shard = self.id,
            windows = instances.len(),
            "Force firing open windows"
        );
        for instance in instances {
            self.emit(instance).await;
        }
    }

    async fn emit(&self, instance: WindowInstance) {
        let window = instance.window();
        let event_count = instance.event_count();
        let result = WindowResult {
            key: Arc::clone(instance.key()),
            start: window.start,
            end: window.end,
            kind: self.kind(),
            event_count,
            aggregated: self.aggregator.aggregate(instance.events()),
        };

        self.metrics.windows_triggered.inc();
        self.metrics.events_in_windows.inc_by(event_count as u64);
        debug!(shard = self.id, key = %result.key, %window, event_count, "Window fired");

        if !self.sink.emit(result).await {
            warn!(
                shard = self.id,
                %window,
                "Output receiver dropped, discarding window result"
            );
        }
    }

    fn kind(&self) -> WindowKindTag {
        self.assigner.kind()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &WindowStateStore {
        &self.store
    }
}
