use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};

use crate::{
    network::{Network, RequestOptions},
    StatsigMetadata,
};

use super::{batch_event_processor::BatchEventProcessor, dedupe::ExposureDedupe, StatsigEvent};

#[derive(Debug, Clone)]
pub struct EventLoggerConfig {
    /// Queue length that triggers a flush without waiting for the timer. Also the largest batch
    /// posted in one request.
    pub max_queue_length: usize,
    /// Interval of periodic flushes. Zero disables the timer.
    pub flush_interval: Duration,
    /// How long an exposure key suppresses identical exposures.
    pub dedupe_interval: Duration,
    /// Number of exposure keys remembered before the window is cleared early.
    pub dedupe_capacity: usize,
    /// Discard flushed batches instead of posting them.
    pub local_mode: bool,
    pub request_options: RequestOptions,
}

impl EventLoggerConfig {
    pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 1000;
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_DEDUPE_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_DEDUPE_CAPACITY: usize = 100_000;
    pub const DEFAULT_RETRIES: u32 = 3;

    pub fn new() -> EventLoggerConfig {
        EventLoggerConfig::default()
    }
}

impl Default for EventLoggerConfig {
    fn default() -> EventLoggerConfig {
        EventLoggerConfig {
            max_queue_length: EventLoggerConfig::DEFAULT_MAX_QUEUE_LENGTH,
            flush_interval: EventLoggerConfig::DEFAULT_FLUSH_INTERVAL,
            dedupe_interval: EventLoggerConfig::DEFAULT_DEDUPE_INTERVAL,
            dedupe_capacity: EventLoggerConfig::DEFAULT_DEDUPE_CAPACITY,
            local_mode: false,
            request_options: RequestOptions::new().with_retries(EventLoggerConfig::DEFAULT_RETRIES),
        }
    }
}

/// Buffers events and delivers them to `log_event` in batches.
///
/// A flush happens when the queue reaches `max_queue_length`, when the flush timer fires and on
/// [`EventLogger::shutdown`]. Delivery is best-effort: a batch that fails to post is dropped.
pub struct EventLogger {
    config: EventLoggerConfig,
    network: Arc<dyn Network>,
    metadata: StatsigMetadata,
    batch_processor: BatchEventProcessor,
    dedupe: ExposureDedupe,
    flush_requested: Arc<Notify>,
    /// Held for the duration of a flush.
    flush_lock: tokio::sync::Mutex<()>,
    flusher: Mutex<Option<Flusher>>,
}

struct Flusher {
    stop_sender: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl EventLogger {
    pub fn new(
        config: EventLoggerConfig,
        network: Arc<dyn Network>,
        metadata: StatsigMetadata,
    ) -> EventLogger {
        let dedupe = ExposureDedupe::new(config.dedupe_interval, config.dedupe_capacity);
        EventLogger {
            config,
            network,
            metadata,
            batch_processor: BatchEventProcessor::new(),
            dedupe,
            flush_requested: Arc::new(Notify::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flusher: Mutex::new(None),
        }
    }

    /// Queue `event` for delivery. Exposures already logged within the dedupe window are dropped.
    ///
    /// Never blocks on the network.
    pub fn enqueue(&self, event: StatsigEvent) {
        if !self.dedupe.should_log(&event) {
            log::trace!(target: "statsig", event = event.event_name.as_str(); "duplicate exposure dropped");
            return;
        }

        let queue_length = self.batch_processor.push(event);
        if queue_length >= self.config.max_queue_length {
            self.flush_requested.notify_one();
        }
    }

    /// Number of events waiting for the next flush.
    pub fn pending_events(&self) -> usize {
        self.batch_processor.len()
    }

    /// Start the background flush task. Must be called within a tokio runtime.
    ///
    /// Calling it again while the task is running has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut flusher = self
            .flusher
            .lock()
            .expect("thread holding flusher lock should not panic");
        if flusher.is_some() {
            return;
        }

        let (stop_sender, mut stop_receiver) = watch::channel(false);
        let logger = Arc::downgrade(self);
        let flush_requested = self.flush_requested.clone();
        let flush_interval = self.config.flush_interval;
        let join_handle = tokio::spawn(async move {
            loop {
                let timer = async {
                    if flush_interval.is_zero() {
                        std::future::pending::<()>().await
                    } else {
                        tokio::time::sleep(flush_interval).await
                    }
                };
                tokio::select! {
                    _ = timer => {}
                    _ = flush_requested.notified() => {}
                    // Either a stop command or the sender was dropped.
                    _ = stop_receiver.changed() => {
                        log::debug!(target: "statsig", "event flusher received stop command");
                        return;
                    }
                }

                let Some(logger) = logger.upgrade() else {
                    return;
                };
                logger.flush().await;
            }
        });

        *flusher = Some(Flusher {
            stop_sender,
            join_handle,
        });
    }

    /// Send every queued event now.
    pub async fn flush(&self) {
        let _guard = self.flush_lock.lock().await;

        let events = self.batch_processor.take_all();
        if events.is_empty() {
            return;
        }
        if self.config.local_mode {
            log::debug!(target: "statsig", events = events.len(); "local mode, discarding events");
            return;
        }

        for batch in events.chunks(self.config.max_queue_length.max(1)) {
            let body = json!({
                "events": batch,
                "statsigMetadata": self.metadata,
            });
            match self
                .network
                .post("log_event", body, self.config.request_options)
                .await
            {
                Ok(_) => {
                    log::debug!(target: "statsig", events = batch.len(); "flushed events");
                }
                Err(err) => {
                    log::warn!(target: "statsig", events = batch.len(); "failed to log events, dropping batch: {err}");
                }
            }
        }
    }

    /// Stop the flush task and deliver everything still queued.
    pub async fn shutdown(&self) {
        let flusher = self
            .flusher
            .lock()
            .expect("thread holding flusher lock should not panic")
            .take();
        if let Some(flusher) = flusher {
            // Error means the task exited already.
            let _ = flusher.stop_sender.send(true);
            if let Err(err) = flusher.join_handle.await {
                log::warn!(target: "statsig", "event flusher panicked: {err}");
            }
        }
        self.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, time::Duration};

    use crate::{
        eval::{EvaluationReason, EvaluationResult},
        events::StatsigEvent,
        network::Network,
        test_utils::FakeNetwork,
        Error, StatsigMetadata, StatsigUser,
    };

    use super::{EventLogger, EventLoggerConfig};

    fn logger(network: &Arc<FakeNetwork>, config: EventLoggerConfig) -> Arc<EventLogger> {
        let network: Arc<dyn Network> = network.clone();
        Arc::new(EventLogger::new(
            config,
            network,
            StatsigMetadata::new("rust-server", "test"),
        ))
    }

    fn quiet_config() -> EventLoggerConfig {
        EventLoggerConfig {
            flush_interval: Duration::from_secs(3600),
            ..EventLoggerConfig::default()
        }
    }

    fn gate_exposure(user_id: &str) -> StatsigEvent {
        let mut result = EvaluationResult::unrecognized(EvaluationReason::Network);
        result.bool_value = true;
        result.rule_id = "rule".to_owned();
        StatsigEvent::gate_exposure(&StatsigUser::with_user_id(user_id), "gate", &result)
    }

    fn custom(name: String) -> StatsigEvent {
        StatsigEvent::custom(&StatsigUser::with_user_id("u"), name, None, None)
    }

    async fn wait_for_events(network: &FakeNetwork, count: usize) {
        for _ in 0..200 {
            if network.logged_events().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn repeated_exposures_are_logged_once() {
        let network = Arc::new(FakeNetwork::new());
        let logger = logger(&network, quiet_config());

        for _ in 0..100 {
            logger.enqueue(gate_exposure("u"));
        }
        logger.enqueue(gate_exposure("other"));
        logger.flush().await;

        let events = network.logged_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["eventName"], "statsig::gate_exposure");
        assert_eq!(events[0]["user"]["userID"], "u");
    }

    #[tokio::test]
    async fn concurrent_exposures_are_logged_once() {
        let network = Arc::new(FakeNetwork::new());
        let logger = logger(&network, quiet_config());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        logger.enqueue(gate_exposure("u"));
                    }
                });
            }
        });
        logger.flush().await;

        assert_eq!(network.logged_events().len(), 1);
    }

    #[tokio::test]
    async fn reaching_max_queue_length_triggers_flush() {
        let network = Arc::new(FakeNetwork::new());
        let logger = logger(
            &network,
            EventLoggerConfig {
                max_queue_length: 10,
                ..quiet_config()
            },
        );
        logger.start();

        for i in 0..10 {
            logger.enqueue(custom(format!("event_{i}")));
        }
        wait_for_events(&network, 10).await;

        assert_eq!(network.logged_events().len(), 10);
        assert_eq!(logger.pending_events(), 0);
        logger.shutdown().await;
    }

    #[tokio::test]
    async fn timer_flushes_periodically() {
        let network = Arc::new(FakeNetwork::new());
        let logger = logger(
            &network,
            EventLoggerConfig {
                flush_interval: Duration::from_millis(10),
                ..EventLoggerConfig::default()
            },
        );
        logger.start();

        logger.enqueue(custom("a".to_owned()));
        wait_for_events(&network, 1).await;

        assert_eq!(network.logged_events().len(), 1);
        logger.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_the_queue() {
        let network = Arc::new(FakeNetwork::new());
        let logger = logger(&network, quiet_config());
        logger.start();

        for i in 0..5 {
            logger.enqueue(custom(format!("event_{i}")));
        }
        logger.shutdown().await;

        let batches = network.requests("log_event");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0]["events"].as_array().map(Vec::len), Some(5));
        assert_eq!(batches[0]["statsigMetadata"]["sdkType"], "rust-server");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn events_enqueued_during_flushes_are_neither_lost_nor_duplicated() {
        let network = Arc::new(FakeNetwork::new());
        network.set_delay(Duration::from_millis(1));
        let logger = logger(
            &network,
            EventLoggerConfig {
                max_queue_length: 25,
                flush_interval: Duration::from_millis(3),
                ..EventLoggerConfig::default()
            },
        );
        logger.start();

        let producers = (0..4)
            .map(|p| {
                let logger = logger.clone();
                tokio::spawn(async move {
                    for i in 0..250 {
                        logger.enqueue(custom(format!("{p}_{i}")));
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for producer in producers {
            producer.await.unwrap();
        }
        logger.shutdown().await;

        let names = network
            .logged_events()
            .into_iter()
            .map(|event| event["eventName"].as_str().unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 1000);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 1000);
    }

    #[tokio::test]
    async fn failed_batches_are_dropped() {
        let network = Arc::new(FakeNetwork::new());
        network.set_response("log_event", Err(Error::HttpStatus(500)));
        let logger = logger(&network, quiet_config());

        logger.enqueue(custom("a".to_owned()));
        logger.flush().await;
        logger.flush().await;

        assert_eq!(network.requests("log_event").len(), 1);
        assert_eq!(logger.pending_events(), 0);
    }

    #[tokio::test]
    async fn local_mode_discards_events() {
        let network = Arc::new(FakeNetwork::new());
        let logger = logger(
            &network,
            EventLoggerConfig {
                local_mode: true,
                ..quiet_config()
            },
        );

        logger.enqueue(custom("a".to_owned()));
        logger.shutdown().await;

        assert!(network.all_requests().is_empty());
    }
}
