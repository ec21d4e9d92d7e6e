//! Background sync tasks that periodically refresh the spec store.
use std::{future::Future, time::Duration};

use rand::{thread_rng, Rng};
use tokio::{sync::watch, task::JoinHandle};

/// Configuration for one background sync task.
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between sync cycles. Zero disables the task.
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between sync cycles. This helps to avoid
    /// multiple server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::ZERO;

    /// Create a new `PollerConfig` using default configuration.
    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(10),
            jitter: PollerConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A set of background tasks sharing one stop signal.
pub(crate) struct BackgroundSync {
    stop_sender: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl BackgroundSync {
    pub(crate) fn new() -> BackgroundSync {
        let (stop_sender, _) = watch::channel(false);
        BackgroundSync {
            stop_sender,
            join_handles: Vec::new(),
        }
    }

    /// Run `tick` every `config.interval` until stopped or until `tick` returns `false`.
    pub(crate) fn spawn<F, Fut>(&mut self, name: &'static str, config: PollerConfig, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if config.interval.is_zero() {
            log::debug!(target: "statsig", task = name; "sync interval is zero, not starting task");
            return;
        }

        let mut stop_receiver = self.stop_sender.subscribe();
        let join_handle = tokio::spawn(async move {
            loop {
                let timeout = jitter(config.interval, config.jitter);
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    // Either a stop command or the sender was dropped.
                    _ = stop_receiver.changed() => {
                        log::debug!(target: "statsig", task = name; "sync task received stop command");
                        return;
                    }
                }

                tokio::select! {
                    keep_running = tick() => {
                        if !keep_running {
                            return;
                        }
                    }
                    _ = stop_receiver.changed() => {
                        log::debug!(target: "statsig", task = name; "sync task stopped mid-cycle");
                        return;
                    }
                }
            }
        });
        self.join_handles.push(join_handle);
    }

    /// Signal every task to stop and wait for them to exit.
    pub(crate) async fn shutdown(self) {
        // Error means all receivers are gone (tasks exited already).
        let _ = self.stop_sender.send(true);
        for join_handle in self.join_handles {
            if let Err(err) = join_handle.await {
                log::warn!(target: "statsig", "sync task panicked: {err}");
            }
        }
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{jitter, BackgroundSync, PollerConfig};

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);

        let result = jitter(interval, Duration::from_secs(30));

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        assert_eq!(jitter(Duration::ZERO, Duration::from_secs(30)), Duration::ZERO);
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let interval = Duration::from_secs(30);

        assert_eq!(jitter(interval, Duration::ZERO), interval);
    }

    fn counting(ticks: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<bool> + Send {
        let ticks = ticks.clone();
        move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            std::future::ready(true)
        }
    }

    #[tokio::test]
    async fn tasks_tick_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let disabled_ticks = Arc::new(AtomicUsize::new(0));
        let mut sync = BackgroundSync::new();
        sync.spawn(
            "test",
            PollerConfig::new().with_interval(Duration::from_millis(5)),
            counting(&ticks),
        );
        sync.spawn(
            "disabled",
            PollerConfig::new().with_interval(Duration::ZERO),
            counting(&disabled_ticks),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        sync.shutdown().await;

        let after_shutdown = ticks.load(Ordering::SeqCst);
        assert!(after_shutdown > 0);
        assert_eq!(disabled_ticks.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
    }
}
