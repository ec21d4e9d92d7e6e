use std::sync::Mutex;

use super::StatsigEvent;

/// Pending events. Producers append concurrently; a flush swaps the whole buffer out, so events
/// enqueued during an in-flight flush land in the next batch.
#[derive(Debug, Default)]
pub(crate) struct BatchEventProcessor {
    event_queue: Mutex<Vec<StatsigEvent>>,
}

impl BatchEventProcessor {
    pub(crate) fn new() -> Self {
        BatchEventProcessor::default()
    }

    /// Append `event` and return the queue length after the push.
    pub(crate) fn push(&self, event: StatsigEvent) -> usize {
        let mut queue = self.lock();
        queue.push(event);
        queue.len()
    }

    /// Take every pending event, leaving an empty queue.
    pub(crate) fn take_all(&self) -> Vec<StatsigEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StatsigEvent>> {
        self.event_queue
            .lock()
            .expect("thread holding event queue lock should not panic")
    }
}
