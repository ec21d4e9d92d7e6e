//! Exposure and custom events and their delivery to `log_event`.
mod batch_event_processor;
mod dedupe;
mod event;
mod logger;

pub use event::{
    EventValue, StatsigEvent, CONFIG_EXPOSURE_EVENT, GATE_EXPOSURE_EVENT, LAYER_EXPOSURE_EVENT,
};
pub use logger::{EventLogger, EventLoggerConfig};
