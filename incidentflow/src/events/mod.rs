//! Progress event delivery.
//!
//! [`ProgressBus`] keeps an ordered log per job and fans each event out to
//! attached [`Observer`]s. Sinks mirror every published event for logging
//! or test collection.

mod backpressure;
mod bus;
mod observer;
mod sink;

pub use backpressure::DeliveryMetrics;
pub use bus::{BusConfig, ProgressBus};
pub use observer::Observer;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
