pub mod accumulator;
pub mod adc;
pub mod config;
pub mod conversion;
pub mod error;
pub mod influx;
pub mod scheduler;
pub mod sink;
pub mod store;

// Re-export commonly used items
pub use accumulator::{Accumulator, TickContext};
pub use adc::{Channel, RawSample, SampleSource};
pub use config::Config;
pub use conversion::Calibration;
pub use error::{AppError, Result};
pub use influx::InfluxSink;
pub use scheduler::{Meter, MeterSettings, RunState, SchedulePolicy};
pub use sink::{MetricsSink, Reading};
pub use store::{EnergyStore, FileStore, MemoryStore};
