use crate::adc::{Channel, RawSample};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One channel's measurement for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub channel: Channel,
    pub raw: RawSample,
    pub current_amps: f64,
    pub power_watts: f64,
    pub energy_kwh: f64,
    /// Wall-clock time of the tick, whole seconds
    pub ts: DateTime<Utc>,
}

impl Reading {
    /// Encode as one InfluxDB line-protocol line with a seconds timestamp.
    pub fn to_line_protocol(&self, measurement: &str) -> String {
        format!(
            "{},channel={} raw_value={},scaled_value={:.6},power_W={:.6},energy_kWh={:.6} {}",
            escape_measurement(measurement),
            self.channel,
            self.raw,
            self.current_amps,
            self.power_watts,
            self.energy_kwh,
            self.ts.timestamp()
        )
    }
}

/// Commas and spaces delimit line-protocol sections, so they are escaped in
/// the measurement name.
fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

/// Destination for readings. A failed write is reported to the caller and
/// never affects accumulated energy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, reading: &Reading) -> Result<()>;
}
