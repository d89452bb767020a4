//! The sampling loop.
//!
//! A [`Meter`] moves through `Idle -> Running -> Stopped`. Each tick samples
//! every configured channel in order, converts the sample, folds the power
//! into the channel's energy total and only then hands the reading to the
//! sink, so an export failure can never disturb the totals.

use crate::accumulator::{Accumulator, TickContext};
use crate::adc::{Channel, SampleSource};
use crate::config::Config;
use crate::conversion::Calibration;
use crate::error::{AppError, Result};
use crate::sink::{MetricsSink, Reading};
use crate::store::{EnergyStore, MemoryStore};
use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// How the wait between ticks is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Wait a full period after the tick body finishes. Slow ticks push every
    /// later tick back.
    #[default]
    FixedDelay,
    /// Start ticks a period apart. A tick that overruns is followed
    /// immediately by the next one; missed ticks are not replayed.
    FixedRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MeterSettings {
    pub channels: Vec<Channel>,
    pub calibration: Calibration,
    pub period: Duration,
    pub policy: SchedulePolicy,
}

impl MeterSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            channels: cfg.adc.channels.clone(),
            calibration: cfg.calibration,
            period: cfg.sampling.period(),
            policy: cfg.sampling.policy,
        }
    }
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            channels: vec![Channel(2), Channel(4), Channel(6)],
            calibration: Calibration::default(),
            period: Duration::from_millis(1000),
            policy: SchedulePolicy::FixedDelay,
        }
    }
}

pub struct Meter<Src, Snk, St = MemoryStore> {
    source: Src,
    sink: Snk,
    accumulator: Accumulator<St>,
    settings: MeterSettings,
    state: RunState,
    last_tick: Option<Instant>,
}

impl<Src, Snk, St> Meter<Src, Snk, St>
where
    Src: SampleSource,
    Snk: MetricsSink,
    St: EnergyStore,
{
    pub fn new(
        source: Src,
        sink: Snk,
        accumulator: Accumulator<St>,
        settings: MeterSettings,
    ) -> Self {
        Self {
            source,
            sink,
            accumulator,
            settings,
            state: RunState::Idle,
            last_tick: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn accumulator(&self) -> &Accumulator<St> {
        &self.accumulator
    }

    /// Enter `Running` and take the baseline instant the first tick measures
    /// its interval from. Starting a running meter is a no-op.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            RunState::Idle => {
                self.state = RunState::Running;
                self.last_tick = Some(Instant::now());
                info!(
                    channels = ?self.settings.channels,
                    period_ms = self.settings.period.as_millis() as u64,
                    policy = ?self.settings.policy,
                    "meter running"
                );
                Ok(())
            }
            RunState::Running => Ok(()),
            RunState::Stopped => Err(AppError::State("meter has already stopped".to_string())),
        }
    }

    pub fn stop(&mut self) {
        if self.state != RunState::Stopped {
            self.state = RunState::Stopped;
            info!("meter stopped");
        }
    }

    /// Run one sampling cycle and return the readings it produced.
    ///
    /// A sample-source error aborts the tick; channels already processed keep
    /// their accrued energy. Sink errors are logged and skipped.
    pub async fn tick(&mut self) -> Result<Vec<Reading>> {
        if self.state != RunState::Running {
            return Err(AppError::State(format!(
                "cannot tick while {:?}",
                self.state
            )));
        }

        let now = Instant::now();
        let tick = TickContext {
            previous: self.last_tick.unwrap_or(now),
            current: now,
        };
        self.last_tick = Some(now);
        let ts = Utc::now().trunc_subsecs(0);
        debug!(elapsed_ms = tick.elapsed().as_millis() as u64, "tick");

        let cal = self.settings.calibration;
        let mut readings = Vec::with_capacity(self.settings.channels.len());
        for &channel in &self.settings.channels {
            let raw = self.source.read_raw(channel)?;
            let current_amps = cal.to_current_amps(raw);
            let power_watts = cal.to_power_watts(current_amps);
            let energy_kwh = self.accumulator.accrue(channel, power_watts, &tick)?;

            let reading = Reading {
                channel,
                raw,
                current_amps,
                power_watts,
                energy_kwh,
                ts,
            };
            info!(
                channel = %channel,
                raw = raw.value(),
                current_a = current_amps,
                power_w = power_watts,
                energy_kwh,
                "channel reading"
            );

            if let Err(e) = self.sink.write(&reading).await {
                warn!(
                    channel = %channel,
                    error = %e,
                    reading = ?reading,
                    "failed to export reading; energy total kept"
                );
            }
            readings.push(reading);
        }

        Ok(readings)
    }

    /// Tick until `shutdown` carries `true` (or its sender is dropped).
    ///
    /// The flag is checked before every tick and also cuts the inter-tick
    /// wait short. Returns the sample-source error that stopped the loop, if
    /// any; the meter is `Stopped` either way.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.start()?;

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested");
                break;
            }

            let started = Instant::now();
            if let Err(e) = self.tick().await {
                self.stop();
                return Err(e);
            }

            let deadline = match self.settings.policy {
                SchedulePolicy::FixedDelay => Instant::now() + self.settings.period,
                SchedulePolicy::FixedRate => {
                    let target = started + self.settings.period;
                    let now = Instant::now();
                    if target < now {
                        debug!(
                            overrun_ms = (now - target).as_millis() as u64,
                            "tick overran its period"
                        );
                    }
                    target.max(now)
                }
            };

            if wait_for_tick(deadline, &mut shutdown).await {
                info!("shutdown requested");
                break;
            }
        }

        self.stop();
        Ok(())
    }
}

/// Sleep until `deadline`. Returns true when shutdown was signalled first.
async fn wait_for_tick(deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    return true;
                }
            }
            _ = sleep_until(deadline) => return false,
        }
    }
}
