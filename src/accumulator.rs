use crate::adc::Channel;
use crate::conversion::energy_delta_kwh;
use crate::error::Result;
use crate::store::{EnergyStore, MemoryStore};
use std::time::Duration;
use tokio::time::Instant;

/// Instants bracketing one sampling cycle. Every channel sampled in the
/// cycle accrues energy over the same interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    pub previous: Instant,
    pub current: Instant,
}

impl TickContext {
    pub fn elapsed(&self) -> Duration {
        self.current.saturating_duration_since(self.previous)
    }
}

/// Owns the per-channel energy totals and integrates power into them.
pub struct Accumulator<S = MemoryStore> {
    store: S,
}

impl<S: EnergyStore> Accumulator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Add the energy drawn at `power_watts` over the tick to `channel`'s total
    /// and return the new total. Negative or non-finite power accrues nothing,
    /// so totals never decrease.
    pub fn accrue(
        &mut self,
        channel: Channel,
        power_watts: f64,
        tick: &TickContext,
    ) -> Result<f64> {
        let delta = if power_watts.is_finite() && power_watts > 0.0 {
            energy_delta_kwh(power_watts, tick.elapsed())
        } else {
            0.0
        };
        let total = self.store.get(channel) + delta;
        self.store.update(channel, total)?;
        Ok(total)
    }

    pub fn total_kwh(&self, channel: Channel) -> f64 {
        self.store.get(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_of(secs: u64) -> TickContext {
        let previous = Instant::now();
        TickContext {
            previous,
            current: previous + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_elapsed_never_negative() {
        let now = Instant::now();
        let tick = TickContext {
            previous: now + Duration::from_secs(5),
            current: now,
        };
        assert_eq!(tick.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_accrue_one_hour_at_full_scale() {
        let mut acc = Accumulator::new(MemoryStore::new());
        let total = acc.accrue(Channel(2), 1518.0, &tick_of(3600)).unwrap();
        assert!((total - 1.518).abs() < 1e-9);
        assert_eq!(acc.total_kwh(Channel(4)), 0.0);
    }

    #[test]
    fn test_split_intervals_match_single_interval() {
        let mut split = Accumulator::new(MemoryStore::new());
        for secs in [10, 20, 30, 3540] {
            split.accrue(Channel(4), 500.0, &tick_of(secs)).unwrap();
        }

        let mut whole = Accumulator::new(MemoryStore::new());
        whole.accrue(Channel(4), 500.0, &tick_of(3600)).unwrap();

        assert!((split.total_kwh(Channel(4)) - whole.total_kwh(Channel(4))).abs() < 1e-12);
        assert!((whole.total_kwh(Channel(4)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_negative_or_nan_power_does_not_decrease_total() {
        let mut acc = Accumulator::new(MemoryStore::new());
        acc.accrue(Channel(6), 1000.0, &tick_of(36)).unwrap();
        let before = acc.total_kwh(Channel(6));

        acc.accrue(Channel(6), -250.0, &tick_of(36)).unwrap();
        acc.accrue(Channel(6), f64::NAN, &tick_of(36)).unwrap();

        assert_eq!(acc.total_kwh(Channel(6)), before);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut acc = Accumulator::new(MemoryStore::new());
        let tick = tick_of(3600);
        acc.accrue(Channel(2), 1000.0, &tick).unwrap();
        acc.accrue(Channel(4), 2000.0, &tick).unwrap();

        assert!((acc.total_kwh(Channel(2)) - 1.0).abs() < 1e-12);
        assert!((acc.total_kwh(Channel(4)) - 2.0).abs() < 1e-12);
    }
}
