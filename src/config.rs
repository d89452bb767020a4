use crate::adc::{Channel, MCP3008_CHANNELS};
use crate::conversion::Calibration;
use crate::error::{AppError, Result};
use crate::scheduler::SchedulePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub adc: AdcConfig,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub sampling: SamplingConfig,
    pub influx: InfluxConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdcConfig {
    /// spidev character device the MCP3008 hangs off
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_speed_hz")]
    pub speed_hz: u32,
    /// Monitored single-ended inputs (0..=7)
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
}

fn default_device() -> String {
    "/dev/spidev0.0".into()
}

fn default_speed_hz() -> u32 {
    1_000_000
}

fn default_channels() -> Vec<Channel> {
    vec![Channel(2), Channel(4), Channel(6)]
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            speed_hz: default_speed_hz(),
            channels: default_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// "fixed_delay" | "fixed_rate"
    #[serde(default)]
    pub policy: SchedulePolicy,
}

fn default_period_ms() -> u64 {
    1000
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            policy: SchedulePolicy::default(),
        }
    }
}

impl SamplingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL, e.g. "http://192.168.0.112:8086"
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts after the first failed write; 0 disables retrying
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_measurement() -> String {
    "adc_data".into()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// JSON file holding cumulative energy per channel. Totals live in memory
    /// only (and restart at zero) when unset.
    pub path: Option<String>,
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards INFLUX_URL / INFLUX_TOKEN env vars override the file values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("INFLUX_URL") {
            cfg.influx.url = url;
        }
        if let Ok(token) = std::env::var("INFLUX_TOKEN") {
            cfg.influx.token = token;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.adc.channels.is_empty() {
            return Err(AppError::Config(
                "at least one ADC channel must be configured".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for ch in &self.adc.channels {
            if ch.0 >= MCP3008_CHANNELS {
                return Err(AppError::Config(format!(
                    "ADC channel {} out of range (0..={})",
                    ch,
                    MCP3008_CHANNELS - 1
                )));
            }
            if !seen.insert(*ch) {
                return Err(AppError::Config(format!("duplicate ADC channel {}", ch)));
            }
        }

        self.calibration.validate()?;

        if self.sampling.period_ms == 0 {
            return Err(AppError::Config(
                "sampling period_ms cannot be 0".to_string(),
            ));
        }

        if self.influx.url.is_empty() {
            return Err(AppError::Config("InfluxDB url cannot be empty".to_string()));
        }
        if self.influx.bucket.is_empty() || self.influx.org.is_empty() {
            return Err(AppError::Config(
                "InfluxDB org and bucket must be set".to_string(),
            ));
        }
        if self.influx.measurement.is_empty() {
            return Err(AppError::Config(
                "InfluxDB measurement cannot be empty".to_string(),
            ));
        }
        if self.influx.timeout_ms == 0 {
            return Err(AppError::Config(
                "InfluxDB timeout_ms cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let end = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, end).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{}'", end))
        })?;
        let val = std::env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {}", var)))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Consumes the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expand_both_placeholder_styles() {
        std::env::set_var("METER_TEST_A", "alpha");
        std::env::set_var("METER_TEST_B", "beta");

        let output = expand_env_placeholders("a: $(METER_TEST_A)\nb: ${METER_TEST_B}").unwrap();
        assert_eq!(output, "a: alpha\nb: beta");

        std::env::remove_var("METER_TEST_A");
        std::env::remove_var("METER_TEST_B");
    }

    #[test]
    fn test_expand_escaped_and_bare_dollar() {
        let output = expand_env_placeholders("price: $$5 and $ alone").unwrap();
        assert_eq!(output, "price: $5 and $ alone");
    }

    #[test]
    #[serial]
    fn test_expand_missing_variable_fails() {
        std::env::remove_var("METER_TEST_MISSING");
        let err = expand_env_placeholders("token: $(METER_TEST_MISSING)").unwrap_err();
        assert!(err.to_string().contains("METER_TEST_MISSING"));
    }

    #[test]
    fn test_expand_unterminated_placeholder_fails() {
        assert!(expand_env_placeholders("token: ${OOPS").is_err());
    }

    fn base_config() -> Config {
        serde_yaml::from_str(
            r#"
influx:
  url: "http://localhost:8086"
  org: "BITS"
  bucket: "SMARTENERGY"
  token: "t"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_match_reference_hardware() {
        let cfg = base_config();
        assert_eq!(cfg.adc.channels, vec![Channel(2), Channel(4), Channel(6)]);
        assert_eq!(cfg.adc.device, "/dev/spidev0.0");
        assert_eq!(cfg.sampling.period(), Duration::from_millis(1000));
        assert_eq!(cfg.sampling.policy, SchedulePolicy::FixedDelay);
        assert_eq!(cfg.calibration, Calibration::default());
        assert_eq!(cfg.influx.measurement, "adc_data");
        assert_eq!(cfg.influx.max_retries, 0);
        assert!(cfg.state.path.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_channels() {
        let mut cfg = base_config();
        cfg.adc.channels = vec![Channel(8)];
        assert!(cfg.validate().is_err());

        cfg.adc.channels = vec![Channel(2), Channel(2)];
        assert!(cfg.validate().is_err());

        cfg.adc.channels = vec![];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let mut cfg = base_config();
        cfg.sampling.period_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
