//! Analog front end: the channel/sample types, the `SampleSource` seam the
//! scheduler reads through, and an MCP3008 driver over `embedded-hal` SPI.

use crate::error::{AppError, Result};
use embedded_hal::spi::SpiDevice;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::SpidevDevice;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of single-ended inputs on an MCP3008.
pub const MCP3008_CHANNELS: u8 = 8;

/// Largest value a 10-bit conversion can produce.
pub const RAW_MAX: u16 = 1023;

/// ADC input naming one monitored circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub u8);

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 10-bit conversion result in `0..=1023`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RawSample(u16);

impl RawSample {
    pub fn new(value: u16) -> Result<Self> {
        if value > RAW_MAX {
            return Err(AppError::Adc(format!(
                "raw sample {} exceeds 10-bit range (max {})",
                value, RAW_MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RawSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads one raw conversion from a channel. Implementations perform a single
/// bounded bus transaction; an error here is treated as fatal by the meter.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSource: Send {
    fn read_raw(&mut self, channel: Channel) -> Result<RawSample>;
}

/// MCP3008 8-channel 10-bit ADC driven through any `embedded-hal` SPI device.
pub struct Mcp3008<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> Mcp3008<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }
}

/// Command frame for a single-ended conversion: start bit, then SGL/DIFF=1 and
/// the channel number in the high nibble of the second byte.
fn command_frame(channel: Channel) -> [u8; 3] {
    [0x01, (0x08 | channel.0) << 4, 0x00]
}

/// The result's top two bits trail the null bit in byte 1; byte 2 holds the rest.
fn decode_frame(frame: &[u8; 3]) -> RawSample {
    RawSample((((frame[1] & 0x03) as u16) << 8) | frame[2] as u16)
}

impl<SPI> SampleSource for Mcp3008<SPI>
where
    SPI: SpiDevice + Send,
{
    fn read_raw(&mut self, channel: Channel) -> Result<RawSample> {
        if channel.0 >= MCP3008_CHANNELS {
            return Err(AppError::Adc(format!(
                "channel {} does not exist on MCP3008",
                channel
            )));
        }
        let mut frame = command_frame(channel);
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(|e| AppError::Adc(format!("SPI transfer on channel {}: {:?}", channel, e)))?;
        Ok(decode_frame(&frame))
    }
}

/// Open and configure a Linux spidev node (mode 0, 8 bits per word).
pub fn open_spidev(device: &str, speed_hz: u32) -> Result<SpidevDevice> {
    let mut spi = SpidevDevice::open(device)
        .map_err(|e| AppError::Adc(format!("failed to open {}: {:?}", device, e)))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(speed_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.0
        .configure(&options)
        .map_err(|e| AppError::Adc(format!("failed to configure {}: {}", device, e)))?;
    Ok(spi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::spi::{ErrorType, Operation};
    use std::convert::Infallible;

    /// Answers every transfer with a fixed conversion result and records the
    /// command bytes it was sent.
    struct FakeSpi {
        reply: u16,
        sent: Vec<[u8; 3]>,
    }

    impl ErrorType for FakeSpi {
        type Error = Infallible;
    }

    impl SpiDevice for FakeSpi {
        fn transaction(
            &mut self,
            operations: &mut [Operation<'_, u8>],
        ) -> std::result::Result<(), Infallible> {
            for op in operations.iter_mut() {
                if let Operation::TransferInPlace(buf) = op {
                    self.sent.push([buf[0], buf[1], buf[2]]);
                    buf[0] = 0xff;
                    // Junk in the undefined upper bits must be masked off.
                    buf[1] = 0xf8 | ((self.reply >> 8) as u8 & 0x03);
                    buf[2] = (self.reply & 0xff) as u8;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_raw_sample_range() {
        assert_eq!(RawSample::new(0).unwrap().value(), 0);
        assert_eq!(RawSample::new(1023).unwrap().value(), 1023);
        assert!(RawSample::new(1024).is_err());
    }

    #[test]
    fn test_command_frame_encodes_single_ended_channel() {
        assert_eq!(command_frame(Channel(0)), [0x01, 0x80, 0x00]);
        assert_eq!(command_frame(Channel(2)), [0x01, 0xa0, 0x00]);
        assert_eq!(command_frame(Channel(7)), [0x01, 0xf0, 0x00]);
    }

    #[test]
    fn test_read_raw_decodes_response() {
        let mut adc = Mcp3008::new(FakeSpi {
            reply: 0x2a5,
            sent: Vec::new(),
        });
        let raw = adc.read_raw(Channel(4)).unwrap();
        assert_eq!(raw.value(), 0x2a5);
        assert_eq!(adc.spi.sent, vec![[0x01, 0xc0, 0x00]]);
    }

    #[test]
    fn test_read_raw_full_scale() {
        let mut adc = Mcp3008::new(FakeSpi {
            reply: 1023,
            sent: Vec::new(),
        });
        assert_eq!(adc.read_raw(Channel(6)).unwrap().value(), 1023);
    }

    #[test]
    fn test_read_raw_rejects_missing_channel() {
        let mut adc = Mcp3008::new(FakeSpi {
            reply: 0,
            sent: Vec::new(),
        });
        assert!(adc.read_raw(Channel(8)).is_err());
        assert!(adc.spi.sent.is_empty());
    }
}
