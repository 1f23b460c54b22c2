//! Hardware seams of the supervisor.
//!
//! The event loop, the gateway and the OTA engine only see these traits. The `nrf53` module
//! implements them for the application core; tests implement them with plain structs.

use crate::config::{BATTERY_FULL_SCALE_MV, BATTERY_MAX_MV};
use crate::error::{Error, Result};
use crate::protocol::Position2d;

/// Non-volatile memory controller.
pub trait Flash {
    /// Erases the page starting at `address`. Blocks until the controller is ready again.
    fn erase_page(&mut self, address: u32);

    /// Programs whole words starting at the word-aligned `address`.
    fn write_words(&mut self, address: u32, words: &[u32]);
}

/// Positioning sensor pipeline (two lighthouse basestations).
pub trait Positioning {
    /// Crunches pending raw samples. Returns true once both basestations have a processed fix.
    fn process(&mut self) -> bool;

    /// Position computed from the current fix, or the origin when there is none.
    fn position(&mut self) -> Position2d;

    /// Services the sensor's SPI transfer-end interrupt.
    fn handle_interrupt(&mut self);
}

/// Successive-approximation ADC.
pub trait AnalogInput {
    /// One 12-bit sample.
    fn read(&mut self, channel: AnalogChannel) -> u16;
}

/// Differential drive.
pub trait Motion {
    fn set_speed(&mut self, left: i16, right: i16);

    /// Rotates in place by `angle` degrees. Blocks until done.
    fn rotate(&mut self, angle: u16, speed: i8);

    /// Drives `distance` millimetres straight ahead. Blocks until done.
    fn straight(&mut self, distance: u16, speed: i8);
}

pub trait StatusLed {
    fn toggle(&mut self);
}

/// Factory-programmed 64-bit identifier.
pub trait DeviceId {
    fn device_id(&self) -> u64;
}

/// Analog inputs reachable from the non-secure side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum AnalogChannel {
    Ain(u8),
    Vdd,
    Vddh,
}

impl AnalogChannel {
    pub const VDD: u8 = 8;
    pub const VDDH: u8 = 9;

    /// Maps the raw channel number used at the gateway: 0..=7 are AIN0..AIN7, 8 is VDD and 9 is
    /// VDDH. Anything else is refused.
    pub fn from_raw(channel: u8) -> Result<Self> {
        match channel {
            0..=7 => Ok(Self::Ain(channel)),
            Self::VDD => Ok(Self::Vdd),
            Self::VDDH => Ok(Self::Vddh),
            _ => Err(Error::InvalidAnalogChannel),
        }
    }
}

/// Battery sense input for the selected board.
#[cfg(feature = "board-dotbot-v3")]
pub const BATTERY_CHANNEL: AnalogChannel = AnalogChannel::Ain(1);
#[cfg(not(feature = "board-dotbot-v3"))]
pub const BATTERY_CHANNEL: AnalogChannel = AnalogChannel::Vdd;

/// Converts a 12-bit sample to millivolts, saturating at the battery's nominal maximum.
pub fn battery_millivolts(raw: u16) -> u16 {
    let millivolts = u32::from(raw.min(4095)) * BATTERY_FULL_SCALE_MV / 4095;
    (millivolts as u16).min(BATTERY_MAX_MV)
}

pub fn read_battery<A: AnalogInput>(adc: &mut A) -> u16 {
    battery_millivolts(adc.read(BATTERY_CHANNEL))
}
