//! Compile-time configuration: memory map, timings and board selection.
//!
//! Nothing here can change at runtime. Board specific values are picked with the `board-*` Cargo
//! features; without one the device reports an unknown board type.

use core::ops::{Range, RangeInclusive};

use crate::protocol::DeviceType;

pub const FLASH_SIZE: usize = 1024 * 1024;
pub const SPU_FLASH_REGION_SIZE: usize = 16 * 1024;

pub const RAM_SIZE: usize = 512 * 1024;
pub const SPU_RAM_REGION_SIZE: usize = 8 * 1024;

pub const RAM_BASE: u32 = 0x2000_0000;

/// Flash regions `0..SECURE_FLASH_REGIONS` hold the supervisor.
pub const SECURE_FLASH_REGIONS: usize = 4;
/// RAM regions `0..SECURE_RAM_REGIONS` hold the supervisor's stack and data.
pub const SECURE_RAM_REGIONS: usize = 3;
/// RAM region shared with the companion core, which runs non-secure.
pub const SHARED_RAM_REGION: usize = 3;
/// RAM regions handed to the resident application, starting right after the shared region.
pub const NON_SECURE_RAM_REGIONS: usize = 48;

/// Flash region carrying the secure gateway veneers.
pub const NSC_FLASH_REGION: u8 = 3;
/// Encoded NSC subregion size (4 KiB at the top of the region).
pub const NSC_SIZE_CODE: u8 = 8;

/// Resident application image, vector table first.
pub const NON_SECURE_IMAGE_BASE: u32 = (SECURE_FLASH_REGIONS * SPU_FLASH_REGION_SIZE) as u32;

pub const FLASH_PAGE_SIZE: u32 = 4096;

/// Stride between two OTA chunks in flash, and capacity of the shared chunk buffer.
pub const OTA_CHUNK_SIZE: usize = 128;

/// Address ranges the non-secure side may never hand to the gateway.
pub const SECURE_RANGES: [RangeInclusive<u32>; 5] = [
    // supervisor flash
    0x0000_0000..=NON_SECURE_IMAGE_BASE - 1,
    // FICR, UICR
    0x00FF_0000..=0x00FF_FFFF,
    // supervisor RAM and the shared record
    RAM_BASE..=RAM_BASE + ((SHARED_RAM_REGION + 1) * SPU_RAM_REGION_SIZE) as u32 - 1,
    // secure peripheral space: SPU, NVMC, IPC, MUTEX...
    0x5000_0000..=0x5FFF_FFFF,
    // private peripheral bus and the system control space
    0xE000_0000..=0xFFFF_FFFF,
];

/// RAM handed to the resident application. Its linker script must stay inside this range.
pub const NON_SECURE_RAM: Range<u32> = {
    let start = RAM_BASE + ((SHARED_RAM_REGION + 1) * SPU_RAM_REGION_SIZE) as u32;
    start..start + (NON_SECURE_RAM_REGIONS * SPU_RAM_REGION_SIZE) as u32
};

const _: () = assert!(
    (SHARED_RAM_REGION + 1 + NON_SECURE_RAM_REGIONS) * SPU_RAM_REGION_SIZE <= RAM_SIZE
);

/// 1 s at the 32.768 kHz watchdog clock.
pub const WATCHDOG_RELOAD_TICKS: u32 = 32768 - 1;

pub const POSITION_UPDATE_PERIOD_MS: u32 = 500;
pub const BATTERY_UPDATE_PERIOD_MS: u32 = 1000;

pub const BATTERY_FULL_SCALE_MV: u32 = 3600;
pub const BATTERY_MAX_MV: u16 = 3000;

/// A GPIO pin, port and number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct Pin {
    pub port: u8,
    pub pin: u8,
}

impl Pin {
    pub const fn new(port: u8, pin: u8) -> Self {
        Self { port, pin }
    }
}

#[cfg(feature = "board-dotbot-v3")]
mod board {
    use super::Pin;
    use crate::protocol::DeviceType;

    pub const DEVICE_TYPE: DeviceType = DeviceType::DotBotV3;
    pub const SECURE_PINS: &[Pin] = &[
        // positioning sensor data/envelope
        Pin::new(0, 29),
        Pin::new(0, 30),
        Pin::new(1, 4),
        Pin::new(1, 7),
        // battery sense on AIN1
        Pin::new(0, 5),
    ];
    pub const STATUS_LED: Pin = Pin::new(1, 5);
    pub const MOTOR_PINS: [Pin; 4] = [Pin::new(1, 2), Pin::new(1, 3), Pin::new(1, 10), Pin::new(1, 11)];
}

#[cfg(all(feature = "board-dotbot-v2", not(feature = "board-dotbot-v3")))]
mod board {
    use super::Pin;
    use crate::protocol::DeviceType;

    pub const DEVICE_TYPE: DeviceType = DeviceType::DotBotV2;
    pub const SECURE_PINS: &[Pin] = &[Pin::new(0, 29), Pin::new(0, 30), Pin::new(1, 4), Pin::new(1, 6)];
    pub const STATUS_LED: Pin = Pin::new(1, 5);
    pub const MOTOR_PINS: [Pin; 4] = [Pin::new(0, 2), Pin::new(0, 3), Pin::new(0, 4), Pin::new(0, 5)];
}

#[cfg(all(
    feature = "board-nrf5340dk",
    not(any(feature = "board-dotbot-v3", feature = "board-dotbot-v2"))
))]
mod board {
    use super::Pin;
    use crate::protocol::DeviceType;

    pub const DEVICE_TYPE: DeviceType = DeviceType::Nrf5340Dk;
    pub const SECURE_PINS: &[Pin] = &[Pin::new(0, 29), Pin::new(0, 30), Pin::new(1, 4), Pin::new(1, 6)];
    pub const STATUS_LED: Pin = Pin::new(1, 5);
    pub const MOTOR_PINS: [Pin; 4] = [Pin::new(0, 2), Pin::new(0, 3), Pin::new(0, 4), Pin::new(0, 5)];
}

#[cfg(not(any(
    feature = "board-dotbot-v3",
    feature = "board-dotbot-v2",
    feature = "board-nrf5340dk"
)))]
mod board {
    use super::Pin;
    use crate::protocol::DeviceType;

    pub const DEVICE_TYPE: DeviceType = DeviceType::Unknown;
    pub const SECURE_PINS: &[Pin] = &[Pin::new(0, 29), Pin::new(0, 30), Pin::new(1, 4), Pin::new(1, 6)];
    pub const STATUS_LED: Pin = Pin::new(1, 5);
    pub const MOTOR_PINS: [Pin; 4] = [Pin::new(0, 2), Pin::new(0, 3), Pin::new(0, 4), Pin::new(0, 5)];
}

/// Left forward, left backward, right forward, right backward.
pub use board::MOTOR_PINS;
pub use board::{DEVICE_TYPE, SECURE_PINS, STATUS_LED};

/// Tuning of the autonomous return-to-base loop. Distances are in metres, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlConfig {
    /// Target counts as reached below this distance
    pub distance_threshold: f32,
    /// Minimum displacement needed to derive a heading
    pub direction_threshold: f32,
    /// Speed is reduced below this distance to target
    pub slow_down_distance: f32,
    pub rotate_speed: i8,
    pub straight_speed: i8,
    pub max_speed: i16,
    pub reduce_speed_factor: f32,
    /// Heading errors beyond this also reduce speed
    pub reduce_speed_angle: i16,
    pub angular_speed_factor: f32,
    pub angular_side_factor: f32,
}

impl ControlConfig {
    pub const DEFAULT: Self = Self {
        distance_threshold: 0.05,
        direction_threshold: 0.01,
        slow_down_distance: 0.2,
        rotate_speed: 45,
        straight_speed: 45,
        max_speed: 50,
        reduce_speed_factor: 0.8,
        reduce_speed_angle: 25,
        angular_speed_factor: 35.0,
        angular_side_factor: -1.0,
    };
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything the event loop needs to know about the device it runs on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorConfig {
    pub device_type: DeviceType,
    pub image_base: u32,
    pub flash_page_size: u32,
    pub chunk_stride: u32,
    pub position_period_ms: u32,
    pub battery_period_ms: u32,
    pub control: ControlConfig,
}

impl SupervisorConfig {
    pub const DEFAULT: Self = Self {
        device_type: DEVICE_TYPE,
        image_base: NON_SECURE_IMAGE_BASE,
        flash_page_size: FLASH_PAGE_SIZE,
        chunk_stride: OTA_CHUNK_SIZE as u32,
        position_period_ms: POSITION_UPDATE_PERIOD_MS,
        battery_period_ms: BATTERY_UPDATE_PERIOD_MS,
        control: ControlConfig::DEFAULT,
    };
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
