//! Lifecycle supervisor.
//!
//! Owns the event loop that runs whenever the resident application is not in control: it erases
//! and programs OTA images, keeps battery and position fresh in the shared record, drives the
//! robot back to base on request, and turns a start request into a system reset. Whether the
//! loop runs at all is decided at boot from the reset reason.

use crate::channel::{Channel, CompanionRequest, IpcSignals};
use crate::config::SupervisorConfig;
use crate::control::{ReturnToBase, Step};
use crate::error::{Error, Result};
use crate::events::{Event, Events};
use crate::hal::{read_battery, AnalogInput, Flash, Motion, Positioning, StatusLed};
use crate::ota::OtaEngine;
use crate::protocol::{AppStatus, Notification};

/// Everything the loop drives.
pub trait Board: Flash + Positioning + AnalogInput + Motion + StatusLed {}

impl<T: Flash + Positioning + AnalogInput + Motion + StatusLed> Board for T {}

/// Latched reset causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReason(pub u32);

impl ResetReason {
    pub const RESETPIN: u32 = 1 << 0;
    pub const DOG0: u32 = 1 << 1;
    pub const CTRLAP: u32 = 1 << 2;
    pub const SREQ: u32 = 1 << 3;
    pub const LOCKUP: u32 = 1 << 4;
    pub const DOG1: u32 = 1 << 25;

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    /// A software reset with no watchdog timeout latched alongside it hands control to the
    /// resident application. Everything else stays in the supervisor.
    pub fn boot_mode(self) -> BootMode {
        if self.contains(Self::SREQ) && !self.contains(Self::DOG0 | Self::DOG1) {
            BootMode::LaunchApplication
        } else {
            BootMode::Supervise
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum BootMode {
    LaunchApplication,
    Supervise,
}

/// What the caller must do after one loop pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Idle,
    SystemReset,
}

/// Publishes the device type and brings the companion core and its radio up. Runs on every boot
/// before the boot mode is acted on.
pub fn start_companion<S: IpcSignals>(channel: &mut Channel<'_, S>, config: &SupervisorConfig) {
    channel.set_device_type(config.device_type);
    channel.release_companion();
    channel.call(CompanionRequest::RadioInit);
}

pub struct Supervisor<'r, S: IpcSignals, B: Board> {
    channel: Channel<'r, S>,
    board: B,
    ota: OtaEngine,
    control: ReturnToBase,
}

impl<'r, S: IpcSignals, B: Board> Supervisor<'r, S, B> {
    pub fn new(channel: Channel<'r, S>, mut board: B, config: &SupervisorConfig) -> Self {
        channel.set_battery_level(read_battery(&mut board));
        channel.set_status(AppStatus::Ready);
        Self {
            channel,
            board,
            ota: OtaEngine::new(config),
            control: ReturnToBase::new(config.control),
        }
    }

    pub fn channel(&self) -> &Channel<'r, S> {
        &self.channel
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Handles every pending event once.
    pub fn poll(&mut self, events: &Events) -> Action {
        if events.take(Event::OtaStart) {
            if let Err(e) = self.start_ota() {
                warn!("OTA start dropped: {}", e);
            }
        }

        if events.take(Event::OtaChunk) {
            if let Err(e) = self.write_chunk() {
                warn!("OTA chunk dropped: {}", e);
            }
        }

        if events.take(Event::StartApplication) {
            info!("Starting application");
            return Action::SystemReset;
        }

        if events.take(Event::BatteryUpdate) {
            self.board.toggle();
            let level = read_battery(&mut self.board);
            self.channel.set_battery_level(level);
        }

        let fix = self.board.process();
        if events.take(Event::PositionUpdate) && fix {
            self.update_position();
        }

        Action::Idle
    }

    fn start_ota(&mut self) -> Result<()> {
        if self.channel.status() != AppStatus::Programming {
            return Err(Error::InvalidState);
        }
        let ota = self.channel.lock().ota();
        self.ota.start(&ota, &mut self.board)?;
        let ack = Notification::OtaStartAck.encode()?;
        self.channel.transmit(&ack)
    }

    fn write_chunk(&mut self) -> Result<()> {
        if self.channel.status() != AppStatus::Programming {
            return Err(Error::InvalidState);
        }

        let written = {
            let mut guard = self.channel.lock();
            let ota = guard.ota();
            let written = self.ota.write_chunk(&ota, &mut self.board)?;
            guard.update_ota(|ota| ota.last_chunk_acked = written.index as i32);
            written
        };

        let ack = Notification::OtaChunkAck {
            index: written.index,
        }
        .encode()?;
        self.channel.transmit(&ack)?;

        if written.last {
            info!("Image complete");
            self.channel.set_status(AppStatus::Ready);
        }
        Ok(())
    }

    fn update_position(&mut self) {
        let position = self.board.position();
        self.channel.set_current_position(position);

        if self.channel.status() != AppStatus::Resetting {
            return;
        }

        let target = self.channel.target_position();
        if self.control.step(position, target, &mut self.board) == Step::Arrived {
            self.channel.set_status(AppStatus::Ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_clean_software_reset_launches() {
        assert_eq!(
            ResetReason(ResetReason::SREQ).boot_mode(),
            BootMode::LaunchApplication
        );
        assert_eq!(
            ResetReason(ResetReason::SREQ | ResetReason::DOG1).boot_mode(),
            BootMode::Supervise
        );
        assert_eq!(
            ResetReason(ResetReason::SREQ | ResetReason::DOG0).boot_mode(),
            BootMode::Supervise
        );
        assert_eq!(
            ResetReason(ResetReason::RESETPIN).boot_mode(),
            BootMode::Supervise
        );
        assert_eq!(ResetReason(0).boot_mode(), BootMode::Supervise);
    }
}
