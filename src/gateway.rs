//! Services the resident application may request from the secure world.
//!
//! Every method here is reached from a non-secure callable entry with arguments the application
//! chose. Each one either validates fully before touching secure state or refuses with an error,
//! which the entry shim discards.

use core::ops::RangeInclusive;

use crate::channel::{Channel, CompanionRequest, IpcLine, IpcSignals, LOG_CAPACITY};
use crate::config::SECURE_RANGES;
use crate::error::{Error, Result};
use crate::hal::{read_battery, AnalogChannel, AnalogInput, DeviceId, Positioning};
use crate::protocol::{frame_data, Position2d, MAX_PDU_LEN};
use crate::watchdog::{Watchdog, WatchdogTimer};

/// Refuses `[address, address + length)` when it overlaps one of `secure` or wraps around the
/// address space. An empty span is checked as the single byte at `address`.
pub fn check_non_secure(address: usize, length: usize, secure: &[RangeInclusive<u32>]) -> Result<()> {
    let last = address
        .checked_add(length.saturating_sub(1))
        .ok_or(Error::SecureAddress)?;

    let overlaps = secure.iter().any(|range| {
        (address as u64) <= u64::from(*range.end()) && (last as u64) >= u64::from(*range.start())
    });
    if overlaps {
        return Err(Error::SecureAddress);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Runs the TT instruction over the span, as the non-secure side would see it. The SPU acts as
/// the IDAU, so this reflects the live partitioning rather than a table.
#[cfg(target_os = "none")]
fn test_target(address: usize, length: usize, access: Access) -> Result<()> {
    use cortex_m::cmse::{AccessType, TestTarget};

    let target = TestTarget::check_range(address as *mut u32, length.max(1), AccessType::NonSecure)
        .ok_or(Error::SecureAddress)?;
    let allowed = match access {
        Access::Read => target.ns_readable(),
        Access::Write => target.ns_read_and_writable(),
    };
    if !allowed {
        return Err(Error::SecureAddress);
    }
    Ok(())
}

#[cfg(not(target_os = "none"))]
fn test_target(_address: usize, _length: usize, _access: Access) -> Result<()> {
    Ok(())
}

fn check_caller_span(address: usize, length: usize, access: Access) -> Result<()> {
    check_non_secure(address, length, &SECURE_RANGES)?;
    test_target(address, length, access)
}

/// Borrows caller memory once it is known to be readable by the non-secure side.
///
/// # Safety
///
/// `data` must be valid for reads of `length` bytes for `'a`.
pub unsafe fn non_secure_slice<'a>(data: *const u8, length: usize) -> Result<&'a [u8]> {
    check_caller_span(data as usize, length, Access::Read)?;
    if length == 0 {
        return Ok(&[]);
    }
    Ok(unsafe { core::slice::from_raw_parts(data, length) })
}

/// Stores `value` through a caller pointer once it is known to be writable by the non-secure
/// side.
///
/// # Safety
///
/// `out` must be valid for writes of a `T`.
pub unsafe fn write_non_secure<T>(out: *mut T, value: T) -> Result<()> {
    check_caller_span(out as usize, core::mem::size_of::<T>(), Access::Write)?;
    unsafe { out.write_unaligned(value) };
    Ok(())
}

pub struct Gateway<'r, S: IpcSignals, H, W: WatchdogTimer> {
    channel: Channel<'r, S>,
    hw: H,
    watchdog: Watchdog<W>,
}

impl<'r, S, H, W> Gateway<'r, S, H, W>
where
    S: IpcSignals,
    H: Positioning + AnalogInput + DeviceId,
    W: WatchdogTimer,
{
    /// Takes over a started application watchdog.
    pub fn new(channel: Channel<'r, S>, hw: H, watchdog: Watchdog<W>) -> Self {
        Self {
            channel,
            hw,
            watchdog,
        }
    }

    /// Feeds the application watchdog and refreshes the battery level, plus the cached
    /// position when both basestations have a fix.
    pub fn keep_alive(&mut self) {
        self.watchdog.feed();
        self.channel.set_battery_level(read_battery(&mut self.hw));
        if self.hw.process() {
            let position = self.hw.position();
            self.channel.set_current_position(position);
        }
    }

    /// Transmits `packet` framed as application data.
    pub fn send_data(&mut self, packet: &[u8]) -> Result<()> {
        let frame = frame_data(packet)?;
        self.channel.transmit(&frame)
    }

    /// Transmits `packet` without framing.
    pub fn send_raw(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > MAX_PDU_LEN {
            return Err(Error::PacketTooLong);
        }
        self.channel.transmit(packet)
    }

    pub fn init_rng(&mut self) {
        self.channel.call(CompanionRequest::RngInit);
    }

    pub fn read_rng(&mut self) -> u8 {
        self.channel.call(CompanionRequest::RngRead);
        self.channel.rng()
    }

    pub fn device_id(&self) -> u64 {
        self.hw.device_id()
    }

    /// Queues a log record for the companion core.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `length` bytes. Secure memory is refused before it is
    /// read, so a caller can at worst fault on its own memory.
    pub unsafe fn log_data(&mut self, data: *const u8, length: usize) -> Result<()> {
        let record = unsafe { non_secure_slice(data, length)? };
        if record.len() > LOG_CAPACITY {
            return Err(Error::LogTooLong);
        }
        self.channel.post_log(record)
    }

    pub fn process_position(&mut self) {
        self.hw.process();
    }

    /// Position cached by the last keep-alive or position update.
    pub fn position(&self) -> Position2d {
        self.channel.current_position()
    }

    /// Relays the positioning sensor's SPI interrupt, which targets the non-secure side.
    pub fn handle_position_interrupt(&mut self) {
        self.hw.handle_interrupt();
    }

    /// Hands the last received application packet to `f` if the radio-RX event fired.
    pub fn relay_rx(&mut self, f: impl FnOnce(&[u8])) {
        if self.channel.take_event(IpcLine::RadioRx) {
            self.channel.with_rx(f);
        }
    }

    pub fn read_analog(&mut self, channel: u8) -> Result<u16> {
        let channel = AnalogChannel::from_raw(channel)?;
        Ok(self.hw.read(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_span_is_checked() {
        let secure = [0x0..=0xFFFF, 0x2000_0000..=0x2000_7FFF];
        assert_eq!(check_non_secure(0x2000_8000, 127, &secure), Ok(()));
        assert_eq!(check_non_secure(0x1_0000, 16, &secure), Ok(()));
        assert_eq!(
            check_non_secure(0x1FFF_FFF0, 0x20, &secure),
            Err(Error::SecureAddress)
        );
        assert_eq!(
            check_non_secure(0x2000_7FFF, 1, &secure),
            Err(Error::SecureAddress)
        );
        assert_eq!(check_non_secure(0, 0, &secure), Err(Error::SecureAddress));
    }

    #[test]
    fn wrapping_span_is_refused() {
        assert_eq!(
            check_non_secure(usize::MAX - 0xF, 0x20, &[]),
            Err(Error::SecureAddress)
        );
        assert_eq!(check_non_secure(usize::MAX - 0xF, 0x10, &[]), Ok(()));
    }

    #[test]
    fn secure_peripherals_and_system_space_are_refused() {
        // SPU
        assert_eq!(
            check_non_secure(0x5000_3700, 2, &SECURE_RANGES),
            Err(Error::SecureAddress)
        );
        // SCB
        assert_eq!(
            check_non_secure(0xE000_ED00, 4, &SECURE_RANGES),
            Err(Error::SecureAddress)
        );
        // FICR
        assert_eq!(
            check_non_secure(0x00FF_0204, 8, &SECURE_RANGES),
            Err(Error::SecureAddress)
        );
        assert_eq!(
            check_non_secure(0xFFFF_FFFF, 1, &SECURE_RANGES),
            Err(Error::SecureAddress)
        );
        // Non-secure peripheral aliases stay reachable.
        assert_eq!(check_non_secure(0x4084_2500, 4, &SECURE_RANGES), Ok(()));
    }

    #[test]
    fn output_pointer_into_secure_peripherals_is_not_written() {
        let spu_perm = 0x5000_3700 as *mut u32;
        assert_eq!(
            unsafe { write_non_secure(spu_perm, 0) },
            Err(Error::SecureAddress)
        );
        let scb_vtor = 0xE000_ED08 as *mut u32;
        assert_eq!(
            unsafe { write_non_secure(scb_vtor, 0) },
            Err(Error::SecureAddress)
        );
    }

    #[test]
    fn output_pointer_into_secure_ram_is_not_written() {
        let out = 0x2000_1000 as *mut u16;
        assert_eq!(
            unsafe { write_non_secure(out, 0xBEEF) },
            Err(Error::SecureAddress)
        );

        let mut value = 0u16;
        assert_eq!(unsafe { write_non_secure(&mut value, 0xBEEF) }, Ok(()));
        assert_eq!(value, 0xBEEF);
    }
}
