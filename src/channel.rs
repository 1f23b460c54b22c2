//! Inter-core channel.
//!
//! Both cores see one [`SharedRecord`] placed in RAM that is non-secure and uncached. Each field
//! has a single writer at any time: scalars are plain atomics, the OTA sub-record is only touched
//! while the hardware mutex is held, and bulk buffers are handed over through the request/ack
//! handshake or a signalling line.
//!
//! [`Channel`] is the supervisor's end, [`CompanionPort`] the companion core's end. Neither hands
//! out references into the record.
//!
//! The record is laid out byte for byte like the packed C structure the network core firmware
//! declares in its own `.shared_data` section: every field already sits at its natural alignment
//! there, so `repr(C)` needs no packing to match it.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::config::OTA_CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::protocol::{AppStatus, DeviceType, Position2d, MAX_PDU_LEN};

/// Capacity of the shared log buffer.
pub const LOG_CAPACITY: usize = 127;

/// Request tags serviced by the companion core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(u8)]
pub enum CompanionRequest {
    RadioInit = 1,
    RadioTransmit = 2,
    RngInit = 3,
    RngRead = 4,
}

impl CompanionRequest {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::RadioInit),
            2 => Some(Self::RadioTransmit),
            3 => Some(Self::RngInit),
            4 => Some(Self::RngRead),
            _ => None,
        }
    }
}

const REQUEST_NONE: u8 = 0;

/// IPC signalling lines between the two cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(u8)]
pub enum IpcLine {
    /// Supervisor -> companion: a request tag is pending
    Request = 0,
    /// Companion -> supervisor: `rx_pdu` holds an application packet
    RadioRx = 1,
    /// Companion -> supervisor: launch the resident application
    AppStart = 2,
    /// Companion -> supervisor: stop the resident application
    AppStop = 3,
    /// Supervisor -> companion: `log` holds a record to forward
    LogEvent = 5,
    /// Companion -> supervisor: OTA sizes are set, erase the image area
    OtaStart = 6,
    /// Companion -> supervisor: a verified chunk waits in the OTA buffer
    OtaChunk = 7,
}

/// Hardware the channel is built on: event lines, the test-and-set mutex and the companion
/// core's run control.
pub trait IpcSignals {
    /// Raise `line` towards the other core.
    fn signal(&mut self, line: IpcLine);

    /// Clears the receive event of `line`, returning whether it had fired.
    fn take_event(&mut self, line: IpcLine) -> bool;

    /// One test-and-set attempt on the shared mutex. `true` means the mutex is now held.
    fn try_lock(&mut self) -> bool;

    fn unlock(&mut self);

    /// Whether the companion core is out of forced-off.
    fn companion_released(&self) -> bool;

    /// Let the companion core run.
    fn release_companion(&mut self);

    /// Called on every turn of a busy-wait.
    fn relax(&mut self) {}
}

#[repr(transparent)]
struct Volatile<T: Copy>(UnsafeCell<T>);

impl<T: Copy> Volatile<T> {
    const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    fn read(&self) -> T {
        unsafe { core::ptr::read_volatile(self.0.get()) }
    }

    fn write(&self, value: T) {
        unsafe { core::ptr::write_volatile(self.0.get(), value) }
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct LogRecord {
    length: u8,
    data: [u8; LOG_CAPACITY],
}

#[derive(Clone, Copy)]
#[repr(C)]
struct Pdu {
    length: u8,
    buffer: [u8; MAX_PDU_LEN],
}

impl Pdu {
    const EMPTY: Self = Self {
        length: 0,
        buffer: [0; MAX_PDU_LEN],
    };

    fn store(bytes: &[u8]) -> Result<Self> {
        let length = u8::try_from(bytes.len()).map_err(|_| Error::PacketTooLong)?;
        let mut pdu = Self::EMPTY;
        pdu.length = length;
        pdu.buffer[..bytes.len()].copy_from_slice(bytes);
        Ok(pdu)
    }

    fn bytes(&self) -> &[u8] {
        &self.buffer[..self.length as usize]
    }
}

/// OTA transfer bookkeeping, guarded by the shared mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct OtaRecord {
    pub image_size: u32,
    pub chunk_count: u32,
    pub chunk_index: u32,
    pub chunk_size: u32,
    /// `-1` until the first chunk of a transfer is acknowledged.
    pub last_chunk_acked: i32,
    pub chunk: [u8; OTA_CHUNK_SIZE],
}

impl OtaRecord {
    pub const EMPTY: Self = Self {
        image_size: 0,
        chunk_count: 0,
        chunk_index: 0,
        chunk_size: 0,
        last_chunk_acked: -1,
        chunk: [0; OTA_CHUNK_SIZE],
    };

    /// Payload of the chunk currently in the buffer.
    pub fn chunk_data(&self) -> &[u8] {
        let size = (self.chunk_size as usize).min(OTA_CHUNK_SIZE);
        &self.chunk[..size]
    }

    /// Whether the buffered chunk is the one acknowledged last.
    pub fn is_duplicate(&self) -> bool {
        i64::from(self.last_chunk_acked) == i64::from(self.chunk_index)
    }

    pub fn is_last_chunk(&self) -> bool {
        self.chunk_count > 0 && self.chunk_index == self.chunk_count - 1
    }
}

/// Fixed-layout structure shared by the two cores.
#[repr(C)]
pub struct SharedRecord {
    ready: AtomicBool,
    ack: AtomicBool,
    request: AtomicU8,
    status: AtomicU8,
    battery_level: AtomicU16,
    device_type: AtomicU8,
    log: Volatile<LogRecord>,
    rng: AtomicU8,
    ota: Volatile<OtaRecord>,
    target_position: Volatile<Position2d>,
    current_position: Volatile<Position2d>,
    tx_pdu: Volatile<Pdu>,
    rx_pdu: Volatile<Pdu>,
}

// Every field has one writer at a time; see the module documentation.
unsafe impl Sync for SharedRecord {}

/// Size of the record as the network core firmware sees it.
pub const SHARED_RECORD_SIZE: usize = 812;

const _: () = {
    use core::mem::{offset_of, size_of};

    assert!(size_of::<SharedRecord>() == SHARED_RECORD_SIZE);
    assert!(offset_of!(SharedRecord, battery_level) == 4);
    assert!(offset_of!(SharedRecord, device_type) == 6);
    assert!(offset_of!(SharedRecord, log) == 7);
    assert!(offset_of!(SharedRecord, rng) == 135);
    assert!(offset_of!(SharedRecord, ota) == 136);
    assert!(offset_of!(SharedRecord, target_position) == 284);
    assert!(offset_of!(SharedRecord, current_position) == 292);
    assert!(offset_of!(SharedRecord, tx_pdu) == 300);
    assert!(offset_of!(SharedRecord, rx_pdu) == 556);
};

impl SharedRecord {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            ack: AtomicBool::new(false),
            request: AtomicU8::new(REQUEST_NONE),
            status: AtomicU8::new(AppStatus::Ready as u8),
            battery_level: AtomicU16::new(0),
            device_type: AtomicU8::new(DeviceType::Unknown as u8),
            log: Volatile::new(LogRecord {
                length: 0,
                data: [0; LOG_CAPACITY],
            }),
            rng: AtomicU8::new(0),
            ota: Volatile::new(OtaRecord::EMPTY),
            target_position: Volatile::new(Position2d::new(0, 0)),
            current_position: Volatile::new(Position2d::new(0, 0)),
            tx_pdu: Volatile::new(Pdu::EMPTY),
            rx_pdu: Volatile::new(Pdu::EMPTY),
        }
    }

    /// Puts every field back to its power-on value. The record lives in a section the runtime
    /// does not initialise, so the supervisor calls this once per boot before touching it.
    pub fn clear(&self) {
        self.ready.store(false, Ordering::Release);
        self.ack.store(false, Ordering::Release);
        self.request.store(REQUEST_NONE, Ordering::Relaxed);
        self.status.store(AppStatus::Ready as u8, Ordering::Relaxed);
        self.battery_level.store(0, Ordering::Relaxed);
        self.device_type.store(DeviceType::Unknown as u8, Ordering::Relaxed);
        self.rng.store(0, Ordering::Relaxed);
        self.log.write(LogRecord {
            length: 0,
            data: [0; LOG_CAPACITY],
        });
        self.ota.write(OtaRecord::EMPTY);
        self.target_position.write(Position2d::default());
        self.current_position.write(Position2d::default());
        self.tx_pdu.write(Pdu::EMPTY);
        self.rx_pdu.write(Pdu::EMPTY);
    }

    /// The lifecycle state. A byte outside the known states reads as [`AppStatus::Stopping`],
    /// which no request other than a status query is accepted in.
    fn status(&self) -> AppStatus {
        let raw = self.status.load(Ordering::Acquire);
        AppStatus::from_u8(raw).unwrap_or_else(|| {
            warn!("Unknown lifecycle state {}", raw);
            AppStatus::Stopping
        })
    }

    fn set_status(&self, status: AppStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

impl Default for SharedRecord {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<'r, 's, S: IpcSignals>(record: &'r SharedRecord, signals: &'s mut S) -> Locked<'r, 's, S> {
    while !signals.try_lock() {
        signals.relax();
    }
    Locked { record, signals }
}

/// Mutex held over the shared record. Unlocks on drop.
pub struct Locked<'r, 's, S: IpcSignals> {
    record: &'r SharedRecord,
    signals: &'s mut S,
}

impl<S: IpcSignals> Locked<'_, '_, S> {
    pub fn ota(&self) -> OtaRecord {
        self.record.ota.read()
    }

    /// Read-modify-write of the OTA sub-record.
    pub fn update_ota<R>(&mut self, f: impl FnOnce(&mut OtaRecord) -> R) -> R {
        let mut ota = self.record.ota.read();
        let result = f(&mut ota);
        self.record.ota.write(ota);
        result
    }

    pub fn unlock(self) {}
}

impl<S: IpcSignals> Drop for Locked<'_, '_, S> {
    fn drop(&mut self) {
        self.signals.unlock();
    }
}

/// Supervisor end of the channel.
pub struct Channel<'r, S: IpcSignals> {
    record: &'r SharedRecord,
    signals: S,
}

impl<'r, S: IpcSignals> Channel<'r, S> {
    pub fn new(record: &'r SharedRecord, signals: S) -> Self {
        Self { record, signals }
    }

    /// Starts the companion core and waits until it reports ready. Returns at once when it is
    /// already running and ready. Must precede the first [`Channel::call`].
    pub fn release_companion(&mut self) {
        if self.signals.companion_released() {
            if self.record.ready.load(Ordering::Acquire) {
                return;
            }
            self.record.ready.store(false, Ordering::Release);
        }

        info!("Releasing companion core");
        self.signals.release_companion();

        while !self.record.ready.load(Ordering::Acquire) {
            self.signals.relax();
        }
    }

    /// Hands `request` to the companion core and blocks until it is acknowledged.
    ///
    /// There is no timeout: a companion core that never answers is recovered by the watchdogs.
    pub fn call(&mut self, request: CompanionRequest) {
        self.record.request.store(request as u8, Ordering::Release);
        self.signals.signal(IpcLine::Request);

        while !self.record.ack.swap(false, Ordering::AcqRel) {
            self.signals.relax();
        }
    }

    /// Takes the shared mutex, busy-waiting until it is free.
    pub fn lock(&mut self) -> Locked<'r, '_, S> {
        lock(self.record, &mut self.signals)
    }

    pub fn signal(&mut self, line: IpcLine) {
        self.signals.signal(line);
    }

    pub fn take_event(&mut self, line: IpcLine) -> bool {
        self.signals.take_event(line)
    }

    pub fn status(&self) -> AppStatus {
        self.record.status()
    }

    pub fn set_status(&self, status: AppStatus) {
        if self.record.status() != status {
            debug!("Lifecycle {} -> {}", self.record.status(), status);
        }
        self.record.set_status(status);
    }

    pub fn set_device_type(&self, device_type: DeviceType) {
        self.record.device_type.store(device_type as u8, Ordering::Relaxed);
    }

    pub fn battery_level(&self) -> u16 {
        self.record.battery_level.load(Ordering::Relaxed)
    }

    pub fn set_battery_level(&self, millivolts: u16) {
        self.record.battery_level.store(millivolts, Ordering::Relaxed);
    }

    pub fn current_position(&self) -> Position2d {
        self.record.current_position.read()
    }

    pub fn set_current_position(&self, position: Position2d) {
        self.record.current_position.write(position);
    }

    pub fn target_position(&self) -> Position2d {
        self.record.target_position.read()
    }

    /// Last byte produced by [`CompanionRequest::RngRead`].
    pub fn rng(&self) -> u8 {
        self.record.rng.load(Ordering::Acquire)
    }

    /// Stages a radio payload for [`CompanionRequest::RadioTransmit`].
    pub fn stage_tx(&mut self, payload: &[u8]) -> Result<()> {
        self.record.tx_pdu.write(Pdu::store(payload)?);
        Ok(())
    }

    /// Sends `payload` over the radio as is.
    pub fn transmit(&mut self, payload: &[u8]) -> Result<()> {
        self.stage_tx(payload)?;
        self.call(CompanionRequest::RadioTransmit);
        Ok(())
    }

    /// Copies a log record into the shared buffer and flags it to the companion core.
    pub fn post_log(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > LOG_CAPACITY {
            return Err(Error::LogTooLong);
        }
        let mut log = LogRecord {
            length: data.len() as u8,
            data: [0; LOG_CAPACITY],
        };
        log.data[..data.len()].copy_from_slice(data);
        self.record.log.write(log);
        self.signals.signal(IpcLine::LogEvent);
        Ok(())
    }

    /// Runs `f` over the last application packet received by the radio.
    pub fn with_rx<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let pdu = self.record.rx_pdu.read();
        f(pdu.bytes())
    }
}

/// Companion core end of the channel.
pub struct CompanionPort<'r, S: IpcSignals> {
    record: &'r SharedRecord,
    signals: S,
}

impl<'r, S: IpcSignals> CompanionPort<'r, S> {
    pub fn new(record: &'r SharedRecord, signals: S) -> Self {
        Self { record, signals }
    }

    pub fn set_ready(&self) {
        self.record.ready.store(true, Ordering::Release);
    }

    /// Takes the pending request tag, if any.
    pub fn take_request(&self) -> Option<CompanionRequest> {
        CompanionRequest::from_u8(self.record.request.swap(REQUEST_NONE, Ordering::AcqRel))
    }

    /// Completes the request taken last.
    pub fn acknowledge(&self) {
        self.record.ack.store(true, Ordering::Release);
    }

    pub fn set_rng(&self, value: u8) {
        self.record.rng.store(value, Ordering::Release);
    }

    pub fn lock(&mut self) -> Locked<'r, '_, S> {
        lock(self.record, &mut self.signals)
    }

    pub fn signal(&mut self, line: IpcLine) {
        self.signals.signal(line);
    }

    pub fn status(&self) -> AppStatus {
        self.record.status()
    }

    pub fn set_status(&self, status: AppStatus) {
        self.record.set_status(status);
    }

    pub fn device_type(&self) -> u8 {
        self.record.device_type.load(Ordering::Relaxed)
    }

    pub fn battery_level(&self) -> u16 {
        self.record.battery_level.load(Ordering::Relaxed)
    }

    pub fn current_position(&self) -> Position2d {
        self.record.current_position.read()
    }

    pub fn set_target_position(&self, target: Position2d) {
        self.record.target_position.write(target);
    }

    /// Runs `f` over the payload staged for transmission.
    pub fn with_tx<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let pdu = self.record.tx_pdu.read();
        f(pdu.bytes())
    }

    /// Runs `f` over the pending log record.
    pub fn with_log<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let log = self.record.log.read();
        f(&log.data[..(log.length as usize).min(LOG_CAPACITY)])
    }

    /// Stores an application packet and raises [`IpcLine::RadioRx`].
    pub fn deliver_rx(&mut self, packet: &[u8]) -> Result<()> {
        self.record.rx_pdu.write(Pdu::store(packet)?);
        self.signals.signal(IpcLine::RadioRx);
        Ok(())
    }
}
