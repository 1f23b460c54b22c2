//! Host harness: a companion core emulated on top of the shared record, and a board made of
//! plain fields.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use nrf53_spm_rs::channel::{CompanionPort, CompanionRequest, IpcLine, IpcSignals, SharedRecord};
use nrf53_spm_rs::events::{Events, Interrupt};
use nrf53_spm_rs::hal::{AnalogChannel, AnalogInput, DeviceId, Flash, Motion, Positioning, StatusLed};
use nrf53_spm_rs::protocol::Position2d;
use nrf53_spm_rs::remote::chunk_digest;
use nrf53_spm_rs::watchdog::{WatchdogConfig, WatchdogTimer};

pub const METRE: u32 = 1_000_000;

/// State both ends of the emulated IPC peripheral share.
#[derive(Default)]
pub struct Bus {
    mutex: Cell<bool>,
    released: Cell<bool>,
    rx_pending: Cell<bool>,
    pub rng: Cell<u8>,
    /// Payloads the companion core put on the air
    pub sent: RefCell<Vec<Vec<u8>>>,
    /// Every line raised, by either core
    pub lines: RefCell<Vec<IpcLine>>,
    delivered: Cell<usize>,
    pub requests: RefCell<Vec<CompanionRequest>>,
}

impl Bus {
    fn try_lock(&self) -> bool {
        !self.mutex.replace(true)
    }

    /// Turns every line raised since the last call into interrupts, as the IPC handler does.
    pub fn deliver(&self, events: &Events) {
        let lines = self.lines.borrow();
        for line in &lines[self.delivered.get()..] {
            Interrupt::Ipc(*line).dispatch(events);
        }
        self.delivered.set(lines.len());
    }

    pub fn raised(&self, line: IpcLine) -> bool {
        self.lines.borrow().contains(&line)
    }

    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.sent.borrow().last().cloned()
    }
}

/// Supervisor side. Requests are serviced synchronously by the emulated companion core.
pub struct HostSide<'a> {
    record: &'a SharedRecord,
    bus: &'a Bus,
}

impl<'a> HostSide<'a> {
    pub fn new(record: &'a SharedRecord, bus: &'a Bus) -> Self {
        Self { record, bus }
    }

    fn companion(&self) -> CompanionPort<'a, CompanionSide<'a>> {
        CompanionPort::new(self.record, CompanionSide::new(self.bus))
    }
}

impl IpcSignals for HostSide<'_> {
    fn signal(&mut self, line: IpcLine) {
        if line != IpcLine::Request {
            self.bus.lines.borrow_mut().push(line);
            return;
        }

        let port = self.companion();
        if let Some(request) = port.take_request() {
            self.bus.requests.borrow_mut().push(request);
            match request {
                CompanionRequest::RadioTransmit => {
                    port.with_tx(|payload| self.bus.sent.borrow_mut().push(payload.to_vec()))
                }
                CompanionRequest::RngRead => port.set_rng(self.bus.rng.get()),
                CompanionRequest::RadioInit | CompanionRequest::RngInit => {}
            }
        }
        port.acknowledge();
    }

    fn take_event(&mut self, line: IpcLine) -> bool {
        line == IpcLine::RadioRx && self.bus.rx_pending.replace(false)
    }

    fn try_lock(&mut self) -> bool {
        self.bus.try_lock()
    }

    fn unlock(&mut self) {
        self.bus.mutex.set(false);
    }

    fn companion_released(&self) -> bool {
        self.bus.released.get()
    }

    fn release_companion(&mut self) {
        self.bus.released.set(true);
        self.companion().set_ready();
    }
}

/// Companion core side.
pub struct CompanionSide<'a> {
    bus: &'a Bus,
}

impl<'a> CompanionSide<'a> {
    pub fn new(bus: &'a Bus) -> Self {
        Self { bus }
    }
}

impl IpcSignals for CompanionSide<'_> {
    fn signal(&mut self, line: IpcLine) {
        if line == IpcLine::RadioRx {
            self.bus.rx_pending.set(true);
        }
        self.bus.lines.borrow_mut().push(line);
    }

    fn take_event(&mut self, _line: IpcLine) -> bool {
        false
    }

    fn try_lock(&mut self) -> bool {
        self.bus.try_lock()
    }

    fn unlock(&mut self) {
        self.bus.mutex.set(false);
    }

    fn companion_released(&self) -> bool {
        true
    }

    fn release_companion(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Speed(i16, i16),
    Rotate(u16, i8),
    Straight(u16, i8),
}

pub struct MockBoard {
    pub erased: Vec<u32>,
    pub writes: Vec<(u32, Vec<u32>)>,
    pub fix: Option<Position2d>,
    pub interrupts: u32,
    pub adc_raw: u16,
    pub adc_reads: Vec<AnalogChannel>,
    pub moves: Vec<Move>,
    pub toggles: u32,
}

impl Default for MockBoard {
    fn default() -> Self {
        Self {
            erased: Vec::new(),
            writes: Vec::new(),
            fix: None,
            interrupts: 0,
            adc_raw: 4095,
            adc_reads: Vec::new(),
            moves: Vec::new(),
            toggles: 0,
        }
    }
}

impl Flash for MockBoard {
    fn erase_page(&mut self, address: u32) {
        self.erased.push(address);
    }

    fn write_words(&mut self, address: u32, words: &[u32]) {
        self.writes.push((address, words.to_vec()));
    }
}

impl Positioning for MockBoard {
    fn process(&mut self) -> bool {
        self.fix.is_some()
    }

    fn position(&mut self) -> Position2d {
        self.fix.unwrap_or_default()
    }

    fn handle_interrupt(&mut self) {
        self.interrupts += 1;
    }
}

impl AnalogInput for MockBoard {
    fn read(&mut self, channel: AnalogChannel) -> u16 {
        self.adc_reads.push(channel);
        self.adc_raw
    }
}

impl Motion for MockBoard {
    fn set_speed(&mut self, left: i16, right: i16) {
        self.moves.push(Move::Speed(left, right));
    }

    fn rotate(&mut self, angle: u16, speed: i8) {
        self.moves.push(Move::Rotate(angle, speed));
    }

    fn straight(&mut self, distance: u16, speed: i8) {
        self.moves.push(Move::Straight(distance, speed));
    }
}

impl StatusLed for MockBoard {
    fn toggle(&mut self) {
        self.toggles += 1;
    }
}

impl DeviceId for MockBoard {
    fn device_id(&self) -> u64 {
        0x1122_3344_5566_7788
    }
}

#[derive(Default)]
pub struct WatchdogProbe {
    pub config: Cell<Option<WatchdogConfig>>,
    pub started: Cell<bool>,
    pub reloads: Cell<u32>,
}

impl WatchdogTimer for &WatchdogProbe {
    fn configure(&mut self, config: &WatchdogConfig) {
        self.config.set(Some(*config));
    }

    fn start(&mut self) {
        self.started.set(true);
    }

    fn reload(&mut self) {
        self.reloads.set(self.reloads.get() + 1);
    }
}

pub fn ota_start(image_size: u32, chunk_count: u32) -> Vec<u8> {
    let mut packet = vec![0x84];
    packet.extend_from_slice(&image_size.to_le_bytes());
    packet.extend_from_slice(&chunk_count.to_le_bytes());
    packet
}

pub fn ota_chunk(index: u32, data: &[u8]) -> Vec<u8> {
    ota_chunk_with_digest(index, data, chunk_digest(data))
}

pub fn ota_chunk_with_digest(index: u32, data: &[u8], digest: [u8; 8]) -> Vec<u8> {
    let mut packet = vec![0x85];
    packet.extend_from_slice(&index.to_le_bytes());
    packet.push(data.len() as u8);
    packet.extend_from_slice(&digest);
    packet.extend_from_slice(data);
    packet
}

pub fn reset(target: Position2d) -> Vec<u8> {
    let mut packet = vec![0x83];
    packet.extend_from_slice(&target.x.to_le_bytes());
    packet.extend_from_slice(&target.y.to_le_bytes());
    packet
}

/// Feeds `ms` worth of periodic ticks.
pub fn elapse(events: &Events, ms: u32) {
    for _ in 0..ms / events.tick_ms() {
        Interrupt::Tick.dispatch(events);
    }
}
