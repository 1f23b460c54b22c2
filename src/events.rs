//! Interrupt to event-loop hand-off.
//!
//! Handlers never do I/O. They turn an [`Interrupt`] into one or more [`Event`] bits in
//! [`Events`], and the supervisor loop is the only consumer of those bits.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::channel::IpcLine;
use crate::config::SupervisorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(u8)]
pub enum Event {
    OtaStart = 0,
    OtaChunk = 1,
    StartApplication = 2,
    PositionUpdate = 3,
    BatteryUpdate = 4,
}

impl Event {
    const fn mask(self) -> u32 {
        1 << self as u8
    }
}

/// Pending event bits plus the periodic tick counter.
pub struct Events {
    pending: AtomicU32,
    ticks: AtomicU32,
    tick_ms: u32,
    position_ticks: u32,
    battery_ticks: u32,
}

impl Events {
    /// `tick_ms` is the period of the interrupt feeding [`Interrupt::Tick`].
    pub const fn new(tick_ms: u32, config: &SupervisorConfig) -> Self {
        Self {
            pending: AtomicU32::new(0),
            ticks: AtomicU32::new(0),
            tick_ms,
            position_ticks: ticks_for(config.position_period_ms, tick_ms),
            battery_ticks: ticks_for(config.battery_period_ms, tick_ms),
        }
    }

    pub fn raise(&self, event: Event) {
        self.pending.fetch_or(event.mask(), Ordering::Release);
    }

    /// Clears `event`, returning whether it was pending.
    pub fn take(&self, event: Event) -> bool {
        self.pending.fetch_and(!event.mask(), Ordering::AcqRel) & event.mask() != 0
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    fn tick(&self) {
        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if ticks % self.position_ticks == 0 {
            self.raise(Event::PositionUpdate);
        }
        if ticks % self.battery_ticks == 0 {
            self.raise(Event::BatteryUpdate);
        }
    }
}

const fn ticks_for(period_ms: u32, tick_ms: u32) -> u32 {
    let ticks = period_ms / tick_ms;
    if ticks == 0 {
        1
    } else {
        ticks
    }
}

/// Interrupt sources the supervisor reacts to. Anything not listed lands on `Unhandled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// A receive event fired on `line`
    Ipc(IpcLine),
    /// Periodic timer
    Tick,
    Unhandled(i16),
}

impl Interrupt {
    pub fn dispatch(self, events: &Events) {
        match self {
            Self::Ipc(IpcLine::OtaStart) => events.raise(Event::OtaStart),
            Self::Ipc(IpcLine::OtaChunk) => events.raise(Event::OtaChunk),
            Self::Ipc(IpcLine::AppStart) => events.raise(Event::StartApplication),
            Self::Ipc(_) => {}
            Self::Tick => events.tick(),
            Self::Unhandled(_irqn) => {}
        }
    }
}
