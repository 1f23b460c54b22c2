//! Watchdog capability.
//!
//! Two timers cover the device: the application watchdog is started at the hand-off to the
//! resident application and must be fed through the gateway keep-alive; the stop watchdog is
//! armed at boot and started in hardware by the application-stop line, so a stop request always
//! ends in a reset.

use crate::config::WATCHDOG_RELOAD_TICKS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Timeout in ticks of the 32.768 kHz clock
    pub reload_ticks: u32,
    /// Hold the counter while a debugger halts the CPU
    pub pause_on_halt: bool,
}

impl WatchdogConfig {
    pub const APPLICATION: Self = Self {
        reload_ticks: WATCHDOG_RELOAD_TICKS,
        pause_on_halt: true,
    };

    pub const STOP: Self = Self {
        reload_ticks: WATCHDOG_RELOAD_TICKS,
        pause_on_halt: true,
    };
}

/// Register-level access to one watchdog instance.
pub trait WatchdogTimer {
    /// Writes timeout and behaviour and enables reload register 0. Only valid before start.
    fn configure(&mut self, config: &WatchdogConfig);
    fn start(&mut self);
    /// Writes the reload request to register 0.
    fn reload(&mut self);
}

/// Owns one watchdog. A started watchdog cannot be stopped or reconfigured.
pub struct Watchdog<T: WatchdogTimer> {
    timer: T,
    running: bool,
}

impl<T: WatchdogTimer> Watchdog<T> {
    pub fn new(mut timer: T, config: &WatchdogConfig) -> Self {
        timer.configure(config);
        Self {
            timer,
            running: false,
        }
    }

    /// Starts counting. Later calls have no effect.
    pub fn start(&mut self) {
        if !self.running {
            debug!("Watchdog started");
            self.timer.start();
            self.running = true;
        }
    }

    pub fn feed(&mut self) {
        self.timer.reload();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
