use nrf5340_app_pac as pac;

use crate::channel::{IpcLine, IpcSignals};

const INBOUND: [IpcLine; 5] = [
    IpcLine::RadioRx,
    IpcLine::AppStart,
    IpcLine::AppStop,
    IpcLine::OtaStart,
    IpcLine::OtaChunk,
];

const OUTBOUND: [IpcLine; 2] = [IpcLine::Request, IpcLine::LogEvent];

/// Lines that wake the supervisor loop through the IPC interrupt.
const INTERRUPTING: [IpcLine; 3] = [IpcLine::AppStart, IpcLine::OtaStart, IpcLine::OtaChunk];

/// DPPI channel carrying the stop line to the stop watchdog.
pub const STOP_DPPI_CHANNEL: u32 = 0;

/// IPC, mutex and companion core run control.
pub struct Ipc {
    ipc: pac::IPC_S,
    mutex: pac::MUTEX_NS,
    reset: pac::RESET_S,
}

impl Ipc {
    pub fn new(ipc: pac::IPC_S, mutex: pac::MUTEX_NS, reset: pac::RESET_S) -> Self {
        Self { ipc, mutex, reset }
    }

    /// Routes every line to its own IPC channel, enables the interrupting ones and publishes
    /// the stop line on the DPPI channel the stop watchdog subscribes to.
    pub fn configure(&mut self, dppic: &pac::DPPIC_S) {
        for line in OUTBOUND {
            let ch = line as usize;
            self.ipc.send_cnf[ch].write(|w| unsafe { w.bits(1 << ch) });
        }
        for line in INBOUND {
            let ch = line as usize;
            self.ipc.receive_cnf[ch].write(|w| unsafe { w.bits(1 << ch) });
        }
        let mask = INTERRUPTING.iter().fold(0, |mask, line| mask | 1 << *line as u32);
        self.ipc.intenset.write(|w| unsafe { w.bits(mask) });

        const PUBLISH_EN: u32 = 1 << 31;
        self.ipc.publish_receive[IpcLine::AppStop as usize]
            .write(|w| unsafe { w.bits(PUBLISH_EN | STOP_DPPI_CHANNEL) });
        dppic
            .chenset
            .write(|w| unsafe { w.bits(1 << STOP_DPPI_CHANNEL) });
    }

    /// Latched reset causes, cleared on read.
    pub fn take_reset_reason(&mut self) -> u32 {
        let reason = self.reset.resetreas.read().bits();
        self.reset.resetreas.write(|w| unsafe { w.bits(reason) });
        reason
    }
}

/// Clears the receive event of `line` on the secure IPC instance.
pub fn take_event(line: IpcLine) -> bool {
    let ipc = unsafe { &*pac::IPC_S::ptr() };
    let event = &ipc.events_receive[line as usize];
    if event.read().bits() == 0 {
        return false;
    }
    event.write(|w| unsafe { w.bits(0) });
    true
}

impl IpcSignals for Ipc {
    fn signal(&mut self, line: IpcLine) {
        self.ipc.tasks_send[line as usize].write(|w| unsafe { w.bits(1) });
    }

    fn take_event(&mut self, line: IpcLine) -> bool {
        take_event(line)
    }

    // Reading MUTEX[0] returns 0 when it was free and takes it in the same access.
    fn try_lock(&mut self) -> bool {
        self.mutex.mutex[0].read().bits() == 0
    }

    fn unlock(&mut self) {
        self.mutex.mutex[0].write(|w| unsafe { w.bits(0) });
    }

    fn companion_released(&self) -> bool {
        self.reset.network.forceoff.read().bits() & 1 == 0
    }

    fn release_companion(&mut self) {
        self.reset.network.forceoff.write(|w| unsafe { w.bits(0) });
    }
}
