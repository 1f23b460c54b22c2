use nrf5340_app_pac as pac;

use crate::watchdog::{WatchdogConfig, WatchdogTimer};

const CONFIG_SLEEP_RUN: u32 = 1 << 0;
const CONFIG_HALT_RUN: u32 = 1 << 3;
const RR_RELOAD: u32 = 0x6E52_4635;
const SUBSCRIBE_EN: u32 = 1 << 31;

macro_rules! watchdog {
    ($($wdt:ident),*) => {$(
        impl WatchdogTimer for pac::$wdt {
            fn configure(&mut self, config: &WatchdogConfig) {
                let mut bits = CONFIG_SLEEP_RUN;
                if !config.pause_on_halt {
                    bits |= CONFIG_HALT_RUN;
                }
                self.config.write(|w| unsafe { w.bits(bits) });
                self.rren.write(|w| unsafe { w.bits(1) });
                self.crv.write(|w| unsafe { w.bits(config.reload_ticks) });
            }

            fn start(&mut self) {
                self.tasks_start.write(|w| unsafe { w.bits(1) });
            }

            fn reload(&mut self) {
                self.rr[0].write(|w| unsafe { w.bits(RR_RELOAD) });
            }
        }
    )*};
}

watchdog!(WDT0_S, WDT1_S);

/// Lets the DPPI channel raised by the stop line start `wdt`.
pub fn start_on_dppi(wdt: &pac::WDT1_S, channel: u32) {
    wdt.subscribe_start
        .write(|w| unsafe { w.bits(SUBSCRIBE_EN | channel) });
}
