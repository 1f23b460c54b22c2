use nrf5340_app_pac as pac;

use crate::hal::Flash;

const WEN_READ: u32 = 0;
const WEN_WRITE: u32 = 1;
const WEN_ERASE: u32 = 2;

/// Programs the non-secure flash through the secure NVMC instance.
pub struct Nvmc {
    nvmc: pac::NVMC_S,
}

impl Nvmc {
    pub fn new(nvmc: pac::NVMC_S) -> Self {
        Self { nvmc }
    }

    fn wait_ready(&self) {
        while self.nvmc.ready.read().bits() & 1 == 0 {}
    }

    fn enable(&self, mode: u32) {
        self.nvmc.configns.write(|w| unsafe { w.bits(mode) });
    }
}

impl Flash for Nvmc {
    fn erase_page(&mut self, address: u32) {
        self.enable(WEN_ERASE);
        unsafe { (address as *mut u32).write_volatile(u32::MAX) };
        self.wait_ready();
        self.enable(WEN_READ);
    }

    fn write_words(&mut self, address: u32, words: &[u32]) {
        self.enable(WEN_WRITE);
        let mut destination = address as *mut u32;
        for word in words {
            unsafe {
                destination.write_volatile(*word);
                destination = destination.add(1);
            }
            self.wait_ready();
        }
        self.enable(WEN_READ);
    }
}
