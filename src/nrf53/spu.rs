use nrf5340_app_pac as pac;

use crate::partition::{perm, SecAttr, SpuBackend};

/// SPU plus the NVIC interrupt target registers.
pub struct Spu {
    spu: pac::SPU_S,
}

impl Spu {
    pub fn new(spu: pac::SPU_S) -> Self {
        Self { spu }
    }
}

impl SpuBackend for Spu {
    fn set_flash_region(&mut self, region: usize, attr: SecAttr) {
        self.spu.flashregion[region]
            .perm
            .write(|w| unsafe { w.bits(perm::region(attr)) });
    }

    fn set_ram_region(&mut self, region: usize, attr: SecAttr) {
        self.spu.ramregion[region]
            .perm
            .write(|w| unsafe { w.bits(perm::region(attr)) });
    }

    fn set_nsc(&mut self, region: u8, size: u8) {
        self.spu.flashnsc[0]
            .region
            .write(|w| unsafe { w.bits(u32::from(region)) });
        self.spu.flashnsc[0]
            .size
            .write(|w| unsafe { w.bits(u32::from(size)) });
    }

    fn set_peripheral(&mut self, id: u8, dma: bool) {
        self.spu.periphid[usize::from(id)]
            .perm
            .modify(|r, w| unsafe { w.bits(perm::peripheral(r.bits(), dma)) });
        trace!(
            "Periph ID {}: {:#X}",
            id,
            self.spu.periphid[usize::from(id)].perm.read().bits()
        );
    }

    // NVIC->ITNS[0] to NVIC->ITNS[15]
    // Bit m in NVIC->ITNS[n] corresponds to IRQ number 32n + m
    fn set_interrupt_non_secure(&mut self, irq: u8) {
        const NVIC_ITNS_BASE: *mut u32 = 0xE000_E380 as *mut u32;
        const NVIC_ITNS_WIDTH: usize = 32;

        let n = usize::from(irq) / NVIC_ITNS_WIDTH;
        let m = usize::from(irq) % NVIC_ITNS_WIDTH;
        unsafe {
            let itns = NVIC_ITNS_BASE.add(n);
            itns.write_volatile(itns.read_volatile() | 1 << m);
        }
    }

    fn set_gpio_secure_mask(&mut self, port: u8, mask: u32) {
        self.spu.gpioport[usize::from(port)]
            .perm
            .write(|w| unsafe { w.bits(mask) });
    }

    fn barrier(&mut self) {
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}
