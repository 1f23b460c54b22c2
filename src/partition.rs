//! Secure / non-secure partitioning of flash, RAM, peripherals, interrupts and GPIO.
//!
//! [`SecurityPartition`] is the only way to program the SPU and the interrupt target state. It
//! moves through two states: [`SecurityPartition::configure`] applies the boot layout once, and
//! [`SecurityPartition::hand_off`] applies the delegation to the resident application right
//! before the jump. Both consume the previous state, so neither can be repeated or redone with
//! different arguments.

use core::ops::Range;

use crate::config::{
    Pin, FLASH_SIZE, NON_SECURE_RAM_REGIONS, NSC_FLASH_REGION, NSC_SIZE_CODE, SECURE_FLASH_REGIONS,
    SECURE_PINS, SECURE_RAM_REGIONS, SHARED_RAM_REGION, SPU_FLASH_REGION_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum SecAttr {
    Secure,
    NonSecure,
}

/// Application core peripheral IDs. The IRQ number of a peripheral equals its ID.
pub mod periph {
    pub const SPIM0_SPIS0_TWIM0_TWIS0_UARTE0: u8 = 8;
    pub const SPIM1_SPIS1_TWIM1_TWIS1_UARTE1: u8 = 9;
    pub const SPIM4: u8 = 10;
    pub const SPIM2_SPIS2_TWIM2_TWIS2_UARTE2: u8 = 11;
    pub const SPIM3_SPIS3_TWIM3_TWIS3_UARTE3: u8 = 12;
    pub const GPIOTE0: u8 = 13;
    pub const TIMER0: u8 = 15;
    pub const TIMER1: u8 = 16;
    pub const RTC0: u8 = 20;
    pub const RTC1: u8 = 21;
    pub const COMP_LPCOMP: u8 = 26;
    pub const EGU0: u8 = 27;
    pub const EGU1: u8 = 28;
    pub const EGU2: u8 = 29;
    pub const EGU3: u8 = 30;
    pub const EGU4: u8 = 31;
    pub const EGU5: u8 = 32;
    pub const PWM0: u8 = 33;
    pub const PWM1: u8 = 34;
    pub const PWM2: u8 = 35;
    pub const PWM3: u8 = 36;
    pub const PDM0: u8 = 38;
    pub const I2S0: u8 = 40;
    pub const IPC: u8 = 42;
    pub const QSPI: u8 = 43;
    pub const GPIOTE1: u8 = 47;
    pub const MUTEX: u8 = 48;
    pub const QDEC0: u8 = 51;
    pub const QDEC1: u8 = 52;
    pub const USBD: u8 = 54;
    pub const USBREGULATOR: u8 = 55;
    pub const P0_P1: u8 = 66;
}

/// SPU permission register encodings.
pub mod perm {
    use super::SecAttr;

    const EXECUTE: u32 = 1 << 0;
    const WRITE: u32 = 1 << 1;
    const READ: u32 = 1 << 2;
    const SECATTR: u32 = 1 << 4;

    // PERIPHID[n].PERM
    const PERIPH_DMA: u32 = 0b11 << 2;
    const PERIPH_SECATTR: u32 = 1 << 4;
    const PERIPH_DMASEC: u32 = 1 << 5;

    /// FLASHREGION / RAMREGION permission: full access, in the domain of `attr`.
    pub const fn region(attr: SecAttr) -> u32 {
        let perm = READ | WRITE | EXECUTE;
        match attr {
            SecAttr::Secure => perm | SECATTR,
            SecAttr::NonSecure => perm,
        }
    }

    /// PERIPHID permission of a peripheral handed to the non-secure domain. The DMA field is
    /// set to NoSeparateAttribute and DMA transfers turn non-secure when `dma` is set. Other
    /// bits of `current` are kept.
    pub const fn peripheral(current: u32, dma: bool) -> u32 {
        let mut bits = current & !(PERIPH_SECATTR | PERIPH_DMA);
        if dma {
            bits &= !PERIPH_DMASEC;
        }
        bits
    }
}

/// A peripheral moved to the non-secure domain, with or without its DMA path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub id: u8,
    pub dma: bool,
}

const fn grant(id: u8) -> Grant {
    Grant { id, dma: false }
}

const fn grant_dma(id: u8) -> Grant {
    Grant { id, dma: true }
}

/// Everything one partitioning step writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub secure_flash: Range<usize>,
    pub non_secure_flash: Range<usize>,
    pub secure_ram: Range<usize>,
    pub non_secure_ram: Range<usize>,
    /// Flash region and encoded size of the non-secure callable subregion
    pub nsc: Option<(u8, u8)>,
    pub peripherals: &'static [Grant],
    /// IRQ lines retargeted to the non-secure domain
    pub interrupts: &'static [u8],
    /// GPIO ports handed over, minus `secure_pins`
    pub gpio_ports: &'static [u8],
    pub secure_pins: &'static [Pin],
}

const FLASH_REGIONS: usize = FLASH_SIZE / SPU_FLASH_REGION_SIZE;

/// Applied once at every boot: the supervisor owns the lower flash, the image area is
/// non-secure, and the companion core can reach the shared RAM region and the mutex.
pub const BOOT_LAYOUT: Layout = Layout {
    secure_flash: 0..SECURE_FLASH_REGIONS,
    non_secure_flash: SECURE_FLASH_REGIONS..FLASH_REGIONS,
    secure_ram: 0..0,
    non_secure_ram: SHARED_RAM_REGION..SHARED_RAM_REGION + 1,
    nsc: None,
    peripherals: &[grant(periph::MUTEX)],
    interrupts: &[],
    gpio_ports: &[],
    secure_pins: &[],
};

const APPLICATION_PERIPHERALS: &[Grant] = &[
    grant_dma(periph::I2S0),
    grant(periph::P0_P1),
    grant_dma(periph::PDM0),
    grant(periph::COMP_LPCOMP),
    grant(periph::EGU0),
    grant(periph::EGU1),
    grant(periph::EGU2),
    grant(periph::EGU3),
    grant(periph::EGU4),
    grant(periph::EGU5),
    grant_dma(periph::PWM0),
    grant_dma(periph::PWM1),
    grant_dma(periph::PWM2),
    grant_dma(periph::PWM3),
    grant(periph::QDEC0),
    grant(periph::QDEC1),
    grant_dma(periph::QSPI),
    grant(periph::RTC0),
    grant(periph::RTC1),
    grant_dma(periph::SPIM0_SPIS0_TWIM0_TWIS0_UARTE0),
    grant_dma(periph::SPIM1_SPIS1_TWIM1_TWIS1_UARTE1),
    grant_dma(periph::SPIM2_SPIS2_TWIM2_TWIS2_UARTE2),
    grant_dma(periph::SPIM3_SPIS3_TWIM3_TWIS3_UARTE3),
    grant(periph::TIMER0),
    grant(periph::TIMER1),
    grant_dma(periph::USBD),
    grant(periph::USBREGULATOR),
];

// IPC and SPIM4 stay secure, but their interrupts go to the application, which relays them
// back through the gateway.
const APPLICATION_INTERRUPTS: &[u8] = &[
    periph::I2S0,
    periph::PDM0,
    periph::EGU0,
    periph::EGU1,
    periph::EGU2,
    periph::EGU3,
    periph::EGU4,
    periph::EGU5,
    periph::PWM0,
    periph::PWM1,
    periph::PWM2,
    periph::PWM3,
    periph::QDEC0,
    periph::QDEC1,
    periph::QSPI,
    periph::RTC0,
    periph::RTC1,
    periph::SPIM0_SPIS0_TWIM0_TWIS0_UARTE0,
    periph::SPIM1_SPIS1_TWIM1_TWIS1_UARTE1,
    periph::SPIM2_SPIS2_TWIM2_TWIS2_UARTE2,
    periph::SPIM3_SPIS3_TWIM3_TWIS3_UARTE3,
    periph::TIMER0,
    periph::TIMER1,
    periph::USBD,
    periph::USBREGULATOR,
    periph::GPIOTE0,
    periph::GPIOTE1,
    periph::IPC,
    periph::SPIM4,
];

/// Applied right before the jump into the resident application.
pub const APPLICATION_LAYOUT: Layout = Layout {
    secure_flash: 0..0,
    non_secure_flash: 0..0,
    secure_ram: 0..SECURE_RAM_REGIONS,
    non_secure_ram: SHARED_RAM_REGION + 1..SHARED_RAM_REGION + 1 + NON_SECURE_RAM_REGIONS,
    nsc: Some((NSC_FLASH_REGION, NSC_SIZE_CODE)),
    peripherals: APPLICATION_PERIPHERALS,
    interrupts: APPLICATION_INTERRUPTS,
    gpio_ports: &[0, 1],
    secure_pins: SECURE_PINS,
};

/// SPU and NVIC target-state programming.
pub trait SpuBackend {
    fn set_flash_region(&mut self, region: usize, attr: SecAttr);
    fn set_ram_region(&mut self, region: usize, attr: SecAttr);
    fn set_nsc(&mut self, region: u8, size: u8);
    fn set_peripheral(&mut self, id: u8, dma: bool);
    fn set_interrupt_non_secure(&mut self, irq: u8);
    /// Writes a GPIO port's permission mask; a set bit keeps that pin secure.
    fn set_gpio_secure_mask(&mut self, port: u8, mask: u32);
    /// Makes the new permissions visible before anything else runs.
    fn barrier(&mut self) {}
}

fn apply<B: SpuBackend>(spu: &mut B, layout: &Layout) {
    for region in layout.secure_flash.clone() {
        spu.set_flash_region(region, SecAttr::Secure);
    }
    for region in layout.non_secure_flash.clone() {
        spu.set_flash_region(region, SecAttr::NonSecure);
    }
    for region in layout.secure_ram.clone() {
        spu.set_ram_region(region, SecAttr::Secure);
    }
    for region in layout.non_secure_ram.clone() {
        spu.set_ram_region(region, SecAttr::NonSecure);
    }
    if let Some((region, size)) = layout.nsc {
        spu.set_nsc(region, size);
    }
    for grant in layout.peripherals {
        spu.set_peripheral(grant.id, grant.dma);
    }
    for &irq in layout.interrupts {
        spu.set_interrupt_non_secure(irq);
    }
    for &port in layout.gpio_ports {
        spu.set_gpio_secure_mask(port, secure_mask(layout.secure_pins, port));
    }
    spu.barrier();
}

fn secure_mask(pins: &[Pin], port: u8) -> u32 {
    pins.iter()
        .filter(|p| p.port == port)
        .fold(0, |mask, p| mask | 1 << p.pin)
}

/// Partition not configured yet.
pub struct Unconfigured;
/// Boot layout applied, supervisor in control.
pub struct Supervised;
/// Resident application layout applied.
pub struct Delegated;

/// Capability over the SPU. Owning one is the only way to change domain ownership.
pub struct SecurityPartition<B: SpuBackend, S = Unconfigured> {
    spu: B,
    _state: S,
}

impl<B: SpuBackend> SecurityPartition<B, Unconfigured> {
    pub fn new(spu: B) -> Self {
        Self {
            spu,
            _state: Unconfigured,
        }
    }

    /// Boot-time partitioning. Runs before any other component touches hardware.
    pub fn configure(mut self) -> SecurityPartition<B, Supervised> {
        info!(
            "Secure flash regions {}..{}",
            BOOT_LAYOUT.secure_flash.start,
            BOOT_LAYOUT.secure_flash.end
        );
        apply(&mut self.spu, &BOOT_LAYOUT);
        SecurityPartition {
            spu: self.spu,
            _state: Supervised,
        }
    }
}

impl<B: SpuBackend> SecurityPartition<B, Supervised> {
    /// Delegates RAM, peripherals, interrupts and GPIO to the resident application.
    pub fn hand_off(mut self) -> SecurityPartition<B, Delegated> {
        info!(
            "Delegating {} peripherals and {} interrupts",
            APPLICATION_LAYOUT.peripherals.len(),
            APPLICATION_LAYOUT.interrupts.len()
        );
        apply(&mut self.spu, &APPLICATION_LAYOUT);
        SecurityPartition {
            spu: self.spu,
            _state: Delegated,
        }
    }
}

impl<B: SpuBackend, S> SecurityPartition<B, S> {
    pub fn release(self) -> B {
        self.spu
    }
}
