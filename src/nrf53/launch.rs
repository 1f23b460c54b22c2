use core::arch::asm;

use cortex_m::peripheral::scb::{Exception, FpuAccessMode};

const NS_OFFSET: u32 = 0x0002_0000;
const NSACR: *mut u32 = 0xE000_ED8C as *mut u32;
const NSACR_CP10_CP11: u32 = 0b11 << 10;

const CONTROL_NPRIV: u32 = 1 << 0;
const CONTROL_SPSEL: u32 = 1 << 1;

#[allow(non_upper_case_globals)]
const VECTKEY_Pos: u32 = 16;
#[allow(non_upper_case_globals)]
const VECTKEY_Msk: u32 = 0xFFFF << VECTKEY_Pos;
const VECTKEY_PERMIT_WRITE: u32 = (0x05FA << VECTKEY_Pos) & VECTKEY_Msk;

const AIRCR_SYSRESETREQS: u32 = 1 << 3;
const AIRCR_BFHFNMINS: u32 = 1 << 13;
const AIRCR_PRIS: u32 = 1 << 14;

fn aircr_modify(scb: &mut cortex_m::peripheral::SCB, f: impl FnOnce(u32) -> u32) {
    unsafe {
        scb.aircr
            .modify(|bits| VECTKEY_PERMIT_WRITE | f(bits & !VECTKEY_Msk))
    };
}

/// Hands the CPU to the non-secure image whose vector table starts at `image_base`.
///
/// # Safety
///
/// The SPU must already give the image its flash, RAM and peripherals, and the first two words
/// at `image_base` must be a valid initial stack pointer and reset handler.
pub unsafe fn non_secure_jump(mut cpu: cortex_m::Peripherals, image_base: u32) -> ! {
    let vector_table = image_base as *const u32;
    let ns_msp = unsafe { vector_table.read_volatile() };
    let ns_reset = unsafe { vector_table.add(1).read_volatile() };
    debug!("NS MSP {:#X}", ns_msp);
    debug!("NS reset handler {:#X}", ns_reset);

    unsafe {
        let scb_ns_address = cortex_m::peripheral::SCB::PTR as u32 + NS_OFFSET;
        let scb_ns = &*(scb_ns_address as *const cortex_m::peripheral::scb::RegisterBlock);
        scb_ns.vtor.write(image_base);

        // Non-secure stack pointers come from the image's vector table, privileged thread mode
        // on MSP.
        asm!("msr MSP_NS, {}", in(reg) ns_msp, options(nomem, nostack, preserves_flags));
        asm!("msr PSP_NS, {}", in(reg) 0u32, options(nomem, nostack, preserves_flags));
        let mut control: u32;
        asm!("mrs {}, CONTROL_NS", out(reg) control, options(nomem, nostack, preserves_flags));
        control &= !(CONTROL_NPRIV | CONTROL_SPSEL);
        asm!("msr CONTROL_NS, {}", in(reg) control, options(nomem, nostack, preserves_flags));
    }

    cpu.SCB.enable(Exception::SecureFault);

    // Prioritize secure exceptions
    aircr_modify(&mut cpu.SCB, |bits| bits | AIRCR_PRIS);
    // Non-banked exceptions should target non-secure
    aircr_modify(&mut cpu.SCB, |bits| bits | AIRCR_BFHFNMINS);
    // Non-secure code may request reset
    aircr_modify(&mut cpu.SCB, |bits| bits & !AIRCR_SYSRESETREQS);

    unsafe {
        NSACR.write_volatile(NSACR.read_volatile() | NSACR_CP10_CP11);

        // Disable SAU, and let SPU have precedence over it
        cpu.SAU.ctrl.write(cortex_m::peripheral::sau::Ctrl(0));
        cpu.SAU.ctrl.write(cortex_m::peripheral::sau::Ctrl(2));
    }

    cpu.SCB.set_fpu_access_mode(FpuAccessMode::Enabled);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();

    info!("Jumping to the application");

    unsafe {
        let ns_reset: extern "C-cmse-nonsecure-call" fn() -> ! =
            core::mem::transmute::<usize, _>(ns_reset as usize);
        ns_reset()
    }
}
