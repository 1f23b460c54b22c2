#![no_main]
#![no_std]

use cortex_m::peripheral::NVIC;
use nrf5340_app_pac::{self as pac, interrupt};

use defmt_rtt as _;
use panic_probe as _;

// Secure gateway entries
extern "C" {
    fn spm_keep_alive();
    fn spm_send_data_packet(packet: *const u8, length: u8);
    fn spm_ipc_isr(callback: extern "C" fn(*const u8, usize));
    fn spm_log_data(data: *const u8, length: usize);
    fn spm_read_device_id() -> u64;
}

// LED1 on the nRF5340 DK
const LED: u32 = 28;
const CPU_HZ: u32 = 64_000_000;

extern "C" fn on_packet(data: *const u8, length: usize) {
    let packet = unsafe { core::slice::from_raw_parts(data, length) };
    defmt::println!("Packet received ({}B): {=[u8]:x}", length, packet);
}

#[interrupt]
fn IPC() {
    unsafe { spm_ipc_isr(on_packet) };
}

#[cortex_m_rt::entry]
fn main() -> ! {
    defmt::println!("Hello, non-secure world!");
    defmt::println!("Device {=u64:016x}", unsafe { spm_read_device_id() });

    let chip = pac::Peripherals::take().unwrap();
    chip.P0_NS.dirset.write(|w| unsafe { w.bits(1 << LED) });
    unsafe { NVIC::unmask(pac::Interrupt::IPC) };

    loop {
        cortex_m::asm::delay(CPU_HZ / 2);

        let greeting = b"Hello";
        let log = b"Logging";
        unsafe {
            spm_keep_alive();
            spm_send_data_packet(greeting.as_ptr(), greeting.len() as u8);
            spm_log_data(log.as_ptr(), log.len());
        }

        chip.P0_NS
            .out
            .modify(|r, w| unsafe { w.bits(r.bits() ^ 1 << LED) });
    }
}
