//! Non-secure callable entry points.
//!
//! Every entry takes the installed gateway inside a critical section, validates what the caller
//! handed over and drops any error: the non-secure side gets no signal on rejection. Before
//! `install` runs, every entry is a no-op.

use core::cell::RefCell;

use cortex_m::interrupt::{self, Mutex};
use nrf5340_app_pac as pac;

use crate::gateway::{non_secure_slice, write_non_secure, Gateway};
use crate::protocol::Position2d;

use super::board::Board;
use super::ipc::Ipc;

pub type SecureGateway = Gateway<'static, Ipc, Board, pac::WDT0_S>;

static GATEWAY: Mutex<RefCell<Option<SecureGateway>>> = Mutex::new(RefCell::new(None));

/// Callback receiving a radio packet addressed to the application.
pub type RxCallback = extern "C-cmse-nonsecure-call" fn(*const u8, usize);

pub fn install(gateway: SecureGateway) {
    interrupt::free(|cs| GATEWAY.borrow(cs).replace(Some(gateway)));
}

// A non-secure interrupt that preempts an entry finds the gateway borrowed and is dropped.
fn with_gateway<R>(f: impl FnOnce(&mut SecureGateway) -> R) -> Option<R> {
    interrupt::free(|cs| {
        let mut slot = GATEWAY.borrow(cs).try_borrow_mut().ok()?;
        let result = slot.as_mut().map(f);
        result
    })
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_keep_alive() {
    with_gateway(|gateway| gateway.keep_alive());
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_send_data_packet(packet: *const u8, length: u8) {
    let _ = with_gateway(|gateway| {
        let packet = unsafe { non_secure_slice(packet, usize::from(length)) }?;
        gateway.send_data(packet)
    });
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_send_raw_data(packet: *const u8, length: u8) {
    let _ = with_gateway(|gateway| {
        let packet = unsafe { non_secure_slice(packet, usize::from(length)) }?;
        gateway.send_raw(packet)
    });
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_ipc_isr(callback: RxCallback) {
    let mut pdu = None;
    with_gateway(|gateway| gateway.relay_rx(|bytes| pdu = Some((bytes.as_ptr(), bytes.len()))));
    // The packet lives in the shared record, which the non-secure side can read.
    if let Some((data, length)) = pdu {
        callback(data, length);
    }
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_init_rng() {
    with_gateway(|gateway| gateway.init_rng());
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_read_rng(value: *mut u8) {
    let _ = with_gateway(|gateway| {
        let random = gateway.read_rng();
        unsafe { write_non_secure(value, random) }
    });
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_read_device_id() -> u64 {
    with_gateway(|gateway| gateway.device_id()).unwrap_or(0)
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_log_data(data: *const u8, length: usize) {
    let _ = with_gateway(|gateway| unsafe { gateway.log_data(data, length) });
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_localization_process_data() {
    with_gateway(|gateway| gateway.process_position());
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_localization_get_position(position: *mut Position2d) {
    let _ = with_gateway(|gateway| {
        let current = gateway.position();
        unsafe { write_non_secure(position, current) }
    });
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_localization_handle_isr() {
    with_gateway(|gateway| gateway.handle_position_interrupt());
}

#[no_mangle]
pub extern "C-cmse-nonsecure-entry" fn spm_saadc_read(channel: u8, value: *mut u16) {
    let _ = with_gateway(|gateway| {
        let sample = gateway.read_analog(channel)?;
        unsafe { write_non_secure(value, sample) }
    });
}
