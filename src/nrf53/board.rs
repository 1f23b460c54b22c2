use nrf5340_app_pac as pac;

use crate::config::{Pin, MOTOR_PINS, STATUS_LED};
use crate::hal::{AnalogChannel, AnalogInput, DeviceId, Flash, Motion, Positioning, StatusLed};
use crate::protocol::Position2d;

use super::nvmc::Nvmc;

const GPIO_S_BASE: [usize; 2] = [0x5084_2500, 0x5084_2800];
const GPIO_OUT: usize = 0x004;
const GPIO_OUTSET: usize = 0x008;
const GPIO_OUTCLR: usize = 0x00C;
const GPIO_DIRSET: usize = 0x018;

fn gpio_register(pin: Pin, offset: usize) -> *mut u32 {
    (GPIO_S_BASE[usize::from(pin.port)] + offset) as *mut u32
}

/// PSEL encoding shared by every peripheral with pin selection.
fn psel(pin: Pin) -> u32 {
    u32::from(pin.port) << 5 | u32::from(pin.pin)
}

/// Push-pull output on the secure GPIO port.
pub struct Output {
    pin: Pin,
}

impl Output {
    pub fn new(pin: Pin) -> Self {
        unsafe { gpio_register(pin, GPIO_DIRSET).write_volatile(1 << pin.pin) };
        Self { pin }
    }

    fn is_high(&self) -> bool {
        unsafe { gpio_register(self.pin, GPIO_OUT).read_volatile() & 1 << self.pin.pin != 0 }
    }
}

impl StatusLed for Output {
    fn toggle(&mut self) {
        let offset = if self.is_high() { GPIO_OUTCLR } else { GPIO_OUTSET };
        unsafe { gpio_register(self.pin, offset).write_volatile(1 << self.pin.pin) };
    }
}

const SAADC_RESOLUTION_12BIT: u32 = 2;
const SAADC_PSELP_VDD: u32 = 9;
const SAADC_PSELP_VDDHDIV5: u32 = 0x0D;
// Gain 1/6 against the 0.6 V internal reference, 10 us acquisition: 3.6 V full scale.
const SAADC_CH_CONFIG: u32 = 2 << 16;

/// One-shot, single channel SAADC.
pub struct Saadc {
    saadc: pac::SAADC_S,
}

impl Saadc {
    pub fn new(saadc: pac::SAADC_S) -> Self {
        saadc
            .resolution
            .write(|w| unsafe { w.bits(SAADC_RESOLUTION_12BIT) });
        Self { saadc }
    }
}

impl AnalogInput for Saadc {
    fn read(&mut self, channel: AnalogChannel) -> u16 {
        let pselp = match channel {
            AnalogChannel::Ain(n) => u32::from(n) + 1,
            AnalogChannel::Vdd => SAADC_PSELP_VDD,
            AnalogChannel::Vddh => SAADC_PSELP_VDDHDIV5,
        };
        let mut sample: i16 = 0;
        let saadc = &self.saadc;

        saadc.ch[0].pselp.write(|w| unsafe { w.bits(pselp) });
        saadc.ch[0].config.write(|w| unsafe { w.bits(SAADC_CH_CONFIG) });
        saadc
            .result
            .ptr
            .write(|w| unsafe { w.bits(&mut sample as *mut i16 as u32) });
        saadc.result.maxcnt.write(|w| unsafe { w.bits(1) });
        saadc.enable.write(|w| unsafe { w.bits(1) });

        saadc.events_started.write(|w| unsafe { w.bits(0) });
        saadc.tasks_start.write(|w| unsafe { w.bits(1) });
        while saadc.events_started.read().bits() == 0 {}

        saadc.events_end.write(|w| unsafe { w.bits(0) });
        saadc.tasks_sample.write(|w| unsafe { w.bits(1) });
        while saadc.events_end.read().bits() == 0 {}

        saadc.events_stopped.write(|w| unsafe { w.bits(0) });
        saadc.tasks_stop.write(|w| unsafe { w.bits(1) });
        while saadc.events_stopped.read().bits() == 0 {}
        saadc.enable.write(|w| unsafe { w.bits(0) });

        // Single-ended samples slightly below ground come back negative.
        let sample = unsafe { core::ptr::read_volatile(&sample) };
        sample.max(0) as u16
    }
}

impl DeviceId for pac::FICR_S {
    fn device_id(&self) -> u64 {
        let low = self.info.deviceid[0].read().bits();
        let high = self.info.deviceid[1].read().bits();
        u64::from(high) << 32 | u64::from(low)
    }
}

/// Lighthouse receiver on SPIM4.
///
/// Sweep decoding runs outside of this firmware, so no fix is ever reported and the cached
/// position in the shared record only changes when a decoder provides one.
///
/// With this driver a return-to-base never arrives: the supervisor stays in `Resetting` until
/// the controller sends Stop, which ends in a stop watchdog reset.
pub struct Lighthouse {
    spim: pac::SPIM4_S,
}

impl Lighthouse {
    pub fn new(spim: pac::SPIM4_S) -> Self {
        Self { spim }
    }
}

impl Positioning for Lighthouse {
    fn process(&mut self) -> bool {
        false
    }

    fn position(&mut self) -> Position2d {
        Position2d::default()
    }

    fn handle_interrupt(&mut self) {
        if self.spim.events_end.read().bits() != 0 {
            self.spim.events_end.write(|w| unsafe { w.bits(0) });
        }
    }
}

const PWM_COUNTERTOP: u16 = 100;
// Output starts high, so the compare value is the high time.
const PWM_FIRST_EDGE_FALLING: u16 = 1 << 15;
const PWM_DECODER_INDIVIDUAL: u32 = 2;
const PWM_PRESCALER_DIV_16: u32 = 4;

/// Open loop drive: degrees turned and millimetres driven per second at speed 100.
const ROTATE_DEG_PER_S: u32 = 360;
const STRAIGHT_MM_PER_S: u32 = 500;
const CPU_HZ: u32 = 64_000_000;

/// H-bridge inputs driven by PWM0, one channel per pin of `MOTOR_PINS`.
pub struct Motors {
    pwm: pac::PWM0_S,
    duty: &'static mut [u16; 4],
}

impl Motors {
    pub fn new(pwm: pac::PWM0_S, duty: &'static mut [u16; 4]) -> Self {
        for (channel, pin) in MOTOR_PINS.iter().enumerate() {
            unsafe { gpio_register(*pin, GPIO_OUTCLR).write_volatile(1 << pin.pin) };
            unsafe { gpio_register(*pin, GPIO_DIRSET).write_volatile(1 << pin.pin) };
            pwm.psel.out[channel].write(|w| unsafe { w.bits(psel(*pin)) });
        }
        pwm.enable.write(|w| unsafe { w.bits(1) });
        pwm.mode.write(|w| unsafe { w.bits(0) });
        pwm.prescaler
            .write(|w| unsafe { w.bits(PWM_PRESCALER_DIV_16) });
        pwm.countertop
            .write(|w| unsafe { w.bits(u32::from(PWM_COUNTERTOP)) });
        pwm.loop_.write(|w| unsafe { w.bits(0) });
        pwm.decoder
            .write(|w| unsafe { w.bits(PWM_DECODER_INDIVIDUAL) });
        pwm.seq0.refresh.write(|w| unsafe { w.bits(0) });
        pwm.seq0.enddelay.write(|w| unsafe { w.bits(0) });
        Self { pwm, duty }
    }

    fn wheel(speed: i16) -> (u16, u16) {
        let magnitude = speed.unsigned_abs().min(PWM_COUNTERTOP);
        if speed >= 0 {
            (magnitude, 0)
        } else {
            (0, magnitude)
        }
    }

    fn run_for(&mut self, left: i16, right: i16, millis: u32) {
        self.set_speed(left, right);
        for _ in 0..millis {
            cortex_m::asm::delay(CPU_HZ / 1000);
        }
        self.set_speed(0, 0);
    }
}

impl Motion for Motors {
    fn set_speed(&mut self, left: i16, right: i16) {
        let (left_forward, left_backward) = Self::wheel(left);
        let (right_forward, right_backward) = Self::wheel(right);
        *self.duty = [
            left_forward | PWM_FIRST_EDGE_FALLING,
            left_backward | PWM_FIRST_EDGE_FALLING,
            right_forward | PWM_FIRST_EDGE_FALLING,
            right_backward | PWM_FIRST_EDGE_FALLING,
        ];
        let sequence = self.duty.as_ptr() as u32;
        self.pwm.seq0.ptr.write(|w| unsafe { w.bits(sequence) });
        self.pwm.seq0.cnt.write(|w| unsafe { w.bits(4) });
        self.pwm.tasks_seqstart[0].write(|w| unsafe { w.bits(1) });
    }

    fn rotate(&mut self, angle: u16, speed: i8) {
        let rate = u32::from(speed.unsigned_abs()).max(1);
        let millis = u32::from(angle) * 1000 * 100 / (ROTATE_DEG_PER_S * rate);
        self.run_for(i16::from(speed), -i16::from(speed), millis);
    }

    fn straight(&mut self, distance: u16, speed: i8) {
        let rate = u32::from(speed.unsigned_abs()).max(1);
        let millis = u32::from(distance) * 1000 * 100 / (STRAIGHT_MM_PER_S * rate);
        self.run_for(i16::from(speed), i16::from(speed), millis);
    }
}

/// Every secure driver the supervisor and the gateway use.
pub struct Board {
    pub nvmc: Nvmc,
    pub saadc: Saadc,
    pub led: Output,
    pub ficr: pac::FICR_S,
    pub lighthouse: Lighthouse,
    pub motors: Motors,
}

impl Board {
    pub fn new(
        nvmc: pac::NVMC_S,
        saadc: pac::SAADC_S,
        ficr: pac::FICR_S,
        spim: pac::SPIM4_S,
        pwm: pac::PWM0_S,
        duty: &'static mut [u16; 4],
    ) -> Self {
        Self {
            nvmc: Nvmc::new(nvmc),
            saadc: Saadc::new(saadc),
            led: Output::new(STATUS_LED),
            ficr,
            lighthouse: Lighthouse::new(spim),
            motors: Motors::new(pwm, duty),
        }
    }
}

impl Flash for Board {
    fn erase_page(&mut self, address: u32) {
        self.nvmc.erase_page(address);
    }

    fn write_words(&mut self, address: u32, words: &[u32]) {
        self.nvmc.write_words(address, words);
    }
}

impl Positioning for Board {
    fn process(&mut self) -> bool {
        self.lighthouse.process()
    }

    fn position(&mut self) -> Position2d {
        self.lighthouse.position()
    }

    fn handle_interrupt(&mut self) {
        self.lighthouse.handle_interrupt();
    }
}

impl AnalogInput for Board {
    fn read(&mut self, channel: AnalogChannel) -> u16 {
        self.saadc.read(channel)
    }
}

impl Motion for Board {
    fn set_speed(&mut self, left: i16, right: i16) {
        self.motors.set_speed(left, right);
    }

    fn rotate(&mut self, angle: u16, speed: i8) {
        self.motors.rotate(angle, speed);
    }

    fn straight(&mut self, distance: u16, speed: i8) {
        self.motors.straight(distance, speed);
    }
}

impl StatusLed for Board {
    fn toggle(&mut self) {
        self.led.toggle();
    }
}

impl DeviceId for Board {
    fn device_id(&self) -> u64 {
        self.ficr.device_id()
    }
}
