#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(target_os = "none", no_std)]

#[cfg(target_os = "none")]
mod firmware {
    use cortex_m::peripheral::{syst::SystClkSource, NVIC, SCB};
    use cortex_m_rt::{entry, exception, ExceptionFrame};
    use nrf5340_app_pac::{self as pac, interrupt};

    use nrf53_spm_rs::channel::{Channel, IpcLine, SharedRecord};
    use nrf53_spm_rs::config::SupervisorConfig;
    use nrf53_spm_rs::events::{Events, Interrupt};
    use nrf53_spm_rs::gateway::Gateway;
    use nrf53_spm_rs::nrf53::{entry as gateway_entry, ipc, launch, wdt, Board, Ipc, Spu};
    use nrf53_spm_rs::partition::SecurityPartition;
    use nrf53_spm_rs::protocol::AppStatus;
    use nrf53_spm_rs::supervisor::{start_companion, Action, BootMode, ResetReason, Supervisor};
    use nrf53_spm_rs::watchdog::{Watchdog, WatchdogConfig};

    use defmt_rtt as _;

    const CPU_HZ: u32 = 64_000_000;
    const TICK_MS: u32 = 100;

    const CONFIG: SupervisorConfig = SupervisorConfig::DEFAULT;

    #[link_section = ".shared_data"]
    static SHARED: SharedRecord = SharedRecord::new();

    static EVENTS: Events = Events::new(TICK_MS, &CONFIG);

    /// Lines the IPC interrupt is enabled for.
    const WAKE_LINES: [IpcLine; 3] = [IpcLine::AppStart, IpcLine::OtaStart, IpcLine::OtaChunk];

    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        cortex_m::interrupt::disable();

        // Make this a hardfault. This has a lot of advantages:
        // - No interrupt can interrupt a hardfault
        // - Recursion cannot happen because the hardware prevents that
        // - It is the natural endpoint for program failures on cortex-m
        cortex_m::asm::udf();
    }

    #[exception]
    fn SecureFault() {
        cortex_m::interrupt::disable();
        cortex_m::asm::udf();
    }

    // A fault inside the fault handler locks the core up, and a lockup reset keeps the
    // supervisor in control on the next boot.
    #[exception]
    unsafe fn HardFault(_frame: &ExceptionFrame) -> ! {
        cortex_m::asm::udf();
    }

    #[exception]
    fn SysTick() {
        Interrupt::Tick.dispatch(&EVENTS);
    }

    #[exception]
    unsafe fn DefaultHandler(irqn: i16) {
        Interrupt::Unhandled(irqn).dispatch(&EVENTS);
    }

    #[interrupt]
    fn IPC() {
        for line in WAKE_LINES {
            if ipc::take_event(line) {
                Interrupt::Ipc(line).dispatch(&EVENTS);
            }
        }
    }

    #[entry]
    fn main() -> ! {
        let chip = pac::Peripherals::take().unwrap();
        let mut cpu = cortex_m::Peripherals::take().unwrap();
        let duty = cortex_m::singleton!(: [u16; 4] = [0; 4]).unwrap();

        wdt::start_on_dppi(&chip.WDT1_S, ipc::STOP_DPPI_CHANNEL);
        let _stop_watchdog = Watchdog::new(chip.WDT1_S, &WatchdogConfig::STOP);

        let partition = SecurityPartition::new(Spu::new(chip.SPU_S)).configure();

        let mut ipc = Ipc::new(chip.IPC_S, chip.MUTEX_NS, chip.RESET_S);
        ipc.configure(&chip.DPPIC_S);
        let reason = ResetReason(ipc.take_reset_reason());

        SHARED.clear();
        let mut channel = Channel::new(&SHARED, ipc);
        start_companion(&mut channel, &CONFIG);

        let board = Board::new(
            chip.NVMC_S,
            chip.SAADC_S,
            chip.FICR_S,
            chip.SPIM4_S,
            chip.PWM0_S,
            duty,
        );

        let mode = reason.boot_mode();
        defmt::info!("Reset reason {:#X}: {}", reason.0, mode);

        if mode == BootMode::LaunchApplication {
            channel.set_status(AppStatus::Running);
            let _delegated = partition.hand_off();

            let mut watchdog = Watchdog::new(chip.WDT0_S, &WatchdogConfig::APPLICATION);
            watchdog.start();
            gateway_entry::install(Gateway::new(channel, board, watchdog));

            unsafe { launch::non_secure_jump(cpu, CONFIG.image_base) }
        }

        cpu.SYST.set_clock_source(SystClkSource::Core);
        cpu.SYST.set_reload(CPU_HZ / 1000 * TICK_MS - 1);
        cpu.SYST.clear_current();
        cpu.SYST.enable_interrupt();
        cpu.SYST.enable_counter();
        unsafe { NVIC::unmask(pac::Interrupt::IPC) };

        let mut supervisor = Supervisor::new(channel, board, &CONFIG);
        loop {
            cortex_m::asm::wfe();
            if supervisor.poll(&EVENTS) == Action::SystemReset {
                SCB::sys_reset();
            }
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
