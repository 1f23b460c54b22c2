//! Secure-world supervisor for the nRF5340 application core.
//!
//! The supervisor partitions the chip with the SPU, talks to the companion (network) core over a
//! shared record, programs over-the-air images, and either runs its own event loop or hands the
//! CPU to a resident non-secure application that calls back through a small gateway.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_c_cmse_nonsecure_call))]
#![cfg_attr(target_os = "none", feature(cmse_nonsecure_entry))]

#[macro_use]
mod fmt;

pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod gateway;
pub mod hal;
pub mod ota;
pub mod partition;
pub mod protocol;
pub mod remote;
pub mod supervisor;
pub mod watchdog;

#[cfg(target_os = "none")]
pub mod nrf53;

pub use channel::{Channel, CompanionPort, IpcLine, IpcSignals, SharedRecord};
pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use events::{Event, Events, Interrupt};
pub use partition::SecurityPartition;
pub use protocol::{AppStatus, DeviceType, Position2d};
pub use supervisor::{Action, BootMode, ResetReason, Supervisor};
