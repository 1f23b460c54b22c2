//! nRF5340 application core drivers behind the portable traits, plus the pieces that only make
//! sense on the chip: the non-secure callable entries and the jump into the resident image.

pub mod board;
pub mod entry;
pub mod ipc;
pub mod launch;
pub mod nvmc;
pub mod spu;
pub mod wdt;

pub use board::Board;
pub use ipc::Ipc;
pub use nvmc::Nvmc;
pub use spu::Spu;
