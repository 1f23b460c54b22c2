//! Error type shared by the supervisor modules.
//!
//! None of these ever leave the secure world as a distinguishable signal: the gateway entry points
//! and the radio request handler drop them, and the remote controller only ever sees notifications
//! that were (or were not) sent.

/// Supervisor error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Error {
    /// Radio packet longer than a PDU can carry
    PacketTooLong,
    /// Log record longer than the shared log buffer
    LogTooLong,
    /// Caller supplied memory overlapping a secure range
    SecureAddress,
    /// Analog channel not exposed to the non-secure side
    InvalidAnalogChannel,
    /// Request not allowed in the current lifecycle state
    InvalidState,
    /// OTA chunk index not below the announced chunk count
    ChunkIndexOutOfRange,
    /// OTA chunk larger than the chunk buffer or than the bytes received
    ChunkTooLong,
    /// OTA image larger than the non-secure flash area
    ImageTooLarge,
    /// OTA chunk digest does not match the announced one
    HashMismatch,
    /// Request payload too short for its type
    MalformedRequest,
    /// Not a supervisor request
    UnknownRequest,
}

pub type Result<T> = core::result::Result<T, Error>;
