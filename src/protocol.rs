//! Radio-facing wire format.
//!
//! Requests come from the remote controller, notifications go back to it. Byte codes and field
//! order are fixed by the controller side; multi-byte integers are little-endian.

use heapless::Vec;

use crate::config::{Pin, OTA_CHUNK_SIZE};
use crate::error::{Error, Result};

/// Largest radio payload.
pub const MAX_PDU_LEN: usize = 255;

/// Tag of a framed application data packet.
pub const PACKET_DATA: u8 = 16;

/// Bytes of the SHA-256 digest carried with each OTA chunk.
pub const OTA_DIGEST_LEN: usize = 8;

pub type Frame = Vec<u8, MAX_PDU_LEN>;

pub const REQUEST_STATUS: u8 = 0x80;
pub const REQUEST_START: u8 = 0x81;
pub const REQUEST_STOP: u8 = 0x82;
pub const REQUEST_RESET: u8 = 0x83;
pub const REQUEST_OTA_START: u8 = 0x84;
pub const REQUEST_OTA_CHUNK: u8 = 0x85;

pub const NOTIFICATION_STATUS: u8 = 0x90;
pub const NOTIFICATION_OTA_START_ACK: u8 = 0x93;
pub const NOTIFICATION_OTA_CHUNK_ACK: u8 = 0x94;
pub const NOTIFICATION_GPIO_EVENT: u8 = 0x95;
pub const NOTIFICATION_LOG_EVENT: u8 = 0x96;

/// Lifecycle of the resident application, as both cores and the controller see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(u8)]
pub enum AppStatus {
    Ready = 0,
    Running = 1,
    Stopping = 2,
    Resetting = 3,
    Programming = 4,
}

impl AppStatus {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ready),
            1 => Some(Self::Running),
            2 => Some(Self::Stopping),
            3 => Some(Self::Resetting),
            4 => Some(Self::Programming),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceType {
    Unknown = 0,
    DotBotV3 = 1,
    DotBotV2 = 2,
    Nrf5340Dk = 3,
}

/// Position in the arena, both axes in micrometres.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(C)]
pub struct Position2d {
    pub x: u32,
    pub y: u32,
}

impl Position2d {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    fn from_le(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            x: read_u32(bytes, 0)?,
            y: read_u32(bytes, 4)?,
        })
    }
}

/// One slice of an OTA image, as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaChunk<'a> {
    pub index: u32,
    pub digest: [u8; OTA_DIGEST_LEN],
    pub data: &'a [u8],
}

/// Supervisor request sent by the remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Status,
    Start,
    Stop,
    Reset { target: Position2d },
    OtaStart { image_size: u32, chunk_count: u32 },
    OtaChunk(OtaChunk<'a>),
}

impl<'a> Request<'a> {
    /// Decodes a request packet. Packets that are not supervisor requests yield
    /// [`Error::UnknownRequest`] so the caller can route them elsewhere.
    pub fn parse(packet: &'a [u8]) -> Result<Self> {
        let (&kind, body) = packet.split_first().ok_or(Error::MalformedRequest)?;
        match kind {
            REQUEST_STATUS => Ok(Self::Status),
            REQUEST_START => Ok(Self::Start),
            REQUEST_STOP => Ok(Self::Stop),
            REQUEST_RESET => Ok(Self::Reset {
                target: Position2d::from_le(body)?,
            }),
            REQUEST_OTA_START => Ok(Self::OtaStart {
                image_size: read_u32(body, 0)?,
                chunk_count: read_u32(body, 4)?,
            }),
            REQUEST_OTA_CHUNK => {
                const HEADER: usize = 4 + 1 + OTA_DIGEST_LEN;

                let index = read_u32(body, 0)?;
                let size = *body.get(4).ok_or(Error::MalformedRequest)? as usize;
                let digest: [u8; OTA_DIGEST_LEN] = body
                    .get(5..HEADER)
                    .and_then(|d| d.try_into().ok())
                    .ok_or(Error::MalformedRequest)?;
                let payload = &body[HEADER..];
                if size > OTA_CHUNK_SIZE || size > payload.len() {
                    return Err(Error::ChunkTooLong);
                }

                Ok(Self::OtaChunk(OtaChunk {
                    index,
                    digest,
                    data: &payload[..size],
                }))
            }
            _ => Err(Error::UnknownRequest),
        }
    }
}

/// Message sent back to the remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification<'a> {
    Status {
        device_type: DeviceType,
        status: AppStatus,
        battery_mv: u16,
        position: Position2d,
    },
    OtaStartAck,
    OtaChunkAck {
        index: u32,
    },
    GpioEvent {
        timestamp: u32,
        pin: Pin,
        value: u8,
    },
    LogEvent {
        timestamp: u32,
        data: &'a [u8],
    },
}

impl Notification<'_> {
    pub fn encode(&self) -> Result<Frame> {
        let mut frame = Frame::new();
        match *self {
            Self::Status {
                device_type,
                status,
                battery_mv,
                position,
            } => {
                put(&mut frame, &[NOTIFICATION_STATUS, device_type as u8, status as u8])?;
                put(&mut frame, &battery_mv.to_le_bytes())?;
                put(&mut frame, &position.x.to_le_bytes())?;
                put(&mut frame, &position.y.to_le_bytes())?;
            }
            Self::OtaStartAck => put(&mut frame, &[NOTIFICATION_OTA_START_ACK])?,
            Self::OtaChunkAck { index } => {
                put(&mut frame, &[NOTIFICATION_OTA_CHUNK_ACK])?;
                put(&mut frame, &index.to_le_bytes())?;
            }
            Self::GpioEvent {
                timestamp,
                pin,
                value,
            } => {
                put(&mut frame, &[NOTIFICATION_GPIO_EVENT])?;
                put(&mut frame, &timestamp.to_le_bytes())?;
                put(&mut frame, &[pin.port, pin.pin, value])?;
            }
            Self::LogEvent { timestamp, data } => {
                let length = u8::try_from(data.len()).map_err(|_| Error::PacketTooLong)?;
                put(&mut frame, &[NOTIFICATION_LOG_EVENT])?;
                put(&mut frame, &timestamp.to_le_bytes())?;
                put(&mut frame, &[length])?;
                put(&mut frame, data)?;
            }
        }
        Ok(frame)
    }
}

/// Wraps an application payload as `[PACKET_DATA, len, payload..]`.
pub fn frame_data(payload: &[u8]) -> Result<Frame> {
    let length = u8::try_from(payload.len()).map_err(|_| Error::PacketTooLong)?;
    let mut frame = Frame::new();
    put(&mut frame, &[PACKET_DATA, length])?;
    put(&mut frame, payload)?;
    Ok(frame)
}

fn put(frame: &mut Frame, bytes: &[u8]) -> Result<()> {
    frame.extend_from_slice(bytes).map_err(|_| Error::PacketTooLong)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(Error::MalformedRequest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ota_start() {
        let packet = [REQUEST_OTA_START, 0x00, 0x01, 0, 0, 2, 0, 0, 0];
        assert_eq!(
            Request::parse(&packet),
            Ok(Request::OtaStart {
                image_size: 256,
                chunk_count: 2
            })
        );
    }

    #[test]
    fn parses_ota_chunk_and_trims_payload() {
        let mut packet = [0u8; 1 + 4 + 1 + 8 + 6];
        packet[0] = REQUEST_OTA_CHUNK;
        packet[1..5].copy_from_slice(&7u32.to_le_bytes());
        packet[5] = 4;
        packet[6..14].copy_from_slice(&[9; 8]);
        packet[14..].copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        let Ok(Request::OtaChunk(chunk)) = Request::parse(&packet) else {
            panic!("not a chunk");
        };
        assert_eq!(chunk.index, 7);
        assert_eq!(chunk.digest, [9; 8]);
        assert_eq!(chunk.data, &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_chunk_size_beyond_payload() {
        let mut packet = [0u8; 1 + 4 + 1 + 8 + 2];
        packet[0] = REQUEST_OTA_CHUNK;
        packet[5] = 3;
        assert_eq!(Request::parse(&packet), Err(Error::ChunkTooLong));
    }

    #[test]
    fn truncated_reset_is_malformed() {
        assert_eq!(
            Request::parse(&[REQUEST_RESET, 1, 2, 3]),
            Err(Error::MalformedRequest)
        );
        assert_eq!(Request::parse(&[]), Err(Error::MalformedRequest));
    }

    #[test]
    fn other_packets_are_not_requests() {
        assert_eq!(Request::parse(&[PACKET_DATA, 0]), Err(Error::UnknownRequest));
    }

    #[test]
    fn status_layout() {
        let frame = Notification::Status {
            device_type: DeviceType::DotBotV3,
            status: AppStatus::Resetting,
            battery_mv: 2950,
            position: Position2d::new(1, 0x0102_0304),
        }
        .encode()
        .unwrap();
        assert_eq!(
            frame.as_slice(),
            &[0x90, 1, 3, 0x86, 0x0b, 1, 0, 0, 0, 4, 3, 2, 1]
        );
    }

    #[test]
    fn log_event_layout() {
        let frame = Notification::LogEvent {
            timestamp: 5,
            data: b"hi",
        }
        .encode()
        .unwrap();
        assert_eq!(frame.as_slice(), &[0x96, 5, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn gpio_event_layout() {
        let frame = Notification::GpioEvent {
            timestamp: 0x0102_0304,
            pin: Pin::new(1, 5),
            value: 1,
        }
        .encode()
        .unwrap();
        assert_eq!(frame.as_slice(), &[0x95, 4, 3, 2, 1, 1, 5, 1]);
    }

    #[test]
    fn framed_data_must_fit_a_pdu() {
        assert_eq!(frame_data(&[0xAA; 253]).map(|f| f.len()), Ok(255));
        assert_eq!(frame_data(&[0xAA; 254]), Err(Error::PacketTooLong));
    }
}
