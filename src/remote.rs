//! Companion core side of the remote-control protocol.
//!
//! The network core firmware in service is a separate C image that shares the record layout;
//! this is the same dispatcher for a network core image linked against this crate.
//!
//! Decodes supervisor requests received over the radio, gates them on the lifecycle state,
//! verifies OTA chunks and hands the work to the supervisor through the shared record and the
//! signalling lines. Rejected requests are dropped; the controller retries on its own.

use sha2::{Digest, Sha256};

use crate::channel::{CompanionPort, IpcLine, IpcSignals};
use crate::error::{Error, Result};
use crate::protocol::{
    AppStatus, DeviceType, Frame, Notification, OtaChunk, Request, OTA_DIGEST_LEN,
};

/// What to do with a received packet once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Request accepted, nothing to send back
    Accepted,
    /// Request answered with a notification
    Reply(Frame),
    /// Application packet stored for the resident application
    Forwarded,
}

/// First bytes of the SHA-256 digest of `data`.
pub fn chunk_digest(data: &[u8]) -> [u8; OTA_DIGEST_LEN] {
    let digest = Sha256::digest(data);
    let mut truncated = [0; OTA_DIGEST_LEN];
    truncated.copy_from_slice(&digest[..OTA_DIGEST_LEN]);
    truncated
}

pub fn handle_packet<S: IpcSignals>(port: &mut CompanionPort<'_, S>, packet: &[u8]) -> Result<Outcome> {
    match Request::parse(packet) {
        Ok(request) => handle_request(port, request),
        Err(Error::UnknownRequest) => forward(port, packet),
        Err(e) => Err(e),
    }
}

fn handle_request<S: IpcSignals>(port: &mut CompanionPort<'_, S>, request: Request<'_>) -> Result<Outcome> {
    let status = port.status();
    match request {
        Request::Status => return status_notification(port).map(Outcome::Reply),
        Request::Start => {
            require(status, &[AppStatus::Ready])?;
            info!("Start request received");
            port.signal(IpcLine::AppStart);
        }
        Request::Stop => {
            require(
                status,
                &[AppStatus::Running, AppStatus::Resetting, AppStatus::Programming],
            )?;
            info!("Stop request received");
            port.set_status(AppStatus::Stopping);
            port.signal(IpcLine::AppStop);
        }
        Request::Reset { target } => {
            require(status, &[AppStatus::Ready])?;
            info!("Reset request received");
            port.set_target_position(target);
            port.set_status(AppStatus::Resetting);
        }
        Request::OtaStart {
            image_size,
            chunk_count,
        } => {
            require(status, &[AppStatus::Ready, AppStatus::Programming])?;
            port.lock().update_ota(|ota| {
                ota.image_size = image_size;
                ota.chunk_count = chunk_count;
                ota.last_chunk_acked = -1;
            });
            port.set_status(AppStatus::Programming);
            info!(
                "OTA start request received (size: {}, chunks: {})",
                image_size, chunk_count
            );
            port.signal(IpcLine::OtaStart);
        }
        Request::OtaChunk(chunk) => {
            require(status, &[AppStatus::Programming])?;
            stage_chunk(port, &chunk)?;
            port.signal(IpcLine::OtaChunk);
        }
    }
    Ok(Outcome::Accepted)
}

fn stage_chunk<S: IpcSignals>(port: &mut CompanionPort<'_, S>, chunk: &OtaChunk<'_>) -> Result<()> {
    let mut guard = port.lock();
    let ota = guard.ota();
    if chunk.index >= ota.chunk_count {
        warn!("Invalid chunk index {}", chunk.index);
        return Err(Error::ChunkIndexOutOfRange);
    }

    if i64::from(ota.last_chunk_acked) == i64::from(chunk.index) {
        guard.update_ota(|ota| ota.chunk_index = chunk.index);
        return Ok(());
    }

    if chunk_digest(chunk.data) != chunk.digest {
        warn!("Digest mismatch for chunk {}", chunk.index);
        return Err(Error::HashMismatch);
    }

    debug!("Chunk {} verified ({} bytes)", chunk.index, chunk.data.len());
    guard.update_ota(|ota| {
        ota.chunk_index = chunk.index;
        ota.chunk_size = chunk.data.len() as u32;
        ota.chunk[..chunk.data.len()].copy_from_slice(chunk.data);
    });
    Ok(())
}

fn forward<S: IpcSignals>(port: &mut CompanionPort<'_, S>, packet: &[u8]) -> Result<Outcome> {
    if port.status() != AppStatus::Running {
        return Err(Error::InvalidState);
    }
    port.deliver_rx(packet)?;
    Ok(Outcome::Forwarded)
}

fn require(status: AppStatus, allowed: &[AppStatus]) -> Result<()> {
    if allowed.contains(&status) {
        Ok(())
    } else {
        debug!("Request refused in state {}", status);
        Err(Error::InvalidState)
    }
}

/// Periodic status report.
pub fn status_notification<S: IpcSignals>(port: &CompanionPort<'_, S>) -> Result<Frame> {
    let device_type = match port.device_type() {
        1 => DeviceType::DotBotV3,
        2 => DeviceType::DotBotV2,
        3 => DeviceType::Nrf5340Dk,
        _ => DeviceType::Unknown,
    };
    Notification::Status {
        device_type,
        status: port.status(),
        battery_mv: port.battery_level(),
        position: port.current_position(),
    }
    .encode()
}

/// Wraps the pending log record for the controller.
pub fn log_notification<S: IpcSignals>(port: &CompanionPort<'_, S>, timestamp: u32) -> Result<Frame> {
    port.with_log(|data| Notification::LogEvent { timestamp, data }.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SharedRecord;
    use crate::protocol::{Position2d, REQUEST_OTA_CHUNK, REQUEST_OTA_START, REQUEST_RESET};

    #[derive(Default)]
    struct Lines {
        raised: Vec<IpcLine>,
    }

    impl IpcSignals for &mut Lines {
        fn signal(&mut self, line: IpcLine) {
            self.raised.push(line);
        }

        fn take_event(&mut self, _line: IpcLine) -> bool {
            false
        }

        fn try_lock(&mut self) -> bool {
            true
        }

        fn unlock(&mut self) {}

        fn companion_released(&self) -> bool {
            true
        }

        fn release_companion(&mut self) {}
    }

    fn chunk_packet(index: u32, data: &[u8], digest: [u8; 8]) -> Vec<u8> {
        let mut packet = vec![REQUEST_OTA_CHUNK];
        packet.extend_from_slice(&index.to_le_bytes());
        packet.push(data.len() as u8);
        packet.extend_from_slice(&digest);
        packet.extend_from_slice(data);
        packet
    }

    #[test]
    fn digest_is_truncated_sha256() {
        assert_eq!(
            chunk_digest(b"abc"),
            [0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea]
        );
    }

    #[test]
    fn reset_only_from_ready() {
        let record = SharedRecord::new();
        let mut lines = Lines::default();
        let mut port = CompanionPort::new(&record, &mut lines);
        let mut packet = vec![REQUEST_RESET];
        packet.extend_from_slice(&5u32.to_le_bytes());
        packet.extend_from_slice(&6u32.to_le_bytes());

        assert_eq!(handle_packet(&mut port, &packet), Ok(Outcome::Accepted));
        assert_eq!(port.status(), AppStatus::Resetting);
        assert_eq!(handle_packet(&mut port, &packet), Err(Error::InvalidState));
    }

    #[test]
    fn chunk_with_bad_digest_is_not_signalled() {
        let record = SharedRecord::new();
        let mut lines = Lines::default();
        {
            let mut port = CompanionPort::new(&record, &mut lines);
            let mut start = vec![REQUEST_OTA_START];
            start.extend_from_slice(&128u32.to_le_bytes());
            start.extend_from_slice(&1u32.to_le_bytes());
            handle_packet(&mut port, &start).unwrap();

            let data = [0x42; 128];
            let packet = chunk_packet(0, &data, [0; 8]);
            assert_eq!(handle_packet(&mut port, &packet), Err(Error::HashMismatch));

            let packet = chunk_packet(1, &data, chunk_digest(&data));
            assert_eq!(
                handle_packet(&mut port, &packet),
                Err(Error::ChunkIndexOutOfRange)
            );
        }
        assert_eq!(lines.raised, vec![IpcLine::OtaStart]);
    }

    #[test]
    fn status_reports_shared_fields() {
        let record = SharedRecord::new();
        let mut lines = Lines::default();
        let mut port = CompanionPort::new(&record, &mut lines);
        let Ok(Outcome::Reply(frame)) = handle_packet(&mut port, &[0x80]) else {
            panic!("no status reply");
        };
        assert_eq!(frame.as_slice(), &[0x90, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Position2d::default(), port.current_position());
    }

    #[test]
    fn application_packets_need_a_running_application() {
        let record = SharedRecord::new();
        let mut lines = Lines::default();
        let mut port = CompanionPort::new(&record, &mut lines);
        assert_eq!(handle_packet(&mut port, &[16, 1, 9]), Err(Error::InvalidState));
        port.set_status(AppStatus::Running);
        assert_eq!(handle_packet(&mut port, &[16, 1, 9]), Ok(Outcome::Forwarded));
    }
}
