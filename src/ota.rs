//! Flash side of an over-the-air update.
//!
//! The companion core validates each request and fills the OTA sub-record; this engine erases
//! the image area and programs chunks from that record. Because the companion core runs
//! non-secure, everything read from the record is bounds checked again before it reaches the
//! flash controller.

use crate::channel::OtaRecord;
use crate::config::{SupervisorConfig, FLASH_SIZE, OTA_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::hal::Flash;

const WORD: usize = core::mem::size_of::<u32>();

/// Result of programming one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWritten {
    pub index: u32,
    /// False for a retransmission of the chunk acknowledged last.
    pub programmed: bool,
    /// The transfer is complete.
    pub last: bool,
}

pub struct OtaEngine {
    base: u32,
    end: u32,
    page_size: u32,
    stride: u32,
    require_erase: bool,
    /// End of the area erased since the last programmed chunk.
    erased_end: u32,
}

impl OtaEngine {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            base: config.image_base,
            end: FLASH_SIZE as u32,
            page_size: config.flash_page_size,
            stride: config.chunk_stride,
            require_erase: true,
            erased_end: config.image_base,
        }
    }

    /// Number of pages covering `image_size` bytes.
    pub fn page_count(&self, image_size: u32) -> u32 {
        image_size.div_ceil(self.page_size)
    }

    pub fn requires_erase(&self) -> bool {
        self.require_erase
    }

    /// Prepares the image area for a new transfer. The pages covering `image_size` are erased
    /// when something was programmed since the last erase; otherwise only the pages a larger
    /// image adds past the area already erased are.
    pub fn start<F: Flash>(&mut self, ota: &OtaRecord, flash: &mut F) -> Result<()> {
        if ota.image_size > self.end - self.base {
            warn!("Image of {} bytes does not fit", ota.image_size);
            return Err(Error::ImageTooLarge);
        }

        let image_end = self.base + self.page_count(ota.image_size) * self.page_size;
        if self.require_erase {
            self.erased_end = self.base;
        }
        if image_end > self.erased_end {
            info!(
                "Pages to erase: {}",
                (image_end - self.erased_end) / self.page_size
            );
            for address in (self.erased_end..image_end).step_by(self.page_size as usize) {
                trace!("Erasing page {} at {:#x}", address / self.page_size, address);
                flash.erase_page(address);
            }
            info!("Erasing done");
            self.erased_end = image_end;
        }
        self.require_erase = false;

        Ok(())
    }

    /// Programs the chunk held in `ota` at `base + index * stride`. A retransmission of the
    /// chunk acknowledged last is acknowledged again without touching flash.
    pub fn write_chunk<F: Flash>(&mut self, ota: &OtaRecord, flash: &mut F) -> Result<ChunkWritten> {
        if ota.chunk_index >= ota.chunk_count {
            return Err(Error::ChunkIndexOutOfRange);
        }
        if ota.chunk_size as usize > OTA_CHUNK_SIZE {
            return Err(Error::ChunkTooLong);
        }

        let address = ota
            .chunk_index
            .checked_mul(self.stride)
            .and_then(|offset| self.base.checked_add(offset))
            .filter(|address| address.saturating_add(ota.chunk_size) <= self.end)
            .ok_or(Error::ChunkIndexOutOfRange)?;

        let programmed = !ota.is_duplicate();
        if programmed {
            debug!(
                "Writing chunk {}/{} at {:#x}",
                ota.chunk_index,
                ota.chunk_count - 1,
                address
            );
            let mut words = [u32::MAX; OTA_CHUNK_SIZE / WORD];
            let data = ota.chunk_data();
            for (word, bytes) in words.iter_mut().zip(data.chunks(WORD)) {
                let mut padded = [0xFF; WORD];
                padded[..bytes.len()].copy_from_slice(bytes);
                *word = u32::from_le_bytes(padded);
            }
            flash.write_words(address, &words[..data.len().div_ceil(WORD)]);
            self.require_erase = true;
        }

        Ok(ChunkWritten {
            index: ota.chunk_index,
            programmed,
            last: ota.is_last_chunk(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingFlash {
        erased: Vec<u32>,
        writes: Vec<(u32, Vec<u32>)>,
    }

    impl Flash for RecordingFlash {
        fn erase_page(&mut self, address: u32) {
            self.erased.push(address);
        }

        fn write_words(&mut self, address: u32, words: &[u32]) {
            self.writes.push((address, words.to_vec()));
        }
    }

    fn record(index: u32, count: u32, data: &[u8]) -> OtaRecord {
        let mut ota = OtaRecord::EMPTY;
        ota.image_size = count.saturating_mul(OTA_CHUNK_SIZE as u32);
        ota.chunk_count = count;
        ota.chunk_index = index;
        ota.chunk_size = data.len() as u32;
        ota.chunk[..data.len()].copy_from_slice(data);
        ota
    }

    #[test]
    fn erases_covering_pages_once() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let mut ota = OtaRecord::EMPTY;
        ota.image_size = 4097;

        engine.start(&ota, &mut flash).unwrap();
        assert_eq!(flash.erased, vec![0x10000, 0x11000]);

        engine.start(&ota, &mut flash).unwrap();
        assert_eq!(flash.erased.len(), 2);
    }

    #[test]
    fn larger_restart_erases_only_the_added_pages() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let mut ota = OtaRecord::EMPTY;

        ota.image_size = 4096;
        engine.start(&ota, &mut flash).unwrap();
        ota.image_size = 8192;
        engine.start(&ota, &mut flash).unwrap();
        assert_eq!(flash.erased, vec![0x10000, 0x11000]);

        ota.image_size = 2048;
        engine.start(&ota, &mut flash).unwrap();
        assert_eq!(flash.erased.len(), 2);
    }

    #[test]
    fn restart_after_programming_erases_from_the_base() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let mut ota = record(0, 2, &[0xAB; 128]);
        ota.image_size = 8192;

        engine.start(&ota, &mut flash).unwrap();
        engine.write_chunk(&ota, &mut flash).unwrap();
        ota.image_size = 4096;
        engine.start(&ota, &mut flash).unwrap();
        assert_eq!(flash.erased, vec![0x10000, 0x11000, 0x10000]);
    }

    #[test]
    fn programmed_chunk_rearms_erase() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let ota = record(0, 2, &[0xAB; 128]);

        engine.start(&ota, &mut flash).unwrap();
        assert!(!engine.requires_erase());
        engine.write_chunk(&ota, &mut flash).unwrap();
        assert!(engine.requires_erase());
    }

    #[test]
    fn chunk_lands_at_stride_and_is_padded() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let ota = record(3, 4, &[1, 2, 3, 4, 5]);

        let written = engine.write_chunk(&ota, &mut flash).unwrap();
        assert_eq!(
            written,
            ChunkWritten {
                index: 3,
                programmed: true,
                last: true
            }
        );
        assert_eq!(
            flash.writes,
            vec![(0x10000 + 3 * 128, vec![0x0403_0201, 0xFFFF_FF05])]
        );
    }

    #[test]
    fn duplicate_is_acknowledged_without_write() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let mut ota = record(1, 4, &[7; 128]);
        ota.last_chunk_acked = 1;

        let written = engine.write_chunk(&ota, &mut flash).unwrap();
        assert!(!written.programmed);
        assert!(!written.last);
        assert!(flash.writes.is_empty());
    }

    #[test]
    fn rejects_out_of_range_chunks() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();

        let ota = record(2, 2, &[0; 16]);
        assert_eq!(
            engine.write_chunk(&ota, &mut flash),
            Err(Error::ChunkIndexOutOfRange)
        );

        let mut ota = record(0, 1, &[0; 16]);
        ota.chunk_size = 200;
        assert_eq!(
            engine.write_chunk(&ota, &mut flash),
            Err(Error::ChunkTooLong)
        );

        let ota = record(u32::MAX - 1, u32::MAX, &[0; 16]);
        assert_eq!(
            engine.write_chunk(&ota, &mut flash),
            Err(Error::ChunkIndexOutOfRange)
        );
        assert!(flash.writes.is_empty());
    }

    #[test]
    fn refuses_image_larger_than_flash() {
        let mut engine = OtaEngine::new(&SupervisorConfig::DEFAULT);
        let mut flash = RecordingFlash::default();
        let mut ota = OtaRecord::EMPTY;
        ota.image_size = FLASH_SIZE as u32;

        assert_eq!(engine.start(&ota, &mut flash), Err(Error::ImageTooLarge));
        assert!(flash.erased.is_empty());
    }
}
