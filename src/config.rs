//! Persisted filter settings.
//!
//! One record at a fixed flash offset: a `u32` marker followed by a `u32` filter word, both
//! little endian. The learned flag is not persisted.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::filter::FilterState;

pub const CONFIG_MARKER: u32 = 0xF00F_C7C8;
pub const RECORD_LEN: usize = 8;

bitfield! {
    /// `channel_mask << 16 | note_max << 8 | note_min`
    #[derive(Clone, Copy, Eq, PartialEq)]
    pub struct FilterWord(u32);
    impl Debug;
    pub u8, note_min, set_note_min: 7, 0;
    pub u8, note_max, set_note_max: 15, 8;
    pub u16, channel_mask, set_channel_mask: 31, 16;
}

impl From<&FilterState> for FilterWord {
    fn from(filter: &FilterState) -> Self {
        let mut word = FilterWord(0);
        word.set_note_min(filter.note_min);
        word.set_note_max(filter.note_max);
        word.set_channel_mask(filter.channel_mask);
        word
    }
}

impl From<FilterWord> for FilterState {
    fn from(word: FilterWord) -> Self {
        FilterState {
            channel_mask: word.channel_mask(),
            note_min: word.note_min(),
            note_max: word.note_max(),
            range_learned: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashFault {
    NotAligned,
    OutOfBounds,
    Other,
}

impl From<NorFlashErrorKind> for FlashFault {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => FlashFault::NotAligned,
            NorFlashErrorKind::OutOfBounds => FlashFault::OutOfBounds,
            _ => FlashFault::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Blank or foreign flash content
    BadMarker(u32),
    Flash(FlashFault),
}

impl From<FlashFault> for ConfigError {
    fn from(fault: FlashFault) -> Self {
        ConfigError::Flash(fault)
    }
}

pub fn encode(filter: &FilterState) -> [u8; RECORD_LEN] {
    let mut record = [0; RECORD_LEN];
    record[..4].copy_from_slice(&CONFIG_MARKER.to_le_bytes());
    record[4..].copy_from_slice(&FilterWord::from(filter).0.to_le_bytes());
    record
}

pub fn decode(record: &[u8; RECORD_LEN]) -> Result<FilterState, ConfigError> {
    let marker = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    if marker != CONFIG_MARKER {
        return Err(ConfigError::BadMarker(marker));
    }
    let word = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
    Ok(FilterWord(word).into())
}

/// Non-volatile home of the filter.
pub trait ConfigStore {
    /// `None` if nothing valid was stored.
    fn load(&mut self) -> Option<FilterState>;

    /// Persist, skipping the write if the stored settings are the same. Failures stay with the
    /// store, the caller does not act on them.
    fn store(&mut self, filter: &FilterState);
}

/// Config record in one erasable page of NOR flash.
pub struct FlashConfigStore<F> {
    flash: F,
    offset: u32,
    last_error: Option<ConfigError>,
}

impl<F: NorFlash> FlashConfigStore<F> {
    /// `offset` must be the start of an erase page.
    pub fn new(flash: F, offset: u32) -> Self {
        Self {
            flash,
            offset,
            last_error: None,
        }
    }

    /// Last failed load or store, if any.
    pub fn last_error(&self) -> Option<ConfigError> {
        self.last_error
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn read_record(&mut self) -> Result<FilterState, ConfigError> {
        let mut record = [0; RECORD_LEN];
        self.flash.read(self.offset, &mut record).map_err(fault)?;
        decode(&record)
    }

    fn write_record(&mut self, filter: &FilterState) -> Result<(), ConfigError> {
        let page = F::ERASE_SIZE as u32;
        self.flash.erase(self.offset, self.offset + page).map_err(fault)?;
        self.flash.write(self.offset, &encode(filter)).map_err(fault)?;
        Ok(())
    }
}

fn fault<E: NorFlashError>(err: E) -> ConfigError {
    ConfigError::Flash(err.kind().into())
}

impl<F: NorFlash> ConfigStore for FlashConfigStore<F> {
    fn load(&mut self) -> Option<FilterState> {
        match self.read_record() {
            Ok(filter) => {
                debug!("loaded filter {:?}", filter);
                Some(filter)
            }
            Err(ConfigError::BadMarker(marker)) => {
                info!("no stored filter (marker {})", marker);
                None
            }
            Err(err) => {
                error!("config load failed {:?}", err);
                self.last_error = Some(err);
                None
            }
        }
    }

    fn store(&mut self, filter: &FilterState) {
        if let Ok(stored) = self.read_record() {
            if stored.same_settings(filter) {
                trace!("filter unchanged, not writing");
                return;
            }
        }
        match self.write_record(filter) {
            Ok(()) => {
                info!("stored filter {:?}", filter);
                self.last_error = None;
            }
            Err(err) => {
                error!("config store failed {:?}", err);
                self.last_error = Some(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage::nor_flash::ErrorType;

    use super::*;

    const PAGE: usize = 64;

    struct RamFlash {
        data: [u8; PAGE * 2],
        erases: usize,
        writes: usize,
        broken: bool,
    }

    impl RamFlash {
        fn new() -> Self {
            Self {
                data: [0xFF; PAGE * 2],
                erases: 0,
                writes: 0,
                broken: false,
            }
        }
    }

    impl ErrorType for RamFlash {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for RamFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let src = self.data.get(start..start + bytes.len()).ok_or(NorFlashErrorKind::OutOfBounds)?;
            bytes.copy_from_slice(src);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl NorFlash for RamFlash {
        const WRITE_SIZE: usize = 2;
        const ERASE_SIZE: usize = PAGE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            if self.broken {
                return Err(NorFlashErrorKind::Other);
            }
            if from as usize % PAGE != 0 || to as usize % PAGE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            self.data[from as usize..to as usize].fill(0xFF);
            self.erases += 1;
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            self.data[start..start + bytes.len()].copy_from_slice(bytes);
            self.writes += 1;
            Ok(())
        }
    }

    fn learned() -> FilterState {
        FilterState {
            channel_mask: 0x0012,
            note_min: 36,
            note_max: 72,
            range_learned: true,
        }
    }

    #[test]
    fn record_layout() {
        let record = encode(&learned());
        assert_eq!(record, [0xC8, 0xC7, 0x0F, 0xF0, 36, 72, 0x12, 0x00]);
        let filter = decode(&record).unwrap();
        assert_eq!((filter.channel_mask, filter.note_min, filter.note_max), (0x12, 36, 72));
        assert!(!filter.range_learned);
    }

    #[test]
    fn wrong_marker_is_rejected() {
        let mut record = encode(&learned());
        record[0] ^= 1;
        assert_eq!(decode(&record), Err(ConfigError::BadMarker(0xF00F_C7C9)));
    }

    #[test]
    fn blank_flash_loads_nothing() {
        let mut store = FlashConfigStore::new(RamFlash::new(), PAGE as u32);
        assert_eq!(store.load(), None);
        assert_eq!(store.last_error(), None);
    }

    #[test]
    fn store_then_load() {
        let mut store = FlashConfigStore::new(RamFlash::new(), PAGE as u32);
        store.store(&learned());
        let loaded = store.load().unwrap();
        assert!(loaded.same_settings(&learned()));
        let flash = store.release();
        assert_eq!((flash.erases, flash.writes), (1, 1));
        // first page untouched
        assert!(flash.data[..PAGE].iter().all(|byte| *byte == 0xFF));
    }

    #[test]
    fn unchanged_store_is_skipped() {
        let mut store = FlashConfigStore::new(RamFlash::new(), 0);
        store.store(&learned());
        store.store(&FilterState {
            range_learned: false,
            ..learned()
        });
        assert_eq!(store.release().erases, 1);
    }

    #[test]
    fn flash_failure_is_kept() {
        let mut flash = RamFlash::new();
        flash.broken = true;
        let mut store = FlashConfigStore::new(flash, 0);
        store.store(&learned());
        assert_eq!(store.last_error(), Some(ConfigError::Flash(FlashFault::Other)));
        assert_eq!(store.load(), None);
    }
}
