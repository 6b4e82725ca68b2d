//! Host-resident memory image backing the device's bus requests.

use crate::ConfigError;

/// Bytes per bus word.
pub const WORD_BYTES: usize = 4;

/// Expands a 4-bit byte-select mask into a 32-bit lane mask.
///
/// Bit `i` of `byte_select` enables byte lane `i` (`0xFF << 8 * i`). Bits above
/// the fourth are ignored.
#[must_use]
pub const fn byte_lane_mask(byte_select: u8) -> u32 {
    let mut mask = 0u32;
    let mut lane = 0;
    while lane < WORD_BYTES {
        if byte_select & (1 << lane) != 0 {
            mask |= 0xFF << (8 * lane);
        }
        lane += 1;
    }
    mask
}

/// Merges `data` into `old` on the lanes enabled by `byte_select`.
#[must_use]
pub const fn merge_masked(old: u32, data: u32, byte_select: u8) -> u32 {
    let mask = byte_lane_mask(byte_select);
    (data & mask) | (old & !mask)
}

/// Reason a word write was refused by the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteRejection {
    /// Word index lies beyond the image.
    OutOfBounds,
    /// Word index lies in the read-only region.
    ReadOnly,
}

/// Contiguous byte buffer viewed as little-endian 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: Box<[u8]>,
    read_only_from: Option<usize>,
}

impl MemoryImage {
    /// Wraps a host-supplied buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyImage`] for an empty buffer and
    /// [`ConfigError::MisalignedImage`] when its length is not a whole number
    /// of words.
    pub fn new(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        if bytes.is_empty() {
            return Err(ConfigError::EmptyImage);
        }
        if bytes.len() % WORD_BYTES != 0 {
            return Err(ConfigError::MisalignedImage { len: bytes.len() });
        }
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
            read_only_from: None,
        })
    }

    /// Allocates a zeroed image of `words` words.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyImage`] when `words` is zero and
    /// [`ConfigError::ImageTooLarge`] when the byte length overflows.
    pub fn zeroed(words: usize) -> Result<Self, ConfigError> {
        let len = words
            .checked_mul(WORD_BYTES)
            .ok_or(ConfigError::ImageTooLarge { words })?;
        Self::new(vec![0; len])
    }

    /// Marks every word from `word` upwards as read-only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadOnlyBoundary`] when `word` lies beyond the
    /// image.
    pub fn set_read_only_from(&mut self, word: usize) -> Result<(), ConfigError> {
        if word > self.len_words() {
            return Err(ConfigError::ReadOnlyBoundary {
                word,
                len_words: self.len_words(),
            });
        }
        self.read_only_from = Some(word);
        Ok(())
    }

    /// Copies `data` into the image at `byte_offset`, ignoring read-only marks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LoadOutOfRange`] when the data does not fit.
    pub fn load(&mut self, byte_offset: usize, data: &[u8]) -> Result<(), ConfigError> {
        let end = byte_offset
            .checked_add(data.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ConfigError::LoadOutOfRange {
                offset: byte_offset,
                len: data.len(),
                size: self.bytes.len(),
            })?;
        self.bytes[byte_offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Image size in bytes.
    #[must_use]
    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Image size in words.
    #[must_use]
    pub fn len_words(&self) -> usize {
        self.bytes.len() / WORD_BYTES
    }

    /// First read-only word, if a boundary is set.
    #[must_use]
    pub const fn read_only_from(&self) -> Option<usize> {
        self.read_only_from
    }

    /// Raw image bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reads the word at `word`, or `None` beyond the image.
    #[must_use]
    pub fn read_word(&self, word: usize) -> Option<u32> {
        let start = word.checked_mul(WORD_BYTES)?;
        let lanes = self.bytes.get(start..start.checked_add(WORD_BYTES)?)?;
        let mut raw = [0u8; WORD_BYTES];
        raw.copy_from_slice(lanes);
        Some(u32::from_le_bytes(raw))
    }

    /// Merges `data` into the word at `word` on the selected byte lanes.
    ///
    /// # Errors
    ///
    /// Returns a [`WriteRejection`] without touching memory when the word is
    /// outside the image or inside its read-only region.
    pub fn write_masked(&mut self, word: usize, data: u32, byte_select: u8) -> Result<(), WriteRejection> {
        let old = self.read_word(word).ok_or(WriteRejection::OutOfBounds)?;
        if self.read_only_from.is_some_and(|boundary| word >= boundary) {
            return Err(WriteRejection::ReadOnly);
        }
        let start = word * WORD_BYTES;
        self.bytes[start..start + WORD_BYTES]
            .copy_from_slice(&merge_masked(old, data, byte_select).to_le_bytes());
        Ok(())
    }
}
