use serde::{Deserialize, Serialize};

use crate::error::{PackError, PackResult};

/// Largest accepted buffer threshold.
pub const MAX_BUFFER_SIZE: usize = 1 << 30;

/// Default threshold for row packers. Close to the chunk size of common
/// block compressors, so one buffer compresses as one unit.
pub const ROW_DEFAULT_BUFFER_SIZE: usize = 800_000;

/// Default threshold for column packers. Every column keeps its own fill
/// buffer, so this is much smaller than the row default.
pub const COLUMN_DEFAULT_BUFFER_SIZE: usize = 65_536;

/// How each flushed buffer payload is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl Compression {
    /// Wire code stored in every buffer record.
    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zstd { .. } => 1,
        }
    }

    pub(crate) fn compress(&self, data: &[u8]) -> PackResult<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Zstd { level } => zstd::encode_all(data, *level)
                .map_err(|e| PackError::Compression(e.to_string())),
        }
    }

    /// Undo the compression named by `code`; the level is irrelevant here.
    pub(crate) fn decompress(code: u8, data: &[u8]) -> PackResult<Vec<u8>> {
        match code {
            0 => Ok(data.to_vec()),
            1 => zstd::decode_all(data).map_err(|e| PackError::Decompression(e.to_string())),
            other => Err(PackError::Decompression(format!(
                "unknown compression code {other}"
            ))),
        }
    }
}

/// Buffering and storage settings of a packer.
///
/// `buffer_size` is a soft threshold: a buffer is flushed as soon as its
/// serialized size exceeds it after an append, so a flushed buffer holds at
/// least `buffer_size` bytes plus at most one row (or value). Zero flushes
/// every row on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerConfig {
    pub buffer_size: usize,
    pub compression: Compression,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self::row_default()
    }
}

impl PackerConfig {
    pub fn row_default() -> Self {
        Self {
            buffer_size: ROW_DEFAULT_BUFFER_SIZE,
            compression: Compression::default(),
        }
    }

    pub fn column_default() -> Self {
        Self {
            buffer_size: COLUMN_DEFAULT_BUFFER_SIZE,
            compression: Compression::default(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> PackResult<()> {
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(PackError::Configuration(format!(
                "buffer size {} exceeds maximum {MAX_BUFFER_SIZE}",
                self.buffer_size
            )));
        }
        if let Compression::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return Err(PackError::Configuration(format!(
                    "zstd level {level} outside 1..=22"
                )));
            }
        }
        Ok(())
    }
}
