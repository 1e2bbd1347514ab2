//! Movie hash fingerprinting.
//!
//! The fingerprint is the file length plus the wrapping sum of every
//! little-endian `u64` word in the first and the last 64 KiB of the file.
//! Subtitle databases index files by this value, so two copies of the same
//! release match regardless of their file names.

use std::{
    fmt,
    io::{ErrorKind, SeekFrom},
    path::Path,
};

use serde::{Serialize, Serializer};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Size of each sampled window.
pub const WINDOW_SIZE: u64 = 64 * 1024;

const WORD_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file is {len} bytes, at least {min} bytes are required")]
    ShortFile { len: u64, min: u64 },
}

/// 64-bit movie hash, displayed as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MovieHash(u64);

impl MovieHash {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Accumulates `len` and the words of both windows.
    ///
    /// A trailing partial word in either window is ignored; callers always
    /// pass full 64 KiB windows.
    pub fn from_windows(len: u64, head: &[u8], tail: &[u8]) -> Self {
        let sum = head
            .chunks_exact(WORD_SIZE)
            .chain(tail.chunks_exact(WORD_SIZE))
            .fold(len, |acc, word| {
                let mut bytes = [0u8; WORD_SIZE];
                bytes.copy_from_slice(word);
                acc.wrapping_add(u64::from_le_bytes(bytes))
            });
        Self(sum)
    }

    /// Hashes an in-memory file image.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FingerprintError> {
        let len = data.len() as u64;
        if len < WINDOW_SIZE {
            return Err(FingerprintError::ShortFile {
                len,
                min: WINDOW_SIZE,
            });
        }

        let window = WINDOW_SIZE as usize;
        let tail_start = data.len() - window;
        Ok(Self::from_windows(
            len,
            &data[..window],
            &data[tail_start..],
        ))
    }
}

impl fmt::Display for MovieHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for MovieHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Computes the movie hash of the file at `path` with two positioned reads.
///
/// Files shorter than one window are rejected. Files between one and two
/// windows long are hashed with overlapping windows.
pub async fn compute_movie_hash(path: &Path) -> Result<MovieHash, FingerprintError> {
    let io_error = |source: std::io::Error| FingerprintError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let len = file.metadata().await.map_err(io_error)?.len();
    if len < WINDOW_SIZE {
        return Err(FingerprintError::ShortFile {
            len,
            min: WINDOW_SIZE,
        });
    }

    let window = WINDOW_SIZE as usize;
    let mut buffer = vec![0u8; window * 2];
    let (head, tail) = buffer.split_at_mut(window);

    file.read_exact(head).await.map_err(io_error)?;
    file.seek(SeekFrom::Start(len - WINDOW_SIZE))
        .await
        .map_err(io_error)?;
    file.read_exact(tail).await.map_err(|error| {
        if error.kind() == ErrorKind::UnexpectedEof {
            io_error(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "file shrank while it was being hashed",
            ))
        } else {
            io_error(error)
        }
    })?;

    Ok(MovieHash::from_windows(len, head, tail))
}
