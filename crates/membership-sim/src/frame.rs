//! Length-prefixed UTF-16 framing.
//!
//! Wire format:
//! ```text
//! [len: u32 LE][payload: len bytes of UTF-16LE text]
//! ```
//! `len` counts payload bytes, so it is always even.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Maximum payload size (16MB) to bound allocations from a bad prefix.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame payload of {0} bytes exceeds maximum of {max}", max = MAX_FRAME_SIZE)]
    TooLarge(usize),

    #[error("Frame payload has odd length {0}")]
    OddLength(usize),

    #[error("Frame payload is not valid UTF-16")]
    InvalidUtf16,

    #[error("Incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode `text` as a complete frame.
pub fn encode(text: &str) -> Result<Vec<u8>, FrameError> {
    let len = text.encode_utf16().count() * 2;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + len);
    buf.extend_from_slice(&(len as u32).to_le_bytes());
    for unit in text.encode_utf16() {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(buf)
}

/// Decode one frame from the front of `buf`.
///
/// Returns the text and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(String, usize), FrameError> {
    if buf.len() < LENGTH_PREFIX {
        return Err(FrameError::Incomplete {
            needed: LENGTH_PREFIX,
            available: buf.len(),
        });
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let end = LENGTH_PREFIX + len;
    if buf.len() < end {
        return Err(FrameError::Incomplete {
            needed: end,
            available: buf.len(),
        });
    }

    let text = decode_payload(&buf[LENGTH_PREFIX..end])?;
    Ok((text, end))
}

fn decode_payload(payload: &[u8]) -> Result<String, FrameError> {
    if payload.len() % 2 != 0 {
        return Err(FrameError::OddLength(payload.len()));
    }

    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| FrameError::InvalidUtf16)
}

/// Read one frame. Returns `None` on a clean end of stream before a prefix.
///
/// A stream that ends partway through the prefix is `Incomplete`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        match reader.read(&mut prefix[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(FrameError::Incomplete {
                    needed: LENGTH_PREFIX,
                    available: filled,
                });
            }
            n => filled += n,
        }
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload).map(Some)
}

/// Write `text` as one frame and flush. Returns bytes written.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    text: &str,
) -> Result<usize, FrameError> {
    let frame = encode(text)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(frame.len())
}
