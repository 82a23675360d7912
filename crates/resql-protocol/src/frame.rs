use crate::buffer::CursorBuffer;
use crate::messages::{FIXED_HEADER_SIZE, LEN_SIZE, MAX_FRAME_SIZE};
use resql_core::{ResqlError, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 4096;

/// Declared length of the frame at the read cursor, once its length field
/// has arrived.
pub fn declared_length(buf: &CursorBuffer) -> Result<Option<usize>> {
    if buf.len() < LEN_SIZE {
        return Ok(None);
    }
    let len = buf.peek_u32()?;
    if len > MAX_FRAME_SIZE || (len as usize) < FIXED_HEADER_SIZE {
        return Err(ResqlError::protocol(format!("invalid frame length: {len}")));
    }
    Ok(Some(len as usize))
}

/// True when a whole frame is available at the read cursor.
pub fn has_frame(buf: &CursorBuffer) -> Result<bool> {
    Ok(declared_length(buf)?.is_some_and(|len| len <= buf.len()))
}

/// Consumes the frame at the read cursor and returns its bytes, length field
/// included.
pub fn take_frame(buf: &mut CursorBuffer) -> Result<&[u8]> {
    let available = buf.len();
    let len = match declared_length(buf)? {
        Some(len) if len <= available => len,
        Some(len) => {
            return Err(ResqlError::TruncatedMessage {
                needed: len,
                available,
            })
        }
        None => {
            return Err(ResqlError::TruncatedMessage {
                needed: LEN_SIZE,
                available,
            })
        }
    };
    let start = buf.read_position();
    buf.set_read_cursor(start + len)?;
    Ok(&buf.written()[start..start + len])
}

/// Reads from `stream` until `buf` holds a complete frame. Stream transports
/// may split a frame across any number of reads, so only the length prefix
/// decides when to stop.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut CursorBuffer) -> Result<usize> {
    loop {
        if let Some(len) = declared_length(buf)? {
            if len <= buf.len() {
                return Ok(len);
            }
            buf.reserve(len - buf.len())?;
        }

        let n = stream.read(buf.spare_mut(READ_CHUNK)?).await?;
        if n == 0 {
            return Err(ResqlError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        buf.advance_write(n);
    }
}
