use bytes::{Buf, BufMut};
use resql_core::{ResqlError, Result};

/// Length value marking a NULL string.
pub const NULL_STRING_LEN: u32 = u32::MAX;

const MIN_CAPACITY: usize = 1024;
const MAX_CAPACITY: usize = isize::MAX as usize;

/// Encoded size of a string: length field, payload and NUL terminator.
pub fn string_len(value: Option<&str>) -> usize {
    match value {
        Some(s) => 4 + s.len() + 1,
        None => 4,
    }
}

/// Bounds-checked little-endian reader over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        let mut reader = Self::new(data);
        reader.set_position(pos)?;
        Ok(reader)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(ResqlError::TruncatedMessage {
                needed: pos,
                available: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ResqlError::TruncatedMessage {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn peek_u8(&self) -> Result<u8> {
        let mut ahead = *self;
        ahead.read_u8()
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_u32_le())
    }

    pub fn peek_u32(&self) -> Result<u32> {
        let mut ahead = *self;
        ahead.read_u32()
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut bytes = self.take(8)?;
        Ok(bytes.get_u64_le())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a length-prefixed, NUL-terminated string. `None` is NULL.
    pub fn read_str(&mut self) -> Result<Option<&'a str>> {
        let len = self.read_u32()?;
        if len == NULL_STRING_LEN {
            return Ok(None);
        }
        let len = len as usize;
        let bytes = self.take(len + 1)?;
        let (text, terminator) = bytes.split_at(len);
        if terminator[0] != 0 {
            return Err(ResqlError::protocol("string is not nul-terminated"));
        }
        std::str::from_utf8(text)
            .map(Some)
            .map_err(|_| ResqlError::protocol("string is not valid utf-8"))
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }
}

/// A contiguous byte region with independent read and write cursors.
///
/// `read_pos <= write_pos <= capacity` always holds. Writes grow the storage;
/// reads past `write_pos` fail with `TruncatedMessage`. The storage is kept
/// fully initialized so the write cursor can be moved back over already
/// written bytes and restored afterwards.
#[derive(Debug, Clone, Default)]
pub struct CursorBuffer {
    storage: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl CursorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// Bytes between the read and the write cursor.
    pub fn unread(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    /// Bytes between the start of the region and the write cursor.
    pub fn written(&self) -> &[u8] {
        &self.storage[..self.write_pos]
    }

    /// A reader over the written region, positioned at the read cursor.
    pub fn reader(&self) -> Reader<'_> {
        Reader {
            data: self.written(),
            pos: self.read_pos,
        }
    }

    /// Empties the buffer logically, keeping the allocation.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Ensures room for `n` more bytes without changing the length.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        self.ensure(n)
    }

    /// Moves the write cursor to `pos`, returning the previous position so
    /// it can be restored with [`CursorBuffer::set_length`].
    pub fn set_write_cursor_to(&mut self, pos: usize) -> Result<usize> {
        let previous = self.write_pos;
        self.set_length(pos)?;
        Ok(previous)
    }

    pub fn set_length(&mut self, len: usize) -> Result<()> {
        if len > self.storage.len() {
            return Err(ResqlError::BufferTooLarge);
        }
        self.write_pos = len;
        self.read_pos = self.read_pos.min(len);
        Ok(())
    }

    pub fn set_read_cursor(&mut self, pos: usize) -> Result<()> {
        if pos > self.write_pos {
            return Err(ResqlError::TruncatedMessage {
                needed: pos,
                available: self.write_pos,
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    /// Overwrites four bytes at `pos` without moving the cursors.
    pub fn patch_u32(&mut self, pos: usize, value: u32) -> Result<()> {
        let read_pos = self.read_pos;
        let len = self.set_write_cursor_to(pos)?;
        self.write_u32(value)?;
        self.set_length(len.max(self.write_pos))?;
        self.read_pos = read_pos;
        Ok(())
    }

    /// Writable space after the write cursor, at least `min` bytes long.
    /// Commit what was filled with [`CursorBuffer::advance_write`].
    pub fn spare_mut(&mut self, min: usize) -> Result<&mut [u8]> {
        self.ensure(min)?;
        Ok(&mut self.storage[self.write_pos..])
    }

    pub fn advance_write(&mut self, n: usize) {
        self.write_pos = (self.write_pos + n).min(self.storage.len());
    }

    fn ensure(&mut self, n: usize) -> Result<()> {
        let needed = self
            .write_pos
            .checked_add(n)
            .ok_or(ResqlError::BufferTooLarge)?;
        if needed <= self.storage.len() {
            return Ok(());
        }

        let unread = self.len();
        let required = unread.checked_add(n).ok_or(ResqlError::BufferTooLarge)?;
        if required > MAX_CAPACITY {
            return Err(ResqlError::BufferTooLarge);
        }

        let capacity = self.storage.len();
        if self.read_pos > 0 && required <= capacity / 2 {
            self.storage.copy_within(self.read_pos..self.write_pos, 0);
        } else {
            let new_capacity = capacity
                .saturating_mul(2)
                .max(required)
                .max(MIN_CAPACITY)
                .min(MAX_CAPACITY);
            let mut storage = vec![0; new_capacity];
            storage[..capacity - self.read_pos].copy_from_slice(&self.storage[self.read_pos..]);
            self.storage = storage;
        }
        self.write_pos = unread;
        self.read_pos = 0;
        Ok(())
    }

    fn put(&mut self, n: usize) -> Result<&mut [u8]> {
        self.ensure(n)?;
        let start = self.write_pos;
        self.write_pos += n;
        Ok(&mut self.storage[start..start + n])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put(1)?[0] = value;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        let mut slot = self.put(4)?;
        slot.put_u32_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        let mut slot = self.put(8)?;
        slot.put_u64_le(value);
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut slot = self.put(bytes.len())?;
        slot.put_slice(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: Option<&str>) -> Result<()> {
        let Some(value) = value else {
            return self.write_u32(NULL_STRING_LEN);
        };
        let len = u32::try_from(value.len())
            .ok()
            .filter(|len| *len != NULL_STRING_LEN)
            .ok_or(ResqlError::BufferTooLarge)?;
        self.ensure(string_len(Some(value)))?;
        self.write_u32(len)?;
        self.write_bytes(value.as_bytes())?;
        self.write_u8(0)
    }

    pub fn write_blob(&mut self, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|_| ResqlError::BufferTooLarge)?;
        self.ensure(4 + value.len())?;
        self.write_u32(len)?;
        self.write_bytes(value)
    }

    fn read_with<T>(&mut self, f: impl FnOnce(&mut Reader<'_>) -> Result<T>) -> Result<T> {
        let mut reader = self.reader();
        let value = f(&mut reader)?;
        let pos = reader.position();
        self.read_pos = pos;
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_with(|reader| reader.read_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.read_with(|reader| reader.read_bool())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_with(|reader| reader.read_u32())
    }

    pub fn peek_u32(&self) -> Result<u32> {
        self.reader().peek_u32()
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_with(|reader| reader.read_u64())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.read_with(|reader| reader.read_f64())
    }

    pub fn read_string(&mut self) -> Result<Option<String>> {
        self.read_with(|reader| Ok(reader.read_str()?.map(str::to_string)))
    }

    pub fn read_blob(&mut self) -> Result<&[u8]> {
        let (start, len) = self.read_with(|reader| {
            let blob = reader.read_blob()?;
            Ok((reader.position() - blob.len(), blob.len()))
        })?;
        Ok(&self.storage[start..start + len])
    }
}
