use resql_core::{ResqlError, Result, Value, ValueRef};
use resql_protocol::buffer::Reader;
use resql_protocol::messages::{TaskFlag, ValueTag};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Length field, lines changed, last row id and the closing flag.
const MIN_BLOCK_LEN: usize = 4 + 4 + 8 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Positioned on a result set, no row read yet.
    AtResultSetHeader,
    /// A row of the current result set has been read.
    AtRow,
    /// No result sets left.
    Exhausted,
}

/// Cursor over the result sets of an executed batch, one per statement, in
/// batch order.
///
/// Text and blob values borrow from the client's response buffer, so a
/// stream cannot outlive the next call on the client.
#[derive(Debug)]
pub struct ResultStream<'a> {
    reader: Reader<'a>,
    state: StreamState,
    next_block: usize,
    lines_changed: u32,
    last_row_id: i64,
    row_count: usize,
    rows_left: usize,
    rows_start: usize,
    columns: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
    row: Vec<ValueRef<'a>>,
    fault: Option<&'a AtomicBool>,
}

impl<'a> ResultStream<'a> {
    /// `reader` must sit on the first result-set block of a successful
    /// response. The stream starts on the first result set.
    pub fn new(reader: Reader<'a>) -> Result<Self> {
        Self::open(reader, None)
    }

    /// Like [`ResultStream::new`], but raises `fault` when the response turns
    /// out to be malformed, so the owner of the connection can drop it.
    pub fn tracked(reader: Reader<'a>, fault: &'a AtomicBool) -> Result<Self> {
        Self::open(reader, Some(fault))
    }

    fn open(reader: Reader<'a>, fault: Option<&'a AtomicBool>) -> Result<Self> {
        let mut stream = Self {
            next_block: reader.position(),
            reader,
            state: StreamState::AtResultSetHeader,
            lines_changed: 0,
            last_row_id: 0,
            row_count: 0,
            rows_left: 0,
            rows_start: 0,
            columns: Vec::new(),
            index: HashMap::new(),
            row: Vec::new(),
            fault,
        };
        stream.advance_to_next_result_set()?;
        Ok(stream)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Moves to the next result set, skipping unread rows of the current
    /// one. Returns false once every result set has been visited.
    pub fn advance_to_next_result_set(&mut self) -> Result<bool> {
        if self.state == StreamState::Exhausted {
            return Ok(false);
        }
        self.columns.clear();
        self.index.clear();
        self.row.clear();
        self.lines_changed = 0;
        self.last_row_id = 0;
        self.row_count = 0;
        self.rows_left = 0;

        match self.read_header() {
            Ok(true) => {
                self.state = StreamState::AtResultSetHeader;
                Ok(true)
            }
            Ok(false) => {
                self.state = StreamState::Exhausted;
                Ok(false)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Malformed data ends the stream for good.
    fn fail(&mut self, err: ResqlError) -> ResqlError {
        self.state = StreamState::Exhausted;
        self.rows_left = 0;
        self.row.clear();
        if let Some(fault) = self.fault {
            fault.store(true, Ordering::Relaxed);
        }
        err
    }

    fn read_header(&mut self) -> Result<bool> {
        self.reader.set_position(self.next_block)?;
        if self.reader.is_empty() || self.reader.peek_u8()? != TaskFlag::Stmt as u8 {
            return Ok(false);
        }
        self.reader.read_u8()?;

        let block = self.reader.position();
        let len = self.reader.read_u32()? as usize;
        if len < MIN_BLOCK_LEN || len > self.reader.remaining() + 4 {
            return Err(ResqlError::protocol(format!(
                "invalid result set length: {len}"
            )));
        }
        self.next_block = block + len;
        self.lines_changed = self.reader.read_u32()?;
        self.last_row_id = self.reader.read_u64()? as i64;

        match TaskFlag::try_from(self.reader.read_u8()?)? {
            TaskFlag::Row => {
                let count = self.reader.read_u32()? as usize;
                for i in 0..count {
                    let name = self.reader.read_str()?.unwrap_or_default();
                    self.columns.push(name);
                    self.index.entry(name).or_insert(i);
                }
                self.row_count = self.reader.read_u32()? as usize;
                self.rows_left = self.row_count;
                self.rows_start = self.reader.position();
            }
            TaskFlag::Done => {}
            other => {
                return Err(ResqlError::protocol(format!(
                    "unexpected result set marker: {other:?}"
                )))
            }
        }
        Ok(true)
    }

    /// Decodes the next row of the current result set.
    pub fn next_row(&mut self) -> Result<Option<Row<'_, 'a>>> {
        if self.state == StreamState::Exhausted || self.rows_left == 0 {
            return Ok(None);
        }
        self.row.clear();
        for _ in 0..self.columns.len() {
            match read_column_value(&mut self.reader) {
                Ok(value) => self.row.push(value),
                Err(err) => return Err(self.fail(err)),
            }
        }
        self.rows_left -= 1;
        self.state = StreamState::AtRow;
        Ok(Some(Row {
            columns: &self.columns,
            index: &self.index,
            values: &self.row,
        }))
    }

    /// Restarts row iteration of the current result set.
    pub fn rewind_rows(&mut self) -> Result<()> {
        if self.state != StreamState::AtRow {
            return Ok(());
        }
        self.reader.set_position(self.rows_start)?;
        self.rows_left = self.row_count;
        self.row.clear();
        self.state = StreamState::AtResultSetHeader;
        Ok(())
    }

    pub fn lines_changed(&self) -> u32 {
        self.lines_changed
    }

    pub fn last_row_id(&self) -> i64 {
        self.last_row_id
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, index: usize) -> Result<&'a str> {
        self.columns
            .get(index)
            .copied()
            .ok_or(ResqlError::IndexOutOfRange {
                index,
                len: self.columns.len(),
            })
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        name.column_index(&self.index, self.columns.len())
    }
}

fn read_column_value<'a>(reader: &mut Reader<'a>) -> Result<ValueRef<'a>> {
    let tag = reader.read_u8()?;
    let tag = ValueTag::try_from(tag)
        .map_err(|_| ResqlError::protocol(format!("unknown column type tag: {tag}")))?;
    Ok(match tag {
        ValueTag::Integer => ValueRef::Integer(reader.read_u64()? as i64),
        ValueTag::Float => ValueRef::Float(reader.read_f64()?),
        ValueTag::Text => ValueRef::Text(
            reader
                .read_str()?
                .ok_or_else(|| ResqlError::protocol("text column without a value"))?,
        ),
        ValueTag::Blob => ValueRef::Blob(reader.read_blob()?),
        ValueTag::Null => ValueRef::Null,
    })
}

/// Ways to address a column: by position or by name.
pub trait ColumnIndex {
    fn column_index(&self, names: &HashMap<&str, usize>, len: usize) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn column_index(&self, _names: &HashMap<&str, usize>, len: usize) -> Result<usize> {
        if *self < len {
            Ok(*self)
        } else {
            Err(ResqlError::IndexOutOfRange { index: *self, len })
        }
    }
}

impl ColumnIndex for &str {
    fn column_index(&self, names: &HashMap<&str, usize>, _len: usize) -> Result<usize> {
        names
            .get(*self)
            .copied()
            .ok_or_else(|| ResqlError::ColumnNotFound((*self).to_string()))
    }
}

/// One decoded row. Valid until the stream moves on.
#[derive(Debug, Clone, Copy)]
pub struct Row<'r, 'a> {
    columns: &'r [&'a str],
    index: &'r HashMap<&'a str, usize>,
    values: &'r [ValueRef<'a>],
}

impl<'r, 'a> Row<'r, 'a> {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, index: usize) -> Result<&'a str> {
        self.columns
            .get(index)
            .copied()
            .ok_or(ResqlError::IndexOutOfRange {
                index,
                len: self.columns.len(),
            })
    }

    pub fn value<I: ColumnIndex>(&self, column: I) -> Result<ValueRef<'a>> {
        let index = column.column_index(self.index, self.values.len())?;
        Ok(self.values[index])
    }

    /// Reads a column as `T`. NULL maps to `None` for the `Option` targets.
    pub fn get<I: ColumnIndex, T: FromValue<'a>>(&self, column: I) -> Result<T> {
        T::from_value(self.value(column)?)
    }

    pub fn values(&self) -> &'r [ValueRef<'a>] {
        self.values
    }

    pub fn to_values(&self) -> Vec<Value> {
        self.values.iter().copied().map(Value::from).collect()
    }
}

/// Conversion from a decoded column value.
pub trait FromValue<'a>: Sized {
    fn from_value(value: ValueRef<'a>) -> Result<Self>;
}

fn mismatch<T>(expected: &'static str, value: ValueRef<'_>) -> Result<T> {
    Err(ResqlError::TypeMismatch {
        expected,
        found: value.type_name(),
    })
}

impl<'a> FromValue<'a> for ValueRef<'a> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        Ok(value)
    }
}

impl<'a> FromValue<'a> for Value {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        Ok(value.into())
    }
}

impl<'a> FromValue<'a> for Option<i64> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Integer(v) => Ok(Some(v)),
            ValueRef::Null => Ok(None),
            other => mismatch("integer", other),
        }
    }
}

impl<'a> FromValue<'a> for Option<i32> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Integer(v) => i32::try_from(v).map(Some).or_else(|_| mismatch("32-bit integer", value)),
            ValueRef::Null => Ok(None),
            other => mismatch("integer", other),
        }
    }
}

impl<'a> FromValue<'a> for Option<f64> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Float(v) => Ok(Some(v)),
            ValueRef::Null => Ok(None),
            other => mismatch("float", other),
        }
    }
}

impl<'a> FromValue<'a> for Option<&'a str> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Text(v) => Ok(Some(v)),
            ValueRef::Null => Ok(None),
            other => mismatch("text", other),
        }
    }
}

impl<'a> FromValue<'a> for Option<String> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        Option::<&str>::from_value(value).map(|v| v.map(str::to_string))
    }
}

impl<'a> FromValue<'a> for Option<&'a [u8]> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        match value {
            ValueRef::Blob(v) => Ok(Some(v)),
            ValueRef::Null => Ok(None),
            other => mismatch("blob", other),
        }
    }
}

impl<'a> FromValue<'a> for Option<Vec<u8>> {
    fn from_value(value: ValueRef<'a>) -> Result<Self> {
        Option::<&[u8]>::from_value(value).map(|v| v.map(<[u8]>::to_vec))
    }
}
