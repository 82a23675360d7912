use crate::buffer::{CursorBuffer, Reader};
use crate::frame::take_frame;
use crate::frontend::put_value;
use crate::messages::{ConnectResponse, MessageKind, ResultCode, TaskFlag, FIXED_HEADER_SIZE};
use resql_core::{ResqlError, Result, Value};

fn read_header(reader: &mut Reader<'_>, expected: MessageKind) -> Result<()> {
    reader.read_u32()?;
    let kind = MessageKind::try_from(reader.read_u8()?)?;
    if kind != expected {
        return Err(ResqlError::protocol(format!(
            "expected {expected:?}, received {kind:?}"
        )));
    }
    Ok(())
}

pub fn decode_connect_response(buf: &mut CursorBuffer) -> Result<ConnectResponse> {
    let mut reader = Reader::new(take_frame(buf)?);
    read_header(&mut reader, MessageKind::ConnectResponse)?;
    Ok(ConnectResponse {
        code: ResultCode::try_from(reader.read_u8()?)?,
        sequence: reader.read_u64()?,
        term: reader.read_u64()?,
        nodes: reader.read_str()?.unwrap_or_default().to_string(),
    })
}

/// Validates a client response envelope. On success the returned reader is
/// positioned at the first result-set block; a server-side failure becomes
/// `ServerReported` with the server's message.
pub fn decode_client_response(buf: &mut CursorBuffer) -> Result<Reader<'_>> {
    let mut reader = Reader::new(take_frame(buf)?);
    read_header(&mut reader, MessageKind::ClientResponse)?;
    match TaskFlag::try_from(reader.read_u8()?)? {
        TaskFlag::Ok => Ok(reader),
        TaskFlag::Error => {
            let message = reader.read_str()?.unwrap_or("unknown error");
            Err(ResqlError::ServerReported(message.to_string()))
        }
        other => Err(ResqlError::protocol(format!(
            "unexpected response status: {other:?}"
        ))),
    }
}

/// Reads the statement id carried by the response to a prepare request.
pub fn decode_prepared_id(reader: &mut Reader<'_>) -> Result<u64> {
    reader.read_u64()
}

pub fn encode_connect_response(buf: &mut CursorBuffer, response: &ConnectResponse) -> Result<()> {
    let start = buf.write_position();
    buf.write_u32(0)?;
    buf.write_u8(MessageKind::ConnectResponse as u8)?;
    buf.write_u8(response.code as u8)?;
    buf.write_u64(response.sequence)?;
    buf.write_u64(response.term)?;
    buf.write_string(Some(&response.nodes))?;
    patch_total(buf, start)
}

pub fn encode_error_response(buf: &mut CursorBuffer, message: &str) -> Result<()> {
    let start = begin_client_response(buf, TaskFlag::Error)?;
    buf.write_string(Some(message))?;
    buf.write_u8(TaskFlag::End as u8)?;
    patch_total(buf, start)
}

pub fn encode_prepare_response(buf: &mut CursorBuffer, id: u64) -> Result<()> {
    let start = begin_client_response(buf, TaskFlag::Ok)?;
    buf.write_u64(id)?;
    buf.write_u8(TaskFlag::Done as u8)?;
    patch_total(buf, start)
}

fn begin_client_response(buf: &mut CursorBuffer, status: TaskFlag) -> Result<usize> {
    let start = buf.write_position();
    buf.reserve(FIXED_HEADER_SIZE + 1)?;
    buf.write_u32(0)?;
    buf.write_u8(MessageKind::ClientResponse as u8)?;
    buf.write_u8(status as u8)?;
    Ok(start)
}

fn patch_total(buf: &mut CursorBuffer, start: usize) -> Result<()> {
    let total = u32::try_from(buf.write_position() - start).map_err(|_| ResqlError::BufferTooLarge)?;
    buf.patch_u32(start, total)
}

/// Builds a successful client response block by block, the way a server
/// reports the outcome of each statement of a batch.
pub struct ResponseWriter<'b> {
    buf: &'b mut CursorBuffer,
    start: usize,
    block: Option<usize>,
    rows: Option<(usize, u32)>,
}

impl<'b> ResponseWriter<'b> {
    pub fn begin(buf: &'b mut CursorBuffer) -> Result<Self> {
        let start = begin_client_response(buf, TaskFlag::Ok)?;
        Ok(Self {
            buf,
            start,
            block: None,
            rows: None,
        })
    }

    pub fn begin_result_set(&mut self, lines_changed: u32, last_row_id: i64) -> Result<()> {
        if self.block.is_some() {
            self.end_result_set()?;
        }
        self.buf.write_u8(TaskFlag::Stmt as u8)?;
        self.block = Some(self.buf.write_position());
        self.buf.write_u32(0)?;
        self.buf.write_u32(lines_changed)?;
        self.buf.write_u64(last_row_id as u64)
    }

    pub fn columns(&mut self, names: &[&str]) -> Result<()> {
        if self.block.is_none() || self.rows.is_some() {
            return Err(ResqlError::Misuse(
                "columns must directly follow a result set header".into(),
            ));
        }
        self.buf.write_u8(TaskFlag::Row as u8)?;
        self.buf.write_u32(names.len() as u32)?;
        for name in names {
            self.buf.write_string(Some(name))?;
        }
        self.rows = Some((self.buf.write_position(), 0));
        self.buf.write_u32(0)
    }

    pub fn row(&mut self, values: &[Value]) -> Result<()> {
        let Some((_, count)) = self.rows.as_mut() else {
            return Err(ResqlError::Misuse("row written before columns".into()));
        };
        *count += 1;
        for value in values {
            put_value(self.buf, value)?;
        }
        Ok(())
    }

    pub fn end_result_set(&mut self) -> Result<()> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };
        if let Some((pos, count)) = self.rows.take() {
            self.buf.patch_u32(pos, count)?;
        }
        self.buf.write_u8(TaskFlag::Done as u8)?;
        self.buf.write_u8(TaskFlag::End as u8)?;
        let len = self.buf.write_position() - block;
        self.buf.patch_u32(block, len as u32)
    }

    pub fn finish(mut self) -> Result<()> {
        self.end_result_set()?;
        self.buf.write_u8(TaskFlag::Done as u8)?;
        patch_total(self.buf, self.start)
    }
}
