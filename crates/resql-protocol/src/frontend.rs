use crate::buffer::{string_len, CursorBuffer, Reader};
use crate::messages::{
    ClientRequest, ConnectRequest, DisconnectRequest, FrontendMessage, MessageKind, Param,
    ParamKey, ResultCode, StatementSource, TaskFlag, Task, ValueTag, CLIENT_REQUEST_HEADER_SIZE,
    FIXED_HEADER_SIZE, PARAM_BY_INDEX, PARAM_BY_NAME, PROTOCOL_ID, REMOTE_CLIENT,
};
use resql_core::{ResqlError, Result, Value};

pub fn encode_connect_request(
    buf: &mut CursorBuffer,
    cluster_name: &str,
    client_name: &str,
) -> Result<()> {
    let total = FIXED_HEADER_SIZE
        + 4
        + string_len(Some(PROTOCOL_ID))
        + string_len(Some(cluster_name))
        + string_len(Some(client_name));
    let total = u32::try_from(total).map_err(|_| ResqlError::BufferTooLarge)?;

    buf.write_u32(total)?;
    buf.write_u8(MessageKind::ConnectRequest as u8)?;
    buf.write_u32(REMOTE_CLIENT)?;
    buf.write_string(Some(PROTOCOL_ID))?;
    buf.write_string(Some(cluster_name))?;
    buf.write_string(Some(client_name))
}

pub fn encode_disconnect_request(buf: &mut CursorBuffer, code: ResultCode, flags: u32) -> Result<()> {
    let total = (FIXED_HEADER_SIZE + 1 + 4) as u32;
    buf.write_u32(total)?;
    buf.write_u8(MessageKind::DisconnectRequest as u8)?;
    buf.write_u8(code as u8)?;
    buf.write_u32(flags)
}

/// Starts a client request: empties the buffer and leaves room for the
/// header, which is written by [`finalize_client_request`] once the body is
/// complete.
pub fn begin_client_request(buf: &mut CursorBuffer) -> Result<()> {
    buf.reset();
    buf.reserve(CLIENT_REQUEST_HEADER_SIZE)?;
    buf.set_length(CLIENT_REQUEST_HEADER_SIZE)
}

/// True when nothing but the header placeholder has been written.
pub fn is_request_empty(buf: &CursorBuffer) -> bool {
    buf.write_position() <= CLIENT_REQUEST_HEADER_SIZE
}

pub fn put_statement(buf: &mut CursorBuffer, sql: &str) -> Result<()> {
    buf.write_u8(TaskFlag::Stmt as u8)?;
    buf.write_string(Some(sql))
}

pub fn put_prepared_statement(buf: &mut CursorBuffer, id: u64) -> Result<()> {
    buf.write_u8(TaskFlag::StmtId as u8)?;
    buf.write_u64(id)
}

pub fn put_prepare(buf: &mut CursorBuffer, sql: &str) -> Result<()> {
    buf.write_u8(TaskFlag::StmtPrepare as u8)?;
    buf.write_string(Some(sql))?;
    end_task(buf)
}

pub fn put_delete_prepared(buf: &mut CursorBuffer, id: u64) -> Result<()> {
    buf.write_u8(TaskFlag::StmtDelPrepared as u8)?;
    buf.write_u64(id)?;
    end_task(buf)
}

pub fn put_param_by_name(buf: &mut CursorBuffer, name: &str, value: &Value) -> Result<()> {
    buf.write_u8(PARAM_BY_NAME)?;
    buf.write_string(Some(name))?;
    put_value(buf, value)
}

pub fn put_param_by_index(buf: &mut CursorBuffer, index: u32, value: &Value) -> Result<()> {
    buf.write_u8(PARAM_BY_INDEX)?;
    buf.write_u32(index)?;
    put_value(buf, value)
}

pub fn put_value(buf: &mut CursorBuffer, value: &Value) -> Result<()> {
    buf.write_u8(ValueTag::of(value) as u8)?;
    match value {
        Value::Integer(v) => buf.write_u64(*v as u64),
        Value::Float(v) => buf.write_f64(*v),
        Value::Text(v) => buf.write_string(Some(v)),
        Value::Blob(v) => buf.write_blob(v),
        Value::Null => Ok(()),
    }
}

pub fn end_task(buf: &mut CursorBuffer) -> Result<()> {
    buf.write_u8(TaskFlag::End as u8)
}

/// Rewinds to the start of the request and writes the header now that the
/// total length is known.
pub fn finalize_client_request(buf: &mut CursorBuffer, readonly: bool, sequence: u64) -> Result<()> {
    let len = buf.set_write_cursor_to(0)?;
    let total = u32::try_from(len).map_err(|_| ResqlError::BufferTooLarge)?;
    buf.write_u32(total)?;
    buf.write_u8(MessageKind::ClientRequest as u8)?;
    buf.write_bool(readonly)?;
    buf.write_u64(sequence)?;
    buf.set_length(len)?;
    buf.set_read_cursor(0)
}

/// Decodes one complete client message from the front of `buf`.
pub fn read_message(buf: &mut CursorBuffer) -> Result<FrontendMessage> {
    let frame = crate::frame::take_frame(buf)?;
    let mut reader = Reader::new(frame);
    reader.read_u32()?;
    let kind = MessageKind::try_from(reader.read_u8()?)?;
    let message = match kind {
        MessageKind::ConnectRequest => FrontendMessage::Connect(ConnectRequest {
            flags: reader.read_u32()?,
            protocol: read_required_str(&mut reader)?,
            cluster_name: read_required_str(&mut reader)?,
            client_name: read_required_str(&mut reader)?,
        }),
        MessageKind::DisconnectRequest => FrontendMessage::Disconnect(DisconnectRequest {
            code: ResultCode::try_from(reader.read_u8()?)?,
            flags: reader.read_u32()?,
        }),
        MessageKind::ClientRequest => FrontendMessage::Client(read_client_request(&mut reader)?),
        other => {
            return Err(ResqlError::protocol(format!(
                "unexpected message from client: {other:?}"
            )))
        }
    };
    Ok(message)
}

fn read_required_str(reader: &mut Reader<'_>) -> Result<String> {
    reader
        .read_str()?
        .map(str::to_string)
        .ok_or_else(|| ResqlError::protocol("unexpected null string"))
}

fn read_client_request(reader: &mut Reader<'_>) -> Result<ClientRequest> {
    let readonly = reader.read_bool()?;
    let sequence = reader.read_u64()?;
    let mut tasks = Vec::new();

    while !reader.is_empty() {
        let task = match TaskFlag::try_from(reader.read_u8()?)? {
            TaskFlag::Stmt => {
                let sql = read_required_str(reader)?;
                Task::Statement {
                    source: StatementSource::Sql(sql),
                    params: read_params(reader)?,
                }
            }
            TaskFlag::StmtId => {
                let id = reader.read_u64()?;
                Task::Statement {
                    source: StatementSource::Prepared(id),
                    params: read_params(reader)?,
                }
            }
            TaskFlag::StmtPrepare => {
                let sql = read_required_str(reader)?;
                expect_end(reader)?;
                Task::Prepare { sql }
            }
            TaskFlag::StmtDelPrepared => {
                let id = reader.read_u64()?;
                expect_end(reader)?;
                Task::DeletePrepared { id }
            }
            other => {
                return Err(ResqlError::protocol(format!(
                    "unexpected task flag: {other:?}"
                )))
            }
        };
        tasks.push(task);
    }

    Ok(ClientRequest {
        readonly,
        sequence,
        tasks,
    })
}

fn read_params(reader: &mut Reader<'_>) -> Result<Vec<Param>> {
    let mut params = Vec::new();
    loop {
        let key = match reader.read_u8()? {
            flag if flag == TaskFlag::End as u8 => return Ok(params),
            PARAM_BY_NAME => ParamKey::Name(read_required_str(reader)?),
            PARAM_BY_INDEX => ParamKey::Index(reader.read_u32()?),
            other => {
                return Err(ResqlError::protocol(format!(
                    "unexpected parameter selector: {other}"
                )))
            }
        };
        let value = read_value(reader)?;
        params.push(Param { key, value });
    }
}

/// Reads a tagged value as bound by a client.
pub fn read_value(reader: &mut Reader<'_>) -> Result<Value> {
    Ok(match ValueTag::try_from(reader.read_u8()?)? {
        ValueTag::Integer => Value::Integer(reader.read_u64()? as i64),
        ValueTag::Float => Value::Float(reader.read_f64()?),
        ValueTag::Text => Value::Text(read_required_str(reader)?),
        ValueTag::Blob => Value::Blob(reader.read_blob()?.to_vec()),
        ValueTag::Null => Value::Null,
    })
}

fn expect_end(reader: &mut Reader<'_>) -> Result<()> {
    match reader.read_u8()? {
        flag if flag == TaskFlag::End as u8 => Ok(()),
        other => Err(ResqlError::protocol(format!(
            "expected end of task, found {other}"
        ))),
    }
}
