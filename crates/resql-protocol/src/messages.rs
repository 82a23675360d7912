use resql_core::{ResqlError, Value};
use std::fmt;

/// Size of the leading total-length field of every message.
pub const LEN_SIZE: usize = 4;
/// Length field plus message kind.
pub const FIXED_HEADER_SIZE: usize = LEN_SIZE + 1;
/// Length, kind, readonly flag and sequence of a client request.
pub const CLIENT_REQUEST_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 1 + 8;
/// Frames declaring more than this are rejected as corrupt.
pub const MAX_FRAME_SIZE: u32 = 2_000_000_000;
pub const PROTOCOL_ID: &str = "resql";
/// Remote type announced in the connect request flags.
pub const REMOTE_CLIENT: u32 = 0;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ConnectRequest = 0x00,
    ConnectResponse = 0x01,
    DisconnectRequest = 0x02,
    DisconnectResponse = 0x03,
    ClientRequest = 0x04,
    ClientResponse = 0x05,
}

impl TryFrom<u8> for MessageKind {
    type Error = ResqlError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => MessageKind::ConnectRequest,
            0x01 => MessageKind::ConnectResponse,
            0x02 => MessageKind::DisconnectRequest,
            0x03 => MessageKind::DisconnectResponse,
            0x04 => MessageKind::ClientRequest,
            0x05 => MessageKind::ClientResponse,
            other => {
                return Err(ResqlError::protocol(format!(
                    "unknown message kind: 0x{:02x}",
                    other
                )))
            }
        })
    }
}

/// Result code carried by connect and disconnect messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    Error = 1,
    ClusterNameMismatch = 2,
    Corrupt = 3,
    Unexpected = 4,
    Timeout = 5,
    NotLeader = 6,
    DiskFull = 7,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Ok => "ok",
            ResultCode::Error => "error",
            ResultCode::ClusterNameMismatch => "cluster name mismatch",
            ResultCode::Corrupt => "message corrupt",
            ResultCode::Unexpected => "unexpected message",
            ResultCode::Timeout => "timeout",
            ResultCode::NotLeader => "not leader",
            ResultCode::DiskFull => "disk full",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = ResqlError;

    fn try_from(value: u8) -> Result<Self, ResqlError> {
        Ok(match value {
            0 => ResultCode::Ok,
            1 => ResultCode::Error,
            2 => ResultCode::ClusterNameMismatch,
            3 => ResultCode::Corrupt,
            4 => ResultCode::Unexpected,
            5 => ResultCode::Timeout,
            6 => ResultCode::NotLeader,
            7 => ResultCode::DiskFull,
            other => return Err(ResqlError::protocol(format!("unknown result code: {other}"))),
        })
    }
}

/// Markers structuring the body of client requests and responses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFlag {
    Ok = 0,
    Error = 1,
    Done = 2,
    Stmt = 3,
    StmtId = 4,
    StmtPrepare = 5,
    StmtDelPrepared = 6,
    Row = 7,
    End = 8,
}

impl TryFrom<u8> for TaskFlag {
    type Error = ResqlError;

    fn try_from(value: u8) -> Result<Self, ResqlError> {
        Ok(match value {
            0 => TaskFlag::Ok,
            1 => TaskFlag::Error,
            2 => TaskFlag::Done,
            3 => TaskFlag::Stmt,
            4 => TaskFlag::StmtId,
            5 => TaskFlag::StmtPrepare,
            6 => TaskFlag::StmtDelPrepared,
            7 => TaskFlag::Row,
            8 => TaskFlag::End,
            other => return Err(ResqlError::protocol(format!("unknown task flag: {other}"))),
        })
    }
}

/// Type tag preceding every encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Integer = 0,
    Float = 1,
    Text = 2,
    Blob = 3,
    Null = 4,
}

impl ValueTag {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Integer(_) => ValueTag::Integer,
            Value::Float(_) => ValueTag::Float,
            Value::Text(_) => ValueTag::Text,
            Value::Blob(_) => ValueTag::Blob,
            Value::Null => ValueTag::Null,
        }
    }
}

impl TryFrom<u8> for ValueTag {
    type Error = ResqlError;

    fn try_from(value: u8) -> Result<Self, ResqlError> {
        Ok(match value {
            0 => ValueTag::Integer,
            1 => ValueTag::Float,
            2 => ValueTag::Text,
            3 => ValueTag::Blob,
            4 => ValueTag::Null,
            other => return Err(ResqlError::UnsupportedParameterType(other)),
        })
    }
}

/// Selector written before a bound parameter.
pub const PARAM_BY_NAME: u8 = 5;
pub const PARAM_BY_INDEX: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKey {
    Name(String),
    Index(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub key: ParamKey,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementSource {
    Sql(String),
    Prepared(u64),
}

/// One entry of a client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Statement {
        source: StatementSource,
        params: Vec<Param>,
    },
    Prepare { sql: String },
    DeletePrepared { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub readonly: bool,
    pub sequence: u64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub flags: u32,
    pub protocol: String,
    pub cluster_name: String,
    pub client_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub code: ResultCode,
    pub sequence: u64,
    pub term: u64,
    /// Space separated node URLs.
    pub nodes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectRequest {
    pub code: ResultCode,
    pub flags: u32,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    Connect(ConnectRequest),
    Disconnect(DisconnectRequest),
    Client(ClientRequest),
}
