//! In-process stand-in for a cluster node, speaking the wire protocol over
//! TCP with scriptable behavior.

use resql_core::Result;
use resql_protocol::backend::{encode_connect_response, encode_prepare_response, ResponseWriter};
use resql_protocol::buffer::CursorBuffer;
use resql_protocol::frame::read_frame;
use resql_protocol::frontend::read_message;
use resql_protocol::messages::{
    ClientRequest, ConnectResponse, FrontendMessage, ParamKey, ResultCode, Task,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub type Responder = Box<dyn FnMut(&ClientRequest, &mut CursorBuffer) -> Result<()> + Send>;

pub struct MockState {
    pub cluster_name: String,
    /// Last applied sequence number, reported on connect.
    pub sequence: u64,
    pub term: u64,
    pub nodes: String,
    pub connect_code: ResultCode,
    pub connects: usize,
    pub disconnects: usize,
    pub requests: Vec<ClientRequest>,
    /// Close the socket instead of applying the next client request.
    pub drop_next_request: bool,
    next_prepared_id: u64,
    responder: Option<Responder>,
}

enum Reply {
    Send,
    Close,
}

impl MockState {
    fn handle(&mut self, message: FrontendMessage, out: &mut CursorBuffer) -> Result<Reply> {
        match message {
            FrontendMessage::Connect(req) => {
                self.connects += 1;
                let code = if req.cluster_name != self.cluster_name {
                    ResultCode::ClusterNameMismatch
                } else {
                    self.connect_code
                };
                encode_connect_response(
                    out,
                    &ConnectResponse {
                        code,
                        sequence: self.sequence,
                        term: self.term,
                        nodes: self.nodes.clone(),
                    },
                )?;
                Ok(Reply::Send)
            }
            FrontendMessage::Disconnect(_) => {
                self.disconnects += 1;
                Ok(Reply::Close)
            }
            FrontendMessage::Client(req) => {
                self.requests.push(req.clone());
                if self.drop_next_request {
                    self.drop_next_request = false;
                    return Ok(Reply::Close);
                }
                if !req.readonly {
                    self.sequence = req.sequence;
                }
                match self.responder.as_mut() {
                    Some(responder) => responder(&req, out)?,
                    None => echo(&req, out, &mut self.next_prepared_id)?,
                }
                Ok(Reply::Send)
            }
        }
    }
}

/// Default behavior: every statement yields one result set whose columns are
/// the bound parameters and whose single row holds their values.
fn echo(req: &ClientRequest, out: &mut CursorBuffer, next_prepared_id: &mut u64) -> Result<()> {
    if let Some(Task::Prepare { .. }) = req.tasks.first() {
        *next_prepared_id += 1;
        return encode_prepare_response(out, *next_prepared_id);
    }
    let mut writer = ResponseWriter::begin(out)?;
    for task in &req.tasks {
        let Task::Statement { params, .. } = task else {
            continue;
        };
        writer.begin_result_set(0, 0)?;
        if params.is_empty() {
            continue;
        }
        let names: Vec<String> = params
            .iter()
            .map(|param| match &param.key {
                ParamKey::Name(name) => name.clone(),
                ParamKey::Index(index) => format!("${index}"),
            })
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        writer.columns(&names)?;
        let values: Vec<_> = params.iter().map(|param| param.value.clone()).collect();
        writer.row(&values)?;
    }
    writer.finish()
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(Mutex::new(MockState {
            cluster_name: "cluster".into(),
            sequence: 0,
            term: 1,
            nodes: format!("tcp://{addr}"),
            connect_code: ResultCode::Ok,
            connects: 0,
            disconnects: 0,
            requests: Vec::new(),
            drop_next_request: false,
            next_prepared_id: 0,
            responder: None,
        }));
        let shared = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, shared.clone()));
            }
        });
        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&ClientRequest, &mut CursorBuffer) -> Result<()> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<MockState>>) {
    let mut inbound = CursorBuffer::new();
    let mut outbound = CursorBuffer::new();
    loop {
        if read_frame(&mut socket, &mut inbound).await.is_err() {
            return;
        }
        let Ok(message) = read_message(&mut inbound) else {
            return;
        };
        if inbound.is_empty() {
            inbound.reset();
        }
        outbound.reset();
        let reply = state.lock().unwrap().handle(message, &mut outbound);
        match reply {
            Ok(Reply::Send) => {
                if socket.write_all(outbound.unread()).await.is_err() {
                    return;
                }
            }
            Ok(Reply::Close) | Err(_) => return,
        }
    }
}
