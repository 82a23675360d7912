use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, EndpointRing};
use crate::session::SessionState;
use resql_core::{ResqlError, Result};
use resql_protocol::backend::decode_connect_response;
use resql_protocol::buffer::CursorBuffer;
use resql_protocol::frame::read_frame;
use resql_protocol::frontend::{encode_connect_request, encode_disconnect_request};
use resql_protocol::messages::ResultCode;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};

/// Stream to one cluster node.
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    pub async fn dial(endpoint: &Endpoint, source: Option<SocketAddr>) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let mut last_error = None;
                let addrs = lookup_host((host.as_str(), *port)).await?;
                for addr in addrs.filter(|addr| source.map_or(true, |src| src.is_ipv4() == addr.is_ipv4())) {
                    match connect_tcp(addr, source).await {
                        Ok(stream) => return Ok(Transport::Tcp(stream)),
                        Err(err) => last_error = Some(err),
                    }
                }
                Err(ResqlError::Transport(last_error.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no usable address for {host}"))
                })))
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => Ok(Transport::Unix(UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Endpoint::Unix { .. } => Err(ResqlError::Config(
                "unix sockets are not supported on this platform".into(),
            )),
        }
    }
}

async fn connect_tcp(addr: SocketAddr, source: Option<SocketAddr>) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(source) = source {
        socket.bind(source)?;
    }
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Point in time an operation must finish by. `None` never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        }
    }

    pub fn unbounded() -> Self {
        Self { at: None }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// `limit`, shortened to what is left before the deadline.
    pub fn cap(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |left| left.min(limit))
    }
}

/// Runs `fut` for at most `limit`. Running out counts as a transport failure
/// of this attempt.
async fn within<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ResqlError::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            "attempt timed out",
        ))),
    }
}

async fn write_message(transport: &mut Transport, bytes: &[u8]) -> Result<()> {
    transport.write_all(bytes).await?;
    transport.flush().await?;
    Ok(())
}

/// Owns the socket to the current node: dialing round-robin, the handshake,
/// and one request/response exchange at a time with transparent reconnects.
pub struct Connection {
    cluster_name: String,
    client_name: String,
    attempt_timeout: Duration,
    retry_interval: Duration,
    source_addr: Option<SocketAddr>,
    endpoints: EndpointRing,
    session: SessionState,
    transport: Option<Transport>,
    resp: CursorBuffer,
    frame_len: usize,
    fault: AtomicBool,
}

impl Connection {
    pub fn new(config: &ClientConfig, client_name: String) -> Result<Self> {
        Ok(Self {
            cluster_name: config.cluster_name.clone(),
            client_name,
            attempt_timeout: config.attempt_timeout(),
            retry_interval: config.retry_interval(),
            source_addr: config.source_addr()?,
            endpoints: EndpointRing::new(config.endpoints()?)?,
            session: SessionState::new(),
            transport: None,
            resp: CursorBuffer::new(),
            frame_len: 0,
            fault: AtomicBool::new(false),
        })
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn endpoints(&self) -> &EndpointRing {
        &self.endpoints
    }

    /// The last response frame, length field included.
    pub fn response_frame(&self) -> &[u8] {
        &self.resp.written()[..self.frame_len]
    }

    pub fn response_buffer(&mut self) -> &mut CursorBuffer {
        &mut self.resp
    }

    /// Raised by result decoding when the last response was malformed.
    pub fn fault_flag(&self) -> &AtomicBool {
        &self.fault
    }

    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            debug!(client = %self.client_name, "connection dropped");
        }
    }

    /// Connects to the first node that accepts the handshake, cycling
    /// through the known endpoints until `deadline`. When time runs out the
    /// last retryable failure is returned.
    pub async fn connect(&mut self, deadline: Deadline) -> Result<()> {
        let mut last_error = None;
        while !deadline.expired() {
            match self.handshake(deadline).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    warn!(client = %self.client_name, error = %err, "connect attempt failed");
                    last_error = Some(err);
                    self.pause(deadline).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(ResqlError::OperationTimeout))
    }

    async fn pause(&self, deadline: Deadline) {
        tokio::time::sleep(deadline.cap(self.retry_interval)).await;
    }

    /// One connection attempt against the next endpoint of the ring.
    async fn handshake(&mut self, deadline: Deadline) -> Result<()> {
        self.disconnect();
        let endpoint = self.endpoints.next();
        let limit = deadline.cap(self.attempt_timeout);
        debug!(%endpoint, "connecting");

        let mut transport = within(limit, Transport::dial(&endpoint, self.source_addr)).await?;
        self.resp.reset();
        encode_connect_request(&mut self.resp, &self.cluster_name, &self.client_name)?;
        within(limit, write_message(&mut transport, self.resp.unread())).await?;

        self.resp.reset();
        within(limit, read_frame(&mut transport, &mut self.resp)).await?;
        let response = decode_connect_response(&mut self.resp)?;

        match self.session.accept_handshake(&response) {
            Ok(Some(nodes)) => {
                info!(term = response.term, nodes = %response.nodes, "cluster membership changed");
                self.endpoints.replace(nodes);
            }
            Ok(None) => {}
            Err(err) => {
                if let ResqlError::SessionLost { server, local } = &err {
                    error!(%endpoint, server, local, "session lost");
                }
                return Err(err);
            }
        }

        self.transport = Some(transport);
        info!(%endpoint, client = %self.client_name, sequence = self.session.sequence(), "connected");
        Ok(())
    }

    /// Sends one request and waits for its response frame, reconnecting and
    /// resending on transport failures until `deadline`. The response is
    /// left in the response buffer.
    pub async fn send_and_receive(&mut self, request: &[u8], deadline: Deadline) -> Result<()> {
        if std::mem::take(self.fault.get_mut()) {
            warn!(client = %self.client_name, "dropping connection after a malformed response");
            self.disconnect();
        }
        loop {
            if deadline.expired() {
                self.disconnect();
                return Err(ResqlError::OperationTimeout);
            }

            if self.transport.is_none() {
                match self.handshake(deadline).await {
                    Ok(()) => {}
                    Err(err) if err.is_retryable() => {
                        warn!(client = %self.client_name, error = %err, "reconnect attempt failed");
                        self.pause(deadline).await;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let limit = deadline.cap(self.attempt_timeout);
            let Some(transport) = self.transport.as_mut() else {
                continue;
            };
            if let Err(err) = within(limit, write_message(transport, request)).await {
                warn!(client = %self.client_name, error = %err, "request not sent");
                self.disconnect();
                continue;
            }

            self.resp.reset();
            match within(limit, read_frame(transport, &mut self.resp)).await {
                Ok(len) => {
                    self.frame_len = len;
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    warn!(client = %self.client_name, error = %err, "response not received");
                    self.disconnect();
                }
                Err(err) => {
                    self.disconnect();
                    return Err(err);
                }
            }
        }
    }

    /// Says goodbye to the server, best effort, and closes the socket.
    pub async fn shutdown(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.resp.reset();
        let sent = match encode_disconnect_request(&mut self.resp, ResultCode::Ok, 0) {
            Ok(()) => within(self.attempt_timeout, write_message(&mut transport, self.resp.unread())).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            debug!(error = %err, "disconnect request not delivered");
        }
        if let Err(err) = transport.shutdown().await {
            debug!(error = %err, "socket shutdown failed");
        }
        info!(client = %self.client_name, "disconnected");
    }
}
