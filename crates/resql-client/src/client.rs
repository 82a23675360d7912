use crate::config::{generate_client_name, ClientConfig};
use crate::connection::{Connection, Deadline};
use crate::endpoint::Endpoint;
use crate::result::ResultStream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use resql_core::{ResqlError, Result, Value};
use resql_protocol::backend::{decode_client_response, decode_prepared_id};
use resql_protocol::buffer::{CursorBuffer, Reader};
use resql_protocol::frontend::{
    begin_client_request, end_task, finalize_client_request, put_delete_prepared,
    put_param_by_index, put_param_by_name, put_prepare, put_prepared_statement, put_statement,
};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Server-side compiled statement. Consumed by [`Client::delete`].
#[derive(Debug)]
pub struct PreparedStatement {
    id: u64,
    sql: String,
}

impl PreparedStatement {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Connection to a resql cluster.
///
/// Statements are collected into a batch with [`put_statement`] and
/// [`put_prepared`], parameters attached with the `bind_*` methods, and the
/// whole batch is sent by [`execute`]. Binding mistakes are remembered and
/// reported by `execute`, which clears the batch either way.
///
/// [`put_statement`]: Client::put_statement
/// [`put_prepared`]: Client::put_prepared
/// [`execute`]: Client::execute
pub struct Client {
    connection: Connection,
    req: CursorBuffer,
    timeout: Option<Duration>,
    has_statement: bool,
    deferred: Option<ResqlError>,
}

impl Client {
    /// Connects to the cluster, trying every configured node until one
    /// accepts or the configured timeout expires.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with_rng(config, &mut StdRng::from_entropy()).await
    }

    /// Like [`Client::connect`], drawing the client name from `rng` when the
    /// configuration has none.
    pub fn connect_with_rng<R: Rng + ?Sized>(
        config: ClientConfig,
        rng: &mut R,
    ) -> impl Future<Output = Result<Self>> {
        let name = match &config.name {
            Some(name) => name.clone(),
            None => generate_client_name(rng),
        };
        Self::open(config, name)
    }

    async fn open(config: ClientConfig, name: String) -> Result<Self> {
        config.validate()?;
        let mut client = Self {
            connection: Connection::new(&config, name)?,
            req: CursorBuffer::new(),
            timeout: config.timeout(),
            has_statement: false,
            deferred: None,
        };
        client.clear();
        client
            .connection
            .connect(Deadline::after(client.timeout))
            .await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        self.connection.client_name()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Sequence number of the last mutating request.
    pub fn sequence(&self) -> u64 {
        self.connection.session().sequence()
    }

    pub fn term(&self) -> u64 {
        self.connection.session().term()
    }

    /// Endpoints in the order they will be tried.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.connection.endpoints().iter().cloned().collect()
    }

    /// Discards the pending batch and any remembered misuse.
    pub fn clear(&mut self) {
        self.has_statement = false;
        self.deferred = None;
        if let Err(err) = begin_client_request(&mut self.req) {
            self.deferred = Some(err);
        }
    }

    fn defer(&mut self, result: Result<()>) {
        if let Err(err) = result {
            debug!(error = %err, "deferring batch error");
            self.deferred.get_or_insert(err);
        }
    }

    fn close_statement(&mut self) -> Result<()> {
        if self.has_statement {
            self.has_statement = false;
            end_task(&mut self.req)?;
        }
        Ok(())
    }

    pub fn put_statement(&mut self, sql: &str) -> &mut Self {
        let result = self
            .close_statement()
            .and_then(|()| put_statement(&mut self.req, sql));
        self.has_statement = true;
        self.defer(result);
        self
    }

    pub fn put_prepared(&mut self, statement: &PreparedStatement) -> &mut Self {
        let result = self
            .close_statement()
            .and_then(|()| put_prepared_statement(&mut self.req, statement.id));
        self.has_statement = true;
        self.defer(result);
        self
    }

    pub fn bind_by_name(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let result = if self.has_statement {
            put_param_by_name(&mut self.req, name, &value.into())
        } else {
            Err(ResqlError::Misuse("missing statement before binding".into()))
        };
        self.defer(result);
        self
    }

    pub fn bind_by_index(&mut self, index: u32, value: impl Into<Value>) -> &mut Self {
        let result = if self.has_statement {
            put_param_by_index(&mut self.req, index, &value.into())
        } else {
            Err(ResqlError::Misuse("missing statement before binding".into()))
        };
        self.defer(result);
        self
    }

    /// Sends the pending batch. Mutating batches consume a sequence number;
    /// readonly ones reuse the current one.
    pub async fn execute(&mut self, readonly: bool) -> Result<ResultStream<'_>> {
        if let Some(err) = self.deferred.take() {
            self.clear();
            return Err(err);
        }
        if !self.has_statement {
            self.clear();
            return Err(ResqlError::Misuse("missing statement".into()));
        }
        if let Err(err) = self.close_statement() {
            self.clear();
            return Err(err);
        }

        self.round_trip(readonly).await?;
        let pos = self.checked_response()?;
        let reader = Reader::at(self.connection.response_frame(), pos)?;
        ResultStream::tracked(reader, self.connection.fault_flag())
    }

    /// Compiles `sql` on the server. Must not be mixed into a batch.
    pub async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.standalone_task(|req| put_prepare(req, sql))?;
        self.round_trip(false).await?;
        let pos = self.checked_response()?;
        let mut reader = Reader::at(self.connection.response_frame(), pos)?;
        let id = decode_prepared_id(&mut reader)?;
        debug!(id, sql, "statement prepared");
        Ok(PreparedStatement {
            id,
            sql: sql.to_string(),
        })
    }

    pub async fn delete(&mut self, statement: PreparedStatement) -> Result<()> {
        self.standalone_task(|req| put_delete_prepared(req, statement.id))?;
        self.round_trip(false).await?;
        self.checked_response()?;
        debug!(id = statement.id, "prepared statement deleted");
        Ok(())
    }

    fn standalone_task(&mut self, put: impl FnOnce(&mut CursorBuffer) -> Result<()>) -> Result<()> {
        if self.has_statement {
            self.clear();
            return Err(ResqlError::Misuse(
                "operation not allowed while a batch is pending".into(),
            ));
        }
        if let Some(err) = self.deferred.take() {
            self.clear();
            return Err(err);
        }
        if let Err(err) = put(&mut self.req) {
            self.clear();
            return Err(err);
        }
        Ok(())
    }

    /// Stamps and sends the pending request, then clears it.
    async fn round_trip(&mut self, readonly: bool) -> Result<()> {
        let session = self.connection.session_mut();
        let sequence = if readonly {
            session.sequence()
        } else {
            session.next_sequence()
        };
        let sent = match finalize_client_request(&mut self.req, readonly, sequence) {
            Ok(()) => {
                self.connection
                    .send_and_receive(self.req.unread(), Deadline::after(self.timeout))
                    .await
            }
            Err(err) => Err(err),
        };
        self.clear();
        sent
    }

    /// Validates the response envelope and returns where its payload
    /// starts. Malformed responses drop the connection.
    fn checked_response(&mut self) -> Result<usize> {
        let checked = decode_client_response(self.connection.response_buffer())
            .map(|reader| reader.position());
        match checked {
            Ok(pos) => Ok(pos),
            Err(err) => {
                if err.invalidates_connection() {
                    self.connection.disconnect();
                }
                Err(err)
            }
        }
    }

    /// Sends a disconnect notice, best effort, and closes the connection.
    pub async fn shutdown(mut self) {
        self.connection.shutdown().await;
    }
}
