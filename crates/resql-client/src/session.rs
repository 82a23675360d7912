use crate::endpoint::{parse_node_list, Endpoint};
use resql_core::{ResqlError, Result};
use resql_protocol::messages::{ConnectResponse, ResultCode};

/// Client side of the session continuity protocol.
///
/// `sequence` is the number of the last mutating request this client issued.
/// A reconnecting client must find the server on the same number, or one
/// behind when the last request never made it; anything else means the
/// server no longer holds this session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    sequence: u64,
    term: u64,
    established: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Claims the sequence number for the next mutating request.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Returns the announced node list when `term` is newer than any seen so
    /// far. The term only advances together with a usable list.
    pub fn observe_topology(&mut self, term: u64, nodes: &str) -> Option<Vec<Endpoint>> {
        if term <= self.term {
            return None;
        }
        let endpoints = parse_node_list(nodes);
        if endpoints.is_empty() {
            return None;
        }
        self.term = term;
        Some(endpoints)
    }

    /// Checks the sequence number reported in a handshake against ours. The
    /// first handshake of a client adopts the server's number.
    ///
    /// A mismatch is reported as `SessionLost`; the server's number is then
    /// taken over so the next handshake starts a fresh session.
    pub fn reconcile(&mut self, server: u64) -> Result<()> {
        if !self.established {
            self.sequence = server;
            self.established = true;
            return Ok(());
        }
        if server == self.sequence || server == self.sequence.wrapping_sub(1) {
            return Ok(());
        }
        let local = self.sequence;
        self.sequence = server;
        Err(ResqlError::SessionLost { server, local })
    }

    /// Validates a connect response: topology first, then the result code,
    /// then the sequence number. Returns the replacement node list, if any.
    pub fn accept_handshake(&mut self, response: &ConnectResponse) -> Result<Option<Vec<Endpoint>>> {
        let topology = self.observe_topology(response.term, &response.nodes);
        match response.code {
            ResultCode::Ok => {}
            ResultCode::ClusterNameMismatch => return Err(ResqlError::ClusterNameMismatch),
            code => return Err(ResqlError::Rejected(code.to_string())),
        }
        self.reconcile(response.sequence)?;
        Ok(topology)
    }
}
