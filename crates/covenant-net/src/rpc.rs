// Peer-to-peer RPC fallback, used when the blob transport (`Adaptor`) has
// been retried and exhausted. Three calls cover the whole surface:
// `GetEntryByEncodedHash`, `GetLastLogEntryInfoOfNode`, `GetValue`. Framing
// is a length-prefixed bincode payload over a bare `TcpStream`.

use std::collections::HashMap;
use std::sync::Arc;

use covenant_log::{EncodedHash, LogEngine, LogEntry, NodeId, VersionInfo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use serde::{Deserialize, Serialize};

use crate::error::NetError;

#[derive(Serialize, Deserialize)]
enum PeerRequest {
    GetEntryByEncodedHash(EncodedHash),
    GetLastLogEntryInfoOfNode(NodeId),
    GetValue(EncodedHash),
}

#[derive(Serialize, Deserialize)]
enum PeerResponse {
    Entry(Option<LogEntry>),
    VersionInfo(Option<VersionInfo>),
    Value(Option<Vec<u8>>),
}

async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(bytes).await
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Serves the peer-RPC surface for one node's `LogEngine` at a single bound
/// port; the node id is implicit in which socket a caller dialed.
pub struct RpcServer {
    engine: Arc<LogEngine>,
}

impl RpcServer {
    pub fn new(engine: Arc<LogEngine>) -> Self {
        Self { engine }
    }

    /// Bind `addr` and serve connections until the process exits. Each
    /// connection handles exactly one request/response pair; there is no
    /// persistent per-connection session state.
    pub async fn serve(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        loop {
            let (stream, _peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    tracing::debug!(%err, "peer rpc connection failed");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let request_bytes = read_frame(&mut stream).await?;
        let request: PeerRequest = covenant_codec::decode(&request_bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let response = self.handle_request(request);
        let response_bytes = covenant_codec::encode(&response)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        write_frame(&mut stream, &response_bytes).await
    }

    /// Checks for absence up front and reports a missing entry as
    /// `Entry(None)`, which the client maps to `NetError::NotFound` instead
    /// of losing the connection.
    fn handle_request(&self, request: PeerRequest) -> PeerResponse {
        match request {
            PeerRequest::GetEntryByEncodedHash(hash) => {
                let entry = self.engine.entry_by_hash(&hash).map(|arc| (*arc).clone());
                PeerResponse::Entry(entry)
            }
            PeerRequest::GetLastLogEntryInfoOfNode(node_id) => {
                PeerResponse::VersionInfo(self.engine.last_version_info_of(&node_id))
            }
            PeerRequest::GetValue(hash) => {
                let value = self.engine.read_value(&hash).ok();
                PeerResponse::Value(value)
            }
        }
    }
}

/// Client half: dials a peer's RPC listener by its `node_ip_map` address.
pub struct RpcClient {
    node_ip_map: HashMap<NodeId, String>,
}

impl RpcClient {
    pub fn new(node_ip_map: HashMap<NodeId, String>) -> Self {
        Self { node_ip_map }
    }

    async fn call(&self, node_id: &NodeId, request: PeerRequest) -> Result<PeerResponse, NetError> {
        let addr = self
            .node_ip_map
            .get(node_id)
            .ok_or_else(|| NetError::UnknownNode(node_id.0.clone()))?;
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetError::Unavailable(e.to_string()))?;
        let bytes = covenant_codec::encode(&request)?;
        write_frame(&mut stream, &bytes)
            .await
            .map_err(|e| NetError::Unavailable(e.to_string()))?;
        let response_bytes = read_frame(&mut stream)
            .await
            .map_err(|e| NetError::Unavailable(e.to_string()))?;
        covenant_codec::decode(&response_bytes).map_err(NetError::from)
    }

    pub async fn get_entry_by_encoded_hash(
        &self,
        node_id: &NodeId,
        hash: &EncodedHash,
    ) -> Result<LogEntry, NetError> {
        match self
            .call(node_id, PeerRequest::GetEntryByEncodedHash(hash.clone()))
            .await?
        {
            PeerResponse::Entry(Some(entry)) => Ok(entry),
            PeerResponse::Entry(None) => Err(NetError::NotFound(hash.0.clone())),
            _ => Err(NetError::Malformed("unexpected response shape".into())),
        }
    }

    pub async fn get_last_log_entry_info_of_node(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<VersionInfo>, NetError> {
        match self
            .call(node_id, PeerRequest::GetLastLogEntryInfoOfNode(node_id.clone()))
            .await?
        {
            PeerResponse::VersionInfo(vi) => Ok(vi),
            _ => Err(NetError::Malformed("unexpected response shape".into())),
        }
    }

    pub async fn get_value(&self, node_id: &NodeId, hash: &EncodedHash) -> Result<Vec<u8>, NetError> {
        match self.call(node_id, PeerRequest::GetValue(hash.clone())).await? {
            PeerResponse::Value(Some(value)) => Ok(value),
            PeerResponse::Value(None) => Err(NetError::NotFound(hash.0.clone())),
            _ => Err(NetError::Malformed("unexpected response shape".into())),
        }
    }
}
