// Peer Network transport (spec.md §4.G).
//
// TCP-based peer transport with a versioned handshake, per-connection
// reader tasks that fan incoming messages into a broadcast channel,
// and a heartbeat watchdog that declares a peer partitioned once it
// misses `failure_threshold` consecutive heartbeats.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};

use crate::common::NodeId;
use crate::config::PeerNetworkConfig;
use crate::error::{Error, Result};
use crate::network::codec::{read_message, write_message};
use crate::network::types::{NetworkEvent, PeerMessage};

struct PeerConnection {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    last_heartbeat: Mutex<Instant>,
    misses: std::sync::atomic::AtomicU32,
}

pub struct PeerNetwork {
    local_id: NodeId,
    config: PeerNetworkConfig,
    connections: DashMap<NodeId, Arc<PeerConnection>>,
    incoming: broadcast::Sender<(NodeId, PeerMessage)>,
    events: broadcast::Sender<NetworkEvent>,
    accepting: AtomicBool,
}

impl PeerNetwork {
    pub fn new(local_id: NodeId, config: PeerNetworkConfig) -> Arc<Self> {
        let (incoming, _) = broadcast::channel(1024);
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            local_id,
            config,
            connections: DashMap::new(),
            incoming,
            events,
            accepting: AtomicBool::new(false),
        })
    }

    pub fn on_message(&self) -> broadcast::Receiver<(NodeId, PeerMessage)> {
        self.incoming.subscribe()
    }

    /// Subscribe to connection-lifecycle events (spec.md §4.G:
    /// `nodeConnected`/`nodeDisconnected`/`nodeError`).
    pub fn on_event(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Bind `config.bind_address` and accept inbound peer connections
    /// in the background until `close` is called.
    pub async fn listen(self: &Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.accepting.store(true, Ordering::SeqCst);
        let network = self.clone();
        tokio::spawn(async move {
            loop {
                if !network.accepting.load(Ordering::SeqCst) {
                    break;
                }
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let network = network.clone();
                        tokio::spawn(async move {
                            if let Err(err) = network.accept_connection(stream).await {
                                tracing::warn!(error = %err, "peer connection failed");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "peer listener accept failed");
                    }
                }
            }
        });
        Ok(())
    }

    async fn accept_connection(self: &Arc<Self>, mut stream: TcpStream) -> Result<()> {
        let (remote_id, protocol_version) = match read_message(&mut stream).await? {
            Some(PeerMessage::Handshake { node_id, protocol_version }) => (node_id, protocol_version),
            _ => return Err(Error::Io("expected handshake as first peer message".to_string())),
        };

        let accepted = protocol_version == self.config.protocol_version;
        write_message(
            &mut stream,
            &PeerMessage::HandshakeAck {
                node_id: self.local_id.clone(),
                protocol_version: self.config.protocol_version,
                accepted,
            },
        )
        .await?;

        if !accepted {
            let _ = self.events.send(NetworkEvent::NodeError {
                peer: remote_id.clone(),
                message: format!(
                    "protocol version mismatch: local {}, remote {}",
                    self.config.protocol_version, protocol_version
                ),
            });
            return Err(Error::ProtocolVersionMismatch {
                peer: remote_id,
                local: self.config.protocol_version,
                remote: protocol_version,
            });
        }

        let (read_half, write_half) = tokio::io::split(stream);
        self.register_connection(remote_id.clone(), Box::new(write_half));
        self.spawn_reader(remote_id, read_half);
        Ok(())
    }

    /// Dial `address`, perform the handshake, and register the
    /// resulting connection under `remote_id`.
    pub async fn connect(self: &Arc<Self>, remote_id: NodeId, address: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(address).await {
                Ok(mut stream) => {
                    write_message(
                        &mut stream,
                        &PeerMessage::Handshake {
                            node_id: self.local_id.clone(),
                            protocol_version: self.config.protocol_version,
                        },
                    )
                    .await?;

                    match read_message(&mut stream).await? {
                        Some(PeerMessage::HandshakeAck { accepted: true, .. }) => {
                            let (read_half, write_half) = tokio::io::split(stream);
                            self.register_connection(remote_id.clone(), Box::new(write_half));
                            self.spawn_reader(remote_id, read_half);
                            return Ok(());
                        }
                        Some(PeerMessage::HandshakeAck {
                            accepted: false,
                            protocol_version,
                            ..
                        }) => {
                            return Err(Error::ProtocolVersionMismatch {
                                peer: remote_id,
                                local: self.config.protocol_version,
                                remote: protocol_version,
                            });
                        }
                        _ => return Err(Error::Io("expected handshake ack".to_string())),
                    }
                }
                Err(err) => {
                    if attempt >= self.config.max_connect_retries {
                        return Err(Error::Io(format!("connect to {address} failed after {attempt} attempts: {err}")));
                    }
                    let base = self.config.connect_backoff_base_ms * attempt as u64;
                    let jittered = base + rand::random::<u64>() % base.max(1);
                    tokio::time::sleep(std::time::Duration::from_millis(jittered)).await;
                }
            }
        }
    }

    fn register_connection(&self, remote_id: NodeId, writer: Box<dyn AsyncWrite + Send + Unpin>) {
        self.connections.insert(
            remote_id.clone(),
            Arc::new(PeerConnection {
                writer: Mutex::new(writer),
                last_heartbeat: Mutex::new(Instant::now()),
                misses: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        let _ = self.events.send(NetworkEvent::NodeConnected(remote_id));
    }

    fn spawn_reader(self: &Arc<Self>, remote_id: NodeId, mut reader: impl AsyncRead + Send + Unpin + 'static) {
        let network = self.clone();
        tokio::spawn(async move {
            loop {
                match read_message(&mut reader).await {
                    Ok(Some(message)) => {
                        if let Some(conn) = network.connections.get(&remote_id) {
                            if matches!(message, PeerMessage::Heartbeat { .. }) {
                                *conn.last_heartbeat.lock().await = Instant::now();
                                conn.misses.store(0, Ordering::SeqCst);
                            }
                        }
                        let _ = network.incoming.send((remote_id.clone(), message));
                    }
                    Ok(None) => {
                        network.connections.remove(&remote_id);
                        let _ = network.events.send(NetworkEvent::NodeDisconnected(remote_id.clone()));
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(peer = %remote_id, error = %err, "peer read failed, disconnecting");
                        network.connections.remove(&remote_id);
                        let _ = network.events.send(NetworkEvent::NodeError {
                            peer: remote_id.clone(),
                            message: err.to_string(),
                        });
                        let _ = network.events.send(NetworkEvent::NodeDisconnected(remote_id.clone()));
                        break;
                    }
                }
            }
        });
    }

    pub async fn send_message(&self, remote_id: &NodeId, message: &PeerMessage) -> Result<()> {
        let conn = self
            .connections
            .get(remote_id)
            .ok_or_else(|| Error::NotConnected(remote_id.clone()))?
            .clone();
        let mut writer = conn.writer.lock().await;
        write_message(&mut *writer, message).await
    }

    pub async fn broadcast_message(&self, message: &PeerMessage) -> Vec<(NodeId, Result<()>)> {
        let ids: Vec<NodeId> = self.connections.iter().map(|e| e.key().clone()).collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.send_message(&id, message).await;
            results.push((id, result));
        }
        results
    }

    pub fn is_connected(&self, remote_id: &NodeId) -> bool {
        self.connections.contains_key(remote_id)
    }

    pub fn get_connected_nodes(&self) -> Vec<NodeId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn disconnect(&self, remote_id: &NodeId) -> Result<()> {
        self.connections
            .remove(remote_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotConnected(remote_id.clone()))
    }

    /// Check every connection's last heartbeat against
    /// `config.failure_threshold` misses; peers that exceed it are
    /// dropped and reported back for the caller to raise
    /// `NetworkPartition` or trigger a reconnect.
    pub async fn check_heartbeats(&self, heartbeat_interval: std::time::Duration) -> Vec<NodeId> {
        let mut partitioned = Vec::new();
        for entry in self.connections.iter() {
            let conn = entry.value();
            let elapsed = conn.last_heartbeat.lock().await.elapsed();
            if elapsed > heartbeat_interval {
                let misses = conn.misses.fetch_add(1, Ordering::SeqCst) + 1;
                if misses >= self.config.failure_threshold {
                    partitioned.push(entry.key().clone());
                }
            }
        }
        for id in &partitioned {
            self.connections.remove(id);
        }
        partitioned
    }

    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_handshake_over_loopback() {
        // Bind a listener ourselves to discover an ephemeral port,
        // since PeerNetwork::listen does not expose the bound address.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut bound_config = PeerNetworkConfig::default();
        bound_config.bind_address = addr.to_string();
        let server = PeerNetwork::new(NodeId::new("server"), bound_config);
        server.listen().await.unwrap();

        let client = PeerNetwork::new(NodeId::new("client"), PeerNetworkConfig::default());
        client.connect(NodeId::new("server"), &addr.to_string()).await.unwrap();

        assert!(client.is_connected(&NodeId::new("server")));

        client
            .send_message(
                &NodeId::new("server"),
                &PeerMessage::Heartbeat {
                    node_id: NodeId::new("client"),
                    term: 1,
                },
            )
            .await
            .unwrap();
    }
}
