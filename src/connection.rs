/*!
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file connection.rs
 * @brief Per-connection read/write loop, buffer accumulation, TLS negotiation (§4.6)
 */

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::router::Router;
use crate::session::SessionTable;
use crate::wire::{self, FrameAccumulator};

const READ_CHUNK_SIZE: usize = 16 * 1024;

enum PeerStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl PeerStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            PeerStream::Plain(s) => s.read(buf).await,
            PeerStream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            PeerStream::Plain(s) => s.write_all(buf).await,
            PeerStream::Tls(s) => s.write_all(buf).await,
        }
    }
}

/// One logical task per accepted connection (§4.6). Dispatch is strictly
/// serial within a connection: response N is written before command N+1
/// is read (§5).
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: std::net::SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    router: Arc<Router>,
    sessions: Arc<SessionTable>,
) {
    let connection_id = sessions.create();
    info!("connection {} accepted from {}", connection_id, peer_addr);

    let mut peer = match negotiate(stream, tls_acceptor).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!("TLS negotiation failed for {}: {}", peer_addr, e);
            sessions.remove(connection_id);
            return;
        }
    };

    let mut accumulator = FrameAccumulator::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match peer.read(&mut buf).await {
            Ok(0) => {
                debug!("connection {} closed by peer", connection_id);
                break;
            }
            Ok(n) => accumulator.feed(&buf[..n]),
            Err(e) => {
                warn!("connection {} read error: {}", connection_id, e);
                break;
            }
        }

        loop {
            let message = match accumulator.try_next() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!("connection {} framing error: {}", connection_id, e);
                    return cleanup(&router, &sessions, connection_id).await;
                }
            };

            let peer_addr_string = peer_addr.to_string();
            let extracted = match wire::extract(&message) {
                Ok(extracted) => extracted,
                Err(e) => {
                    let reply = wire::serialize_error_reply(&message, &e);
                    if peer.write_all(&reply).await.is_err() {
                        return cleanup(&router, &sessions, connection_id).await;
                    }
                    continue;
                }
            };

            let response = router.route(extracted, connection_id, &peer_addr_string).await;
            let reply = match wire::serialize_reply(&message, &response) {
                Ok(bytes) => bytes,
                Err(e) => wire::serialize_error_reply(&message, &e),
            };

            if peer.write_all(&reply).await.is_err() {
                return cleanup(&router, &sessions, connection_id).await;
            }
        }
    }

    cleanup(&router, &sessions, connection_id).await;
}

async fn cleanup(router: &Router, sessions: &SessionTable, connection_id: u64) {
    router.on_connection_closed(connection_id);
    sessions.remove(connection_id);
    debug!("connection {} cleaned up", connection_id);
}

async fn negotiate(stream: TcpStream, tls_acceptor: Option<TlsAcceptor>) -> std::io::Result<PeerStream> {
    match tls_acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor.accept(stream).await?;
            Ok(PeerStream::Tls(Box::new(tls_stream)))
        }
        None => Ok(PeerStream::Plain(stream)),
    }
}
