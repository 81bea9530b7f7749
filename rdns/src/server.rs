//! UDP and TCP listener loops. Each inbound message is dispatched to a
//! worker task; both loops observe a shared cancellation signal between
//! reads and exit cleanly when it fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Semaphore, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handler::RequestHandler;
use crate::packet;

pub async fn bind_udp(config: &ServerConfig) -> Result<Arc<UdpSocket>> {
    let addr: SocketAddr = config.udp_addr().parse()?;
    Ok(Arc::new(UdpSocket::bind(addr).await?))
}

pub async fn bind_tcp(config: &ServerConfig) -> Result<Arc<TcpListener>> {
    let addr: SocketAddr = config.tcp_addr().parse()?;
    Ok(Arc::new(TcpListener::bind(addr).await?))
}

/// Serve DNS over UDP until the shutdown signal fires.
pub async fn run_udp_listener(
    socket: Arc<UdpSocket>,
    handler: Arc<RequestHandler>,
    mut shutdown: watch::Receiver<bool>,
    max_udp_size: usize,
) -> Result<()> {
    info!(addr = %socket.local_addr()?, "DNS UDP listener started");
    let mut buf = vec![0u8; max_udp_size];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("UDP listener shutting down");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "UDP recv error");
                        continue;
                    }
                };

                // Copy out so the listener can reuse its buffer immediately
                let query = buf[..len].to_vec();
                let socket = socket.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let Some(mut response) = handler.handle(&query, src).await else {
                        return;
                    };
                    packet::truncate_for_udp(&mut response, packet::MAX_UDP_MESSAGE);
                    if let Err(e) = socket.send_to(&response, src).await {
                        debug!(%src, error = %e, "failed to send UDP response");
                    }
                });
            }
        }
    }
}

/// Serve DNS over TCP until the shutdown signal fires. Connections beyond
/// the configured limit are dropped at accept time.
pub async fn run_tcp_listener(
    listener: Arc<TcpListener>,
    handler: Arc<RequestHandler>,
    mut shutdown: watch::Receiver<bool>,
    config: ServerConfig,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "DNS TCP listener started");
    let connections = Arc::new(Semaphore::new(config.max_connections));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("TCP listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, src) = match accepted {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "TCP accept error");
                        continue;
                    }
                };

                let Ok(permit) = connections.clone().try_acquire_owned() else {
                    debug!(%src, "connection limit reached, dropping connection");
                    continue;
                };

                let handler = handler.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = serve_tcp_connection(stream, src, &handler, &config).await {
                        debug!(%src, error = %e, "TCP connection error");
                    }
                });
            }
        }
    }
}

/// Serve length-prefixed DNS messages on one connection until EOF, an
/// invalid length, a timeout, or an I/O error.
async fn serve_tcp_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    handler: &RequestHandler,
    config: &ServerConfig,
) -> Result<()> {
    let read_timeout = Duration::from_secs(config.read_timeout_secs);
    let write_timeout = Duration::from_secs(config.write_timeout_secs);
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

    loop {
        // Waiting for the next length prefix is bounded by the idle cutoff
        let mut len_buf = [0u8; 2];
        match timeout(idle_timeout, stream.read_exact(&mut len_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!(%src, "TCP connection idle, closing");
                return Ok(());
            }
        }

        let msg_len = u16::from_be_bytes(len_buf) as usize;
        if msg_len == 0 {
            debug!(%src, "zero-length TCP message, closing");
            return Ok(());
        }

        let mut query = vec![0u8; msg_len];
        timeout(read_timeout, stream.read_exact(&mut query)).await??;

        let Some(response) = handler.handle(&query, src).await else {
            return Ok(());
        };

        timeout(write_timeout, async {
            stream
                .write_all(&(response.len() as u16).to_be_bytes())
                .await?;
            stream.write_all(&response).await
        })
        .await??;
    }
}
