//! Outbound connection establishment
//!
//! A connection attempt is bounded twice: each try by the connection
//! timeout, the whole call by `retries` tries spaced by a fixed delay.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{R66Error, Result};

use super::tls::{TLS_CONNECTOR, partner_server_name};

/// Keepalive probe idle time on session sockets
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Byte stream a session runs over (plain TCP or TLS)
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Channel for T {}

/// Established outbound channel
pub struct Connection {
    pub stream: Box<dyn Channel>,
    pub peer_addr: SocketAddr,
    pub tls: bool,
}

/// How to reach a partner
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub tls: bool,
    /// Total attempts (at least one is always made)
    pub retries: u32,
    pub retry_delay: Duration,
    /// Bound on each attempt, TLS handshake included
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &ServerConfig, tls: bool) -> Self {
        Self {
            tls,
            retries: config.connect_retries,
            retry_delay: config.connect_retry_delay(),
            timeout: config.timeout_con(),
        }
    }
}

/// Open a channel to `address:port`
///
/// # Errors
///
/// Returns [`R66Error::ConnectionImpossible`] once every attempt has failed.
pub async fn connect(address: &str, port: u16, options: &ConnectOptions) -> Result<Connection> {
    let attempts = options.retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match try_connect(address, port, options).await {
            Ok(connection) => {
                debug!(peer = %connection.peer_addr, attempt, tls = options.tls, "connected");
                return Ok(connection);
            }
            Err(e) => {
                warn!(address, port, attempt, error = %e, "connection attempt failed");
                last_error = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(options.retry_delay).await;
        }
    }

    Err(R66Error::ConnectionImpossible(format!(
        "{address}:{port} after {attempts} attempts: {last_error}"
    )))
}

async fn try_connect(
    address: &str,
    port: u16,
    options: &ConnectOptions,
) -> std::result::Result<Connection, String> {
    tokio::time::timeout(options.timeout, async {
        let tcp = TcpStream::connect((address, port))
            .await
            .map_err(|e| e.to_string())?;
        configure_socket(&tcp);
        let peer_addr = tcp.peer_addr().map_err(|e| e.to_string())?;

        let stream: Box<dyn Channel> = if options.tls {
            let tls = TLS_CONNECTOR
                .connect(partner_server_name(), tcp)
                .await
                .map_err(|e| format!("TLS handshake failed: {e}"))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        Ok(Connection {
            stream,
            peer_addr,
            tls: options.tls,
        })
    })
    .await
    .map_err(|_| format!("timed out after {}ms", options.timeout.as_millis()))?
}

/// Nodelay and keepalive for session sockets; failures only cost latency
pub fn configure_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        debug!(error = %e, "could not enable TCP keepalive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn options(retries: u32, delay_ms: u64) -> ConnectOptions {
        ConnectOptions {
            tls: false,
            retries,
            retry_delay: Duration::from_millis(delay_ms),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut connection = connect("127.0.0.1", port, &options(1, 10)).await.unwrap();
        assert!(!connection.tls);
        assert_eq!(connection.peer_addr.port(), port);
        connection.stream.write_all(b"ping").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_connect_retries_then_fails() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let started = Instant::now();
        let err = connect("127.0.0.1", port, &options(3, 50)).await.err().unwrap();
        assert!(matches!(err, R66Error::ConnectionImpossible(_)));
        assert!(err.to_string().contains("after 3 attempts"));
        // two delays between three attempts
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_retries_still_tries_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(connect("127.0.0.1", port, &options(0, 10)).await.is_ok());
    }
}
