//! Socket client with per-operation deadlines.

use gecko_core::ComponentConfig;
use std::{io, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time::timeout,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_BUFFER_SIZE: usize = 512;

/// Errors raised by [`SocketClient`].
#[derive(Error, Debug)]
pub enum SocketError {
    /// Network type is neither `tcp` nor `udp`.
    #[error("unknown network type: {0}")]
    UnknownNetwork(String),

    /// Dialing the remote address failed.
    #[error("{network} dial to {addr} failed")]
    Dial {
        /// Network type.
        network: Network,
        /// Remote address.
        addr: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// `send`/`receive` before `open` (or after `close`).
    #[error("client connection is not ready")]
    NotConnected,

    /// The operation did not finish before its deadline.
    #[error("socket operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Invalid client configuration.
    #[error("invalid socket configuration: {0}")]
    Config(String),
}

/// Transport type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// Stream socket.
    Tcp,
    /// Datagram socket.
    Udp,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        })
    }
}

impl std::str::FromStr for Network {
    type Err = SocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "udp" => Ok(Network::Udp),
            other => Err(SocketError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Transport type.
    pub network: Network,
    /// Remote `host:port`.
    pub addr: String,
    /// Deadline for each read.
    pub read_timeout: Duration,
    /// Deadline for each write.
    pub write_timeout: Duration,
    /// Size of the receive buffer used by callers.
    pub buffer_size: usize,
}

impl SocketConfig {
    /// Settings with default deadlines and buffer size.
    pub fn new(network: Network, addr: impl Into<String>) -> Self {
        Self {
            network,
            addr: addr.into(),
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Read settings from a component configuration.
    ///
    /// Keys: `network` (default `tcp`), `remote` (required),
    /// `readTimeoutMs`, `writeTimeoutMs`, `bufferSize`.
    pub fn from_config(config: &ComponentConfig) -> Result<Self, SocketError> {
        let bad = |e: gecko_core::ConfigError| SocketError::Config(e.to_string());
        let network = config.get_str("network").unwrap_or("tcp").parse()?;
        let addr = config.must_str("remote").map_err(bad)?;
        let millis = |key: &str| -> Result<Duration, SocketError> {
            let ms = config
                .get_i64_or(key, DEFAULT_TIMEOUT.as_millis() as i64)
                .map_err(bad)?;
            u64::try_from(ms)
                .map(Duration::from_millis)
                .map_err(|_| SocketError::Config(format!("{key} must not be negative")))
        };
        let buffer_size = config
            .get_i64_or("bufferSize", DEFAULT_BUFFER_SIZE as i64)
            .map_err(bad)?;
        let buffer_size = usize::try_from(buffer_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| SocketError::Config("bufferSize must be positive".to_string()))?;
        Ok(Self {
            network,
            addr: addr.to_string(),
            read_timeout: millis("readTimeoutMs")?,
            write_timeout: millis("writeTimeoutMs")?,
            buffer_size,
        })
    }
}

#[derive(Debug)]
enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// A TCP or UDP client socket.
#[derive(Debug)]
pub struct SocketClient {
    config: SocketConfig,
    conn: Option<Connection>,
}

impl SocketClient {
    /// Create an unconnected client.
    pub fn new(config: SocketConfig) -> Self {
        Self { config, conn: None }
    }

    /// Connection settings.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Receive buffer size.
    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    /// Returns `true` after a successful `open`.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Dial the remote address.
    pub async fn open(&mut self) -> Result<(), SocketError> {
        let network = self.config.network;
        let addr = self.config.addr.clone();
        let dial_err = |source| SocketError::Dial {
            network,
            addr: addr.clone(),
            source,
        };
        let conn = match network {
            Network::Tcp => Connection::Tcp(TcpStream::connect(&addr).await.map_err(dial_err)?),
            Network::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(dial_err)?;
                socket.connect(&addr).await.map_err(dial_err)?;
                Connection::Udp(socket)
            }
        };
        self.conn = Some(conn);
        Ok(())
    }

    /// Close the connection. Closing an unopened client is a no-op.
    pub async fn close(&mut self) -> Result<(), SocketError> {
        if let Some(Connection::Tcp(mut stream)) = self.conn.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    /// Read into `buf`, waiting at most the read deadline.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let deadline = self.config.read_timeout;
        let read = async {
            match self.conn.as_mut() {
                Some(Connection::Tcp(stream)) => stream.read(buf).await,
                Some(Connection::Udp(socket)) => socket.recv(buf).await,
                None => Err(io::Error::from(io::ErrorKind::NotConnected)),
            }
        };
        with_deadline(deadline, read).await
    }

    /// Write `data`, waiting at most the write deadline.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        let deadline = self.config.write_timeout;
        let write = async {
            match self.conn.as_mut() {
                Some(Connection::Tcp(stream)) => stream.write_all(data).await.map(|_| data.len()),
                Some(Connection::Udp(socket)) => socket.send(data).await,
                None => Err(io::Error::from(io::ErrorKind::NotConnected)),
            }
        };
        with_deadline(deadline, write).await
    }
}

async fn with_deadline<F>(deadline: Duration, op: F) -> Result<usize, SocketError>
where
    F: std::future::Future<Output = io::Result<usize>>,
{
    match timeout(deadline, op).await {
        Err(_) => Err(SocketError::Timeout(deadline)),
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotConnected => Err(SocketError::NotConnected),
        Ok(result) => Ok(result?),
    }
}
