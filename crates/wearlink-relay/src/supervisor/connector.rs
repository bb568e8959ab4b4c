//! Transport connectors.
//!
//! The supervisor opens both sides through these traits so tests can hand it
//! in-memory streams.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens the remote transport.
pub trait RemoteConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// The two local bus channels exposed by the device host.
#[derive(Debug)]
pub struct LocalBus<D, C> {
    /// Telemetry from the device host.
    pub data: D,
    /// Commands to the device host.
    pub control: C,
}

/// Opens the local bus.
pub trait BusConnector: Send + Sync {
    type Data: AsyncRead + Unpin + Send + 'static;
    type Control: AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
    ) -> impl Future<Output = io::Result<LocalBus<Self::Data, Self::Control>>> + Send;
}

/// TCP connection to the remote endpoint, bounded by a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpConnector {
    pub const fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

impl RemoteConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out after {:?}", self.addr, self.timeout),
                )
            })??;
        // Commands are tiny and latency matters more than throughput.
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "Remote transport connected");
        Ok(stream)
    }
}

#[cfg(unix)]
pub use unix::UnixBusConnector;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::path::PathBuf;

    use tokio::net::UnixStream;
    use tracing::debug;

    use super::{BusConnector, LocalBus};

    /// Connects to the device host's unix sockets, data channel first.
    #[derive(Debug, Clone)]
    pub struct UnixBusConnector {
        data_socket: PathBuf,
        control_socket: PathBuf,
    }

    impl UnixBusConnector {
        pub const fn new(data_socket: PathBuf, control_socket: PathBuf) -> Self {
            Self {
                data_socket,
                control_socket,
            }
        }
    }

    impl BusConnector for UnixBusConnector {
        type Data = UnixStream;
        type Control = UnixStream;

        async fn connect(&self) -> io::Result<LocalBus<UnixStream, UnixStream>> {
            let data = UnixStream::connect(&self.data_socket).await.map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("data socket {}: {e}", self.data_socket.display()),
                )
            })?;
            let control = UnixStream::connect(&self.control_socket)
                .await
                .map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("control socket {}: {e}", self.control_socket.display()),
                    )
                })?;
            debug!(
                data = %self.data_socket.display(),
                control = %self.control_socket.display(),
                "Local bus connected"
            );
            Ok(LocalBus { data, control })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_connector_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connector = TcpConnector::new(listener.local_addr().unwrap(), Duration::from_secs(1));

        let (client, server) = tokio::join!(connector.connect(), listener.accept());
        let mut client = client.unwrap();
        let (mut server, _) = server.unwrap();
        assert!(client.nodelay().unwrap());

        client.write_all(b"ping@").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping@");
    }

    #[tokio::test]
    async fn tcp_connector_reports_refusal() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let connector = TcpConnector::new(addr, Duration::from_secs(1));
        assert!(connector.connect().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_connector_opens_both_channels() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data.sock");
        let control_path = dir.path().join("notif.sock");
        let data_listener = tokio::net::UnixListener::bind(&data_path).unwrap();
        let control_listener = tokio::net::UnixListener::bind(&control_path).unwrap();

        let connector = UnixBusConnector::new(data_path, control_path);
        let (bus, data, control) = tokio::join!(
            connector.connect(),
            data_listener.accept(),
            control_listener.accept()
        );
        let mut bus = bus.unwrap();
        let (mut host_data, _) = data.unwrap();
        let (mut host_control, _) = control.unwrap();

        host_data.write_all(b"{}").await.unwrap();
        let mut buf = [0u8; 2];
        bus.data.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"{}");

        bus.control.write_all(b"[]").await.unwrap();
        host_control.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"[]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_connector_names_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let connector =
            UnixBusConnector::new(dir.path().join("data.sock"), dir.path().join("notif.sock"));
        let err = connector.connect().await.unwrap_err();
        assert!(err.to_string().contains("data socket"));
    }
}
