//! Link Connection Module
//!
//! Opens the stream to a selected device on a fixed channel and classifies
//! low-level failures. Links are reached either through a TCP bridge or,
//! with the `serial` feature, through a serial port the OS has already bound
//! to the device channel (an RFCOMM/SPP port such as `/dev/rfcomm0` or `COM5`).

use crate::domain::errors::ConnectError;
use crate::domain::models::DeviceDescriptor;
use crate::domain::settings::{LinkKind, TransportSettings};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Writable half of an open link
pub trait LinkStream: AsyncWrite + Unpin + Send {}

impl<T: AsyncWrite + Unpin + Send> LinkStream for T {}

/// Low-level connect primitive
#[async_trait]
pub trait StreamConnector: Send {
    async fn open(
        &mut self,
        device: &DeviceDescriptor,
        channel: u8,
    ) -> io::Result<Box<dyn LinkStream>>;
}

/// Stream connector for links exposed through a TCP bridge.
///
/// Channel `N` of a device at `address` is reached on port `port_base + N`.
pub struct TcpConnector {
    port_base: u16,
}

impl TcpConnector {
    pub fn new(port_base: u16) -> Self {
        Self { port_base }
    }

    pub fn port_for(&self, channel: u8) -> io::Result<u16> {
        self.port_base
            .checked_add(u16::from(channel))
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "channel port out of range"))
    }
}

#[async_trait]
impl StreamConnector for TcpConnector {
    async fn open(
        &mut self,
        device: &DeviceDescriptor,
        channel: u8,
    ) -> io::Result<Box<dyn LinkStream>> {
        let port = self.port_for(channel)?;
        let stream = TcpStream::connect((device.address.as_str(), port)).await?;
        // frames are tiny and latency-sensitive
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialConnector;

#[cfg(feature = "serial")]
mod serial {
    use super::{LinkStream, StreamConnector};
    use crate::domain::models::DeviceDescriptor;
    use async_trait::async_trait;
    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{self, Write};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    /// Bytes buffered between the async writer and the port thread
    const PIPE_CAPACITY: usize = 256;

    /// Stream connector for serial-port links.
    ///
    /// The device address is the port path. The channel is fixed when the OS
    /// binds the port, so it is only logged here.
    pub struct SerialConnector {
        baud_rate: u32,
        write_timeout: Duration,
    }

    impl SerialConnector {
        pub fn new(baud_rate: u32) -> Self {
            Self {
                baud_rate,
                write_timeout: Duration::from_millis(100),
            }
        }
    }

    #[async_trait]
    impl StreamConnector for SerialConnector {
        async fn open(
            &mut self,
            device: &DeviceDescriptor,
            channel: u8,
        ) -> io::Result<Box<dyn LinkStream>> {
            let path = device.address.clone();
            let baud_rate = self.baud_rate;
            let write_timeout = self.write_timeout;

            let port = tokio::task::spawn_blocking(move || {
                serialport::new(path, baud_rate)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(FlowControl::None)
                    .timeout(write_timeout)
                    .open()
            })
            .await
            .map_err(io::Error::other)??;

            info!(
                "Opened serial port {} at {} baud (channel {} bound by the OS)",
                device.address, baud_rate, channel
            );

            // the port is blocking; one thread owns it and drains the pipe
            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            let (tx, rx) = mpsc::unbounded_channel();
            std::thread::Builder::new()
                .name("serial-writer".into())
                .spawn(move || write_port(port, rx))?;
            tokio::spawn(forward(remote, tx));

            Ok(Box::new(local))
        }
    }

    async fn forward(mut pipe: DuplexStream, tx: mpsc::UnboundedSender<Vec<u8>>) {
        let mut buf = [0u8; PIPE_CAPACITY];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
        // dropping the pipe makes further link writes fail
    }

    fn write_port(mut port: Box<dyn SerialPort>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(chunk) = rx.blocking_recv() {
            if let Err(e) = port.write_all(&chunk).and_then(|_| port.flush()) {
                warn!("Serial write failed: {}", e);
                return;
            }
        }
        debug!("Serial link closed");
    }
}

/// Pick the stream connector for the configured link kind
pub fn create_connector(settings: &TransportSettings) -> Box<dyn StreamConnector> {
    if settings.link == LinkKind::Serial {
        #[cfg(feature = "serial")]
        {
            info!("Using serial link at {} baud", settings.baud_rate);
            return Box::new(SerialConnector::new(settings.baud_rate));
        }

        #[cfg(not(feature = "serial"))]
        {
            warn!("Serial link support not compiled in, falling back to TCP");
        }
    }

    info!("Using TCP link, channel ports start at {}", settings.port_base);
    Box::new(TcpConnector::new(settings.port_base))
}

/// Map an OS-level connect failure onto the connect taxonomy
pub fn classify_connect_error(err: &io::Error) -> ConnectError {
    match err.kind() {
        io::ErrorKind::AddrInUse => ConnectError::AddressInUse,
        io::ErrorKind::AddrNotAvailable => ConnectError::AddressUnavailable,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ConnectError::HostUnreachable
        }
        // the device never answered inside the connect window
        io::ErrorKind::TimedOut => ConnectError::HostUnreachable,
        _ => ConnectError::Unknown,
    }
}

/// An open link to one device
pub struct Connection {
    pub device: DeviceDescriptor,
    pub channel: u8,
    pub stream: Box<dyn LinkStream>,
}

/// Open a connection, bounded by `timeout` instead of the platform default
pub async fn open_connection(
    connector: &mut dyn StreamConnector,
    device: &DeviceDescriptor,
    channel: u8,
    timeout: Duration,
) -> Result<Connection, ConnectError> {
    info!(
        "Connecting to {} ({}) on channel {}",
        device.name, device.address, channel
    );

    let result = match tokio::time::timeout(timeout, connector.open(device, channel)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no answer within {:?}", timeout),
        )),
    };

    match result {
        Ok(stream) => Ok(Connection {
            device: device.clone(),
            channel,
            stream,
        }),
        Err(e) => {
            let classified = classify_connect_error(&e);
            warn!("Connect to {} failed: {} ({:?})", device.address, e, classified);
            Err(classified)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledConnector;

    #[async_trait]
    impl StreamConnector for StalledConnector {
        async fn open(
            &mut self,
            _device: &DeviceDescriptor,
            _channel: u8,
        ) -> io::Result<Box<dyn LinkStream>> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_classify_connect_error() {
        let cases = [
            (io::ErrorKind::AddrInUse, ConnectError::AddressInUse),
            (io::ErrorKind::AddrNotAvailable, ConnectError::AddressUnavailable),
            (io::ErrorKind::HostUnreachable, ConnectError::HostUnreachable),
            (io::ErrorKind::NetworkUnreachable, ConnectError::HostUnreachable),
            (io::ErrorKind::TimedOut, ConnectError::HostUnreachable),
            (io::ErrorKind::ConnectionRefused, ConnectError::Unknown),
            (io::ErrorKind::Other, ConnectError::Unknown),
        ];
        for (kind, expected) in cases {
            assert_eq!(classify_connect_error(&io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn test_port_for_channel() {
        let connector = TcpConnector::new(7000);
        assert_eq!(connector.port_for(1).unwrap(), 7001);

        let connector = TcpConnector::new(u16::MAX);
        assert!(connector.port_for(1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_host_unreachable() {
        let device = DeviceDescriptor::new("rc-1", "Rover", "10.0.0.1");
        let result = open_connection(
            &mut StalledConnector,
            &device,
            1,
            Duration::from_millis(500),
        )
        .await;
        assert!(matches!(result, Err(ConnectError::HostUnreachable)));
    }

    #[tokio::test]
    async fn test_tcp_connector_reaches_listener() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = DeviceDescriptor::new("local", "Loopback", "127.0.0.1");

        let settings = TransportSettings {
            port_base: port - 1,
            ..TransportSettings::default()
        };
        let mut connector = create_connector(&settings);
        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut connection =
            open_connection(connector.as_mut(), &device, 1, Duration::from_secs(2))
                .await
                .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut connection.stream, &[0x5B, 0x00, 0x5D])
            .await
            .unwrap();

        assert_eq!(accept.await.unwrap(), [0x5B, 0x00, 0x5D]);
        assert_eq!(connection.channel, 1);
    }

    #[cfg(feature = "serial")]
    #[tokio::test]
    async fn test_missing_serial_port_fails_to_connect() {
        let settings = TransportSettings {
            link: LinkKind::Serial,
            ..TransportSettings::default()
        };
        let mut connector = create_connector(&settings);
        let device = DeviceDescriptor::new("rc-1", "Rover", "/dev/does-not-exist-rfcomm");

        let result =
            open_connection(connector.as_mut(), &device, 1, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
