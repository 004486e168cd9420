//! Ethernet links to AMS devices.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::NetworkEndpoint;
use crate::registry::Enumerator;
use crate::transport::{Connection, TransportError, TransportFault};
use crate::types::{DeviceDescriptor, DeviceInterface, NameField, DESCRIPTOR_RESERVED_LEN};

fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    address
        .to_socket_addrs()
        .map_err(|e| {
            TransportError::new(
                TransportFault::NotFound,
                format!("Cannot resolve {address}: {e}"),
            )
        })?
        .next()
        .ok_or_else(|| {
            TransportError::new(TransportFault::NotFound, format!("No address for {address}"))
        })
}

/// TCP link to a network-attached device.
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl TcpConnection {
    /// Connect to `host:port` within `timeout`.
    pub fn open(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let peer = resolve(address)?;
        let stream = TcpStream::connect_timeout(&peer, timeout).map_err(|e| {
            let mut err = TransportError::from_io(&format!("Connect to {peer} failed"), &e);
            if err.fault == TransportFault::Other || err.fault == TransportFault::ConnectionLost {
                err.fault = TransportFault::ConnectionFailed;
            }
            err
        })?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| TransportError::from_io("Configure socket failed", &e))?;
        log::debug!("connected to network device at {peer}");
        Ok(Self {
            stream: Some(stream),
            peer,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or_else(|| {
            TransportError::new(TransportFault::ConnectionLost, "Socket closed")
        })
    }

    fn fail(&mut self, context: &str, err: &io::Error) -> TransportError {
        let err = TransportError::from_io(context, err);
        if err.fault == TransportFault::ConnectionLost {
            log::warn!("network device {} dropped the connection", self.peer);
            self.stream = None;
        }
        err
    }
}

impl Connection for TcpConnection {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = self.stream()?.write_all(data);
        result.map_err(|e| self.fail("Write failed", &e))
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let mut total = 0;
        while total < len {
            match self.stream()?.read(&mut buf[total..]) {
                Ok(0) => {
                    let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
                    return Err(self.fail("Peer closed the connection", &eof));
                }
                Ok(n) => total += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    break
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail("Read failed", &e)),
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let result = self.stream()?.set_read_timeout(Some(timeout));
        result.map_err(|e| self.fail("Set timeout failed", &e))
    }

    fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("closed connection to {}", self.peer);
        }
    }
}

/// Lists network devices from configuration.
///
/// Ethernet devices do not announce themselves here; each configured
/// endpoint is reported, optionally only after a successful TCP probe.
#[derive(Debug, Clone)]
pub struct NetworkEnumerator {
    endpoints: Vec<NetworkEndpoint>,
    probe_timeout: Option<Duration>,
}

impl NetworkEnumerator {
    pub fn new(endpoints: Vec<NetworkEndpoint>, probe_timeout: Option<Duration>) -> Self {
        Self {
            endpoints,
            probe_timeout,
        }
    }

    fn reachable(&self, endpoint: &NetworkEndpoint) -> bool {
        let Some(timeout) = self.probe_timeout else {
            return true;
        };
        match resolve(&endpoint.address) {
            Ok(addr) => match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => true,
                Err(e) => {
                    log::debug!("network device {} unreachable: {e}", endpoint.address);
                    false
                }
            },
            Err(e) => {
                log::debug!("{e}");
                false
            }
        }
    }
}

impl Enumerator for NetworkEnumerator {
    fn interfaces(&self) -> DeviceInterface {
        DeviceInterface::ETHERNET
    }

    fn enumerate(&self, filter: DeviceInterface) -> Result<Vec<DeviceDescriptor>, TransportError> {
        if !filter.contains(DeviceInterface::ETHERNET) {
            return Ok(Vec::new());
        }
        Ok(self
            .endpoints
            .iter()
            .filter(|e| self.reachable(e))
            .map(|e| DeviceDescriptor {
                product_name: NameField::truncated(&e.product_name),
                product_id: e.product_id,
                interface: DeviceInterface::ETHERNET,
                dev_string: NameField::truncated(&e.address),
                unique_id: NameField::truncated(e.unique_id.as_deref().unwrap_or(&e.address)),
                reserved: [0; DESCRIPTOR_RESERVED_LEN],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_round_trip_and_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 3];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
            // Hold the socket open until the client hangs up.
            let mut rest = Vec::new();
            let _ = sock.read_to_end(&mut rest);
        });

        let mut conn = TcpConnection::open(&addr, Duration::from_millis(200)).unwrap();
        conn.write(&[1, 2, 3]).unwrap();
        assert_eq!(conn.read(3).unwrap(), vec![1, 2, 3]);
        // Nothing more pending: short read, not an error.
        assert!(conn.read(4).unwrap().is_empty());
        assert!(conn.is_alive());
        conn.close();
        assert!(!conn.is_alive());
        assert_eq!(conn.write(&[0]).unwrap_err().fault, TransportFault::ConnectionLost);
        server.join().unwrap();
    }

    #[test]
    fn peer_hangup_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            drop(sock);
        });
        let mut conn = TcpConnection::open(&addr, Duration::from_millis(500)).unwrap();
        server.join().unwrap();
        let err = conn.read(4).unwrap_err();
        assert_eq!(err.fault, TransportFault::ConnectionLost);
        assert!(!conn.is_alive());
    }

    #[test]
    fn unprobed_endpoints_are_listed() {
        let e = NetworkEnumerator::new(
            vec![NetworkEndpoint::new("192.0.2.10:5025").with_unique_id("00:11:22:33:44:55")],
            None,
        );
        let found = e.enumerate(DeviceInterface::ANY).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].interface, DeviceInterface::ETHERNET);
        assert_eq!(found[0].unique_id.as_str(), "00:11:22:33:44:55");
        assert!(e.enumerate(DeviceInterface::USB).unwrap().is_empty());
    }

    #[test]
    fn probe_skips_closed_ports() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let e = NetworkEnumerator::new(
            vec![NetworkEndpoint::new(&format!("127.0.0.1:{port}"))],
            Some(Duration::from_millis(200)),
        );
        assert!(e.enumerate(DeviceInterface::ETHERNET).unwrap().is_empty());
    }
}
