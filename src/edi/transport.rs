//! EDI transport sinks: UDP datagrams, a reconnecting TCP client, and a
//! broadcast TCP server. All sends are best-effort and bounded; a sink that
//! cannot take a packet drops it rather than stalling the producer.

use std::io::Write;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Bind failed for {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Socket setup: {0}")]
    Setup(#[from] std::io::Error),
}

/// Upper bound on how long a send may block the producer.
const SEND_TIMEOUT: Duration = Duration::from_millis(1);

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

pub trait EdiTransport: Send {
    /// Best-effort transmit of one AF packet or PFT fragment.
    fn send_packet(&mut self, packet: &Bytes) -> Result<(), SinkError>;

    fn shutdown(&mut self) {}
}

// --- UDP ---

pub struct UdpTransport {
    socket: UdpSocket,
    dest: String,
}

impl UdpTransport {
    pub fn open(dest: &str) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| SinkError::Bind {
            addr: "0.0.0.0:0".into(),
            source: e,
        })?;
        socket.set_nonblocking(true)?;

        Ok(UdpTransport {
            socket,
            dest: dest.to_string(),
        })
    }
}

impl EdiTransport for UdpTransport {
    fn send_packet(&mut self, packet: &Bytes) -> Result<(), SinkError> {
        match self.socket.send_to(packet, &self.dest) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                log::warn!("UDP send would block, dropping packet");
            }
            Err(e) => {
                log::warn!("UDP send to {} failed: {}", self.dest, e);
            }
        }
        Ok(())
    }
}

// --- TCP client ---

/// Long-lived connection to one peer. A connector thread owns the dial and
/// the exponential backoff; the producer only ever does a bounded write.
/// Packets produced while disconnected are dropped.
pub struct TcpClientTransport {
    stream: Option<TcpStream>,
    established: Receiver<TcpStream>,
    reconnect: Sender<()>,
}

impl TcpClientTransport {
    pub fn start(dest: String) -> Self {
        let (stream_tx, stream_rx) = mpsc::channel::<TcpStream>();
        let (wake_tx, wake_rx) = mpsc::channel::<()>();

        thread::spawn(move || Self::connector(dest, stream_tx, wake_rx));

        let transport = TcpClientTransport {
            stream: None,
            established: stream_rx,
            reconnect: wake_tx,
        };
        let _ = transport.reconnect.send(());
        transport
    }

    fn connector(dest: String, established: Sender<TcpStream>, wake: Receiver<()>) {
        while wake.recv().is_ok() {
            // drain queued wake-ups so one disconnect means one dial loop
            while wake.try_recv().is_ok() {}

            let mut backoff = BACKOFF_START;
            loop {
                match TcpStream::connect(&dest) {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        let _ = stream.set_write_timeout(Some(SEND_TIMEOUT));
                        log::info!("EDI TCP connected: {}", dest);
                        if established.send(stream).is_err() {
                            return;
                        }
                        break;
                    }
                    Err(e) => {
                        log::warn!("EDI TCP connect to {} failed: {} (retry in {:?})", dest, e, backoff);
                        thread::sleep(backoff);
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
            }
        }
    }
}

impl EdiTransport for TcpClientTransport {
    fn send_packet(&mut self, packet: &Bytes) -> Result<(), SinkError> {
        if self.stream.is_none() {
            if let Ok(stream) = self.established.try_recv() {
                self.stream = Some(stream);
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            // not connected: drop
            return Ok(());
        };

        if let Err(e) = stream.write_all(packet) {
            log::warn!("EDI TCP send failed: {}, reconnecting", e);
            self.stream = None;
            let _ = self.reconnect.send(());
        }

        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

// --- TCP server ---

/// Accepts clients on a background thread and broadcasts every packet to
/// the current set. A client whose send fails or would block is closed and
/// removed; slow clients never stall the producer.
pub struct TcpServerTransport {
    clients: Arc<Mutex<Vec<TcpStream>>>,
}

impl TcpServerTransport {
    pub fn bind(addr: &str) -> Result<Self, SinkError> {
        let listener = TcpListener::bind(addr).map_err(|e| SinkError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        let clients = Arc::new(Mutex::new(Vec::new()));
        let clients_accept = Arc::clone(&clients);

        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        let _ = stream.set_write_timeout(Some(SEND_TIMEOUT));
                        log::info!("EDI client connected: {:?}", stream.peer_addr());
                        clients_accept.lock().unwrap().push(stream);
                    }
                    Err(e) => {
                        log::error!("Error accepting EDI client: {}", e);
                    }
                }
            }
        });

        Ok(TcpServerTransport { clients })
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

impl EdiTransport for TcpServerTransport {
    fn send_packet(&mut self, packet: &Bytes) -> Result<(), SinkError> {
        let mut clients = self.clients.lock().unwrap();

        clients.retain_mut(|client| match client.write_all(packet) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Dropping EDI client: {}", e);
                false
            }
        });

        Ok(())
    }

    fn shutdown(&mut self) {
        let mut clients = self.clients.lock().unwrap();
        for client in clients.drain(..) {
            let _ = client.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Test transport collecting everything it is given.
#[cfg(test)]
pub(crate) struct CollectTransport(pub Arc<Mutex<Vec<Bytes>>>);

#[cfg(test)]
impl EdiTransport for CollectTransport {
    fn send_packet(&mut self, packet: &Bytes) -> Result<(), SinkError> {
        self.0.lock().unwrap().push(packet.clone());
        Ok(())
    }
}
