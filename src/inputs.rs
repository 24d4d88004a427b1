//! Pull-based subchannel inputs. Each input hands the producer exactly the
//! byte count its subchannel needs per 24 ms slot; a starved input is
//! reported and the producer substitutes zero fill.
//!
//! URI schemes: `file://path` (one-shot), `loop://path` (rewinds at EOF),
//! `udp://host:port`, `zero://` (silence).

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Unsupported input URI: {uri}")]
    UnsupportedScheme { uri: String },

    #[error("Failed to open {uri}: {source}")]
    Open {
        uri: String,
        source: std::io::Error,
    },

    #[error("Input starved: got {got} of {want} bytes")]
    Starved { got: usize, want: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait SubchannelInput: Send {
    /// Reads exactly `want` bytes, or fails; never blocks past `deadline`.
    fn read_frame(&mut self, want: usize, deadline: Instant) -> Result<Vec<u8>, InputError>;
}

pub fn open_input(uri: &str) -> Result<Box<dyn SubchannelInput>, InputError> {
    match uri.split_once("://") {
        Some(("file", path)) => Ok(Box::new(FileInput::open(path, false, uri)?)),
        Some(("loop", path)) => Ok(Box::new(FileInput::open(path, true, uri)?)),
        Some(("udp", addr)) => Ok(Box::new(UdpInput::bind(addr, uri)?)),
        Some(("zero", _)) => Ok(Box::new(ZeroInput)),
        _ => Err(InputError::UnsupportedScheme {
            uri: uri.to_string(),
        }),
    }
}

/// Pre-framed bytes from a file, optionally looped.
pub struct FileInput {
    file: File,
    looped: bool,
}

impl FileInput {
    fn open(path: &str, looped: bool, uri: &str) -> Result<Self, InputError> {
        let file = File::open(path).map_err(|e| InputError::Open {
            uri: uri.to_string(),
            source: e,
        })?;
        Ok(FileInput { file, looped })
    }
}

impl SubchannelInput for FileInput {
    fn read_frame(&mut self, want: usize, _deadline: Instant) -> Result<Vec<u8>, InputError> {
        let mut buf = vec![0u8; want];
        let mut got = 0;

        while got < want {
            match self.file.read(&mut buf[got..])? {
                0 => {
                    if self.looped {
                        self.file.seek(SeekFrom::Start(0))?;
                        continue;
                    }
                    return Err(InputError::Starved { got, want });
                }
                n => got += n,
            }
        }

        Ok(buf)
    }
}

/// Datagrams accumulated into a byte queue; drained frame by frame.
pub struct UdpInput {
    socket: UdpSocket,
    buffer: VecDeque<u8>,
}

impl UdpInput {
    fn bind(addr: &str, uri: &str) -> Result<Self, InputError> {
        let socket = UdpSocket::bind(addr).map_err(|e| InputError::Open {
            uri: uri.to_string(),
            source: e,
        })?;
        socket.set_nonblocking(true)?;

        Ok(UdpInput {
            socket,
            buffer: VecDeque::new(),
        })
    }

    fn drain_socket(&mut self) -> Result<(), InputError> {
        let mut datagram = [0u8; 2048];
        loop {
            match self.socket.recv(&mut datagram) {
                Ok(n) => self.buffer.extend(&datagram[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl SubchannelInput for UdpInput {
    fn read_frame(&mut self, want: usize, deadline: Instant) -> Result<Vec<u8>, InputError> {
        loop {
            self.drain_socket()?;
            if self.buffer.len() >= want {
                break;
            }
            if Instant::now() >= deadline {
                return Err(InputError::Starved {
                    got: self.buffer.len(),
                    want,
                });
            }
            thread::sleep(Duration::from_millis(1));
        }

        Ok(self.buffer.drain(..want).collect())
    }
}

/// Silence.
pub struct ZeroInput;

impl SubchannelInput for ZeroInput {
    fn read_frame(&mut self, want: usize, _deadline: Instant) -> Result<Vec<u8>, InputError> {
        Ok(vec![0u8; want])
    }
}
