//! ETI file sinks. The 6144-byte frame is identical in all variants; they
//! differ only in the surrounding framing:
//!
//! - raw: frames back to back
//! - framed: 16-byte file header (magic + frame count), each frame prefixed
//!   by a 2-byte big-endian length
//! - streamed: length prefixes without a file header

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const FILE_MAGIC: &[u8; 8] = b"ETI-NI\x00\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtiFraming {
    Raw,
    Framed,
    Streamed,
}

pub struct EtiFileSink {
    file: File,
    framing: EtiFraming,
    frames: u64,
}

impl EtiFileSink {
    pub fn create(path: &Path, framing: EtiFraming) -> std::io::Result<Self> {
        let mut file = File::create(path)?;

        if framing == EtiFraming::Framed {
            // frame count is patched in on finalize
            file.write_all(FILE_MAGIC)?;
            file.write_all(&0u64.to_be_bytes())?;
        }

        Ok(EtiFileSink {
            file,
            framing,
            frames: 0,
        })
    }

    pub fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        match self.framing {
            EtiFraming::Raw => {}
            EtiFraming::Framed | EtiFraming::Streamed => {
                self.file.write_all(&(frame.len() as u16).to_be_bytes())?;
            }
        }
        self.file.write_all(frame)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn finalize(&mut self) -> std::io::Result<()> {
        if self.framing == EtiFraming::Framed {
            self.file.seek(SeekFrom::Start(FILE_MAGIC.len() as u64))?;
            self.file.write_all(&self.frames.to_be_bytes())?;
            self.file.seek(SeekFrom::End(0))?;
        }
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    fn raw_sink_concatenates() {
        let path = tmp("leith_raw_sink_test.eti");
        let mut sink = EtiFileSink::create(&path, EtiFraming::Raw).unwrap();
        sink.write_frame(&[0x55; 6144]).unwrap();
        sink.write_frame(&[0x55; 6144]).unwrap();
        sink.finalize().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 6144);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn framed_sink_patches_header() {
        let path = tmp("leith_framed_sink_test.eti");
        let mut sink = EtiFileSink::create(&path, EtiFraming::Framed).unwrap();
        sink.write_frame(&[0u8; 6144]).unwrap();
        sink.write_frame(&[0u8; 6144]).unwrap();
        sink.write_frame(&[0u8; 6144]).unwrap();
        sink.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..8], FILE_MAGIC);
        assert_eq!(u64::from_be_bytes(data[8..16].try_into().unwrap()), 3);
        // first frame length prefix
        assert_eq!(&data[16..18], &(6144u16).to_be_bytes());
        assert_eq!(data.len(), 16 + 3 * (2 + 6144));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn streamed_sink_has_no_header() {
        let path = tmp("leith_streamed_sink_test.eti");
        let mut sink = EtiFileSink::create(&path, EtiFraming::Streamed).unwrap();
        sink.write_frame(&[0u8; 6144]).unwrap();
        sink.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..2], &(6144u16).to_be_bytes());
        assert_eq!(data.len(), 2 + 6144);
        std::fs::remove_file(&path).ok();
    }
}
