//! Shared helpers: config builders and a minimal FIC/FIG walker used to
//! inspect produced frames the way a receiver would.

#![allow(dead_code)]

use leith::config::*;
use leith::utils;

pub fn base_config(id: u16, label: &str) -> Config {
    Config {
        ensemble: EnsembleConfig {
            id,
            ecc: 0xE1,
            transmission_mode: TransmissionMode::I,
            label: LabelConfig {
                text: label.into(),
                short_mask: None,
            },
            datetime: None,
            conditional_access: None,
            edi_output: None,
            frequency_information: Vec::new(),
        },
        subchannels: Vec::new(),
        services: Vec::new(),
        components: Vec::new(),
    }
}

pub fn dabplus_subchannel(uid: &str, id: u8, bitrate: u16) -> SubchannelConfig {
    SubchannelConfig {
        uid: uid.into(),
        id,
        typ: SubchannelType::DabPlus,
        bitrate,
        protection: Protection::Eep3A,
        input_uri: "zero://".into(),
        start_address: None,
        fec_scheme: None,
    }
}

pub fn service(uid: &str, id: u32, label: &str) -> ServiceConfig {
    ServiceConfig {
        uid: uid.into(),
        id,
        label: LabelConfig {
            text: label.into(),
            short_mask: None,
        },
        pty: 0,
        language: 0,
        announcements: None,
        ca_system: None,
        service_links: Vec::new(),
        other_ensembles: Vec::new(),
    }
}

pub fn component(uid: &str, service_id: u32, subchannel_id: u8) -> ComponentConfig {
    ComponentConfig {
        uid: uid.into(),
        service_id,
        subchannel_id,
        is_packet_mode: false,
        packet: None,
        ua_types: Vec::new(),
        label: None,
        dynamic_label: None,
    }
}

/// FIC region of an ETI-NI frame (Modes I/II/IV).
pub fn fic_of(frame: &[u8]) -> &[u8] {
    let nst = (frame[5] & 0x7F) as usize;
    let start = 8 + 4 * nst + 4;
    &frame[start..start + 96]
}

#[derive(Debug, Clone)]
pub struct Fig {
    pub typ: u8,
    /// Everything after the FIG header byte (second byte included).
    pub data: Vec<u8>,
}

impl Fig {
    pub fn extension(&self) -> u8 {
        match self.typ {
            1 | 2 => self.data[0] & 0x07,
            _ => self.data[0] & 0x1F,
        }
    }
}

/// Walks all FIBs of a FIC block, asserting each 32-byte FIB's CRC.
pub fn figs_of(fic: &[u8]) -> Vec<Fig> {
    assert_eq!(fic.len() % 32, 0);
    let mut figs = Vec::new();

    for fib in fic.chunks(32) {
        let crc_stored = u16::from_be_bytes([fib[30], fib[31]]);
        assert_eq!(crc_stored, utils::crc16_ccitt(&fib[..30]), "FIB CRC mismatch");

        let mut offset = 0;
        while offset < 30 && fib[offset] != 0xFF {
            let typ = fib[offset] >> 5;
            let len = (fib[offset] & 0x1F) as usize;
            figs.push(Fig {
                typ,
                data: fib[offset + 1..offset + 1 + len].to_vec(),
            });
            offset += 1 + len;
        }
    }

    figs
}

pub fn find_figs(frame: &[u8], typ: u8, ext: u8) -> Vec<Fig> {
    figs_of(fic_of(frame))
        .into_iter()
        .filter(|f| f.typ == typ && f.extension() == ext)
        .collect()
}
