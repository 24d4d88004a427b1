//! EDI output: ETI frame fields re-packed as TAG items, wrapped in AF
//! packets (ETSI TS 102 693), optionally fragmented via PFT with
//! Reed-Solomon redundancy, and shipped over UDP or TCP.

pub mod frame;
pub mod pft;
pub mod rs;
pub mod transport;

use bytes::Bytes;
use thiserror::Error;

use crate::config::{EdiOutputConfig, EdiProtocol, TcpMode};
use crate::dab::ensemble::Ensemble;
use crate::eti::SubchannelPayload;
use frame::{AfPacketizer, EdiTimestamp};
use pft::PftFragmenter;
use transport::{EdiTransport, SinkError, TcpClientTransport, TcpServerTransport, UdpTransport};

#[derive(Debug, Error)]
pub enum EdiError {
    #[error("Invalid PFT FEC level: {level}")]
    InvalidFecLevel { level: u8 },

    #[error("PFT fragment size {size} too small for headers")]
    FragmentSizeTooSmall { size: usize },

    #[error("Reed-Solomon: {0}")]
    ReedSolomon(String),

    #[error("Sink: {0}")]
    Sink(#[from] SinkError),
}

/// One EDI destination: TAG packet assembly, AF sequencing, optional PFT,
/// and the transport behind it.
pub struct EdiOutput {
    af: AfPacketizer,
    pft: Option<PftFragmenter>,
    transport: Box<dyn EdiTransport>,
    tist_enabled: bool,
}

impl EdiOutput {
    pub fn from_config(cfg: &EdiOutputConfig) -> Result<Self, EdiError> {
        let transport: Box<dyn EdiTransport> = match cfg.protocol {
            EdiProtocol::Udp => Box::new(UdpTransport::open(&cfg.destination)?),
            EdiProtocol::Tcp => match cfg.tcp_mode {
                TcpMode::Client => Box::new(TcpClientTransport::start(cfg.destination.clone())),
                TcpMode::Server => Box::new(TcpServerTransport::bind(&cfg.destination)?),
            },
        };

        let pft = if cfg.enable_pft {
            Some(PftFragmenter::new(
                cfg.pft_fec,
                cfg.pft_fragment_size,
                cfg.source_id,
            )?)
        } else {
            None
        };

        Ok(EdiOutput {
            af: AfPacketizer::new(),
            pft,
            transport,
            tist_enabled: cfg.enable_tist,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(transport: Box<dyn EdiTransport>) -> Self {
        EdiOutput {
            af: AfPacketizer::new(),
            pft: None,
            transport,
            tist_enabled: false,
        }
    }

    pub fn tist_enabled(&self) -> bool {
        self.tist_enabled
    }

    /// Packetizes and transmits one ETI frame. Transport failures are
    /// best-effort: the frame is dropped for this sink, never retried.
    pub fn send_frame(
        &mut self,
        ensemble: &Ensemble,
        fic: &[u8],
        payloads: &[SubchannelPayload],
        frame_number: u32,
        timestamp: Option<EdiTimestamp>,
    ) -> Result<(), EdiError> {
        let timestamp = if self.tist_enabled { timestamp } else { None };
        let tags = frame::build_tag_packet(ensemble, fic, payloads, frame_number, timestamp);
        let af = self.af.build(&tags);

        match &mut self.pft {
            Some(pft) => {
                for fragment in pft.fragment(&af)? {
                    self.transport.send_packet(&Bytes::from(fragment))?;
                }
            }
            None => {
                self.transport.send_packet(&Bytes::from(af))?;
            }
        }

        Ok(())
    }

    pub fn flush(&mut self) {
        self.transport.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, EnsembleConfig, LabelConfig, Protection, SubchannelConfig, SubchannelType,
        TransmissionMode,
    };
    use crate::eti::SubchannelPayload;
    use std::sync::{Arc, Mutex};
    use transport::CollectTransport;

    fn one_subchannel_ensemble() -> Ensemble {
        let cfg = Config {
            ensemble: EnsembleConfig {
                id: 0x8FFF,
                ecc: 0xE1,
                transmission_mode: TransmissionMode::I,
                label: LabelConfig {
                    text: "EDI Test".into(),
                    short_mask: None,
                },
                datetime: None,
                conditional_access: None,
                edi_output: None,
                frequency_information: Vec::new(),
            },
            subchannels: vec![SubchannelConfig {
                uid: "sub".into(),
                id: 0,
                typ: SubchannelType::DabPlus,
                bitrate: 48,
                protection: Protection::Eep3A,
                input_uri: "zero://".into(),
                start_address: None,
                fec_scheme: None,
            }],
            services: Vec::new(),
            components: Vec::new(),
        };
        Ensemble::from_config(&cfg).unwrap()
    }

    #[test]
    fn af_packets_carry_tags_in_sequence() {
        let ensemble = one_subchannel_ensemble();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut edi = EdiOutput::for_tests(Box::new(CollectTransport(Arc::clone(&collected))));

        let fic = vec![0xFF; 96];
        let payloads = vec![SubchannelPayload {
            scid: 0,
            data: vec![0u8; 288],
        }];

        edi.send_frame(&ensemble, &fic, &payloads, 0, None).unwrap();
        edi.send_frame(&ensemble, &fic, &payloads, 1, None).unwrap();

        let packets = collected.lock().unwrap();
        assert_eq!(packets.len(), 2);

        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(&packet[..2], b"AF");
            assert_eq!(u16::from_be_bytes([packet[6], packet[7]]) as usize, i);
            // first TAG item is *ptr carrying the DETI protocol marker
            assert_eq!(&packet[10..14], b"*ptr");
            assert_eq!(&packet[18..22], b"DETI");
            // CRC-32 over everything before the CRC
            let crc = crate::utils::crc32(&packet[..packet.len() - 4]);
            assert_eq!(&packet[packet.len() - 4..], &crc.to_be_bytes());
        }
    }
}
