//! ETI-NI frame assembly (ETSI EN 300 799): 6144 bytes per 24 ms, bit-exact
//! SYNC / FC / STC / EOH / FIC / MSC / EOF / TIST layout.

use thiserror::Error;

use crate::dab::ensemble::Ensemble;
use crate::utils;

pub const FRAME_LEN: usize = 6144;
pub const PADDING_BYTE: u8 = 0x55;

/// FSYNC alternates between these on consecutive frames; the odd word is the
/// bit inverse of the even one.
pub const FSYNC_EVEN: u32 = 0x07_3A_B6;
pub const FSYNC_ODD: u32 = 0xF8_C5_49;

#[derive(Debug, Error)]
pub enum EtiError {
    #[error("FIC length {got} does not match mode ({want})")]
    FicLength { got: usize, want: usize },

    #[error("Subchannel {scid} payload is {got} bytes, STL requires {want}")]
    PayloadLength { scid: u8, got: usize, want: usize },

    #[error("Frame overflow: {len} bytes")]
    Overflow { len: usize },
}

/// Payload of one subchannel for one frame.
#[derive(Debug, Clone)]
pub struct SubchannelPayload {
    pub scid: u8,
    pub data: Vec<u8>,
}

/// Assembles one ETI-NI frame.
///
/// `payloads` must be in SCID order and sized to each subchannel's STL; the
/// producer zero-fills starved inputs before calling.
pub fn build_frame(
    ensemble: &Ensemble,
    fic: &[u8],
    payloads: &[SubchannelPayload],
    frame_number: u32,
    tist_ticks: Option<u32>,
) -> Result<Vec<u8>, EtiError> {
    let fic_len = ensemble.mode.fic_len();
    if fic.len() != fic_len {
        return Err(EtiError::FicLength {
            got: fic.len(),
            want: fic_len,
        });
    }

    let subchannels = ensemble.subchannels_by_scid();
    let nst = subchannels.len();

    let msc_len: usize = subchannels.iter().map(|sc| sc.payload_len()).sum();

    // FL counts STC + EOH + FIC + MSC + EOF in 32-bit words; SYNC, FC and
    // TIST are outside it
    let fl = nst + 1 + fic_len / 4 + msc_len / 4 + 1;

    let total = 4 + 4 + 4 * nst + 4 + fic_len + msc_len + 4 + if tist_ticks.is_some() { 4 } else { 0 };
    if total > FRAME_LEN {
        return Err(EtiError::Overflow { len: total });
    }

    let mut frame = Vec::with_capacity(FRAME_LEN);

    // SYNC: ERR (no error) + FSYNC
    let fsync = if frame_number % 2 == 0 {
        FSYNC_EVEN
    } else {
        FSYNC_ODD
    };
    frame.push(0xFF);
    frame.push((fsync >> 16) as u8);
    frame.push((fsync >> 8) as u8);
    frame.push(fsync as u8);

    // FC: FCT | FICF NST | FP MID FL
    let fct = (frame_number % 250) as u8;
    let fp = (frame_number % 8) as u8;
    let mid = ensemble.mode.mid();
    frame.push(fct);
    frame.push(0x80 | (nst as u8 & 0x7F)); // FICF always set
    frame.push((fp << 5) | ((mid & 0x03) << 3) | ((fl >> 8) as u8 & 0x07));
    frame.push(fl as u8);

    // STC: one 32-bit word per subchannel, SCID order
    for sc in &subchannels {
        let word = ((sc.id as u32 & 0x3F) << 26)
            | ((sc.start_address as u32 & 0x3FF) << 16)
            | ((sc.tpl() as u32 & 0x3F) << 10)
            | (sc.stl() as u32 & 0x3FF);
        frame.extend_from_slice(&word.to_be_bytes());
    }

    // EOH: MNSC + CRC over FC and STC
    frame.extend_from_slice(&[0xFF, 0xFF]);
    let eoh_crc = utils::crc16_ccitt(&frame[4..4 + 4 + 4 * nst]);
    frame.extend_from_slice(&eoh_crc.to_be_bytes());

    frame.extend_from_slice(fic);

    // MSC: payloads at their STC-declared lengths
    let msc_start = frame.len();
    for (sc, payload) in subchannels.iter().zip(payloads) {
        let want = sc.payload_len();
        if payload.scid != sc.id || payload.data.len() != want {
            return Err(EtiError::PayloadLength {
                scid: sc.id,
                got: payload.data.len(),
                want,
            });
        }
        frame.extend_from_slice(&payload.data);
    }
    if payloads.len() != nst {
        return Err(EtiError::PayloadLength {
            scid: 0,
            got: payloads.len(),
            want: nst,
        });
    }

    // EOF: CRC over MSC + RFU
    let eof_crc = utils::crc16_ccitt(&frame[msc_start..]);
    frame.extend_from_slice(&eof_crc.to_be_bytes());
    frame.extend_from_slice(&[0xFF, 0xFF]);

    if let Some(ticks) = tist_ticks {
        frame.push((ticks >> 16) as u8);
        frame.push((ticks >> 8) as u8);
        frame.push(ticks as u8);
        frame.push(0xFF);
    }

    frame.resize(FRAME_LEN, PADDING_BYTE);

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EnsembleConfig, LabelConfig, TransmissionMode};

    fn empty_ensemble() -> Ensemble {
        let cfg = Config {
            ensemble: EnsembleConfig {
                id: 0xCE15,
                ecc: 0xE1,
                transmission_mode: TransmissionMode::I,
                label: LabelConfig {
                    text: "Test Ensemble".into(),
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
        };
        Ensemble::from_config(&cfg).unwrap()
    }

    #[test]
    fn empty_frame_layout() {
        let ensemble = empty_ensemble();
        let fic = vec![0xFF; 96];
        let frame = build_frame(&ensemble, &fic, &[], 0, None).unwrap();

        assert_eq!(frame.len(), FRAME_LEN);
        // FSYNC of an even frame
        assert_eq!(&frame[1..4], &[0x07, 0x3A, 0xB6]);
        // FCT 0, FICF set, NST 0
        assert_eq!(frame[4], 0);
        assert_eq!(frame[5], 0x80);
        // FL = 0 + 1 + 24 + 0 + 1 = 26
        let fl = ((frame[6] as usize & 0x07) << 8) | frame[7] as usize;
        assert_eq!(fl, 26);
        // MID 1 (Mode I), FP 0
        assert_eq!((frame[6] >> 3) & 0x03, 1);

        // EOH CRC over FC only (no STC words)
        let crc = utils::crc16_ccitt(&frame[4..8]);
        assert_eq!(&frame[10..12], &crc.to_be_bytes());

        // EOF directly after the FIC, then 0x55 padding
        let eof = 12 + 96;
        let msc_crc = utils::crc16_ccitt(&[]);
        assert_eq!(&frame[eof..eof + 2], &msc_crc.to_be_bytes());
        assert_eq!(&frame[eof + 2..eof + 4], &[0xFF, 0xFF]);
        assert!(frame[eof + 4..].iter().all(|&b| b == PADDING_BYTE));
    }

    #[test]
    fn fsync_alternates() {
        let ensemble = empty_ensemble();
        let fic = vec![0xFF; 96];
        let even = build_frame(&ensemble, &fic, &[], 4, None).unwrap();
        let odd = build_frame(&ensemble, &fic, &[], 5, None).unwrap();

        let fsync_even =
            ((even[1] as u32) << 16) | ((even[2] as u32) << 8) | even[3] as u32;
        let fsync_odd = ((odd[1] as u32) << 16) | ((odd[2] as u32) << 8) | odd[3] as u32;
        assert_eq!(fsync_odd, !fsync_even & 0xFF_FF_FF);
    }

    #[test]
    fn tist_is_appended_outside_fl() {
        let ensemble = empty_ensemble();
        let fic = vec![0xFF; 96];
        let frame = build_frame(&ensemble, &fic, &[], 0, Some(0x012345)).unwrap();

        let fl = ((frame[6] as usize & 0x07) << 8) | frame[7] as usize;
        assert_eq!(fl, 26);
        let tist = 12 + 96 + 4;
        assert_eq!(&frame[tist..tist + 4], &[0x01, 0x23, 0x45, 0xFF]);
    }

    #[test]
    fn bad_fic_length_is_rejected() {
        let ensemble = empty_ensemble();
        assert!(matches!(
            build_frame(&ensemble, &[0u8; 10], &[], 0, None),
            Err(EtiError::FicLength { .. })
        ));
    }
}
