//! PFT: fragmentation of AF packets with optional Reed-Solomon redundancy
//! (ETSI TS 102 821). Every fragment carries the full addressing needed for
//! reassembly; the header has its own CRC, the payload is covered by the AF
//! CRC after reassembly.

use super::rs::RsEncoder;
use super::EdiError;
use crate::utils;

/// Fixed header: "PF" + Pseq(2) + Findex(3) + Fcount(3) + FEC/Addr/Plen(2)
/// + header CRC(2).
const HEADER_BASE: usize = 14;

/// (k, m) policy per FEC level 1..=5; level 2 gives the classic 12+6.
fn fec_policy(level: u8) -> Option<(usize, usize)> {
    match level {
        1..=5 => Some((6 * level as usize, 3 * level as usize)),
        _ => None,
    }
}

pub struct PftFragmenter {
    pseq: u16,
    fec_level: u8,
    fragment_size: usize,
    addr: Option<u16>,
}

impl PftFragmenter {
    pub fn new(fec_level: u8, fragment_size: usize, addr: Option<u16>) -> Result<Self, EdiError> {
        if fec_level > 5 {
            return Err(EdiError::InvalidFecLevel { level: fec_level });
        }
        let header = Self::header_len(fec_level > 0, addr.is_some());
        if fragment_size <= header {
            return Err(EdiError::FragmentSizeTooSmall {
                size: fragment_size,
            });
        }

        Ok(PftFragmenter {
            pseq: 0,
            fec_level,
            fragment_size,
            addr,
        })
    }

    fn header_len(fec: bool, addr: bool) -> usize {
        HEADER_BASE + if fec { 2 } else { 0 } + if addr { 2 } else { 0 }
    }

    /// Splits one AF packet into n = k + m PFT packets sharing a Pseq.
    pub fn fragment(&mut self, af: &[u8]) -> Result<Vec<Vec<u8>>, EdiError> {
        let header_len = Self::header_len(self.fec_level > 0, self.addr.is_some());
        let budget = self.fragment_size - header_len;

        let (k, m) = match fec_policy(self.fec_level) {
            Some((k0, m)) => {
                // grow k in whole policy steps until chunks fit the MTU
                let mut k = k0;
                while af.len().div_ceil(k) > budget {
                    k += k0;
                }
                (k, m)
            }
            None => (af.len().div_ceil(budget).max(1), 0),
        };

        let chunk_len = af.len().div_ceil(k);

        // data chunks, zero padded to equal length
        let mut chunks: Vec<Vec<u8>> = af
            .chunks(chunk_len)
            .map(|c| {
                let mut chunk = c.to_vec();
                chunk.resize(chunk_len, 0);
                chunk
            })
            .collect();
        chunks.resize(k, vec![0u8; chunk_len]);

        if m > 0 {
            chunks.extend(RsEncoder::encode(&chunks, m)?);
        }

        let pseq = self.pseq;
        self.pseq = self.pseq.wrapping_add(1);

        let fcount = (k + m) as u32;
        let packets = chunks
            .into_iter()
            .enumerate()
            .map(|(findex, chunk)| self.packet(pseq, findex as u32, fcount, k, m, chunk))
            .collect();

        Ok(packets)
    }

    fn packet(
        &self,
        pseq: u16,
        findex: u32,
        fcount: u32,
        k: usize,
        m: usize,
        chunk: Vec<u8>,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BASE + 4 + chunk.len());

        out.extend_from_slice(b"PF");
        out.extend_from_slice(&pseq.to_be_bytes());
        out.extend_from_slice(&findex.to_be_bytes()[1..]);
        out.extend_from_slice(&fcount.to_be_bytes()[1..]);

        let fec = m > 0;
        let plen = ((fec as u16) << 15)
            | ((self.addr.is_some() as u16) << 14)
            | (chunk.len() as u16 & 0x3FFF);
        out.extend_from_slice(&plen.to_be_bytes());

        if fec {
            out.push(k as u8); // RSk
            out.push(m as u8); // RSz
        }
        if let Some(addr) = self.addr {
            out.extend_from_slice(&addr.to_be_bytes());
        }

        let crc = utils::crc16_ccitt(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out.extend_from_slice(&chunk);

        out
    }
}
