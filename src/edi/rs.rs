//! Reed-Solomon parity generation for PFT, GF(2^8) with the DVB field
//! polynomial 0x11D. Byte-interleaved: the i-th byte of every chunk forms
//! one codeword of length k, extended by m parity bytes.

use reed_solomon_erasure::galois_8::ReedSolomon;

use super::EdiError;

pub struct RsEncoder;

impl RsEncoder {
    /// `chunks` are k equal-length data chunks; returns m parity chunks of
    /// the same length. Any k of the resulting k+m chunks reconstruct the
    /// data.
    pub fn encode(chunks: &[Vec<u8>], m: usize) -> Result<Vec<Vec<u8>>, EdiError> {
        let k = chunks.len();
        let chunk_len = chunks.first().map(|c| c.len()).unwrap_or(0);

        let rs = ReedSolomon::new(k, m).map_err(|e| EdiError::ReedSolomon(e.to_string()))?;

        let mut shards: Vec<Vec<u8>> = chunks.to_vec();
        shards.resize(k + m, vec![0u8; chunk_len]);

        rs.encode(&mut shards)
            .map_err(|e| EdiError::ReedSolomon(e.to_string()))?;

        Ok(shards.split_off(k))
    }
}
