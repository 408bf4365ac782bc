//! Reed-Solomon forward error correction.
//!
//! Two independent block types protect a transmission: a tiny length block
//! (one data byte, two parity bytes) that lets the receiver size the payload
//! block, and the payload block itself. Blocks are systematic GF(2^8) codes
//! over the conventional 0x11D polynomial; a block with `ecc` parity bytes
//! corrects up to `ecc / 2` byte errors at unknown positions.

use reed_solomon::{Decoder, Encoder};
use tracing::debug;

use crate::error::{ModemError, Result};
use crate::ENCODED_DATA_OFFSET;

/// Parity bytes protecting the length byte of a variable-length transmission.
pub const LENGTH_ECC_BYTES: usize = ENCODED_DATA_OFFSET - 1;

/// Parity budget for a variable-length payload of `len` bytes.
pub fn variable_ecc_bytes(len: usize) -> usize {
    if len < 4 {
        2
    } else {
        4usize.max(2 * (len / 5))
    }
}

/// Parity budget for a fixed-length payload of `len` bytes.
///
/// Fixed-length transmissions carry no sound markers, so the code is twice as
/// strong: as many parity bytes as data bytes.
pub fn fixed_ecc_bytes(len: usize) -> usize {
    len
}

/// One systematic Reed-Solomon block with a fixed parity size.
pub struct RsBlock {
    encoder: Encoder,
    decoder: Decoder,
    ecc_len: usize,
}

impl RsBlock {
    pub fn new(ecc_len: usize) -> Self {
        Self {
            encoder: Encoder::new(ecc_len),
            decoder: Decoder::new(ecc_len),
            ecc_len,
        }
    }

    pub fn ecc_len(&self) -> usize {
        self.ecc_len
    }

    /// Encode `data`, returning `data || parity`.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        debug_assert!(data.len() + self.ecc_len <= 255, "RS block exceeds GF(2^8)");
        let encoded = self.encoder.encode(data);
        let mut code = Vec::with_capacity(data.len() + self.ecc_len);
        code.extend_from_slice(encoded.data());
        code.extend_from_slice(encoded.ecc());
        code
    }

    /// Decode a `data || parity` codeword, returning the corrected data bytes
    /// and the number of byte corrections that were applied.
    pub fn decode(&self, code: &[u8]) -> Result<(Vec<u8>, usize)> {
        if code.len() <= self.ecc_len {
            return Err(ModemError::Uncorrectable);
        }
        let corrected = self
            .decoder
            .correct(code, None)
            .map_err(|_| ModemError::Uncorrectable)?;
        let n_corrected = code
            .iter()
            .zip(corrected.data().iter().chain(corrected.ecc().iter()))
            .filter(|(a, b)| a != b)
            .count();
        if n_corrected > 0 {
            debug!(n_corrected, block_len = code.len(), "corrected RS block");
        }
        Ok((corrected.data().to_vec(), n_corrected))
    }
}
