//! Transmit path: payload bytes to PCM frames.
//!
//! A transmission is a sequence of tone bursts. Variable-length mode brackets
//! the data with a start marker (all even-indexed marker tones) and an end
//! marker (all odd-indexed ones); the first [`ENCODED_DATA_OFFSET`] encoded
//! bytes are the Reed-Solomon-protected payload length. Fixed-length mode
//! emits the payload block alone. Each symbol sounds its active bit tones for
//! `frames_per_tx` frames with a raised-cosine fade over the first and last
//! frame of the burst.

use std::f64::consts::PI;

use tracing::debug;

use crate::error::{ModemError, Result};
use crate::fec::{self, RsBlock, LENGTH_ECC_BYTES};
use crate::protocol::{Protocol, ProtocolId};
use crate::{ENCODED_DATA_OFFSET, MARKER_FRAMES, MAX_DATA_SIZE, MAX_LENGTH_VARIABLE, N_BITS_IN_MARKER};

/// One tone of a generated waveform, for inspection and tones-only rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneData {
    pub freq_hz: f64,
    pub duration_ms: f64,
}

/// A payload prepared for transmission: the FEC-encoded byte stream, the tone
/// plan, and the per-frame synthesizer.
pub(crate) struct PreparedTx {
    protocol_id: ProtocolId,
    protocol: Protocol,
    volume: f32,
    samples_per_frame: usize,
    sample_rate: f32,
    data_encoded: Vec<u8>,
    variable: bool,
    total_data_frames: usize,
    tones: Vec<Vec<ToneData>>,
}

impl PreparedTx {
    pub fn new(
        payload: &[u8],
        protocol_id: ProtocolId,
        protocol: Protocol,
        volume: u8,
        fixed_length: Option<usize>,
        samples_per_frame: usize,
        sample_rate: f32,
    ) -> Result<Self> {
        if volume > 100 {
            return Err(ModemError::InvalidParameters(format!(
                "volume {volume} out of range (0..=100)"
            )));
        }
        if payload.is_empty() {
            return Err(ModemError::InvalidParameters("payload is empty".into()));
        }

        let data_encoded = match fixed_length {
            None => {
                if payload.len() > MAX_LENGTH_VARIABLE {
                    return Err(ModemError::PayloadTooLong {
                        size: payload.len(),
                        max: MAX_LENGTH_VARIABLE,
                    });
                }
                let length_block = RsBlock::new(LENGTH_ECC_BYTES).encode(&[payload.len() as u8]);
                debug_assert_eq!(length_block.len(), ENCODED_DATA_OFFSET);
                let payload_block =
                    RsBlock::new(fec::variable_ecc_bytes(payload.len())).encode(payload);
                let mut encoded = Vec::with_capacity(length_block.len() + payload_block.len());
                encoded.extend_from_slice(&length_block);
                encoded.extend_from_slice(&payload_block);
                encoded
            }
            Some(len) => {
                if payload.len() != len {
                    return Err(ModemError::InvalidParameters(format!(
                        "fixed-length modem expects exactly {len} payload bytes, got {}",
                        payload.len()
                    )));
                }
                RsBlock::new(fec::fixed_ecc_bytes(len)).encode(payload)
            }
        };
        debug_assert!(data_encoded.len() <= MAX_DATA_SIZE);

        let b = protocol.bytes_per_tx;
        let f = protocol.frames_per_tx;
        let n_symbols = (data_encoded.len() + b - 1) / b;
        let total_data_frames = n_symbols * f;

        let mut tx = Self {
            protocol_id,
            protocol,
            volume: volume as f32 / 100.0,
            samples_per_frame,
            sample_rate,
            data_encoded,
            variable: fixed_length.is_none(),
            total_data_frames,
            tones: Vec::new(),
        };
        tx.tones = tx.build_tones();

        debug!(
            protocol = ?protocol_id,
            payload_bytes = payload.len(),
            encoded_bytes = tx.data_encoded.len(),
            frames = tx.total_frames(),
            "prepared transmission"
        );
        Ok(tx)
    }

    pub fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    pub fn total_frames(&self) -> usize {
        if self.variable {
            2 * MARKER_FRAMES + self.total_data_frames
        } else {
            self.total_data_frames
        }
    }

    pub fn total_samples(&self) -> usize {
        self.total_frames() * self.samples_per_frame
    }

    pub fn tones(&self) -> &[Vec<ToneData>] {
        &self.tones
    }

    /// Active tone bins of frame `frame_id`, along with the frame's position
    /// and the length of the burst it belongs to.
    fn frame_bins(&self, frame_id: usize) -> (Vec<usize>, usize, usize) {
        let marker = if self.variable { MARKER_FRAMES } else { 0 };
        if frame_id < marker {
            (self.marker_bins(true), frame_id, MARKER_FRAMES)
        } else if frame_id < marker + self.total_data_frames {
            let data_frame = frame_id - marker;
            let f = self.protocol.frames_per_tx;
            (self.symbol_bins(data_frame / f), data_frame % f, f)
        } else {
            let pos = frame_id - marker - self.total_data_frames;
            (self.marker_bins(false), pos, MARKER_FRAMES)
        }
    }

    fn marker_bins(&self, start: bool) -> Vec<usize> {
        (0..N_BITS_IN_MARKER)
            .filter(|b| (b % 2 == 0) == start)
            .map(|b| self.protocol.bit_bin(b))
            .collect()
    }

    fn symbol_bins(&self, symbol: usize) -> Vec<usize> {
        let b = self.protocol.bytes_per_tx;
        let mut bins = Vec::new();
        for j in 0..b {
            let Some(&byte) = self.data_encoded.get(symbol * b + j) else {
                continue;
            };
            for k in 0..8 {
                if byte >> k & 1 == 1 {
                    bins.push(self.protocol.bit_bin(8 * j + k));
                }
            }
        }
        bins
    }

    /// Synthesize one frame of the waveform at the operating sample rate.
    pub fn synth_frame(&self, frame_id: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.samples_per_frame);
        out.fill(0.0);

        let (bins, burst_pos, burst_len) = self.frame_bins(frame_id);
        if bins.is_empty() {
            return;
        }

        let n = out.len();
        let scale = self.volume / bins.len() as f32;
        for &bin in &bins {
            let w = 2.0 * PI * bin as f64 / n as f64;
            for (i, sample) in out.iter_mut().enumerate() {
                *sample += ((w * i as f64).sin() * scale as f64) as f32;
            }
        }

        // Raised-cosine fade over the first and last frame of the burst.
        if burst_pos == 0 {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample *= (0.5 * (1.0 - (PI * i as f64 / n as f64).cos())) as f32;
            }
        }
        if burst_pos == burst_len - 1 {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample *= (0.5 * (1.0 + (PI * i as f64 / n as f64).cos())) as f32;
            }
        }
    }

    fn build_tones(&self) -> Vec<Vec<ToneData>> {
        let hz_per_bin = self.sample_rate as f64 / self.samples_per_frame as f64;
        let frame_ms = 1000.0 * self.samples_per_frame as f64 / self.sample_rate as f64;
        let bins_to_tones = |bins: Vec<usize>, frames: usize| -> Vec<ToneData> {
            bins.into_iter()
                .map(|bin| ToneData {
                    freq_hz: bin as f64 * hz_per_bin,
                    duration_ms: frames as f64 * frame_ms,
                })
                .collect()
        };

        let b = self.protocol.bytes_per_tx;
        let f = self.protocol.frames_per_tx;
        let n_symbols = (self.data_encoded.len() + b - 1) / b;

        let mut tones = Vec::with_capacity(n_symbols + 2);
        if self.variable {
            tones.push(bins_to_tones(self.marker_bins(true), MARKER_FRAMES));
        }
        for symbol in 0..n_symbols {
            tones.push(bins_to_tones(self.symbol_bins(symbol), f));
        }
        if self.variable {
            tones.push(bins_to_tones(self.marker_bins(false), MARKER_FRAMES));
        }
        tones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::builtin;

    fn prepared(payload: &[u8], id: ProtocolId, volume: u8) -> PreparedTx {
        PreparedTx::new(payload, id, builtin(id).unwrap(), volume, None, 1024, 48000.0).unwrap()
    }

    fn render(tx: &PreparedTx) -> Vec<f32> {
        let mut out = vec![0.0f32; 1024];
        let mut all = Vec::with_capacity(tx.total_samples());
        for frame in 0..tx.total_frames() {
            tx.synth_frame(frame, &mut out);
            all.extend_from_slice(&out);
        }
        all
    }

    #[test]
    fn test_frame_count_matches_stream_length() {
        let tx = prepared(b"a0Z5kR2g", ProtocolId::AudibleFast, 25);
        // 3 length bytes + 8 payload + 4 parity = 15 bytes -> 5 symbols of 6 frames.
        assert_eq!(tx.total_frames(), MARKER_FRAMES + 5 * 6 + MARKER_FRAMES);
        assert_eq!(render(&tx).len(), tx.total_samples());
    }

    #[test]
    fn test_volume_zero_is_silent() {
        let tx = prepared(b"hi", ProtocolId::AudibleFast, 0);
        assert!(render(&tx).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_waveform_is_deterministic() {
        let a = render(&prepared(b"deterministic", ProtocolId::AudibleNormal, 25));
        let b = render(&prepared(b"deterministic", ProtocolId::AudibleNormal, 25));
        assert_eq!(a, b);
    }

    #[test]
    fn test_volume_stays_in_range() {
        let payload: Vec<u8> = (0..64).map(|i| (i * 37) as u8).collect();
        let samples = render(&prepared(&payload, ProtocolId::AudibleFastest, 100));
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_variable_mode_brackets_with_markers() {
        let tx = prepared(b"abc", ProtocolId::AudibleFast, 25);
        let tones = tx.tones();
        // First and last groups are the markers: 8 tones each, 16 frames long.
        let marker_ms = MARKER_FRAMES as f64 * 1000.0 * 1024.0 / 48000.0;
        assert_eq!(tones.first().unwrap().len(), 8);
        assert_eq!(tones.last().unwrap().len(), 8);
        assert!((tones[0][0].duration_ms - marker_ms).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_mode_has_no_markers() {
        let p = builtin(ProtocolId::DtFastest).unwrap();
        let tx = PreparedTx::new(b"xyz", ProtocolId::DtFastest, p, 25, Some(3), 1024, 48000.0)
            .unwrap();
        // 3 payload + 3 parity bytes, one byte per symbol, 3 frames each.
        assert_eq!(tx.total_frames(), 6 * 3);
        let symbol_ms = 3.0 * 1000.0 * 1024.0 / 48000.0;
        for group in tx.tones() {
            for tone in group {
                assert!((tone.duration_ms - symbol_ms).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_tone_frequencies_match_bins() {
        let tx = prepared(b"Q", ProtocolId::UltrasoundFast, 25);
        let hz_per_bin = 48000.0 / 1024.0;
        for group in tx.tones() {
            for tone in group {
                let bin = tone.freq_hz / hz_per_bin;
                assert!((bin - bin.round()).abs() < 1e-9);
                assert!(bin >= 320.0 && bin < 368.0);
            }
        }
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_LENGTH_VARIABLE + 1];
        let p = builtin(ProtocolId::AudibleFast).unwrap();
        let err =
            PreparedTx::new(&payload, ProtocolId::AudibleFast, p, 25, None, 1024, 48000.0);
        assert!(matches!(err, Err(ModemError::PayloadTooLong { .. })));
    }

    #[test]
    fn test_rejects_bad_volume() {
        let p = builtin(ProtocolId::AudibleFast).unwrap();
        let err = PreparedTx::new(b"x", ProtocolId::AudibleFast, p, 101, None, 1024, 48000.0);
        assert!(matches!(err, Err(ModemError::InvalidParameters(_))));
    }
}
