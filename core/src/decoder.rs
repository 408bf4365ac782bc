//! Receive path: PCM frames to payload bytes.
//!
//! Samples are gathered into frames of `samples_per_frame`, each frame is
//! reduced to its magnitude spectrum, and a state machine walks the spectra.
//! In variable-length mode the machine listens for the start-marker tone set,
//! records spectra until the end marker, then resolves the protocol
//! hypothesis and Reed-Solomon-decodes the byte stream. In fixed-length mode
//! it keeps a sliding window of spectra and attempts a tentative decode at
//! every frame boundary. Decode failures never surface to the caller; the
//! machine resyncs and keeps listening.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::Result;
use crate::fec::{self, RsBlock, LENGTH_ECC_BYTES};
use crate::fft::SpectrumAnalyzer;
use crate::protocol::{Protocol, ProtocolId, ProtocolTable};
use crate::{
    ENCODED_DATA_OFFSET, MARKER_FRAMES, MAX_LENGTH_VARIABLE, MAX_RECORDED_FRAMES,
    MAX_SPECTRUM_HISTORY, N_BITS_IN_MARKER,
};

/// Markers shorter than this many qualifying frames in a row are ignored.
/// The two frames of slack absorb the fade ramps and resampling edge loss.
const MARKER_RUN_MIN: usize = MARKER_FRAMES - 4;

/// A successfully received transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxData {
    pub payload: Vec<u8>,
    pub protocol: ProtocolId,
    /// Byte corrections applied by the FEC across both blocks.
    pub corrected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Listening,
    /// Start marker complete; the next frame is the first data frame.
    PendingData,
    Analyzing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerTones {
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Every marker tone present and dominant; counts toward the marker run.
    Strict,
    /// Tone-set dominance only; classifies fade-ramp frames at burst edges.
    Relaxed,
}

/// Marker search state for one group of protocols sharing a `freq_start`.
struct MarkerGroup {
    freq_start: usize,
    max_bytes: usize,
    run: usize,
}

pub(crate) struct Decoder {
    samples_per_frame: usize,
    threshold: f32,
    fixed_length: Option<usize>,
    analyzer: SpectrumAnalyzer,

    pending: Vec<f32>,
    state: RxState,
    groups: Vec<MarkerGroup>,
    table_revision: Option<u64>,

    // variable-length analysis
    active_freq_start: usize,
    active_max_bytes: usize,
    candidates: Vec<ProtocolId>,
    recorded: Vec<Vec<f32>>,
    end_run: usize,
    frame_budget: usize,

    // fixed-length sliding window
    ring: VecDeque<Vec<f32>>,
    ring_cap: usize,
    cooldown: usize,

    history: VecDeque<Vec<f32>>,
    last_amplitude: Vec<f32>,
    result: Option<RxData>,
}

impl Decoder {
    pub fn new(samples_per_frame: usize, threshold: f32, fixed_length: Option<usize>) -> Result<Self> {
        Ok(Self {
            samples_per_frame,
            threshold,
            fixed_length,
            analyzer: SpectrumAnalyzer::new(samples_per_frame)?,
            pending: Vec::with_capacity(samples_per_frame),
            state: RxState::Listening,
            groups: Vec::new(),
            table_revision: None,
            active_freq_start: 0,
            active_max_bytes: 0,
            candidates: Vec::new(),
            recorded: Vec::new(),
            end_run: 0,
            frame_budget: 0,
            ring: VecDeque::new(),
            ring_cap: 0,
            cooldown: 0,
            history: VecDeque::new(),
            last_amplitude: Vec::new(),
            result: None,
        })
    }

    pub fn is_analyzing(&self) -> bool {
        self.state == RxState::Analyzing
    }

    pub fn is_receiving(&self) -> bool {
        self.state != RxState::Listening
    }

    pub fn frames_to_analyze(&self) -> usize {
        self.frame_budget
    }

    pub fn frames_analyzed(&self) -> usize {
        self.recorded.len()
    }

    /// Abort any in-flight synchronization and return to listening.
    /// Returns whether a reception was actually in progress.
    pub fn stop(&mut self) -> bool {
        let was_receiving = self.is_receiving();
        self.resync();
        self.pending.clear();
        self.ring.clear();
        self.cooldown = 0;
        for g in &mut self.groups {
            g.run = 0;
        }
        was_receiving
    }

    pub fn result(&self) -> Option<&RxData> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<RxData> {
        self.result.take()
    }

    /// Magnitude spectrum averaged over the last few frames, for display.
    pub fn spectrum(&self) -> Vec<f32> {
        let Some(first) = self.history.front() else {
            return Vec::new();
        };
        let mut avg = vec![0.0f32; first.len()];
        for spec in &self.history {
            for (a, s) in avg.iter_mut().zip(spec.iter()) {
                *a += s;
            }
        }
        let scale = 1.0 / self.history.len() as f32;
        for a in &mut avg {
            *a *= scale;
        }
        avg
    }

    /// Samples of the most recently analyzed frame.
    pub fn amplitude(&self) -> &[f32] {
        &self.last_amplitude
    }

    /// Rebuild the marker trackers if the enabled-protocol set changed.
    pub fn sync_protocols(&mut self, table: &ProtocolTable) {
        if self.table_revision == Some(table.revision()) {
            return;
        }
        self.table_revision = Some(table.revision());

        self.groups.clear();
        self.ring_cap = 0;
        for (_, p) in table.enabled() {
            match self.fixed_length {
                None => {
                    if !p.fits_with_markers(self.samples_per_frame) {
                        continue;
                    }
                    match self.groups.iter_mut().find(|g| g.freq_start == p.freq_start) {
                        Some(g) => g.max_bytes = g.max_bytes.max(p.bytes_per_tx),
                        None => self.groups.push(MarkerGroup {
                            freq_start: p.freq_start,
                            max_bytes: p.bytes_per_tx,
                            run: 0,
                        }),
                    }
                }
                Some(len) => {
                    if !p.fits(self.samples_per_frame) {
                        continue;
                    }
                    self.ring_cap = self.ring_cap.max(fixed_window_frames(p, len));
                }
            }
        }
        self.ring_cap = self.ring_cap.min(MAX_RECORDED_FRAMES);
        if self.is_receiving() {
            self.resync();
        }
    }

    /// Feed operating-rate samples; advances the state machine one frame at a
    /// time as enough samples accumulate.
    pub fn push_samples(&mut self, samples: &[f32], table: &ProtocolTable) -> Result<()> {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.samples_per_frame {
            let frame: Vec<f32> = self.pending.drain(..self.samples_per_frame).collect();
            self.process_frame(&frame, table)?;
        }
        Ok(())
    }

    fn process_frame(&mut self, frame: &[f32], table: &ProtocolTable) -> Result<()> {
        let mut spec = Vec::new();
        self.analyzer.magnitudes(frame, &mut spec)?;

        self.last_amplitude.clear();
        self.last_amplitude.extend_from_slice(frame);
        if self.history.len() == MAX_SPECTRUM_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(spec.clone());

        if self.fixed_length.is_some() {
            self.fixed_step(spec, table);
        } else {
            self.variable_step(spec, table);
        }
        Ok(())
    }

    // --- variable-length mode ---

    fn variable_step(&mut self, spec: Vec<f32>, table: &ProtocolTable) {
        match self.state {
            RxState::Listening => self.listening_step(spec, table),
            RxState::PendingData => {
                self.state = RxState::Analyzing;
                self.analyze_frame(spec, table);
            }
            RxState::Analyzing => self.analyze_frame(spec, table),
        }
    }

    fn listening_step(&mut self, spec: Vec<f32>, table: &ProtocolTable) {
        let threshold = self.threshold;
        let mut fired: Option<(usize, usize)> = None;
        for (gi, g) in self.groups.iter_mut().enumerate() {
            let hit = marker_frame(
                &spec,
                g.freq_start,
                g.max_bytes,
                threshold,
                MarkerTones::Even,
                Gate::Strict,
            );
            if hit {
                g.run += 1;
            } else {
                if fired.is_none() && g.run >= MARKER_RUN_MIN {
                    fired = Some((gi, g.run));
                }
                g.run = 0;
            }
        }
        let Some((gi, run)) = fired else { return };

        let freq_start = self.groups[gi].freq_start;
        let max_bytes = self.groups[gi].max_bytes;
        for g in &mut self.groups {
            g.run = 0;
        }

        self.active_freq_start = freq_start;
        self.active_max_bytes = max_bytes;
        self.candidates = table
            .enabled()
            .filter(|(_, p)| p.freq_start == freq_start)
            .map(|(id, _)| id)
            .collect();
        self.frame_budget = variable_frame_budget(table, &self.candidates);
        self.recorded.clear();
        self.end_run = 0;
        debug!(freq_start, candidates = self.candidates.len(), "start marker detected");

        // A run shorter than the full marker means its fade frames failed the
        // strict gate; if the current frame still shows the marker tone set,
        // it is the marker's own fade-out and data begins on the next frame.
        let trailing_ramp = run < MARKER_FRAMES
            && marker_frame(
                &spec,
                freq_start,
                max_bytes,
                threshold,
                MarkerTones::Even,
                Gate::Relaxed,
            );
        if trailing_ramp {
            self.state = RxState::PendingData;
        } else {
            self.state = RxState::Analyzing;
            self.analyze_frame(spec, table);
        }
    }

    fn analyze_frame(&mut self, spec: Vec<f32>, table: &ProtocolTable) {
        let is_end = marker_frame(
            &spec,
            self.active_freq_start,
            self.active_max_bytes,
            self.threshold,
            MarkerTones::Odd,
            Gate::Strict,
        );
        self.recorded.push(spec);
        if is_end {
            self.end_run += 1;
        } else {
            self.end_run = 0;
        }

        if self.end_run >= MARKER_RUN_MIN {
            debug!(frames = self.recorded.len(), "end marker detected");
            self.finalize(table);
            self.resync();
        } else if self.recorded.len() > self.frame_budget {
            warn!(
                frames = self.recorded.len(),
                "no end marker within the recording budget, resync"
            );
            self.resync();
        }
    }

    fn resync(&mut self) {
        self.state = RxState::Listening;
        self.recorded.clear();
        self.candidates.clear();
        self.end_run = 0;
    }

    fn finalize(&mut self, table: &ProtocolTable) {
        let mut n = self.recorded.len().saturating_sub(self.end_run);
        // Drop marker fade-ramp frames that precede the counted run.
        let mut trimmed = 0;
        while n > 0 && trimmed < 3 {
            let ramp = marker_frame(
                &self.recorded[n - 1],
                self.active_freq_start,
                self.active_max_bytes,
                self.threshold,
                MarkerTones::Odd,
                Gate::Relaxed,
            );
            if !ramp {
                break;
            }
            n -= 1;
            trimmed += 1;
        }
        let data = &self.recorded[..n];

        let mut best: Option<(RxData, f32)> = None;
        for &id in &self.candidates {
            let Some(p) = table.get(id) else { continue };
            let Some((payload, corrected, margin)) = try_decode_variable(data, p, self.threshold)
            else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, m)| margin > *m) {
                best = Some((RxData { payload, protocol: id, corrected }, margin));
            }
        }

        match best {
            Some((rx, margin)) => {
                debug!(
                    protocol = ?rx.protocol,
                    bytes = rx.payload.len(),
                    corrected = rx.corrected,
                    margin,
                    "payload received"
                );
                self.result = Some(rx);
            }
            None => warn!("end marker seen but no protocol hypothesis decoded, resync"),
        }
    }

    // --- fixed-length mode ---

    fn fixed_step(&mut self, spec: Vec<f32>, table: &ProtocolTable) {
        if self.ring_cap == 0 {
            return;
        }
        if self.ring.len() == self.ring_cap {
            self.ring.pop_front();
        }
        self.ring.push_back(spec);

        if self.cooldown > 0 {
            self.cooldown -= 1;
            return;
        }

        let len = match self.fixed_length {
            Some(len) => len,
            None => return,
        };
        let threshold = self.threshold;
        let samples_per_frame = self.samples_per_frame;

        let mut found: Option<(RxData, usize)> = None;
        let frames = self.ring.make_contiguous();
        for (id, p) in table.enabled() {
            if !p.fits(samples_per_frame) {
                continue;
            }
            let needed = fixed_window_frames(p, len);
            if frames.len() < needed {
                continue;
            }
            let window = &frames[frames.len() - needed..];
            let (bytes, margin) = demodulate(window, p, threshold);
            if margin < 0.5 {
                // No tones, or tones too uneven to be a frame-aligned symbol.
                continue;
            }
            let enc_len = len + fec::fixed_ecc_bytes(len);
            let Ok((payload, corrected)) = RsBlock::new(fec::fixed_ecc_bytes(len))
                .decode(&bytes[..enc_len])
            else {
                continue;
            };
            found = Some((RxData { payload, protocol: id, corrected }, p.frames_per_tx));
            break;
        }

        if let Some((rx, cooldown)) = found {
            debug!(protocol = ?rx.protocol, bytes = rx.payload.len(), corrected = rx.corrected, "payload received");
            self.result = Some(rx);
            self.ring.clear();
            self.cooldown = cooldown;
        }
    }
}

/// Frames a fixed-length transmission occupies for a protocol.
fn fixed_window_frames(p: &Protocol, payload_len: usize) -> usize {
    let enc_len = payload_len + fec::fixed_ecc_bytes(payload_len);
    let n_symbols = (enc_len + p.bytes_per_tx - 1) / p.bytes_per_tx;
    n_symbols * p.frames_per_tx
}

/// Upper bound on the frames a variable-length transmission can occupy for
/// any of the candidate protocols.
fn variable_frame_budget(table: &ProtocolTable, candidates: &[ProtocolId]) -> usize {
    let max_stream =
        ENCODED_DATA_OFFSET + MAX_LENGTH_VARIABLE + fec::variable_ecc_bytes(MAX_LENGTH_VARIABLE);
    let mut budget = 0;
    for &id in candidates {
        let Some(p) = table.get(id) else { continue };
        let n_symbols = (max_stream + p.bytes_per_tx - 1) / p.bytes_per_tx;
        budget = budget.max(n_symbols * p.frames_per_tx);
    }
    (budget + 2 * MARKER_FRAMES).min(MAX_RECORDED_FRAMES)
}

/// Demodulation gate derived from the marker threshold: a bit counts as
/// active when its bin exceeds the nearest quiet bins by this ratio.
fn demod_threshold(threshold: f32) -> f32 {
    1.0 + (threshold - 1.0) * 0.5
}

/// Decode a recorded data region under one protocol hypothesis.
///
/// Returns the payload, the FEC correction count, and the demodulation
/// margin used to rank competing hypotheses. The hypothesis is rejected
/// unless its decoded length reproduces the recorded frame count exactly.
fn try_decode_variable(
    data: &[Vec<f32>],
    p: &Protocol,
    threshold: f32,
) -> Option<(Vec<u8>, usize, f32)> {
    if data.is_empty() || data.len() % p.frames_per_tx != 0 {
        return None;
    }
    let n_symbols = data.len() / p.frames_per_tx;
    let (bytes, margin) = demodulate(data, p, threshold);
    if bytes.len() < ENCODED_DATA_OFFSET {
        return None;
    }

    let (length, corrected_len) = RsBlock::new(LENGTH_ECC_BYTES)
        .decode(&bytes[..ENCODED_DATA_OFFSET])
        .ok()?;
    let payload_len = length[0] as usize;
    if payload_len == 0 || payload_len > MAX_LENGTH_VARIABLE {
        return None;
    }

    let ecc = fec::variable_ecc_bytes(payload_len);
    let total = ENCODED_DATA_OFFSET + payload_len + ecc;
    let needed_symbols = (total + p.bytes_per_tx - 1) / p.bytes_per_tx;
    if needed_symbols != n_symbols {
        return None;
    }

    let (payload, corrected_payload) = RsBlock::new(ecc)
        .decode(&bytes[ENCODED_DATA_OFFSET..total])
        .ok()?;
    Some((payload, corrected_len + corrected_payload, margin))
}

/// Demodulate a run of frames into bytes under a protocol.
///
/// Frames are grouped `frames_per_tx` at a time; within each group only the
/// interior frames are averaged, since the first and last carry the fade
/// ramps. A bit is active when its bin beats the nearest quiet bins on both
/// sides and carries a solid share of the band energy. The returned margin is
/// the mean active-tone magnitude relative to the band peak: near 1.0 for a
/// frame-aligned hypothesis, noticeably lower for a misgrouped one.
fn demodulate(data: &[Vec<f32>], p: &Protocol, threshold: f32) -> (Vec<u8>, f32) {
    let f = p.frames_per_tx;
    let b = p.bytes_per_tx;
    let n_symbols = data.len() / f;
    let spec_len = data.first().map_or(0, |s| s.len());
    let band_limit = (16 * b) as i64;
    let gate = demod_threshold(threshold);

    let mut bytes = Vec::with_capacity(n_symbols * b);
    let mut avg = vec![0.0f32; spec_len];
    let mut margin_sum = 0.0f32;
    let mut margin_n = 0usize;

    for s in 0..n_symbols {
        let group = &data[s * f..(s + 1) * f];
        let (lo, hi) = if f > 2 { (1, f - 1) } else { (0, f) };
        avg.fill(0.0);
        for frame in &group[lo..hi] {
            for (a, v) in avg.iter_mut().zip(frame.iter()) {
                *a += v;
            }
        }
        let scale = 1.0 / (hi - lo) as f32;
        for a in &mut avg {
            *a *= scale;
        }

        let band_end = (p.freq_start + 16 * b).min(spec_len);
        let band = &avg[p.freq_start.min(spec_len)..band_end];
        let band_mean = band.iter().sum::<f32>() / band.len().max(1) as f32;
        let band_peak = band.iter().fold(0.0f32, |m, &v| m.max(v));

        for j in 0..b {
            let mut byte = 0u8;
            for k in 0..8 {
                let bit = 8 * j + k;
                let bin = p.bit_bin(bit);
                if bin >= spec_len {
                    continue;
                }
                let m = avg[bin];
                let reference =
                    reference_level(&avg, p.freq_start, (2 * bit + (bit & 1)) as i64, band_limit);
                if m > gate * reference && m > 0.5 * band_mean {
                    byte |= 1 << k;
                    margin_sum += m / band_peak;
                    margin_n += 1;
                }
            }
            bytes.push(byte);
        }
    }

    let margin = if margin_n > 0 { margin_sum / margin_n as f32 } else { 0.0 };
    (bytes, margin)
}

/// Offsets of the form `4k` and `4k + 3` carry tones; everything between is
/// guaranteed quiet and serves as the leakage reference.
fn is_tone_offset(offset: i64, limit: i64) -> bool {
    offset >= 0 && offset < limit && (offset % 4 == 0 || offset % 4 == 3)
}

fn nearest_quiet(mut offset: i64, dir: i64, limit: i64) -> i64 {
    offset += dir;
    while is_tone_offset(offset, limit) {
        offset += dir;
    }
    offset
}

/// Mean magnitude of the nearest quiet bins on either side of a tone offset.
fn reference_level(spec: &[f32], freq_start: usize, offset: i64, limit: i64) -> f32 {
    let mut sum = 0.0f32;
    let mut n = 0usize;
    for dir in [-1i64, 1] {
        let bin = freq_start as i64 + nearest_quiet(offset, dir, limit);
        if bin >= 0 && (bin as usize) < spec.len() {
            sum += spec[bin as usize];
            n += 1;
        }
    }
    if n > 0 {
        sum / n as f32
    } else {
        0.0
    }
}

/// Test one spectrum against a marker tone set.
///
/// The start marker sounds the even-indexed marker tones, the end marker the
/// odd-indexed ones. A qualifying frame must light the whole set, keep the
/// opposite set quiet, and show nothing in the data band above the marker
/// band: payloads whose bytes light only one parity of tones would otherwise
/// counterfeit a marker.
fn marker_frame(
    spec: &[f32],
    freq_start: usize,
    max_bytes: usize,
    threshold: f32,
    tones: MarkerTones,
    gate: Gate,
) -> bool {
    let marker_limit = (2 * N_BITS_IN_MARKER) as i64;
    let want = |b: usize| match tones {
        MarkerTones::Even => b % 2 == 0,
        MarkerTones::Odd => b % 2 == 1,
    };

    let mut tone_mags = [0.0f32; N_BITS_IN_MARKER / 2];
    let mut tone_offsets = [0usize; N_BITS_IN_MARKER / 2];
    let mut opp_sum = 0.0f32;
    let mut ti = 0usize;
    for b in 0..N_BITS_IN_MARKER {
        let offset = 2 * b + (b & 1);
        let bin = freq_start + offset;
        if bin >= spec.len() {
            return false;
        }
        if want(b) {
            tone_mags[ti] = spec[bin];
            tone_offsets[ti] = offset;
            ti += 1;
        } else {
            opp_sum += spec[bin];
        }
    }
    let tone_mean = tone_mags.iter().sum::<f32>() / tone_mags.len() as f32;
    if !(tone_mean > 0.0) {
        return false;
    }
    let opp_mean = opp_sum / (N_BITS_IN_MARKER / 2) as f32;

    let data_limit = 16 * max_bytes;
    if data_limit > 2 * N_BITS_IN_MARKER {
        let mut out_max = 0.0f32;
        for offset in 2 * N_BITS_IN_MARKER..data_limit {
            let bin = freq_start + offset;
            if bin < spec.len() {
                out_max = out_max.max(spec[bin]);
            }
        }
        if out_max > 0.5 * tone_mean {
            return false;
        }
    }

    match gate {
        Gate::Strict => {
            if tone_mean <= threshold * opp_mean {
                return false;
            }
            for (&m, &offset) in tone_mags.iter().zip(tone_offsets.iter()) {
                if m < 0.5 * tone_mean {
                    return false;
                }
                if m <= threshold * reference_level(spec, freq_start, offset as i64, marker_limit) {
                    return false;
                }
            }
            true
        }
        Gate::Relaxed => {
            if tone_mean <= 0.5 * threshold * opp_mean {
                return false;
            }
            let present = tone_mags.iter().filter(|&&m| m >= 0.25 * tone_mean).count();
            4 * present >= 3 * tone_mags.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::builtin;

    const SPEC_LEN: usize = 513;

    fn spec_with_tones(freq_start: usize, offsets: &[usize], level: f32) -> Vec<f32> {
        let mut spec = vec![0.0f32; SPEC_LEN];
        for &o in offsets {
            spec[freq_start + o] = level;
        }
        spec
    }

    fn even_marker_offsets() -> Vec<usize> {
        (0..N_BITS_IN_MARKER).filter(|b| b % 2 == 0).map(|b| 2 * b).collect()
    }

    fn odd_marker_offsets() -> Vec<usize> {
        (0..N_BITS_IN_MARKER).filter(|b| b % 2 == 1).map(|b| 2 * b + 1).collect()
    }

    #[test]
    fn test_marker_frame_accepts_clean_start_marker() {
        let spec = spec_with_tones(40, &even_marker_offsets(), 20.0);
        assert!(marker_frame(&spec, 40, 3, 3.0, MarkerTones::Even, Gate::Strict));
        assert!(!marker_frame(&spec, 40, 3, 3.0, MarkerTones::Odd, Gate::Strict));
    }

    #[test]
    fn test_marker_frame_requires_all_tones() {
        let mut offsets = even_marker_offsets();
        offsets.pop();
        let spec = spec_with_tones(40, &offsets, 20.0);
        assert!(!marker_frame(&spec, 40, 3, 3.0, MarkerTones::Even, Gate::Strict));
    }

    #[test]
    fn test_marker_frame_rejects_silence() {
        let spec = vec![0.0f32; SPEC_LEN];
        assert!(!marker_frame(&spec, 40, 3, 3.0, MarkerTones::Even, Gate::Strict));
        assert!(!marker_frame(&spec, 40, 3, 3.0, MarkerTones::Even, Gate::Relaxed));
    }

    #[test]
    fn test_marker_frame_rejects_odd_only_payload_with_high_bits() {
        // Bytes like 0xAA light every odd-indexed tone; with bytes_per_tx = 3
        // they also light tones above the marker band, which vetoes the frame.
        let p = builtin(ProtocolId::AudibleNormal).unwrap();
        let mut offsets = odd_marker_offsets();
        for bit in [17usize, 19, 21, 23] {
            offsets.push(p.bit_bin(bit) - p.freq_start);
        }
        let spec = spec_with_tones(40, &offsets, 20.0);
        assert!(!marker_frame(&spec, 40, 3, 3.0, MarkerTones::Odd, Gate::Strict));
    }

    #[test]
    fn test_marker_frame_relaxed_accepts_faded_marker() {
        // A fade ramp scales all tones but leaks into the neighbors, so the
        // strict per-tone ratio fails while the relaxed gate still matches.
        let mut spec = spec_with_tones(40, &even_marker_offsets(), 9.0);
        for &o in &even_marker_offsets() {
            spec[40 + o - 1] = 4.0;
            spec[40 + o + 1] = 4.0;
        }
        assert!(!marker_frame(&spec, 40, 3, 3.0, MarkerTones::Even, Gate::Strict));
        assert!(marker_frame(&spec, 40, 3, 3.0, MarkerTones::Even, Gate::Relaxed));
    }

    #[test]
    fn test_demodulate_single_symbol() {
        // One-frame symbols on a synthetic protocol keep the fixture small.
        let p = Protocol { name: "test", freq_start: 40, frames_per_tx: 1, bytes_per_tx: 1 };
        let byte = 0xC3u8;
        let offsets: Vec<usize> = (0..8)
            .filter(|k| byte >> k & 1 == 1)
            .map(|k| 2 * k + (k & 1))
            .collect();
        let frames = vec![spec_with_tones(40, &offsets, 10.0)];

        let (bytes, margin) = demodulate(&frames, &p, 3.0);
        assert_eq!(bytes, vec![byte]);
        assert!(margin > 0.9);
    }

    #[test]
    fn test_demodulate_zero_symbol() {
        let p = Protocol { name: "test", freq_start: 40, frames_per_tx: 1, bytes_per_tx: 1 };
        let frames = vec![vec![0.0f32; SPEC_LEN]];
        let (bytes, margin) = demodulate(&frames, &p, 3.0);
        assert_eq!(bytes, vec![0]);
        assert_eq!(margin, 0.0);
    }

    #[test]
    fn test_reference_level_skips_tone_bins() {
        // Offset 4 neighbors a tone at offset 3; the reference must come from
        // the quiet bins at offsets 2 and 5 instead.
        let mut spec = vec![0.0f32; SPEC_LEN];
        spec[40 + 3] = 50.0;
        spec[40 + 2] = 2.0;
        spec[40 + 5] = 4.0;
        let r = reference_level(&spec, 40, 4, 48);
        assert!((r - 3.0).abs() < 1e-6);
    }
}
