//! Modem facade: parameter validation, buffer ownership and the
//! `encode` / `decode` entry points.
//!
//! A modem instance is single-threaded: all entry points and accessors are
//! called from one thread, audio is exchanged synchronously through the
//! caller-supplied callbacks, and Rx state persists across `decode` calls so
//! that successive calls observe one continuous stream.

use tracing::debug;

use crate::decoder::{Decoder, RxData};
use crate::encoder::{PreparedTx, ToneData};
use crate::error::{ModemError, Result};
use crate::protocol::{Protocol, ProtocolId, ProtocolTable};
use crate::resampler::Resampler;
use crate::sample_format::SampleFormat;
use crate::{
    DEFAULT_SAMPLES_PER_FRAME, DEFAULT_SAMPLE_RATE, DEFAULT_SOUND_MARKER_THRESHOLD,
    DEFAULT_VOLUME, MAX_LENGTH_FIXED, MAX_SAMPLES_PER_FRAME, SAMPLE_RATE_MAX, SAMPLE_RATE_MIN,
};

/// Which halves of the modem are active. Disabled halves allocate no buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingMode(u32);

impl OperatingMode {
    pub const RX: OperatingMode = OperatingMode(1 << 1);
    pub const TX: OperatingMode = OperatingMode(1 << 2);
    pub const RX_AND_TX: OperatingMode = OperatingMode(1 << 1 | 1 << 2);
    /// Transmit side computes the tone plan but renders no PCM.
    pub const TX_ONLY_TONES: OperatingMode = OperatingMode(1 << 3);

    pub fn contains(self, other: OperatingMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OperatingMode {
    type Output = OperatingMode;

    fn bitor(self, rhs: OperatingMode) -> OperatingMode {
        OperatingMode(self.0 | rhs.0)
    }
}

/// Construction-time parameter record.
#[derive(Debug, Clone, Copy)]
pub struct Parameters {
    /// `> 0` selects fixed-length mode of that many bytes; `<= 0` selects
    /// variable-length mode with sound markers.
    pub payload_length: i32,
    /// Capture sample rate in Hz.
    pub sample_rate_inp: f32,
    /// Playback sample rate in Hz.
    pub sample_rate_out: f32,
    /// Operating sample rate in Hz: synthesis and FFT happen here.
    pub sample_rate: f32,
    /// FFT size; fixes the bin spacing at `sample_rate / samples_per_frame`.
    pub samples_per_frame: usize,
    /// Marker SNR gate.
    pub sound_marker_threshold: f32,
    pub sample_format_inp: SampleFormat,
    pub sample_format_out: SampleFormat,
    pub operating_mode: OperatingMode,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            payload_length: -1,
            sample_rate_inp: DEFAULT_SAMPLE_RATE,
            sample_rate_out: DEFAULT_SAMPLE_RATE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
            sound_marker_threshold: DEFAULT_SOUND_MARKER_THRESHOLD,
            sample_format_inp: SampleFormat::F32,
            sample_format_out: SampleFormat::F32,
            operating_mode: OperatingMode::RX_AND_TX,
        }
    }
}

pub struct Modem {
    params: Parameters,
    fixed_length: Option<usize>,
    protocols: ProtocolTable,
    tx: Option<PreparedTx>,
    rx: Option<Decoder>,
    resampler_out: Option<Resampler>,
    resampler_inp: Option<Resampler>,
    /// Carry for input bytes that do not yet form a whole sample.
    pending_inp: Vec<u8>,
}

impl Modem {
    pub fn new(params: Parameters) -> Result<Self> {
        for (name, rate) in [
            ("sampleRateInp", params.sample_rate_inp),
            ("sampleRateOut", params.sample_rate_out),
            ("sampleRate", params.sample_rate),
        ] {
            if !(SAMPLE_RATE_MIN..=SAMPLE_RATE_MAX).contains(&rate) {
                return Err(ModemError::InvalidParameters(format!(
                    "{name} = {rate} outside [{SAMPLE_RATE_MIN}, {SAMPLE_RATE_MAX}]"
                )));
            }
        }
        let n = params.samples_per_frame;
        if n == 0 || n > MAX_SAMPLES_PER_FRAME || !n.is_power_of_two() {
            return Err(ModemError::InvalidParameters(format!(
                "samplesPerFrame {n} must be a power of two in 1..={MAX_SAMPLES_PER_FRAME}"
            )));
        }
        if !(params.sound_marker_threshold > 1.0) {
            return Err(ModemError::InvalidParameters(format!(
                "soundMarkerThreshold {} must exceed 1",
                params.sound_marker_threshold
            )));
        }
        let fixed_length = if params.payload_length > 0 {
            let len = params.payload_length as usize;
            if len > MAX_LENGTH_FIXED {
                return Err(ModemError::InvalidParameters(format!(
                    "fixed payload length {len} exceeds {MAX_LENGTH_FIXED}"
                )));
            }
            Some(len)
        } else {
            None
        };

        let mode = params.operating_mode;
        let rx_enabled = mode.contains(OperatingMode::RX);
        let tx_enabled = mode.contains(OperatingMode::TX) || mode.contains(OperatingMode::TX_ONLY_TONES);
        if !rx_enabled && !tx_enabled {
            return Err(ModemError::InvalidParameters(
                "operating mode enables neither Rx nor Tx".into(),
            ));
        }

        let rx = if rx_enabled {
            Some(Decoder::new(n, params.sound_marker_threshold, fixed_length)?)
        } else {
            None
        };
        let resampler_out = (tx_enabled && params.sample_rate_out != params.sample_rate)
            .then(Resampler::new);
        let resampler_inp = (rx_enabled && params.sample_rate_inp != params.sample_rate)
            .then(Resampler::new);

        debug!(
            sample_rate = params.sample_rate,
            samples_per_frame = n,
            fixed_length = ?fixed_length,
            rx_enabled,
            tx_enabled,
            "modem created"
        );
        Ok(Self {
            params,
            fixed_length,
            protocols: ProtocolTable::with_builtins(),
            tx: None,
            rx,
            resampler_out,
            resampler_inp,
            pending_inp: Vec::new(),
        })
    }

    pub fn default_parameters() -> Parameters {
        Parameters::default()
    }

    // --- instance state ---

    pub fn samples_per_frame(&self) -> usize {
        self.params.samples_per_frame
    }

    pub fn sample_rate(&self) -> f32 {
        self.params.sample_rate
    }

    pub fn sample_rate_inp(&self) -> f32 {
        self.params.sample_rate_inp
    }

    pub fn sample_rate_out(&self) -> f32 {
        self.params.sample_rate_out
    }

    pub fn sample_format_inp(&self) -> SampleFormat {
        self.params.sample_format_inp
    }

    pub fn sample_format_out(&self) -> SampleFormat {
        self.params.sample_format_out
    }

    pub fn sample_size_bytes_inp(&self) -> usize {
        self.params.sample_format_inp.bytes_per_sample()
    }

    pub fn sample_size_bytes_out(&self) -> usize {
        self.params.sample_format_out.bytes_per_sample()
    }

    // --- protocol registry ---

    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    pub fn set_rx_protocol_enabled(&mut self, id: ProtocolId, enabled: bool) -> Result<()> {
        self.protocols.set_rx_enabled(id, enabled)
    }

    /// Register a protocol in a custom slot, for both Tx and Rx use.
    pub fn register_custom_protocol(&mut self, slot: u8, protocol: Protocol) -> Result<ProtocolId> {
        if !protocol.fits(self.params.samples_per_frame) {
            return Err(ModemError::InvalidParameters(format!(
                "protocol band [{}..{}] exceeds half the FFT size",
                protocol.freq_start,
                protocol.freq_start + 16 * protocol.bytes_per_tx
            )));
        }
        self.protocols.register_custom(slot, protocol)
    }

    // --- Tx ---

    pub fn default_tx_protocol_id() -> ProtocolId {
        ProtocolId::AudibleFast
    }

    /// Conservative volume for [`init_tx`](Self::init_tx) when the caller has
    /// no better choice.
    pub fn default_tx_volume() -> u8 {
        DEFAULT_VOLUME
    }

    /// Prepare a payload for transmission. The actual rendering happens in
    /// [`encode`](Self::encode).
    pub fn init_tx(&mut self, payload: &[u8], protocol_id: ProtocolId, volume: u8) -> Result<()> {
        let mode = self.params.operating_mode;
        if !mode.contains(OperatingMode::TX) && !mode.contains(OperatingMode::TX_ONLY_TONES) {
            return Err(ModemError::TxDisabled);
        }
        let protocol = *self.protocols.get(protocol_id).ok_or(ModemError::UnknownProtocol)?;
        if !protocol.fits(self.params.samples_per_frame) {
            return Err(ModemError::UnknownProtocol);
        }
        self.tx = Some(PreparedTx::new(
            payload,
            protocol_id,
            protocol,
            volume,
            self.fixed_length,
            self.params.samples_per_frame,
            self.params.sample_rate,
        )?);
        Ok(())
    }

    pub fn has_tx_data(&self) -> bool {
        self.tx.is_some()
    }

    /// Expected waveform size in samples at the output rate. An overestimate
    /// when the output rate differs from the operating rate; exact otherwise.
    pub fn encode_size_samples(&self) -> usize {
        let Some(tx) = &self.tx else { return 0 };
        let total = tx.total_samples();
        if self.resampler_out.is_none() {
            return total;
        }
        let factor = self.params.sample_rate_out as f64 / self.params.sample_rate as f64;
        ((total + Resampler::WIDTH) as f64 * factor).ceil() as usize + Resampler::WIDTH
    }

    /// Expected waveform size in bytes at the output rate and format.
    pub fn encode_size_bytes(&self) -> usize {
        self.encode_size_samples() * self.sample_size_bytes_out()
    }

    /// Tones of the prepared waveform, one group per burst.
    pub fn waveform_tones(&self) -> &[Vec<ToneData>] {
        self.tx.as_ref().map_or(&[], |tx| tx.tones())
    }

    /// Render the prepared payload, pushing PCM chunks to `output`.
    ///
    /// Returns the number of samples emitted. In tones-only mode nothing is
    /// rendered and the callback is never invoked; inspect
    /// [`waveform_tones`](Self::waveform_tones) instead.
    pub fn encode<F: FnMut(&[u8])>(&mut self, mut output: F) -> Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ModemError::EncodeFailed("encode called before init_tx".into()))?;
        if self.params.operating_mode.contains(OperatingMode::TX_ONLY_TONES) {
            return Ok(0);
        }

        let n = self.params.samples_per_frame;
        let format = self.params.sample_format_out;
        let factor = self.params.sample_rate as f32 / self.params.sample_rate_out as f32;

        if let Some(rs) = &mut self.resampler_out {
            rs.reset();
        }

        let mut frame = vec![0.0f32; n];
        let mut bytes = Vec::with_capacity(n * format.bytes_per_sample());
        let mut emitted = 0usize;
        let mut emit = |samples: &[f32], bytes: &mut Vec<u8>, output: &mut F| {
            if samples.is_empty() {
                return;
            }
            bytes.clear();
            format.encode_samples(samples, bytes);
            output(bytes);
        };

        for frame_id in 0..tx.total_frames() {
            tx.synth_frame(frame_id, &mut frame);
            match &mut self.resampler_out {
                Some(rs) => {
                    let resampled = rs.resample(factor, &frame);
                    emitted += resampled.len();
                    emit(&resampled, &mut bytes, &mut output);
                }
                None => {
                    emitted += frame.len();
                    emit(&frame, &mut bytes, &mut output);
                }
            }
        }
        // Flush the resampler's filter delay.
        if let Some(rs) = &mut self.resampler_out {
            let tail = rs.resample(factor, &vec![0.0f32; Resampler::WIDTH]);
            emitted += tail.len();
            emit(&tail, &mut bytes, &mut output);
        }

        debug!(protocol = ?tx.protocol_id(), samples = emitted, "waveform rendered");
        Ok(emitted)
    }

    // --- Rx ---

    /// Pull audio from `input` until it returns 0 and run the receiver over
    /// it. Decode failures inside the stream resync silently; the only
    /// caller-visible error is non-finite input data.
    pub fn decode<F: FnMut(&mut [u8]) -> usize>(&mut self, mut input: F) -> Result<()> {
        let rx = self.rx.as_mut().ok_or(ModemError::RxDisabled)?;
        rx.sync_protocols(&self.protocols);

        let format = self.params.sample_format_inp;
        let sample_size = format.bytes_per_sample();
        let factor = self.params.sample_rate_inp as f32 / self.params.sample_rate as f32;
        let mut buf = vec![0u8; self.params.samples_per_frame * sample_size];
        let mut samples: Vec<f32> = Vec::new();

        loop {
            let n = input(&mut buf);
            if n == 0 {
                return Ok(());
            }
            let n = n.min(buf.len());
            self.pending_inp.extend_from_slice(&buf[..n]);
            let usable = self.pending_inp.len() - self.pending_inp.len() % sample_size;
            if usable == 0 {
                continue;
            }

            samples.clear();
            format.decode_samples(&self.pending_inp[..usable], &mut samples);
            self.pending_inp.drain(..usable);
            if samples.iter().any(|s| !s.is_finite()) {
                return Err(ModemError::ReceiveFailed);
            }

            match &mut self.resampler_inp {
                Some(rs) => {
                    let resampled = rs.resample(factor, &samples);
                    rx.push_samples(&resampled, &self.protocols)?;
                }
                None => rx.push_samples(&samples, &self.protocols)?,
            }
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| rx.is_receiving())
    }

    pub fn is_analyzing(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| rx.is_analyzing())
    }

    pub fn frames_to_analyze(&self) -> usize {
        self.rx.as_ref().map_or(0, |rx| rx.frames_to_analyze())
    }

    pub fn frames_analyzed(&self) -> usize {
        self.rx.as_ref().map_or(0, |rx| rx.frames_analyzed())
    }

    /// Abort an in-flight reception. Observable on the next `decode` call:
    /// the state machine restarts from listening. Returns whether a
    /// reception was actually aborted.
    pub fn stop_receiving(&mut self) -> bool {
        self.rx.as_mut().is_some_and(|rx| rx.stop())
    }

    /// Most recently decoded transmission, leaving it available.
    pub fn last_rx_data(&self) -> Option<&RxData> {
        self.rx.as_ref().and_then(|rx| rx.result())
    }

    /// Take the most recently decoded transmission.
    pub fn take_rx_data(&mut self) -> Option<RxData> {
        self.rx.as_mut().and_then(|rx| rx.take_result())
    }

    /// Copy the decoded payload into `dst` and return its length, or
    /// [`ModemError::OutputBufferTooSmall`] if it does not fit (in which case
    /// the data stays available). Returns `Ok(0)` when nothing was decoded.
    /// Payloads are not NUL-terminated.
    pub fn take_rx_data_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(ModemError::RxDisabled);
        };
        let needed = match rx.result() {
            None => return Ok(0),
            Some(data) => data.payload.len(),
        };
        if needed > dst.len() {
            return Err(ModemError::OutputBufferTooSmall { needed, have: dst.len() });
        }
        match rx.take_result() {
            Some(data) => {
                dst[..needed].copy_from_slice(&data.payload);
                Ok(needed)
            }
            None => Ok(0),
        }
    }

    /// Magnitude spectrum snapshot for display, averaged over the last few
    /// frames.
    pub fn take_rx_spectrum(&self) -> Vec<f32> {
        self.rx.as_ref().map_or_else(Vec::new, |rx| rx.spectrum())
    }

    /// Samples of the most recently analyzed frame.
    pub fn take_rx_amplitude(&self) -> Vec<f32> {
        self.rx.as_ref().map_or_else(Vec::new, |rx| rx.amplitude().to_vec())
    }
}
