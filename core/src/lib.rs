//! Data-over-sound modem.
//!
//! Encodes short binary payloads as multi-tone FSK bursts rendered to PCM,
//! and decodes such waveforms back to payloads through framed spectral
//! analysis, marker synchronization and Reed-Solomon error correction.
//!
//! # Example
//!
//! ```no_run
//! use tonecast_core::{Modem, Parameters, ProtocolId};
//!
//! let mut modem = Modem::new(Parameters::default()).unwrap();
//! modem.init_tx(b"hello", ProtocolId::AudibleFast, 25).unwrap();
//!
//! let mut waveform: Vec<u8> = Vec::new();
//! modem.encode(|chunk| waveform.extend_from_slice(chunk)).unwrap();
//!
//! let mut pos = 0;
//! modem
//!     .decode(|dst| {
//!         let n = (waveform.len() - pos).min(dst.len());
//!         dst[..n].copy_from_slice(&waveform[pos..pos + n]);
//!         pos += n;
//!         n
//!     })
//!     .unwrap();
//! assert_eq!(modem.take_rx_data().unwrap().payload, b"hello");
//! ```

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fec;
pub mod fft;
pub mod modem;
pub mod protocol;
pub mod resampler;
pub mod sample_format;

pub use decoder::RxData;
pub use encoder::ToneData;
pub use error::{ModemError, Result};
pub use fft::SpectrumAnalyzer;
pub use modem::{Modem, OperatingMode, Parameters};
pub use protocol::{Protocol, ProtocolId, ProtocolTable};
pub use resampler::Resampler;
pub use sample_format::SampleFormat;

pub const SAMPLE_RATE_MIN: f32 = 1000.0;
pub const SAMPLE_RATE_MAX: f32 = 96000.0;
pub const DEFAULT_SAMPLE_RATE: f32 = 48000.0;
pub const DEFAULT_SAMPLES_PER_FRAME: usize = 1024;
pub const DEFAULT_VOLUME: u8 = 10;
pub const DEFAULT_SOUND_MARKER_THRESHOLD: f32 = 3.0;

/// Frames in each start/end sound marker.
pub const MARKER_FRAMES: usize = 16;
/// Bit positions participating in the markers.
pub const N_BITS_IN_MARKER: usize = 16;
/// Bytes preceding the payload block: one length byte plus its parity.
pub const ENCODED_DATA_OFFSET: usize = 3;

pub const MAX_SAMPLES_PER_FRAME: usize = 1024;
/// Upper bound on a fully encoded byte stream, and on decoded output.
pub const MAX_DATA_SIZE: usize = 256;
/// Payload cap in variable-length mode.
pub const MAX_LENGTH_VARIABLE: usize = 140;
/// Payload cap in fixed-length mode.
pub const MAX_LENGTH_FIXED: usize = 16;
/// Spectra retained for the display snapshot.
pub const MAX_SPECTRUM_HISTORY: usize = 4;
/// Hard cap on frames recorded while hunting for the end marker.
pub const MAX_RECORDED_FRAMES: usize = 2048;
