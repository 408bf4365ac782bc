//! Modulation protocol descriptors.
//!
//! A protocol is the triple `(freq_start, frames_per_tx, bytes_per_tx)`:
//! the FFT bin of the lowest tone, the number of audio frames that carry one
//! symbol, and the number of payload bytes packed into one symbol. Nine
//! builtin protocols cover the audible / ultrasound / dual-tone bands at
//! three speeds each; ten additional slots can be registered at runtime.

use crate::error::{ModemError, Result};
use crate::N_BITS_IN_MARKER;

/// Total number of protocol slots (9 builtin + 10 custom).
pub const PROTOCOL_COUNT: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    AudibleNormal,
    AudibleFast,
    AudibleFastest,
    UltrasoundNormal,
    UltrasoundFast,
    UltrasoundFastest,
    DtNormal,
    DtFast,
    DtFastest,
    /// User-definable slot, `0..10`.
    Custom(u8),
}

impl ProtocolId {
    pub const BUILTIN: [ProtocolId; 9] = [
        ProtocolId::AudibleNormal,
        ProtocolId::AudibleFast,
        ProtocolId::AudibleFastest,
        ProtocolId::UltrasoundNormal,
        ProtocolId::UltrasoundFast,
        ProtocolId::UltrasoundFastest,
        ProtocolId::DtNormal,
        ProtocolId::DtFast,
        ProtocolId::DtFastest,
    ];

    pub fn index(self) -> usize {
        match self {
            ProtocolId::AudibleNormal => 0,
            ProtocolId::AudibleFast => 1,
            ProtocolId::AudibleFastest => 2,
            ProtocolId::UltrasoundNormal => 3,
            ProtocolId::UltrasoundFast => 4,
            ProtocolId::UltrasoundFastest => 5,
            ProtocolId::DtNormal => 6,
            ProtocolId::DtFast => 7,
            ProtocolId::DtFastest => 8,
            ProtocolId::Custom(n) => 9 + n as usize,
        }
    }

    pub fn from_index(index: usize) -> Option<ProtocolId> {
        match index {
            0..=8 => Some(Self::BUILTIN[index]),
            9..=18 => Some(ProtocolId::Custom((index - 9) as u8)),
            _ => None,
        }
    }
}

/// Modulation parameter set shared by transmit and receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub name: &'static str,
    /// FFT bin index of the lowest data tone.
    pub freq_start: usize,
    /// Number of frames carrying one symbol.
    pub frames_per_tx: usize,
    /// Number of payload bytes per symbol.
    pub bytes_per_tx: usize,
}

impl Protocol {
    pub fn n_data_bits(&self) -> usize {
        8 * self.bytes_per_tx
    }

    /// FFT bin carrying data bit `bit`.
    ///
    /// Even bits sit at `freq_start + 2b`, odd bits at `freq_start + 2b + 1`,
    /// so tones occupy offsets of the form `4k` and `4k + 3`: each odd bit is
    /// one bin below the next even bit, and two quiet bins separate
    /// consecutive pairs to serve as leakage references.
    pub fn bit_bin(&self, bit: usize) -> usize {
        self.freq_start + 2 * bit + (bit & 1)
    }

    /// Whether the protocol's data band fits below Nyquist for a given FFT size.
    pub fn fits(&self, samples_per_frame: usize) -> bool {
        self.freq_start + 16 * self.bytes_per_tx <= samples_per_frame / 2
    }

    /// Like [`fits`](Self::fits), but also requires room for the marker band
    /// (markers always span [`N_BITS_IN_MARKER`] bit positions).
    pub fn fits_with_markers(&self, samples_per_frame: usize) -> bool {
        let band = (16 * self.bytes_per_tx).max(2 * N_BITS_IN_MARKER);
        self.freq_start + band <= samples_per_frame / 2
    }
}

const BUILTIN_TABLE: [Protocol; 9] = [
    Protocol { name: "Normal", freq_start: 40, frames_per_tx: 9, bytes_per_tx: 3 },
    Protocol { name: "Fast", freq_start: 40, frames_per_tx: 6, bytes_per_tx: 3 },
    Protocol { name: "Fastest", freq_start: 40, frames_per_tx: 3, bytes_per_tx: 3 },
    Protocol { name: "[U] Normal", freq_start: 320, frames_per_tx: 9, bytes_per_tx: 3 },
    Protocol { name: "[U] Fast", freq_start: 320, frames_per_tx: 6, bytes_per_tx: 3 },
    Protocol { name: "[U] Fastest", freq_start: 320, frames_per_tx: 3, bytes_per_tx: 3 },
    Protocol { name: "[DT] Normal", freq_start: 24, frames_per_tx: 9, bytes_per_tx: 1 },
    Protocol { name: "[DT] Fast", freq_start: 24, frames_per_tx: 6, bytes_per_tx: 1 },
    Protocol { name: "[DT] Fastest", freq_start: 24, frames_per_tx: 3, bytes_per_tx: 1 },
];

/// Builtin descriptor for an id, if it is one of the nine builtins.
pub fn builtin(id: ProtocolId) -> Option<Protocol> {
    match id {
        ProtocolId::Custom(_) => None,
        _ => Some(BUILTIN_TABLE[id.index()]),
    }
}

/// Per-instance protocol registry: the nine builtins plus custom slots,
/// each with an Rx enable flag.
#[derive(Debug, Clone)]
pub struct ProtocolTable {
    entries: [Option<Protocol>; PROTOCOL_COUNT],
    rx_enabled: [bool; PROTOCOL_COUNT],
    revision: u64,
}

impl ProtocolTable {
    /// Table with all builtins registered and Rx-enabled.
    pub fn with_builtins() -> Self {
        let mut entries = [None; PROTOCOL_COUNT];
        let mut rx_enabled = [false; PROTOCOL_COUNT];
        for (i, p) in BUILTIN_TABLE.iter().enumerate() {
            entries[i] = Some(*p);
            rx_enabled[i] = true;
        }
        Self { entries, rx_enabled, revision: 0 }
    }

    pub fn get(&self, id: ProtocolId) -> Option<&Protocol> {
        self.entries[id.index()].as_ref()
    }

    pub fn is_rx_enabled(&self, id: ProtocolId) -> bool {
        self.rx_enabled[id.index()]
    }

    pub fn set_rx_enabled(&mut self, id: ProtocolId, enabled: bool) -> Result<()> {
        let idx = id.index();
        if self.entries[idx].is_none() {
            return Err(ModemError::UnknownProtocol);
        }
        if self.rx_enabled[idx] != enabled {
            self.rx_enabled[idx] = enabled;
            self.revision += 1;
        }
        Ok(())
    }

    /// Register a protocol in one of the ten custom slots and enable it for Rx.
    pub fn register_custom(&mut self, slot: u8, protocol: Protocol) -> Result<ProtocolId> {
        if slot >= 10 {
            return Err(ModemError::InvalidParameters(format!(
                "custom protocol slot {slot} out of range (0..10)"
            )));
        }
        if protocol.bytes_per_tx == 0 || protocol.frames_per_tx == 0 {
            return Err(ModemError::InvalidParameters(
                "protocol must carry at least one byte over at least one frame".into(),
            ));
        }
        let id = ProtocolId::Custom(slot);
        self.entries[id.index()] = Some(protocol);
        self.rx_enabled[id.index()] = true;
        self.revision += 1;
        Ok(id)
    }

    /// Rx-enabled protocols in id order.
    pub fn enabled(&self) -> impl Iterator<Item = (ProtocolId, &Protocol)> {
        self.entries.iter().enumerate().filter_map(move |(i, e)| {
            let p = e.as_ref()?;
            if !self.rx_enabled[i] {
                return None;
            }
            Some((ProtocolId::from_index(i)?, p))
        })
    }

    /// Bumped on every enable/registration change; lets the receiver notice
    /// that its cached marker trackers are stale.
    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_values() {
        let p = builtin(ProtocolId::AudibleFast).unwrap();
        assert_eq!(p.freq_start, 40);
        assert_eq!(p.frames_per_tx, 6);
        assert_eq!(p.bytes_per_tx, 3);

        let p = builtin(ProtocolId::UltrasoundNormal).unwrap();
        assert_eq!(p.freq_start, 320);
        assert_eq!(p.frames_per_tx, 9);

        let p = builtin(ProtocolId::DtFastest).unwrap();
        assert_eq!(p.freq_start, 24);
        assert_eq!(p.bytes_per_tx, 1);
    }

    #[test]
    fn test_bit_bin_mapping() {
        let p = builtin(ProtocolId::AudibleNormal).unwrap();
        // Even bits at freq_start + 2b, odd bits one bin above that.
        assert_eq!(p.bit_bin(0), 40);
        assert_eq!(p.bit_bin(1), 43);
        assert_eq!(p.bit_bin(2), 44);
        assert_eq!(p.bit_bin(3), 47);
        assert_eq!(p.bit_bin(23), 40 + 47);
    }

    #[test]
    fn test_tone_spacing_alternates() {
        // Offsets follow the 4k / 4k+3 pattern: a gap of 3 after each even
        // bit, a gap of 1 between an odd bit and the next even one.
        let p = builtin(ProtocolId::AudibleNormal).unwrap();
        for b in 0..p.n_data_bits() - 1 {
            let expected = if b % 2 == 0 { 3 } else { 1 };
            assert_eq!(p.bit_bin(b + 1) - p.bit_bin(b), expected, "gap after bit {b}");
        }
    }

    #[test]
    fn test_builtins_fit_default_frame() {
        for id in ProtocolId::BUILTIN {
            let p = builtin(id).unwrap();
            assert!(p.fits(1024), "{:?} does not fit", id);
            assert!(p.fits_with_markers(1024), "{:?} marker band does not fit", id);
        }
    }

    #[test]
    fn test_index_round_trip() {
        for i in 0..PROTOCOL_COUNT {
            let id = ProtocolId::from_index(i).unwrap();
            assert_eq!(id.index(), i);
        }
        assert!(ProtocolId::from_index(PROTOCOL_COUNT).is_none());
    }

    #[test]
    fn test_table_enable_toggle() {
        let mut table = ProtocolTable::with_builtins();
        assert!(table.is_rx_enabled(ProtocolId::AudibleFast));
        table.set_rx_enabled(ProtocolId::AudibleFast, false).unwrap();
        assert!(!table.is_rx_enabled(ProtocolId::AudibleFast));
        assert_eq!(table.enabled().count(), 8);

        // Unregistered custom slot cannot be toggled.
        assert!(table.set_rx_enabled(ProtocolId::Custom(0), true).is_err());
    }

    #[test]
    fn test_register_custom() {
        let mut table = ProtocolTable::with_builtins();
        let p = Protocol { name: "custom", freq_start: 96, frames_per_tx: 6, bytes_per_tx: 2 };
        let id = table.register_custom(3, p).unwrap();
        assert_eq!(id, ProtocolId::Custom(3));
        assert_eq!(table.get(id), Some(&p));
        assert!(table.is_rx_enabled(id));

        assert!(table.register_custom(10, p).is_err());
    }
}
