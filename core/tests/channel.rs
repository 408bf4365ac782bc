//! Channel impairment scenarios: resampling, corruption, truncation, noise
//! and non-float PCM formats.

use tonecast_core::{Modem, Parameters, ProtocolId, Resampler, SampleFormat};

fn encode_waveform(modem: &mut Modem, payload: &[u8], protocol: ProtocolId, volume: u8) -> Vec<f32> {
    modem.init_tx(payload, protocol, volume).expect("init_tx failed");
    let mut bytes = Vec::new();
    modem.encode(|chunk| bytes.extend_from_slice(chunk)).expect("encode failed");
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn feed(modem: &mut Modem, samples: &[f32]) {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    feed_bytes(modem, &bytes);
}

fn feed_bytes(modem: &mut Modem, bytes: &[u8]) {
    let mut pos = 0;
    modem
        .decode(|dst| {
            let n = (bytes.len() - pos).min(dst.len());
            dst[..n].copy_from_slice(&bytes[pos..pos + n]);
            pos += n;
            n
        })
        .expect("decode failed");
}

/// Deterministic noise from a little LCG; no PRNG dependency needed.
fn add_noise(samples: &mut [f32], level: f32, mut seed: u32) {
    for sample in samples.iter_mut() {
        seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        let r = (seed >> 16) as f32 / 65535.0;
        *sample = (*sample + (r - 0.5) * 2.0 * level).clamp(-1.0, 1.0);
    }
}

#[test]
fn test_survives_resample_to_44100_and_back() {
    let mut modem = Modem::new(Parameters::default()).unwrap();
    let mut samples = encode_waveform(&mut modem, b"ping", ProtocolId::UltrasoundFast, 25);
    // Trailing silence pushes the tail through both filter delays.
    samples.extend(std::iter::repeat(0.0).take(512));

    let mut down = Resampler::new();
    let narrowband = down.resample(48000.0 / 44100.0, &samples);
    let mut up = Resampler::new();
    let restored = up.resample(44100.0 / 48000.0, &narrowband);

    feed(&mut modem, &restored);
    let rx = modem.take_rx_data().expect("no payload decoded after resampling");
    assert_eq!(rx.payload, b"ping");
    assert_eq!(rx.protocol, ProtocolId::UltrasoundFast);
    assert!(rx.corrected <= 1, "too many corrections: {}", rx.corrected);
}

#[test]
fn test_survives_mismatched_device_rates() {
    // Playback device at 44.1 kHz, capture device at 44.1 kHz, modem at 48 kHz:
    // both directions go through the internal resampler.
    let tx_params = Parameters { sample_rate_out: 44100.0, ..Parameters::default() };
    let mut tx_modem = Modem::new(tx_params).unwrap();
    let samples = encode_waveform(&mut tx_modem, b"ping", ProtocolId::UltrasoundFast, 25);

    let rx_params = Parameters { sample_rate_inp: 44100.0, ..Parameters::default() };
    let mut rx_modem = Modem::new(rx_params).unwrap();
    let mut padded = samples;
    padded.extend(std::iter::repeat(0.0).take(512));
    feed(&mut rx_modem, &padded);

    let rx = rx_modem.take_rx_data().expect("no payload decoded across device rates");
    assert_eq!(rx.payload, b"ping");
    assert!(rx.corrected <= 1, "too many corrections: {}", rx.corrected);
}

#[test]
fn test_fec_recovers_a_destroyed_symbol() {
    let mut modem = Modem::new(Parameters::default()).unwrap();
    let mut samples = encode_waveform(&mut modem, b"data", ProtocolId::DtFastest, 25);

    // Stream layout: 16 marker frames, then 11 one-byte symbols of 3 frames
    // (3 length bytes + 4 payload + 4 parity). Silence the symbol carrying
    // payload byte 1 and let the FEC repair it.
    let symbol = 4;
    let frame = 1024;
    let start = (16 + 3 * symbol) * frame;
    for s in &mut samples[start..start + 3 * frame] {
        *s = 0.0;
    }

    feed(&mut modem, &samples);
    let rx = modem.take_rx_data().expect("no payload decoded after corruption");
    assert_eq!(rx.payload, b"data");
    assert!(rx.corrected >= 1, "corruption went uncounted");
}

#[test]
fn test_truncated_transmission_resyncs_without_output() {
    let mut modem = Modem::new(Parameters::default()).unwrap();
    let samples = encode_waveform(&mut modem, b"cut short", ProtocolId::AudibleFast, 25);

    feed(&mut modem, &samples[..samples.len() / 2]);
    assert!(modem.take_rx_data().is_none());
    assert!(modem.is_receiving());

    // With no end marker the recording budget runs out and the decoder
    // returns to listening.
    let silence = vec![0.0f32; 700 * 1024];
    feed(&mut modem, &silence);
    assert!(modem.take_rx_data().is_none());
    assert!(!modem.is_receiving());

    // The decoder is still usable afterwards.
    let samples = encode_waveform(&mut modem, b"recovered", ProtocolId::AudibleFast, 25);
    feed(&mut modem, &samples);
    assert_eq!(modem.take_rx_data().unwrap().payload, b"recovered");
}

#[test]
fn test_round_trip_with_noise() {
    let mut modem = Modem::new(Parameters::default()).unwrap();
    let mut samples = encode_waveform(&mut modem, b"a0Z5kR2g", ProtocolId::AudibleFast, 50);
    add_noise(&mut samples, 0.01, 12345);

    feed(&mut modem, &samples);
    assert_eq!(modem.take_rx_data().expect("noise broke the decode").payload, b"a0Z5kR2g");
}

#[test]
fn test_round_trip_with_noise_every_speed() {
    for id in [ProtocolId::AudibleNormal, ProtocolId::AudibleFast, ProtocolId::AudibleFastest] {
        let mut modem = Modem::new(Parameters::default()).unwrap();
        let mut samples = encode_waveform(&mut modem, b"speed", id, 50);
        add_noise(&mut samples, 0.01, 42 + id.index() as u32);

        feed(&mut modem, &samples);
        let rx = modem.take_rx_data().unwrap_or_else(|| panic!("{id:?}: no payload"));
        assert_eq!(rx.payload, b"speed", "{id:?}: payload mismatch");
    }
}

#[test]
fn test_i16_pcm_end_to_end() {
    let params = Parameters {
        sample_format_inp: SampleFormat::I16,
        sample_format_out: SampleFormat::I16,
        ..Parameters::default()
    };
    let mut modem = Modem::new(params).unwrap();
    modem.init_tx(b"sixteen bits", ProtocolId::AudibleFast, 25).unwrap();

    let mut bytes = Vec::new();
    modem.encode(|chunk| bytes.extend_from_slice(chunk)).unwrap();
    assert_eq!(bytes.len() % 2, 0);

    feed_bytes(&mut modem, &bytes);
    assert_eq!(modem.take_rx_data().unwrap().payload, b"sixteen bits");
}

#[test]
fn test_u8_pcm_end_to_end() {
    let params = Parameters {
        sample_format_inp: SampleFormat::U8,
        sample_format_out: SampleFormat::U8,
        ..Parameters::default()
    };
    let mut modem = Modem::new(params).unwrap();
    modem.init_tx(b"eight", ProtocolId::AudibleFast, 50).unwrap();

    let mut bytes = Vec::new();
    modem.encode(|chunk| bytes.extend_from_slice(chunk)).unwrap();

    feed_bytes(&mut modem, &bytes);
    assert_eq!(modem.take_rx_data().unwrap().payload, b"eight");
}
