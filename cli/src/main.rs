use clap::{Parser, Subcommand};
use hound::WavSpec;
use std::fs::File;
use std::path::PathBuf;
use tonecast_core::{Modem, Parameters, ProtocolId, SampleFormat};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "tonecast")]
#[command(about = "Transmit short payloads as audible or ultrasonic waveforms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a payload to a WAV audio file
    Encode {
        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Payload text (or use --input for binary data)
        #[arg(value_name = "TEXT", required_unless_present = "input", conflicts_with = "input")]
        text: Option<String>,

        /// Input binary file instead of payload text
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Protocol: audible-normal, audible-fast, audible-fastest,
        /// ultrasound-normal, ultrasound-fast, ultrasound-fastest,
        /// dt-normal, dt-fast, dt-fastest
        #[arg(short, long, default_value = "audible-fast")]
        protocol: String,

        /// Output volume, 0..=100 (values above 50 risk clipping)
        #[arg(short, long, default_value = "25")]
        volume: u8,
    },

    /// Decode a WAV audio file back to its payload
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Write the payload to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List the builtin protocols
    Protocols,
}

fn parse_protocol(name: &str) -> Option<ProtocolId> {
    match name {
        "audible-normal" => Some(ProtocolId::AudibleNormal),
        "audible-fast" => Some(ProtocolId::AudibleFast),
        "audible-fastest" => Some(ProtocolId::AudibleFastest),
        "ultrasound-normal" => Some(ProtocolId::UltrasoundNormal),
        "ultrasound-fast" => Some(ProtocolId::UltrasoundFast),
        "ultrasound-fastest" => Some(ProtocolId::UltrasoundFastest),
        "dt-normal" => Some(ProtocolId::DtNormal),
        "dt-fast" => Some(ProtocolId::DtFast),
        "dt-fastest" => Some(ProtocolId::DtFastest),
        _ => None,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(env_filter).with_target(false).compact().init();

    match Cli::parse().command {
        Commands::Encode { output, text, input, protocol, volume } => {
            let payload = match (input, text) {
                (Some(path), _) => std::fs::read(&path)?,
                (None, Some(text)) => text.into_bytes(),
                (None, None) => unreachable!("clap enforces one of text/input"),
            };
            let protocol = parse_protocol(&protocol)
                .ok_or_else(|| format!("unknown protocol '{protocol}'"))?;
            encode_command(&payload, &output, protocol, volume)
        }
        Commands::Decode { input, output } => decode_command(&input, output.as_deref()),
        Commands::Protocols => {
            protocols_command();
            Ok(())
        }
    }
}

fn encode_command(
    payload: &[u8],
    output_path: &PathBuf,
    protocol: ProtocolId,
    volume: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut modem = Modem::new(Parameters::default())?;
    modem.init_tx(payload, protocol, volume)?;

    let mut samples: Vec<f32> = Vec::with_capacity(modem.encode_size_samples());
    modem.encode(|chunk| {
        samples.extend(
            chunk
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
    })?;
    println!("Encoded {} bytes to {} audio samples", payload.len(), samples.len());

    let spec = WavSpec {
        channels: 1,
        sample_rate: modem.sample_rate() as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let file = File::create(output_path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for sample in samples {
        let clamped = sample.max(-1.0).min(1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;

    println!("Wrote {}", output_path.display());
    Ok(())
}

fn decode_command(
    input_path: &PathBuf,
    output_path: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(input_path)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    println!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let mut samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (hound::SampleFormat::Float, 32) => {
            reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?
        }
        _ => {
            return Err(format!(
                "unsupported WAV format: {} bits {:?}",
                spec.bits_per_sample, spec.sample_format
            )
            .into());
        }
    };

    if spec.channels == 2 {
        samples = samples.chunks_exact(2).map(|c| (c[0] + c[1]) / 2.0).collect();
    } else if spec.channels != 1 {
        return Err(format!("unsupported channel count {}", spec.channels).into());
    }

    // The modem resamples internally when the capture rate differs.
    let params = Parameters {
        sample_rate_inp: spec.sample_rate as f32,
        sample_format_inp: SampleFormat::F32,
        ..Parameters::default()
    };
    let mut modem = Modem::new(params)?;

    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let mut pos = 0;
    modem.decode(|dst| {
        let n = (bytes.len() - pos).min(dst.len());
        dst[..n].copy_from_slice(&bytes[pos..pos + n]);
        pos += n;
        n
    })?;

    match modem.take_rx_data() {
        Some(rx) => {
            println!(
                "Decoded {} bytes via {:?} ({} corrected)",
                rx.payload.len(),
                rx.protocol,
                rx.corrected
            );
            match output_path {
                Some(path) => {
                    std::fs::write(path, &rx.payload)?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&rx.payload)),
            }
            Ok(())
        }
        None => Err("no payload found in the audio".into()),
    }
}

fn protocols_command() {
    println!("{:<22} {:>10} {:>13} {:>12}", "protocol", "freq bin", "frames/symbol", "bytes/symbol");
    for id in ProtocolId::BUILTIN {
        let p = tonecast_core::protocol::builtin(id).expect("builtin protocol");
        println!(
            "{:<22} {:>10} {:>13} {:>12}",
            p.name, p.freq_start, p.frames_per_tx, p.bytes_per_tx
        );
    }
}
