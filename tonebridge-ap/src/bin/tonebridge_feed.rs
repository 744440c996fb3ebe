//! Chunk producer for tonebridge-ap
//!
//! Cuts audio into self-contained WAV chunks and POSTs them to a running
//! player at real-time pace.
//!
//! **Usage:**
//! ```bash
//! tonebridge-feed --start tone --frequency 660
//! tonebridge-feed --url http://host:5750 file track.flac
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tonebridge_ap::audio::{decode_file, DecodedBuffer};
use tonebridge_common::tone::{
    encode_wav_f32, ToneGenerator, DEFAULT_AMPLITUDE, DEFAULT_FREQUENCY_HZ, DEFAULT_SAMPLE_RATE,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stream audio chunks to tonebridge-ap
#[derive(Parser, Debug)]
#[command(name = "tonebridge-feed")]
#[command(about = "Send a tone or an audio file to tonebridge-ap as WAV chunks")]
#[command(version)]
struct Args {
    /// Player base URL
    #[arg(long, default_value = "http://127.0.0.1:5750", env = "TONEBRIDGE_URL")]
    url: String,

    /// Chunk length in milliseconds
    #[arg(long, default_value_t = 500)]
    chunk_ms: u64,

    /// How far ahead of real time to send, in milliseconds
    #[arg(long, default_value_t = 1000)]
    lead_ms: u64,

    /// Stop after this many chunks (tone mode runs forever otherwise)
    #[arg(long)]
    count: Option<u64>,

    /// POST /stream/start before sending
    #[arg(long)]
    start: bool,

    #[command(subcommand)]
    source: SourceArgs,
}

#[derive(Subcommand, Debug)]
enum SourceArgs {
    /// Phase-continuous sine tone
    Tone {
        /// Frequency in Hz (clamped to 100-1000)
        #[arg(long, default_value_t = DEFAULT_FREQUENCY_HZ)]
        frequency: f64,

        /// Amplitude 0.0-1.0
        #[arg(long, default_value_t = DEFAULT_AMPLITUDE)]
        amplitude: f64,

        /// Sample rate in Hz
        #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
        sample_rate: u32,
    },
    /// Local audio file (any format the player decodes)
    File { path: PathBuf },
}

/// Player's reply to a chunk POST
#[derive(Debug, Deserialize)]
struct EnqueueReply {
    sequence: u64,
    dropped_sequence: Option<u64>,
}

/// One encoded chunk and the audio time it covers
struct Chunk {
    wav: Vec<u8>,
    duration: Duration,
}

/// Where chunks come from
enum ChunkSource {
    Tone(ToneGenerator),
    File { buffer: DecodedBuffer, position: usize },
}

impl ChunkSource {
    /// Next WAV chunk, or None when the source is exhausted
    fn next_chunk(&mut self, duration: Duration) -> Result<Option<Chunk>> {
        match self {
            ChunkSource::Tone(generator) => {
                let rate = generator.sample_rate();
                let frames = (duration.as_secs_f64() * rate as f64).round() as usize;
                let wav = generator.next_chunk(duration)?;
                Ok(Some(Chunk {
                    wav,
                    duration: frames_to_duration(frames, rate),
                }))
            }
            ChunkSource::File { buffer, position } => {
                let Some((samples, next)) = slice_frames(buffer, *position, duration) else {
                    return Ok(None);
                };
                let frames = next - *position;
                *position = next;
                Ok(Some(Chunk {
                    wav: encode_wav_f32(samples, buffer.sample_rate, buffer.channels)?,
                    duration: frames_to_duration(frames, buffer.sample_rate),
                }))
            }
        }
    }
}

fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64)
}

/// Samples of the `duration` window starting at frame `position`, and the
/// frame after it; None once past the end
fn slice_frames(
    buffer: &DecodedBuffer,
    position: usize,
    duration: Duration,
) -> Option<(&[f32], usize)> {
    if position >= buffer.frames {
        return None;
    }
    let frames = ((duration.as_secs_f64() * buffer.sample_rate as f64).round() as usize).max(1);
    let end = (position + frames).min(buffer.frames);
    let channels = buffer.channels as usize;
    Some((&buffer.samples[position * channels..end * channels], end))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tonebridge_feed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let base = args.url.trim_end_matches('/').to_string();
    let chunk_duration = Duration::from_millis(args.chunk_ms);
    let lead = Duration::from_millis(args.lead_ms);

    let mut source = match &args.source {
        SourceArgs::Tone {
            frequency,
            amplitude,
            sample_rate,
        } => {
            let generator = ToneGenerator::new(*frequency, *amplitude, *sample_rate)?;
            info!(
                "Tone {:.1}Hz at {}Hz, {}ms chunks",
                generator.frequency(),
                sample_rate,
                args.chunk_ms
            );
            ChunkSource::Tone(generator)
        }
        SourceArgs::File { path } => {
            let buffer = decode_file(path)
                .with_context(|| format!("Failed to decode {}", path.display()))?;
            info!(
                "File {} ({:.1}s), {}ms chunks",
                path.display(),
                buffer.duration_seconds(),
                args.chunk_ms
            );
            ChunkSource::File {
                buffer,
                position: 0,
            }
        }
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    if args.start {
        let response = client
            .post(format!("{}/stream/start", base))
            .send()
            .await
            .context("Failed to reach player")?;
        if !response.status().is_success() {
            bail!("Player refused start: {}", response.status());
        }
        info!("Stream started");
    }

    let started = Instant::now();
    let mut sent = Duration::ZERO;
    let mut count = 0u64;

    while args.count.map_or(true, |limit| count < limit) {
        // Stay at most `lead` ahead of real time
        let ahead = sent.saturating_sub(started.elapsed());
        if ahead > lead {
            tokio::time::sleep(ahead - lead).await;
        }

        let Some(chunk) = source.next_chunk(chunk_duration)? else {
            info!("Source exhausted");
            break;
        };

        let response = client
            .post(format!("{}/stream/chunks", base))
            .header(CONTENT_TYPE, "audio/wav")
            .body(chunk.wav)
            .send()
            .await
            .context("Failed to send chunk")?;

        match response.status() {
            StatusCode::CONFLICT => bail!("Player stream is stopped"),
            status if !status.is_success() => bail!("Player rejected chunk: {}", status),
            _ => {}
        }

        let reply: EnqueueReply = response.json().await.context("Malformed player reply")?;
        match reply.dropped_sequence {
            Some(dropped) => warn!(
                "Chunk {} queued; player dropped chunk {} (backlog full)",
                reply.sequence, dropped
            ),
            None => debug!("Chunk {} queued", reply.sequence),
        }

        sent += chunk.duration;
        count += 1;
    }

    info!("Sent {} chunks ({:.1}s of audio)", count, sent.as_secs_f64());
    Ok(())
}
