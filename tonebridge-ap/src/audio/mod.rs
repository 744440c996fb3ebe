//! Audio decoding and output
//!
//! - `decode`: encoded chunk -> interleaved f32 buffer (symphonia)
//! - `resampler`: sample rate conversion (rubato)
//! - `output`: device sink and hardware clock (cpal)

pub mod decode;
pub mod output;
pub mod resampler;
pub mod types;

pub use decode::{decode_file, ChunkDecoder, SymphoniaDecoder};
pub use output::CpalOutput;
pub use resampler::Resampler;
pub use types::{DecodedBuffer, EncodedChunk, OutputFormat, Timestamp};
