//! Pipeline assembly
//!
//! Wires clock, sink and decoder to a scheduler according to the output
//! backend:
//! - `cpal`: the device is both clock and sink; decoder converts to its format
//! - `null`: wall clock, headless sink, decoder keeps native format

use crate::audio::decode::SymphoniaDecoder;
use crate::audio::output::CpalOutput;
use crate::audio::types::OutputFormat;
use crate::error::Result;
use crate::playback::clock::{PlaybackClock, SystemClock};
use crate::playback::scheduler::{Scheduler, SchedulerConfig};
use crate::playback::sink::{AudioSink, NullSink};
use serde::Serialize;
use std::sync::Arc;
use tonebridge_common::config::{OutputBackend, OutputSettings, SchedulerSettings};
use tonebridge_common::events::EventBus;
use tracing::info;

/// Description of the opened output
#[derive(Debug, Clone, Serialize)]
pub struct OutputInfo {
    pub backend: OutputBackend,
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// A running scheduler with its event bus
pub struct Pipeline {
    pub scheduler: Arc<Scheduler>,
    pub events: Arc<EventBus>,
    pub output: OutputInfo,
}

impl Pipeline {
    /// Open the configured output and bind a scheduler to it
    pub fn build(scheduler: &SchedulerSettings, output: &OutputSettings) -> Result<Self> {
        let events = Arc::new(EventBus::new(scheduler.event_capacity));

        let (clock, sink, decoder, info): (
            Arc<dyn PlaybackClock>,
            Arc<dyn AudioSink>,
            SymphoniaDecoder,
            OutputInfo,
        ) = match output.backend {
            OutputBackend::Cpal => {
                let device = Arc::new(CpalOutput::open(output)?);
                let format: OutputFormat = device.format();
                let info = OutputInfo {
                    backend: OutputBackend::Cpal,
                    device: Some(device.device_name().to_string()),
                    sample_rate: Some(format.sample_rate),
                    channels: Some(format.channels),
                };
                (
                    Arc::clone(&device) as Arc<dyn PlaybackClock>,
                    device as Arc<dyn AudioSink>,
                    SymphoniaDecoder::with_output(format),
                    info,
                )
            }
            OutputBackend::Null => (
                Arc::new(SystemClock::new()) as Arc<dyn PlaybackClock>,
                Arc::new(NullSink::new()) as Arc<dyn AudioSink>,
                SymphoniaDecoder::new(),
                OutputInfo {
                    backend: OutputBackend::Null,
                    device: None,
                    sample_rate: None,
                    channels: None,
                },
            ),
        };

        let scheduler = Scheduler::new(
            SchedulerConfig::from(scheduler),
            clock,
            sink,
            Arc::new(decoder),
            Arc::clone(&events),
        )?;

        info!("Pipeline ready on {:?} output", info.backend);
        Ok(Self {
            scheduler: Arc::new(scheduler),
            events,
            output: info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonebridge_common::events::StreamState;

    #[test]
    fn test_null_pipeline() {
        let output = OutputSettings {
            backend: OutputBackend::Null,
            ..OutputSettings::default()
        };
        let pipeline = Pipeline::build(&SchedulerSettings::default(), &output).unwrap();

        assert_eq!(pipeline.scheduler.state(), StreamState::Idle);
        assert_eq!(pipeline.output.backend, OutputBackend::Null);
        assert_eq!(pipeline.events.capacity(), 256);
    }
}
