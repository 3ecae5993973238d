use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::NUM_CHANNELS;
use super::engine::FourTrackEngine;

/// Frames rendered per engine call inside the device callback.
const SCRATCH_FRAMES: usize = 1024;

/// The default output device, opened at its native rate and format.
pub struct AudioStream {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    device_name: String,
}

impl AudioStream {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;
        let default = device.default_output_config()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        log::info!(
            "Output device: {} ({}Hz, {}ch, {:?})",
            device_name,
            default.sample_rate().0,
            default.channels(),
            default.sample_format()
        );

        let config = StreamConfig {
            channels: default.channels(),
            sample_rate: default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            config,
            sample_format: default.sample_format(),
            device_name,
        })
    }

    /// Rate the engine must be built with.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Move `engine` into the output callback and start playing.
    pub fn start(&self, engine: FourTrackEngine) -> Result<Stream> {
        if engine.sample_rate() != self.sample_rate() {
            log::warn!(
                "Engine runs at {}Hz but the device at {}Hz",
                engine.sample_rate(),
                self.sample_rate()
            );
        }

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build::<f32>(engine)?,
            SampleFormat::I16 => self.build::<i16>(engine)?,
            SampleFormat::U16 => self.build::<u16>(engine)?,
            SampleFormat::I32 => self.build::<i32>(engine)?,
            SampleFormat::F64 => self.build::<f64>(engine)?,
            other => return Err(anyhow!("Unsupported sample format {:?}", other)),
        };
        stream.play()?;
        log::info!("Audio stream started on {}", self.device_name);
        Ok(stream)
    }

    fn build<T>(&self, mut engine: FourTrackEngine) -> Result<Stream>
    where
        T: SizedSample + FromSample<i16>,
    {
        let channels = self.config.channels.max(1) as usize;
        // Preallocated so the callback never allocates
        let mut scratch = vec![0i16; SCRATCH_FRAMES * NUM_CHANNELS];

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(SCRATCH_FRAMES * channels) {
                    let frames = chunk.len() / channels;
                    let block = &mut scratch[..frames * NUM_CHANNELS];
                    engine.process(block);

                    for (frame, stereo) in chunk
                        .chunks_exact_mut(channels)
                        .zip(block.chunks_exact(NUM_CHANNELS))
                    {
                        if channels == 1 {
                            let mono = (stereo[0] as i32 + stereo[1] as i32) / 2;
                            frame[0] = <T as Sample>::from_sample(mono as i16);
                            continue;
                        }
                        for (channel, sample) in frame.iter_mut().enumerate() {
                            let value = stereo.get(channel).copied().unwrap_or(0);
                            *sample = <T as Sample>::from_sample(value);
                        }
                    }
                }
            },
            |err| log::error!("Output stream error: {}", err),
            None,
        )?;
        Ok(stream)
    }
}
