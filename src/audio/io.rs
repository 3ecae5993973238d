use anyhow::{Result, anyhow};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;

use super::control::ControlCommand;
use super::engine::FourTrackEngine;
use super::transport::TransportCommand;
use super::{MAX_BLOCK_FRAMES, NUM_CHANNELS};

/// Read a WAV file as interleaved stereo i16 at `target_sample_rate`.
/// Mono is duplicated to both sides; extra channels are dropped.
pub fn import_wav<P: AsRef<Path>>(path: P, target_sample_rate: u32) -> Result<Vec<i16>> {
    let mut reader = WavReader::open(&path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    // Read samples as f32 in interleaved order
    let raw_samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            // Convert integer samples to float in [-1.0, 1.0]
            let max_value = 2_i64.pow((spec.bits_per_sample - 1) as u32) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_value)
                .collect()
        }
    };

    // Split into left/right planes
    let frames = raw_samples.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in raw_samples.chunks_exact(channels) {
        left.push(frame[0]);
        right.push(if channels > 1 { frame[1] } else { frame[0] });
    }

    let planes = if spec.sample_rate == target_sample_rate {
        vec![left, right]
    } else {
        resample_audio(vec![left, right], spec.sample_rate, target_sample_rate)?
    };

    let out_frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut interleaved = Vec::with_capacity(out_frames * NUM_CHANNELS);
    for i in 0..out_frames {
        interleaved.push(to_i16(planes[0][i]));
        interleaved.push(to_i16(planes[1][i]));
    }
    Ok(interleaved)
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Write interleaved stereo i16 samples as a 16-bit WAV file.
pub fn export_wav<P: AsRef<Path>>(path: P, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: NUM_CHANNELS as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(&path, spec)?;

    for &sample in samples {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Replace a track's take with a WAV file. Returns the frames loaded.
pub fn import_track_wav<P: AsRef<Path>>(
    engine: &mut FourTrackEngine,
    track: usize,
    path: P,
) -> Result<usize> {
    let samples = import_wav(&path, engine.sample_rate())?;
    engine.load_track_samples(track, &samples)?;
    let frames = engine
        .track(track)
        .map_or(0, |t| t.length() / NUM_CHANNELS);
    log::info!(
        "Imported {} into track {} ({} frames)",
        path.as_ref().display(),
        track + 1,
        frames
    );
    Ok(frames)
}

/// Write one track's raw take (no level or pan) to a WAV file.
pub fn export_track_wav<P: AsRef<Path>>(
    engine: &FourTrackEngine,
    track: usize,
    path: P,
) -> Result<()> {
    let take = engine
        .track(track)
        .ok_or_else(|| anyhow!("Track {} out of range", track))?;
    if take.is_empty() {
        return Err(anyhow!("Track {} is empty", track + 1));
    }
    export_wav(path, &take.take_samples(), engine.sample_rate())
}

/// Render the whole session from the start through the mixer and write it
/// to a WAV file. Returns the frames written.
pub fn bounce_wav<P: AsRef<Path>>(engine: &mut FourTrackEngine, path: P) -> Result<usize> {
    let total_frames = (0..super::NUM_TRACKS)
        .filter_map(|i| engine.track(i))
        .map(|t| t.length() / NUM_CHANNELS)
        .max()
        .unwrap_or(0);
    if total_frames == 0 {
        return Err(anyhow!("All tracks are empty"));
    }

    let spec = WavSpec {
        channels: NUM_CHANNELS as u16,
        sample_rate: engine.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec)?;

    engine.apply(ControlCommand::GotoStart);
    engine.apply(ControlCommand::Transport(TransportCommand::Play));

    let mut block = [0i16; MAX_BLOCK_FRAMES * NUM_CHANNELS];
    let mut remaining = total_frames;
    while remaining > 0 {
        let frames = remaining.min(MAX_BLOCK_FRAMES);
        let out = &mut block[..frames * NUM_CHANNELS];
        engine.render_block(out, frames);
        for &sample in out.iter() {
            writer.write_sample(sample)?;
        }
        remaining -= frames;
    }

    engine.apply(ControlCommand::Transport(TransportCommand::Stop));
    writer.finalize()?;
    log::info!("Bounced {} frames to {}", total_frames, path.as_ref().display());
    Ok(total_frames)
}

fn resample_audio(
    planes: Vec<Vec<f32>>,
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<Vec<f32>>> {
    let frames = planes.first().map_or(0, Vec::len);
    if input_rate == output_rate || frames == 0 {
        return Ok(planes);
    }

    // Create resampler
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        2.0, // Max ratio
        params,
        frames,
        planes.len(),
    )?;

    Ok(resampler.process(&planes, None)?)
}
