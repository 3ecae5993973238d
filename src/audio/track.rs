// src/audio/track.rs
// One recorder track: fixed stereo buffer, mix controls and its chain

use super::catalog::PatchInfo;
use super::chain::{ChainProcessor, all_notes_off};
use super::midi::MidiSource;
use super::mixer::{add_scaled_simd, pan_gains, scale_frame};
use super::{MAX_BLOCK_FRAMES, NUM_CHANNELS};

pub const DEFAULT_LEVEL: f32 = 0.8;

/// Samples covered by one entry of the written-page map.
const PAGE_SAMPLES: usize = 1024;

pub struct Track {
    buffer: Box<[i16]>,
    /// One flag per page of `buffer`. An unset page reads as silence no
    /// matter what it holds; a set page is zero past `length`.
    written: Box<[bool]>,
    /// Samples written (frames * 2)
    length: usize,
    /// Effective limit in samples, never above `buffer.len()`
    capacity: usize,
    pub level: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub armed: bool,
    pub monitoring: bool,
    chain: Option<Box<dyn ChainProcessor>>,
    patch: Option<PatchInfo>,
    live: [i16; MAX_BLOCK_FRAMES * NUM_CHANNELS],
}

impl Track {
    /// `buffer_samples` is allocated up front; `capacity` may be lowered later.
    pub fn new(buffer_samples: usize, capacity: usize) -> Self {
        Self {
            buffer: vec![0i16; buffer_samples].into_boxed_slice(),
            written: vec![false; buffer_samples.div_ceil(PAGE_SAMPLES)].into_boxed_slice(),
            length: 0,
            capacity: capacity.min(buffer_samples),
            level: DEFAULT_LEVEL,
            pan: 0.0,
            muted: false,
            solo: false,
            armed: false,
            monitoring: true,
            chain: None,
            patch: None,
            live: [0; MAX_BLOCK_FRAMES * NUM_CHANNELS],
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Copy of the take, interleaved stereo. Unwritten stretches are silence.
    pub fn take_samples(&self) -> Vec<i16> {
        let mut take = Vec::with_capacity(self.length);
        for (page, chunk) in self.buffer[..self.length].chunks(PAGE_SAMPLES).enumerate() {
            if self.written[page] {
                take.extend_from_slice(chunk);
            } else {
                take.resize(take.len() + chunk.len(), 0);
            }
        }
        take
    }

    /// Change the effective limit. Truncates a take that no longer fits.
    pub fn set_capacity(&mut self, samples: usize) {
        self.capacity = (samples - samples % NUM_CHANNELS).min(self.buffer.len());
        if self.length > self.capacity {
            self.truncate(self.capacity);
        }
    }

    /// Forget the take. Only the page map is reset; the audio is left behind.
    pub fn clear(&mut self) {
        self.length = 0;
        self.written.fill(false);
    }

    /// Replace the take with `samples` (interleaved stereo), cut to capacity.
    pub fn load_samples(&mut self, samples: &[i16]) {
        let len = samples.len().min(self.capacity);
        let len = len - len % NUM_CHANNELS;
        self.clear();
        let pages = len.div_ceil(PAGE_SAMPLES);
        let tail_end = (pages * PAGE_SAMPLES).min(self.buffer.len());
        self.buffer[..len].copy_from_slice(&samples[..len]);
        self.buffer[len..tail_end].fill(0);
        self.written[..pages].fill(true);
        self.length = len;
    }

    fn truncate(&mut self, len: usize) {
        let page = len / PAGE_SAMPLES;
        if page < self.written.len() && self.written[page] {
            let page_end = ((page + 1) * PAGE_SAMPLES).min(self.buffer.len());
            self.buffer[len..page_end].fill(0);
        }
        let first_clear = len.div_ceil(PAGE_SAMPLES);
        self.written[first_clear..].fill(false);
        self.length = len;
    }

    #[inline]
    fn read_frame(&self, pos: usize) -> (i16, i16) {
        if self.written[pos / PAGE_SAMPLES] {
            (self.buffer[pos], self.buffer[pos + 1])
        } else {
            (0, 0)
        }
    }

    /// Render this block's live audio from the chain, or silence.
    pub fn render_live(&mut self, frames: usize) {
        let live = &mut self.live[..frames * NUM_CHANNELS];
        live.fill(0);
        if let Some(chain) = self.chain.as_mut() {
            chain.render(live, frames);
        }
    }

    pub fn live(&self, frames: usize) -> &[i16] {
        &self.live[..frames * NUM_CHANNELS]
    }

    /// Copy the live block into the buffer at `playhead`. Stops at capacity.
    /// Any gap between the old end of the take and `playhead` reads as
    /// silence through the page map, so the cost is bounded by `frames`.
    pub fn capture(&mut self, playhead: usize, frames: usize) {
        let start = playhead.saturating_mul(NUM_CHANNELS);

        if start < self.capacity {
            let end = start
                .saturating_add(frames * NUM_CHANNELS)
                .min(self.capacity);
            for page in start / PAGE_SAMPLES..end.div_ceil(PAGE_SAMPLES) {
                if !self.written[page] {
                    let page_start = page * PAGE_SAMPLES;
                    let page_end = (page_start + PAGE_SAMPLES).min(self.buffer.len());
                    self.buffer[page_start..page_end].fill(0);
                    self.written[page] = true;
                }
            }
            let count = end - start;
            self.buffer[start..end].copy_from_slice(&self.live[..count]);
        }

        let written = playhead
            .saturating_add(frames)
            .saturating_mul(NUM_CHANNELS)
            .min(self.capacity);
        self.length = self.length.max(written);
    }

    /// Accumulate recorded audio from `playhead` into `mix`. On reaching the
    /// end of the take, reading resumes at `wrap_to` or goes silent.
    pub fn mix_playback(
        &self,
        mix: &mut [i32],
        playhead: usize,
        frames: usize,
        wrap_to: Option<usize>,
    ) {
        if self.length == 0 {
            return;
        }
        let gains = pan_gains(self.pan);
        let mut read_pos = playhead.saturating_mul(NUM_CHANNELS);

        for i in 0..frames {
            if read_pos >= self.length {
                match wrap_to {
                    Some(frame) => read_pos = frame.saturating_mul(NUM_CHANNELS),
                    None => break,
                }
                if read_pos >= self.length {
                    break;
                }
            }

            let (left, right) = self.read_frame(read_pos);
            let (l, r) = scale_frame(left, right, self.level, gains);
            mix[i * 2] = mix[i * 2].saturating_add(l);
            mix[i * 2 + 1] = mix[i * 2 + 1].saturating_add(r);
            read_pos += NUM_CHANNELS;
        }
    }

    /// Accumulate this block's live audio into `mix`.
    pub fn mix_live(&self, mix: &mut [i32], frames: usize) {
        let len = frames * NUM_CHANNELS;
        add_scaled_simd(&mut mix[..len], &self.live[..len], self.level, self.pan);
    }

    pub fn chain(&self) -> Option<&dyn ChainProcessor> {
        self.chain.as_deref()
    }

    pub fn chain_mut(&mut self) -> Option<&mut (dyn ChainProcessor + 'static)> {
        self.chain.as_deref_mut()
    }

    pub fn has_loaded_chain(&self) -> bool {
        self.chain.as_ref().is_some_and(|c| c.is_patch_loaded())
    }

    pub fn patch(&self) -> Option<&PatchInfo> {
        self.patch.as_ref()
    }

    pub fn set_patch(&mut self, patch: Option<PatchInfo>) -> Option<PatchInfo> {
        std::mem::replace(&mut self.patch, patch)
    }

    /// Install `chain`, silencing and returning the one it replaces.
    pub fn replace_chain(
        &mut self,
        chain: Option<Box<dyn ChainProcessor>>,
    ) -> Option<Box<dyn ChainProcessor>> {
        let mut old = std::mem::replace(&mut self.chain, chain);
        if let Some(old) = old.as_mut() {
            all_notes_off(old.as_mut());
        }
        old
    }

    pub fn on_midi(&mut self, msg: &[u8], source: MidiSource) {
        if let Some(chain) = self.chain.as_mut() {
            chain.on_midi(msg, source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::chain::test_support::ConstChain;
    use super::*;
    use std::sync::Arc;

    fn track_with_chain(value: i16, capacity: usize) -> Track {
        let mut track = Track::new(capacity, capacity);
        track.replace_chain(Some(Box::new(ConstChain::new(value, value))));
        track
    }

    #[test]
    fn test_defaults() {
        let track = Track::new(100, 100);
        assert_eq!(track.level, 0.8);
        assert_eq!(track.pan, 0.0);
        assert!(track.monitoring);
        assert!(!track.armed && !track.muted && !track.solo);
        assert!(track.is_empty());
    }

    #[test]
    fn test_live_is_silent_without_chain() {
        let mut track = Track::new(100, 100);
        track.render_live(16);
        assert!(track.live(16).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_capture_extends_length() {
        let mut track = track_with_chain(1000, 1000);
        track.render_live(64);
        track.capture(10, 64);
        assert_eq!(track.length(), (10 + 64) * 2);
        assert_eq!(track.take_samples()[20], 1000);
        // lead gap is silence
        assert!(track.take_samples()[..20].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_capture_plateaus_at_capacity() {
        let mut track = track_with_chain(5, 200);
        track.render_live(128);
        track.capture(0, 128);
        assert_eq!(track.length(), 200);
        track.capture(90, 128);
        assert_eq!(track.length(), 200);
        track.capture(500, 128);
        assert_eq!(track.length(), 200);
        assert_eq!(track.take_samples()[199], 5);
    }

    #[test]
    fn test_clear_then_record_later_zeroes_stale_audio() {
        let mut track = track_with_chain(7, 1000);
        track.render_live(100);
        track.capture(0, 100);
        track.clear();
        assert_eq!(track.length(), 0);

        track.capture(200, 10);
        assert_eq!(track.length(), 420);
        assert!(track.take_samples()[..400].iter().all(|&s| s == 0));
        assert_eq!(track.take_samples()[400], 7);
    }

    #[test]
    fn test_capture_far_past_end_touches_only_its_pages() {
        let mut track = track_with_chain(7, 100_000);
        for frame in (0..50_000).step_by(128) {
            track.render_live(128);
            track.capture(frame, 128);
        }
        assert_eq!(track.length(), 100_000);
        track.clear();

        track.render_live(128);
        track.capture(40_000, 128);
        assert_eq!(track.length(), 80_256);
        assert!(track.written.iter().filter(|&&w| w).count() <= 2);

        let take = track.take_samples();
        assert!(take[..80_000].iter().all(|&s| s == 0));
        assert!(take[80_000..].iter().all(|&s| s == 7));

        // playback over the gap hears nothing of the cleared take
        track.level = 1.0;
        let mut mix = vec![0i32; 256];
        track.mix_playback(&mut mix, 1000, 128, None);
        assert!(mix.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_truncated_tail_stays_silent() {
        let mut track = track_with_chain(9, 10_000);
        for frame in (0..5_000).step_by(128) {
            track.render_live(128);
            track.capture(frame, 128);
        }
        track.set_capacity(1_500);
        track.set_capacity(10_000);
        assert_eq!(track.length(), 1_500);

        track.render_live(16);
        track.capture(4_000, 16);
        let take = track.take_samples();
        assert!(take[..1_500].iter().all(|&s| s == 9));
        assert!(take[1_500..8_000].iter().all(|&s| s == 0));
        assert_eq!(take[8_000], 9);
    }

    #[test]
    fn test_playback_saturates_bus() {
        let mut track = Track::new(8, 8);
        track.load_samples(&[i16::MAX; 8]);
        track.level = 100_000.0;

        let mut mix = [i32::MAX - 5; 8];
        track.mix_playback(&mut mix, 0, 4, None);
        assert!(mix.iter().all(|&s| s == i32::MAX));
    }

    #[test]
    fn test_lowering_capacity_truncates() {
        let mut track = track_with_chain(1, 1000);
        track.render_live(128);
        track.capture(0, 128);
        track.set_capacity(100);
        assert_eq!(track.length(), 100);
        track.set_capacity(5000);
        assert_eq!(track.capacity(), 1000);
    }

    #[test]
    fn test_playback_applies_level_and_pan() {
        let mut track = Track::new(8, 8);
        track.load_samples(&[1000, 1000, 1000, 1000]);
        track.level = 0.5;
        track.pan = 1.0;

        let mut mix = [0i32; 8];
        track.mix_playback(&mut mix, 0, 4, None);
        assert_eq!(mix, [0, 500, 0, 500, 0, 0, 0, 0]);
    }

    #[test]
    fn test_playback_wraps_mid_block() {
        let mut track = Track::new(4000, 4000);
        let take: Vec<i16> = (0..2000).flat_map(|f| [f as i16, f as i16]).collect();
        track.load_samples(&take);
        track.level = 1.0;

        let mut mix = vec![0i32; 400];
        track.mix_playback(&mut mix, 1900, 200, Some(0));
        assert_eq!(mix[0], 1900);
        assert_eq!(mix[99 * 2], 1999);
        assert_eq!(mix[100 * 2], 0);
        assert_eq!(mix[199 * 2 + 1], 99);

        let mut mix = vec![0i32; 400];
        track.mix_playback(&mut mix, 1900, 200, None);
        assert!(mix[200..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_replace_chain_sends_notes_off() {
        let mut track = Track::new(10, 10);
        let chain = ConstChain::new(0, 0);
        let log = Arc::clone(&chain.log);
        track.replace_chain(Some(Box::new(chain)));

        let old = track.replace_chain(None);
        assert!(old.is_some());
        assert_eq!(log.lock().unwrap().midi.len(), 16);
        assert!(!track.has_loaded_chain());
    }
}
