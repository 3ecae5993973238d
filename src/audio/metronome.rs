use super::transport::{Transport, TransportState};
use super::{BEATS_PER_BAR, MAX_TEMPO_BPM, MIN_TEMPO_BPM};

/// Length of the click burst in samples.
pub const CLICK_LENGTH: usize = 200;

/// Click sample at `phase` samples after a beat boundary.
#[inline]
pub fn click_sample(phase: usize) -> i16 {
    if phase >= CLICK_LENGTH {
        return 0;
    }
    let t = phase as f32 / CLICK_LENGTH as f32;
    let envelope = 1.0 - t;
    let click = (phase as f32 * 0.15).sin() * envelope * 0.3;
    (click * 32767.0) as i16
}

#[derive(Debug, Clone)]
pub struct Metronome {
    pub bpm: f64,
    pub sample_rate: u32,
    pub samples_per_beat: usize,
    pub samples_per_measure: usize,
    pub enabled: bool,
    pub countin_enabled: bool,
}

impl Metronome {
    pub fn new(sample_rate: u32, bpm: f64) -> Self {
        let mut metronome = Self {
            bpm,
            sample_rate,
            samples_per_beat: 0,
            samples_per_measure: 0,
            enabled: false,
            countin_enabled: false,
        };
        metronome.set_bpm(bpm);
        metronome
    }

    fn calculate_samples_per_beat(sample_rate: u32, bpm: f64) -> usize {
        (((sample_rate as f64 * 60.0) / bpm).round() as usize).max(1)
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM);
        self.samples_per_beat = Self::calculate_samples_per_beat(self.sample_rate, self.bpm);
        self.samples_per_measure = self.samples_per_beat * BEATS_PER_BAR;
    }

    /// 1-based beat within the bar at `playhead`.
    pub fn beat_in_bar(&self, playhead: usize) -> usize {
        (playhead / self.samples_per_beat) % BEATS_PER_BAR + 1
    }

    pub fn bar(&self, playhead: usize) -> usize {
        playhead / self.samples_per_measure
    }

    /// Write this block's clicks into `click` (interleaved stereo).
    ///
    /// `block_start` is the playhead before the block advanced it. A count-in
    /// that reaches its total completes here and switches the transport to
    /// Recording; the rest of that block stays silent.
    pub fn render(
        &self,
        transport: &mut Transport,
        click: &mut [i16],
        frames: usize,
        block_start: usize,
    ) {
        let spb = self.samples_per_beat;
        match transport.state() {
            TransportState::Stopped => {}
            TransportState::Playing | TransportState::Recording => {
                if !self.enabled {
                    return;
                }
                for n in 0..frames {
                    let phase = (block_start + n) % spb;
                    if phase < CLICK_LENGTH {
                        Self::add_click(click, n, phase);
                    }
                }
            }
            TransportState::CountIn(_) => {
                for n in 0..frames {
                    let Some(count_in) = transport.count_in_mut() else {
                        break;
                    };
                    if count_in.counter >= 0 {
                        let phase = count_in.counter as usize % spb;
                        if phase < CLICK_LENGTH {
                            Self::add_click(click, n, phase);
                        }
                    }
                    count_in.counter += 1;
                    if count_in.counter >= count_in.total {
                        transport.complete_count_in(spb);
                        break;
                    }
                }
            }
        }
    }

    #[inline]
    fn add_click(click: &mut [i16], frame: usize, phase: usize) {
        let sample = click_sample(phase);
        click[frame * 2] = click[frame * 2].saturating_add(sample);
        click[frame * 2 + 1] = click[frame * 2 + 1].saturating_add(sample);
    }
}
