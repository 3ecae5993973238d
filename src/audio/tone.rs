// src/audio/tone.rs
// Built-in chain processor: a small polyphonic decaying-oscillator synth

use serde::Deserialize;
use std::f32::consts::TAU;

use super::catalog::PatchInfo;
use super::chain::{ChainFactory, ChainProcessor, TrackContext};
use super::error::ChainError;
use super::midi::MidiSource;

const MAX_VOICES: usize = 16; // fixed pool, nothing allocates on note-on
const MAX_KNOBS: usize = 8;
const KNOB_CC_START: u8 = 71;
const KNOB_CC_END: u8 = 78;
const KNOB_STEP_FLOAT: f32 = 0.05;
const KNOB_STEP_INT: f32 = 1.0;
const RELEASE_DECAY: f32 = 0.995;
const SILENCE: f32 = 0.0005;

pub const MODULE_NAME: &str = "tone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Saw,
    Triangle,
}

impl Waveform {
    fn from_preset(preset: u32) -> Self {
        match preset % 4 {
            0 => Waveform::Sine,
            1 => Waveform::Square,
            2 => Waveform::Saw,
            _ => Waveform::Triangle,
        }
    }

    #[inline]
    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => phase.sin(),
            Waveform::Square => {
                if phase < std::f32::consts::PI {
                    0.6
                } else {
                    -0.6
                }
            }
            Waveform::Saw => (phase / TAU) * 1.2 - 0.6,
            Waveform::Triangle => {
                let t = phase / TAU;
                (if t < 0.5 { 4.0 * t - 1.0 } else { 3.0 - 4.0 * t }) * 0.8
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Voice {
    note: u8,
    phase: f32,
    phase_inc: f32,
    amp: f32,
    held: bool,
    alive: bool,
}

impl Voice {
    const EMPTY: Voice = Voice {
        note: 0,
        phase: 0.0,
        phase_inc: 0.0,
        amp: 0.0,
        held: false,
        alive: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToneParam {
    Decay,
    Gain,
    Preset,
}

impl ToneParam {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "decay" => Some(ToneParam::Decay),
            "gain" => Some(ToneParam::Gain),
            "preset" => Some(ToneParam::Preset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct KnobMapping {
    cc: u8,
    param: ToneParam,
    name: String,
    is_int: bool,
    min: f32,
    max: f32,
    value: f32,
}

impl KnobMapping {
    /// Relative encoder: 1..63 steps up, 65..127 steps down.
    fn turn(&mut self, data: u8) -> f32 {
        let step = if self.is_int {
            KNOB_STEP_INT
        } else {
            KNOB_STEP_FLOAT
        };
        let delta = if data < 64 {
            step * data as f32
        } else {
            -step * (128 - data as i32) as f32
        };
        let mut value = (self.value + delta).clamp(self.min, self.max);
        if self.is_int {
            value = value.trunc();
        }
        self.value = value;
        value
    }
}

// --- patch file -----------------------------------------------------------

#[derive(Deserialize)]
struct PatchFile {
    #[serde(default)]
    synth: Option<SynthSection>,
    #[serde(default)]
    knob_mappings: Vec<KnobSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SynthSection {
    Module(String),
    Section {
        module: Option<String>,
        #[serde(default)]
        preset: u32,
        decay: Option<f32>,
        gain: Option<f32>,
    },
}

#[derive(Deserialize)]
struct KnobSpec {
    cc: u8,
    param: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    min: Option<f32>,
    #[serde(default)]
    max: Option<f32>,
    #[serde(default)]
    value: Option<f32>,
}

/// Everything a patch file sets, validated before it replaces live state.
struct ToneSettings {
    preset: u32,
    decay: f32,
    gain: f32,
    knobs: Vec<KnobMapping>,
}

impl ToneSettings {
    fn parse(text: &str, patch_name: &str) -> Result<Self, ChainError> {
        let file: PatchFile = serde_json::from_str(text)?;
        let (module, preset, decay, gain) = match file.synth {
            None => (None, 0, None, None),
            Some(SynthSection::Module(module)) => (Some(module), 0, None, None),
            Some(SynthSection::Section {
                module,
                preset,
                decay,
                gain,
            }) => (module, preset, decay, gain),
        };
        let module = module.unwrap_or_else(|| MODULE_NAME.to_string());
        if module != MODULE_NAME {
            return Err(ChainError::UnsupportedModule(module));
        }

        let knobs = file
            .knob_mappings
            .into_iter()
            .filter(|k| (KNOB_CC_START..=KNOB_CC_END).contains(&k.cc))
            .filter(|k| k.target.as_deref().is_none_or(|t| t == "synth"))
            .filter_map(|k| {
                let param = ToneParam::parse(&k.param)?;
                let min = k.min.unwrap_or(0.0);
                let max = k.max.unwrap_or(1.0);
                Some(KnobMapping {
                    cc: k.cc,
                    param,
                    name: k.name.unwrap_or_else(|| k.param.clone()),
                    is_int: k.kind.as_deref() == Some("int"),
                    min,
                    max,
                    value: k.value.unwrap_or((min + max) / 2.0),
                })
            })
            .take(MAX_KNOBS)
            .collect::<Vec<_>>();

        let settings = Self {
            preset,
            decay: decay.unwrap_or(DEFAULT_DECAY),
            gain: gain.unwrap_or(DEFAULT_GAIN),
            knobs,
        };
        log::debug!(
            "Patch '{}': preset {}, {} knob mappings",
            patch_name,
            settings.preset,
            settings.knobs.len()
        );
        Ok(settings)
    }
}

const DEFAULT_DECAY: f32 = 0.9999;
const DEFAULT_GAIN: f32 = 0.25;

// --- chain ----------------------------------------------------------------

pub struct ToneChain {
    sample_rate: f32,
    voices: [Voice; MAX_VOICES],
    waveform: Waveform,
    preset: u32,
    decay: f32,
    gain: f32,
    knobs: Vec<KnobMapping>,
    loaded: Option<usize>,
}

impl ToneChain {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            voices: [Voice::EMPTY; MAX_VOICES],
            waveform: Waveform::default(),
            preset: 0,
            decay: DEFAULT_DECAY,
            gain: DEFAULT_GAIN,
            knobs: Vec::new(),
            loaded: None,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.alive).count()
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        let freq = 440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0);
        let phase_inc = TAU * freq / self.sample_rate;

        // Reuse a free slot, else steal the quietest voice
        let slot = self
            .voices
            .iter()
            .position(|v| !v.alive)
            .unwrap_or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.amp.total_cmp(&b.1.amp))
                    .map_or(0, |(i, _)| i)
            });

        self.voices[slot] = Voice {
            note,
            phase: 0.0,
            phase_inc,
            amp: velocity as f32 / 127.0,
            held: true,
            alive: true,
        };
    }

    fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut() {
            if voice.alive && voice.note == note {
                voice.held = false;
            }
        }
    }

    fn release_all(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.held = false;
        }
    }

    fn apply_param(&mut self, param: ToneParam, value: f32) {
        match param {
            ToneParam::Decay => self.decay = value.clamp(0.9, 1.0),
            ToneParam::Gain => self.gain = value.clamp(0.0, 1.0),
            ToneParam::Preset => {
                self.preset = value.max(0.0) as u32;
                self.waveform = Waveform::from_preset(self.preset);
            }
        }
    }

    fn param_value(&self, param: ToneParam) -> String {
        match param {
            ToneParam::Decay => format!("{:.4}", self.decay),
            ToneParam::Gain => format!("{:.2}", self.gain),
            ToneParam::Preset => self.preset.to_string(),
        }
    }

    fn knob_query(&self, rest: &str) -> Option<String> {
        let (number, field) = rest.split_once('_')?;
        let number: u8 = number.parse().ok()?;
        let cc = (KNOB_CC_START - 1).checked_add(number)?;
        let knob = self.knobs.iter().find(|k| k.cc == cc)?;
        let answer = match field {
            "name" => knob.name.clone(),
            "value" if knob.is_int => format!("{}", knob.value as i32),
            "value" => format!("{:.2}", knob.value),
            "min" => format!("{:.2}", knob.min),
            "max" => format!("{:.2}", knob.max),
            "type" => if knob.is_int { "int" } else { "float" }.to_string(),
            "percent" => {
                let range = knob.max - knob.min;
                let pct = if range > 0.0 {
                    (knob.value - knob.min) / range * 100.0
                } else {
                    0.0
                };
                format!("{}", pct as i32)
            }
            _ => return None,
        };
        Some(answer)
    }
}

impl ChainProcessor for ToneChain {
    fn render(&mut self, out: &mut [i16], frames: usize) {
        if self.loaded.is_none() {
            return;
        }
        for frame in out.chunks_exact_mut(2).take(frames) {
            let mut sum = 0.0f32;
            for v in self.voices.iter_mut() {
                if !v.alive {
                    continue;
                }
                sum += v.amp * self.waveform.sample(v.phase);
                v.phase += v.phase_inc;
                if v.phase >= TAU {
                    v.phase -= TAU;
                }
                v.amp *= if v.held { self.decay } else { RELEASE_DECAY };
                if v.amp < SILENCE {
                    v.alive = false;
                }
            }
            let sample = ((sum * self.gain).clamp(-1.0, 1.0) * 32767.0) as i16;
            frame[0] = sample;
            frame[1] = sample;
        }
    }

    fn on_midi(&mut self, msg: &[u8], _source: MidiSource) {
        let Some(&status) = msg.first() else {
            return;
        };
        let data1 = msg.get(1).copied().unwrap_or(0);
        let data2 = msg.get(2).copied().unwrap_or(0);
        match status & 0xF0 {
            0x90 if data2 > 0 => self.note_on(data1, data2),
            0x80 | 0x90 => self.note_off(data1),
            0xB0 => match data1 {
                120 => self.voices = [Voice::EMPTY; MAX_VOICES],
                123 => self.release_all(),
                KNOB_CC_START..=KNOB_CC_END => {
                    if let Some(i) = self.knobs.iter().position(|k| k.cc == data1) {
                        let param = self.knobs[i].param;
                        let value = self.knobs[i].turn(data2);
                        self.apply_param(param, value);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    // Runs on the audio thread; unknown keys and bad values are dropped quietly
    fn set_param(&mut self, key: &str, value: &str) {
        if let Some(param) = ToneParam::parse(key)
            && let Ok(v) = value.trim().parse::<f32>()
            && v.is_finite()
        {
            self.apply_param(param, v);
        }
    }

    fn get_param(&self, key: &str) -> Option<String> {
        if let Some(param) = ToneParam::parse(key) {
            return Some(self.param_value(param));
        }
        match key {
            "module" => Some(MODULE_NAME.to_string()),
            "voices" => Some(self.active_voices().to_string()),
            "knob_mapping_count" => Some(self.knobs.len().to_string()),
            _ => self.knob_query(key.strip_prefix("knob_")?),
        }
    }

    fn load_patch(&mut self, index: usize, patch: &PatchInfo) -> Result<(), ChainError> {
        let text = std::fs::read_to_string(&patch.path)?;
        let settings = ToneSettings::parse(&text, &patch.name)?;

        self.release_all();
        self.preset = settings.preset;
        self.waveform = Waveform::from_preset(settings.preset);
        self.decay = settings.decay.clamp(0.9, 1.0);
        self.gain = settings.gain.clamp(0.0, 1.0);
        self.knobs = settings.knobs;
        for i in 0..self.knobs.len() {
            let (param, value) = (self.knobs[i].param, self.knobs[i].value);
            self.apply_param(param, value);
        }
        self.loaded = Some(index);
        Ok(())
    }

    fn is_patch_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn detach(&mut self) {
        self.voices = [Voice::EMPTY; MAX_VOICES];
        self.loaded = None;
    }
}

/// Attaches a `ToneChain` to any track.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToneChainFactory;

impl ChainFactory for ToneChainFactory {
    fn attach(&mut self, context: &TrackContext) -> Result<Box<dyn ChainProcessor>, ChainError> {
        log::debug!("Attaching tone chain to track {}", context.track + 1);
        Ok(Box::new(ToneChain::new(context.sample_rate)))
    }
}
