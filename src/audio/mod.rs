pub mod catalog;
pub mod chain;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod handle;
pub mod io;
pub mod metronome;
pub mod midi;
pub mod mixer;
pub mod snapshot;
pub mod stream;
pub mod tone;
pub mod track;
pub mod transport;

pub use catalog::{DirPatchCatalog, PatchCatalog, PatchInfo, StaticCatalog};
pub use chain::{ChainFactory, ChainProcessor, Retired, TrackContext};
pub use config::EngineConfig;
pub use control::{ControlCommand, TrackTarget};
pub use engine::FourTrackEngine;
pub use error::{ChainError, ConfigError, EngineError};
pub use handle::EngineHandle;
pub use io::{bounce_wav, export_track_wav, import_track_wav};
pub use midi::{MidiEvent, MidiSource, RoutingMode};
pub use snapshot::{EngineSnapshot, TrackSnapshot};
pub use stream::AudioStream;
pub use tone::{ToneChain, ToneChainFactory};
pub use transport::{TransportCommand, TransportState};

pub const NUM_TRACKS: usize = 4;
pub const NUM_CHANNELS: usize = 2;
/// Largest block the renderer processes in one pass.
pub const MAX_BLOCK_FRAMES: usize = 128;
pub const BEATS_PER_BAR: usize = 4;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const MIN_RECORD_SECONDS: u32 = 10;
pub const DEFAULT_RECORD_SECONDS: u32 = 120;
pub const MAX_RECORD_SECONDS: u32 = 300;

pub const MIN_TEMPO_BPM: f64 = 20.0;
pub const MAX_TEMPO_BPM: f64 = 300.0;
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Everything the control side can hand to the audio thread.
pub enum EngineMessage {
    Control(ControlCommand),
    /// Swap a track's chain and patch label; `None` clears them.
    InstallChain {
        track: usize,
        chain: Option<Box<dyn ChainProcessor>>,
        patch: Option<PatchInfo>,
    },
    Midi(MidiEvent),
}
