use crossbeam::channel::{Receiver, Sender};
use rtrb::{Producer, PushError};

use super::catalog::{PatchCatalog, PatchInfo, find_patch};
use super::chain::{
    ChainFactory, ChainProcessor, Retired, TrackContext, all_notes_off, prepare_chain,
};
use super::config::EngineConfig;
use super::control::ControlCommand;
use super::error::EngineError;
use super::metronome::Metronome;
use super::midi::{MidiSource, RoutingMode, route};
use super::mixer::{clear_simd, is_audible, saturate_simd};
use super::snapshot::{EngineSnapshot, TrackSnapshot, query_patch_key};
use super::track::Track;
use super::transport::{Transport, TransportCommand, TransportState};
use super::{EngineMessage, MAX_BLOCK_FRAMES, MIN_RECORD_SECONDS, NUM_CHANNELS, NUM_TRACKS};

/// The four-track recorder. Owns every piece of real-time state; all entry
/// points take `&mut self`, so render and control calls never interleave.
pub struct FourTrackEngine {
    sample_rate: u32,
    record_seconds: u32,
    max_record_seconds: u32,
    tracks: [Track; NUM_TRACKS],
    transport: Transport,
    metronome: Metronome,
    routing: RoutingMode,
    selected: usize,
    mix: [i32; MAX_BLOCK_FRAMES * NUM_CHANNELS],
    click: [i16; MAX_BLOCK_FRAMES * NUM_CHANNELS],
    factory: Option<Box<dyn ChainFactory>>,
    catalog: Option<Box<dyn PatchCatalog>>,
    patches: Vec<PatchInfo>,
    last_error: Option<String>,
    command_receiver: Option<Receiver<EngineMessage>>,
    snapshot_sender: Option<Sender<EngineSnapshot>>,
    retire_queue: Option<Producer<Retired>>,
}

impl FourTrackEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let config = config.clone().sanitized();
        let buffer_samples = config.buffer_samples();
        let capacity = Self::capacity_samples(config.sample_rate, config.record_seconds);

        let mut metronome = Metronome::new(config.sample_rate, config.tempo_bpm);
        metronome.enabled = false;
        metronome.countin_enabled = false;

        Self {
            sample_rate: config.sample_rate,
            record_seconds: config.record_seconds,
            max_record_seconds: config.max_record_seconds,
            tracks: std::array::from_fn(|_| Track::new(buffer_samples, capacity)),
            transport: Transport::new(),
            metronome,
            routing: RoutingMode::default(),
            selected: 0,
            mix: [0; MAX_BLOCK_FRAMES * NUM_CHANNELS],
            click: [0; MAX_BLOCK_FRAMES * NUM_CHANNELS],
            factory: None,
            catalog: None,
            patches: Vec::new(),
            last_error: None,
            command_receiver: None,
            snapshot_sender: None,
            retire_queue: None,
        }
    }

    pub fn with_chain_factory(mut self, factory: Box<dyn ChainFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Install a catalog and scan it right away.
    pub fn with_catalog(mut self, catalog: Box<dyn PatchCatalog>) -> Self {
        self.catalog = Some(catalog);
        self.rescan_patches();
        self
    }

    pub fn set_command_channel(&mut self, receiver: Receiver<EngineMessage>) {
        self.command_receiver = Some(receiver);
    }

    pub fn set_snapshot_sender(&mut self, sender: Sender<EngineSnapshot>) {
        self.snapshot_sender = Some(sender);
    }

    pub fn set_retire_queue(&mut self, producer: Producer<Retired>) {
        self.retire_queue = Some(producer);
    }

    fn capacity_samples(sample_rate: u32, seconds: u32) -> usize {
        seconds as usize * sample_rate as usize * NUM_CHANNELS
    }

    // ---------------------------------------------------------------------
    // Audio thread
    // ---------------------------------------------------------------------

    /// Audio callback body: apply queued messages, render, publish state.
    pub fn process(&mut self, out: &mut [i16]) {
        self.process_messages();
        self.render_block(out, out.len() / NUM_CHANNELS);
        if let Some(sender) = &self.snapshot_sender {
            // A full channel means the UI is behind; it will catch up next block
            let _ = sender.try_send(self.snapshot());
        }
    }

    fn process_messages(&mut self) {
        let Some(receiver) = self.command_receiver.take() else {
            return;
        };
        while let Ok(message) = receiver.try_recv() {
            self.handle_message(message);
        }
        self.command_receiver = Some(receiver);
    }

    pub fn handle_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Control(command) => self.apply(command),
            EngineMessage::InstallChain {
                track,
                chain,
                patch,
            } => self.install_chain(track, chain, patch),
            EngineMessage::Midi(event) => self.on_midi(event.bytes(), event.source),
        }
    }

    /// Render `frames` stereo frames into `out`. Longer requests are split
    /// into chunks of at most `MAX_BLOCK_FRAMES`.
    pub fn render_block(&mut self, out: &mut [i16], frames: usize) {
        let frames = frames.min(out.len() / NUM_CHANNELS);
        let out = &mut out[..frames * NUM_CHANNELS];
        for chunk in out.chunks_mut(MAX_BLOCK_FRAMES * NUM_CHANNELS) {
            let chunk_frames = chunk.len() / NUM_CHANNELS;
            self.render_chunk(chunk, chunk_frames);
        }
    }

    fn render_chunk(&mut self, out: &mut [i16], frames: usize) {
        let len = frames * NUM_CHANNELS;
        let recording = self.transport.is_recording();
        let rolling = self.transport.is_rolling();
        let block_start = self.transport.playhead();
        let wrap_to = self.transport.wrap_target();
        let any_solo = self.tracks.iter().any(|t| t.solo);

        clear_simd(&mut self.mix[..len]);
        let mix = &mut self.mix[..len];

        for track in self.tracks.iter_mut() {
            track.render_live(frames);

            // Capture ignores mute and solo
            let capturing = recording && track.armed;
            if capturing {
                track.capture(block_start, frames);
            }

            if !is_audible(track.muted, track.solo, any_solo) {
                continue;
            }
            if rolling && !capturing {
                track.mix_playback(mix, block_start, frames, wrap_to);
            }
            if track.monitoring && track.has_loaded_chain() {
                track.mix_live(mix, frames);
            }
        }

        self.transport.advance(frames);

        let click = &mut self.click[..len];
        click.fill(0);
        self.metronome.render(&mut self.transport, click, frames, block_start);

        saturate_simd(&self.mix[..len], &self.click[..len], out);
    }

    /// Deliver a MIDI message to the track the routing policy picks.
    pub fn on_midi(&mut self, msg: &[u8], source: MidiSource) {
        if let Some(target) = route(self.routing, self.selected, source, msg)
            && let Some(track) = self.tracks.get_mut(target)
        {
            track.on_midi(msg, source);
        }
    }

    fn retire(&mut self, item: Retired) {
        match self.retire_queue.as_mut() {
            Some(queue) => {
                if let Err(PushError::Full(item)) = queue.push(item) {
                    item.dispose();
                }
            }
            None => item.dispose(),
        }
    }

    // ---------------------------------------------------------------------
    // Control surface
    // ---------------------------------------------------------------------

    /// String control call. Anything unparseable is ignored.
    ///
    /// Nothing under `apply` logs, since the threaded host runs it inside the
    /// audio callback; errors surface through `last_error` instead.
    pub fn set_param(&mut self, key: &str, value: &str) {
        match ControlCommand::parse(key, value) {
            Some(command) => {
                if command == ControlCommand::Transport(TransportCommand::Record)
                    && self.snapshot().rejects_record()
                {
                    log::info!("No track armed for recording");
                }
                self.apply(command)
            }
            None => log::debug!("Ignoring control {}={:?}", key, value),
        }
    }

    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SelectTrack(track) => {
                if track < NUM_TRACKS {
                    self.selected = track;
                }
            }
            ControlCommand::ToggleArm(target) => {
                if let Some(track) = self.tracks.get_mut(target.resolve(self.selected)) {
                    track.armed = !track.armed;
                }
            }
            ControlCommand::ToggleMonitoring(target) => {
                if let Some(track) = self.tracks.get_mut(target.resolve(self.selected)) {
                    track.monitoring = !track.monitoring;
                }
            }
            ControlCommand::SetLevel { track, level } => {
                if let Some(track) = self.tracks.get_mut(track) {
                    track.level = level;
                }
            }
            ControlCommand::SetPan { track, pan } => {
                if let Some(track) = self.tracks.get_mut(track) {
                    track.pan = pan;
                }
            }
            ControlCommand::ToggleMute(track) => {
                if let Some(track) = self.tracks.get_mut(track) {
                    track.muted = !track.muted;
                }
            }
            ControlCommand::ToggleSolo(track) => {
                if let Some(track) = self.tracks.get_mut(track) {
                    track.solo = !track.solo;
                }
            }
            ControlCommand::ClearTrack(index) => {
                if let Some(track) = self.tracks.get_mut(index) {
                    track.clear();
                }
            }
            ControlCommand::Transport(command) => self.transport_command(command),
            ControlCommand::GotoStart => self.transport.goto_start(),
            ControlCommand::GotoEnd => {
                let length = self.tracks[self.selected].length();
                if length > 0 {
                    self.transport.set_playhead(length / NUM_CHANNELS);
                }
            }
            ControlCommand::JumpBars(bars) => self
                .transport
                .jump_bars(bars, self.metronome.samples_per_beat),
            ControlCommand::SetTempo(bpm) => self.metronome.set_bpm(bpm),
            ControlCommand::SetMetronome(enabled) => self.metronome.enabled = enabled,
            ControlCommand::SetCountIn(enabled) => self.metronome.countin_enabled = enabled,
            ControlCommand::SetRouting(mode) => self.routing = mode,
            ControlCommand::SetLoopEnabled(enabled) => self.transport.set_loop_enabled(enabled),
            ControlCommand::SetLoopStart(frame) => self.transport.set_loop_start(frame),
            ControlCommand::SetLoopEnd(frame) => self.transport.set_loop_end(frame),
            ControlCommand::SetRecordSeconds(seconds) => self.set_record_seconds(seconds),
            ControlCommand::LoadPatch(index) => {
                if let Err(e) = self.load_patch(index) {
                    self.record_error(e);
                }
            }
            ControlCommand::LoadPatchName(name) => {
                if let Err(e) = self.load_patch_by_name(&name) {
                    self.record_error(e);
                }
            }
            ControlCommand::RescanPatches => self.rescan_patches(),
            ControlCommand::ClearPatch(target) => self.clear_patch(target.resolve(self.selected)),
            ControlCommand::ChainParam { key, value } => {
                if let Some(chain) = self.tracks[self.selected].chain_mut() {
                    chain.set_param(&key, &value);
                }
                self.retire(Retired::Param(key, value));
            }
            ControlCommand::AllNotesOff => {
                for track in self.tracks.iter_mut() {
                    if let Some(chain) = track.chain_mut() {
                        all_notes_off(chain);
                    }
                }
            }
            ControlCommand::ClearError => self.last_error = None,
        }
    }

    fn transport_command(&mut self, command: TransportCommand) {
        let any_armed = self.tracks.iter().any(|t| t.armed);
        // A rejected record leaves the state unchanged, which the next snapshot shows
        self.transport.apply(
            command,
            any_armed,
            self.metronome.countin_enabled,
            self.metronome.samples_per_beat,
        );
    }

    fn set_record_seconds(&mut self, seconds: u32) {
        let seconds = seconds.clamp(MIN_RECORD_SECONDS, self.max_record_seconds);
        self.record_seconds = seconds;
        let capacity = Self::capacity_samples(self.sample_rate, seconds);
        for track in self.tracks.iter_mut() {
            track.set_capacity(capacity);
        }
    }

    fn record_error(&mut self, error: EngineError) {
        self.last_error = Some(error.to_string());
    }

    // ---------------------------------------------------------------------
    // Patches and chains
    // ---------------------------------------------------------------------

    pub fn rescan_patches(&mut self) {
        if let Some(catalog) = self.catalog.as_mut() {
            self.patches = catalog.scan();
        }
    }

    pub fn patches(&self) -> &[PatchInfo] {
        &self.patches
    }

    /// Load catalog entry `index` on the selected track. A chain is attached
    /// on first use; an existing chain keeps its old patch if loading fails.
    pub fn load_patch(&mut self, index: usize) -> Result<(), EngineError> {
        let patch = self
            .patches
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidPatch(index))?;
        let track = self.selected;

        if let Some(chain) = self.tracks[track].chain_mut() {
            all_notes_off(chain);
            chain.load_patch(index, &patch)?;
        } else {
            let factory = self
                .factory
                .as_deref_mut()
                .ok_or(EngineError::NoChainFactory)?;
            let context = TrackContext {
                track,
                sample_rate: self.sample_rate,
                max_block_frames: MAX_BLOCK_FRAMES,
            };
            let chain = prepare_chain(factory, &context, index, &patch)?;
            self.tracks[track].replace_chain(Some(chain));
        }

        if let Some(old) = self.tracks[track].set_patch(Some(patch)) {
            self.retire(Retired::Patch(old));
        }
        Ok(())
    }

    pub fn load_patch_by_name(&mut self, name: &str) -> Result<(), EngineError> {
        let index = find_patch(&self.patches, name)
            .ok_or_else(|| EngineError::UnknownPatch(name.to_string()))?;
        self.load_patch(index)
    }

    /// Swap a track's chain and patch label. Displaced objects are retired.
    pub fn install_chain(
        &mut self,
        track: usize,
        chain: Option<Box<dyn ChainProcessor>>,
        patch: Option<PatchInfo>,
    ) {
        let Some(target) = self.tracks.get_mut(track) else {
            if let Some(chain) = chain {
                self.retire(Retired::Chain(chain));
            }
            return;
        };
        let old_chain = target.replace_chain(chain);
        let old_patch = target.set_patch(patch);
        if let Some(old) = old_chain {
            self.retire(Retired::Chain(old));
        }
        if let Some(old) = old_patch {
            self.retire(Retired::Patch(old));
        }
    }

    /// Detach a track's chain and forget its patch.
    pub fn clear_patch(&mut self, track: usize) {
        if track < NUM_TRACKS {
            self.install_chain(track, None, None);
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn playhead(&self) -> usize {
        self.transport.playhead()
    }

    pub fn selected_track(&self) -> usize {
        self.selected
    }

    pub fn samples_per_beat(&self) -> usize {
        self.metronome.samples_per_beat
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Replace a track's take with `samples` (interleaved stereo).
    pub fn load_track_samples(&mut self, index: usize, samples: &[i16]) -> Result<(), EngineError> {
        let track = self
            .tracks
            .get_mut(index)
            .ok_or(EngineError::InvalidTrack(index))?;
        track.load_samples(samples);
        Ok(())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let playhead = self.transport.playhead();
        let (loop_start, loop_end) = self.transport.loop_region();
        EngineSnapshot {
            sample_rate: self.sample_rate,
            transport: self.transport.state(),
            playhead,
            countin_beats: self
                .transport
                .countin_beats(self.metronome.samples_per_beat),
            beat: self.metronome.beat_in_bar(playhead),
            bar: self.metronome.bar(playhead),
            tempo_bpm: self.metronome.bpm,
            metronome: self.metronome.enabled,
            countin: self.metronome.countin_enabled,
            loop_enabled: self.transport.loop_enabled(),
            loop_start,
            loop_end,
            routing: self.routing,
            selected_track: self.selected,
            record_seconds: self.record_seconds,
            max_record_seconds: self.max_record_seconds,
            tracks: std::array::from_fn(|i| {
                let track = &self.tracks[i];
                TrackSnapshot {
                    level: track.level,
                    pan: track.pan,
                    muted: track.muted,
                    solo: track.solo,
                    armed: track.armed,
                    monitoring: track.monitoring,
                    length: track.length(),
                    capacity: track.capacity(),
                    has_chain: track.chain().is_some(),
                    chain_loaded: track.has_loaded_chain(),
                }
            }),
        }
    }

    /// String query. Unknown keys give `None`.
    pub fn get_param(&self, key: &str) -> Option<String> {
        if let Some(chain_key) = key.strip_prefix("chain:") {
            return self.tracks[self.selected].chain()?.get_param(chain_key);
        }
        let track_patches = std::array::from_fn(|i| self.tracks[i].patch());
        query_patch_key(key, &self.patches, track_patches, self.last_error())
            .or_else(|| self.snapshot().query(key))
    }
}

impl Drop for FourTrackEngine {
    fn drop(&mut self) {
        for track in self.tracks.iter_mut() {
            if let Some(chain) = track.replace_chain(None) {
                Retired::Chain(chain).dispose();
            }
        }
    }
}
