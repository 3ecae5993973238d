// src/audio/handle.rs
// Control-side handle for an engine that lives on the audio thread

use std::time::Duration;

use crossbeam::channel::{Receiver, SendTimeoutError, Sender, bounded};
use rtrb::{Consumer, RingBuffer};

use super::catalog::{PatchCatalog, PatchInfo, find_patch};
use super::chain::{ChainFactory, Retired, TrackContext, prepare_chain};
use super::config::EngineConfig;
use super::control::ControlCommand;
use super::engine::FourTrackEngine;
use super::error::EngineError;
use super::midi::{MidiEvent, MidiSource};
use super::snapshot::{EngineSnapshot, query_patch_key};
use super::transport::TransportCommand;
use super::{EngineMessage, MAX_BLOCK_FRAMES, NUM_TRACKS};

const COMMAND_QUEUE_SIZE: usize = 256;
const SNAPSHOT_QUEUE_SIZE: usize = 8;
const RETIRE_QUEUE_SIZE: usize = 64;
/// How long a control message waits for room before it is dropped. The
/// callback drains the queue every block, so this only expires when the
/// stream has stopped.
const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Talks to a `FourTrackEngine` running in an audio callback.
///
/// Patch loading happens here: chains are attached and loaded on the calling
/// thread, then handed over ready to play. Everything else is forwarded as a
/// message and applied at the start of the next audio block.
pub struct EngineHandle {
    sender: Sender<EngineMessage>,
    snapshots: Receiver<EngineSnapshot>,
    retired: Consumer<Retired>,
    factory: Option<Box<dyn ChainFactory>>,
    catalog: Option<Box<dyn PatchCatalog>>,
    patches: Vec<PatchInfo>,
    installed: [Option<PatchInfo>; NUM_TRACKS],
    selected: usize,
    sample_rate: u32,
    last_error: Option<String>,
    snapshot: EngineSnapshot,
}

impl EngineHandle {
    /// Build an engine wired to a new handle. Move the engine into the audio
    /// callback and keep the handle on the control thread.
    pub fn new(
        config: &EngineConfig,
        factory: Option<Box<dyn ChainFactory>>,
        catalog: Option<Box<dyn PatchCatalog>>,
    ) -> (Self, FourTrackEngine) {
        let (sender, receiver) = bounded(COMMAND_QUEUE_SIZE);
        let (snapshot_sender, snapshots) = bounded(SNAPSHOT_QUEUE_SIZE);
        let (producer, retired) = RingBuffer::new(RETIRE_QUEUE_SIZE);

        let mut engine = FourTrackEngine::new(config);
        engine.set_command_channel(receiver);
        engine.set_snapshot_sender(snapshot_sender);
        engine.set_retire_queue(producer);

        let mut handle = Self {
            sender,
            snapshots,
            retired,
            factory,
            catalog,
            patches: Vec::new(),
            installed: Default::default(),
            selected: engine.selected_track(),
            sample_rate: engine.sample_rate(),
            last_error: None,
            snapshot: engine.snapshot(),
        };
        handle.rescan_patches();
        (handle, engine)
    }

    /// String control call, same keys as `FourTrackEngine::set_param`.
    pub fn set_param(&mut self, key: &str, value: &str) {
        match ControlCommand::parse(key, value) {
            Some(command) => self.apply(command),
            None => log::debug!("Ignoring control {}={:?}", key, value),
        }
    }

    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::LoadPatch(index) => {
                if let Err(e) = self.load_patch(index) {
                    self.record_error(e);
                }
            }
            ControlCommand::LoadPatchName(name) => {
                let result = find_patch(&self.patches, &name)
                    .ok_or(EngineError::UnknownPatch(name))
                    .and_then(|index| self.load_patch(index));
                if let Err(e) = result {
                    self.record_error(e);
                }
            }
            ControlCommand::RescanPatches => self.rescan_patches(),
            ControlCommand::ClearPatch(target) => {
                let track = target.resolve(self.selected);
                if track < NUM_TRACKS {
                    self.installed[track] = None;
                    self.send(EngineMessage::InstallChain {
                        track,
                        chain: None,
                        patch: None,
                    });
                }
            }
            ControlCommand::ClearError => self.last_error = None,
            command => {
                if let ControlCommand::SelectTrack(track) = command {
                    self.selected = track;
                }
                if command == ControlCommand::Transport(TransportCommand::Record)
                    && self.snapshot.rejects_record()
                {
                    log::info!("No track armed for recording");
                }
                log::debug!("Control {:?}", command);
                self.send(EngineMessage::Control(command));
            }
        }
    }

    /// Queue a MIDI message for the routing policy. Returns false if it was
    /// dropped (too long or the queue is full).
    pub fn send_midi(&mut self, msg: &[u8], source: MidiSource) -> bool {
        match MidiEvent::new(msg, source) {
            Some(event) => self.sender.try_send(EngineMessage::Midi(event)).is_ok(),
            None => false,
        }
    }

    /// Pick up the latest published state and drop whatever the audio
    /// thread handed back.
    pub fn poll(&mut self) {
        while let Ok(snapshot) = self.snapshots.try_recv() {
            self.snapshot = snapshot;
        }
        while let Ok(item) = self.retired.pop() {
            item.dispose();
        }
    }

    pub fn snapshot(&self) -> &EngineSnapshot {
        &self.snapshot
    }

    pub fn patches(&self) -> &[PatchInfo] {
        &self.patches
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// String query against the latest snapshot. `chain:` keys need direct
    /// access to the chain and are not answered here.
    pub fn get_param(&self, key: &str) -> Option<String> {
        if key.starts_with("chain:") {
            return None;
        }
        let track_patches = std::array::from_fn(|i| self.installed[i].as_ref());
        query_patch_key(key, &self.patches, track_patches, self.last_error())
            .or_else(|| self.snapshot.query(key))
    }

    fn rescan_patches(&mut self) {
        if let Some(catalog) = self.catalog.as_mut() {
            self.patches = catalog.scan();
            log::info!("Found {} patches", self.patches.len());
        }
    }

    fn load_patch(&mut self, index: usize) -> Result<(), EngineError> {
        let patch = self
            .patches
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidPatch(index))?;
        let track = self.selected;
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

        log::info!("Track {}: loaded patch '{}'", track + 1, patch.name);
        self.installed[track] = Some(patch.clone());
        self.send(EngineMessage::InstallChain {
            track,
            chain: Some(chain),
            patch: Some(patch),
        });
        Ok(())
    }

    /// Control messages wait for room; only MIDI is dropped on a full queue.
    fn send(&mut self, message: EngineMessage) {
        if let Err(SendTimeoutError::Timeout(message) | SendTimeoutError::Disconnected(message)) =
            self.sender.send_timeout(message, SEND_TIMEOUT)
        {
            log::warn!("Command queue unavailable, dropping message");
            if let EngineMessage::InstallChain {
                chain: Some(chain), ..
            } = message
            {
                Retired::Chain(chain).dispose();
            }
        }
    }

    fn record_error(&mut self, error: EngineError) {
        log::warn!("{}", error);
        self.last_error = Some(error.to_string());
    }
}
