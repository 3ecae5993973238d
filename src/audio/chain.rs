// src/audio/chain.rs
// Per-track sound source capability and the factory that attaches it

use super::catalog::PatchInfo;
use super::error::ChainError;
use super::midi::MidiSource;

/// What a chain gets to know about the track it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackContext {
    pub track: usize,
    pub sample_rate: u32,
    pub max_block_frames: usize,
}

/// A pluggable per-track audio source or effect chain.
///
/// `render` and `on_midi` are called from the audio thread and must not block
/// or allocate. Everything else is only called from control calls.
pub trait ChainProcessor: Send {
    /// Fill `out` (interleaved stereo, `frames * 2` samples) with the next block.
    /// `out` is zeroed before the call.
    fn render(&mut self, out: &mut [i16], frames: usize);

    fn on_midi(&mut self, msg: &[u8], source: MidiSource);

    fn set_param(&mut self, key: &str, value: &str);

    fn get_param(&self, key: &str) -> Option<String>;

    /// Load catalog entry `index`. On failure the previously loaded patch must
    /// stay active.
    fn load_patch(&mut self, index: usize, patch: &PatchInfo) -> Result<(), ChainError>;

    fn is_patch_loaded(&self) -> bool;

    /// Release external resources. Called right before the chain is dropped.
    fn detach(&mut self) {}
}

/// Creates chain processors. The loading mechanism lives entirely behind this.
pub trait ChainFactory: Send {
    fn attach(&mut self, context: &TrackContext) -> Result<Box<dyn ChainProcessor>, ChainError>;
}

/// Attach a fresh chain and load a patch into it. Blocking; control side only.
pub fn prepare_chain(
    factory: &mut dyn ChainFactory,
    context: &TrackContext,
    index: usize,
    patch: &PatchInfo,
) -> Result<Box<dyn ChainProcessor>, ChainError> {
    let mut chain = factory.attach(context)?;
    if let Err(e) = chain.load_patch(index, patch) {
        chain.detach();
        return Err(e);
    }
    Ok(chain)
}

/// Send CC 123 (all notes off) on every channel.
pub fn all_notes_off(chain: &mut dyn ChainProcessor) {
    for channel in 0..16u8 {
        chain.on_midi(&[0xB0 | channel, 123, 0], MidiSource::Internal);
    }
}

/// Heap objects displaced on the audio thread, handed back for dropping.
pub enum Retired {
    Chain(Box<dyn ChainProcessor>),
    Patch(PatchInfo),
    Param(String, String),
}

impl Retired {
    /// Release the object. Chains are detached first.
    pub fn dispose(self) {
        if let Retired::Chain(mut chain) = self {
            chain.detach();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Observations made by a `ConstChain`, shared with the test.
    #[derive(Debug, Default)]
    pub struct ChainLog {
        pub midi: Vec<(Vec<u8>, MidiSource)>,
        pub params: Vec<(String, String)>,
        pub loaded: Vec<usize>,
        pub detached: bool,
    }

    /// Renders a constant stereo value once a patch is loaded.
    pub struct ConstChain {
        pub left: i16,
        pub right: i16,
        pub loaded: bool,
        pub fail_load: bool,
        pub log: Arc<Mutex<ChainLog>>,
    }

    impl ConstChain {
        pub fn new(left: i16, right: i16) -> Self {
            Self {
                left,
                right,
                loaded: true,
                fail_load: false,
                log: Arc::new(Mutex::new(ChainLog::default())),
            }
        }
    }

    impl ChainProcessor for ConstChain {
        fn render(&mut self, out: &mut [i16], frames: usize) {
            if !self.loaded {
                return;
            }
            for frame in out.chunks_exact_mut(2).take(frames) {
                frame[0] = self.left;
                frame[1] = self.right;
            }
        }

        fn on_midi(&mut self, msg: &[u8], source: MidiSource) {
            self.log.lock().unwrap().midi.push((msg.to_vec(), source));
        }

        fn set_param(&mut self, key: &str, value: &str) {
            self.log
                .lock()
                .unwrap()
                .params
                .push((key.to_string(), value.to_string()));
        }

        fn get_param(&self, key: &str) -> Option<String> {
            (key == "left").then(|| self.left.to_string())
        }

        fn load_patch(&mut self, index: usize, patch: &PatchInfo) -> Result<(), ChainError> {
            if self.fail_load {
                return Err(ChainError::PatchLoad {
                    name: patch.name.clone(),
                    reason: "refused".to_string(),
                });
            }
            self.loaded = true;
            self.log.lock().unwrap().loaded.push(index);
            Ok(())
        }

        fn is_patch_loaded(&self) -> bool {
            self.loaded
        }

        fn detach(&mut self) {
            self.log.lock().unwrap().detached = true;
        }
    }

    /// Hands out `ConstChain`s and remembers their logs.
    pub struct ConstFactory {
        pub value: i16,
        pub fail_attach: bool,
        pub fail_load: bool,
        pub logs: Arc<Mutex<Vec<Arc<Mutex<ChainLog>>>>>,
    }

    impl ConstFactory {
        pub fn new(value: i16) -> Self {
            Self {
                value,
                fail_attach: false,
                fail_load: false,
                logs: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ChainFactory for ConstFactory {
        fn attach(
            &mut self,
            context: &TrackContext,
        ) -> Result<Box<dyn ChainProcessor>, ChainError> {
            if self.fail_attach {
                return Err(ChainError::Attach {
                    track: context.track,
                    reason: "no module".to_string(),
                });
            }
            let mut chain = ConstChain::new(self.value, self.value);
            chain.loaded = false;
            chain.fail_load = self.fail_load;
            self.logs.lock().unwrap().push(Arc::clone(&chain.log));
            Ok(Box::new(chain))
        }
    }
}
