pub mod audio;
pub mod ui;

pub use audio::{EngineConfig, EngineHandle, FourTrackEngine};
pub use ui::TerminalUI;
