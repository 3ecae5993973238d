// src/audio/control.rs
// String key/value control surface parsed into typed commands

use super::NUM_TRACKS;
use super::midi::RoutingMode;
use super::transport::TransportCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTarget {
    Selected,
    Index(usize),
}

impl TrackTarget {
    pub fn resolve(self, selected: usize) -> usize {
        match self {
            TrackTarget::Selected => selected,
            TrackTarget::Index(track) => track,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SelectTrack(usize),
    ToggleArm(TrackTarget),
    ToggleMonitoring(TrackTarget),
    SetLevel { track: usize, level: f32 },
    SetPan { track: usize, pan: f32 },
    ToggleMute(usize),
    ToggleSolo(usize),
    ClearTrack(usize),
    Transport(TransportCommand),
    GotoStart,
    GotoEnd,
    JumpBars(i64),
    SetTempo(f64),
    SetMetronome(bool),
    SetCountIn(bool),
    SetRouting(RoutingMode),
    SetLoopEnabled(bool),
    SetLoopStart(usize),
    SetLoopEnd(usize),
    SetRecordSeconds(u32),
    LoadPatch(usize),
    LoadPatchName(String),
    RescanPatches,
    ClearPatch(TrackTarget),
    ChainParam { key: String, value: String },
    AllNotesOff,
    ClearError,
}

impl ControlCommand {
    /// Parse one control call. Unknown keys and malformed values give `None`.
    pub fn parse(key: &str, value: &str) -> Option<Self> {
        let value = value.trim();
        let command = match key {
            "select_track" => ControlCommand::SelectTrack(parse_track(value)?),
            "toggle_arm" => ControlCommand::ToggleArm(parse_target(value)?),
            "toggle_monitoring" => ControlCommand::ToggleMonitoring(parse_target(value)?),
            "track_level" => {
                let (track, level) = parse_track_value(value)?;
                ControlCommand::SetLevel { track, level }
            }
            "track_pan" => {
                let (track, pan) = parse_track_value(value)?;
                ControlCommand::SetPan { track, pan }
            }
            "track_mute" => ControlCommand::ToggleMute(parse_track(value)?),
            "track_solo" => ControlCommand::ToggleSolo(parse_track(value)?),
            "clear_track" => ControlCommand::ClearTrack(parse_track(value)?),
            "transport" => ControlCommand::Transport(match value {
                "play" => TransportCommand::Play,
                "stop" => TransportCommand::Stop,
                "record" => TransportCommand::Record,
                _ => return None,
            }),
            "goto_start" => ControlCommand::GotoStart,
            "goto_end" => ControlCommand::GotoEnd,
            "jump_bars" => ControlCommand::JumpBars(value.parse().ok()?),
            "tempo" => ControlCommand::SetTempo(parse_finite(value)?),
            "metronome" => ControlCommand::SetMetronome(parse_flag(value)?),
            "countin" => ControlCommand::SetCountIn(parse_flag(value)?),
            "midi_routing" => ControlCommand::SetRouting(value.parse().ok()?),
            "loop_enabled" => ControlCommand::SetLoopEnabled(parse_flag(value)?),
            "loop_start" => ControlCommand::SetLoopStart(value.parse().ok()?),
            "loop_end" => ControlCommand::SetLoopEnd(value.parse().ok()?),
            "record_seconds" => ControlCommand::SetRecordSeconds(value.parse().ok()?),
            "load_patch" => ControlCommand::LoadPatch(value.parse().ok()?),
            "load_patch_name" if !value.is_empty() => {
                ControlCommand::LoadPatchName(value.to_string())
            }
            "rescan_patches" => ControlCommand::RescanPatches,
            "clear_patch" => ControlCommand::ClearPatch(parse_target(value)?),
            "chain_param" => {
                let (key, value) = value.split_once(':')?;
                if key.is_empty() {
                    return None;
                }
                ControlCommand::ChainParam {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            "all_notes_off" => ControlCommand::AllNotesOff,
            "clear_error" => ControlCommand::ClearError,
            _ => return None,
        };
        Some(command)
    }
}

fn parse_track(value: &str) -> Option<usize> {
    value.parse().ok().filter(|&track| track < NUM_TRACKS)
}

fn parse_target(value: &str) -> Option<TrackTarget> {
    match value {
        "" | "selected" => Some(TrackTarget::Selected),
        _ => parse_track(value).map(TrackTarget::Index),
    }
}

fn parse_finite<T: std::str::FromStr + Into<f64> + Copy>(value: &str) -> Option<T> {
    value
        .parse::<T>()
        .ok()
        .filter(|v| (*v).into().is_finite())
}

/// "t:v" pairs like `track_level=2:0.75`.
fn parse_track_value(value: &str) -> Option<(usize, f32)> {
    let (track, v) = value.split_once(':')?;
    Some((parse_track(track.trim())?, parse_finite(v.trim())?))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}
