// src/audio/snapshot.rs
// Copyable engine state for UIs and the query surface

use super::catalog::PatchInfo;
use super::midi::RoutingMode;
use super::transport::TransportState;
use super::{NUM_CHANNELS, NUM_TRACKS};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackSnapshot {
    pub level: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub armed: bool,
    pub monitoring: bool,
    /// Samples recorded (frames * 2)
    pub length: usize,
    pub capacity: usize,
    pub has_chain: bool,
    pub chain_loaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSnapshot {
    pub sample_rate: u32,
    pub transport: TransportState,
    pub playhead: usize,
    pub countin_beats: usize,
    /// 1-based beat within the bar
    pub beat: usize,
    pub bar: usize,
    pub tempo_bpm: f64,
    pub metronome: bool,
    pub countin: bool,
    pub loop_enabled: bool,
    pub loop_start: usize,
    pub loop_end: usize,
    pub routing: RoutingMode,
    pub selected_track: usize,
    pub record_seconds: u32,
    pub max_record_seconds: u32,
    pub tracks: [TrackSnapshot; NUM_TRACKS],
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// Split `track_N_field` into `(N, field)`.
fn track_key(key: &str) -> Option<(usize, &str)> {
    let rest = key.strip_prefix("track_")?;
    let (index, field) = rest.split_once('_')?;
    let index: usize = index.parse().ok()?;
    (index < NUM_TRACKS).then_some((index, field))
}

impl EngineSnapshot {
    pub fn playhead_ms(&self) -> u64 {
        self.playhead as u64 * 1000 / self.sample_rate.max(1) as u64
    }

    /// Recorded length of `track` in seconds.
    pub fn track_seconds(&self, track: usize) -> f64 {
        let frames = self.tracks[track].length / NUM_CHANNELS;
        frames as f64 / self.sample_rate.max(1) as f64
    }

    /// Whether a `record` command would be turned away: nothing armed and
    /// neither recording nor counting in.
    pub fn rejects_record(&self) -> bool {
        matches!(
            self.transport,
            TransportState::Stopped | TransportState::Playing
        ) && !self.tracks.iter().any(|t| t.armed)
    }

    pub fn selected(&self) -> &TrackSnapshot {
        &self.tracks[self.selected_track]
    }

    /// Answer a state query. Unknown keys give `None`.
    pub fn query(&self, key: &str) -> Option<String> {
        let answer = match key {
            "transport" => self.transport.name().to_string(),
            "countin_beats" => self.countin_beats.to_string(),
            "playhead" => self.playhead_ms().to_string(),
            "tempo" => self.tempo_bpm.to_string(),
            "metronome" => flag(self.metronome),
            "countin" => flag(self.countin),
            "loop_enabled" => flag(self.loop_enabled),
            "loop_start" => self.loop_start.to_string(),
            "loop_end" => self.loop_end.to_string(),
            "midi_routing" => self.routing.to_string(),
            "selected_track" => self.selected_track.to_string(),
            "record_seconds" => self.record_seconds.to_string(),
            "max_record_seconds" => self.max_record_seconds.to_string(),
            "chain_loaded" => flag(self.selected().chain_loaded),
            _ => {
                let (index, field) = track_key(key)?;
                let track = &self.tracks[index];
                match field {
                    "level" => format!("{:.2}", track.level),
                    "pan" => format!("{:.2}", track.pan),
                    "muted" => flag(track.muted),
                    "solo" => flag(track.solo),
                    "armed" => flag(track.armed),
                    "monitoring" => flag(track.monitoring),
                    "length" => format!("{:.1}", self.track_seconds(index)),
                    _ => return None,
                }
            }
        };
        Some(answer)
    }
}

/// Queries about patches and errors, which the copyable snapshot cannot carry.
pub fn query_patch_key(
    key: &str,
    patches: &[PatchInfo],
    track_patches: [Option<&PatchInfo>; NUM_TRACKS],
    last_error: Option<&str>,
) -> Option<String> {
    match key {
        "patch_count" => return Some(patches.len().to_string()),
        "last_error" => return Some(last_error.unwrap_or_default().to_string()),
        _ => {}
    }
    if let Some(index) = key.strip_prefix("patch_name_") {
        let index: usize = index.parse().ok()?;
        return patches.get(index).map(|p| p.name.clone());
    }
    match track_key(key)? {
        (index, "patch") => Some(
            track_patches[index]
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Empty".to_string()),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn snapshot() -> EngineSnapshot {
        EngineSnapshot {
            sample_rate: 44100,
            transport: TransportState::Playing,
            playhead: 22050,
            countin_beats: 0,
            beat: 2,
            bar: 0,
            tempo_bpm: 120.0,
            metronome: true,
            countin: false,
            loop_enabled: false,
            loop_start: 0,
            loop_end: 0,
            routing: RoutingMode::AllToSelected,
            selected_track: 1,
            record_seconds: 120,
            max_record_seconds: 300,
            tracks: [TrackSnapshot {
                level: 0.8,
                monitoring: true,
                ..Default::default()
            }; NUM_TRACKS],
        }
    }

    #[test]
    fn test_global_queries() {
        let snap = snapshot();
        assert_eq!(snap.query("transport").as_deref(), Some("playing"));
        assert_eq!(snap.query("playhead").as_deref(), Some("500"));
        assert_eq!(snap.query("tempo").as_deref(), Some("120"));
        assert_eq!(snap.query("metronome").as_deref(), Some("1"));
        assert_eq!(snap.query("midi_routing").as_deref(), Some("selected"));
        assert_eq!(snap.query("selected_track").as_deref(), Some("1"));
        assert_eq!(snap.query("nonsense"), None);
    }

    #[test]
    fn test_rejects_record_without_armed_track() {
        let mut snap = snapshot();
        assert!(snap.rejects_record());
        snap.tracks[3].armed = true;
        assert!(!snap.rejects_record());

        snap.tracks[3].armed = false;
        snap.transport = TransportState::Recording;
        assert!(!snap.rejects_record());
    }

    #[test]
    fn test_track_queries() {
        let mut snap = snapshot();
        snap.tracks[2].length = 44100 * 2 * 3 + 44100;
        snap.tracks[2].pan = -0.5;
        assert_eq!(snap.query("track_2_length").as_deref(), Some("3.5"));
        assert_eq!(snap.query("track_2_pan").as_deref(), Some("-0.50"));
        assert_eq!(snap.query("track_0_level").as_deref(), Some("0.80"));
        assert_eq!(snap.query("track_0_monitoring").as_deref(), Some("1"));
        assert_eq!(snap.query("track_4_level"), None);
        assert_eq!(snap.query("track_0_volume"), None);
    }

    #[test]
    fn test_patch_queries() {
        let patches = vec![PatchInfo {
            name: "Bass".to_string(),
            path: PathBuf::from("bass.json"),
        }];
        let tracks = [None, Some(&patches[0]), None, None];
        assert_eq!(
            query_patch_key("patch_count", &patches, tracks, None).as_deref(),
            Some("1")
        );
        assert_eq!(
            query_patch_key("patch_name_0", &patches, tracks, None).as_deref(),
            Some("Bass")
        );
        assert_eq!(query_patch_key("patch_name_3", &patches, tracks, None), None);
        assert_eq!(
            query_patch_key("track_1_patch", &patches, tracks, None).as_deref(),
            Some("Bass")
        );
        assert_eq!(
            query_patch_key("track_0_patch", &patches, tracks, None).as_deref(),
            Some("Empty")
        );
        assert_eq!(
            query_patch_key("last_error", &patches, tracks, Some("boom")).as_deref(),
            Some("boom")
        );
        assert_eq!(query_patch_key("track_0_level", &patches, tracks, None), None);
    }
}
