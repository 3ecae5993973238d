// src/audio/transport.rs
// Transport state machine: global playhead, loop region and record gating

use std::fmt;

use super::BEATS_PER_BAR;

/// Count-in progress. `counter` is negative during the lead-in before the
/// first click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountIn {
    pub counter: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
    CountIn(CountIn),
}

impl TransportState {
    pub fn name(&self) -> &'static str {
        match self {
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Recording => "recording",
            TransportState::CountIn(_) => "countin",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Stop,
    Record,
}

#[derive(Debug, Clone, Default)]
pub struct Transport {
    state: TransportState,
    playhead: usize, // frames
    loop_start: usize,
    loop_end: usize,
    loop_enabled: bool,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn is_recording(&self) -> bool {
        self.state == TransportState::Recording
    }

    /// Playing or Recording: the only states in which the playhead moves.
    pub fn is_rolling(&self) -> bool {
        matches!(
            self.state,
            TransportState::Playing | TransportState::Recording
        )
    }

    /// Apply a transport command. Returns `false` when the command was
    /// rejected and nothing changed.
    pub fn apply(
        &mut self,
        command: TransportCommand,
        any_armed: bool,
        countin_enabled: bool,
        samples_per_beat: usize,
    ) -> bool {
        match command {
            TransportCommand::Play => self.play(),
            TransportCommand::Stop => self.stop(),
            TransportCommand::Record => {
                return self.toggle_record(any_armed, countin_enabled, samples_per_beat);
            }
        }
        true
    }

    pub fn play(&mut self) {
        self.state = TransportState::Playing;
    }

    pub fn stop(&mut self) {
        // Playhead stays put for punch-in
        self.state = TransportState::Stopped;
    }

    pub fn toggle_record(
        &mut self,
        any_armed: bool,
        countin_enabled: bool,
        samples_per_beat: usize,
    ) -> bool {
        match self.state {
            TransportState::Recording => self.state = TransportState::Playing,
            TransportState::CountIn(_) => self.state = TransportState::Stopped,
            _ if !any_armed => return false,
            TransportState::Stopped if countin_enabled => {
                self.state = TransportState::CountIn(self.count_in_from_here(samples_per_beat));
            }
            TransportState::Stopped | TransportState::Playing => {
                self.state = TransportState::Recording;
            }
        }
        true
    }

    /// A count-in whose first click falls on the next beat boundary of the
    /// existing timeline.
    fn count_in_from_here(&self, samples_per_beat: usize) -> CountIn {
        let spb = samples_per_beat.max(1) as i64;
        let phase = (self.playhead as i64) % spb;
        CountIn {
            counter: -((spb - phase) % spb),
            total: BEATS_PER_BAR as i64 * spb,
        }
    }

    pub fn count_in_mut(&mut self) -> Option<&mut CountIn> {
        match &mut self.state {
            TransportState::CountIn(count_in) => Some(count_in),
            _ => None,
        }
    }

    /// Leave the count-in: snap to the next beat boundary and start recording.
    pub fn complete_count_in(&mut self, samples_per_beat: usize) {
        let spb = samples_per_beat.max(1);
        let phase = self.playhead % spb;
        if phase != 0 {
            self.playhead += spb - phase;
        }
        self.state = TransportState::Recording;
    }

    /// Whole beats left in the count-in, rounded up. Zero outside a count-in.
    pub fn countin_beats(&self, samples_per_beat: usize) -> usize {
        match self.state {
            TransportState::CountIn(CountIn { counter, total }) => {
                let remaining = (total - counter.max(0)).max(0) as usize;
                remaining.div_ceil(samples_per_beat.max(1))
            }
            _ => 0,
        }
    }

    /// Move the playhead after a block. Only Playing and Recording advance.
    pub fn advance(&mut self, frames: usize) {
        if !self.is_rolling() {
            return;
        }
        self.playhead = self.playhead.saturating_add(frames);
        if self.loop_enabled && self.loop_end > 0 && self.playhead >= self.loop_end {
            self.playhead = self.loop_start;
        }
    }

    /// Frame that a track read wraps back to on reaching its end, if looping.
    pub fn wrap_target(&self) -> Option<usize> {
        (self.loop_enabled && self.loop_end > 0).then_some(self.loop_start)
    }

    pub fn set_playhead(&mut self, frame: usize) {
        self.playhead = frame;
    }

    pub fn goto_start(&mut self) {
        self.playhead = 0;
    }

    pub fn jump_bars(&mut self, bars: i64, samples_per_beat: usize) {
        let delta = bars
            .saturating_mul(BEATS_PER_BAR as i64)
            .saturating_mul(samples_per_beat as i64);
        self.playhead = (self.playhead as i64).saturating_add(delta).max(0) as usize;
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn loop_region(&self) -> (usize, usize) {
        (self.loop_start, self.loop_end)
    }

    pub fn set_loop_start(&mut self, frame: usize) {
        self.loop_start = frame;
    }

    pub fn set_loop_end(&mut self, frame: usize) {
        self.loop_end = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPB: usize = 22050;

    #[test]
    fn test_play_and_stop() {
        let mut transport = Transport::new();
        transport.play();
        assert_eq!(transport.state(), TransportState::Playing);
        transport.stop();
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn test_record_without_armed_track_is_rejected() {
        let mut transport = Transport::new();
        assert!(!transport.toggle_record(false, true, SPB));
        assert_eq!(transport.state(), TransportState::Stopped);

        transport.play();
        assert!(!transport.toggle_record(false, false, SPB));
        assert_eq!(transport.state(), TransportState::Playing);
    }

    #[test]
    fn test_record_from_stopped_without_countin() {
        let mut transport = Transport::new();
        assert!(transport.toggle_record(true, false, SPB));
        assert_eq!(transport.state(), TransportState::Recording);
    }

    #[test]
    fn test_count_in_only_from_stopped() {
        let mut transport = Transport::new();
        transport.toggle_record(true, true, SPB);
        assert!(matches!(transport.state(), TransportState::CountIn(_)));

        // punch-in never counts in
        let mut transport = Transport::new();
        transport.play();
        transport.toggle_record(true, true, SPB);
        assert_eq!(transport.state(), TransportState::Recording);
    }

    #[test]
    fn test_record_toggles_back_to_playing() {
        let mut transport = Transport::new();
        transport.toggle_record(true, false, SPB);
        transport.toggle_record(true, false, SPB);
        assert_eq!(transport.state(), TransportState::Playing);
    }

    #[test]
    fn test_count_in_aligned_start() {
        let mut transport = Transport::new();
        transport.set_playhead(2 * SPB);
        transport.toggle_record(true, true, SPB);
        assert_eq!(
            transport.state(),
            TransportState::CountIn(CountIn {
                counter: 0,
                total: 4 * SPB as i64
            })
        );
    }

    #[test]
    fn test_count_in_unaligned_start_leads_in_to_next_beat() {
        let mut transport = Transport::new();
        transport.set_playhead(SPB + 1000);
        transport.toggle_record(true, true, SPB);
        let count_in = transport.count_in_mut().copied().unwrap();
        assert_eq!(count_in.counter, -((SPB - 1000) as i64));
        assert_eq!(count_in.total, 4 * SPB as i64);
    }

    #[test]
    fn test_complete_count_in_snaps_to_beat() {
        let mut transport = Transport::new();
        transport.set_playhead(SPB + 1000);
        transport.toggle_record(true, true, SPB);
        transport.complete_count_in(SPB);
        assert_eq!(transport.state(), TransportState::Recording);
        assert_eq!(transport.playhead(), 2 * SPB);

        let mut transport = Transport::new();
        transport.set_playhead(3 * SPB);
        transport.toggle_record(true, true, SPB);
        transport.complete_count_in(SPB);
        assert_eq!(transport.playhead(), 3 * SPB);
    }

    #[test]
    fn test_record_during_count_in_cancels() {
        let mut transport = Transport::new();
        transport.toggle_record(true, true, SPB);
        transport.toggle_record(true, true, SPB);
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn test_playhead_only_moves_while_rolling() {
        let mut transport = Transport::new();
        transport.advance(128);
        assert_eq!(transport.playhead(), 0);

        transport.toggle_record(true, true, SPB);
        transport.advance(128);
        assert_eq!(transport.playhead(), 0);

        transport.stop();
        transport.play();
        transport.advance(128);
        assert_eq!(transport.playhead(), 128);
    }

    #[test]
    fn test_loop_wrap_on_advance() {
        let mut transport = Transport::new();
        transport.set_loop_start(100);
        transport.set_loop_end(1000);
        transport.set_playhead(900);
        transport.play();

        transport.advance(50);
        assert_eq!(transport.playhead(), 950);

        // disabled loop does nothing
        transport.advance(100);
        assert_eq!(transport.playhead(), 1050);

        transport.set_playhead(900);
        transport.set_loop_enabled(true);
        transport.advance(100);
        assert_eq!(transport.playhead(), 100);
        assert_eq!(transport.wrap_target(), Some(100));
    }

    #[test]
    fn test_loop_end_zero_disables_wrap() {
        let mut transport = Transport::new();
        transport.set_loop_enabled(true);
        transport.play();
        transport.advance(5000);
        assert_eq!(transport.playhead(), 5000);
        assert_eq!(transport.wrap_target(), None);
    }

    #[test]
    fn test_jump_bars_saturates_at_zero() {
        let mut transport = Transport::new();
        transport.jump_bars(2, SPB);
        assert_eq!(transport.playhead(), 8 * SPB);
        transport.jump_bars(-1, SPB);
        assert_eq!(transport.playhead(), 4 * SPB);
        transport.jump_bars(-10, SPB);
        assert_eq!(transport.playhead(), 0);
    }

    #[test]
    fn test_countin_beats_rounds_up() {
        let mut transport = Transport::new();
        assert_eq!(transport.countin_beats(SPB), 0);

        transport.set_playhead(500);
        transport.toggle_record(true, true, SPB);
        // lead-in still shows the full bar
        assert_eq!(transport.countin_beats(SPB), 4);

        transport.count_in_mut().unwrap().counter = SPB as i64 + 1;
        assert_eq!(transport.countin_beats(SPB), 3);
        transport.count_in_mut().unwrap().counter = 3 * SPB as i64;
        assert_eq!(transport.countin_beats(SPB), 1);
    }
}
