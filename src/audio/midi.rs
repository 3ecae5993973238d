// src/audio/midi.rs
// Routing policy that picks the track an incoming MIDI event is delivered to

use std::fmt;
use std::str::FromStr;

use super::NUM_TRACKS;

/// Where a MIDI event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiSource {
    /// The host's own pads and keys.
    Internal,
    /// A controller plugged into the host.
    External,
    /// Anything the host generated itself (sequencers, clock, ...).
    Host(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    #[default]
    AllToSelected,
    SplitByChannel,
}

impl FromStr for RoutingMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "selected" => Ok(RoutingMode::AllToSelected),
            "split" => Ok(RoutingMode::SplitByChannel),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMode::AllToSelected => write!(f, "selected"),
            RoutingMode::SplitByChannel => write!(f, "split"),
        }
    }
}

/// A short MIDI message that can cross the command queue without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    bytes: [u8; 3],
    len: u8,
    pub source: MidiSource,
}

impl MidiEvent {
    /// Messages longer than three bytes are not representable and yield `None`.
    pub fn new(msg: &[u8], source: MidiSource) -> Option<Self> {
        if msg.is_empty() || msg.len() > 3 {
            return None;
        }
        let mut bytes = [0u8; 3];
        bytes[..msg.len()].copy_from_slice(msg);
        Some(Self {
            bytes,
            len: msg.len() as u8,
            source,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Channel of a channel-voice message, `None` for system messages.
fn channel_of(status: u8) -> Option<usize> {
    (0x80..0xF0)
        .contains(&status)
        .then_some((status & 0x0F) as usize)
}

/// Pick the target track for `msg`, or `None` when the event is dropped.
pub fn route(mode: RoutingMode, selected: usize, source: MidiSource, msg: &[u8]) -> Option<usize> {
    let status = *msg.first()?;
    match (source, mode) {
        (MidiSource::External, RoutingMode::SplitByChannel) => match channel_of(status) {
            Some(channel) if channel < NUM_TRACKS => Some(channel),
            Some(_) => None,
            None => Some(selected),
        },
        _ => Some(selected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE_ON_CH2: [u8; 3] = [0x92, 60, 100];

    #[test]
    fn test_internal_always_goes_to_selected() {
        for mode in [RoutingMode::AllToSelected, RoutingMode::SplitByChannel] {
            assert_eq!(route(mode, 3, MidiSource::Internal, &NOTE_ON_CH2), Some(3));
        }
    }

    #[test]
    fn test_host_events_go_to_selected() {
        assert_eq!(
            route(RoutingMode::SplitByChannel, 1, MidiSource::Host(7), &NOTE_ON_CH2),
            Some(1)
        );
    }

    #[test]
    fn test_external_all_to_selected() {
        assert_eq!(
            route(RoutingMode::AllToSelected, 0, MidiSource::External, &NOTE_ON_CH2),
            Some(0)
        );
    }

    #[test]
    fn test_split_by_channel() {
        let mode = RoutingMode::SplitByChannel;
        assert_eq!(route(mode, 0, MidiSource::External, &NOTE_ON_CH2), Some(2));
        assert_eq!(route(mode, 0, MidiSource::External, &[0x95, 60, 100]), None);
        assert_eq!(route(mode, 0, MidiSource::External, &[0x83, 60, 0]), Some(3));
        // clock has no channel
        assert_eq!(route(mode, 1, MidiSource::External, &[0xF8]), Some(1));
    }

    #[test]
    fn test_empty_message_is_dropped() {
        assert_eq!(route(RoutingMode::AllToSelected, 0, MidiSource::Internal, &[]), None);
    }

    #[test]
    fn test_routing_mode_parse() {
        assert_eq!("split".parse::<RoutingMode>(), Ok(RoutingMode::SplitByChannel));
        assert_eq!("selected".parse::<RoutingMode>(), Ok(RoutingMode::AllToSelected));
        assert!("omni".parse::<RoutingMode>().is_err());
        assert_eq!(RoutingMode::SplitByChannel.to_string(), "split");
    }

    #[test]
    fn test_midi_event_holds_short_messages() {
        let event = MidiEvent::new(&[0xC1, 5], MidiSource::External).unwrap();
        assert_eq!(event.bytes(), &[0xC1, 5]);
        assert!(MidiEvent::new(&[], MidiSource::Internal).is_none());
        assert!(MidiEvent::new(&[0xF0, 1, 2, 3], MidiSource::Internal).is_none());
    }
}
