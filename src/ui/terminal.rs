use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table},
};
use std::{
    io,
    time::{Duration, Instant},
};

use crate::audio::{
    EngineHandle, EngineSnapshot, MidiSource, NUM_TRACKS, RoutingMode, TrackSnapshot,
    TransportState,
};

/// Notes played by F1-F8 on the selected track (C major from middle C).
const KEY_NOTES: [u8; 8] = [60, 62, 64, 65, 67, 69, 71, 72];
const NOTE_LENGTH: Duration = Duration::from_millis(300);
const STATUS_DURATION: Duration = Duration::from_secs(2);
const LEVEL_STEP: f32 = 0.05;
const PAN_STEP: f32 = 0.1;

/// What a key press asks for.
#[derive(Debug, Clone, PartialEq)]
enum KeyAction {
    Quit,
    Control(&'static str, String),
    Note(u8),
    NextPatch,
    PrevPatch,
    PromptTempo,
}

#[derive(Debug, Clone, PartialEq)]
enum HeaderStatus {
    InputPrompt(String, String), // (prompt, current_input)
    Success(String),
    Cancelled,
}

fn control(key: &'static str, value: impl Into<String>) -> Option<KeyAction> {
    Some(KeyAction::Control(key, value.into()))
}

fn flag(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}

/// Map a key to an action given the current engine state.
fn action_for_key(code: KeyCode, snapshot: &EngineSnapshot) -> Option<KeyAction> {
    let selected = snapshot.selected_track;
    let track = snapshot.selected();
    match code {
        KeyCode::Char('q') => Some(KeyAction::Quit),
        KeyCode::Up => control(
            "select_track",
            ((selected + NUM_TRACKS - 1) % NUM_TRACKS).to_string(),
        ),
        KeyCode::Down => control("select_track", ((selected + 1) % NUM_TRACKS).to_string()),
        KeyCode::Char(c @ '1'..='4') => control("select_track", (c as u8 - b'1').to_string()),
        KeyCode::Char('a') => control("toggle_arm", "selected"),
        KeyCode::Char('v') => control("toggle_monitoring", "selected"),
        KeyCode::Char('r') => control("transport", "record"),
        KeyCode::Char('s') => control("transport", "stop"),
        KeyCode::Char(' ') => match snapshot.transport {
            TransportState::Stopped => control("transport", "play"),
            _ => control("transport", "stop"),
        },
        KeyCode::Home => control("goto_start", ""),
        KeyCode::End => control("goto_end", ""),
        KeyCode::Char('[') => control("jump_bars", "-1"),
        KeyCode::Char(']') => control("jump_bars", "1"),
        KeyCode::Char('+') | KeyCode::Char('=') => control(
            "track_level",
            format!("{}:{:.2}", selected, track.level + LEVEL_STEP),
        ),
        KeyCode::Char('-') => control(
            "track_level",
            format!("{}:{:.2}", selected, (track.level - LEVEL_STEP).max(0.0)),
        ),
        KeyCode::Char(',') => control(
            "track_pan",
            format!("{}:{:.2}", selected, (track.pan - PAN_STEP).max(-1.0)),
        ),
        KeyCode::Char('.') => control(
            "track_pan",
            format!("{}:{:.2}", selected, (track.pan + PAN_STEP).min(1.0)),
        ),
        KeyCode::Char('m') => control("track_mute", selected.to_string()),
        KeyCode::Char('l') => control("track_solo", selected.to_string()),
        KeyCode::Char('c') => control("clear_track", selected.to_string()),
        KeyCode::Char('n') => control("metronome", flag(!snapshot.metronome)),
        KeyCode::Char('h') => control("countin", flag(!snapshot.countin)),
        KeyCode::Char('g') => control("loop_enabled", flag(!snapshot.loop_enabled)),
        KeyCode::Char('k') => control(
            "midi_routing",
            match snapshot.routing {
                RoutingMode::AllToSelected => "split",
                RoutingMode::SplitByChannel => "selected",
            },
        ),
        KeyCode::Char('p') => Some(KeyAction::NextPatch),
        KeyCode::Char('o') => Some(KeyAction::PrevPatch),
        KeyCode::Char('x') => control("clear_patch", "selected"),
        KeyCode::Char('e') => control("clear_error", ""),
        KeyCode::Char('t') => Some(KeyAction::PromptTempo),
        KeyCode::Esc => control("all_notes_off", ""),
        KeyCode::F(n @ 1..=8) => Some(KeyAction::Note(KEY_NOTES[n as usize - 1])),
        _ => None,
    }
}

fn format_time(frames: usize, sample_rate: u32) -> String {
    let total_ms = frames as u64 * 1000 / sample_rate.max(1) as u64;
    format!(
        "{:02}:{:02}.{:01}",
        total_ms / 60_000,
        (total_ms / 1000) % 60,
        (total_ms % 1000) / 100
    )
}

pub struct TerminalUI {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    handle: EngineHandle,
    device_name: String,
    is_running: bool,
    last_update: Instant,
    // Tempo prompt buffer; `Some` while the prompt is open
    tempo_input: Option<String>,
    header_status: Option<HeaderStatus>,
    status_timer: Option<Instant>,
    patch_cursor: Option<usize>,
    pending_note_offs: Vec<(Instant, u8)>,
}

impl TerminalUI {
    pub fn new(handle: EngineHandle, device_name: &str) -> Result<Self, Box<dyn std::error::Error>> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            handle,
            device_name: device_name.to_string(),
            is_running: true,
            last_update: Instant::now(),
            tempo_input: None,
            header_status: None,
            status_timer: None,
            patch_cursor: None,
            pending_note_offs: Vec::new(),
        })
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        while self.is_running {
            self.process_events()?;
            self.handle.poll();
            self.release_notes();
            self.check_status_timer();

            if self.last_update.elapsed() >= Duration::from_millis(50) {
                self.draw()?;
                self.last_update = Instant::now();
            }

            std::thread::sleep(Duration::from_millis(1));
        }

        // Don't leave notes hanging on the way out
        self.handle.set_param("all_notes_off", "");
        Ok(())
    }

    fn process_events(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if event::poll(Duration::from_millis(0))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            self.handle_key_event(key);
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        if self.tempo_input.is_some() {
            self.handle_prompt_key(key.code);
            return;
        }

        let Some(action) = action_for_key(key.code, self.handle.snapshot()) else {
            return;
        };
        match action {
            KeyAction::Quit => self.is_running = false,
            KeyAction::Control(key, value) => {
                self.handle.set_param(key, &value);
                if key == "clear_track" {
                    self.show_success(&format!("Cleared track {}", value));
                }
            }
            KeyAction::Note(note) => self.play_note(note),
            KeyAction::NextPatch => self.step_patch(1),
            KeyAction::PrevPatch => self.step_patch(-1),
            KeyAction::PromptTempo => {
                self.tempo_input = Some(String::new());
                self.update_prompt();
            }
        }
    }

    fn handle_prompt_key(&mut self, code: KeyCode) {
        let Some(input) = self.tempo_input.as_mut() else {
            return;
        };
        match code {
            KeyCode::Enter => {
                let value = std::mem::take(input);
                self.tempo_input = None;
                self.handle.set_param("tempo", &value);
                match value.parse::<f64>() {
                    Ok(bpm) if bpm.is_finite() => self.show_success(&format!("Tempo {}", bpm)),
                    _ => self.show_cancelled(),
                }
                return;
            }
            KeyCode::Esc => {
                self.tempo_input = None;
                self.show_cancelled();
                return;
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => input.push(c),
            _ => {}
        }
        self.update_prompt();
    }

    fn update_prompt(&mut self) {
        if let Some(input) = &self.tempo_input {
            self.header_status = Some(HeaderStatus::InputPrompt(
                "Tempo (BPM):".to_string(),
                input.clone(),
            ));
            self.status_timer = None;
        }
    }

    fn play_note(&mut self, note: u8) {
        if self.handle.send_midi(&[0x90, note, 100], MidiSource::Internal) {
            self.pending_note_offs
                .push((Instant::now() + NOTE_LENGTH, note));
        }
    }

    fn release_notes(&mut self) {
        let now = Instant::now();
        let handle = &mut self.handle;
        self.pending_note_offs.retain(|&(due, note)| {
            if due > now {
                return true;
            }
            // Keep it queued if the command queue is full
            !handle.send_midi(&[0x80, note, 0], MidiSource::Internal)
        });
    }

    fn step_patch(&mut self, delta: isize) {
        let count = self.handle.patches().len();
        if count == 0 {
            self.show_success("No patches found");
            return;
        }
        let next = match self.patch_cursor {
            Some(index) => (index as isize + delta).rem_euclid(count as isize) as usize,
            None if delta < 0 => count - 1,
            None => 0,
        };
        self.patch_cursor = Some(next);
        self.handle.set_param("load_patch", &next.to_string());
        if let Some(error) = self.handle.last_error() {
            let error = error.to_string();
            self.show_success(&error);
        } else if let Some(patch) = self.handle.patches().get(next) {
            let message = format!("Loaded {}", patch.name);
            self.show_success(&message);
        }
    }

    fn show_success(&mut self, message: &str) {
        self.header_status = Some(HeaderStatus::Success(message.to_string()));
        self.status_timer = Some(Instant::now());
    }

    fn show_cancelled(&mut self) {
        self.header_status = Some(HeaderStatus::Cancelled);
        self.status_timer = Some(Instant::now());
    }

    fn check_status_timer(&mut self) {
        if let Some(timer) = self.status_timer
            && timer.elapsed() >= STATUS_DURATION
        {
            self.header_status = None;
            self.status_timer = None;
        }
    }

    fn draw(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let snapshot = *self.handle.snapshot();
        let patch_names: [String; NUM_TRACKS] = std::array::from_fn(|i| {
            self.handle
                .get_param(&format!("track_{}_patch", i))
                .unwrap_or_default()
        });
        let last_error = self.handle.last_error().map(str::to_string);
        let header_status = self.header_status.clone();
        let device_name = self.device_name.clone();

        self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3), // Header
                    Constraint::Min(0),    // Tracks
                    Constraint::Length(6), // Footer
                ])
                .split(f.area());

            Self::draw_header_static(f, chunks[0], &device_name, &header_status);
            Self::draw_tracks_static(f, chunks[1], &snapshot, &patch_names);
            Self::draw_footer_static(f, chunks[2], &snapshot, last_error.as_deref());
        })?;
        Ok(())
    }

    fn draw_header_static(
        f: &mut Frame,
        area: Rect,
        device_name: &str,
        header_status: &Option<HeaderStatus>,
    ) {
        let header_text = match header_status {
            Some(HeaderStatus::InputPrompt(prompt, current_input)) => {
                format!("{} {}", prompt, current_input)
            }
            Some(HeaderStatus::Success(message)) => format!("✓ {}", message),
            Some(HeaderStatus::Cancelled) => "✗ Cancelled".to_string(),
            None => format!("Output: {}", device_name),
        };

        let header = Paragraph::new(header_text)
            .style(
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("fourtrack"));
        f.render_widget(header, area);
    }

    fn draw_tracks_static(
        f: &mut Frame,
        area: Rect,
        snapshot: &EngineSnapshot,
        patch_names: &[String; NUM_TRACKS],
    ) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
            .split(area);

        Self::draw_track_list_static(f, chunks[0], snapshot, patch_names);
        Self::draw_track_details_static(f, chunks[1], snapshot, patch_names);
    }

    fn track_status(snapshot: &EngineSnapshot, track: &TrackSnapshot) -> (String, Color) {
        match snapshot.transport {
            TransportState::Recording if track.armed => ("[REC]".to_string(), Color::Red),
            TransportState::CountIn(_) if track.armed => {
                (format!("[{}]", snapshot.countin_beats), Color::Cyan)
            }
            _ if track.armed => ("[ARM]".to_string(), Color::Magenta),
            TransportState::Playing | TransportState::Recording if track.length > 0 => {
                ("[PLAY]".to_string(), Color::Green)
            }
            _ if track.length > 0 => ("[READY]".to_string(), Color::Yellow),
            _ => ("[EMPTY]".to_string(), Color::Gray),
        }
    }

    fn draw_track_list_static(
        f: &mut Frame,
        area: Rect,
        snapshot: &EngineSnapshot,
        patch_names: &[String; NUM_TRACKS],
    ) {
        let header_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);

        let rows: Vec<Row> = snapshot
            .tracks
            .iter()
            .enumerate()
            .map(|(i, track)| {
                let (status_text, status_color) = Self::track_status(snapshot, track);
                let status_cell = Cell::from(Span::styled(
                    status_text,
                    Style::default()
                        .fg(status_color)
                        .add_modifier(Modifier::BOLD),
                ));

                let mute_solo_text = match (track.muted, track.solo) {
                    (_, true) => "SOLO",
                    (true, false) => "MUTED",
                    _ => "",
                };

                let row_style = if i == snapshot.selected_track {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };

                Row::new(vec![
                    Cell::from(format!("Track {}", i + 1)),
                    status_cell,
                    Cell::from(format!("{:.0}%", track.level * 100.0)),
                    Cell::from(format!("{:+.1}", track.pan)),
                    Cell::from(format!("{:.1}s", snapshot.track_seconds(i))),
                    Cell::from(mute_solo_text),
                    Cell::from(if track.monitoring { "MON" } else { "" }),
                    Cell::from(patch_names[i].clone()),
                ])
                .style(row_style)
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Length(8),  // Track
                Constraint::Length(8),  // Status
                Constraint::Length(6),  // Level
                Constraint::Length(5),  // Pan
                Constraint::Length(8),  // Length
                Constraint::Length(6),  // Mute/Solo
                Constraint::Length(4),  // Monitor
                Constraint::Min(10),    // Patch
            ],
        )
        .header(Row::new(
            ["Track", "Status", "Level", "Pan", "Length", "M/S", "Mon", "Patch"]
                .map(|title| Cell::from(title).style(header_style)),
        ))
        .block(Block::default().borders(Borders::ALL).title("Tracks"));

        f.render_widget(table, area);
    }

    fn draw_track_details_static(
        f: &mut Frame,
        area: Rect,
        snapshot: &EngineSnapshot,
        patch_names: &[String; NUM_TRACKS],
    ) {
        let index = snapshot.selected_track;
        let track = snapshot.selected();

        let level_gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Level"))
            .gauge_style(Style::default().fg(Color::Green))
            .ratio((track.level as f64).clamp(0.0, 1.0));

        let capacity_frames = track.capacity / 2;
        let details = Paragraph::new(format!(
            "Track {} Details:\n\
            Patch: {}\n\
            Chain: {}\n\
            Length: {} / {}\n\
            Armed: {}\n\
            Monitoring: {}\n\
            Muted: {}\n\
            Solo: {}",
            index + 1,
            patch_names[index],
            match (track.has_chain, track.chain_loaded) {
                (true, true) => "loaded",
                (true, false) => "attached",
                _ => "none",
            },
            format_time(track.length / 2, snapshot.sample_rate),
            format_time(capacity_frames, snapshot.sample_rate),
            track.armed,
            track.monitoring,
            track.muted,
            track.solo
        ))
        .block(Block::default().borders(Borders::ALL).title("Details"));

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);

        f.render_widget(level_gauge, chunks[0]);
        f.render_widget(details, chunks[1]);
    }

    fn draw_footer_static(
        f: &mut Frame,
        area: Rect,
        snapshot: &EngineSnapshot,
        last_error: Option<&str>,
    ) {
        let key_color = Color::Yellow;
        let desc_color = Color::White;
        let sep_color = Color::DarkGray;

        let key_desc = |key: &str, desc: &str| -> Vec<Span> {
            vec![
                Span::styled(
                    key.to_string(),
                    Style::default().fg(key_color).add_modifier(Modifier::BOLD),
                ),
                Span::styled("=".to_string(), Style::default().fg(sep_color)),
                Span::styled(desc.to_string(), Style::default().fg(desc_color)),
            ]
        };
        let separator = || Span::styled(" | ".to_string(), Style::default().fg(sep_color));
        let line = |pairs: &[(&str, &str)]| -> Line {
            let mut spans = Vec::new();
            for (i, (key, desc)) in pairs.iter().enumerate() {
                if i > 0 {
                    spans.push(separator());
                }
                spans.extend(key_desc(key, desc));
            }
            Line::from(spans)
        };

        let transport_color = match snapshot.transport {
            TransportState::Recording => Color::Red,
            TransportState::CountIn(_) => Color::Cyan,
            TransportState::Playing => Color::Green,
            TransportState::Stopped => Color::Gray,
        };
        let loop_text = if snapshot.loop_enabled {
            format!(
                " Loop: {}-{} ",
                format_time(snapshot.loop_start, snapshot.sample_rate),
                format_time(snapshot.loop_end, snapshot.sample_rate)
            )
        } else {
            " Loop: off ".to_string()
        };

        let status_line = Line::from(vec![
            Span::styled(
                format!(" {} ", snapshot.transport.name().to_uppercase()),
                Style::default()
                    .fg(transport_color)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" {} ", format_time(snapshot.playhead, snapshot.sample_rate)),
                Style::default().fg(Color::White),
            ),
            Span::styled(
                format!(" BPM: {:.1} ", snapshot.tempo_bpm),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" Beat: {}/{} ", snapshot.beat, snapshot.bar + 1),
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(loop_text, Style::default().fg(Color::White)),
            Span::styled(
                format!(" MIDI: {} ", snapshot.routing),
                Style::default().fg(Color::White),
            ),
            Span::styled(
                last_error.map(|e| format!(" ! {} ", e)).unwrap_or_default(),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
        ]);

        let help_text = vec![
            line(&[
                ("↑↓/1-4", "Select"),
                ("A", "Arm"),
                ("R", "Record"),
                ("Space", "Play/Stop"),
                ("Home/End", "Start/End"),
                ("[ ]", "Bars"),
                ("Q", "Quit"),
            ]),
            line(&[
                ("+/-", "Level"),
                (",/.", "Pan"),
                ("M", "Mute"),
                ("L", "Solo"),
                ("V", "Monitor"),
                ("C", "Clear"),
                ("G", "Loop"),
            ]),
            line(&[
                ("T", "Tempo"),
                ("N", if snapshot.metronome { "Metronome On" } else { "Metronome Off" }),
                ("H", if snapshot.countin { "Count-in On" } else { "Count-in Off" }),
                ("O/P", "Patch"),
                ("X", "Unload"),
                ("K", "Routing"),
                ("F1-F8", "Notes"),
                ("E", "Clear Error"),
            ]),
            status_line,
        ];

        let footer = Paragraph::new(help_text)
            .block(Block::default().borders(Borders::ALL).title("Controls"));

        f.render_widget(footer, area);
    }
}

impl Drop for TerminalUI {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{EngineConfig, FourTrackEngine};

    fn snapshot() -> EngineSnapshot {
        FourTrackEngine::new(&EngineConfig::default()).snapshot()
    }

    fn expect_control(code: KeyCode, snapshot: &EngineSnapshot, key: &str, value: &str) {
        match action_for_key(code, snapshot) {
            Some(KeyAction::Control(k, v)) => {
                assert_eq!(k, key);
                assert_eq!(v, value);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_selection_wraps() {
        let snap = snapshot();
        expect_control(KeyCode::Up, &snap, "select_track", "3");
        expect_control(KeyCode::Down, &snap, "select_track", "1");
        expect_control(KeyCode::Char('3'), &snap, "select_track", "2");
        assert_eq!(action_for_key(KeyCode::Char('5'), &snap), None);
    }

    #[test]
    fn test_space_toggles_play() {
        let mut snap = snapshot();
        expect_control(KeyCode::Char(' '), &snap, "transport", "play");
        snap.transport = TransportState::Recording;
        expect_control(KeyCode::Char(' '), &snap, "transport", "stop");
    }

    #[test]
    fn test_level_and_pan_steps() {
        let mut snap = snapshot();
        snap.selected_track = 2;
        expect_control(KeyCode::Char('+'), &snap, "track_level", "2:0.85");
        expect_control(KeyCode::Char('-'), &snap, "track_level", "2:0.75");
        snap.tracks[2].pan = -1.0;
        expect_control(KeyCode::Char(','), &snap, "track_pan", "2:-1.00");
        expect_control(KeyCode::Char('.'), &snap, "track_pan", "2:-0.90");
    }

    #[test]
    fn test_toggles_follow_state() {
        let mut snap = snapshot();
        expect_control(KeyCode::Char('n'), &snap, "metronome", "1");
        snap.metronome = true;
        expect_control(KeyCode::Char('n'), &snap, "metronome", "0");
        expect_control(KeyCode::Char('k'), &snap, "midi_routing", "split");
    }

    #[test]
    fn test_function_keys_play_notes() {
        let snap = snapshot();
        assert_eq!(
            action_for_key(KeyCode::F(1), &snap),
            Some(KeyAction::Note(60))
        );
        assert_eq!(
            action_for_key(KeyCode::F(8), &snap),
            Some(KeyAction::Note(72))
        );
        assert_eq!(action_for_key(KeyCode::F(9), &snap), None);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0, 44100), "00:00.0");
        assert_eq!(format_time(44100 * 61 + 22050, 44100), "01:01.5");
    }
}
