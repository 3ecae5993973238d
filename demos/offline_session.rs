//! Drive the engine without an audio device: load a tone patch, record a
//! short phrase with count-in, overdub a second track and bounce the mix.

use fourtrack::audio::{
    DirPatchCatalog, EngineConfig, FourTrackEngine, MidiSource, ToneChainFactory, TransportState,
    bounce_wav,
};

const BLOCK: usize = 128;

fn render_frames(engine: &mut FourTrackEngine, frames: usize) {
    let mut out = [0i16; BLOCK * 2];
    let mut remaining = frames;
    while remaining > 0 {
        let n = remaining.min(BLOCK);
        engine.render_block(&mut out[..n * 2], n);
        remaining -= n;
    }
}

fn play_phrase(engine: &mut FourTrackEngine, notes: &[u8]) {
    let beat = engine.samples_per_beat();
    for &note in notes {
        engine.on_midi(&[0x90, note, 100], MidiSource::Internal);
        render_frames(engine, beat / 2);
        engine.on_midi(&[0x80, note, 0], MidiSource::Internal);
        render_frames(engine, beat / 2);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Offline session example");

    let patch_dir = std::env::temp_dir().join("fourtrack_demo_patches");
    std::fs::create_dir_all(&patch_dir)?;
    std::fs::write(
        patch_dir.join("lead.json"),
        r#"{"name": "Lead", "synth": {"module": "tone", "preset": 2, "gain": 0.5}}"#,
    )?;
    std::fs::write(
        patch_dir.join("bass.json"),
        r#"{"name": "Bass", "synth": {"module": "tone", "preset": 0, "decay": 0.9995}}"#,
    )?;

    let config = EngineConfig {
        tempo_bpm: 100.0,
        ..EngineConfig::default()
    };
    let mut engine = FourTrackEngine::new(&config)
        .with_chain_factory(Box::new(ToneChainFactory))
        .with_catalog(Box::new(DirPatchCatalog::new(&patch_dir)));
    println!(
        "Patches: {}",
        engine.get_param("patch_count").unwrap_or_default()
    );

    // Track 1: bass line after a one-bar count-in
    engine.set_param("load_patch_name", "bass");
    engine.set_param("toggle_arm", "selected");
    engine.set_param("countin", "1");
    engine.set_param("metronome", "1");
    engine.set_param("transport", "record");
    println!(
        "Transport: {} ({} beats)",
        engine.get_param("transport").unwrap_or_default(),
        engine.get_param("countin_beats").unwrap_or_default()
    );
    while engine.transport_state() != TransportState::Recording {
        render_frames(&mut engine, BLOCK);
    }
    play_phrase(&mut engine, &[36, 36, 43, 41, 36, 36, 43, 38]);
    engine.set_param("transport", "stop");
    engine.set_param("toggle_arm", "selected");

    // Track 2: lead overdub while track 1 plays back
    engine.set_param("select_track", "1");
    engine.set_param("load_patch_name", "Lead");
    engine.set_param("toggle_arm", "selected");
    engine.set_param("track_pan", "1:0.4");
    engine.set_param("goto_start", "");
    engine.set_param("transport", "play");
    engine.set_param("transport", "record");
    play_phrase(&mut engine, &[60, 64, 67, 72, 71, 67, 64, 62]);
    engine.set_param("transport", "stop");
    engine.set_param("toggle_arm", "selected");
    engine.set_param("metronome", "0");

    for track in 0..2 {
        println!(
            "Track {}: {} ({}s)",
            track + 1,
            engine
                .get_param(&format!("track_{}_patch", track))
                .unwrap_or_default(),
            engine
                .get_param(&format!("track_{}_length", track))
                .unwrap_or_default()
        );
    }

    let out_path = std::env::temp_dir().join("fourtrack_offline_session.wav");
    let frames = bounce_wav(&mut engine, &out_path)?;
    println!("Bounced {} frames to {}", frames, out_path.display());

    let _ = std::fs::remove_dir_all(&patch_dir);
    println!("Offline session example completed!");
    Ok(())
}
