use anyhow::{Result, anyhow};
use fourtrack::audio::{
    AudioStream, DirPatchCatalog, EngineConfig, EngineHandle, PatchCatalog, ToneChainFactory,
};
use fourtrack::ui::TerminalUI;
use std::path::PathBuf;

fn print_help() {
    println!("fourtrack - Terminal four-track live recorder");
    println!();
    println!("USAGE:");
    println!("    fourtrack [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help             Print this help message");
    println!("    --debug                Write debug logging to debug.log");
    println!("    --config <FILE>        Load engine settings from a TOML file");
    println!("    --patches <DIR>        Directory of *.json chain patches");
    println!();
    println!("DESCRIPTION:");
    println!("    Four stereo tracks sharing one transport, with a metronome,");
    println!("    count-in before recording, punch-in, a loop region and a");
    println!("    per-track tone chain played from F1-F8 or a MIDI controller.");
    println!();
    println!("CONTROLS:");
    println!("    ↑↓ 1-4     Select track");
    println!("    A          Arm selected track");
    println!("    V          Toggle input monitoring");
    println!("    R          Record (punch in/out while playing)");
    println!("    Space      Play/Stop");
    println!("    Home/End   Go to start/end of selected track");
    println!("    [ ]        Jump one bar back/forward");
    println!("    +/-        Level");
    println!("    , .        Pan");
    println!("    M L        Mute, Solo");
    println!("    C          Clear selected track");
    println!("    G          Toggle loop");
    println!("    T          Set tempo");
    println!("    N H        Metronome, Count-in");
    println!("    O P        Previous/next patch on selected track");
    println!("    X          Unload patch");
    println!("    K          Toggle MIDI routing (selected/split)");
    println!("    F1-F8      Play notes");
    println!("    Esc        All notes off");
    println!("    E          Clear error");
    println!("    Q          Quit");
    println!();
    println!("EXAMPLES:");
    println!("    fourtrack --patches ./patches");
    println!("    fourtrack --config session.toml --debug");
}

struct Args {
    debug: bool,
    config: Option<PathBuf>,
    patches: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut parsed = Args {
        debug: false,
        config: None,
        patches: None,
    };
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--debug" => parsed.debug = true,
            "--config" => {
                let path = iter.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--patches" => {
                let path = iter.next().ok_or_else(|| anyhow!("--patches needs a path"))?;
                parsed.patches = Some(PathBuf::from(path));
            }
            other => return Err(anyhow!("Unknown option '{}' (see --help)", other)),
        }
    }
    Ok(Some(parsed))
}

fn init_logging(debug: bool) -> Result<()> {
    if !debug {
        return Ok(());
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")?;
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(args) = parse_args(&args)? else {
        print_help();
        return Ok(());
    };
    init_logging(args.debug)?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.patches.is_some() {
        config.patch_dir = args.patches.clone();
    }

    println!("Starting fourtrack...");

    // Run the engine at the device rate
    let audio_stream = AudioStream::new()?;
    config.sample_rate = audio_stream.sample_rate();
    let config = config.sanitized();

    let catalog = config
        .patch_dir
        .as_ref()
        .map(|dir| Box::new(DirPatchCatalog::new(dir)) as Box<dyn PatchCatalog>);
    let (handle, engine) = EngineHandle::new(&config, Some(Box::new(ToneChainFactory)), catalog);

    let _stream = audio_stream.start(engine)?;

    let mut ui = TerminalUI::new(handle, audio_stream.device_name())
        .map_err(|e| anyhow!("UI creation failed: {}", e))?;
    ui.run().map_err(|e| anyhow!("UI run failed: {}", e))?;
    drop(ui);

    println!("fourtrack stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("fourtrack")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&["--debug", "--patches", "p"]))
            .unwrap()
            .unwrap();
        assert!(parsed.debug);
        assert_eq!(parsed.patches, Some(PathBuf::from("p")));
        assert!(parsed.config.is_none());

        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
