// src/main.rs

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use otodecks::audio::{setup_output_device, start_output};
use otodecks::export::bounce_to_wav;
use otodecks::{Console, DeckHandle, EngineConfig, SymphoniaDecoder};

/// Multi-deck DJ player.
#[derive(Parser, Debug)]
#[command(name = "otodecks")]
#[command(about = "Play tracks on DJ decks, or bounce the mix to a WAV file")]
struct Args {
    /// Engine config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Render offline to this WAV file instead of opening the audio device
    #[arg(short, long)]
    render: Option<PathBuf>,

    /// Length of the offline render; defaults to the longest track
    #[arg(short, long, requires = "render")]
    seconds: Option<f64>,

    /// Tracks to load, one per deck in order
    tracks: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_disk(path)?,
        None => EngineConfig::default(),
    };
    config.decks = config.decks.max(args.tracks.len());

    match args.render.clone() {
        Some(out) => render(config, &args, out),
        None => interactive(config, &args),
    }
}

fn load_tracks(console: &Console, tracks: &[String]) {
    for (deck, track) in console.decks().iter().zip(tracks) {
        // Failures are logged by the deck; keep going with the others.
        let _ = deck.load(track);
    }
}

fn render(config: EngineConfig, args: &Args, out: PathBuf) -> anyhow::Result<()> {
    let block = config.max_block_frames;
    let (console, mut engine) = Console::new(config, Arc::new(SymphoniaDecoder))?;
    load_tracks(&console, &args.tracks);

    let mut longest = 0.0f64;
    for deck in console.decks() {
        if deck.is_loaded() {
            deck.start()?;
        }
    }
    // Prime the engine so lengths are published.
    engine.render(&mut []);
    for deck in console.decks() {
        longest = longest.max(deck.length_seconds());
    }

    let seconds = args.seconds.unwrap_or(longest);
    bounce_to_wav(&mut engine, &out, seconds, block)?;
    println!("Wrote {:.1}s to {}", seconds, out.display());
    Ok(())
}

fn interactive(mut config: EngineConfig, args: &Args) -> anyhow::Result<()> {
    let output = setup_output_device(Some(config.sample_rate))?;
    config.sample_rate = output.output_sample_rate;

    let (mut console, engine) = Console::new(config, Arc::new(SymphoniaDecoder))?;
    load_tracks(&console, &args.tracks);
    let _stream = start_output(output, engine)?;

    println!(
        "[TAB] deck | [SPACE] play/stop | [-/=] gain | [[/]] speed | [,/.] seek | \
         [f/g] cutoff | [r/t] Q | [h] HP/LP | [b] bypass | [Q] quit"
    );

    enable_raw_mode()?;
    let result = run_loop(&mut console);
    disable_raw_mode()?;
    println!("\nExiting.");
    result
}

fn run_loop(console: &mut Console) -> anyhow::Result<()> {
    // Status refresh, same cadence as a waveform playhead timer.
    let tick = Duration::from_millis(100);
    let mut selected = 0usize;

    loop {
        if event::poll(tick)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind != KeyEventKind::Press {
                    continue;
                }
                if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
                    break;
                }
                if matches!(ev.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
                if ev.code == KeyCode::Tab && !console.decks().is_empty() {
                    selected = (selected + 1) % console.decks().len();
                } else if let Some(deck) = console.decks().get(selected) {
                    // Rejections are logged; the previous value stays.
                    let _ = handle_key(deck, ev.code);
                }
            }
        }

        console.collect_garbage();
        print_status(console, selected)?;
    }
    Ok(())
}

fn handle_key(deck: &DeckHandle, code: KeyCode) -> otodecks::Result<()> {
    let filter = deck.filter();
    match code {
        KeyCode::Char(' ') => {
            if deck.is_playing() {
                deck.stop()
            } else {
                deck.start()
            }
        }
        KeyCode::Char('-') => deck.set_gain((deck.gain() as f64 - 0.05).max(0.0)),
        KeyCode::Char('=') => deck.set_gain((deck.gain() as f64 + 0.05).min(1.0)),
        KeyCode::Char('[') => deck.set_speed(deck.speed() - 0.05),
        KeyCode::Char(']') => deck.set_speed(deck.speed() + 0.05),
        KeyCode::Char(',') => deck.set_position_relative((deck.position_relative() - 0.05).max(0.0)),
        KeyCode::Char('.') => deck.set_position_relative((deck.position_relative() + 0.05).min(1.0)),
        KeyCode::Char('f') => deck.update_filter(filter.cutoff as f64 / 1.25, filter.resonance as f64),
        KeyCode::Char('g') => deck.update_filter(filter.cutoff as f64 * 1.25, filter.resonance as f64),
        KeyCode::Char('r') => deck.update_filter(filter.cutoff as f64, filter.resonance as f64 - 0.25),
        KeyCode::Char('t') => deck.update_filter(filter.cutoff as f64, filter.resonance as f64 + 0.25),
        KeyCode::Char('h') => deck.set_filter_type(filter.filter_type.toggled()),
        KeyCode::Char('b') => deck.set_filter_active(!filter.active),
        _ => Ok(()),
    }
}

fn print_status(console: &Console, selected: usize) -> std::io::Result<()> {
    let mut line = String::new();
    for (i, deck) in console.decks().iter().enumerate() {
        let filter = deck.filter();
        let levels = deck.levels();
        line.push_str(&format!(
            "{}{} {} {:>6.1}/{:<6.1}s g{:.2} x{:.2} {:?}{} {:>5.0}Hz Q{:.1} [{:.2}|{:.2}]   ",
            if i == selected { '>' } else { ' ' },
            deck.id(),
            if deck.is_playing() { "▶" } else { "■" },
            deck.position_seconds(),
            deck.length_seconds(),
            deck.gain(),
            deck.speed(),
            filter.filter_type,
            if filter.active { "" } else { "(off)" },
            filter.cutoff,
            filter.resonance,
            levels.hold_l,
            levels.hold_r,
        ));
    }
    let mut stdout = std::io::stdout();
    write!(stdout, "\r{line}")?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_flags_and_tracks_parse() {
        let args =
            Args::try_parse_from(["otodecks", "-r", "mix.wav", "--seconds", "30", "a.wav", "b.flac"])
                .unwrap();
        assert_eq!(args.render, Some(PathBuf::from("mix.wav")));
        assert_eq!(args.seconds, Some(30.0));
        assert_eq!(args.tracks, ["a.wav", "b.flac"]);
        assert!(args.config.is_none());
    }

    #[test]
    fn seconds_needs_a_render_target() {
        assert!(Args::try_parse_from(["otodecks", "--seconds", "5"]).is_err());
        assert!(Args::try_parse_from(["otodecks", "--render"]).is_err());
        assert!(Args::try_parse_from(["otodecks", "--volume", "3"]).is_err());
    }
}
