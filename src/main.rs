use std::fs::File;
use std::io::{self, Write, stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use crossterm::{
    cursor,
    event::{
        self, Event, KeyCode, KeyEvent, KeyEventKind, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute, terminal,
};

use flappy_piano::config::Config;
use flappy_piano::game::{Game, GameOptions, KEY_LATCH};
use flappy_piano::mapper::{Action, MapperConfig, MapperMode, PianoInputMapper};
use flappy_piano::midi::{DeviceEvent, MidiDevices};
use flappy_piano::render::Renderer;
use flappy_piano::theory::{ChordQuality, PitchClass};
use flappy_piano::tracking::{HttpTrackingApi, TrackingBridge};

const FRAME: Duration = Duration::from_millis(33); // ~30 fps
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Config file to layer over the defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
    /// Bounce off pipes and ground instead of dying
    #[arg(long)]
    practice: bool,
    /// Scroll speed multiplier (0.5 ..= 2.0)
    #[arg(long)]
    speed: Option<f64>,
    /// "note" or "chord"
    #[arg(long)]
    mode: Option<MapperMode>,
    #[arg(long)]
    up_note: Option<PitchClass>,
    #[arg(long)]
    down_note: Option<PitchClass>,
    /// Root of the chord that ascends
    #[arg(long)]
    up_chord: Option<PitchClass>,
    #[arg(long)]
    up_chord_type: Option<ChordQuality>,
    /// Root of the chord that descends
    #[arg(long)]
    down_chord: Option<PitchClass>,
    #[arg(long)]
    down_chord_type: Option<ChordQuality>,
    /// Keyboard only
    #[arg(long)]
    no_midi: bool,
    /// Enables session tracking against this server
    #[arg(long)]
    tracking_url: Option<String>,
}

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("flappy-piano")
        .join("flappy-piano.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = File::create(&log_path)
        .or_else(|_| File::create(std::env::temp_dir().join("flappy-piano.log")));

    match log_file {
        Ok(file) => {
            let _ = WriteLogger::init(log_level, simplelog::Config::default(), file);
        }
        Err(e) => eprintln!("logging disabled: {e}"),
    }

    log::info!("flappy-piano starting (log level: {:?})", log_level);
}

/// Restores the terminal however the loop exits.
struct TerminalGuard {
    enhanced: bool,
}

impl TerminalGuard {
    fn enter(out: &mut impl Write) -> Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(
            out,
            terminal::EnterAlternateScreen,
            cursor::Hide,
            terminal::DisableLineWrap,
        )?;
        let enhanced = matches!(terminal::supports_keyboard_enhancement(), Ok(true));
        if enhanced {
            execute!(
                out,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                )
            )?;
        }
        Ok(Self { enhanced })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut out = stdout();
        if self.enhanced {
            let _ = execute!(out, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(
            out,
            terminal::LeaveAlternateScreen,
            cursor::Show,
            terminal::EnableLineWrap,
        );
        let _ = terminal::disable_raw_mode();
    }
}

fn build_mapper(config: &Config, opt: &Opt) -> Result<PianoInputMapper> {
    let mut patch = config.mapper_patch().context("invalid [mapper] section")?;
    patch.mode = opt.mode.or(patch.mode);
    patch.up_note = opt.up_note.or(patch.up_note);
    patch.down_note = opt.down_note.or(patch.down_note);
    patch.up_chord = opt.up_chord.or(patch.up_chord);
    patch.up_chord_type = opt.up_chord_type.or(patch.up_chord_type);
    patch.down_chord = opt.down_chord.or(patch.down_chord);
    patch.down_chord_type = opt.down_chord_type.or(patch.down_chord_type);

    let mut mapper = PianoInputMapper::new(MapperConfig::default().merged(&patch));
    mapper.on_status_change(|status| {
        log::info!(target: "midi", "{}", status.summary());
    });
    log::info!("{}", mapper.config_description());
    Ok(mapper)
}

fn action_for(code: KeyCode) -> Option<Action> {
    match code {
        KeyCode::Up | KeyCode::Char('w') | KeyCode::Char('k') => Some(Action::Up),
        KeyCode::Down | KeyCode::Char('s') | KeyCode::Char('j') => Some(Action::Down),
        _ => None,
    }
}

/// Returns `false` when the player asked to quit.
fn handle_key(game: &mut Game, key: KeyEvent, now: Instant) -> bool {
    if let Some(action) = action_for(key.code) {
        match key.kind {
            KeyEventKind::Release => game.key_up(action),
            KeyEventKind::Press | KeyEventKind::Repeat => game.key_down(action, now),
        }
        return true;
    }
    if key.kind != KeyEventKind::Press {
        return true;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::Char(' ') | KeyCode::Enter => game.restart(),
        KeyCode::Char('p') => game.toggle_pause(),
        KeyCode::Char('+') | KeyCode::Char('=') => game.adjust_speed(1),
        KeyCode::Char('-') => game.adjust_speed(-1),
        KeyCode::Char('t') => game.toggle_practice(),
        KeyCode::Char('m') => game.toggle_mapper_mode(),
        _ => {}
    }
    true
}

fn run(
    game: &mut Game,
    midi: &mut Option<MidiDevices>,
    midi_rx: &Receiver<DeviceEvent>,
    out: &mut impl Write,
    (cols, rows): (u16, u16),
) -> Result<()> {
    let mut renderer = Renderer::new(cols as usize, rows as usize);

    loop {
        let frame_start = Instant::now();

        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) => {
                    if !handle_key(game, key, frame_start) {
                        return Ok(());
                    }
                }
                Event::Resize(c, r) => {
                    let (pw, ph) = Renderer::field_size(c as usize, r as usize);
                    renderer = Renderer::new(c as usize, r as usize);
                    game.resize(pw, ph);
                }
                _ => {}
            }
        }

        for device_event in midi_rx.try_iter() {
            game.handle_device_event(device_event, frame_start);
        }
        if let Some(devices) = midi.as_mut() {
            devices.poll_hotplug(frame_start);
        }

        game.tick(frame_start);
        renderer.draw(game, out)?;

        let elapsed = frame_start.elapsed();
        if elapsed < FRAME {
            std::thread::sleep(FRAME - elapsed);
        }
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose);

    let mut config = Config::load(opt.config.as_deref())
        .context("loading configuration")?;
    if let Some(url) = &opt.tracking_url {
        config.set_tracking_url(url.clone());
    }

    let mapper = build_mapper(&config, &opt)?;

    let (devices, midi_rx) = MidiDevices::new();
    let mut midi = if opt.no_midi || !config.midi_enabled() {
        log::info!(target: "midi", "MIDI input disabled");
        None
    } else {
        let mut devices = devices;
        if !devices.connect() {
            log::warn!(target: "midi", "no MIDI input available, keyboard only");
        }
        Some(devices)
    };

    let tracker = config.tracking_enabled().then(|| {
        log::info!(target: "tracking", "reporting to {}", config.tracking_url());
        TrackingBridge::new(
            Box::new(HttpTrackingApi::new(config.tracking_url())),
            config.tracking_settings(),
        )
    });

    let mut out = stdout();
    let guard = TerminalGuard::enter(&mut out).context("terminal setup failed")?;

    let (cols, rows) = terminal::size()?;
    let (pw, ph) = Renderer::field_size(cols as usize, rows as usize);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);
    let options = GameOptions {
        speed: opt.speed.unwrap_or(config.speed()),
        practice: opt.practice || config.practice(),
        tuning: config.physics(),
        seed,
        key_latch: (!guard.enhanced).then_some(KEY_LATCH),
    };
    let mut game = Game::new(pw, ph, mapper, tracker, options);

    let result = run(&mut game, &mut midi, &midi_rx, &mut out, (cols, rows));

    drop(guard);
    game.shutdown(SHUTDOWN_GRACE);
    if let Some(summary) = game.last_summary() {
        println!(
            "last session: score {} ({} hits, {} misses)",
            summary.score, summary.successes, summary.errors
        );
    }
    println!("best: {}", game.best());
    let _ = io::stdout().flush();
    result
}
