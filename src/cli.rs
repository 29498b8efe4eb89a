// ============================================================================
// Enhance CLI — headless refinement sessions driven from the command line
// ============================================================================
//
// Usage examples:
//   enhance --input photo.png --action click:512,384 --output detail.png
//   enhance -i photo.jpg -a click:500,400 -a click:480,300 --export-zoom zoom.gif
//   enhance -i photo.png --mode drag -a drag:100,100,300,240 -a regenerate --state step.json
//   enhance -i photo.png -a click:512,384 --record-reveal reveal.gif --seed 7
//
// Coordinates are display-space pixels inside the configured viewport.
// Everything runs on the caller's current-thread runtime.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;

use clap::Parser;

use crate::animation::{FrameClock, ImmediateClock, IntervalClock, NullSurface, RecordingSurface};
use crate::geometry::Point;
use crate::io::{encode_animated_gif, mime_for_path};
use crate::orchestrator::{EnhancementReport, Refiner};
use crate::settings::{EngineSettings, SelectionModeSetting};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// One step of a scripted session.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Click(Point),
    Drag(Point, Point),
    Undo,
    Redo,
    Regenerate,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (verb, args) = s.split_once(':').unwrap_or((s, ""));
        let numbers = || -> Result<Vec<f32>, String> {
            args.split(',')
                .map(|n| n.trim().parse::<f32>().map_err(|e| format!("bad coordinate '{}': {}", n, e)))
                .collect()
        };
        match verb.to_ascii_lowercase().as_str() {
            "click" => match numbers()?.as_slice() {
                [x, y] => Ok(Action::Click(Point::new(*x, *y))),
                _ => Err(format!("'{}': expected click:X,Y", s)),
            },
            "drag" => match numbers()?.as_slice() {
                [x0, y0, x1, y1] => Ok(Action::Drag(Point::new(*x0, *y0), Point::new(*x1, *y1))),
                _ => Err(format!("'{}': expected drag:X0,Y0,X1,Y1", s)),
            },
            "undo" => Ok(Action::Undo),
            "redo" => Ok(Action::Redo),
            "regenerate" => Ok(Action::Regenerate),
            _ => Err(format!("unknown action '{}'", s)),
        }
    }
}

/// Enhance headless driver.
///
/// Load an image, run a scripted sequence of selections and history moves,
/// then write the results.
#[derive(Parser, Debug)]
#[command(
    name = "enhance",
    about = "Headless select / enhance / zoom-export driver",
    long_about = "Load an image, run selections and history moves in order, and write\n\
                  the current step, the zoom animation, or the step's JSON state.\n\n\
                  Example:\n  \
                  enhance --input photo.png --action click:512,384 --output detail.png\n  \
                  enhance -i photo.png -a click:500,400 -a undo -a click:200,200 --export-zoom zoom.gif"
)]
pub struct CliArgs {
    /// Input image (PNG, JPEG, WEBP, BMP, GIF).
    #[arg(short, long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// Action to run, repeatable and applied in order:
    /// click:X,Y | drag:X0,Y0,X1,Y1 | undo | redo | regenerate
    #[arg(short = 'a', long = "action", value_name = "ACTION")]
    pub actions: Vec<Action>,

    /// Base URL of a remote model service. Overrides the settings file.
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Settings file (TOML). Defaults to the per-user settings location.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Selection mode: fixed or drag. Overrides the settings file.
    #[arg(long, value_name = "MODE")]
    pub mode: Option<SelectionModeSetting>,

    /// Write the image at the history cursor here (format from the extension).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write the zoom animation (GIF) of the history up to the cursor.
    #[arg(long, value_name = "FILE.gif")]
    pub export_zoom: Option<PathBuf>,

    /// Write the JSON state of the step at the cursor.
    #[arg(long, value_name = "FILE.json")]
    pub state: Option<PathBuf>,

    /// Record the last zoom-in and dissolve as an animated GIF.
    #[arg(long, value_name = "FILE.gif")]
    pub record_reveal: Option<PathBuf>,

    /// Seed for the dissolve shuffle.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Pace animations at the configured frame rate instead of running them flat out.
    #[arg(long)]
    pub realtime: bool,

    /// Mirror the log to stderr and print per-action timing.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the session and return an OS exit code.
/// `0` = every action and output succeeded, `1` = something failed.
pub async fn run(args: CliArgs) -> ExitCode {
    match run_session(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_session(args: &CliArgs) -> Result<(), String> {
    let mut settings = match &args.settings {
        Some(path) => EngineSettings::load_from(path)
            .map_err(|e| format!("could not read settings '{}': {}", path.display(), e))?,
        None => EngineSettings::load(),
    };
    if let Some(endpoint) = &args.endpoint {
        settings.service_endpoint = Some(endpoint.clone());
    }
    if let Some(mode) = args.mode {
        settings.selection_mode = mode;
    }
    let frame_rate = settings.frame_rate;

    let mut refiner = Refiner::from_settings(settings).map_err(|e| format!("service setup failed: {}", e))?;
    if let Some(seed) = args.seed {
        refiner = refiner.with_seed(seed);
    }

    // -- Load ------------------------------------------------------------
    let bytes = std::fs::read(&args.input)
        .map_err(|e| format!("could not read '{}': {}", args.input.display(), e))?;
    let mime = mime_for_path(&args.input);
    let loaded = refiner
        .load_bytes(&bytes, &mime)
        .map_err(|e| format!("load failed: {}", e))?;
    if !loaded {
        return Err(format!("'{}' is not an image ({})", args.input.display(), mime));
    }
    if let Some(image) = refiner.current_image() {
        println!("loaded {} ({}×{})", args.input.display(), image.width(), image.height());
    }
    if args.verbose
        && let Some(log) = crate::logger::log_path()
    {
        println!("log: {}", log.display());
    }

    // -- Actions ---------------------------------------------------------
    let mut clock: Box<dyn FrameClock> = if args.realtime {
        Box::new(IntervalClock::new(frame_rate))
    } else {
        Box::new(ImmediateClock::default())
    };
    let mut last_reveal: Option<RecordingSurface> = None;
    let total = args.actions.len();

    for (idx, action) in args.actions.iter().enumerate() {
        let start = Instant::now();
        println!("[{}/{}] {:?}", idx + 1, total, action);

        let started = match action {
            Action::Click(p) => refiner.click(*p).map_err(|e| e.to_string())?,
            Action::Drag(a, b) => {
                refiner.pointer_down(*a).map_err(|e| e.to_string())?;
                refiner.pointer_move(*b);
                refiner.pointer_up(*b).map_err(|e| e.to_string())?
            }
            Action::Undo => {
                let moved = refiner.undo().map_err(|e| e.to_string())?;
                println!("  {}", if moved { "moved back" } else { "already at the first step" });
                false
            }
            Action::Redo => {
                let moved = refiner.redo().map_err(|e| e.to_string())?;
                println!("  {}", if moved { "moved forward" } else { "already at the last step" });
                false
            }
            Action::Regenerate => {
                refiner.regenerate().map_err(|e| e.to_string())?;
                true
            }
        };

        if started {
            let report = if args.record_reveal.is_some() {
                let mut recording = RecordingSurface::default();
                let report = refiner.process(clock.as_mut(), &mut recording).await;
                last_reveal = Some(recording);
                report
            } else {
                refiner.process(clock.as_mut(), &mut NullSurface).await
            }
            .map_err(|e| format!("enhancement failed: {}", e))?;
            print_report(&refiner, &report);
        } else if matches!(action, Action::Click(_) | Action::Drag(..)) {
            println!("  no selection (outside the image or too small)");
        }

        if args.verbose {
            println!("  ({:.0}ms)", start.elapsed().as_secs_f64() * 1000.0);
        }
    }

    // -- Outputs ---------------------------------------------------------
    if let Some(path) = &args.output {
        let image = refiner.current_image().ok_or("no image loaded")?;
        image
            .save(path)
            .map_err(|e| format!("could not write '{}': {}", path.display(), e))?;
        println!("  → {}", path.display());
    }
    if let Some(path) = &args.export_zoom {
        let gif = refiner.export_zoom().map_err(|e| format!("zoom export failed: {}", e))?;
        write_bytes(path, &gif)?;
    }
    if let Some(path) = &args.state {
        let json = refiner.download_state().map_err(|e| e.to_string())?;
        write_bytes(path, json.as_bytes())?;
    }
    if let Some(path) = &args.record_reveal {
        let recording = last_reveal.ok_or("no reveal was recorded (no action started a job)")?;
        let gif = encode_animated_gif(&recording.frames, frame_rate as f32, 256)
            .map_err(|e| format!("could not encode reveal: {}", e))?;
        write_bytes(path, &gif)?;
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn print_report(refiner: &Refiner, report: &EnhancementReport) {
    let (w, h) = report.final_size;
    println!(
        "  {:?}: {}×{}, \"{}\"{}",
        report.outcome,
        w,
        h,
        report.description.selection_description,
        if report.side_signal { " (side signal)" } else { "" }
    );
    if let Some(history) = refiner.history() {
        let nav = match (history.can_undo(), history.can_redo()) {
            (true, true) => " (undo, redo)",
            (true, false) => " (undo)",
            (false, true) => " (redo)",
            (false, false) => "",
        };
        println!("  history: step {} of {}{}", history.index() + 1, history.len(), nav);
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), String> {
    std::fs::write(path, bytes).map_err(|e| format!("could not write '{}': {}", path.display(), e))?;
    println!("  → {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_parse_actions() {
        assert_eq!("click:10,20".parse::<Action>().unwrap(), Action::Click(Point::new(10.0, 20.0)));
        assert_eq!(
            "drag: 1, 2, 30.5, 40".parse::<Action>().unwrap(),
            Action::Drag(Point::new(1.0, 2.0), Point::new(30.5, 40.0))
        );
        assert_eq!("UNDO".parse::<Action>().unwrap(), Action::Undo);
        assert_eq!("regenerate".parse::<Action>().unwrap(), Action::Regenerate);
        assert!("click:1".parse::<Action>().is_err());
        assert!("click:a,b".parse::<Action>().is_err());
        assert!("zoom".parse::<Action>().is_err());
    }

    #[test]
    fn test_args_keep_action_order() {
        let args = CliArgs::try_parse_from([
            "enhance", "-i", "in.png", "-a", "click:1,2", "--action", "undo", "-a", "redo", "--mode", "drag",
        ])
        .unwrap();
        assert_eq!(args.actions, vec![Action::Click(Point::new(1.0, 2.0)), Action::Undo, Action::Redo]);
        assert_eq!(args.mode, Some(SelectionModeSetting::Drag));
    }

    /// Frame sizes of an encoded GIF, in order.
    fn gif_frame_sizes(bytes: &[u8]) -> Vec<(u16, u16)> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(std::io::Cursor::new(bytes)).unwrap();
        let mut sizes = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            sizes.push((frame.width, frame.height));
        }
        sizes
    }

    /// Temp dir holding an 80×80 gradient `in.png` and a `settings.toml`
    /// with an 80×80 viewport and 48-pixel output.
    fn session_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("enhance-cli-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        RgbaImage::from_fn(80, 80, |x, y| Rgba([x as u8 * 3, y as u8 * 3, 100, 255]))
            .save(dir.join("in.png"))
            .unwrap();
        let settings = EngineSettings {
            viewport_width: 80.0,
            viewport_height: 80.0,
            working_width: 32,
            output_width: 48,
            zoom_in_frames: 2,
            dissolve_duration_ms: 50,
            export: crate::export::ExportOptions {
                width: 24,
                height: 24,
                zoom_frames: 2,
                hold_frames: 1,
                fps: 10,
                max_colors: 16,
            },
            ..EngineSettings::default()
        };
        settings.save_to(&dir.join("settings.toml")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_recorded_reveal_keeps_one_frame_size() {
        let dir = session_dir();
        let args = CliArgs::try_parse_from([
            "enhance".to_string(),
            "-i".to_string(),
            dir.join("in.png").display().to_string(),
            "--settings".to_string(),
            dir.join("settings.toml").display().to_string(),
            "-a".to_string(),
            "click:40,40".to_string(),
            "--record-reveal".to_string(),
            dir.join("r.gif").display().to_string(),
        ])
        .unwrap();

        assert_eq!(run(args).await, ExitCode::SUCCESS);
        // 2 zoom-in frames, then 3 dissolve frames (50 ms at 60 fps), all at
        // the viewport size even though the crop is 48×48.
        let sizes = gif_frame_sizes(&std::fs::read(dir.join("r.gif")).unwrap());
        assert_eq!(sizes, vec![(80, 80); 5]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_session_writes_all_outputs() {
        let dir = session_dir();
        let input = dir.join("in.png");
        let settings_path = dir.join("settings.toml");

        let args = CliArgs::try_parse_from([
            "enhance".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "--settings".to_string(),
            settings_path.display().to_string(),
            "-a".to_string(),
            "click:40,40".to_string(),
            "-a".to_string(),
            "click:20,20".to_string(),
            "-a".to_string(),
            "undo".to_string(),
            "--output".to_string(),
            dir.join("out.png").display().to_string(),
            "--export-zoom".to_string(),
            dir.join("zoom.gif").display().to_string(),
            "--state".to_string(),
            dir.join("state.json").display().to_string(),
            "--record-reveal".to_string(),
            dir.join("reveal.gif").display().to_string(),
            "--seed".to_string(),
            "3".to_string(),
        ])
        .unwrap();

        assert_eq!(run(args).await, ExitCode::SUCCESS);
        let out = image::open(dir.join("out.png")).unwrap();
        assert_eq!((out.width(), out.height()), (48, 48));
        assert_eq!(&std::fs::read(dir.join("zoom.gif")).unwrap()[..6], b"GIF89a");
        assert_eq!(gif_frame_sizes(&std::fs::read(dir.join("reveal.gif")).unwrap()).len(), 5);
        let state: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("state.json")).unwrap()).unwrap();
        assert_eq!(state["index"], 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let args = CliArgs::try_parse_from(["enhance", "-i", "/definitely/not/here.png"]).unwrap();
        assert_eq!(run(args).await, ExitCode::FAILURE);
    }
}
