//! scenewatch - watch a capture source for result screens
//!
//! This binary:
//! 1. Loads configuration (file named by SCENEWATCH_CONFIG, env overrides, flags)
//! 2. Configures the capture source (camera, file or passthrough)
//! 3. Builds the result-screen scene with the configured recognizers
//! 4. Logs every result and optionally appends it to a JSON-lines file
//! 5. Runs the tick loop until end of stream, --max-frames or Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scenewatch::config::{parse_offset, ScenewatchConfig, SourceKind};
use scenewatch::detect::MaskMatcher;
use scenewatch::engine::RunOptions;
use scenewatch::events::{JsonLinesObserver, LogObserver};
use scenewatch::ingest::DefaultOpener;
use scenewatch::{
    run, CaptureSource, EventBus, RecognizerSet, ResultDetailScene, ResultLayout, SceneEngine,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SCENEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Capture source kind: camera, file or passthrough.
    #[arg(long)]
    source: Option<String>,
    /// Device index or name (camera / passthrough).
    #[arg(long)]
    device: Option<String>,
    /// Video file or image directory (file source).
    #[arg(long)]
    file: Option<PathBuf>,
    /// Duplicate even scanlines over odd ones.
    #[arg(long)]
    deinterlace: bool,
    /// Pixel offset as "dx,dy".
    #[arg(long, allow_hyphen_values = true)]
    offset: Option<String>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Append results to this JSON-lines file.
    #[arg(long)]
    results: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ScenewatchConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    let source = CaptureSource::with_opener(DefaultOpener {
        replay_fps: cfg.capture.fps,
    });
    source.configure(cfg.capture.mode()?, cfg.capture.params())?;

    let layout = match &cfg.layout_path {
        Some(path) => ResultLayout::from_file(path)?,
        None => ResultLayout::default(),
    };
    let recognizers = build_recognizers(&cfg)?;
    log::info!("recognizers: {:?}", recognizers);

    let mut bus = EventBus::new();
    bus.register(LogObserver::new());
    if let Some(path) = &cfg.results_jsonl {
        bus.register(JsonLinesObserver::create(path)?);
        log::info!("appending results to {}", path.display());
    }

    let mut engine = SceneEngine::new(bus);
    engine.register(ResultDetailScene::new(
        recognizers,
        layout,
        cfg.scene.clone(),
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("scenewatch running. Ctrl-C to stop");
    let summary = run(
        &source,
        &mut engine,
        &RunOptions {
            max_frames: args.max_frames,
            stop: Some(stop),
            health_interval: Some(HEALTH_INTERVAL),
        },
    );
    source.release();

    let stats = source.stats();
    log::info!(
        "done: {} frames, {} rewinds, {} observer failures ({:?})",
        summary.frames,
        stats.rewinds,
        engine.bus().failures(),
        summary.reason
    );
    Ok(())
}

fn apply_args(cfg: &mut ScenewatchConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.capture.source = source.parse()?;
    }
    if let Some(device) = &args.device {
        cfg.capture.device = device.clone();
    }
    if let Some(file) = &args.file {
        cfg.capture.file = Some(file.clone());
        if args.source.is_none() {
            cfg.capture.source = SourceKind::File;
        }
    }
    if args.deinterlace {
        cfg.capture.deinterlace = true;
    }
    if let Some(offset) = &args.offset {
        cfg.capture.offset = parse_offset(offset)?;
    }
    if let Some(path) = &args.results {
        cfg.results_jsonl = Some(path.clone());
    }
    Ok(())
}

fn build_recognizers(cfg: &ScenewatchConfig) -> Result<RecognizerSet> {
    let mut set = RecognizerSet::new();
    match &cfg.recognizers.win_mask {
        Some(path) => {
            let matcher = MaskMatcher::from_file("result_detail:win", path)?
                .with_threshold(cfg.recognizers.win_threshold);
            set = set.with_screen(matcher);
        }
        None => log::warn!("no recognizers.win_mask configured; result screens will not match"),
    }

    #[cfg(feature = "backend-tract")]
    {
        use scenewatch::config::ModelSettings;
        use scenewatch::detect::backends::TractGlyphRecognizer;

        let load = |label: &str, model: &ModelSettings| {
            TractGlyphRecognizer::new(label, &model.path, &model.labels, model.width, model.height)
        };
        let r = &cfg.recognizers;
        if let Some(model) = &r.digits_model {
            set = set.with_digits(load("digits", model)?);
        }
        if let Some(model) = &r.weapon_model {
            set = set.with_weapon(load("weapon", model)?);
        }
        if let Some(model) = &r.rank_model {
            set = set.with_rank_letter(load("rank", model)?);
        }
        if let Some(model) = &r.fes_gender_model {
            set = set.with_fes_gender(load("fes_gender", model)?);
        }
        if let Some(model) = &r.fes_level_model {
            set = set.with_fes_level(load("fes_level", model)?);
        }
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let r = &cfg.recognizers;
        if r.digits_model.is_some()
            || r.weapon_model.is_some()
            || r.rank_model.is_some()
            || r.fes_gender_model.is_some()
            || r.fes_level_model.is_some()
        {
            log::warn!("recognizer models configured but backend-tract is disabled; ignoring");
        }
    }

    Ok(set)
}
