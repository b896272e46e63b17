#![warn(unused_extern_crates)]
use anyhow::{Result, anyhow};
use clap::{Args, Parser};
use smilecam::app::App;
use smilecam::config::{
    CameraSection, CaptureSection, Config, DetectorSection, FileConfig, ModelsSection,
    OverlaySection,
};
use smilecam::detector::SmileDetector;
use smilecam::error::SmileError;
use smilecam::face::Dimensions;
use smilecam::gateway::OnnxGateway;
use smilecam::overlay::{Canvas, OverlayStyle};
use smilecam::scoring::ScoringPolicy;
use smilecam::ui::run_ui;
use smilecam::video::{CameraProfile, VideoFeed};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Config file to read from
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    detector: DetectorArgs,

    #[command(flatten)]
    camera: CameraArgs,

    /// Directory holding the ONNX models
    #[arg(short, long, value_name = "DIR")]
    models: Option<PathBuf>,

    /// Initial brightness filter, 50-150
    #[arg(short, long)]
    brightness: Option<i32>,

    /// Where photos are written
    #[arg(long, value_name = "FILE")]
    photo: Option<PathBuf>,

    /// TTF font for expression labels
    #[arg(long, value_name = "FILE")]
    font: Option<PathBuf>,

    /// Log destination while the control panel is up
    #[arg(long, value_name = "FILE", default_value = "smilecam.log")]
    log_file: PathBuf,

    /// Process single input frame, reading from input path
    #[arg(short, long, requires = "output")]
    input: Option<PathBuf>,

    /// Process single input frame, writing to output path
    #[arg(short, long, requires = "input")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DetectorArgs {
    /// Milliseconds between detection ticks
    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(short, long, value_enum)]
    policy: Option<ScoringPolicy>,

    #[arg(long, value_enum)]
    overlay: Option<OverlayStyle>,

    /// Draw every detected face, not only the first
    #[arg(long)]
    all_faces: bool,

    /// Don't archive scores when detection stops
    #[arg(long)]
    no_history: bool,
}

#[derive(Args, Debug)]
struct CameraArgs {
    /// Camera index, last enumerated device if unset
    #[arg(long)]
    camera: Option<u32>,

    #[arg(long, value_enum)]
    profile: Option<CameraProfile>,

    /// Pick the camera profile from a user agent string
    #[arg(long)]
    user_agent: Option<String>,

    #[arg(long)]
    fps: Option<u32>,

    /// Don't open the preview window
    #[arg(long)]
    no_preview: bool,
}

impl CmdArgs {
    /// Flags that were given, shaped like a config file so they can be
    /// layered on top of one.
    fn overrides(&self) -> FileConfig {
        FileConfig {
            detector: DetectorSection {
                interval_ms: self.detector.interval_ms,
                policy: self.detector.policy,
                weights: None,
                history: self.detector.no_history.then_some(false),
                all_faces: self.detector.all_faces.then_some(true),
            },
            overlay: OverlaySection {
                style: self.detector.overlay,
                font: self.font.clone(),
                color: None,
            },
            camera: CameraSection {
                index: self.camera.camera,
                profile: self.camera.profile,
                user_agent: self.camera.user_agent.clone(),
                fps: self.camera.fps,
                preview: self.camera.no_preview.then_some(false),
            },
            models: ModelsSection {
                dir: self.models.clone(),
                ..ModelsSection::default()
            },
            capture: CaptureSection {
                brightness: self.brightness,
                photo: self.photo.clone(),
            },
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter);

    match log_file {
        // the control panel owns the terminal
        Some(path) => fmt
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .init(),
        None => fmt.init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = CmdArgs::parse();

    let single = args.input.is_some();
    init_tracing((!single).then_some(args.log_file.as_path()))?;

    let mut file = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    file.merge(args.overrides());
    let config = Config::try_from(file)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match (args.input, args.output) {
        (Some(input), Some(output)) => runtime.block_on(process_image(&config, &input, &output)),
        _ => runtime.block_on(run(config)),
    }
}

fn new_canvas(config: &Config, size: Dimensions) -> Canvas {
    Canvas::new(size)
        .with_color(config.color)
        .with_font_file(&config.font)
}

async fn process_image(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let img = image::open(input)?.into_rgb8();
    let canvas = Mutex::new(new_canvas(config, Dimensions::of(&img)));

    let mut detector = SmileDetector::new(OnnxGateway::new(config.models.clone()), config.detector);
    detector.prepare(async { Ok(()) }).await?;
    let outcome = detector.tick(Some(&img), Some(&canvas)).await?;
    info!("{outcome:?}");

    let canvas = canvas
        .into_inner()
        .map_err(|_| anyhow!("overlay canvas lock poisoned"))?;
    canvas
        .composite_over(&config.capture.apply(&img))
        .save(output)?;

    info!("Result at {}", output.display());
    println!("{}", detector.score());
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let canvas = Arc::new(Mutex::new(new_canvas(
        &config,
        config.camera.profile.resolution(),
    )));
    let settings = Arc::new(RwLock::new(config.capture));
    let (feed, granted) =
        VideoFeed::start(config.camera.clone(), settings.clone(), canvas.clone());

    let (command_tx, command_rx) = flume::unbounded();
    let (snapshot_tx, snapshot_rx) = flume::unbounded();
    let ui = thread::spawn(move || run_ui(command_tx, snapshot_rx));

    let detector = SmileDetector::new(OnnxGateway::new(config.models.clone()), config.detector);
    let mut app = App::new(
        detector,
        feed,
        canvas,
        settings,
        config.interval,
        config.photo.clone(),
        snapshot_tx,
    );

    let camera = async move {
        granted.await.unwrap_or_else(|_| {
            Err(SmileError::CameraUnavailable("capture thread exited".to_string()).into())
        })
    };
    app.prepare(camera).await;
    app.run(command_rx).await?;

    // stops the camera and closes the snapshot channel
    drop(app);

    match ui.join() {
        Ok(res) => res,
        Err(_) => {
            error!("Control panel thread panicked");
            Err(anyhow!("control panel crashed"))
        }
    }
}
