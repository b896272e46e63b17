use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use anyhow::Result;
use image::{EncodableLayout, RgbImage, RgbaImage};
use nokhwa::{
    Camera, nokhwa_initialize,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{Level, debug, error, info, span, trace, warn};

use crate::error::SmileError;
use crate::face::Dimensions;
use crate::overlay::Canvas;
use crate::settings::CaptureSettings;

const MOBILE_AGENTS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CameraProfile {
    /// 640x480
    #[default]
    Desktop,
    /// 320x240
    Mobile,
}

impl CameraProfile {
    pub fn from_user_agent(user_agent: &str) -> CameraProfile {
        let ua = user_agent.to_lowercase();
        if MOBILE_AGENTS.iter().any(|m| ua.contains(m)) {
            CameraProfile::Mobile
        } else {
            CameraProfile::Desktop
        }
    }

    /// Ideal capture size; the device may pick the closest it supports.
    pub fn resolution(&self) -> Dimensions {
        match self {
            CameraProfile::Desktop => Dimensions::new(640, 480),
            CameraProfile::Mobile => Dimensions::new(320, 240),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraOptions {
    /// Last enumerated device when unset
    pub index: Option<u32>,
    pub profile: CameraProfile,
    pub fps: u32,
    pub preview: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        CameraOptions {
            index: None,
            profile: CameraProfile::Desktop,
            fps: 30,
            preview: true,
        }
    }
}

pub fn create_input_stream(options: &CameraOptions) -> Result<Camera> {
    nokhwa_initialize(|granted| {
        debug!("User said {}", granted);
    });

    let index = match options.index {
        Some(i) => CameraIndex::Index(i),
        None => {
            let cameras = query(ApiBackend::Auto)?;
            cameras
                .iter()
                .for_each(|cam| debug!("Found camera: {:?}", cam));
            match cameras.last() {
                Some(cam) => cam.index().clone(),
                None => return Err(SmileError::CameraUnavailable("no camera found".into()).into()),
            }
        }
    };

    let size = options.profile.resolution();
    let format = CameraFormat::new(
        Resolution::new(size.width, size.height),
        FrameFormat::MJPEG,
        options.fps,
    );
    let mut camera = Camera::new(
        index,
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format)),
    )?;

    camera.open_stream()?;
    let resolution = camera.resolution();
    info!(
        "Camera opened at {}x{}",
        resolution.width(),
        resolution.height()
    );
    Ok(camera)
}

/// Raw RGBA frames piped into an `ffplay` window.
pub struct OutputVideoStream {
    output_proc: std::process::Child,
}

impl Drop for OutputVideoStream {
    fn drop(&mut self) {
        if let Err(e) = self.output_proc.kill() {
            error!("Failed to stop output process {e:?}");
        }
    }
}

impl OutputVideoStream {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let output_proc = Command::new("ffplay")
            .args([
                "-f",
                "rawvideo",
                "-pixel_format",
                "rgba",
                "-video_size",
                &format!("{}x{}", width, height),
                "-window_title",
                "smilecam",
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-loglevel",
                "error",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { output_proc })
    }

    pub fn write_frame(&mut self, img: &RgbaImage) -> Result<()> {
        if let Some(stdin) = self.output_proc.stdin.as_mut() {
            stdin.write_all(img.as_bytes())?;
        }

        Ok(())
    }
}

/// Handle to the capture thread. The newest frame is kept in `latest`;
/// dropping the feed stops the camera stream.
pub struct VideoFeed {
    latest: Arc<Mutex<Option<RgbImage>>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl VideoFeed {
    /// Starts capturing on a dedicated thread. The returned receiver
    /// resolves once the camera is granted and streaming, or failed to.
    pub fn start(
        options: CameraOptions,
        settings: Arc<RwLock<CaptureSettings>>,
        canvas: Arc<Mutex<Canvas>>,
    ) -> (VideoFeed, oneshot::Receiver<Result<()>>) {
        let latest = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let (granted_tx, granted_rx) = oneshot::channel();

        let thread_latest = Arc::clone(&latest);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let camera = match create_input_stream(&options) {
                Ok(c) => {
                    let _ = granted_tx.send(Ok(()));
                    c
                }
                Err(e) => {
                    let e = match e.downcast::<SmileError>() {
                        Ok(e) => e,
                        Err(e) => SmileError::CameraUnavailable(format!("{e:#}")),
                    };
                    let _ = granted_tx.send(Err(e.into()));
                    return;
                }
            };
            capture_loop(camera, &options, &thread_latest, &thread_stop, &settings, &canvas);
        });

        (
            VideoFeed {
                latest,
                stop,
                handle: Some(handle),
            },
            granted_rx,
        )
    }

    /// A copy of the newest frame, None before the first one arrives.
    pub fn current_frame(&self) -> Option<RgbImage> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }
}

impl Drop for VideoFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

fn capture_loop(
    mut camera: Camera,
    options: &CameraOptions,
    latest: &Mutex<Option<RgbImage>>,
    stop: &AtomicBool,
    settings: &RwLock<CaptureSettings>,
    canvas: &Mutex<Canvas>,
) {
    let resolution = camera.resolution();
    let mut preview = if options.preview {
        match OutputVideoStream::new(resolution.width(), resolution.height()) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Preview window unavailable: {e:?}");
                None
            }
        }
    } else {
        None
    };

    while !stop.load(Ordering::Relaxed) {
        let span = span!(Level::TRACE, "capture_frame");
        let _guard = span.enter();

        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to pull frame from webcam: {e:?}");
                break;
            }
        };
        let img: RgbImage = match frame.decode_image::<RgbFormat>() {
            Ok(img) => img,
            Err(e) => {
                warn!("Dropping undecodable frame: {e:?}");
                continue;
            }
        };

        if let Some(stream) = preview.as_mut() {
            let settings = settings.read().map(|s| *s).unwrap_or_default();
            let shown = settings.apply(&img);
            let composed = match canvas.lock() {
                Ok(c) => c.composite_over(&shown),
                Err(_) => image::DynamicImage::ImageRgb8(shown).into_rgba8(),
            };
            if let Err(e) = stream.write_frame(&composed) {
                warn!("Preview closed: {e:?}");
                preview = None;
            }
        }

        if let Ok(mut guard) = latest.lock() {
            *guard = Some(img);
        }
        trace!("Captured frame");
    }

    if let Err(e) = camera.stop_stream() {
        error!("Failed to stop camera stream: {e:?}");
    }
    info!("Camera released");
}
