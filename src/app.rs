//! Event loop tying the detector to the video feed, the overlay canvas and
//! the control panel.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Result, anyhow};
use image::RgbImage;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Level, error, info, span, trace, warn};

use crate::detector::{DetectorState, SmileDetector};
use crate::error::SmileError;
use crate::gateway::ModelGateway;
use crate::overlay::Canvas;
use crate::scoring::SmileScore;
use crate::settings::CaptureSettings;
use crate::video::VideoFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleDetection,
    TakePhoto,
    SetBrightness(i32),
    AdjustBrightness(i32),
    Quit,
}

/// What the control panel shows.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: DetectorState,
    pub score: SmileScore,
    pub history: Vec<SmileScore>,
    pub brightness: i32,
    pub status: Option<String>,
    /// Blocking message the user has to dismiss
    pub alert: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            state: DetectorState::Idle,
            score: 0,
            history: Vec::new(),
            brightness: CaptureSettings::default().brightness(),
            status: None,
            alert: None,
        }
    }
}

pub trait FrameSource {
    fn current_frame(&self) -> Option<RgbImage>;
}

impl FrameSource for VideoFeed {
    fn current_frame(&self) -> Option<RgbImage> {
        VideoFeed::current_frame(self)
    }
}

pub struct App<G, F> {
    detector: SmileDetector<G>,
    frames: F,
    canvas: Arc<Mutex<Canvas>>,
    settings: Arc<RwLock<CaptureSettings>>,
    interval: Duration,
    photo: PathBuf,
    snapshots: flume::Sender<Snapshot>,
    status: Option<String>,
    alert: Option<String>,
}

impl<G: ModelGateway, F: FrameSource> App<G, F> {
    pub fn new(
        detector: SmileDetector<G>,
        frames: F,
        canvas: Arc<Mutex<Canvas>>,
        settings: Arc<RwLock<CaptureSettings>>,
        interval: Duration,
        photo: PathBuf,
        snapshots: flume::Sender<Snapshot>,
    ) -> App<G, F> {
        App {
            detector,
            frames,
            canvas,
            settings,
            interval,
            photo,
            snapshots,
            status: None,
            alert: None,
        }
    }

    pub fn detector(&self) -> &SmileDetector<G> {
        &self.detector
    }

    /// Waits for models and camera. Failures leave the detector Idle; a
    /// camera failure also raises an alert.
    pub async fn prepare<C>(&mut self, camera: C)
    where
        C: Future<Output = Result<()>>,
    {
        self.status = Some("Loading models...".to_string());
        self.publish();

        match self.detector.prepare(camera).await {
            Ok(()) => self.status = Some("Ready, press space to start".to_string()),
            Err(e) => {
                let needs_alert = e
                    .downcast_ref::<SmileError>()
                    .is_some_and(SmileError::needs_alert);
                if needs_alert {
                    self.alert = Some(format!("{e}"));
                }
                self.status = Some(format!("Not ready: {e}"));
            }
        }
        self.publish();
    }

    /// Applies one command, false once the app should exit.
    pub fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::ToggleDetection => {
                if !self.detector.toggle() && self.detector.state() == DetectorState::Idle {
                    self.status = Some("Models or camera not ready".to_string());
                }
            }
            Command::TakePhoto => self.take_photo(),
            Command::SetBrightness(v) => self.update_settings(|s| s.set_brightness(v)),
            Command::AdjustBrightness(d) => self.update_settings(|s| s.adjust_brightness(d)),
            Command::Quit => return false,
        }
        true
    }

    fn update_settings<U: FnOnce(&mut CaptureSettings) -> i32>(&mut self, update: U) {
        match self.settings.write() {
            Ok(mut settings) => {
                let v = update(&mut settings);
                trace!("Video filter {}", settings.filter());
                self.status = Some(format!("Brightness {v}%"));
            }
            Err(_) => error!("Capture settings lock poisoned"),
        }
    }

    fn take_photo(&mut self) {
        let res = self
            .canvas
            .lock()
            .map_err(|_| anyhow!("overlay canvas lock poisoned"))
            .and_then(|canvas| canvas.export_png(&self.photo));

        match res {
            Ok(()) => {
                info!("Saved photo to {}", self.photo.display());
                self.status = Some(format!("Saved {}", self.photo.display()));
            }
            Err(e) => {
                warn!("Photo failed: {e:#}");
                self.status = Some(format!("Photo failed: {e}"));
            }
        }
    }

    async fn guarded_tick(&mut self) {
        let frame = self.frames.current_frame();
        let res = self
            .detector
            .tick(frame.as_ref(), Some(&*self.canvas))
            .instrument(span!(Level::DEBUG, "tick"))
            .await;
        match res {
            Ok(outcome) => trace!("{outcome:?}"),
            Err(e) => warn!("Skipping tick: {e:#}"),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.detector.state(),
            score: self.detector.score(),
            history: self.detector.history().scores().to_vec(),
            brightness: self
                .settings
                .read()
                .map(|s| s.brightness())
                .unwrap_or_default(),
            status: self.status.clone(),
            alert: self.alert.clone(),
        }
    }

    fn publish(&self) {
        // the panel may already be gone while shutting down
        let _ = self.snapshots.send(self.snapshot());
    }

    /// Runs until Quit or the command channel closes.
    ///
    /// Ticks are awaited in place: a timer firing that lands while a tick is
    /// still running is dropped, so at most one detection is in flight and
    /// a stop only takes effect once the current tick has drawn. Queued
    /// commands are served before a due tick, so nothing is detected after
    /// a stop that arrived mid-tick.
    pub async fn run(&mut self, commands: flume::Receiver<Command>) -> Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.publish();

        loop {
            let detecting = self.detector.state() == DetectorState::Detecting;
            tokio::select! {
                biased;

                cmd = commands.recv_async() => {
                    let Ok(cmd) = cmd else {
                        break;
                    };
                    if !self.handle(cmd) {
                        break;
                    }
                    if !detecting && self.detector.state() == DetectorState::Detecting {
                        interval.reset();
                    }
                }
                _ = interval.tick(), if detecting => self.guarded_tick().await,
            }
            self.publish();
        }

        info!("Shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorOptions;
    use crate::detector::tests::{FakeGateway, face_with_mouth_width};
    use crate::face::Dimensions;
    use std::sync::atomic::Ordering;

    struct StillFrames(Option<RgbImage>);

    impl FrameSource for StillFrames {
        fn current_frame(&self) -> Option<RgbImage> {
            self.0.clone()
        }
    }

    fn app(
        gateway: FakeGateway,
        frame: Option<RgbImage>,
    ) -> (App<FakeGateway, StillFrames>, flume::Receiver<Snapshot>) {
        let (tx, rx) = flume::unbounded();
        let app = App::new(
            SmileDetector::new(gateway, DetectorOptions::default()),
            StillFrames(frame),
            Arc::new(Mutex::new(Canvas::new(Dimensions::new(640, 480)))),
            Arc::new(RwLock::new(CaptureSettings::default())),
            Duration::from_millis(100),
            std::env::temp_dir().join("smilecam-app-test.png"),
            tx,
        );
        (app, rx)
    }

    #[tokio::test]
    async fn test_camera_denied_raises_alert() {
        let (mut app, snapshots) = app(FakeGateway::default(), None);
        app.prepare(async { Err(SmileError::CameraUnavailable("permission denied".into()).into()) })
            .await;

        let last = snapshots.drain().last().unwrap();
        assert_eq!(last.state, DetectorState::Idle);
        assert!(last.alert.unwrap().contains("permission denied"));

        // start is refused while idle
        assert!(app.handle(Command::ToggleDetection));
        assert_eq!(app.detector().state(), DetectorState::Idle);
    }

    #[tokio::test]
    async fn test_model_failure_is_not_an_alert() {
        let gateway = FakeGateway {
            fail_load: true,
            ..FakeGateway::default()
        };
        let (mut app, _snapshots) = app(gateway, None);
        app.prepare(async { Ok(()) }).await;

        let snap = app.snapshot();
        assert_eq!(snap.state, DetectorState::Idle);
        assert!(snap.alert.is_none());
        assert!(snap.status.unwrap().starts_with("Not ready"));
    }

    #[tokio::test]
    async fn test_brightness_commands() {
        let (mut app, _snapshots) = app(FakeGateway::default(), None);

        app.handle(Command::SetBrightness(120));
        assert_eq!(app.snapshot().brightness, 120);
        app.handle(Command::AdjustBrightness(50));
        assert_eq!(app.snapshot().brightness, 150);
        app.handle(Command::SetBrightness(0));
        assert_eq!(app.snapshot().brightness, 50);
        assert!(!app.handle(Command::Quit));
    }

    #[tokio::test]
    async fn test_take_photo() {
        let (mut app, _snapshots) = app(FakeGateway::default(), None);
        let path = app.photo.clone();

        app.handle(Command::TakePhoto);

        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (640, 480));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_and_archives_on_stop() {
        let gateway = FakeGateway::with_results(vec![
            Ok(vec![face_with_mouth_width(0., 0.)]),
            Ok(vec![face_with_mouth_width(0., 50.)]),
        ]);
        let calls = gateway.calls.clone();
        let (mut app, snapshots) = app(gateway, Some(RgbImage::new(640, 480)));
        app.prepare(async { Ok(()) }).await;

        let (tx, rx) = flume::unbounded();
        let driver = async move {
            tx.send(Command::ToggleDetection).unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            tx.send(Command::ToggleDetection).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(Command::Quit).unwrap();
        };
        let (res, ()) = tokio::join!(app.run(rx), driver);
        res.unwrap();

        // ticks at 100ms and 200ms, none after the stop
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(app.detector().history().scores(), &[65]);
        assert_eq!(app.detector().state(), DetectorState::Stopped);

        let last = snapshots.drain().last().unwrap();
        assert_eq!(last.history, vec![65]);
        assert_eq!(last.score, 65);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_detection_never_overlaps() {
        let gateway = FakeGateway {
            delay: Duration::from_millis(250),
            ..FakeGateway::default()
        };
        let calls = gateway.calls.clone();
        let (mut app, _snapshots) = app(gateway, Some(RgbImage::new(640, 480)));
        app.prepare(async { Ok(()) }).await;

        let (tx, rx) = flume::unbounded();
        let driver = async move {
            tx.send(Command::ToggleDetection).unwrap();
            tokio::time::sleep(Duration::from_millis(1000)).await;
            tx.send(Command::Quit).unwrap();
        };
        let (res, ()) = tokio::join!(app.run(rx), driver);
        res.unwrap();

        // FakeGateway panics on overlapping calls; a 250ms detect on a
        // 100ms timer gets through at most 4 ticks in a second
        let n = calls.load(Ordering::SeqCst);
        assert!((1..=4).contains(&n), "{n} ticks");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_slow_tick_wins_over_next_tick() {
        let gateway = FakeGateway {
            delay: Duration::from_millis(300),
            ..FakeGateway::with_results(vec![
                Ok(vec![face_with_mouth_width(0., 50.)]),
                Ok(vec![face_with_mouth_width(0., 0.)]),
            ])
        };
        let calls = gateway.calls.clone();
        let (mut app, _snapshots) = app(gateway, Some(RgbImage::new(640, 480)));
        app.prepare(async { Ok(()) }).await;

        let (tx, rx) = flume::unbounded();
        let driver = async move {
            tx.send(Command::ToggleDetection).unwrap();
            // lands while the 100ms tick is still detecting
            tokio::time::sleep(Duration::from_millis(150)).await;
            tx.send(Command::ToggleDetection).unwrap();
            tokio::time::sleep(Duration::from_millis(450)).await;
            tx.send(Command::Quit).unwrap();
        };
        let (res, ()) = tokio::join!(app.run(rx), driver);
        res.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.detector().history().scores(), &[65]);
        assert_eq!(app.detector().state(), DetectorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_is_skipped() {
        let gateway = FakeGateway::with_results(vec![
            Err(anyhow!("inference blew up")),
            Ok(vec![face_with_mouth_width(0., 50.)]),
        ]);
        let calls = gateway.calls.clone();
        let (mut app, _snapshots) = app(gateway, Some(RgbImage::new(640, 480)));
        app.prepare(async { Ok(()) }).await;

        let (tx, rx) = flume::unbounded();
        let driver = async move {
            tx.send(Command::ToggleDetection).unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            tx.send(Command::Quit).unwrap();
        };
        let (res, ()) = tokio::join!(app.run(rx), driver);
        res.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(app.detector().score(), 65);
        assert_eq!(app.detector().state(), DetectorState::Detecting);
    }

    #[tokio::test]
    async fn test_closed_channel_stops_loop() {
        let (mut app, _snapshots) = app(FakeGateway::default(), None);
        let (tx, rx) = flume::unbounded::<Command>();
        drop(tx);
        app.run(rx).await.unwrap();
    }
}
