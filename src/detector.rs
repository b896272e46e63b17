//! Detection state machine and the per-tick capture, detect, score, draw
//! cycle.

use std::future::Future;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use image::RgbImage;
use tracing::{Instrument, Level, debug, error, info, span, trace, warn};

use crate::error::SmileError;
use crate::face::Dimensions;
use crate::gateway::ModelGateway;
use crate::overlay::{Canvas, OverlayStyle, face_ops};
use crate::scoring::{Scorer, SmileScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting on models and camera
    Idle,
    Ready,
    Detecting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame or canvas not available yet
    Skipped,
    NoFace,
    Face { score: Option<SmileScore> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreHistory(Vec<SmileScore>);

impl ScoreHistory {
    pub fn push(&mut self, score: SmileScore) {
        self.0.push(score)
    }

    pub fn scores(&self) -> &[SmileScore] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub scorer: Scorer,
    pub overlay: OverlayStyle,
    /// Archive the score on stop
    pub history: bool,
    /// Draw every face rather than only the first. The score always comes
    /// from the first face.
    pub all_faces: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        DetectorOptions {
            scorer: Scorer::default(),
            overlay: OverlayStyle::Mouth,
            history: true,
            all_faces: false,
        }
    }
}

pub struct SmileDetector<G> {
    gateway: G,
    options: DetectorOptions,
    state: DetectorState,
    score: SmileScore,
    history: ScoreHistory,
}

impl<G: ModelGateway> SmileDetector<G> {
    pub fn new(gateway: G, options: DetectorOptions) -> SmileDetector<G> {
        SmileDetector {
            gateway,
            options,
            state: DetectorState::Idle,
            score: 0,
            history: ScoreHistory::default(),
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn score(&self) -> SmileScore {
        self.score
    }

    pub fn history(&self) -> &ScoreHistory {
        &self.history
    }

    /// Loads the models while `camera` is granted. Both must succeed to
    /// leave Idle; a failure is logged and not retried.
    pub async fn prepare<C>(&mut self, camera: C) -> Result<()>
    where
        C: Future<Output = Result<()>>,
    {
        if self.state != DetectorState::Idle {
            return Ok(());
        }

        let (models, camera) = tokio::join!(
            self.gateway
                .load_models()
                .instrument(span!(Level::INFO, "load_models")),
            camera
        );

        if let Err(e) = &models {
            error!("Error loading models: {e:#}");
        }
        if let Err(e) = &camera {
            error!("Error accessing webcam: {e:#}");
        }

        match (models, camera) {
            (Ok(()), Ok(())) => {
                self.state = DetectorState::Ready;
                info!("Ready");
                Ok(())
            }
            // the camera failure is the one the user can do something about
            (_, Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    /// Ready or Stopped -> Detecting.
    pub fn start(&mut self) -> bool {
        match self.state {
            DetectorState::Ready | DetectorState::Stopped => {
                self.state = DetectorState::Detecting;
                info!("Detection started");
                true
            }
            DetectorState::Idle => {
                warn!("Can't start detection before models and camera are ready");
                false
            }
            DetectorState::Detecting => false,
        }
    }

    /// Detecting -> Stopped, archiving the latest score.
    pub fn stop(&mut self) -> bool {
        if self.state != DetectorState::Detecting {
            return false;
        }

        self.state = DetectorState::Stopped;
        if self.options.history {
            self.history.push(self.score);
        }
        info!("Detection stopped at {}", self.score);
        true
    }

    pub fn toggle(&mut self) -> bool {
        match self.state {
            DetectorState::Detecting => self.stop(),
            _ => self.start(),
        }
    }

    /// One capture, detect, score, draw cycle.
    ///
    /// `frame` is None until the video has produced something; a missing
    /// canvas or frame skips the tick without error. The canvas lock is
    /// only taken after detection finishes.
    pub async fn tick(
        &mut self,
        frame: Option<&RgbImage>,
        canvas: Option<&Mutex<Canvas>>,
    ) -> Result<TickOutcome> {
        let (Some(frame), Some(canvas)) = (frame, canvas) else {
            trace!("Video or canvas not mounted, skipping tick");
            return Ok(TickOutcome::Skipped);
        };

        let faces = self
            .gateway
            .detect(frame)
            .instrument(span!(Level::DEBUG, "tick_detect"))
            .await
            .map_err(|e| match e.downcast::<SmileError>() {
                Ok(e) => anyhow!(e),
                Err(e) => anyhow!(SmileError::Detection(format!("{e:#}"))),
            })?;

        span!(Level::DEBUG, "tick_draw").in_scope(|| -> Result<TickOutcome> {
            let mut canvas = canvas
                .lock()
                .map_err(|_| anyhow!("overlay canvas lock poisoned"))?;
            let faces = self.gateway.resize_results(
                faces,
                Dimensions::of(frame),
                canvas.dimensions(),
            );

            canvas.clear();

            let Some(first) = faces.first() else {
                debug!("No face");
                return Ok(TickOutcome::NoFace);
            };

            let score = self.options.scorer.score(first);
            if let Some(score) = score {
                self.score = score;
            }
            trace!("Score {score:?}");

            let drawn = if self.options.all_faces { faces.len() } else { 1 };
            for face in &faces[..drawn] {
                canvas.draw(&face_ops(face, self.options.overlay));
            }

            Ok(TickOutcome::Face { score })
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::face::tests::landmarks_with_mouth;
    use crate::face::{DetectedFace, Expressions};
    use crate::scoring::{GeometricWeights, ScoringPolicy};
    use crate::shapes::rect::Rect;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Replays canned detections; an empty queue yields no faces.
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub fail_load: bool,
        pub results: Mutex<VecDeque<Result<Vec<DetectedFace>>>>,
        pub calls: Arc<AtomicUsize>,
        pub in_flight: Arc<AtomicUsize>,
        pub delay: Duration,
    }

    impl FakeGateway {
        pub(crate) fn with_results(results: Vec<Result<Vec<DetectedFace>>>) -> FakeGateway {
            FakeGateway {
                results: Mutex::new(results.into()),
                ..FakeGateway::default()
            }
        }
    }

    impl ModelGateway for FakeGateway {
        async fn load_models(&mut self) -> Result<()> {
            if self.fail_load {
                return Err(SmileError::model_load("fake", "no such file").into());
            }
            Ok(())
        }

        async fn detect(&self, _frame: &RgbImage) -> Result<Vec<DetectedFace>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst);
            assert_eq!(concurrent, 0, "overlapping detect calls");
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// A face 200px wide whose neutral mouth is `width` wide.
    pub(crate) fn face_with_mouth_width(x: f32, width: f32) -> DetectedFace {
        let mut outer = vec![(x + 50., 100.); 12];
        outer[0] = (x + 50., 100.);
        outer[6] = (x + 50. + width, 100.);
        outer[3] = (x + 50. + width / 2., 100.);
        DetectedFace {
            bounding_box: Rect::new(x, 20., 200., 200.),
            landmarks: landmarks_with_mouth(&outer),
            expressions: [("neutral", 0.3), ("happy", 0.7)].into_iter().collect(),
        }
    }

    async fn ready(gateway: FakeGateway, options: DetectorOptions) -> SmileDetector<FakeGateway> {
        let mut detector = SmileDetector::new(gateway, options);
        detector.prepare(async { Ok(()) }).await.unwrap();
        detector
    }

    fn canvas() -> Mutex<Canvas> {
        Mutex::new(Canvas::new(Dimensions::new(640, 480)))
    }

    #[tokio::test]
    async fn test_prepare_requires_models_and_camera() {
        let mut detector = SmileDetector::new(FakeGateway::default(), DetectorOptions::default());
        let err = detector
            .prepare(async { Err(SmileError::CameraUnavailable("denied".into()).into()) })
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<SmileError>().unwrap().needs_alert());
        assert_eq!(detector.state(), DetectorState::Idle);
        assert!(!detector.start());

        let gateway = FakeGateway {
            fail_load: true,
            ..FakeGateway::default()
        };
        let mut detector = SmileDetector::new(gateway, DetectorOptions::default());
        assert!(detector.prepare(async { Ok(()) }).await.is_err());
        assert_eq!(detector.state(), DetectorState::Idle);

        let detector = ready(FakeGateway::default(), DetectorOptions::default()).await;
        assert_eq!(detector.state(), DetectorState::Ready);
    }

    #[tokio::test]
    async fn test_transitions() {
        let mut detector = ready(FakeGateway::default(), DetectorOptions::default()).await;

        assert!(!detector.stop());
        assert!(detector.start());
        assert_eq!(detector.state(), DetectorState::Detecting);
        assert!(!detector.start());
        assert!(detector.toggle());
        assert_eq!(detector.state(), DetectorState::Stopped);
        assert!(detector.toggle());
        assert_eq!(detector.state(), DetectorState::Detecting);
    }

    #[tokio::test]
    async fn test_tick_skips_without_frame_or_canvas() {
        let gateway = FakeGateway::default();
        let calls = gateway.calls.clone();
        let mut detector = ready(gateway, DetectorOptions::default()).await;
        let frame = RgbImage::new(640, 480);
        let canvas = canvas();

        assert_eq!(detector.tick(None, Some(&canvas)).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(detector.tick(Some(&frame), None).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tick_scores_first_face_and_keeps_stale_score() {
        let gateway = FakeGateway::with_results(vec![
            Ok(vec![face_with_mouth_width(0., 50.), face_with_mouth_width(300., 150.)]),
            Ok(vec![]),
        ]);
        let mut detector = ready(gateway, DetectorOptions::default()).await;
        let frame = RgbImage::new(640, 480);
        let canvas = canvas();

        let outcome = detector.tick(Some(&frame), Some(&canvas)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Face { score: Some(65) });
        assert_eq!(detector.score(), 65);
        {
            let c = canvas.lock().unwrap();
            // first face box drawn, second face left alone
            assert_eq!(c.image().get_pixel(0, 20)[3], 255);
            assert_eq!(c.image().get_pixel(300, 20)[3], 0);
        }

        let outcome = detector.tick(Some(&frame), Some(&canvas)).await.unwrap();
        assert_eq!(outcome, TickOutcome::NoFace);
        assert_eq!(detector.score(), 65);
        assert!(canvas.lock().unwrap().image().pixels().all(|p| p[3] == 0));
    }

    #[tokio::test]
    async fn test_tick_draws_all_faces_when_asked() {
        let gateway = FakeGateway::with_results(vec![Ok(vec![
            face_with_mouth_width(0., 50.),
            face_with_mouth_width(300., 150.),
        ])]);
        let options = DetectorOptions {
            all_faces: true,
            ..DetectorOptions::default()
        };
        let mut detector = ready(gateway, options).await;
        let canvas = canvas();

        detector
            .tick(Some(&RgbImage::new(640, 480)), Some(&canvas))
            .await
            .unwrap();

        assert_eq!(detector.score(), 65);
        assert_eq!(canvas.lock().unwrap().image().get_pixel(300, 20)[3], 255);
    }

    #[tokio::test]
    async fn test_tick_resizes_to_canvas() {
        let gateway = FakeGateway::with_results(vec![Ok(vec![face_with_mouth_width(0., 50.)])]);
        let mut detector = ready(gateway, DetectorOptions::default()).await;
        let canvas = canvas();

        // frame at half the canvas resolution: box lands at (0, 40)
        detector
            .tick(Some(&RgbImage::new(320, 240)), Some(&canvas))
            .await
            .unwrap();

        let c = canvas.lock().unwrap();
        assert_eq!(c.image().get_pixel(0, 40)[3], 255);
        assert_eq!(c.image().get_pixel(0, 20)[3], 0);
    }

    #[tokio::test]
    async fn test_probability_policy() {
        let gateway = FakeGateway::with_results(vec![Ok(vec![face_with_mouth_width(0., 50.)])]);
        let options = DetectorOptions {
            scorer: Scorer::new(ScoringPolicy::Probability, GeometricWeights::default()),
            ..DetectorOptions::default()
        };
        let mut detector = ready(gateway, options).await;

        detector
            .tick(Some(&RgbImage::new(640, 480)), Some(&canvas()))
            .await
            .unwrap();
        assert_eq!(detector.score(), 70);

        let mut face = face_with_mouth_width(0., 50.);
        face.expressions = Expressions::default();
        let gateway = FakeGateway::with_results(vec![Ok(vec![face])]);
        let mut detector = ready(gateway, options).await;
        detector
            .tick(Some(&RgbImage::new(640, 480)), Some(&canvas()))
            .await
            .unwrap();
        assert_eq!(detector.score(), 0);
    }

    #[tokio::test]
    async fn test_detection_error_is_reported() {
        let gateway = FakeGateway::with_results(vec![Err(anyhow!("backend exploded"))]);
        let mut detector = ready(gateway, DetectorOptions::default()).await;

        let err = detector
            .tick(Some(&RgbImage::new(640, 480)), Some(&canvas()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SmileError>(),
            Some(SmileError::Detection(_))
        ));
        assert_eq!(detector.score(), 0);
    }

    #[tokio::test]
    async fn test_stop_archives_only_latest_score() {
        let gateway = FakeGateway::with_results(vec![
            Ok(vec![face_with_mouth_width(0., 0.)]),
            Ok(vec![face_with_mouth_width(0., 100.)]),
            Ok(vec![face_with_mouth_width(0., 50.)]),
        ]);
        let mut detector = ready(gateway, DetectorOptions::default()).await;
        let frame = RgbImage::new(640, 480);
        let canvas = canvas();

        detector.start();
        let mut seen = Vec::new();
        for _ in 0..3 {
            detector.tick(Some(&frame), Some(&canvas)).await.unwrap();
            seen.push(detector.score());
        }
        assert_eq!(seen, vec![50, 80, 65]);

        detector.stop();
        assert_eq!(detector.history().scores(), &[65]);

        detector.start();
        detector.stop();
        assert_eq!(detector.history().scores(), &[65, 65]);
    }

    #[tokio::test]
    async fn test_history_disabled() {
        let options = DetectorOptions {
            history: false,
            ..DetectorOptions::default()
        };
        let mut detector = ready(FakeGateway::default(), options).await;
        detector.start();
        detector.stop();
        assert!(detector.history().is_empty());
    }
}
