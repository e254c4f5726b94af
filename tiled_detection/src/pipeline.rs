use crate::{
    config::PipelineConfig,
    detector::{Detector, DetectorAdapter},
    frame::Frame,
    merge::merge,
    remap::remap,
    tiling::{tiles, ConfigurationError, TilingConfig},
};
use detection_proto::Detection;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub detections: Vec<Detection>,
    /// Wall-clock time from partitioning to the end of the merge.
    pub elapsed: Duration,
    pub tiles: usize,
    pub candidates: usize,
}

impl PipelineOutput {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Partition, per-tile detection, remap and a single cross-tile merge.
///
/// Holds no per-frame state, so one instance can serve any number of frames
/// and connections.
pub struct TiledPipeline<D: Detector> {
    detector: DetectorAdapter<D>,
    tiling: TilingConfig,
    nms_threshold: f32,
    score_threshold: f32,
}

impl<D: Detector> TiledPipeline<D> {
    pub fn new(detector: Arc<D>, config: &PipelineConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            detector: DetectorAdapter::new(detector, config.score_threshold),
            tiling: config.tiling()?,
            nms_threshold: config.nms_threshold,
            score_threshold: config.score_threshold,
        })
    }

    pub fn run(&self, frame: &Frame) -> PipelineOutput {
        let start = Instant::now();
        let (width, height) = (frame.width(), frame.height());

        let mut tile_count = 0;
        let mut candidates = Vec::new();
        for tile in tiles(&frame.image, self.tiling) {
            tile_count += 1;
            let local = self.detector.detect(&tile);
            candidates.extend(remap(local, &tile.rect, width, height));
        }

        let candidate_count = candidates.len();
        let detections = merge(candidates, self.nms_threshold, self.score_threshold);
        let elapsed = start.elapsed();

        tracing::debug!(
            frame_id = frame.id,
            tiles = tile_count,
            candidates = candidate_count,
            detections = detections.len(),
            "Tiled detection finished in {:.1} ms",
            elapsed.as_secs_f64() * 1000.0
        );

        PipelineOutput {
            detections,
            elapsed,
            tiles: tile_count,
            candidates: candidate_count,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detector::{DetectorError, LocalDetection};
    use detection_proto::BoundingBox;
    use image::RgbImage;
    use std::{collections::VecDeque, sync::Mutex};

    pub(crate) type TileResult = Result<Vec<LocalDetection>, DetectorError>;

    /// Replays one scripted result per detector call; empty once exhausted.
    /// Records the size of every tile it is shown.
    #[derive(Default)]
    pub(crate) struct ScriptedDetector {
        script: Mutex<VecDeque<TileResult>>,
        pub(crate) seen: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedDetector {
        pub(crate) fn new(script: Vec<TileResult>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, pixels: &RgbImage, _conf_threshold: f32) -> TileResult {
            self.seen.lock().unwrap().push(pixels.dimensions());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub(crate) fn local(confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> LocalDetection {
        LocalDetection {
            class_id: 0,
            class_name: "drone".to_string(),
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    fn pipeline(detector: ScriptedDetector) -> (Arc<ScriptedDetector>, TiledPipeline<ScriptedDetector>) {
        let detector = Arc::new(detector);
        let pipeline = TiledPipeline::new(detector.clone(), &PipelineConfig::default()).unwrap();
        (detector, pipeline)
    }

    #[test]
    fn test_invalid_geometry_fails_at_construction() {
        let config = PipelineConfig {
            tile_size: 100,
            overlap: 100,
            ..PipelineConfig::default()
        };
        assert!(TiledPipeline::new(Arc::new(ScriptedDetector::default()), &config).is_err());
    }

    #[test]
    fn test_blank_frame_runs_every_tile() {
        let (detector, pipeline) = pipeline(ScriptedDetector::default());
        let frame = Frame::new(1, RgbImage::new(1000, 1000));

        let output = pipeline.run(&frame);

        assert_eq!(output.tiles, 4);
        assert!(output.detections.is_empty());
        assert_eq!(
            *detector.seen.lock().unwrap(),
            vec![(640, 640), (616, 640), (640, 616), (616, 616)]
        );
    }

    #[test]
    fn test_duplicate_across_tiles_is_merged() {
        // 1000x500 gives two tiles, at x = 0 and x = 384. The same object is
        // seen by both; global boxes have IoU 0.8.
        let (_, pipeline) = pipeline(ScriptedDetector::new(vec![
            Ok(vec![local(0.9, 400.0, 100.0, 500.0, 200.0)]),
            Ok(vec![local(0.7, 16.0, 100.0, 116.0, 180.0)]),
        ]));
        let frame = Frame::new(7, RgbImage::new(1000, 500));

        let output = pipeline.run(&frame);

        assert_eq!(output.tiles, 2);
        assert_eq!(output.candidates, 2);
        assert_eq!(output.detections.len(), 1);
        assert_eq!(output.detections[0].confidence, 0.9);
        assert_eq!(output.detections[0].bbox, BoundingBox::new(400, 100, 500, 200));
    }

    #[test]
    fn test_failing_tile_does_not_abort_frame() {
        let (_, pipeline) = pipeline(ScriptedDetector::new(vec![
            Ok(vec![local(0.8, 10.0, 10.0, 50.0, 50.0)]),
            Err(DetectorError::Inference("simulated fault".to_string())),
            Ok(vec![local(0.6, 10.0, 10.0, 50.0, 50.0)]),
            Ok(Vec::new()),
        ]));
        let frame = Frame::new(3, RgbImage::new(1000, 1000));

        let output = pipeline.run(&frame);

        assert_eq!(output.tiles, 4);
        let boxes: Vec<_> = output.detections.iter().map(|d| d.bbox).collect();
        assert_eq!(
            boxes,
            vec![
                BoundingBox::new(10, 10, 50, 50),
                BoundingBox::new(10, 394, 50, 434)
            ]
        );
    }

    #[test]
    fn test_candidates_below_score_threshold_never_surface() {
        let (_, pipeline) = pipeline(ScriptedDetector::new(vec![Ok(vec![
            local(0.05, 10.0, 10.0, 50.0, 50.0),
            local(0.2, 100.0, 100.0, 150.0, 150.0),
        ])]));
        let frame = Frame::new(4, RgbImage::new(300, 300));

        let output = pipeline.run(&frame);

        assert_eq!(output.candidates, 1);
        assert_eq!(output.detections.len(), 1);
        assert_eq!(output.detections[0].confidence, 0.2);
    }

    #[test]
    fn test_frame_is_untouched() {
        let (_, pipeline) = pipeline(ScriptedDetector::default());
        let image = RgbImage::from_pixel(700, 700, image::Rgb([9, 8, 7]));
        let frame = Frame::new(5, image.clone());

        pipeline.run(&frame);

        assert_eq!(frame.image, image);
    }
}
