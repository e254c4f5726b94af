use detection_proto::{BoundingBox, Detection};

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> i64 {
    let width = (box1.x2.min(box2.x2) as i64 - box1.x1.max(box2.x1) as i64).max(0);
    let height = (box1.y2.min(box2.y2) as i64 - box1.y1.max(box2.y1) as i64).max(0);
    width * height
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> i64 {
    box1.area() + box2.area() - intersection(box1, box2)
}

/// Intersection over union of two boxes; `0.0` when both are empty.
pub fn iou(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let union = union(box1, box2);
    if union <= 0 {
        return 0.0;
    }
    (intersection(box1, box2) as f64 / union as f64) as f32
}

/// Greedy overlap suppression.
///
/// Candidates are ranked by `score`, highest first, with ties kept in input
/// order. The best remaining candidate is kept and every remaining one whose
/// overlap with it exceeds `threshold` is discarded, until none remain.
/// Survivors come back in rank order.
pub fn suppress<T, S, O>(mut candidates: Vec<T>, threshold: f32, score: S, overlap: O) -> Vec<T>
where
    S: Fn(&T) -> f32,
    O: Fn(&T, &T) -> f32,
{
    candidates.sort_by(|a, b| score(b).total_cmp(&score(a)));

    let mut suppressed = vec![false; candidates.len()];
    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        for j in i + 1..candidates.len() {
            if !suppressed[j] && overlap(&candidates[i], &candidates[j]) > threshold {
                suppressed[j] = true;
            }
        }
    }

    candidates
        .into_iter()
        .zip(suppressed)
        .filter_map(|(candidate, suppressed)| (!suppressed).then_some(candidate))
        .collect()
}

/// Collapses duplicates produced by overlapping tiles into one detection per
/// object. Suppression is class-agnostic.
///
/// Candidates scoring below `score_threshold` are discarded first. An empty
/// input yields an empty output.
pub fn merge(candidates: Vec<Detection>, nms_threshold: f32, score_threshold: f32) -> Vec<Detection> {
    let before = candidates.len();
    let candidates: Vec<Detection> = candidates
        .into_iter()
        .filter(|d| d.confidence >= score_threshold)
        .collect();

    let merged = suppress(
        candidates,
        nms_threshold,
        |d| d.confidence,
        |a, b| iou(&a.bbox, &b.bbox),
    );

    tracing::debug!(
        "Merged {} candidates into {} detections",
        before,
        merged.len()
    );
    merged
}
