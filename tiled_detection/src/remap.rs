use crate::{detector::LocalDetection, tiling::TileRect};
use detection_proto::{BoundingBox, Detection};

/// Shifts tile-local detections by the tile origin into frame coordinates.
///
/// Edges are truncated toward zero to whole pixels after the shift, then
/// clamped to `[0, frame_width) x [0, frame_height)`. A box left with no
/// area after clamping is dropped.
pub fn remap<I>(local: I, tile: &TileRect, frame_width: u32, frame_height: u32) -> Vec<Detection>
where
    I: IntoIterator<Item = LocalDetection>,
{
    local
        .into_iter()
        .filter_map(|d| {
            let x1 = to_global(d.x1, tile.x, frame_width);
            let y1 = to_global(d.y1, tile.y, frame_height);
            let x2 = to_global(d.x2, tile.x, frame_width);
            let y2 = to_global(d.y2, tile.y, frame_height);
            if x1 >= x2 || y1 >= y2 {
                tracing::debug!(
                    class_id = d.class_id,
                    "Dropping degenerate box ({}, {}, {}, {}) after remap",
                    x1,
                    y1,
                    x2,
                    y2
                );
                return None;
            }
            Some(Detection {
                class_id: d.class_id,
                class_name: d.class_name,
                confidence: d.confidence,
                bbox: BoundingBox::new(x1, y1, x2, y2),
            })
        })
        .collect()
}

fn to_global(local: f32, origin: u32, extent: u32) -> i32 {
    let max = extent.saturating_sub(1).min(i32::MAX as u32) as i64;
    let global = (local as f64 + origin as f64) as i64;
    global.clamp(0, max) as i32
}
