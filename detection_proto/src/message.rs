use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Axis-aligned box in integral pixel coordinates, `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRequest {
    pub frame_id: i64,
    /// Encoded image (JPEG, PNG, ...) as base64 text.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub frame_id: i64,
    pub detections: Vec<Detection>,
    pub processing_time_ms: f64,
}

/// The `type` tag of a message. Tags this crate does not know are kept
/// verbatim so the receiver can log and skip them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    FrameRequest,
    DetectionResult,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::FrameRequest => "frame_request",
            MessageKind::DetectionResult => "detection_result",
            MessageKind::Other(tag) => tag,
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Other(String::new())
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "frame_request" => MessageKind::FrameRequest,
            "detection_result" => MessageKind::DetectionResult,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Tagged envelope carried by every frame on the wire:
/// `{"type": "...", "payload": {...}}`.
///
/// The payload stays untyped until the receiver asks for it, so a well-framed
/// message with a bad payload is a per-message problem rather than a framing
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn frame_request(request: &FrameRequest) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: MessageKind::FrameRequest,
            payload: serde_json::to_value(request)?,
        })
    }

    pub fn detection_result(result: &DetectionResult) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: MessageKind::DetectionResult,
            payload: serde_json::to_value(result)?,
        })
    }

    pub fn as_frame_request(&self) -> Result<FrameRequest, serde_json::Error> {
        FrameRequest::deserialize(&self.payload)
    }

    pub fn as_detection_result(&self) -> Result<DetectionResult, serde_json::Error> {
        DetectionResult::deserialize(&self.payload)
    }
}
