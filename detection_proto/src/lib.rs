mod framing;
mod message;

pub use framing::{read_message, write_message, ProtocolError, DEFAULT_MAX_MESSAGE_BYTES};
pub use message::{
    BoundingBox, Detection, DetectionResult, FrameRequest, Message, MessageKind,
};
