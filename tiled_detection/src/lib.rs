mod frame;
mod labels;
mod ort_detector;
mod server;
mod session;

pub mod codec;
pub mod config;
pub mod detector;
pub mod merge;
pub mod pipeline;
pub mod remap;
pub mod tiling;

pub use detector::{Detector, DetectorAdapter, DetectorError, LocalDetection};
pub use frame::Frame;
pub use labels::Labels;
pub use ort_detector::OrtDetector;
pub use pipeline::{PipelineOutput, TiledPipeline};
pub use server::{start_server, DetectionServer};
pub use session::{SessionConfig, SessionController, SessionState, SessionStats};
