use crate::{
    codec::{decode_frame, DecodeError},
    config::{PipelineConfig, ServerConfig},
    detector::Detector,
    pipeline::{PipelineOutput, TiledPipeline},
};
use detection_proto::{
    read_message, write_message, DetectionResult, FrameRequest, Message, MessageKind,
    ProtocolError,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Semaphore,
};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub frame_timeout: Duration,
    pub max_message_bytes: u32,
}

impl SessionConfig {
    pub fn new(server: &ServerConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            frame_timeout: pipeline.frame_timeout(),
            max_message_bytes: server.max_message_bytes,
        }
    }
}

/// Counters for one connection. They only ever grow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub detections_emitted: u64,
    pub processing_time_ms: f64,
}

impl SessionStats {
    fn record(&mut self, detections: usize, elapsed_ms: f64) {
        self.frames_processed += 1;
        self.detections_emitted += detections as u64;
        self.processing_time_ms += elapsed_ms;
    }

    pub fn average_detections(&self) -> Option<f64> {
        (self.frames_processed > 0)
            .then(|| self.detections_emitted as f64 / self.frames_processed as f64)
    }

    pub fn average_processing_ms(&self) -> Option<f64> {
        (self.frames_processed > 0).then(|| self.processing_time_ms / self.frames_processed as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingRequest,
    Dispatching,
    Closed,
}

enum FrameOutcome {
    Completed(PipelineOutput),
    Dropped,
}

/// Serves one connection: one message in, at most one message out, strictly
/// in order.
///
/// Framing errors and peer disconnects close the session. Anything that goes
/// wrong with a single frame drops that frame without a reply and the session
/// keeps reading.
pub struct SessionController<D: Detector> {
    pipeline: Arc<TiledPipeline<D>>,
    config: SessionConfig,
    peer: String,
    state: SessionState,
    stats: SessionStats,
    /// One permit: at most one frame worker per connection, including one
    /// abandoned after a timeout.
    worker: Arc<Semaphore>,
}

impl<D: Detector> SessionController<D> {
    pub fn new(pipeline: Arc<TiledPipeline<D>>, config: SessionConfig, peer: impl Into<String>) -> Self {
        Self {
            pipeline,
            config,
            peer: peer.into(),
            state: SessionState::Idle,
            stats: SessionStats::default(),
            worker: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(peer = %self.peer, "Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the request/response loop until the peer goes away or the
    /// framing breaks, then closes the session.
    pub async fn run<S>(&mut self, stream: S) -> SessionStats
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state == SessionState::Closed {
            return self.stats.clone();
        }

        let (mut reader, mut writer) = tokio::io::split(stream);
        tracing::info!(peer = %self.peer, "Client connected");

        loop {
            self.transition(SessionState::AwaitingRequest);
            let message = match read_message(&mut reader, self.config.max_message_bytes).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!(peer = %self.peer, "Client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::error!(peer = %self.peer, "Closing connection: {}", e);
                    break;
                }
            };

            self.transition(SessionState::Dispatching);
            if let Err(e) = self.dispatch(&mut writer, message).await {
                tracing::error!(peer = %self.peer, "Closing connection: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        self.close();
        self.stats.clone()
    }

    /// Moves to `Closed` and reports the statistics. Later calls do nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closed);

        tracing::info!(
            peer = %self.peer,
            frames_processed = self.stats.frames_processed,
            detections_emitted = self.stats.detections_emitted,
            avg_detections_per_frame = self.stats.average_detections().unwrap_or(0.0),
            avg_processing_ms = self.stats.average_processing_ms().unwrap_or(0.0),
            "Session statistics"
        );
    }

    async fn dispatch<W>(&mut self, writer: &mut W, message: Message) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        match &message.kind {
            MessageKind::FrameRequest => match message.as_frame_request() {
                Ok(request) => self.handle_frame(writer, request).await,
                Err(e) => {
                    tracing::warn!(peer = %self.peer, "Dropping malformed frame_request: {}", e);
                    Ok(())
                }
            },
            other => {
                tracing::warn!(
                    peer = %self.peer,
                    "Ignoring message of unexpected type `{}`",
                    other.as_str()
                );
                Ok(())
            }
        }
    }

    async fn handle_frame<W>(&mut self, writer: &mut W, request: FrameRequest) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame_id = request.frame_id;
        tracing::debug!(frame_id, "Processing frame");

        let output = match self.process(request).await {
            FrameOutcome::Completed(output) => output,
            FrameOutcome::Dropped => return Ok(()),
        };

        let result = DetectionResult {
            frame_id,
            processing_time_ms: output.elapsed_ms(),
            detections: output.detections,
        };
        write_message(writer, &Message::detection_result(&result)?).await?;

        self.stats
            .record(result.detections.len(), result.processing_time_ms);
        tracing::info!(
            frame_id,
            detections = result.detections.len(),
            tiles = output.tiles,
            "Frame processed in {:.1} ms",
            result.processing_time_ms
        );
        Ok(())
    }

    /// Decodes and runs the pipeline on a blocking worker, bounded by the
    /// frame timeout. The detector cannot be interrupted, so a timed-out
    /// worker keeps the session's worker permit until the detector returns
    /// and the next frame waits for it before starting.
    async fn process(&self, request: FrameRequest) -> FrameOutcome {
        let frame_id = request.frame_id;
        if self.worker.available_permits() == 0 {
            tracing::debug!(frame_id, "Waiting for the previous frame worker to finish");
        }
        let permit = match self.worker.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(frame_id, "Frame worker unavailable: {}", e);
                return FrameOutcome::Dropped;
            }
        };

        let pipeline = self.pipeline.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<PipelineOutput, DecodeError> {
            let _permit = permit;
            let frame = decode_frame(&request)?;
            Ok(pipeline.run(&frame))
        });

        match tokio::time::timeout(self.config.frame_timeout, task).await {
            Ok(Ok(Ok(output))) => FrameOutcome::Completed(output),
            Ok(Ok(Err(e))) => {
                tracing::warn!(frame_id, "Dropping frame that failed to decode: {}", e);
                FrameOutcome::Dropped
            }
            Ok(Err(e)) => {
                tracing::error!(frame_id, "Frame worker failed: {}", e);
                FrameOutcome::Dropped
            }
            Err(_) => {
                tracing::warn!(
                    frame_id,
                    "Dropping frame after {:?} without a result",
                    self.config.frame_timeout
                );
                FrameOutcome::Dropped
            }
        }
    }
}
