use clap::Parser;
use detection_proto::{
    read_message, write_message, DetectionResult, FrameRequest, Message, MessageKind,
    DEFAULT_MAX_MESSAGE_BYTES,
};
use std::path::PathBuf;
use tiled_detection::codec::encode_image_bytes;
use tokio::{
    net::{tcp::OwnedReadHalf, TcpStream},
    sync::mpsc,
    time::{sleep, timeout, timeout_at, Duration, Instant},
};

/// Sends image files to a tiled detection service and prints the results.
#[derive(Parser, Debug)]
#[command(name = "send-frame", version)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// How long to wait for each reply before treating the frame as dropped.
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    #[arg(required = true)]
    images: Vec<PathBuf>,
}

async fn connect(address: &str) -> anyhow::Result<TcpStream> {
    let mut retry_delay = Duration::from_millis(50);
    let max_retry_delay = Duration::from_secs(1);
    let max_retries = 10;

    for _ in 0..max_retries {
        match timeout(Duration::from_secs(1), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => tracing::error!("Failed to connect to {}: {}", address, e),
            Err(_) => tracing::error!("Connection to {} timed out", address),
        }

        let jitter = rand::random::<f32>() * 0.2 + 0.9;
        sleep(retry_delay.mul_f32(jitter)).await;
        retry_delay = (retry_delay * 2).min(max_retry_delay);
    }

    anyhow::bail!("Maximum connection retries exceeded for {}", address)
}

/// Reads replies on their own task so that giving up on a frame never
/// leaves half a message unread on the socket.
fn spawn_reader(mut reader: OwnedReadHalf) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader, DEFAULT_MAX_MESSAGE_BYTES).await {
                Ok(Some(message)) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read reply: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Waits for the reply to `frame_id`, skipping late replies to earlier
/// frames. `None` means the frame was dropped by the service.
async fn await_reply(
    replies: &mut mpsc::Receiver<Message>,
    frame_id: i64,
    wait: Duration,
) -> anyhow::Result<Option<DetectionResult>> {
    let deadline = Instant::now() + wait;

    loop {
        let message = match timeout_at(deadline, replies.recv()).await {
            Err(_) => return Ok(None),
            Ok(Some(message)) => message,
            Ok(None) => anyhow::bail!("Service closed the connection"),
        };

        if message.kind != MessageKind::DetectionResult {
            tracing::warn!("Ignoring `{}` message", message.kind.as_str());
            continue;
        }
        let result = message.as_detection_result()?;
        if result.frame_id == frame_id {
            return Ok(Some(result));
        }
        tracing::warn!("Skipping late reply for frame {}", result.frame_id);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let stream = connect(&address).await?;
    tracing::info!("Connected to {}", address);
    let (reader, mut writer) = stream.into_split();
    let mut replies = spawn_reader(reader);

    for (frame_id, path) in args.images.iter().enumerate() {
        let frame_id = frame_id as i64;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        let request = FrameRequest {
            frame_id,
            data: encode_image_bytes(&bytes),
        };
        write_message(&mut writer, &Message::frame_request(&request)?).await?;

        match await_reply(&mut replies, frame_id, Duration::from_millis(args.timeout_ms)).await? {
            Some(result) => {
                tracing::info!(
                    frame_id,
                    "{:?}: {} detections in {:.1} ms",
                    path,
                    result.detections.len(),
                    result.processing_time_ms
                );
                for detection in &result.detections {
                    tracing::info!(
                        "  {} ({}) {:.2} [{}, {}, {}, {}]",
                        detection.class_name,
                        detection.class_id,
                        detection.confidence,
                        detection.bbox.x1,
                        detection.bbox.y1,
                        detection.bbox.x2,
                        detection.bbox.y2
                    );
                }
            }
            None => tracing::warn!(frame_id, "{:?}: no reply, frame was dropped", path),
        }
    }

    Ok(())
}
