use crate::{
    config::Config,
    detector::Detector,
    labels::Labels,
    ort_detector::OrtDetector,
    pipeline::TiledPipeline,
    session::{SessionConfig, SessionController},
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal, time::Duration};

/// Back-off after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts clients one at a time and serves each to completion before
/// accepting the next.
pub struct DetectionServer<D: Detector> {
    listener: TcpListener,
    pipeline: Arc<TiledPipeline<D>>,
    session_config: SessionConfig,
}

impl<D: Detector> DetectionServer<D> {
    pub async fn bind(
        addr: &str,
        pipeline: Arc<TiledPipeline<D>>,
        session_config: SessionConfig,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            pipeline,
            session_config,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };
        self.run_until(shutdown).await
    }

    /// Serves until `shutdown` resolves. An in-flight session is closed, and
    /// its statistics reported, before returning.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Detection service listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let mut session =
                SessionController::new(self.pipeline.clone(), self.session_config, peer.to_string());
            let interrupted = tokio::select! {
                _ = session.run(stream) => false,
                _ = &mut shutdown => true,
            };
            session.close();

            if interrupted {
                break;
            }
        }

        tracing::info!("Detection service stopped");
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let labels = Labels::load(&config.model.get_labels_path())?;
    let detector = OrtDetector::new(&config.model, labels)?;
    let pipeline = TiledPipeline::new(Arc::new(detector), &config.pipeline)?;
    tracing::info!(
        tile_size = config.pipeline.tile_size,
        overlap = config.pipeline.overlap,
        score_threshold = config.pipeline.score_threshold,
        nms_threshold = config.pipeline.nms_threshold,
        "Tiled pipeline ready"
    );

    let addr = config.server.get_address();
    let session_config = SessionConfig::new(&config.server, &config.pipeline);
    let server = DetectionServer::bind(&addr, Arc::new(pipeline), session_config).await?;

    server.run().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
