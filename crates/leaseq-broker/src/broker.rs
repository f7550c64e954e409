use crate::{config::BrokerConfig, dispatcher::Dispatcher, metrics::BrokerMetrics};
use leaseq_core::{Clock, SystemClock};
use leaseq_persistence::CheckpointStore;
use leaseq_protocol::{ProtocolError, RequestCodec, Response};

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::Framed;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Main broker server.
///
/// Every connection carries exactly one request and one response: the broker
/// reads a request, answers it, then closes its write side.
pub struct Broker {
    config: Arc<BrokerConfig>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<BrokerMetrics>,
    shutdown: Arc<Notify>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a broker on an explicit clock. Restores the checkpoint if one
    /// exists and refuses to start if it cannot be read.
    pub fn with_clock(config: BrokerConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let lease_timeout = config.lease_timeout()?;
        let store_config = config.to_checkpoint_store_config();
        let store = CheckpointStore::open(store_config.clone()).with_context(|| {
            format!(
                "failed to open checkpoint directory {:?}",
                store_config.checkpoint_dir
            )
        })?;
        let checkpoint_path = store.path().to_path_buf();

        let metrics = Arc::new(BrokerMetrics::new()?);
        let dispatcher = Dispatcher::open(store, lease_timeout, clock, metrics.clone())
            .with_context(|| format!("failed to restore checkpoint {:?}", checkpoint_path))?;

        info!(
            "Broker ready with {} tasks, lease timeout {}s",
            dispatcher.task_count(),
            config.leases.timeout_secs
        );

        Ok(Broker {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            metrics,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("Broker listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("New connection from {}", peer);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = broker.handle_connection(stream, peer).await {
                                    error!("Connection error from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Serve the single request of a connection
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, RequestCodec);

        let request =
            tokio::time::timeout(self.config.connection_timeout(), self.read_request(&mut framed))
                .await;

        let response = match request {
            Ok(Ok(Some(line))) => {
                debug!("Request from {}: {:?}", peer, line);
                let dispatcher = self.dispatcher.clone();
                tokio::task::spawn_blocking(move || dispatcher.handle_line(&line)).await?
            }
            Ok(Ok(None)) => {
                debug!("Connection from {} closed without a request", peer);
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!("Unreadable request from {}: {}", peer, e);
                self.metrics.inc_requests("invalid");
                self.metrics.inc_responses(Response::Error.outcome());
                Response::Error
            }
            Err(_) => {
                warn!("Connection from {} sent no request in time", peer);
                return Ok(());
            }
        };

        debug!("Response to {}: {}", peer, response);
        framed.send(response).await?;
        framed.get_mut().shutdown().await?;

        Ok(())
    }

    /// Read one request. It ends at a newline, at end of stream, or when the
    /// client goes quiet with bytes already buffered.
    async fn read_request(
        &self,
        framed: &mut Framed<TcpStream, RequestCodec>,
    ) -> Result<Option<String>, ProtocolError> {
        let idle = self.config.request_idle_timeout();

        loop {
            match tokio::time::timeout(idle, framed.next()).await {
                Ok(Some(Ok(line))) => {
                    self.reject_trailing_data(framed).await?;
                    return Ok(Some(line));
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Ok(None),
                Err(_) if framed.read_buffer().is_empty() => continue,
                Err(_) => {
                    let mut codec = *framed.codec();
                    let line = codec.take_partial(framed.read_buffer_mut())?;
                    if let Some(line) = &line {
                        warn!(
                            "Request framed after {}ms of silence without newline: {:?}",
                            idle.as_millis(),
                            line
                        );
                    }
                    return Ok(line);
                }
            }
        }
    }

    /// A connection carries a single request: anything but whitespace after
    /// the first line, up to end of stream or a quiet period, is an error.
    async fn reject_trailing_data(
        &self,
        framed: &mut Framed<TcpStream, RequestCodec>,
    ) -> Result<(), ProtocolError> {
        let idle = self.config.request_idle_timeout();

        loop {
            let buffered = framed.read_buffer();
            if buffered.iter().any(|b| !b.is_ascii_whitespace()) {
                return Err(ProtocolError::TrailingData(buffered.len()));
            }

            match tokio::time::timeout(idle, framed.next()).await {
                Ok(Some(Ok(extra))) if extra.trim().is_empty() => continue,
                Ok(Some(Ok(extra))) => return Err(ProtocolError::TrailingData(extra.len())),
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) | Err(_) => return Ok(()),
            }
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> Arc<BrokerConfig> {
        self.config.clone()
    }

    /// Stop accepting connections. In-flight requests still complete.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
