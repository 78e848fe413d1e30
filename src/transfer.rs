// src/transfer.rs

use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tokio::sync::watch;
use tower::{Layer, Service};
use tracing::{debug, trace};

/// Errors surfaced by a single GET.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("receive limit exceeded: got {received} bytes, limit {limit}")]
    RecvLimitExceeded { limit: u64, received: u64 },
}

/// Lifecycle callbacks fired while a GET is in flight.
///
/// The executor gives no guarantee about how callbacks map to packets; implementors
/// must only rely on call order and the sizes reported.
pub trait TransferEvents {
    /// The connection is up and the request is being written. When no connection
    /// could be established this still fires once, right before `on_failure`.
    fn on_send_headers(&mut self);
    /// One inbound header line (status line included) of `size` bytes arrived.
    fn on_recv_header(&mut self, size: usize);
    /// A chunk of body data arrived.
    fn on_recv_data(&mut self, size: usize);
    /// The transfer failed. Always followed by `on_complete`.
    fn on_failure(&mut self, error: &TransferError);
    /// Called exactly once per transfer. `status` is 0 when no response arrived.
    fn on_complete(&mut self, status: u16);
}

/// A fully built GET, ready to execute.
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    pub url: String,
    pub headers: HeaderMap,
    /// Abort once more than this many body bytes arrived.
    pub recv_limit: Option<u64>,
}

/// Connector layer bumping a shared counter each time a connection (TLS included)
/// has been established.
#[derive(Debug, Clone)]
pub struct ConnectSignalLayer {
    connects: Arc<watch::Sender<u64>>,
}

impl ConnectSignalLayer {
    pub fn new() -> Self {
        let (connects, _) = watch::channel(0);
        Self {
            connects: Arc::new(connects),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.connects.subscribe()
    }

    pub fn connections(&self) -> u64 {
        *self.connects.borrow()
    }
}

impl Default for ConnectSignalLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for ConnectSignalLayer {
    type Service = ConnectSignal<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectSignal {
            inner,
            connects: self.connects.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectSignal<S> {
    inner: S,
    connects: Arc<watch::Sender<u64>>,
}

impl<S, R> Service<R> for ConnectSignal<S>
where
    S: Service<R>,
    S::Future: Send + 'static,
    S::Response: 'static,
    S::Error: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, target: R) -> Self::Future {
        let connecting = self.inner.call(target);
        let connects = self.connects.clone();
        Box::pin(async move {
            let conn = connecting.await?;
            connects.send_modify(|n| *n += 1);
            trace!("connection established");
            Ok(conn)
        })
    }
}

/// HTTP client plus the connect signal used to place `on_send_headers`.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    connects: ConnectSignalLayer,
}

impl Transport {
    /// Finish `builder` with the connect signal installed.
    pub fn new(builder: ClientBuilder) -> reqwest::Result<Self> {
        let connects = ConnectSignalLayer::new();
        let client = builder.connector_layer(connects.clone()).build()?;
        Ok(Self { client, connects })
    }

    /// Number of connections established so far.
    pub fn connections(&self) -> u64 {
        self.connects.connections()
    }

    /// Execute one GET, reporting its lifecycle into `events`.
    pub async fn perform_get<E: TransferEvents + ?Sized>(
        &self,
        request: &TransferRequest,
        events: &mut E,
    ) {
        let mut connected = self.connects.subscribe();
        let mut sending = pin!(self
            .client
            .get(&request.url)
            .headers(request.headers.clone())
            .send());
        let mut signalled = false;
        let result = loop {
            tokio::select! {
                biased;
                _ = connected.changed(), if !signalled => {
                    signalled = true;
                    events.on_send_headers();
                }
                result = &mut sending => break result,
            }
        };
        if !signalled {
            events.on_send_headers();
        }
        complete_get(result, request, events).await
    }
}

async fn complete_get<E: TransferEvents + ?Sized>(
    result: reqwest::Result<reqwest::Response>,
    request: &TransferRequest,
    events: &mut E,
) {
    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            debug!("request to {} failed: {}", request.url, e);
            events.on_failure(&TransferError::Network(e));
            events.on_complete(0);
            return;
        }
    };

    let status = resp.status();
    // "HTTP/1.1 200 OK\r\n"
    let status_line = format!(
        "{:?} {} {}\r\n",
        resp.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    events.on_recv_header(status_line.len());
    for (name, value) in resp.headers() {
        events.on_recv_header(name.as_str().len() + value.len() + 4);
    }

    if !status.is_success() {
        debug!("{} answered {}", request.url, status);
        events.on_complete(status.as_u16());
        return;
    }

    let mut received = 0u64;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("body of {} failed after {} bytes: {}", request.url, received, e);
                events.on_failure(&TransferError::Network(e));
                break;
            }
        };
        events.on_recv_data(bytes.len());
        received += bytes.len() as u64;
        if let Some(limit) = request.recv_limit {
            if received > limit {
                debug!("aborting {} after {} bytes", request.url, received);
                events.on_failure(&TransferError::RecvLimitExceeded { limit, received });
                break;
            }
        }
    }
    events.on_complete(status.as_u16());
}
