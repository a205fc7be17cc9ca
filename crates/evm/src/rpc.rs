//! Rotating JSON-RPC transport over a pool of provider endpoints.
//!
//! Each request is dispatched to the earliest-available endpoint, tracked in
//! a min-heap keyed by "available at". A failing endpoint (network error,
//! non-2xx status, or a JSON-RPC error payload that is not a revert) is
//! parked behind an exponential backoff, or behind the server's
//! `Retry-After` on HTTP 429, and the request moves on to the next endpoint.
//! A success resets the endpoint's backoff.
//!
//! When every endpoint is parked the request fails immediately with
//! [`NoRpcAvailable`]. Waiting it out is left to the retry layers above.
//!
//! The heap lock is only held for selection and bookkeeping, never across a
//! network call.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use alloy::providers::RootProvider;
use alloy::rpc::client::RpcClient;
use alloy::rpc::json_rpc::{ErrorPayload, RequestPacket, ResponsePacket};
use alloy::transports::{TransportError, TransportErrorKind, TransportFut};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio::time::Instant;
use tower::Service;
use tracing::{debug, warn};
use url::Url;

use crate::RpcChain;
use crate::error_decoding::is_revert_payload;

/// Backoff bounds for a failing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(600),
        }
    }
}

impl BackoffPolicy {
    /// Backoff after one more consecutive failure.
    pub fn next(&self, current: Duration) -> Duration {
        if current.is_zero() {
            self.initial.min(self.max)
        } else {
            current.saturating_mul(2).min(self.max)
        }
    }
}

/// Connection settings shared by every chain's pool.
#[derive(Debug, Clone, Copy)]
pub struct RpcSettings {
    pub backoff: BackoffPolicy,
    pub request_timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("no RPC endpoint available: all {endpoints} endpoints are backing off")]
pub struct NoRpcAvailable {
    pub endpoints: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcPoolError {
    #[error("no RPC endpoints configured for chain {chain_id}")]
    Empty { chain_id: u64 },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    available_at: Instant,
    seq: u64,
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Endpoint {
    url: Url,
    backoff: Duration,
    /// Bumped whenever the endpoint is re-queued with a new availability;
    /// heap slots carrying an older generation are stale.
    generation: u64,
}

#[derive(Debug)]
struct PoolState {
    heap: BinaryHeap<Reverse<Slot>>,
    endpoints: Vec<Endpoint>,
    seq: u64,
}

impl PoolState {
    fn push(&mut self, available_at: Instant, index: usize) {
        self.seq += 1;
        let slot = Slot {
            available_at,
            seq: self.seq,
            index,
            generation: self.endpoints[index].generation,
        };
        self.heap.push(Reverse(slot));
    }
}

/// An endpoint handed out for a single request.
#[derive(Debug, Clone)]
pub struct Lease {
    index: usize,
    url: Url,
}

impl Lease {
    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }
}

/// Endpoint selection state for one chain.
#[derive(Debug)]
pub struct EndpointPool {
    state: Mutex<PoolState>,
    policy: BackoffPolicy,
}

impl EndpointPool {
    pub fn new(urls: Vec<Url>, policy: BackoffPolicy) -> Self {
        let now = Instant::now();
        let endpoints = urls
            .into_iter()
            .map(|url| Endpoint {
                url,
                backoff: Duration::ZERO,
                generation: 0,
            })
            .collect::<Vec<_>>();

        let mut state = PoolState {
            heap: BinaryHeap::with_capacity(endpoints.len()),
            endpoints,
            seq: 0,
        };
        for index in 0..state.endpoints.len() {
            state.push(now, index);
        }

        Self {
            state: Mutex::new(state),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the earliest-available endpoint, or fails if all are parked.
    ///
    /// The chosen endpoint is re-queued at `now` behind its peers so
    /// concurrent requests spread across the pool.
    pub fn acquire(&self, now: Instant) -> Result<Lease, NoRpcAvailable> {
        let mut state = self.lock();
        let endpoints = state.endpoints.len();

        while let Some(Reverse(slot)) = state.heap.pop() {
            if state.endpoints[slot.index].generation != slot.generation {
                continue;
            }

            if slot.available_at > now {
                state.heap.push(Reverse(slot));
                return Err(NoRpcAvailable { endpoints });
            }

            state.push(now, slot.index);
            return Ok(Lease {
                index: slot.index,
                url: state.endpoints[slot.index].url.clone(),
            });
        }

        Err(NoRpcAvailable { endpoints })
    }

    pub fn record_success(&self, lease: &Lease) {
        self.lock().endpoints[lease.index].backoff = Duration::ZERO;
    }

    /// Parks the endpoint and returns how long it stays unavailable.
    pub fn record_failure(
        &self,
        lease: &Lease,
        now: Instant,
        retry_after: Option<Duration>,
    ) -> Duration {
        let mut state = self.lock();
        let endpoint = &mut state.endpoints[lease.index];

        let backoff = retry_after.unwrap_or_else(|| self.policy.next(endpoint.backoff));
        endpoint.backoff = backoff;
        endpoint.generation += 1;

        state.push(now + backoff, lease.index);
        backoff
    }

    /// Current backoff of the endpoint at `index`.
    pub fn backoff(&self, index: usize) -> Option<Duration> {
        self.lock()
            .endpoints
            .get(index)
            .map(|endpoint| endpoint.backoff)
    }
}

#[derive(Debug, thiserror::Error)]
enum RequestFailure {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed JSON-RPC response: {0}")]
    Json(#[from] serde_json::Error),
}

/// alloy transport that fails over across an [`EndpointPool`].
#[derive(Debug, Clone)]
pub struct RotatingTransport {
    chain_id: u64,
    pool: Arc<EndpointPool>,
    client: reqwest::Client,
}

impl RotatingTransport {
    pub const fn new(chain_id: u64, pool: Arc<EndpointPool>, client: reqwest::Client) -> Self {
        Self {
            chain_id,
            pool,
            client,
        }
    }

    pub const fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    async fn dispatch(self, request: RequestPacket) -> Result<ResponsePacket, TransportError> {
        let mut last_error_response = None;

        loop {
            let lease = match self.pool.acquire(Instant::now()) {
                Ok(lease) => lease,
                // Every endpoint answered with the same kind of error: hand the
                // node's answer back rather than hiding it behind exhaustion.
                Err(exhausted) => {
                    return match last_error_response {
                        Some(response) => Ok(response),
                        None => Err(TransportErrorKind::custom(exhausted)),
                    };
                }
            };

            match self.post(lease.url(), &request).await {
                Ok(response) => match provider_error(&response) {
                    None => {
                        self.pool.record_success(&lease);
                        return Ok(response);
                    }
                    Some(payload) => {
                        let backoff = self.pool.record_failure(&lease, Instant::now(), None);
                        warn!(
                            chain_id = self.chain_id,
                            url = %lease.url(),
                            code = payload.code,
                            message = %payload.message,
                            ?backoff,
                            "RPC endpoint returned an error, rotating"
                        );
                        last_error_response = Some(response);
                    }
                },
                Err(RequestFailure::RateLimited { retry_after }) => {
                    let backoff = self.pool.record_failure(&lease, Instant::now(), retry_after);
                    warn!(
                        chain_id = self.chain_id,
                        url = %lease.url(),
                        ?backoff,
                        "RPC endpoint rate limited, rotating"
                    );
                }
                Err(err) => {
                    let backoff = self.pool.record_failure(&lease, Instant::now(), None);
                    warn!(
                        chain_id = self.chain_id,
                        url = %lease.url(),
                        error = %err,
                        ?backoff,
                        "RPC request failed, rotating"
                    );
                }
            }
        }
    }

    async fn post(
        &self,
        url: &Url,
        request: &RequestPacket,
    ) -> Result<ResponsePacket, RequestFailure> {
        debug!(chain_id = self.chain_id, %url, "Dispatching JSON-RPC request");

        let response = self.client.post(url.clone()).json(request).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RequestFailure::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }

        if !status.is_success() {
            return Err(RequestFailure::Status(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Service<RequestPacket> for RotatingTransport {
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        Box::pin(self.clone().dispatch(request))
    }
}

/// First error payload in a response that is held against the endpoint.
fn provider_error(response: &ResponsePacket) -> Option<&ErrorPayload> {
    let payload = match response {
        ResponsePacket::Single(single) => single.payload.as_error(),
        ResponsePacket::Batch(batch) => batch.iter().find_map(|item| item.payload.as_error()),
    };

    payload.filter(|payload| !is_revert_payload(payload))
}

/// `Retry-After` in delay-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let seconds = value.trim().parse::<f64>().ok()?;

    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

/// Connects to a chain through a rotating pool over `urls`.
pub fn connect(
    chain_id: u64,
    urls: Vec<Url>,
    settings: &RpcSettings,
) -> Result<RpcChain<RootProvider>, RpcPoolError> {
    if urls.is_empty() {
        return Err(RpcPoolError::Empty { chain_id });
    }

    let client = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()?;

    let pool = Arc::new(EndpointPool::new(urls, settings.backoff));
    let transport = RotatingTransport::new(chain_id, pool, client);
    let provider = RootProvider::new(RpcClient::new(transport, false));

    Ok(RpcChain::new(chain_id, provider))
}
