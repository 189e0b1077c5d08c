//! Pooled channel management.
//!
//! The pool owns at most one channel per peer address. Registering an
//! endpoint is cheap and synchronous; the TCP dial happens lazily on the
//! first acquire. An endpoint whose dial failed stays in the pool as
//! unreachable and acquires as absent from then on.

use crate::address::PeerAddress;
use crate::channel::TcpChannel;
use crate::envelope::RequestEnvelope;
use crate::error::ChannelError;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default budget for one complete call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(2500);
/// Default budget for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration applied to every channel the pool opens.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Budget for establishing a TCP connection.
    pub connect_timeout: Duration,
    /// Budget for one complete call on an established channel.
    pub call_timeout: Duration,
}

impl PoolConfig {
    /// Create a configuration with the default timeouts.
    pub fn new() -> Self {
        PoolConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the budget for establishing a TCP connection.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the budget for one complete call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::new()
    }
}

/// A cheaply cloneable handle to one pooled channel.
///
/// Clones share the underlying channel; calls on one handle serialize with
/// calls on its clones, while calls on handles to different peers proceed
/// concurrently.
#[derive(Debug, Clone)]
pub struct PooledChannel {
    address: PeerAddress,
    inner: Arc<Mutex<TcpChannel>>,
}

impl PooledChannel {
    fn new(address: PeerAddress, channel: TcpChannel) -> Self {
        PooledChannel {
            address,
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// The peer this channel is connected to.
    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Issue one remote call and await its response payload.
    pub async fn call(
        &self,
        method: &str,
        request: &RequestEnvelope,
    ) -> Result<Value, ChannelError> {
        self.inner.lock().await.call(method, request).await
    }

    /// Close the channel, ignoring shutdown errors on already-dead streams.
    async fn close(&self) {
        if let Err(err) = self.inner.lock().await.close().await {
            debug!("error closing channel to {}: {err}", self.address);
        }
    }
}

/// Slot state for one registered endpoint.
#[derive(Debug)]
enum PoolEntry {
    /// Registered but not yet dialed.
    Pending,
    /// Live channel.
    Connected(PooledChannel),
    /// Dial failed; acquires report the endpoint as absent.
    Unreachable,
}

/// A pool of channels, one per peer address.
#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    entries: HashMap<PeerAddress, PoolEntry>,
}

impl ConnectionPool {
    /// Create an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        ConnectionPool {
            config,
            entries: HashMap::new(),
        }
    }

    /// Register an endpoint if the pool does not already track it.
    ///
    /// No I/O happens here; the dial is deferred to the first
    /// [`acquire`](ConnectionPool::acquire).
    pub fn open_if_absent(&mut self, address: PeerAddress) {
        self.entries.entry(address).or_insert(PoolEntry::Pending);
    }

    /// Fetch the channel for an address, dialing it on first use.
    ///
    /// Returns [`None`] for addresses never registered, endpoints whose dial
    /// failed, and dials that fail now. A failed dial is remembered; the
    /// endpoint is not retried.
    pub async fn acquire(&mut self, address: &PeerAddress) -> Option<PooledChannel> {
        match self.entries.get(address) {
            None => return None,
            Some(PoolEntry::Connected(channel)) => return Some(channel.clone()),
            Some(PoolEntry::Unreachable) => return None,
            Some(PoolEntry::Pending) => {}
        }

        match TcpChannel::connect(
            *address,
            self.config.connect_timeout,
            self.config.call_timeout,
        )
        .await
        {
            Ok(channel) => {
                debug!("connected to {address}");
                let pooled = PooledChannel::new(*address, channel);
                self.entries
                    .insert(*address, PoolEntry::Connected(pooled.clone()));
                Some(pooled)
            }
            Err(err) => {
                debug!("connection to {address} unavailable: {err}");
                self.entries.insert(*address, PoolEntry::Unreachable);
                None
            }
        }
    }

    /// Close every live channel and forget all endpoints.
    pub async fn disconnect_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let PoolEntry::Connected(channel) = entry {
                channel.close().await;
            }
        }
    }

    /// Whether the pool tracks an endpoint for this address.
    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.entries.contains_key(address)
    }

    /// Number of tracked endpoints, in any state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool tracks no endpoints at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
