//! Seams between the crawl phases and the connection layer.
//!
//! The phases only ever need to hand out channels and issue calls, so they
//! are written against these two traits. Production uses the pool from
//! [`peermap_connection`]; tests swap in scripted mocks.

use peermap_connection::{
    ChannelError, ConnectionPool, PeerAddress, PooledChannel, RequestEnvelope,
};
use serde_json::Value;

/// A request channel to a single node.
pub(crate) trait PeerChannel: Send {
    fn call(
        &self,
        method: &str,
        request: &RequestEnvelope,
    ) -> impl std::future::Future<Output = Result<Value, ChannelError>> + Send;
}

/// Connection management as the crawl phases see it.
pub(crate) trait ChannelPool: Send {
    type Channel: PeerChannel + Send;

    /// Make an endpoint dialable later without connecting yet.
    fn open_if_absent(&mut self, address: PeerAddress);

    /// Hand out a channel to the endpoint, dialing on first use.
    fn acquire(
        &mut self,
        address: &PeerAddress,
    ) -> impl std::future::Future<Output = Option<Self::Channel>> + Send;

    /// Close every connection and forget all endpoints.
    fn disconnect_all(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

impl PeerChannel for PooledChannel {
    fn call(
        &self,
        method: &str,
        request: &RequestEnvelope,
    ) -> impl std::future::Future<Output = Result<Value, ChannelError>> + Send {
        PooledChannel::call(self, method, request)
    }
}

impl ChannelPool for ConnectionPool {
    type Channel = PooledChannel;

    fn open_if_absent(&mut self, address: PeerAddress) {
        ConnectionPool::open_if_absent(self, address);
    }

    fn acquire(
        &mut self,
        address: &PeerAddress,
    ) -> impl std::future::Future<Output = Option<PooledChannel>> + Send {
        ConnectionPool::acquire(self, address)
    }

    fn disconnect_all(&mut self) -> impl std::future::Future<Output = ()> + Send {
        ConnectionPool::disconnect_all(self)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MockChannelState {
        /// Scripted responses per method, consumed front to back.
        responses: HashMap<String, VecDeque<Result<Value, ChannelError>>>,
        /// Methods called, in order.
        calls: Vec<String>,
    }

    /// Scripted channel recording every call made through it.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockChannel {
        state: Arc<Mutex<MockChannelState>>,
    }

    impl MockChannel {
        pub(crate) fn new() -> Self {
            MockChannel::default()
        }

        /// Queue the next response for `method`.
        pub(crate) fn script(&self, method: &str, response: Result<Value, ChannelError>) {
            self.state
                .lock()
                .unwrap()
                .responses
                .entry(method.to_string())
                .or_default()
                .push_back(response);
        }

        /// How many times `method` was called.
        pub(crate) fn call_count(&self, method: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .calls
                .iter()
                .filter(|called| called.as_str() == method)
                .count()
        }

        /// Every method called on this channel, in order.
        pub(crate) fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }
    }

    impl PeerChannel for MockChannel {
        async fn call(
            &self,
            method: &str,
            _request: &RequestEnvelope,
        ) -> Result<Value, ChannelError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(method.to_string());
            state
                .responses
                .get_mut(method)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Err(ChannelError::Remote(format!(
                        "no scripted response for {method}"
                    )))
                })
        }
    }

    #[derive(Debug, Default)]
    struct MockPoolState {
        channels: HashMap<PeerAddress, MockChannel>,
        opened: Vec<PeerAddress>,
        disconnects: usize,
    }

    /// Pool handing out scripted channels; unrouted addresses acquire as
    /// absent, standing in for unreachable nodes.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockPool {
        state: Arc<Mutex<MockPoolState>>,
    }

    impl MockPool {
        pub(crate) fn new() -> Self {
            MockPool::default()
        }

        /// Route calls for `address` through `channel`.
        pub(crate) fn add_channel(&self, address: PeerAddress, channel: MockChannel) {
            self.state
                .lock()
                .unwrap()
                .channels
                .insert(address, channel);
        }

        /// Every address registered through `open_if_absent`, in order.
        pub(crate) fn opened(&self) -> Vec<PeerAddress> {
            self.state.lock().unwrap().opened.clone()
        }

        /// How many times `disconnect_all` ran.
        pub(crate) fn disconnect_count(&self) -> usize {
            self.state.lock().unwrap().disconnects
        }
    }

    impl ChannelPool for MockPool {
        type Channel = MockChannel;

        fn open_if_absent(&mut self, address: PeerAddress) {
            let mut state = self.state.lock().unwrap();
            if !state.opened.contains(&address) {
                state.opened.push(address);
            }
        }

        async fn acquire(&mut self, address: &PeerAddress) -> Option<MockChannel> {
            self.state.lock().unwrap().channels.get(address).cloned()
        }

        async fn disconnect_all(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.channels.clear();
            state.disconnects += 1;
        }
    }
}
