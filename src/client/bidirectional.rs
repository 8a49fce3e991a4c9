//! Push-mode client
//!
//! A protocol collaborator negotiates with the device which parameters it will
//! stream on its own. Those are subscribed instead of polled; everything else
//! falls back to ordinary requests. When the protocol judges the link dead,
//! every subscriber is told through `request_terminated`.

use tracing::{debug, info, warn};

use super::{notify_all, same_listener, Client, Listener, Notification, ParameterClient};
use crate::error::CoreResult;
use crate::mapping::{Mapping, MappingHandle, Value};
use crate::midi::MidiMessage;

/// Link state as judged by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No sign of life yet
    Connecting,
    Connected,
    /// Was connected (or waited too long), now silent
    Lost,
}

/// Device-specific push negotiation
pub trait BidirectionalProtocol {
    /// The device streams updates for this mapping on its own
    fn is_bidirectional(&self, mapping: &Mapping) -> bool;

    /// Values set locally can be trusted without reading them back
    fn feedback_value(&self, mapping: &Mapping) -> bool;

    /// Consume protocol-internal messages. Returns true if `message` was one.
    fn receive(&mut self, message: &MidiMessage, now_ms: u64) -> bool;

    /// Emit keep-alive/handshake traffic and report the link state
    fn update(&mut self, client: &mut Client) -> ConnectionState;
}

struct Subscription {
    mapping: MappingHandle,
    listeners: Vec<Listener>,
}

/// Client with a negotiated push channel
pub struct BidirectionalClient {
    inner: Client,
    protocol: Box<dyn BidirectionalProtocol>,
    subscriptions: Vec<Subscription>,
    state: ConnectionState,
}

impl BidirectionalClient {
    pub fn new(inner: Client, protocol: Box<dyn BidirectionalProtocol>) -> Self {
        Self {
            inner,
            protocol,
            subscriptions: Vec::new(),
            state: ConnectionState::Connecting,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Number of subscribed (pushed) mappings
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Tell every subscriber its parameter is gone
    ///
    /// Driven by transport state, not request state: calling it again while still
    /// disconnected terminates again.
    pub fn notify_connection_lost(&mut self) {
        warn!(
            "Connection lost, terminating {} pushed parameters",
            self.subscriptions.len()
        );
        for subscription in &self.subscriptions {
            notify_all(
                &subscription.listeners,
                &subscription.mapping,
                Notification::Terminated,
            );
        }
    }

    fn is_pushed(&self, mapping: &MappingHandle) -> bool {
        self.state == ConnectionState::Connected
            && self.protocol.is_bidirectional(&mapping.borrow())
    }

    /// Subscription index for the parameter, created on first use
    fn subscribe(&mut self, mapping: &MappingHandle) -> (usize, bool) {
        if let Some(index) = self
            .subscriptions
            .iter()
            .position(|s| s.mapping.same_parameter(mapping))
        {
            return (index, false);
        }

        let mapping = self
            .inner
            .cache
            .lookup(mapping)
            .cloned()
            .unwrap_or_else(|| mapping.clone());
        debug!("Subscribing to pushed parameter '{}'", mapping.name());
        self.subscriptions.push(Subscription {
            mapping,
            listeners: Vec::new(),
        });
        (self.subscriptions.len() - 1, true)
    }
}

impl ParameterClient for BidirectionalClient {
    fn set(&mut self, mapping: &MappingHandle, value: Value) -> CoreResult<()> {
        self.inner.set(mapping, value.clone())?;

        if !self.protocol.feedback_value(&mapping.borrow()) {
            return Ok(());
        }

        // Trust our own write: no read-back needed
        let now = self.inner.clock.now_ms();
        let (index, _) = self.subscribe(mapping);
        let subscription = &self.subscriptions[index];
        subscription.mapping.borrow_mut().value = Some(value);
        self.inner.cache.remember(&subscription.mapping, now);
        notify_all(
            &subscription.listeners,
            &subscription.mapping,
            Notification::Changed,
        );
        Ok(())
    }

    fn request(&mut self, mapping: &MappingHandle, listener: Listener) -> CoreResult<()> {
        if !self.is_pushed(mapping) {
            return self.inner.request(mapping, listener);
        }

        let (index, created) = self.subscribe(mapping);
        let subscription = &mut self.subscriptions[index];
        let known = subscription
            .listeners
            .iter()
            .any(|l| same_listener(l, &listener));
        if !known {
            subscription.listeners.push(listener.clone());
        }

        let target = subscription.mapping.clone();
        if created || target.value().is_none() {
            // Initial value still has to be read once
            return self.inner.request(&target, listener);
        }
        if !known {
            notify_all(&[listener], &target, Notification::Changed);
        }
        Ok(())
    }

    fn receive(&mut self, message: &MidiMessage) {
        let now = self.inner.clock.now_ms();

        if self.protocol.receive(message, now) {
            self.inner.cleanup();
            return;
        }

        for subscription in &self.subscriptions {
            let parsed = self
                .inner
                .provider
                .parse(&mut subscription.mapping.borrow_mut(), message);
            if !parsed {
                continue;
            }

            // An initial read still in flight resolves on this message and tells its own listeners
            let pending = self
                .inner
                .requests
                .iter()
                .find(|r| !r.is_finished() && r.mapping().same_parameter(&subscription.mapping));
            let listeners: Vec<Listener> = match pending {
                Some(request) => subscription
                    .listeners
                    .iter()
                    .filter(|l| !request.has_listener(l))
                    .cloned()
                    .collect(),
                None => {
                    self.inner.cache.remember(&subscription.mapping, now);
                    subscription.listeners.clone()
                }
            };
            notify_all(&listeners, &subscription.mapping, Notification::Changed);
        }

        self.inner.receive(message);
    }

    fn get(&self, mapping: &MappingHandle) -> Option<Value> {
        self.inner.get(mapping)
    }

    fn next_message(&mut self) -> Option<MidiMessage> {
        self.inner.next_message()
    }

    fn cleanup(&mut self) {
        self.inner.cleanup();
    }

    fn update(&mut self) {
        let state = self.protocol.update(&mut self.inner);
        if state == self.state {
            return;
        }

        info!("Device connection: {:?} → {:?}", self.state, state);
        self.state = state;
        if state == ConnectionState::Lost {
            self.notify_connection_lost();
        }
    }

    fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }
}
