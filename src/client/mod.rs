//! Parameter client: reliable "get current value" over a lossy MIDI stream
//!
//! The client owns the in-flight requests and the value cache. Reads of the same
//! logical parameter are deduplicated, answers are routed to the matching request,
//! and requests that outlive their budget are terminated so listeners get a
//! defined "device offline" signal.
//!
//! Per mapping: idle → requested → resolved | terminated → evicted (next cleanup).

pub mod beacon;
pub mod bidirectional;
pub mod request;


pub use beacon::{BeaconOptions, BeaconProtocol};
pub use bidirectional::{BidirectionalClient, BidirectionalProtocol, ConnectionState};
pub use request::Request;

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult};
use crate::mapping::{MappingHandle, Value};
use crate::midi::MidiMessage;
use crate::provider::ValueProvider;
use crate::transport::MidiTransport;

/// Default maximum lifetime of an unanswered request
pub const DEFAULT_MAX_REQUEST_LIFETIME_MS: u64 = 2000;

/// Default age below which a cached value answers a read without a round trip
pub const DEFAULT_CACHE_MAX_AGE_MS: u64 = 100;

/// Receives the outcome of reads
pub trait ClientListener {
    /// A fresh value is available on `mapping`
    fn parameter_changed(&mut self, mapping: &MappingHandle);

    /// The read ended without a value (timeout or lost connection)
    fn request_terminated(&mut self, mapping: &MappingHandle);
}

/// Shared listener handle
pub type Listener = Rc<RefCell<dyn ClientListener>>;

/// Identity comparison for listener handles
pub fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Notification {
    Changed,
    Terminated,
}

/// Tell every listener, in order
///
/// A listener that is borrowed elsewhere cannot be reentered; its notification is
/// dropped and logged instead of panicking.
pub(crate) fn notify_all(listeners: &[Listener], mapping: &MappingHandle, notification: Notification) {
    for listener in listeners {
        match listener.try_borrow_mut() {
            Ok(mut listener) => match notification {
                Notification::Changed => listener.parameter_changed(mapping),
                Notification::Terminated => listener.request_terminated(mapping),
            },
            Err(_) => error!(
                "Listener for '{}' is busy, {:?} notification dropped",
                mapping.name(),
                notification
            ),
        }
    }
}

/// Operations every client flavour offers to conditions, actions and the controller
pub trait ParameterClient {
    /// Encode `value` into the mapping's set template and transmit it
    fn set(&mut self, mapping: &MappingHandle, value: Value) -> CoreResult<()>;

    /// Ask for the current value; `listener` hears about the outcome
    fn request(&mut self, mapping: &MappingHandle, listener: Listener) -> CoreResult<()>;

    /// Offer one inbound message, then clean up
    fn receive(&mut self, message: &MidiMessage);

    /// Cached value of a structurally equal mapping
    fn get(&self, mapping: &MappingHandle) -> Option<Value>;

    /// Read one inbound message from the transport
    fn next_message(&mut self) -> Option<MidiMessage>;

    /// Time out stale requests and evict finished ones
    fn cleanup(&mut self);

    /// Periodic housekeeping
    fn update(&mut self) {}

    /// Current time of the client's clock
    fn now_ms(&self) -> u64;
}

/// Timing options of a client
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub max_request_lifetime_ms: u64,
    /// 0 disables answering reads from the cache
    pub cache_max_age_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_request_lifetime_ms: DEFAULT_MAX_REQUEST_LIFETIME_MS,
            cache_max_age_ms: DEFAULT_CACHE_MAX_AGE_MS,
        }
    }
}

struct CacheEntry {
    mapping: MappingHandle,
    resolved_ms: u64,
}

/// Mappings resolved at least once, looked up by content
#[derive(Default)]
pub struct ValueCache {
    entries: Vec<CacheEntry>,
}

impl ValueCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached instance for a structurally equal mapping
    pub fn lookup(&self, mapping: &MappingHandle) -> Option<&MappingHandle> {
        self.find(mapping).map(|e| &e.mapping)
    }

    fn find(&self, mapping: &MappingHandle) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.mapping.same_parameter(mapping))
    }

    /// Record a resolved mapping. An existing entry keeps its instance and takes
    /// over the new value.
    pub fn remember(&mut self, mapping: &MappingHandle, now_ms: u64) {
        match self.entries.iter_mut().find(|e| e.mapping.same_parameter(mapping)) {
            Some(entry) => {
                if !entry.mapping.ptr_eq(mapping) {
                    let value = mapping.value();
                    entry.mapping.borrow_mut().value = value;
                }
                entry.resolved_ms = now_ms;
            }
            None => self.entries.push(CacheEntry {
                mapping: mapping.clone(),
                resolved_ms: now_ms,
            }),
        }
    }

    /// Cached instance if it was resolved less than `max_age_ms` ago
    fn fresh(&self, mapping: &MappingHandle, now_ms: u64, max_age_ms: u64) -> Option<&MappingHandle> {
        self.find(mapping)
            .filter(|e| now_ms.saturating_sub(e.resolved_ms) < max_age_ms)
            .map(|e| &e.mapping)
    }
}

/// Poll-style parameter client
pub struct Client {
    transport: Box<dyn MidiTransport>,
    provider: Box<dyn ValueProvider>,
    clock: SharedClock,
    options: ClientOptions,
    requests: Vec<Request>,
    cache: ValueCache,
}

impl Client {
    pub fn new(
        transport: Box<dyn MidiTransport>,
        provider: Box<dyn ValueProvider>,
        clock: SharedClock,
        options: ClientOptions,
    ) -> Self {
        Self {
            transport,
            provider,
            clock,
            options,
            requests: Vec::new(),
            cache: ValueCache::default(),
        }
    }

    /// Number of requests still registered (finished ones are gone after cleanup)
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn provider(&self) -> &dyn ValueProvider {
        self.provider.as_ref()
    }

    /// Transmit a message as is
    pub fn send_message(&mut self, message: &MidiMessage) {
        self.transport.send(message);
    }

    fn pending_request_mut(&mut self, mapping: &MappingHandle) -> Option<&mut Request> {
        self.requests
            .iter_mut()
            .find(|r| !r.is_finished() && r.mapping().same_parameter(mapping))
    }
}

impl ParameterClient for Client {
    fn set(&mut self, mapping: &MappingHandle, value: Value) -> CoreResult<()> {
        if mapping.borrow().set.is_none() {
            return Err(CoreError::MissingTemplate {
                mapping: mapping.name(),
                template: "set",
            });
        }

        self.provider.set_value(&mut mapping.borrow_mut(), &value);
        let message = mapping.borrow().set.clone();
        if let Some(message) = message {
            debug!("Setting '{}' to {}", mapping.name(), value);
            self.transport.send(&message);
        }
        Ok(())
    }

    fn request(&mut self, mapping: &MappingHandle, listener: Listener) -> CoreResult<()> {
        Request::validate(&mapping.borrow())?;

        if let Some(pending) = self.pending_request_mut(mapping) {
            pending.add_listener(listener);
            return Ok(());
        }

        let now = self.clock.now_ms();
        if self.options.cache_max_age_ms > 0 {
            if let Some(cached) = self.cache.fresh(mapping, now, self.options.cache_max_age_ms) {
                let cached = cached.clone();
                notify_all(&[listener], &cached, Notification::Changed);
                return Ok(());
            }
        }

        // Share the one cached value object between all equal mappings
        let target = self
            .cache
            .lookup(mapping)
            .cloned()
            .unwrap_or_else(|| mapping.clone());

        let mut request = Request::new(target, now)?;
        request.add_listener(listener);
        request.send(self.transport.as_mut(), now);
        self.requests.push(request);
        Ok(())
    }

    fn receive(&mut self, message: &MidiMessage) {
        let now = self.clock.now_ms();
        let provider = self.provider.as_ref();
        let cache = &mut self.cache;

        for request in self.requests.iter_mut() {
            request.parse(provider, message, |mapping| cache.remember(mapping, now));
        }

        self.cleanup();
    }

    fn get(&self, mapping: &MappingHandle) -> Option<Value> {
        self.cache.lookup(mapping).and_then(|m| m.value())
    }

    fn next_message(&mut self) -> Option<MidiMessage> {
        self.transport.receive()
    }

    fn cleanup(&mut self) {
        let now = self.clock.now_ms();
        let max_lifetime = self.options.max_request_lifetime_ms;

        for request in self.requests.iter_mut() {
            if !request.is_finished() && request.age_ms(now) > max_lifetime {
                warn!(
                    "Request for '{}' timed out after {} ms",
                    request.mapping().name(),
                    request.age_ms(now)
                );
                request.terminate();
            }
        }

        self.requests.retain(|r| !r.is_finished());
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}
