//! One in-flight read of a mapping

use std::mem;
use tracing::{debug, trace};

use super::{notify_all, same_listener, Listener, Notification};
use crate::error::{CoreError, CoreResult};
use crate::mapping::{Mapping, MappingHandle};
use crate::midi::MidiMessage;
use crate::provider::ValueProvider;
use crate::transport::MidiTransport;

/// Lifecycle of a request. `Finished` is terminal.
enum RequestState {
    Pending { listeners: Vec<Listener> },
    Finished,
}

/// Tracks one read exchange: sent once, fanned out to every listener, ended by
/// an answer or by `terminate`
pub struct Request {
    mapping: MappingHandle,
    started_ms: u64,
    sent: bool,
    state: RequestState,
}

impl Request {
    /// Fails if the mapping cannot take part in a round trip
    pub fn new(mapping: MappingHandle, now_ms: u64) -> CoreResult<Self> {
        Self::validate(&mapping.borrow())?;

        Ok(Self {
            mapping,
            started_ms: now_ms,
            sent: false,
            state: RequestState::Pending { listeners: Vec::new() },
        })
    }

    /// Check that a mapping has SysEx request and response templates
    pub fn validate(mapping: &Mapping) -> CoreResult<()> {
        let checks = [("request", &mapping.request), ("response", &mapping.response)];

        for (template, message) in checks {
            match message {
                None => {
                    return Err(CoreError::MissingTemplate {
                        mapping: mapping.name.clone(),
                        template,
                    })
                }
                Some(message) if !message.is_sysex() => {
                    return Err(CoreError::UnsupportedMessage {
                        mapping: mapping.name.clone(),
                        template,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn mapping(&self) -> &MappingHandle {
        &self.mapping
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RequestState::Finished)
    }

    /// Milliseconds since the request was sent (or created)
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms)
    }

    /// Transmit the request template. Only the first call sends.
    pub fn send(&mut self, transport: &mut dyn MidiTransport, now_ms: u64) {
        if self.sent {
            return;
        }

        let request = self.mapping.borrow().request.clone();
        if let Some(request) = request {
            debug!("Requesting '{}'", self.mapping.name());
            transport.send(&request);
        }
        self.sent = true;
        self.started_ms = now_ms;
    }

    /// Register a listener. Ignored once finished or if already registered.
    pub fn add_listener(&mut self, listener: Listener) {
        if let RequestState::Pending { listeners } = &mut self.state {
            if !listeners.iter().any(|l| same_listener(l, &listener)) {
                listeners.push(listener);
            }
        }
    }

    pub fn has_listener(&self, listener: &Listener) -> bool {
        match &self.state {
            RequestState::Pending { listeners } => listeners.iter().any(|l| same_listener(l, listener)),
            RequestState::Finished => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        match &self.state {
            RequestState::Pending { listeners } => listeners.len(),
            RequestState::Finished => 0,
        }
    }

    /// Offer an inbound message
    ///
    /// On a match, `on_resolved` runs before any listener sees the value, then
    /// every listener is told in registration order and the request finishes.
    pub fn parse(
        &mut self,
        provider: &dyn ValueProvider,
        message: &MidiMessage,
        on_resolved: impl FnOnce(&MappingHandle),
    ) -> bool {
        if self.is_finished() {
            return false;
        }

        let shape_ok = self
            .mapping
            .borrow()
            .response
            .as_ref()
            .is_some_and(|response| same_shape(response, message));
        if !shape_ok {
            return false;
        }

        if !provider.parse(&mut self.mapping.borrow_mut(), message) {
            return false;
        }

        trace!("Request for '{}' resolved", self.mapping.name());
        let listeners = self.finish();
        on_resolved(&self.mapping);
        notify_all(&listeners, &self.mapping, Notification::Changed);
        true
    }

    /// End the request without a value. No-op when already finished.
    pub fn terminate(&mut self) {
        if self.is_finished() {
            return;
        }

        let listeners = self.finish();
        notify_all(&listeners, &self.mapping, Notification::Terminated);
    }

    fn finish(&mut self) -> Vec<Listener> {
        match mem::replace(&mut self.state, RequestState::Finished) {
            RequestState::Pending { listeners } => listeners,
            RequestState::Finished => Vec::new(),
        }
    }
}

/// Type and namespace agree; the provider decides the rest
fn same_shape(template: &MidiMessage, message: &MidiMessage) -> bool {
    match (template, message) {
        (
            MidiMessage::SystemExclusive { manufacturer_id: a, .. },
            MidiMessage::SystemExclusive { manufacturer_id: b, .. },
        ) => a == b,
        _ => template.kind() == message.kind(),
    }
}
