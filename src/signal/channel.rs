//! In-Process Signal Hub
//!
//! [`ChannelSource`] stands in for the backend push channel inside one
//! process: whatever receives the backend's webhook calls publishes into the
//! hub, and every subscriber for that instance id gets the signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, info};

use super::message::StepSignal;
use super::source::{SignalError, SignalHandler, SignalSource, Subscription};

#[derive(Default)]
struct Hub {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, SignalHandler)>>,
}

/// Publish/subscribe signal source backed by in-memory handler lists.
///
/// Cloning shares the same hub.
#[derive(Clone)]
pub struct ChannelSource {
    hub: Arc<Mutex<Hub>>,
    available: Arc<AtomicBool>,
}

impl ChannelSource {
    /// Creates an available, empty hub.
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Controls what [`SignalSource::check_availability`] reports and
    /// whether new subscriptions are accepted.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delivers `signal` to every subscriber of `instance_id`.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, instance_id: &str, signal: StepSignal) -> usize {
        // Handlers run outside the hub lock so they may take their own locks.
        let handlers: Vec<SignalHandler> = {
            let hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
            hub.subscribers
                .get(instance_id)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        debug!(
            "Publishing step {} for {} to {} subscriber(s)",
            signal.step,
            instance_id,
            handlers.len()
        );

        for handler in &handlers {
            handler(signal);
        }
        handlers.len()
    }

    /// Parses a raw push message and publishes it. Malformed messages are
    /// dropped and report zero deliveries.
    pub fn publish_raw(&self, instance_id: &str, raw: &str) -> usize {
        match StepSignal::parse(raw) {
            Some(signal) => self.publish(instance_id, signal),
            None => 0,
        }
    }

    /// Number of open subscriptions for `instance_id`.
    pub fn subscriber_count(&self, instance_id: &str) -> usize {
        let hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        hub.subscribers.get(instance_id).map_or(0, Vec::len)
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalSource for ChannelSource {
    async fn check_availability(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn subscribe(
        &self,
        instance_id: &str,
        on_signal: SignalHandler,
    ) -> Result<Subscription, SignalError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SignalError::Unavailable);
        }

        let id = {
            let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
            hub.next_id += 1;
            let id = hub.next_id;
            hub.subscribers
                .entry(instance_id.to_string())
                .or_default()
                .push((id, on_signal));
            id
        };

        info!("Subscribed to workflow updates: {}", instance_id);

        let hub = Arc::downgrade(&self.hub);
        let key = instance_id.to_string();
        Ok(Subscription::new(instance_id, move || {
            // The hub may already be gone; nothing to release then.
            let Some(shared) = hub.upgrade() else {
                return;
            };
            let mut hub = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subs) = hub.subscribers.get_mut(&key) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    hub.subscribers.remove(&key);
                }
            }
        }))
    }
}
