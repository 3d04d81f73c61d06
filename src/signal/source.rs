//! External Signal Source Interface
//!
//! A push channel, keyed by instance id, that delivers real step
//! completions. Delivery is at-most-once and not guaranteed; the tracker
//! never relies on a minimum delivery rate.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use super::message::StepSignal;

/// Callback invoked for every delivered signal.
pub type SignalHandler = Arc<dyn Fn(StepSignal) + Send + Sync>;

/// Errors from opening a subscription.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal source is unavailable")]
    Unavailable,

    #[error("subscription for '{instance_id}' failed: {reason}")]
    SubscribeFailed { instance_id: String, reason: String },
}

/// Source of real step-completion signals.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Best-effort reachability probe. Failures report `false`.
    async fn check_availability(&self) -> bool;

    /// Starts delivering signals for `instance_id` to `on_signal`.
    fn subscribe(
        &self,
        instance_id: &str,
        on_signal: SignalHandler,
    ) -> Result<Subscription, SignalError>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle for an open subscription.
///
/// [`Subscription::unsubscribe`] is idempotent and also runs on drop.
pub struct Subscription {
    instance_id: String,
    cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    /// Wraps a cancellation callback.
    pub fn new(instance_id: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            instance_id: instance_id.into(),
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            cancel: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// True until the first call to [`Subscription::unsubscribe`].
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stops delivery. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(cancel) = cancel {
            debug!("Unsubscribing signal channel for {}", self.instance_id);
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("instance_id", &self.instance_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A source that is never reachable; every instance runs on fallback
/// synthesis alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSource;

#[async_trait]
impl SignalSource for UnavailableSource {
    async fn check_availability(&self) -> bool {
        false
    }

    fn subscribe(
        &self,
        _instance_id: &str,
        _on_signal: SignalHandler,
    ) -> Result<Subscription, SignalError> {
        Err(SignalError::Unavailable)
    }
}
