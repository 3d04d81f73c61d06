//! External Signal Module
//!
//! Real step-completion signals arrive over a push channel that may be
//! missing entirely, in which case the tracker runs on fallback synthesis.
//!
//! - [`message`]: Signal payload and wire parsing
//! - [`source`]: The [`SignalSource`] trait and subscription handles
//! - [`channel`]: In-process publish/subscribe hub

pub mod channel;
pub mod message;
pub mod source;

pub use channel::ChannelSource;
pub use message::StepSignal;
pub use source::{SignalError, SignalHandler, SignalSource, Subscription, UnavailableSource};
