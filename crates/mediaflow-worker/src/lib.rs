//! Mediaflow Worker Library
//!
//! Broker plumbing shared by the transcoding worker and the completion
//! reconciler: the [`MessageBroker`] contract, an in-process partitioned
//! broker, and [`ConsumerPool`], which drives a [`MessageHandler`] over every
//! partition of a subscription with the configured ack policy.

pub mod broker;
pub mod consumer;
pub mod handler;

pub use broker::{
    partition_for, publish_message, BrokerError, Delivery, InMemoryBroker, MessageBroker,
    Subscription,
};
pub use consumer::{ConsumerConfig, ConsumerPool};
pub use handler::{HandlerError, MessageHandler};
