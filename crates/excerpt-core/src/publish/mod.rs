//! Hand-off of generation events to the downstream rendering worker.
//!
//! - [`TopicRouter`] maps a template's declared output type to a topic.
//! - [`publisher`] defines the [`EventPublisher`] transport and its HTTP and
//!   in-process implementations.
//! - [`pool`] is the outbox: a pool of workers that publish with a bounded
//!   timeout and compensate the record when a publish fails.

pub mod pool;
pub mod publisher;
mod router;

pub use pool::{OutboxEntry, OutboxPool, PUBLISH_FAILURE_DETAILS};
pub use publisher::{
    ChannelEventPublisher, EventPublisher, HttpEventPublisher, PublishError, PublishedEvent,
};
pub use router::TopicRouter;
