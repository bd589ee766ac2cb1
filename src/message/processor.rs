//! A single-type subscriber inside a [`crate::node::Node`].

use super::Message;

/// Handles messages of exactly one type string. A [`Node`](crate::node::Node)
/// holds at most one processor per type; dispatch to the wrong type is a
/// programming error in the caller, not something `Processor` needs to guard
/// against, since the node only ever calls the processor registered for a
/// message's own type.
pub trait Processor: Send + Sync {
    fn message_type(&self) -> &'static str;

    fn process(&self, message: &dyn Message);
}
