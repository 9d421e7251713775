//! Internal message envelopes carried by server mailboxes.

pub mod envelope;

pub(crate) use envelope::{Envelope, Internal};
pub use envelope::CallReply;
