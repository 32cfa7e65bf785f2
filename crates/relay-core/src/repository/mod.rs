//! Storage ports.
//!
//! These traits define the storage interface that the infrastructure layer
//! (relay-infra) implements. The core crate never depends on any specific
//! storage technology.

pub mod dead_letter;
pub mod endpoint;
pub mod index;
pub mod mailbox;

#[cfg(test)]
pub(crate) mod memory;

pub use dead_letter::DeadLetterStore;
pub use endpoint::EndpointDirectory;
pub use index::MessageIndex;
pub use mailbox::MailboxStore;
