//! In-memory implementations of the activity, mailbox, workspace, event,
//! and memory ports.
//!
//! Used by the test suite and by embeddings that run the core without a
//! durable engine. `MockActivities` is scripted: tests configure responses
//! per agent id and inspect recorded requests afterwards.

mod activities;
mod events;
mod mailbox;
mod memory;

pub use activities::MockActivities;
pub use events::{NullEventSink, RecordingEventSink};
pub use mailbox::{InMemoryMailbox, InMemoryWorkspace};
pub use memory::InMemoryMemoryStore;
