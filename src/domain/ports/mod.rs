//! Ports: the only seams through which the core reaches the outside world.
//!
//! Every method here corresponds to an activity scheduled by the durable
//! engine; workflow-level code performs no I/O of its own.

pub mod activities;
pub mod events;
pub mod mailbox;
pub mod memory;
pub mod version;

pub use activities::{
    Activities, AgentRequest, CitationInsertRequest, CitationInsertResponse, DecomposeRequest,
    LoopStepDecision, LoopStepRequest, SimpleTaskRequest, SimpleTaskResponse, SynthesisRequest,
    SynthesisResponse, TeamMember,
};
pub use events::EventSink;
pub use mailbox::{Mailbox, Workspace};
pub use memory::{CompressionOutcome, MemoryStore};
pub use version::{StaticVersionGate, VersionGate};
