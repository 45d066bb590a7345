pub mod models;
pub mod store;

pub use models::{
    AgentSummary, BreakpointState, DebuggerSection, MemorySummary, PerfCheckpoint, PerfSummary,
    RuntimeSummary, SCHEMA_VERSION, StateEnvelope, StateKind, StateMeta,
};
pub use store::{LoadedState, StateListing, StateStore};
