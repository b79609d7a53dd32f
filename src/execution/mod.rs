pub mod engine;
pub mod price_gate;
pub mod sizing;

pub use engine::{EngineConfig, ExecutionEngine, ExecutionOutcome};
pub use price_gate::{GateConfig, GateDecision, RejectReason};
pub use sizing::SizingLimits;
