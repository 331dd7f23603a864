//! Entitlement policy core: classifies external purchases into plan grants
//! and decides, per gated action, whether a user is currently entitled.

pub mod classifier;
pub mod engine;

pub use classifier::{ClassificationError, Classifier};
pub use engine::{Action, Denial, EngineError, EntitlementEngine};
