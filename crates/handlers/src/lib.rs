//! Declarative handler definitions, the in-memory handler registry, and
//! the slot-filling machinery (states, validation, extraction).
//!
//! Handlers carry no code: everything a handler does is described by its
//! patterns, slots, templates, and permitted tools.

pub mod definition;
pub mod extract;
pub mod registry;
pub mod seed;
pub mod slots;

pub use definition::{HandlerDefinition, PatternKind, SlotDefinition, TriggerPattern};
pub use registry::{HandlerRegistry, IndexedHandler};
pub use slots::SlotState;
