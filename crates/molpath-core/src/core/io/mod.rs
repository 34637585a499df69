//! Input/output utilities shared by the engine.
//!
//! Currently this holds the line-oriented file exchange used to delegate scoring, filtering and
//! descriptor computation to external commands.

pub mod script;
