// src/lib.rs

//! Line survival and conversation similarity for code changes shared
//! alongside AI-assistant conversations.
//!
//! Two batch passes run over a table of sharings: the survival pass traces
//! every line a change added forward to the repository tip, and the
//! similarity pass scores the change's line groups against the conversation
//! it was shared with. Both are checkpointed and resumable.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod inputs;
pub mod lineage;
pub mod model;
pub mod pipeline;
pub mod repo;
pub mod segment;
pub mod similarity;
pub mod survival;
