//! Painlog Core - German voice entry parsing for a headache diary
//!
//! Turns speech transcripts into structured diary entries (time, pain
//! intensity, medications, note), plans voice commands, and decides through a
//! policy gate whether a command may run without confirmation.

pub mod classifier;
pub mod config;
pub mod error;
pub mod ffi;
pub mod intent;
pub mod lexicon;
pub mod medication;
pub mod normalizer;
pub mod notes;
pub mod pain;
pub mod parser;
pub mod policy;
pub mod text;
pub mod time;
pub mod types;
pub mod vocab;

pub use error::{Error, Result};
pub use types::*;

// Export FFI functions at crate root
pub use ffi::*;

/// Re-export the main components for convenience
pub use config::{ParserConfig, PolicyThresholds};
pub use intent::{IntentCategory, IntentKind, IntentPlan, IntentPlanner, IntentSlots, SlotName};
pub use lexicon::{LexiconStore, MedicationLexicon};
pub use parser::{ParseRequest, VoiceParser, parse};
pub use policy::{DecisionKind, DecisionReason, InputSource, PolicyDecision, PolicyInput, evaluate_policy};
