//! corpus — examples, structures, parameter layout and prediction artifacts.
//!
//! Purpose
//! -------
//! Hold the immutable data the trainer works over: sequences with optional
//! ground-truth structures and evidence tracks ([`example`]), structure
//! annotations ([`structure`]), the logical layout of the parameter vector
//! ([`layout`]) and the writers for decoded structures ([`output`]).
//!
//! Invariants & assumptions
//! ------------------------
//! - Examples are validated at construction; downstream code assumes
//!   non-empty sequences, matching structure/evidence lengths, finite
//!   non-negative weights and observations.
//! - The [`Corpus`] is shared behind an `Arc` and never mutated while a
//!   batch is in flight.

pub mod errors;
pub mod example;
pub mod layout;
pub mod output;
pub mod structure;

pub use self::errors::{CorpusError, CorpusResult};
pub use self::example::{Corpus, EvidenceTrack, Example};
pub use self::layout::{EvidenceCell, GammaParam, PAIRED, PAIRING_STATES, ParameterLayout, UNPAIRED};
pub use self::output::{OutputDestination, PredictOutputs};
pub use self::structure::Structure;
