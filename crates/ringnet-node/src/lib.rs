//! ringnet-node — the ring protocol engine.
//!
//! The engine is a single-owner actor: one task holds all mutable state and
//! everything else communicates with it through events. See [`engine`] for
//! the state machine, [`watchdog`] for token-loss recovery, and
//! [`transport`] for the UDP adapter that feeds it.

pub mod engine;
pub mod status;
pub mod transport;
pub mod watchdog;

pub use engine::{
    Command, Engine, EngineError, EngineHandle, EngineSettings, Event, NodeIdentity,
};
pub use status::{Counters, EngineState, StatusSnapshot};
