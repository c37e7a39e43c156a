//! Engine status as seen from the outside.
//!
//! The engine owns all of this mutably; readers get a copy through
//! [`crate::engine::Command::Status`] rather than shared counters.

use std::time::Instant;

/// Monotonic event counters, folded into each status snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub tokens_received: u64,
    pub tokens_generated: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub integrity_errors: u64,
}

/// Coarse engine state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Holding,
    Awaiting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EngineState::Idle => "idle",
            EngineState::Holding => "holding token",
            EngineState::Awaiting => "awaiting frame return",
        };
        f.write_str(label)
    }
}

/// Point-in-time copy of the engine's observable state.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub name: String,
    pub state: EngineState,
    pub has_token: bool,
    pub queue_len: usize,
    pub last_activity: Instant,
    pub counters: Counters,
}
