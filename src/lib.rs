//! Kiosk Concierge - face-aware conversational orchestrator for kiosk avatars
//!
//! This library provides the core functionality for a kiosk virtual
//! assistant:
//! - Face capture, descriptor matching, and customer identity persistence
//! - Cloud speech recognition with utterance segmentation
//! - A conversation state machine driving a remote response service
//! - Playback, lip-sync values, and barge-in detection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Sensors                        │
//! │      Camera  │  Face sidecar  │  Microphone         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ tagged events
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                       │
//! │  Session state machine  │  Customer store  │  Turns │
//! └────────────────────┬────────────────────────────────┘
//!                      │ snapshots
//! ┌────────────────────▼────────────────────────────────┐
//! │           Avatar front-end (HTTP / WebSocket)       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod customer;
pub mod daemon;
pub mod db;
pub mod error;
pub mod interrupt;
pub mod lipsync;
pub mod matcher;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod turn;
pub mod vision;
pub mod voice;

pub use config::Config;
pub use customer::{IdentityRecord, TurnRecord};
pub use daemon::Daemon;
pub use db::{CustomerRepo, DbConn, DbPool};
pub use error::{Error, ErrorKind, Result};
pub use matcher::MatchPolicy;
pub use orchestrator::{Advisory, Orchestrator, OrchestratorHandle, Snapshot};
pub use session::{Effect, Input, Mode, SessionState};
pub use store::{CustomerStore, MemoryStore, ResilientStore};
pub use turn::{ResponseService, TurnExecutor, TurnOutcome, TurnRequest};
