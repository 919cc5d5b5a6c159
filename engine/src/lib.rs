//! # Zorp Presence Sync Engine
//!
//! Keeps privacy/building zones ("Zorp zones") on one or more game servers
//! visually in sync with their owning team's presence. Each zone is colored
//! for its current state (online, grace delay, or offline) and the engine's
//! job is to make that color correct even though every input it works from is
//! unreliable: the console event stream drops lines, the transport drops
//! connections, and commands can vanish mid-flight with an unknown outcome.
//!
//! ## Architecture
//!
//! One supervisor task per configured game server owns everything for that
//! server; servers share nothing but the persisted store. Inside a
//! supervisor, data flows one way:
//!
//! ```text
//! console events ──┐
//!                  ├─> presence tracker ─> per-zone state machine ─> commands
//! roster poll ─────┘                            │
//!                                         delay timers
//! ```
//!
//! Two sweepers run against the same state on the same task: reconciliation
//! diffs the persisted records against a fresh live listing and repairs
//! drift in both directions, and expiration removes zones past their
//! configured lifetime regardless of presence.
//!
//! ## Module Organization
//!
//! - [`transport`]: one web-console session per server. Request/response
//!   correlation by identifier, bounded command timeouts, reconnect with
//!   capped exponential backoff. A timeout is an *unknown outcome*: callers
//!   never blind-retry a mutation, they leave the repair to reconciliation.
//! - [`presence`]: the in-memory online/offline snapshot, updated by parsed
//!   console events and wholesale-replaced by the periodic roster poll.
//! - [`registry`] / [`store`]: the zone domain model, the in-memory
//!   per-server registry, and the persistence seam behind it.
//! - [`aggregator`]: the pure Online/Delay/Offline transition function and
//!   the cancelable delay timers, at most one per zone.
//! - [`dispatcher`]: builds and sends the idempotent console commands; every
//!   mutation targets the zone's deterministic id.
//! - [`sweep`]: reconciliation planning/execution and the expiration pass.
//!   Anomalies that need a human become review flags, never silent repairs.
//! - [`supervisor`]: the per-server event loop serializing all of the above,
//!   plus the front-door handle the command surface talks to.
//!
//! ## Consistency model
//!
//! The persisted store, the in-memory registry, and the live server drift
//! apart whenever a command outcome is unknown. The engine's stance: apply
//! locally, dispatch idempotently, and let the periodic reconciliation pass
//! converge the three views. After repeated transport failures a server is
//! marked degraded and swept less often instead of hammered.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod sweep;
pub mod transport;
pub mod util;
