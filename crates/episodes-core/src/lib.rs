//! Episodic page timing
//!
//! Records named timestamps (marks) and durations (measures) across a page
//! view, carries a start time across navigations in a cookie, and reports all
//! measures to a collector in a single beacon once the page and its lazily
//! loaded content are ready.
//!
//! The engine is platform neutral: everything it needs from the page (clock,
//! cookies, referrer, network) comes through [`PageHost`]. The browser binding
//! lives in the `episodes-wasm` crate.

pub mod beacon;
pub mod behaviors;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod host;
pub mod ledger;
pub mod lifecycle;
pub mod protocol;

pub use beacon::{beacon_query, beacon_url, parse_ets, BeaconEmitter, BeaconOutcome};
pub use behaviors::{instrument_behaviors, instrument_configured};
pub use bridge::{find_start_time, js_escape, NavigationCookie, COOKIE_NAME};
pub use config::EngineConfig;
pub use engine::{names, Engine, PumpStatus};
pub use error::{BeaconError, ConfigError, ProtocolError};
pub use gate::{LazyLoadCallback, LazyLoadGate};
pub use host::{PageHost, RecordingHost, SystemClock};
pub use ledger::{Ledger, LedgerSnapshot, Mark, Measure};
pub use lifecycle::{LifecycleCoordinator, LifecyclePhase, ProbeOutcome};
pub use protocol::{Command, NAMESPACE};
