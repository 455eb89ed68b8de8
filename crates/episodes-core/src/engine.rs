//! The episodes engine: one instance per page view
//!
//! All ledger mutation goes through [`Command`]s posted to the engine's
//! internal bus. Each command is stamped with the host clock when it is
//! posted and processed strictly in FIFO order by [`Engine::pump`].
//!
//! # Flow
//!
//! ```text
//! init ──► backendstarttime (cookie) ─► frontendstarttime ─► measure backend
//! DOMContentLoaded / probe / load backstop ──► measure domready ─► lazy-load gate fires
//! load ──► mark pageready ─► measure pageready, frontend ─► await gate (deferred)
//! gate ready ──► mark totaltime ─► measure totaltime [, lazyloading] ─► done ─► beacon
//! beforeunload ──► navigation cookie for the next page
//! ```
//!
//! # Example
//!
//! ```
//! use episodes_core::{Command, Engine, EngineConfig, RecordingHost};
//!
//! let host = RecordingHost::new("http://example.com/").with_now(1_000);
//! let mut engine = Engine::new(EngineConfig::new("/beacon"), host).unwrap();
//!
//! engine.post(Command::Init);
//! engine.pump();
//! engine.dom_content_loaded();
//! engine.host_mut().advance(250);
//! engine.page_loaded();
//! while engine.pump().is_pending() {}
//!
//! assert!(engine.is_done());
//! assert_eq!(engine.host().beacons().len(), 1);
//! ```

use std::collections::VecDeque;
use std::task::Poll;

use tracing::{debug, info, instrument, trace};

use crate::beacon::{BeaconEmitter, BeaconOutcome};
use crate::bridge::{self, NavigationCookie};
use crate::config::EngineConfig;
use crate::error::{ConfigError, ProtocolError};
use crate::gate::{LazyLoadCallback, LazyLoadGate};
use crate::host::PageHost;
use crate::ledger::{Ledger, LedgerSnapshot, Measure};
use crate::lifecycle::{LifecycleCoordinator, LifecyclePhase, ProbeOutcome};
use crate::protocol::Command;

/// Well-known mark and measure names
pub mod names {
    pub const BACKEND_START: &str = "backendstarttime";
    pub const FRONTEND_START: &str = "frontendstarttime";
    pub const BACKEND: &str = "backend";
    pub const FRONTEND: &str = "frontend";
    pub const DOM_READY: &str = "domready";
    pub const PAGE_READY: &str = "pageready";
    pub const TOTAL_TIME: &str = "totaltime";
    pub const LAZY_LOADING: &str = "lazyloading";
}

#[derive(Debug, Clone)]
struct Envelope {
    command: Command,
    posted_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredTask {
    AwaitDone,
}

/// Result of one [`Engine::pump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// Nothing left to do until the next host event
    Idle,
    /// Deferred work remains; pump again after a zero-delay yield
    Pending,
}

impl PumpStatus {
    pub fn is_pending(self) -> bool {
        self == PumpStatus::Pending
    }
}

pub struct Engine<H: PageHost> {
    config: EngineConfig,
    host: H,
    ledger: Ledger,
    bus: VecDeque<Envelope>,
    deferred: VecDeque<DeferredTask>,
    lifecycle: LifecycleCoordinator,
    gate: LazyLoadGate,
    beacon: BeaconEmitter,
    done: bool,
}

impl<H: PageHost> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("queued", &self.bus.len())
            .field("deferred", &self.deferred.len())
            .field("lifecycle", &self.lifecycle)
            .field("gate", &self.gate)
            .field("done", &self.done)
            .finish()
    }
}

impl<H: PageHost> Engine<H> {
    /// Create an engine. Timing starts with the first `init` command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: EngineConfig, host: H) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            host,
            ledger: Ledger::new(),
            bus: VecDeque::new(),
            deferred: VecDeque::new(),
            lifecycle: LifecycleCoordinator::new(),
            gate: LazyLoadGate::new(),
            beacon: BeaconEmitter::new(),
            done: false,
        })
    }

    /// Tear the engine down, discarding all page-view state
    pub fn teardown(self) -> H {
        debug!(
            queued = self.bus.len(),
            done = self.done,
            "engine torn down"
        );
        self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn marks(&self) -> Vec<crate::ledger::Mark> {
        self.ledger.marks()
    }

    pub fn measures(&self) -> Vec<Measure> {
        self.ledger.measures()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.lifecycle.phase()
    }

    pub fn is_dom_ready(&self) -> bool {
        self.lifecycle.is_dom_ready()
    }

    pub fn lazy_load_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn beacon_sent(&self) -> bool {
        self.beacon.has_sent()
    }

    /// Commands waiting on the bus
    pub fn queued(&self) -> usize {
        self.bus.len()
    }

    // ------------------------------------------------------------------
    // Inbound channel
    // ------------------------------------------------------------------

    /// Post a typed command, stamped with the current host time
    pub fn post(&mut self, command: Command) {
        let posted_at = self.host.now_ms();
        trace!(command = %command, posted_at, "posted");
        self.bus.push_back(Envelope { command, posted_at });
    }

    /// Deliver a raw message from the shared channel.
    ///
    /// Returns `true` when it was an episodes command and got queued; foreign
    /// or malformed traffic is dropped.
    pub fn deliver(&mut self, raw: &str) -> bool {
        match Command::parse(raw) {
            Ok(command) => {
                self.post(command);
                true
            }
            Err(ProtocolError::ForeignNamespace) => {
                trace!("ignoring foreign message");
                false
            }
            Err(e) => {
                debug!(error = %e, message = raw, "ignoring malformed episodes message");
                false
            }
        }
    }

    /// Process every queued command, then run each deferred task that was
    /// waiting when the pump started once.
    pub fn pump(&mut self) -> PumpStatus {
        self.drain_bus();

        for _ in 0..self.deferred.len() {
            let Some(task) = self.deferred.pop_front() else {
                break;
            };
            self.run_deferred(task);
        }
        self.drain_bus();

        if self.deferred.is_empty() {
            PumpStatus::Idle
        } else {
            PumpStatus::Pending
        }
    }

    fn drain_bus(&mut self) {
        while let Some(envelope) = self.bus.pop_front() {
            self.dispatch(envelope);
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { command, posted_at } = envelope;
        match command {
            Command::Init => self.handle_init(),
            Command::Mark { name, time } => self.ledger.set_mark(&name, time, posted_at),
            Command::Measure { name, start, end } => {
                self.ledger
                    .compute_measure(&name, start.as_deref(), end.as_deref(), posted_at);
            }
            Command::Done => self.handle_done(),
        }
    }

    #[instrument(skip(self))]
    fn handle_init(&mut self) {
        self.ledger.clear();
        self.deferred.clear();
        self.lifecycle.arm();
        self.gate.rearm();
        self.beacon.reset();
        self.done = false;

        let start = bridge::find_start_time(
            &self.host.cookie_header(),
            &self.config.cookie_name,
            &self.host.referrer(),
        );
        match start {
            Some(start) => self.post(Command::mark_at(names::BACKEND_START, start)),
            None => debug!("no navigation start time for this page"),
        }

        let now = self.host.now_ms();
        self.post(Command::mark_at(names::FRONTEND_START, now));
        self.post(Command::measure_between(
            names::BACKEND,
            names::BACKEND_START,
            names::FRONTEND_START,
        ));
        info!(frontend_start = now, "page view started");
    }

    fn handle_done(&mut self) {
        self.done = true;
        let outcome = self
            .beacon
            .send(&mut self.host, &self.config.collector_url, &self.ledger);
        if outcome == BeaconOutcome::AlreadySent {
            debug!("duplicate done ignored");
        }
    }

    fn run_deferred(&mut self, task: DeferredTask) {
        match task {
            DeferredTask::AwaitDone => match self.gate.poll_done() {
                Poll::Ready(commands) => {
                    for command in commands {
                        self.post(command);
                    }
                }
                Poll::Pending => self.deferred.push_back(DeferredTask::AwaitDone),
            },
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle events from the host
    // ------------------------------------------------------------------

    /// Native "content parsed" notification
    pub fn dom_content_loaded(&mut self) {
        if self.lifecycle.signal_dom_ready() {
            self.on_dom_ready();
        }
    }

    /// Fallback readiness probe. The host repeats it after a zero-delay yield
    /// while this returns [`ProbeOutcome::Retry`].
    pub fn probe_dom_ready(&mut self, ready: bool) -> ProbeOutcome {
        let outcome = self.lifecycle.probe(ready);
        if outcome == ProbeOutcome::Ready {
            self.on_dom_ready();
        }
        outcome
    }

    fn on_dom_ready(&mut self) {
        debug!("dom ready");
        self.post(Command::measure_from(names::DOM_READY, names::FRONTEND_START));
        self.gate.fire();
    }

    /// Native "load" notification
    pub fn page_loaded(&mut self) {
        if !self.lifecycle.is_armed() {
            debug!("load before init ignored");
            return;
        }
        // Load is the unconditional backstop for DOM readiness
        self.dom_content_loaded();

        if !self.lifecycle.complete_load() {
            return;
        }
        debug!("page loaded");
        self.post(Command::mark(names::PAGE_READY));
        self.post(Command::measure_between(
            names::PAGE_READY,
            names::BACKEND_START,
            names::PAGE_READY,
        ));
        self.post(Command::measure_between(
            names::FRONTEND,
            names::FRONTEND_START,
            names::PAGE_READY,
        ));
        self.deferred.push_back(DeferredTask::AwaitDone);
    }

    /// Native "beforeunload" notification: leave a start time for the next page
    pub fn before_unload(&mut self) {
        if !self.lifecycle.is_armed() {
            return;
        }
        let cookie = NavigationCookie::new(self.host.now_ms(), self.host.location());
        let assignment = cookie.to_header(&self.config.cookie_name, &self.config.cookie_path);
        debug!(cookie = %assignment, "writing navigation cookie");
        self.host.set_cookie(&assignment);
    }

    // ------------------------------------------------------------------
    // Lazy loading
    // ------------------------------------------------------------------

    /// Register a lazy-load starter. May be called before or after `init`.
    pub fn register_lazy_load(&mut self, callback: impl FnMut() + 'static) {
        self.register_lazy_load_boxed(Box::new(callback));
    }

    pub fn register_lazy_load_boxed(&mut self, callback: LazyLoadCallback) {
        self.gate.register(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn engine_at(now: i64) -> Engine<RecordingHost> {
        let host = RecordingHost::new("http://example.com/page").with_now(now);
        Engine::new(EngineConfig::new("/beacon"), host).unwrap()
    }

    fn run(engine: &mut Engine<RecordingHost>) {
        for _ in 0..16 {
            if !engine.pump().is_pending() {
                return;
            }
        }
        panic!("engine did not settle");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let host = RecordingHost::new("http://a/");
        assert!(Engine::new(EngineConfig::new(""), host).is_err());
    }

    #[test]
    fn test_commands_wait_for_pump() {
        let mut engine = engine_at(100);
        engine.post(Command::mark("a"));
        assert_eq!(engine.queued(), 1);
        assert_eq!(engine.ledger().mark("a"), None);

        engine.pump();
        assert_eq!(engine.ledger().mark("a"), Some(100));
    }

    #[test]
    fn test_now_is_post_time() {
        let mut engine = engine_at(100);
        engine.post(Command::mark_at("a", 40));
        engine.post(Command::measure("a"));
        engine.host_mut().set_now(500);
        engine.pump();

        assert_eq!(engine.ledger().measure("a").unwrap().duration_ms, 60);
    }

    #[test]
    fn test_deliver_filters_traffic() {
        let mut engine = engine_at(0);
        assert!(!engine.deliver("hello world"));
        assert!(!engine.deliver("EPISODES:explode"));
        assert!(!engine.deliver("EPISODES:mark"));
        assert!(engine.deliver("EPISODES:mark:x:5"));
        engine.pump();
        assert_eq!(engine.ledger().mark("x"), Some(5));
    }

    #[test]
    fn test_init_without_cookie() {
        let mut engine = engine_at(2_000);
        engine.post(Command::Init);
        engine.pump();

        assert_eq!(engine.phase(), LifecyclePhase::DomLoading);
        assert_eq!(engine.ledger().mark(names::FRONTEND_START), Some(2_000));
        assert_eq!(engine.ledger().mark(names::BACKEND_START), None);
        assert_eq!(engine.ledger().measure(names::BACKEND), None);
    }

    #[test]
    fn test_init_with_matching_cookie() {
        let host = RecordingHost::new("http://example.com/b")
            .with_referrer("http://example.com/a")
            .with_cookie_header("EPISODES=s=1500&r=http%3A//example.com/a")
            .with_now(2_000);
        let mut engine = Engine::new(EngineConfig::new("/beacon"), host).unwrap();
        engine.post(Command::Init);
        engine.pump();

        assert_eq!(engine.ledger().mark(names::BACKEND_START), Some(1_500));
        let backend = engine.ledger().measure(names::BACKEND).unwrap();
        assert_eq!(backend.duration_ms, 500);
        assert_eq!(backend.start_timestamp_ms, 1_500);
    }

    #[test]
    fn test_init_resets_previous_view() {
        let mut engine = engine_at(10);
        engine.post(Command::mark("stale"));
        engine.post(Command::Init);
        engine.pump();

        assert_eq!(engine.ledger().mark("stale"), None);
        assert!(!engine.is_done());
    }

    #[test]
    fn test_dom_ready_measured_once() {
        let mut engine = engine_at(1_000);
        engine.post(Command::Init);
        engine.pump();

        engine.host_mut().set_now(1_100);
        engine.dom_content_loaded();
        engine.pump();
        engine.host_mut().set_now(1_900);
        engine.dom_content_loaded();
        assert_eq!(engine.probe_dom_ready(true), ProbeOutcome::Settled);
        engine.pump();

        assert_eq!(engine.ledger().measure(names::DOM_READY).unwrap().duration_ms, 100);
    }

    #[test]
    fn test_probe_fallback() {
        let mut engine = engine_at(1_000);
        engine.post(Command::Init);
        engine.pump();

        assert_eq!(engine.probe_dom_ready(false), ProbeOutcome::Retry);
        engine.host_mut().set_now(1_040);
        assert_eq!(engine.probe_dom_ready(true), ProbeOutcome::Ready);
        engine.pump();

        assert!(engine.lazy_load_ready());
        assert_eq!(engine.ledger().measure(names::DOM_READY).unwrap().duration_ms, 40);
    }

    #[test]
    fn test_events_before_init_ignored() {
        let mut engine = engine_at(0);
        engine.dom_content_loaded();
        engine.page_loaded();
        engine.before_unload();
        run(&mut engine);

        assert_eq!(engine.phase(), LifecyclePhase::Unstarted);
        assert_eq!(engine.ledger().measure_count(), 0);
        assert_eq!(engine.host().cookie("EPISODES"), None);
        assert!(!engine.is_done());
    }

    #[test]
    fn test_load_is_backstop_for_dom_ready() {
        let mut engine = engine_at(1_000);
        engine.post(Command::Init);
        engine.pump();

        engine.host_mut().set_now(1_300);
        engine.page_loaded();
        run(&mut engine);

        assert!(engine.is_dom_ready());
        assert_eq!(engine.ledger().measure(names::DOM_READY).unwrap().duration_ms, 300);
        assert_eq!(engine.ledger().measure(names::FRONTEND).unwrap().duration_ms, 300);
        assert!(engine.is_done());
    }

    #[test]
    fn test_lazy_load_callbacks_run_on_dom_ready() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut engine = engine_at(1_000);
        for id in 0..3 {
            let calls = Rc::clone(&calls);
            engine.register_lazy_load(move || calls.borrow_mut().push(id));
        }
        engine.post(Command::Init);
        engine.pump();
        assert!(calls.borrow().is_empty());

        engine.dom_content_loaded();
        assert_eq!(*calls.borrow(), vec![0, 1, 2]);
        assert!(engine.lazy_load_ready());

        engine.host_mut().set_now(1_500);
        engine.page_loaded();
        engine.host_mut().set_now(1_800);
        run(&mut engine);

        assert_eq!(*calls.borrow(), vec![0, 1, 2]);
        assert_eq!(engine.ledger().measure(names::LAZY_LOADING).unwrap().duration_ms, 300);
    }

    #[test]
    fn test_done_is_idempotent() {
        let mut engine = engine_at(0);
        engine.post(Command::mark_at("a", 0));
        engine.post(Command::measure_between("a", "a", "10"));
        engine.post(Command::Done);
        engine.post(Command::Done);
        engine.pump();

        assert!(engine.is_done());
        assert_eq!(engine.host().beacons(), ["/beacon?ets=a:10".to_string()]);
    }

    #[test]
    fn test_before_unload_writes_cookie() {
        let mut engine = engine_at(7_000);
        engine.post(Command::Init);
        engine.pump();
        engine.before_unload();

        assert_eq!(
            engine.host().cookie("EPISODES"),
            Some("s=7000&r=http%3A//example.com/page")
        );
    }

    #[test]
    fn test_teardown_returns_host() {
        let mut engine = engine_at(0);
        engine.post(Command::Init);
        engine.pump();
        let host = engine.teardown();
        assert!(host.beacons().is_empty());
    }
}
