//! Page lifecycle state machine
//!
//! `UNSTARTED → DOM_LOADING → DOM_READY → LOAD_COMPLETE`. DOM readiness may be
//! reported natively, by a readiness probe, or by the load event acting as a
//! backstop; only the first report counts.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Unstarted,
    DomLoading,
    DomReady,
    LoadComplete,
}

/// What a host should do after running its readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// This probe moved the page to DOM_READY
    Ready,
    /// Not ready yet; probe again after a zero-delay yield
    Retry,
    /// Readiness was already decided (or timing never started); stop probing
    Settled,
}

#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    phase: LifecyclePhase,
    dom_ready: bool,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCoordinator {
    pub fn new() -> Self {
        Self {
            phase: LifecyclePhase::Unstarted,
            dom_ready: false,
        }
    }

    /// Start (or restart) tracking a page view
    pub fn arm(&mut self) {
        self.phase = LifecyclePhase::DomLoading;
        self.dom_ready = false;
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn is_armed(&self) -> bool {
        self.phase != LifecyclePhase::Unstarted
    }

    pub fn is_dom_ready(&self) -> bool {
        self.dom_ready
    }

    /// Record DOM readiness. Returns `true` only for the first report.
    pub fn signal_dom_ready(&mut self) -> bool {
        if !self.is_armed() || self.dom_ready {
            return false;
        }
        self.dom_ready = true;
        if self.phase == LifecyclePhase::DomLoading {
            self.phase = LifecyclePhase::DomReady;
        }
        true
    }

    /// Fold one readiness probe result into the state machine
    pub fn probe(&mut self, ready: bool) -> ProbeOutcome {
        if !self.is_armed() || self.dom_ready {
            ProbeOutcome::Settled
        } else if ready && self.signal_dom_ready() {
            ProbeOutcome::Ready
        } else {
            ProbeOutcome::Retry
        }
    }

    /// Record the load event. Returns `true` only for the first one.
    pub fn complete_load(&mut self) -> bool {
        match self.phase {
            LifecyclePhase::Unstarted | LifecyclePhase::LoadComplete => false,
            LifecyclePhase::DomLoading | LifecyclePhase::DomReady => {
                self.phase = LifecyclePhase::LoadComplete;
                true
            }
        }
    }
}
