//! Lazy-load completion gate
//!
//! Application code registers "starter" callbacks for content it loads after
//! the page itself. Once the DOM is ready the gate invokes all of them, in
//! registration order, and becomes ready. Ready only means every starter has
//! been invoked and returned: asynchronous work a callback kicks off is not
//! awaited.

use std::fmt;
use std::task::Poll;

use tracing::debug;

use crate::protocol::Command;

pub type LazyLoadCallback = Box<dyn FnMut()>;

#[derive(Default)]
pub struct LazyLoadGate {
    pending: Vec<LazyLoadCallback>,
    registered: usize,
    fired: bool,
    ready: bool,
}

impl fmt::Debug for LazyLoadGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyLoadGate")
            .field("pending", &self.pending.len())
            .field("registered", &self.registered)
            .field("fired", &self.fired)
            .field("ready", &self.ready)
            .finish()
    }
}

impl LazyLoadGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback.
    ///
    /// After the gate has fired the callback is only counted: it still makes
    /// `totaltime` end at the `totaltime` mark, but it is never invoked.
    pub fn register(&mut self, callback: LazyLoadCallback) {
        self.registered += 1;
        if self.fired {
            debug!(registered = self.registered, "lazy-load callback registered after gate fired");
        } else {
            self.pending.push(callback);
        }
    }

    /// Invoke every pending callback once, in order, then become ready.
    /// Returns the number invoked; firing twice is a no-op.
    pub fn fire(&mut self) -> usize {
        if self.fired {
            return 0;
        }
        self.fired = true;

        let callbacks = std::mem::take(&mut self.pending);
        let invoked = callbacks.len();
        for mut callback in callbacks {
            callback();
        }

        self.ready = true;
        debug!(invoked, "lazy-load gate ready");
        invoked
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Start a new page view. Callbacks that were never invoked stay pending.
    pub fn rearm(&mut self) {
        self.fired = false;
        self.ready = false;
        self.registered = self.pending.len();
    }

    /// One step of the completion poll.
    ///
    /// Pending until the gate is ready; then the terminal commands: the
    /// `totaltime` mark, the `totaltime` measure (ending at `totaltime` when
    /// lazy loading happened, else at `pageready`), the `lazyloading` measure
    /// when applicable, and `done`.
    pub fn poll_done(&self) -> Poll<Vec<Command>> {
        if !self.ready {
            return Poll::Pending;
        }

        let lazy = self.registered > 0;
        let end = if lazy { "totaltime" } else { "pageready" };

        let mut commands = vec![
            Command::mark("totaltime"),
            Command::measure_between("totaltime", "backendstarttime", end),
        ];
        if lazy {
            commands.push(Command::measure_between("lazyloading", "pageready", "totaltime"));
        }
        commands.push(Command::Done);
        Poll::Ready(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<usize>>>, id: usize) -> LazyLoadCallback {
        let log = Rc::clone(log);
        Box::new(move || log.borrow_mut().push(id))
    }

    #[test]
    fn test_fires_in_registration_order_exactly_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut gate = LazyLoadGate::new();
        for id in 0..4 {
            gate.register(recorder(&log, id));
        }

        assert_eq!(gate.fire(), 4);
        assert_eq!(gate.fire(), 0);
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ready_only_after_fire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut gate = LazyLoadGate::new();
        gate.register(recorder(&log, 1));
        gate.register(recorder(&log, 2));

        assert!(!gate.is_ready());
        assert!(!gate.has_fired());
        gate.fire();
        assert!(gate.is_ready());
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_poll_pending_until_ready() {
        let mut gate = LazyLoadGate::new();
        for _ in 0..100 {
            assert!(gate.poll_done().is_pending());
        }
        gate.fire();
        assert!(gate.poll_done().is_ready());
    }

    #[test]
    fn test_terminal_commands_without_lazy_load() {
        let mut gate = LazyLoadGate::new();
        gate.fire();

        let Poll::Ready(commands) = gate.poll_done() else {
            panic!("gate should be ready");
        };
        assert_eq!(
            commands,
            vec![
                Command::mark("totaltime"),
                Command::measure_between("totaltime", "backendstarttime", "pageready"),
                Command::Done,
            ]
        );
    }

    #[test]
    fn test_terminal_commands_with_lazy_load() {
        let mut gate = LazyLoadGate::new();
        gate.register(Box::new(|| {}));
        gate.fire();

        let Poll::Ready(commands) = gate.poll_done() else {
            panic!("gate should be ready");
        };
        assert_eq!(
            commands,
            vec![
                Command::mark("totaltime"),
                Command::measure_between("totaltime", "backendstarttime", "totaltime"),
                Command::measure_between("lazyloading", "pageready", "totaltime"),
                Command::Done,
            ]
        );
    }

    #[test]
    fn test_late_registration_counted_not_invoked() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut gate = LazyLoadGate::new();
        gate.fire();
        gate.register(recorder(&log, 7));

        assert_eq!(gate.registered(), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_rearm_keeps_uninvoked_callbacks() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut gate = LazyLoadGate::new();
        gate.register(recorder(&log, 1));
        gate.rearm();

        assert_eq!(gate.registered(), 1);
        assert!(!gate.is_ready());
        gate.fire();
        assert_eq!(*log.borrow(), vec![1]);
    }
}
