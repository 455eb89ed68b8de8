//! Timing for batches of page-extension behaviors
//!
//! A CMS attaches a set of named behaviors to the DOM in one pass. Each one
//! gets a mark and a measure named after it, and the whole batch is bracketed
//! by a group label (`DrupalBehaviors` by default).

use tracing::debug;

use crate::engine::Engine;
use crate::host::PageHost;
use crate::protocol::Command;

/// Run `behaviors` in order, timing each one and the batch as a whole.
///
/// Timestamps are taken when each command is emitted, so they are exact
/// even though the engine applies them on its next pump. An empty batch
/// emits nothing. Returns the number of behaviors run.
pub fn instrument_behaviors<H, I, N, F>(engine: &mut Engine<H>, label: &str, behaviors: I) -> usize
where
    H: PageHost,
    I: IntoIterator<Item = (N, F)>,
    N: AsRef<str>,
    F: FnOnce(),
{
    let behaviors: Vec<(N, F)> = behaviors.into_iter().collect();
    if behaviors.is_empty() {
        return 0;
    }

    let started = engine.host().now_ms();
    engine.post(Command::mark_at(label, started));

    let count = behaviors.len();
    for (name, behavior) in behaviors {
        let name = name.as_ref();
        let start = engine.host().now_ms();
        engine.post(Command::mark_at(name, start));

        behavior();

        let end = engine.host().now_ms();
        engine.post(Command::measure_between(name, name, end.to_string()));
    }

    let finished = engine.host().now_ms();
    engine.post(Command::measure_between(label, label, finished.to_string()));
    debug!(label, count, elapsed_ms = finished.saturating_sub(started), "behaviors attached");
    count
}

/// [`instrument_behaviors`] with the configured group label
pub fn instrument_configured<H, I, N, F>(engine: &mut Engine<H>, behaviors: I) -> usize
where
    H: PageHost,
    I: IntoIterator<Item = (N, F)>,
    N: AsRef<str>,
    F: FnOnce(),
{
    let label = engine.config().behaviors_label.clone();
    instrument_behaviors(engine, &label, behaviors)
}
