//! Browser runtime driving one engine per page
//!
//! The engine sits behind an `Rc` shared with every event listener and timer
//! the runtime installs. Anything that arrives while the engine is borrowed
//! (a message posted from inside a behavior, say) is staged and merged on the
//! next pump. Lazy-load starters are collected while the engine fires its gate
//! and invoked once the borrow is released.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use episodes_core::{instrument_configured, Command, Engine, EngineConfig, ProbeOutcome};
use js_sys::{Array, Function, Object, Reflect};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, EventTarget, HtmlScriptElement, MessageEvent};

use crate::host::BrowserHost;

type Listener = Closure<dyn FnMut(Event)>;
type Starters = Rc<RefCell<Vec<Function>>>;

struct Shared {
    engine: RefCell<Engine<BrowserHost>>,
    /// Raw messages that arrived while the engine was busy
    inbox: RefCell<VecDeque<String>>,
    /// Lazy-load registrations that arrived while the engine was busy
    staged: RefCell<Vec<Function>>,
    /// Starters released by the gate, waiting to be invoked
    starters: Starters,
    pump_scheduled: Cell<bool>,
    torn_down: Cell<bool>,
}

/// Episodic timing for the current page
///
/// ```javascript
/// import init, { EpisodesRuntime } from './pkg/episodes_wasm.js';
///
/// await init();
/// const episodes = new EpisodesRuntime({ collector_url: '/episodes/beacon' });
/// episodes.registerLazyLoadCallback(() => loadComments());
/// episodes.init();
///
/// // anywhere on the page
/// window.postMessage('EPISODES:mark:search', '*');
/// ```
#[wasm_bindgen]
pub struct EpisodesRuntime {
    shared: Rc<Shared>,
    listeners: Vec<(EventTarget, &'static str, Listener)>,
}

#[wasm_bindgen]
impl EpisodesRuntime {
    /// Create a runtime from a plain config object
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<EpisodesRuntime, JsValue> {
        let config: EngineConfig = serde_wasm_bindgen::from_value(config)
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;
        Self::with_config(config)
    }

    /// Create a runtime from a TOML config document
    #[wasm_bindgen(js_name = fromToml)]
    pub fn from_toml(source: &str) -> Result<EpisodesRuntime, JsValue> {
        let config = EngineConfig::from_toml_str(source)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Self::with_config(config)
    }

    fn with_config(config: EngineConfig) -> Result<EpisodesRuntime, JsValue> {
        let host = BrowserHost::new().map_err(|e| JsValue::from_str(&e))?;
        let engine = Engine::new(config, host).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Self {
            shared: Rc::new(Shared {
                engine: RefCell::new(engine),
                inbox: RefCell::new(VecDeque::new()),
                staged: RefCell::new(Vec::new()),
                starters: Rc::new(RefCell::new(Vec::new())),
                pump_scheduled: Cell::new(false),
                torn_down: Cell::new(false),
            }),
            listeners: Vec::new(),
        })
    }

    /// Start timing this page view
    ///
    /// Installs the page listeners on first use, then sends `init` over the
    /// message channel.
    pub fn init(&mut self) -> Result<(), JsValue> {
        if self.shared.torn_down.get() {
            return Err(JsValue::from_str("Runtime has been torn down"));
        }

        let mut native_dom_ready = true;
        if self.listeners.is_empty() {
            self.ensure_message_channel()?;
            native_dom_ready = self.listen()?;
        }

        deliver(&self.shared, Command::Init.to_wire());

        let ready_state = with_engine(&self.shared, |engine| {
            engine.host().document().ready_state()
        });
        match ready_state.as_deref() {
            Some("complete") => drive(&self.shared, |engine| engine.page_loaded()),
            Some("interactive") => probe_ready_state(&self.shared),
            _ if !native_dom_ready => probe_ready_state(&self.shared),
            _ => None,
        };
        Ok(())
    }

    /// Queue a raw `EPISODES:` message, as if it arrived on the channel
    pub fn post(&self, message: &str) {
        deliver(&self.shared, message.to_string());
    }

    /// Register a function to call once the DOM is ready
    #[wasm_bindgen(js_name = registerLazyLoadCallback)]
    pub fn register_lazy_load_callback(&self, callback: Function) {
        let registered = with_engine(&self.shared, |engine| {
            register_starter(engine, &self.shared.starters, callback.clone())
        });
        if registered.is_none() {
            self.shared.staged.borrow_mut().push(callback);
        }
    }

    /// Run an object of named behavior functions, timing each one
    #[wasm_bindgen(js_name = runBehaviors)]
    pub fn run_behaviors(&self, behaviors: &Object) -> Result<usize, JsValue> {
        let mut batch = Vec::new();
        for entry in Object::entries(behaviors).iter() {
            let pair: Array = entry.unchecked_into();
            let name = pair
                .get(0)
                .as_string()
                .ok_or_else(|| JsValue::from_str("Behavior name must be a string"))?;
            let behavior: Function = pair
                .get(1)
                .dyn_into()
                .map_err(|_| JsValue::from_str(&format!("Behavior {} is not a function", name)))?;
            batch.push((name, behavior));
        }

        let count = drive(&self.shared, |engine| {
            instrument_configured(
                engine,
                batch.into_iter().map(|(name, behavior)| {
                    (name, move || {
                        if let Err(e) = behavior.call0(&JsValue::NULL) {
                            warn!(error = ?e, "behavior threw");
                        }
                    })
                }),
            )
        });
        count.ok_or_else(|| JsValue::from_str("Runtime is busy"))
    }

    /// Process queued messages now instead of on the next tick.
    /// Returns `true` while deferred work remains.
    pub fn flush(&self) -> bool {
        run_pump(&self.shared)
    }

    /// Measures recorded so far, as `{ name: durationMs }`
    pub fn measures(&self) -> Result<JsValue, JsValue> {
        let measures = with_engine(&self.shared, |engine| engine.measures()).ok_or_else(busy)?;
        let out = Object::new();
        for measure in measures {
            Reflect::set(
                &out,
                &JsValue::from_str(&measure.name),
                &JsValue::from_f64(measure.duration_ms as f64),
            )?;
        }
        Ok(out.into())
    }

    /// Marks recorded so far, as `{ name: epochMs }`
    pub fn marks(&self) -> Result<JsValue, JsValue> {
        let marks = with_engine(&self.shared, |engine| engine.marks()).ok_or_else(busy)?;
        let out = Object::new();
        for mark in marks {
            Reflect::set(
                &out,
                &JsValue::from_str(&mark.name),
                &JsValue::from_f64(mark.timestamp_ms as f64),
            )?;
        }
        Ok(out.into())
    }

    /// Full ledger snapshot with start timestamps
    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        let snapshot = with_engine(&self.shared, |engine| engine.snapshot()).ok_or_else(busy)?;
        serde_wasm_bindgen::to_value(&snapshot)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    #[wasm_bindgen(js_name = isDone, getter)]
    pub fn is_done(&self) -> bool {
        with_engine(&self.shared, |engine| engine.is_done()).unwrap_or(false)
    }

    /// Remove every listener and drop pending work
    pub fn teardown(&mut self) {
        for (target, event, listener) in self.listeners.drain(..) {
            if let Err(e) =
                target.remove_event_listener_with_callback(event, listener.as_ref().unchecked_ref())
            {
                debug!(error = ?e, event, "listener removal refused");
            }
        }
        self.shared.torn_down.set(true);
        self.shared.inbox.borrow_mut().clear();
        self.shared.staged.borrow_mut().clear();
        self.shared.starters.borrow_mut().clear();
        debug!("episodes runtime torn down");
    }
}

impl EpisodesRuntime {
    /// Install page listeners. Returns `false` when the native
    /// content-loaded notification could not be hooked.
    fn listen(&mut self) -> Result<bool, JsValue> {
        let window = web_sys::window().ok_or("No window")?;
        let document = window.document().ok_or("No document")?;

        let shared = Rc::downgrade(&self.shared);
        self.add_listener(window.clone().into(), "message", move |event| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let Some(message) = event.dyn_ref::<MessageEvent>() else {
                return;
            };
            // Other scripts share the channel; only string payloads can be ours
            if let Some(data) = message.data().as_string() {
                deliver(&shared, data);
            }
        })?;

        let native_dom_ready = self
            .add_listener(document.into(), "DOMContentLoaded", on_engine(&self.shared, |engine| {
                engine.dom_content_loaded()
            }))
            .is_ok();

        self.add_listener(
            window.clone().into(),
            "load",
            on_engine(&self.shared, |engine| engine.page_loaded()),
        )?;
        self.add_listener(
            window.into(),
            "beforeunload",
            on_engine(&self.shared, |engine| engine.before_unload()),
        )?;

        Ok(native_dom_ready)
    }

    fn add_listener(
        &mut self,
        target: EventTarget,
        event: &'static str,
        handler: impl FnMut(Event) + 'static,
    ) -> Result<(), JsValue> {
        let listener = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
        target.add_event_listener_with_callback(event, listener.as_ref().unchecked_ref())?;
        self.listeners.push((target, event, listener));
        Ok(())
    }

    /// Load the compatibility shim when the page has no message channel
    fn ensure_message_channel(&self) -> Result<(), JsValue> {
        let window = web_sys::window().ok_or("No window")?;
        let has_channel = Reflect::get(&window, &JsValue::from_str("postMessage"))
            .map(|value| value.is_function())
            .unwrap_or(false);
        if has_channel {
            return Ok(());
        }

        let url = with_engine(&self.shared, |engine| engine.config().compat_script_url.clone())
            .flatten();
        let Some(url) = url else {
            warn!("no message channel and no compat script configured");
            return Ok(());
        };

        let document = window.document().ok_or("No document")?;
        let script: HtmlScriptElement = document
            .create_element("script")?
            .dyn_into()
            .map_err(|_| JsValue::from_str("Failed to create script element"))?;
        script.set_src(&url);
        let parent = document
            .document_element()
            .ok_or("Document has no root element")?;
        parent.append_child(&script)?;
        debug!(url = %url, "compat script injected");
        Ok(())
    }
}

fn busy() -> JsValue {
    JsValue::from_str("Runtime is busy")
}

fn with_engine<R>(shared: &Shared, f: impl FnOnce(&mut Engine<BrowserHost>) -> R) -> Option<R> {
    match shared.engine.try_borrow_mut() {
        Ok(mut engine) => Some(f(&mut engine)),
        Err(_) => None,
    }
}

fn register_starter(engine: &mut Engine<BrowserHost>, starters: &Starters, callback: Function) {
    let starters = Rc::clone(starters);
    engine.register_lazy_load(move || starters.borrow_mut().push(callback.clone()));
}

/// Hand a raw message to the engine, staging it if the engine is busy
fn deliver(shared: &Rc<Shared>, raw: String) {
    if shared.torn_down.get() {
        return;
    }
    if with_engine(shared, |engine| engine.deliver(&raw)).is_none() {
        shared.inbox.borrow_mut().push_back(raw);
    }
    schedule_pump(shared);
}

/// Apply a page event after everything already queued, then release
/// starters and schedule the follow-up pump
fn drive<R>(shared: &Rc<Shared>, event: impl FnOnce(&mut Engine<BrowserHost>) -> R) -> Option<R> {
    if shared.torn_down.get() {
        return None;
    }
    let result = with_engine(shared, |engine| {
        merge_staged(shared, engine);
        engine.pump();
        event(engine)
    });
    if result.is_none() {
        warn!("engine busy, page event dropped");
    }
    run_starters(shared);
    schedule_pump(shared);
    result
}

fn on_engine(
    shared: &Rc<Shared>,
    event: impl Fn(&mut Engine<BrowserHost>) + 'static,
) -> impl FnMut(Event) + 'static {
    let shared: Weak<Shared> = Rc::downgrade(shared);
    move |_| {
        if let Some(shared) = shared.upgrade() {
            drive(&shared, &event);
        }
    }
}

fn merge_staged(shared: &Shared, engine: &mut Engine<BrowserHost>) {
    let staged: Vec<Function> = shared.staged.borrow_mut().drain(..).collect();
    for callback in staged {
        register_starter(engine, &shared.starters, callback);
    }
    let inbox: Vec<String> = shared.inbox.borrow_mut().drain(..).collect();
    for raw in inbox {
        engine.deliver(&raw);
    }
}

fn run_starters(shared: &Shared) {
    let starters: Vec<Function> = shared.starters.borrow_mut().drain(..).collect();
    for starter in starters {
        if let Err(e) = starter.call0(&JsValue::NULL) {
            warn!(error = ?e, "lazy-load callback threw");
        }
    }
}

/// One pump. Returns `true` when deferred work remains.
fn run_pump(shared: &Rc<Shared>) -> bool {
    shared.pump_scheduled.set(false);
    if shared.torn_down.get() {
        return false;
    }

    let status = with_engine(shared, |engine| {
        merge_staged(shared, engine);
        engine.pump()
    });
    run_starters(shared);

    match status {
        Some(status) if status.is_pending() => {
            schedule_pump(shared);
            true
        }
        Some(_) => false,
        None => {
            schedule_pump(shared);
            true
        }
    }
}

fn schedule_pump(shared: &Rc<Shared>) {
    if shared.torn_down.get() || shared.pump_scheduled.replace(true) {
        return;
    }
    let shared = Rc::downgrade(shared);
    defer(move || {
        if let Some(shared) = shared.upgrade() {
            run_pump(&shared);
        }
    });
}

/// Fallback for pages where the content-loaded event cannot be observed
fn probe_ready_state(shared: &Rc<Shared>) -> Option<()> {
    let outcome = drive(shared, |engine| {
        let ready = engine.host().document().ready_state() != "loading";
        engine.probe_dom_ready(ready)
    })?;
    if outcome == ProbeOutcome::Retry {
        let shared = Rc::downgrade(shared);
        defer(move || {
            if let Some(shared) = shared.upgrade() {
                probe_ready_state(&shared);
            }
        });
    }
    Some(())
}

/// Run `task` after a zero-delay timeout
fn defer(task: impl FnOnce() + 'static) {
    let Some(window) = web_sys::window() else {
        return;
    };
    let callback = Closure::once_into_js(task);
    if let Err(e) =
        window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), 0)
    {
        warn!(error = ?e, "failed to schedule timer");
    }
}
