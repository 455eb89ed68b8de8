//! WASM bindings for episodic page timing
//!
//! Binds the platform-neutral engine from `episodes-core` to the live page:
//! the `window` message channel, the page lifecycle events, `document.cookie`
//! and an outbound beacon request.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { EpisodesRuntime } from './pkg/episodes_wasm.js';
//!
//! await init();
//!
//! const episodes = new EpisodesRuntime({
//!   collector_url: 'https://stats.example.com/beacon',
//!   compat_script_url: '/js/episodes-compat.js',
//! });
//! episodes.init();
//!
//! episodes.runBehaviors({ tabs: attachTabs, menu: attachMenu });
//! console.log(episodes.measures());
//! ```

pub mod host;
pub mod runtime;

use wasm_bindgen::prelude::*;

pub use host::BrowserHost;
pub use runtime::EpisodesRuntime;

/// Initialize the WASM module
/// Called automatically by wasm-bindgen
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Get the library version
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
