//! `PageHost` over the live browser page

use episodes_core::{BeaconError, PageHost};
use tracing::debug;
use wasm_bindgen::JsCast;
use web_sys::{HtmlDocument, Window, XmlHttpRequest};

/// Browser page: `Date.now()`, `document.cookie`, `document.referrer`,
/// `location.href` and a fire-and-forget `XMLHttpRequest`
pub struct BrowserHost {
    window: Window,
    document: HtmlDocument,
}

impl BrowserHost {
    pub fn new() -> Result<Self, String> {
        let window = web_sys::window().ok_or("No window")?;
        let document = window
            .document()
            .ok_or("No document")?
            .dyn_into::<HtmlDocument>()
            .map_err(|_| "Document is not an HTML document".to_string())?;
        Ok(Self { window, document })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn document(&self) -> &HtmlDocument {
        &self.document
    }
}

impl PageHost for BrowserHost {
    fn now_ms(&self) -> i64 {
        js_sys::Date::now() as i64
    }

    fn cookie_header(&self) -> String {
        self.document.cookie().unwrap_or_else(|e| {
            debug!(error = ?e, "cookies unavailable");
            String::new()
        })
    }

    fn set_cookie(&mut self, assignment: &str) {
        if let Err(e) = self.document.set_cookie(assignment) {
            debug!(error = ?e, "cookie write refused");
        }
    }

    fn referrer(&self) -> String {
        self.document.referrer()
    }

    fn location(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn send_beacon(&mut self, url: &str) -> Result<(), BeaconError> {
        let request =
            XmlHttpRequest::new().map_err(|e| BeaconError::Unavailable(format!("{:?}", e)))?;
        request
            .open_with_async("GET", url, true)
            .map_err(|e| BeaconError::Request(format!("{:?}", e)))?;
        request
            .send()
            .map_err(|e| BeaconError::Request(format!("{:?}", e)))
    }
}
