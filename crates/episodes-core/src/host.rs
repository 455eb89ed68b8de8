//! Platform seam between the engine and the page it instruments
//!
//! The engine never touches a clock, cookie store or network directly; it asks
//! its [`PageHost`]. The browser binding implements this over `window` and
//! `document`; [`RecordingHost`] keeps everything in memory.

use chrono::Utc;

use crate::error::BeaconError;

/// Everything the engine needs from the page environment
pub trait PageHost {
    /// Current wall-clock time in epoch milliseconds
    fn now_ms(&self) -> i64;

    /// Raw cookie header as exposed by `document.cookie`
    fn cookie_header(&self) -> String;

    /// Assign one cookie, e.g. `EPISODES=s=1&r=x; path=/`
    fn set_cookie(&mut self, assignment: &str);

    /// Referrer of the current page (empty when there is none)
    fn referrer(&self) -> String;

    /// URL of the current page
    fn location(&self) -> String;

    /// Issue a one-shot GET. Completion is never observed.
    fn send_beacon(&mut self, url: &str) -> Result<(), BeaconError>;
}

/// Wall clock in epoch milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// In-memory host with a manual clock
///
/// Cookies behave like a single-path cookie jar: assigning a name replaces
/// the previous value and attributes after the first `;` are dropped.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    now_ms: i64,
    cookies: Vec<(String, String)>,
    referrer: String,
    location: String,
    beacons: Vec<String>,
    beacon_failure: Option<String>,
}

impl RecordingHost {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    pub fn with_cookie_header(mut self, header: &str) -> Self {
        for assignment in header.split(';') {
            self.set_cookie(assignment.trim());
        }
        self
    }

    pub fn with_now(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }

    pub fn set_now(&mut self, now_ms: i64) {
        self.now_ms = now_ms;
    }

    pub fn advance(&mut self, delta_ms: i64) {
        self.now_ms += delta_ms;
    }

    /// Make subsequent beacons fail with the given reason
    pub fn fail_beacons(&mut self, reason: impl Into<String>) {
        self.beacon_failure = Some(reason.into());
    }

    /// URLs of every beacon handed to the host, including failed ones
    pub fn beacons(&self) -> &[String] {
        &self.beacons
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(cookie, _)| cookie == name)
            .map(|(_, value)| value.as_str())
    }

    /// Host for the next page: same cookies, referred from this location
    pub fn navigate(&self, location: impl Into<String>) -> Self {
        Self {
            now_ms: self.now_ms,
            cookies: self.cookies.clone(),
            referrer: self.location.clone(),
            location: location.into(),
            beacons: Vec::new(),
            beacon_failure: None,
        }
    }
}

impl PageHost for RecordingHost {
    fn now_ms(&self) -> i64 {
        self.now_ms
    }

    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookie(&mut self, assignment: &str) {
        let pair = assignment.split(';').next().unwrap_or("");
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        match self.cookies.iter_mut().find(|(cookie, _)| cookie == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.cookies.push((name.to_string(), value.to_string())),
        }
    }

    fn referrer(&self) -> String {
        self.referrer.clone()
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn send_beacon(&mut self, url: &str) -> Result<(), BeaconError> {
        self.beacons.push(url.to_string());
        match &self.beacon_failure {
            Some(reason) => Err(BeaconError::Request(reason.clone())),
            None => Ok(()),
        }
    }
}
