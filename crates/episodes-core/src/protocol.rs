//! Episode commands and their colon-delimited wire form
//!
//! ```text
//! EPISODES:init
//! EPISODES:mark:<name>[:<epochMs>]
//! EPISODES:measure:<name>[:<startRef>[:<endRef>]]
//! EPISODES:done
//! ```
//!
//! Inside the engine commands travel as the typed [`Command`] union; the
//! string form exists for collaborators on a shared message channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Namespace prefix that marks a message as ours
pub const NAMESPACE: &str = "EPISODES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Reset the page view and start timing
    Init,
    /// Record a mark; `None` means the time the command was posted
    Mark { name: String, time: Option<i64> },
    /// Derive a measure; `start` defaults to `name`, `end` to the post time
    Measure {
        name: String,
        start: Option<String>,
        end: Option<String>,
    },
    /// Finish the page view and send the beacon
    Done,
}

impl Command {
    pub fn mark(name: impl Into<String>) -> Self {
        Command::Mark {
            name: name.into(),
            time: None,
        }
    }

    pub fn mark_at(name: impl Into<String>, time: i64) -> Self {
        Command::Mark {
            name: name.into(),
            time: Some(time),
        }
    }

    /// Measure from the mark of the same name until now
    pub fn measure(name: impl Into<String>) -> Self {
        Command::Measure {
            name: name.into(),
            start: None,
            end: None,
        }
    }

    pub fn measure_from(name: impl Into<String>, start: impl Into<String>) -> Self {
        Command::Measure {
            name: name.into(),
            start: Some(start.into()),
            end: None,
        }
    }

    pub fn measure_between(
        name: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Command::Measure {
            name: name.into(),
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    /// Parse a raw channel message.
    ///
    /// Extra trailing segments are ignored. An empty mark time segment means
    /// "now"; empty measure references are kept and will fail to resolve.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut parts = raw.split(':');
        if parts.next() != Some(NAMESPACE) {
            return Err(ProtocolError::ForeignNamespace);
        }

        match parts.next().unwrap_or("") {
            "init" => Ok(Command::Init),
            "done" => Ok(Command::Done),
            "mark" => {
                let name = required_name(parts.next(), "mark")?;
                let time = match parts.next() {
                    None | Some("") => None,
                    Some(time) => Some(
                        time.parse::<i64>()
                            .map_err(|_| ProtocolError::InvalidTime(time.to_string()))?,
                    ),
                };
                Ok(Command::Mark { name, time })
            }
            "measure" => {
                let name = required_name(parts.next(), "measure")?;
                let start = parts.next().map(str::to_string);
                let end = parts.next().map(str::to_string);
                Ok(Command::Measure { name, start, end })
            }
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }

    /// Render the wire form understood by [`Command::parse`]
    pub fn to_wire(&self) -> String {
        match self {
            Command::Init => format!("{NAMESPACE}:init"),
            Command::Done => format!("{NAMESPACE}:done"),
            Command::Mark { name, time: None } => format!("{NAMESPACE}:mark:{name}"),
            Command::Mark {
                name,
                time: Some(time),
            } => format!("{NAMESPACE}:mark:{name}:{time}"),
            Command::Measure { name, start, end } => {
                let mut wire = format!("{NAMESPACE}:measure:{name}");
                match (start, end) {
                    (None, None) => {}
                    (Some(start), None) => {
                        wire.push(':');
                        wire.push_str(start);
                    }
                    // No way to skip the start segment on the wire; the default is the name
                    (start, Some(end)) => {
                        wire.push(':');
                        wire.push_str(start.as_deref().unwrap_or(name.as_str()));
                        wire.push(':');
                        wire.push_str(end);
                    }
                }
                wire
            }
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::Mark { .. } => "mark",
            Command::Measure { .. } => "measure",
            Command::Done => "done",
        }
    }
}

fn required_name(segment: Option<&str>, action: &'static str) -> Result<String, ProtocolError> {
    match segment {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ProtocolError::MissingArgument {
            action,
            what: "name",
        }),
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_each_action() {
        assert_eq!(Command::parse("EPISODES:init"), Ok(Command::Init));
        assert_eq!(Command::parse("EPISODES:done"), Ok(Command::Done));
        assert_eq!(
            Command::parse("EPISODES:mark:pageready"),
            Ok(Command::mark("pageready"))
        );
        assert_eq!(
            Command::parse("EPISODES:mark:backendstarttime:1700000000000"),
            Ok(Command::mark_at("backendstarttime", 1_700_000_000_000))
        );
        assert_eq!(
            Command::parse("EPISODES:measure:domready"),
            Ok(Command::measure("domready"))
        );
        assert_eq!(
            Command::parse("EPISODES:measure:domready:frontendstarttime"),
            Ok(Command::measure_from("domready", "frontendstarttime"))
        );
        assert_eq!(
            Command::parse("EPISODES:measure:frontend:frontendstarttime:pageready"),
            Ok(Command::measure_between("frontend", "frontendstarttime", "pageready"))
        );
    }

    #[test]
    fn test_foreign_messages() {
        for raw in ["", "hello", "episodes:init", "EPISODESX:init", "{\"type\":\"x\"}"] {
            assert_eq!(Command::parse(raw), Err(ProtocolError::ForeignNamespace), "{raw}");
        }
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(
            Command::parse("EPISODES:reset"),
            Err(ProtocolError::UnknownAction("reset".into()))
        );
        assert_eq!(
            Command::parse("EPISODES"),
            Err(ProtocolError::UnknownAction(String::new()))
        );
    }

    #[test]
    fn test_missing_name() {
        assert_eq!(
            Command::parse("EPISODES:mark"),
            Err(ProtocolError::MissingArgument {
                action: "mark",
                what: "name"
            })
        );
        assert!(Command::parse("EPISODES:measure:").is_err());
    }

    #[test]
    fn test_mark_time() {
        assert_eq!(Command::parse("EPISODES:mark:a:"), Ok(Command::mark("a")));
        assert_eq!(
            Command::parse("EPISODES:mark:a:soon"),
            Err(ProtocolError::InvalidTime("soon".into()))
        );
    }

    #[test]
    fn test_extra_segments_ignored() {
        assert_eq!(Command::parse("EPISODES:done:now"), Ok(Command::Done));
        assert_eq!(
            Command::parse("EPISODES:measure:a:b:c:d"),
            Ok(Command::measure_between("a", "b", "c"))
        );
    }

    #[test]
    fn test_empty_measure_refs_are_kept() {
        assert_eq!(
            Command::parse("EPISODES:measure:a:"),
            Ok(Command::measure_from("a", ""))
        );
    }

    #[test]
    fn test_to_wire() {
        assert_eq!(Command::Init.to_wire(), "EPISODES:init");
        assert_eq!(Command::mark_at("a", 5).to_string(), "EPISODES:mark:a:5");
        assert_eq!(
            Command::Measure {
                name: "a".into(),
                start: None,
                end: Some("9".into()),
            }
            .to_wire(),
            "EPISODES:measure:a:a:9"
        );
    }

    #[test]
    fn test_from_str() {
        let command: Command = "EPISODES:mark:x".parse().unwrap();
        assert_eq!(command.action(), "mark");
    }
}
