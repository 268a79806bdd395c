//! Scenario actions and the line format they are written in.
//!
//! One action per line:
//!
//! ```text
//! # comment
//! description, summary="seek then stop"
//! seek, playback-time=1.0, start=0.0, flush=true
//! set-property, target-element-name=sink, property-name=sync, property-value=false
//! check-state, state=playing
//! stop, playback-time=2.0
//! ```
//!
//! Values are inferred (bool, integer, float, string) unless quoted.
//! A trailing backslash continues the line.

use std::collections::BTreeMap;
use std::fmt;

use pipewatch_graph::{ClockTime, PropertyValue, State};

use crate::error::{Result, ScenarioError};

/// Field every action may carry: when to run, in seconds of stream time.
pub const PLAYBACK_TIME: &str = "playback-time";

/// Static description of an action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionType {
    /// Name as written in scenario files
    pub name: &'static str,
    /// What it does
    pub description: &'static str,
    /// Fields that must be present
    pub mandatory: &'static [&'static str],
    /// Fields that may be present
    pub optional: &'static [&'static str],
}

/// Every supported action type.
pub const ACTION_TYPES: &[ActionType] = &[
    ActionType {
        name: "seek",
        description: "seeks the pipeline to 'start' (seconds)",
        mandatory: &["start"],
        optional: &["flush", PLAYBACK_TIME],
    },
    ActionType {
        name: "set-state",
        description: "changes the pipeline state",
        mandatory: &["state"],
        optional: &[PLAYBACK_TIME],
    },
    ActionType {
        name: "set-property",
        description: "writes a property on a named element",
        mandatory: &["target-element-name", "property-name", "property-value"],
        optional: &[PLAYBACK_TIME],
    },
    ActionType {
        name: "eos",
        description: "sends an end-of-stream event into the pipeline",
        mandatory: &[],
        optional: &[PLAYBACK_TIME],
    },
    ActionType {
        name: "check-state",
        description: "checks the state of the pipeline or of a named element",
        mandatory: &["state"],
        optional: &["target-element-name", PLAYBACK_TIME],
    },
    ActionType {
        name: "check-property",
        description: "checks a property value on a named element",
        mandatory: &["target-element-name", "property-name", "property-value"],
        optional: &[PLAYBACK_TIME],
    },
    ActionType {
        name: "stop",
        description: "ends the scenario",
        mandatory: &[],
        optional: &[PLAYBACK_TIME],
    },
];

/// What an action does.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Seek the pipeline.
    Seek {
        /// Target position
        start: ClockTime,
        /// Flush before seeking
        flush: bool,
    },
    /// Change the pipeline state.
    SetState {
        /// Requested state
        state: State,
    },
    /// Write a property on a named element.
    SetProperty {
        /// Element name
        target: String,
        /// Property name
        property: String,
        /// Value to write
        value: PropertyValue,
    },
    /// Send end-of-stream.
    Eos,
    /// Assert a state.
    CheckState {
        /// Expected state
        state: State,
        /// Element name; the pipeline when absent
        target: Option<String>,
    },
    /// Assert a property value.
    CheckProperty {
        /// Element name
        target: String,
        /// Property name
        property: String,
        /// Expected value
        value: PropertyValue,
    },
    /// End the scenario.
    Stop,
}

impl ActionKind {
    /// Action type name.
    pub const fn name(&self) -> &'static str {
        match self {
            ActionKind::Seek { .. } => "seek",
            ActionKind::SetState { .. } => "set-state",
            ActionKind::SetProperty { .. } => "set-property",
            ActionKind::Eos => "eos",
            ActionKind::CheckState { .. } => "check-state",
            ActionKind::CheckProperty { .. } => "check-property",
            ActionKind::Stop => "stop",
        }
    }
}

/// One scheduled action.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Position in the scenario, from 0
    pub index: usize,
    /// Source line
    pub line: usize,
    /// What to do
    pub kind: ActionKind,
    /// When to run; `None` runs as soon as the pipeline plays
    pub playback_time: Option<ClockTime>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.kind.name())?;
        if let Some(t) = self.playback_time {
            write!(f, " at {t}")?;
        }
        Ok(())
    }
}

/// Parsed scenario text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScenario {
    /// Fields of the `description` line, if any
    pub description: BTreeMap<String, PropertyValue>,
    /// Actions in file order
    pub actions: Vec<Action>,
}

/// Parses scenario text.
pub fn parse_scenario(text: &str) -> Result<ParsedScenario> {
    let mut parsed = ParsedScenario::default();
    let mut pending = String::new();
    let mut start_line = 0;

    for (number, raw) in text.lines().enumerate() {
        let line_no = number + 1;
        let trimmed = raw.trim();
        if pending.is_empty() {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            start_line = line_no;
        }
        if let Some(head) = trimmed.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }
        pending.push_str(trimmed);

        let (name, fields) = split_fields(&pending, start_line)?;
        pending.clear();

        if name == "description" {
            if !parsed.actions.is_empty() || !parsed.description.is_empty() {
                return Err(ScenarioError::Parse {
                    line: start_line,
                    message: "description must be the first entry".into(),
                });
            }
            parsed.description = fields;
            continue;
        }
        let index = parsed.actions.len();
        parsed
            .actions
            .push(build_action(index, start_line, &name, fields)?);
    }

    if !pending.is_empty() {
        return Err(ScenarioError::Parse {
            line: start_line,
            message: "line continuation at end of file".into(),
        });
    }
    Ok(parsed)
}

/// Splits `name, key=value, ...` honoring double quotes.
fn split_fields(line: &str, line_no: usize) -> Result<(String, BTreeMap<String, PropertyValue>)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = Vec::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                was_quoted = true;
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
                quoted.push(std::mem::replace(&mut was_quoted, false));
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err(ScenarioError::Parse {
            line: line_no,
            message: "unterminated quote".into(),
        });
    }
    parts.push(current);
    quoted.push(was_quoted);

    let mut iter = parts.into_iter().zip(quoted);
    let name = match iter.next() {
        Some((name, _)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            return Err(ScenarioError::Parse {
                line: line_no,
                message: "missing action type".into(),
            })
        }
    };

    let mut fields = BTreeMap::new();
    for (part, was_quoted) in iter {
        if part.trim().is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| ScenarioError::Parse {
            line: line_no,
            message: format!("expected key=value, got '{}'", part.trim()),
        })?;
        let value = if was_quoted {
            PropertyValue::Str(value.trim().to_string())
        } else {
            PropertyValue::infer(value)
        };
        fields.insert(key.trim().to_string(), value);
    }
    Ok((name, fields))
}

struct Fields<'a> {
    line: usize,
    action: &'static str,
    map: &'a BTreeMap<String, PropertyValue>,
}

impl Fields<'_> {
    fn get(&self, field: &'static str) -> Result<&PropertyValue> {
        self.map.get(field).ok_or(ScenarioError::MissingField {
            line: self.line,
            action: self.action,
            field,
        })
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ScenarioError {
        ScenarioError::InvalidField {
            line: self.line,
            action: self.action,
            field,
            reason: reason.into(),
        }
    }

    fn time(&self, field: &'static str) -> Result<Option<ClockTime>> {
        let Some(value) = self.map.get(field) else {
            return Ok(None);
        };
        match value.as_f64() {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(ClockTime::from_seconds_f64(s))),
            _ => Err(self.invalid(field, format!("expected seconds, got '{value}'"))),
        }
    }

    fn required_time(&self, field: &'static str) -> Result<ClockTime> {
        self.get(field)?;
        Ok(self.time(field)?.unwrap_or(ClockTime::ZERO))
    }

    fn state(&self, field: &'static str) -> Result<State> {
        self.get(field)?
            .to_string()
            .parse()
            .map_err(|e: pipewatch_graph::GraphError| self.invalid(field, e.to_string()))
    }

    fn string(&self, field: &'static str) -> Result<String> {
        Ok(self.get(field)?.to_string())
    }
}

fn build_action(
    index: usize,
    line: usize,
    name: &str,
    map: BTreeMap<String, PropertyValue>,
) -> Result<Action> {
    let action_type = ACTION_TYPES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| ScenarioError::UnknownAction {
            line,
            action: name.to_string(),
        })?;
    let fields = Fields {
        line,
        action: action_type.name,
        map: &map,
    };

    let kind = match action_type.name {
        "seek" => ActionKind::Seek {
            start: fields.required_time("start")?,
            flush: match map.get("flush") {
                None => true,
                Some(v) => v
                    .as_bool()
                    .ok_or_else(|| fields.invalid("flush", "expected a boolean"))?,
            },
        },
        "set-state" => ActionKind::SetState {
            state: fields.state("state")?,
        },
        "set-property" => ActionKind::SetProperty {
            target: fields.string("target-element-name")?,
            property: fields.string("property-name")?,
            value: fields.get("property-value")?.clone(),
        },
        "eos" => ActionKind::Eos,
        "check-state" => ActionKind::CheckState {
            state: fields.state("state")?,
            target: map.get("target-element-name").map(ToString::to_string),
        },
        "check-property" => ActionKind::CheckProperty {
            target: fields.string("target-element-name")?,
            property: fields.string("property-name")?,
            value: fields.get("property-value")?.clone(),
        },
        _ => ActionKind::Stop,
    };

    Ok(Action {
        index,
        line,
        kind,
        playback_time: fields.time(PLAYBACK_TIME)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions_in_order() {
        let text = r#"
            # warm up
            description, summary="seek, then stop"
            set-state, state=playing
            seek, playback-time=1.5, start=0
            set-property, target-element-name=sink, property-name=label, property-value="a, b"
            stop, playback-time=3
        "#;
        let parsed = parse_scenario(text).unwrap();

        assert_eq!(
            parsed.description.get("summary"),
            Some(&PropertyValue::Str("seek, then stop".into()))
        );
        assert_eq!(parsed.actions.len(), 4);
        assert_eq!(parsed.actions[0].playback_time, None);
        assert_eq!(
            parsed.actions[1].kind,
            ActionKind::Seek {
                start: ClockTime::ZERO,
                flush: true
            }
        );
        assert_eq!(
            parsed.actions[1].playback_time,
            Some(ClockTime::from_mseconds(1500))
        );
        assert_eq!(
            parsed.actions[2].kind,
            ActionKind::SetProperty {
                target: "sink".into(),
                property: "label".into(),
                value: PropertyValue::Str("a, b".into()),
            }
        );
        assert_eq!(parsed.actions[3].index, 3);
    }

    #[test]
    fn test_line_continuation() {
        let parsed = parse_scenario("check-state, \\\n   state=paused").unwrap();
        assert_eq!(
            parsed.actions[0].kind,
            ActionKind::CheckState {
                state: State::Paused,
                target: None
            }
        );
        assert_eq!(parsed.actions[0].line, 1);
    }

    #[test]
    fn test_unknown_action() {
        let err = parse_scenario("\nfly, speed=3").unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownAction { line: 2, .. }));
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        assert!(matches!(
            parse_scenario("set-state").unwrap_err(),
            ScenarioError::MissingField { field: "state", .. }
        ));
        assert!(matches!(
            parse_scenario("set-state, state=flying").unwrap_err(),
            ScenarioError::InvalidField { field: "state", .. }
        ));
        assert!(matches!(
            parse_scenario("seek, start=-1").unwrap_err(),
            ScenarioError::InvalidField { field: "start", .. }
        ));
        assert!(matches!(
            parse_scenario("seek").unwrap_err(),
            ScenarioError::MissingField { field: "start", .. }
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(
            parse_scenario("eos, note=\"oops").unwrap_err(),
            ScenarioError::Parse { line: 1, .. }
        ));
    }

    #[test]
    fn test_description_must_come_first() {
        assert!(parse_scenario("eos\ndescription, summary=late").is_err());
    }
}
