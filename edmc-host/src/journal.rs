//! Journal tracking: turns journal lines into plugin events.

use chrono::{DateTime, Utc};
use edmc_plugin::{Event, EventMap, JournalEntry, names};
use serde_json::{Value, json};

/// Running commander and location context built from journal entries
#[derive(Debug, Clone, Default)]
pub struct JournalState {
    commander: Option<String>,
    is_beta: bool,
    system: Option<String>,
    station: Option<String>,
    /// Snapshot handed to plugins with every journal event
    state: EventMap,
}

impl JournalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commander(&self) -> Option<&str> {
        self.commander.as_deref()
    }

    pub fn is_beta(&self) -> bool {
        self.is_beta
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn station(&self) -> Option<&str> {
        self.station.as_deref()
    }

    pub fn state(&self) -> &EventMap {
        &self.state
    }

    /// Process one journal line.
    ///
    /// Returns the events to fire, in order: `core.commander_changed` when
    /// the line switched commander, then the journal event itself.
    pub fn process_line(&mut self, line: &str) -> serde_json::Result<Vec<Event>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let entry: EventMap = serde_json::from_str(line)?;
        let mut events = Vec::new();

        let kind = entry.get("event").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "Fileheader" => {
                self.is_beta = entry
                    .get("gameversion")
                    .and_then(Value::as_str)
                    .is_some_and(|v| v.to_lowercase().contains("beta"));
            }
            "Commander" | "LoadGame" => {
                let name = entry
                    .get("Name")
                    .or_else(|| entry.get("Commander"))
                    .and_then(Value::as_str);
                if let Some(name) = name
                    && self.commander.as_deref() != Some(name)
                {
                    self.commander = Some(name.to_string());
                    self.system = None;
                    self.station = None;
                    self.state.clear();
                    events.push(Event::with_dict(
                        names::COMMANDER_CHANGED,
                        to_map(json!({ "cmdr": name, "is_beta": self.is_beta })),
                    ));
                }
                if kind == "LoadGame" {
                    self.copy_state(&entry, "Ship", "ShipType");
                    self.copy_state(&entry, "Credits", "Credits");
                }
            }
            "Location" | "FSDJump" | "CarrierJump" => {
                self.system = entry.get("StarSystem").and_then(Value::as_str).map(str::to_string);
                let docked = entry.get("Docked").and_then(Value::as_bool).unwrap_or(false);
                self.station = if docked {
                    entry.get("StationName").and_then(Value::as_str).map(str::to_string)
                } else {
                    None
                };
                self.copy_state(&entry, "StarPos", "StarPos");
            }
            "Docked" => {
                self.station = entry.get("StationName").and_then(Value::as_str).map(str::to_string);
            }
            "Undocked" => self.station = None,
            "Loadout" => {
                self.copy_state(&entry, "Ship", "ShipType");
                self.state.insert("Loadout".to_string(), Value::Object(entry.clone()));
            }
            _ => {}
        }

        let time = entry
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        let journal = JournalEntry::new(self.commander.clone().unwrap_or_default(), self.is_beta, entry)
            .with_system(self.system.clone())
            .with_station(self.station.clone())
            .with_state(self.state.clone());
        let event = Event::journal(names::JOURNAL_ENTRY, journal);
        events.push(match time {
            Some(time) => event.at(time),
            None => event,
        });

        Ok(events)
    }

    fn copy_state(&mut self, entry: &EventMap, from: &str, to: &str) {
        if let Some(value) = entry.get(from) {
            self.state.insert(to.to_string(), value.clone());
        }
    }
}

fn to_map(value: Value) -> EventMap {
    match value {
        Value::Object(map) => map,
        _ => EventMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commander_change() {
        let mut state = JournalState::new();
        let events = state
            .process_line(r#"{"timestamp":"2024-05-01T12:00:00Z","event":"Commander","Name":"Jameson"}"#)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), names::COMMANDER_CHANGED);
        assert_eq!(events[0]["cmdr"], "Jameson");
        assert_eq!(events[1].name(), names::JOURNAL_ENTRY);
        assert_eq!(events[1].time().to_rfc3339(), "2024-05-01T12:00:00+00:00");

        // Same commander again: no change event
        let events = state
            .process_line(r#"{"event":"LoadGame","Commander":"Jameson","Ship":"CobraMkIII","Credits":1000}"#)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(state.state()["ShipType"], "CobraMkIII");
    }

    #[test]
    fn test_location_tracking() {
        let mut state = JournalState::new();
        state.process_line(r#"{"event":"Fileheader","gameversion":"4.0 Beta"}"#).unwrap();
        assert!(state.is_beta());

        state
            .process_line(r#"{"event":"Location","StarSystem":"Sol","Docked":true,"StationName":"Abraham Lincoln"}"#)
            .unwrap();
        assert_eq!(state.system(), Some("Sol"));
        assert_eq!(state.station(), Some("Abraham Lincoln"));

        state.process_line(r#"{"event":"Undocked","StationName":"Abraham Lincoln"}"#).unwrap();
        assert_eq!(state.station(), None);

        let events = state
            .process_line(r#"{"event":"FSDJump","StarSystem":"Alpha Centauri","StarPos":[3.0,-0.1,3.1]}"#)
            .unwrap();
        let journal = events[0].journal_entry().unwrap();
        assert_eq!(journal.system(), Some("Alpha Centauri"));
        assert!(journal.is_beta());
        assert_eq!(events[0].event_name(), Some("FSDJump"));
        assert!(journal.state().contains_key("StarPos"));
    }

    #[test]
    fn test_blank_and_invalid_lines() {
        let mut state = JournalState::new();
        assert!(state.process_line("   ").unwrap().is_empty());
        assert!(state.process_line("not json").is_err());
        assert!(state.process_line("[1, 2]").is_err());
    }
}
