use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Index;

/// Arbitrary event payload
pub type EventData = Value;

/// Key-value payload of dict and journal events
pub type EventMap = serde_json::Map<String, Value>;

static NULL: Value = Value::Null;

/// Recognised event names
pub mod names {
    /// Subscribes a callback to every event
    pub const WILDCARD: &str = "*";

    pub const SETUP_UI: &str = "core.setup_ui";
    pub const JOURNAL_ENTRY: &str = "core.journal_entry";
    pub const JOURNAL_ENTRY_CQC: &str = "core.journal_entry_cqc";
    pub const DASHBOARD_ENTRY: &str = "core.dashboard_entry";
    pub const CAPI_DATA: &str = "core.capi_data";
    pub const SETUP_PREFERENCES_UI: &str = "core.setup_preferences_ui";
    pub const PREFERENCES_CLOSED: &str = "core.preferences_closed";
    pub const COMMANDER_CHANGED: &str = "core.commander_changed";
    pub const SHUTDOWN: &str = "core.shutdown";

    // Notifications forwarded from the bundled third-party integrations
    pub const EDSM_NOTIFY_SYSTEM: &str = "edsm.notify_system";
    pub const INARA_NOTIFY_LOCATION: &str = "inara.notify_location";
    pub const INARA_NOTIFY_SHIP: &str = "inara.notify_ship";
}

/// Capability names providers can be registered for
pub mod capabilities {
    pub const SHIPYARD_URL: &str = "shipyard_url";
    pub const SYSTEM_URL: &str = "system_url";
    pub const STATION_URL: &str = "station_url";
    pub const SHIPYARD_TEXT: &str = "shipyard_text";
    pub const SYSTEM_TEXT: &str = "system_text";
    pub const STATION_TEXT: &str = "station_text";
}

/// A journal (or journal-like) entry together with the commander context it
/// was read in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    commander: String,
    is_beta: bool,
    system: Option<String>,
    station: Option<String>,
    entry: EventMap,
    /// Running snapshot of ship and location status
    state: EventMap,
}

impl JournalEntry {
    pub fn new(commander: impl Into<String>, is_beta: bool, entry: EventMap) -> Self {
        Self {
            commander: commander.into(),
            is_beta,
            system: None,
            station: None,
            entry,
            state: EventMap::new(),
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn with_station(mut self, station: Option<String>) -> Self {
        self.station = station;
        self
    }

    pub fn with_state(mut self, state: EventMap) -> Self {
        self.state = state;
        self
    }

    pub fn commander(&self) -> &str {
        &self.commander
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

    pub fn entry(&self) -> &EventMap {
        &self.entry
    }

    pub fn state(&self) -> &EventMap {
        &self.state
    }
}

/// Payload carried by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    Empty,
    Data(EventData),
    Dict(EventMap),
    Journal(JournalEntry),
}

/// An immutable notification dispatched to plugin callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    time: DateTime<Utc>,
    payload: EventPayload,
}

impl Event {
    /// Create a bare event stamped with the current time
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_payload(name, EventPayload::Empty)
    }

    /// Create an event carrying arbitrary data
    pub fn with_data(name: impl Into<String>, data: EventData) -> Self {
        Self::with_payload(name, EventPayload::Data(data))
    }

    /// Create an event carrying a key-value mapping
    pub fn with_dict(name: impl Into<String>, data: EventMap) -> Self {
        Self::with_payload(name, EventPayload::Dict(data))
    }

    /// Create a journal event
    pub fn journal(name: impl Into<String>, entry: JournalEntry) -> Self {
        Self::with_payload(name, EventPayload::Journal(entry))
    }

    pub fn with_payload(name: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            name: name.into(),
            time: Utc::now(),
            payload,
        }
    }

    /// Override the timestamp
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Data of a data event
    pub fn data(&self) -> Option<&EventData> {
        match &self.payload {
            EventPayload::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Mapping of a dict or journal event
    pub fn dict(&self) -> Option<&EventMap> {
        match &self.payload {
            EventPayload::Dict(map) => Some(map),
            EventPayload::Journal(journal) => Some(&journal.entry),
            _ => None,
        }
    }

    /// Journal context of a journal event
    pub fn journal_entry(&self) -> Option<&JournalEntry> {
        match &self.payload {
            EventPayload::Journal(journal) => Some(journal),
            _ => None,
        }
    }

    /// Look up `key` in the event's mapping
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.dict().and_then(|map| map.get(key))
    }

    /// Look up `key`, falling back to `default`
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    /// The journal `event` field, e.g. `"FSDJump"`
    pub fn event_name(&self) -> Option<&str> {
        self.journal_entry()
            .and_then(|journal| journal.entry.get("event"))
            .and_then(Value::as_str)
    }
}

impl Index<&str> for Event {
    type Output = Value;

    /// Missing keys (and events without a mapping) index to `Value::Null`.
    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> EventMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_event_creation() {
        let before = Utc::now();
        let event = Event::new("core.journal_event");

        assert_eq!(event.name(), "core.journal_event");
        assert!(event.time() >= before);
        assert_eq!(event.payload(), &EventPayload::Empty);
        assert!(event.data().is_none());
        assert!(event.dict().is_none());
    }

    #[test]
    fn test_explicit_time() {
        let time = DateTime::parse_from_rfc3339("3308-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = Event::new("x").at(time);
        assert_eq!(event.time(), time);
    }

    #[test]
    fn test_dict_event_access() {
        let event = Event::with_dict("core.preferences_closed", map(json!({"cmdr": "Jameson", "is_beta": false})));

        assert_eq!(event.get("cmdr"), Some(&json!("Jameson")));
        assert_eq!(event["is_beta"], json!(false));
        assert_eq!(event["missing"], Value::Null);

        let fallback = json!("none");
        assert_eq!(event.get_or("missing", &fallback), &fallback);
    }

    #[test]
    fn test_journal_event() {
        let entry = JournalEntry::new("Jameson", false, map(json!({"event": "Docked", "StationName": "Jameson Memorial"})))
            .with_system(Some("Shinrarta Dezhra".to_string()))
            .with_station(Some("Jameson Memorial".to_string()))
            .with_state(map(json!({"Credits": 1000})));
        let event = Event::journal(names::JOURNAL_ENTRY, entry);

        assert_eq!(event.event_name(), Some("Docked"));
        assert_eq!(event["StationName"], json!("Jameson Memorial"));

        let journal = event.journal_entry().unwrap();
        assert_eq!(journal.commander(), "Jameson");
        assert!(!journal.is_beta());
        assert_eq!(journal.system(), Some("Shinrarta Dezhra"));
        assert_eq!(journal.state().get("Credits"), Some(&json!(1000)));
    }

    #[test]
    fn test_data_event_has_no_mapping() {
        let event = Event::with_data("edsm.notify_system", json!(["Sol"]));
        assert_eq!(event.data(), Some(&json!(["Sol"])));
        assert!(event.get("0").is_none());
        assert!(event.event_name().is_none());
    }
}
