//! Slot table and manual override parsing.
//!
//! Weekdays are numbered Monday = 0 through Sunday = 6; hours are UTC.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::routine::{RoutineRegistry, SlotId};

static SLOT_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("SLOT_NUMBER_RE regex should compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub weekday: u8,
    pub hour: u8,
    pub slot: SlotId,
}

impl SlotEntry {
    pub fn new(weekday: u8, hour: u8, slot: SlotId) -> Self {
        Self { weekday, hour, slot }
    }
}

/// `(weekday, hour) → SlotId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTable {
    slots: BTreeMap<(u8, u8), SlotId>,
}

impl ScheduleTable {
    /// Build from explicit entries, rejecting out-of-range keys and
    /// duplicate `(weekday, hour)` pairs.
    pub fn from_entries(entries: &[SlotEntry]) -> PipelineResult<Self> {
        let mut slots = BTreeMap::new();
        for entry in entries {
            if entry.weekday > 6 || entry.hour > 23 {
                return Err(PipelineError::Configuration(format!(
                    "schedule entry out of range: weekday {} hour {}",
                    entry.weekday, entry.hour
                )));
            }
            if slots.insert((entry.weekday, entry.hour), entry.slot).is_some() {
                return Err(PipelineError::Configuration(format!(
                    "duplicate schedule entry: weekday {} hour {}",
                    entry.weekday, entry.hour
                )));
            }
        }
        Ok(Self { slots })
    }

    pub fn lookup(&self, weekday: u8, hour: u8) -> Option<SlotId> {
        self.slots.get(&(weekday, hour)).copied()
    }

    /// Slot with the lowest hour on `weekday`.
    pub fn first_of_day(&self, weekday: u8) -> Option<SlotId> {
        self.slots
            .range((weekday, 0)..=(weekday, 23))
            .next()
            .map(|(_, slot)| *slot)
    }

    pub fn entries(&self) -> Vec<SlotEntry> {
        self.slots
            .iter()
            .map(|(&(weekday, hour), &slot)| SlotEntry::new(weekday, hour, slot))
            .collect()
    }
}

impl Default for ScheduleTable {
    fn default() -> Self {
        let slots = [
            ((0, 10), 1),
            ((0, 16), 2),
            ((1, 10), 3),
            ((1, 16), 4),
            ((2, 10), 5),
            ((2, 16), 6),
            ((3, 10), 7),
            ((3, 16), 8),
            ((4, 10), 9),
            ((4, 16), 10),
            ((5, 12), 11),
            ((6, 12), 12),
        ]
        .into_iter()
        .collect();
        Self { slots }
    }
}

/// Resolve manual override text to a slot.
///
/// The first run of digits wins (`"Slot 6: Obscure"` → 6). Without a usable
/// number, the earliest word in the text that is a routine keyword selects
/// the lowest slot bound to that routine. Anything else is `None`.
pub fn parse_override(text: &str, registry: &RoutineRegistry) -> Option<SlotId> {
    if let Some(m) = SLOT_NUMBER_RE.find(text) {
        match m.as_str().parse::<SlotId>() {
            Ok(slot) => return Some(slot),
            Err(_) => {
                tracing::warn!(
                    number = m.as_str(),
                    "Override number out of range, trying keywords"
                );
            }
        }
    }
    registry.find_keyword(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_weekly_plan() {
        let table = ScheduleTable::default();
        assert_eq!(table.lookup(1, 10), Some(3));
        assert_eq!(table.lookup(3, 10), Some(7));
        assert_eq!(table.lookup(6, 12), Some(12));
        assert_eq!(table.lookup(1, 11), None);
        assert_eq!(table.entries().len(), 12);
    }

    #[test]
    fn first_of_day_is_lowest_hour() {
        let table = ScheduleTable::from_entries(&[
            SlotEntry::new(2, 18, 9),
            SlotEntry::new(2, 7, 4),
            SlotEntry::new(3, 0, 1),
        ])
        .unwrap();
        assert_eq!(table.first_of_day(2), Some(4));
        assert_eq!(table.first_of_day(3), Some(1));
        assert_eq!(table.first_of_day(5), None);
    }

    #[test]
    fn from_entries_rejects_bad_keys() {
        let bad_weekday = [SlotEntry::new(7, 10, 1)];
        assert!(ScheduleTable::from_entries(&bad_weekday).is_err());
        let bad_hour = [SlotEntry::new(0, 24, 1)];
        assert!(ScheduleTable::from_entries(&bad_hour).is_err());

        let dup = [SlotEntry::new(0, 10, 1), SlotEntry::new(0, 10, 2)];
        assert!(ScheduleTable::from_entries(&dup).is_err());
    }

    #[test]
    fn override_number_wins() {
        let registry = RoutineRegistry::default();
        assert_eq!(parse_override("Slot 6: Obscure", &registry), Some(6));
        assert_eq!(parse_override("rivalry 11", &registry), Some(11));
        assert_eq!(parse_override("42", &registry), Some(42));
    }

    #[test]
    fn override_keyword_fallback() {
        let registry = RoutineRegistry::default();
        assert_eq!(parse_override("Rivalry please", &registry), Some(3));
        assert_eq!(parse_override("STARTER", &registry), Some(7));
        assert_eq!(parse_override("999 obscure", &registry), Some(6));
    }

    #[test]
    fn override_uses_first_keyword_in_text() {
        let registry = RoutineRegistry::default();
        assert_eq!(parse_override("obscure or rivalry?", &registry), Some(6));
        assert_eq!(parse_override("Rivalry, not obscure", &registry), Some(3));
    }

    #[test]
    fn override_without_number_or_keyword() {
        let registry = RoutineRegistry::default();
        assert_eq!(parse_override("", &registry), None);
        assert_eq!(parse_override("do something nice", &registry), None);
    }
}
