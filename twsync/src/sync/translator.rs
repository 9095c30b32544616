//! Field translator
//!
//! Pure conversions between task fields and reminder fields. Every function
//! is total: bad input is clamped or dropped and reported as a
//! `TranslationWarning` instead of an error.

use super::models::{
    Geofence, LocationRef, LocationShortcut, Priority, ReminderFields, TaskFields, TriggerEdge,
};
use crate::config::DEFAULT_GEOFENCE_RADIUS_M;
use crate::storage::LocationTable;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Recoverable problem found while translating
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslationWarning {
    PriorityClamped { raw: i64, bucket: Priority },
    UnknownPriority { raw: String },
    UnparseableDate { raw: String },
    ListNotFound { list: String, substituted: String },
}

impl fmt::Display for TranslationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationWarning::PriorityClamped { raw, bucket } => {
                write!(f, "priority {} out of range, clamped to {}", raw, bucket.as_str())
            }
            TranslationWarning::UnknownPriority { raw } => {
                write!(f, "unknown priority {:?}, treated as none", raw)
            }
            TranslationWarning::UnparseableDate { raw } => {
                write!(f, "unparseable date {:?}, treated as absent", raw)
            }
            TranslationWarning::ListNotFound { list, substituted } => {
                write!(f, "list {:?} not found, using {:?}", list, substituted)
            }
        }
    }
}

/// A translated value plus whatever had to be clamped on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Translated<T> {
    pub value: T,
    pub warnings: Vec<TranslationWarning>,
}

/// Reference data needed by the translator during one pass
pub struct TranslateContext<'a> {
    pub locations: &'a LocationTable,
    /// Lists the remote reports; `None` skips the existence check
    pub known_lists: Option<&'a HashSet<String>>,
    pub default_list: &'a str,
}

// ===== Priority =====

pub fn priority_to_remote(priority: Priority) -> i64 {
    match priority {
        Priority::High => 1,
        Priority::Medium => 5,
        Priority::Low => 9,
        Priority::None => 0,
    }
}

/// Map the remote 0–9 scale onto the four local buckets
pub fn priority_from_remote(raw: i64) -> (Priority, Option<TranslationWarning>) {
    match raw {
        0 => (Priority::None, None),
        1..=4 => (Priority::High, None),
        5 => (Priority::Medium, None),
        6..=9 => (Priority::Low, None),
        r if r < 0 => (
            Priority::None,
            Some(TranslationWarning::PriorityClamped {
                raw,
                bucket: Priority::None,
            }),
        ),
        _ => (
            Priority::Low,
            Some(TranslationWarning::PriorityClamped {
                raw,
                bucket: Priority::Low,
            }),
        ),
    }
}

// ===== Dates =====

/// Drop seconds and sub-seconds. Sync is lossy below one minute.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Parse RFC 3339 or Taskwarrior's compact `20260301T093000Z` form
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TranslationWarning> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%SZ") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(TranslationWarning::UnparseableDate {
        raw: raw.to_string(),
    })
}

/// Lenient optional date: unparseable becomes `None` and a warning
pub fn parse_optional_timestamp(
    raw: Option<&str>,
    warnings: &mut Vec<TranslationWarning>,
) -> Option<DateTime<Utc>> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    match parse_timestamp(raw) {
        Ok(ts) => Some(ts),
        Err(warning) => {
            tracing::warn!("{}", warning);
            warnings.push(warning);
            None
        }
    }
}

// ===== Location =====

/// Find a shortcut: exact key, then case-insensitive key prefix
pub fn lookup_shortcut<'a>(table: &'a LocationTable, query: &str) -> Option<&'a LocationShortcut> {
    if let Some(exact) = table.get(query) {
        return Some(exact);
    }
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    table
        .iter()
        .find(|shortcut| shortcut.key.to_lowercase().starts_with(&needle))
}

/// Local location reference to a remote geofence
pub fn resolve_location(location: &LocationRef, table: &LocationTable) -> Geofence {
    let trigger = location.trigger.unwrap_or_default();

    if location.coordinates.is_some() {
        return Geofence {
            name: location.name.clone(),
            coordinates: location.coordinates,
            radius: location.radius.unwrap_or(DEFAULT_GEOFENCE_RADIUS_M),
            trigger,
        };
    }

    match lookup_shortcut(table, &location.name) {
        Some(shortcut) => Geofence {
            name: shortcut.display_name.clone(),
            coordinates: Some(super::models::Coordinates {
                latitude: shortcut.latitude,
                longitude: shortcut.longitude,
            }),
            radius: location.radius.unwrap_or(shortcut.default_radius),
            trigger,
        },
        // Literal name, no geofence coordinates without a shortcut
        None => Geofence {
            name: location.name.clone(),
            coordinates: None,
            radius: location.radius.unwrap_or(DEFAULT_GEOFENCE_RADIUS_M),
            trigger,
        },
    }
}

/// Remote geofence back to a local reference. Never invents a shortcut key.
pub fn location_from_geofence(geofence: &Geofence, table: &LocationTable) -> LocationRef {
    let trigger = match geofence.trigger {
        TriggerEdge::Arriving => None,
        TriggerEdge::Leaving => Some(TriggerEdge::Leaving),
    };

    if let Some(shortcut) = table.find_by_display_name(&geofence.name) {
        let radius = if (geofence.radius - shortcut.default_radius).abs() < f64::EPSILON {
            None
        } else {
            Some(geofence.radius)
        };
        return LocationRef {
            name: shortcut.key.clone(),
            coordinates: None,
            radius,
            trigger,
        };
    }

    let radius = if geofence.coordinates.is_some()
        && (geofence.radius - DEFAULT_GEOFENCE_RADIUS_M).abs() >= f64::EPSILON
    {
        Some(geofence.radius)
    } else {
        None
    };
    LocationRef {
        name: geofence.name.clone(),
        coordinates: geofence.coordinates,
        radius,
        trigger,
    }
}

// ===== Whole records =====

fn requested_list(project: Option<&str>) -> Option<&str> {
    project.map(str::trim).filter(|p| !p.is_empty())
}

/// Whether a reminder in `list` is where `project` would have been mirrored,
/// counting the default-list fallback for projects the remote has no list for.
/// Without list names every project is assumed to have fallen back.
pub fn project_lands_in(project: Option<&str>, list: &str, ctx: &TranslateContext<'_>) -> bool {
    match requested_list(project) {
        None => list == ctx.default_list,
        Some(project) if project == list => true,
        Some(project) => {
            list == ctx.default_list
                && ctx
                    .known_lists
                    .is_none_or(|known| !known.contains(project))
        }
    }
}

/// Task fields to reminder fields
pub fn task_to_reminder(
    task: &TaskFields,
    ctx: &TranslateContext<'_>,
) -> Translated<ReminderFields> {
    let mut warnings = Vec::new();

    let list_name = match requested_list(task.project.as_deref()) {
        None => ctx.default_list.to_string(),
        Some(list) => match ctx.known_lists {
            Some(known) if !known.contains(list) => {
                warnings.push(TranslationWarning::ListNotFound {
                    list: list.to_string(),
                    substituted: ctx.default_list.to_string(),
                });
                ctx.default_list.to_string()
            }
            _ => list.to_string(),
        },
    };

    let value = ReminderFields {
        title: task.title.clone(),
        notes: task.notes.clone(),
        priority: priority_to_remote(task.priority),
        due_at: task.due_at.map(truncate_to_minute),
        is_done: task.is_done,
        list_name,
        geofence: task
            .location_ref
            .as_ref()
            .map(|loc| resolve_location(loc, ctx.locations)),
    };

    Translated { value, warnings }
}

/// Reminder fields to task fields. `remote_ref` is left for the caller.
pub fn reminder_to_task(
    reminder: &ReminderFields,
    ctx: &TranslateContext<'_>,
) -> Translated<TaskFields> {
    let mut warnings = Vec::new();

    let (priority, warning) = priority_from_remote(reminder.priority);
    warnings.extend(warning);

    let project = if reminder.list_name.is_empty() || reminder.list_name == ctx.default_list {
        None
    } else {
        Some(reminder.list_name.clone())
    };

    let value = TaskFields {
        title: reminder.title.clone(),
        notes: reminder.notes.clone(),
        priority,
        due_at: reminder.due_at.map(truncate_to_minute),
        is_done: reminder.is_done,
        project,
        location_ref: reminder
            .geofence
            .as_ref()
            .map(|g| location_from_geofence(g, ctx.locations)),
        remote_ref: None,
    };

    Translated { value, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::Coordinates;
    use chrono::TimeZone;

    fn table() -> LocationTable {
        LocationTable::from_shortcuts(vec![
            LocationShortcut {
                key: "home".into(),
                display_name: "Home".into(),
                latitude: 52.37,
                longitude: 4.89,
                default_radius: 150.0,
            },
            LocationShortcut {
                key: "office".into(),
                display_name: "Office HQ".into(),
                latitude: 52.08,
                longitude: 5.12,
                default_radius: 100.0,
            },
        ])
    }

    fn ctx<'a>(
        locations: &'a LocationTable,
        lists: Option<&'a HashSet<String>>,
    ) -> TranslateContext<'a> {
        TranslateContext {
            locations,
            known_lists: lists,
            default_list: "Reminders",
        }
    }

    fn fields() -> TaskFields {
        TaskFields {
            title: "Buy milk".into(),
            notes: String::new(),
            priority: Priority::None,
            due_at: None,
            is_done: false,
            project: Some("Shopping".into()),
            location_ref: None,
            remote_ref: None,
        }
    }

    #[test]
    fn test_priority_round_trip_for_every_bucket() {
        for priority in Priority::ALL {
            let remote = priority_to_remote(priority);
            let (back, warning) = priority_from_remote(remote);
            assert_eq!(back, priority);
            assert!(warning.is_none());
        }
    }

    #[test]
    fn test_out_of_range_priority_is_clamped_with_warning() {
        let (p, w) = priority_from_remote(42);
        assert_eq!(p, Priority::Low);
        assert!(matches!(w, Some(TranslationWarning::PriorityClamped { raw: 42, .. })));

        let (p, w) = priority_from_remote(-3);
        assert_eq!(p, Priority::None);
        assert!(w.is_some());

        assert_eq!(priority_from_remote(3).0, Priority::High);
        assert_eq!(priority_from_remote(7).0, Priority::Low);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(parse_timestamp("20260301T093000Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-03-01T09:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-03-01T10:30:00+01:00").unwrap(), expected);
        assert!(parse_timestamp("next tuesday").is_err());
    }

    #[test]
    fn test_unparseable_optional_date_is_absent() {
        let mut warnings = Vec::new();
        assert_eq!(parse_optional_timestamp(Some("garbage"), &mut warnings), None);
        assert_eq!(warnings.len(), 1);
        assert_eq!(parse_optional_timestamp(Some(""), &mut warnings), None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_due_date_truncated_to_minute() {
        let locations = table();
        let mut task = fields();
        task.due_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 45).unwrap());

        let reminder = task_to_reminder(&task, &ctx(&locations, None)).value;
        assert_eq!(
            reminder.due_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_project_lands_in_default_list_only_when_missing_remotely() {
        let locations = table();
        let lists: HashSet<String> = ["Shopping".to_string()].into();
        let c = ctx(&locations, Some(&lists));

        assert!(project_lands_in(Some("Shopping"), "Shopping", &c));
        assert!(project_lands_in(Some("Garage"), "Reminders", &c));
        assert!(!project_lands_in(Some("Shopping"), "Reminders", &c));
        assert!(!project_lands_in(Some("Garage"), "Shopping", &c));
        assert!(project_lands_in(None, "Reminders", &c));
        assert!(!project_lands_in(None, "Shopping", &c));

        let unknown = ctx(&locations, None);
        assert!(project_lands_in(Some("Shopping"), "Reminders", &unknown));
    }

    #[test]
    fn test_buy_milk_translation() {
        let locations = table();
        let out = task_to_reminder(&fields(), &ctx(&locations, None));
        assert!(out.warnings.is_empty());
        assert_eq!(out.value.list_name, "Shopping");
        assert_eq!(out.value.priority, 0);
        assert_eq!(out.value.due_at, None);
        assert_eq!(out.value.geofence, None);
    }

    #[test]
    fn test_missing_list_falls_back_to_default() {
        let locations = table();
        let known: HashSet<String> = ["Reminders".to_string()].into_iter().collect();
        let out = task_to_reminder(&fields(), &ctx(&locations, Some(&known)));
        assert_eq!(out.value.list_name, "Reminders");
        assert!(matches!(
            out.warnings.as_slice(),
            [TranslationWarning::ListNotFound { .. }]
        ));
    }

    #[test]
    fn test_default_list_maps_to_no_project() {
        let locations = table();
        let mut task = fields();
        task.project = None;
        let reminder = task_to_reminder(&task, &ctx(&locations, None)).value;
        assert_eq!(reminder.list_name, "Reminders");

        let back = reminder_to_task(&reminder, &ctx(&locations, None)).value;
        assert_eq!(back.project, None);
    }

    #[test]
    fn test_location_exact_then_prefix_then_literal() {
        let locations = table();

        let exact = resolve_location(&LocationRef::named("home"), &locations);
        assert_eq!(exact.name, "Home");
        assert_eq!(exact.radius, 150.0);
        assert!(exact.coordinates.is_some());

        let prefix = resolve_location(&LocationRef::named("OFF"), &locations);
        assert_eq!(prefix.name, "Office HQ");

        let literal = resolve_location(&LocationRef::named("Grandma's"), &locations);
        assert_eq!(literal.name, "Grandma's");
        assert_eq!(literal.coordinates, None);
    }

    #[test]
    fn test_inline_coordinates_bypass_table() {
        let locations = table();
        let loc = LocationRef {
            name: "home".into(),
            coordinates: Some(Coordinates {
                latitude: 1.0,
                longitude: 2.0,
            }),
            radius: Some(25.0),
            trigger: Some(TriggerEdge::Leaving),
        };
        let fence = resolve_location(&loc, &locations);
        assert_eq!(fence.name, "home");
        assert_eq!(fence.radius, 25.0);
        assert_eq!(fence.trigger, TriggerEdge::Leaving);
        assert_eq!(fence.coordinates.map(|c| c.latitude), Some(1.0));
    }

    #[test]
    fn test_reverse_location_uses_shortcut_key_or_literal_name() {
        let locations = table();

        let known = Geofence {
            name: "office hq".into(),
            coordinates: Some(Coordinates {
                latitude: 52.08,
                longitude: 5.12,
            }),
            radius: 100.0,
            trigger: TriggerEdge::Arriving,
        };
        assert_eq!(location_from_geofence(&known, &locations), LocationRef::named("office"));

        let unknown = Geofence {
            name: "Gym".into(),
            coordinates: Some(Coordinates {
                latitude: 1.0,
                longitude: 1.0,
            }),
            radius: 100.0,
            trigger: TriggerEdge::Leaving,
        };
        let back = location_from_geofence(&unknown, &locations);
        assert_eq!(back.name, "Gym");
        assert!(locations.get("gym").is_none());
        assert_eq!(back.trigger, Some(TriggerEdge::Leaving));
        assert!(back.coordinates.is_some());
    }
}
