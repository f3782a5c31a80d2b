/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    FreeBusyPeriod, FreeBusyType, TimeRange,
    expand::{component_times, expand_component, resolve_date},
};
use crate::itip::is_property;
use calcard::{
    common::timezone::Tz,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarFreeBusyType,
        ICalendarProperty, ICalendarValue,
    },
};

const LOWEST_PRIORITY: u32 = 10;

/// One VAVAILABILITY component, reduced to its span and AVAILABLE instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityEntry {
    pub priority: u32,
    pub span: TimeRange,
    pub busy_type: FreeBusyType,
    pub available: Vec<TimeRange>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AvailabilityMerge {
    pub unfilled: Vec<TimeRange>,
    pub consumed: Vec<TimeRange>,
}

/// Reads the VAVAILABILITY components of an object whose span intersects `window`.
pub fn availability_entries(
    ical: &ICalendar,
    window: TimeRange,
    default_tz: Tz,
    max_expansions: usize,
) -> Vec<AvailabilityEntry> {
    let resolver = ical.build_tz_resolver();
    let resolve = |tz_id: Option<&str>| {
        let tz = resolver.resolve_or_default(tz_id);
        if tz.is_floating() { default_tz } else { tz }
    };
    let mut entries = Vec::new();

    for component in ical
        .components
        .iter()
        .filter(|comp| comp.component_type == ICalendarComponentType::VAvailability)
    {
        let mut priority = LOWEST_PRIORITY;
        let mut start = None;
        let mut end = None;
        let mut duration = None;
        let mut busy_type = FreeBusyType::BusyUnavailable;

        for entry in &component.entries {
            match (&entry.name, entry.values.first()) {
                (ICalendarProperty::Priority, Some(ICalendarValue::Integer(value))) => {
                    if *value > 0 {
                        priority = (*value as u32).min(LOWEST_PRIORITY);
                    }
                }
                (ICalendarProperty::Dtstart, Some(ICalendarValue::PartialDateTime(dt))) => {
                    start = resolve_date(dt, resolve(entry.tz_id()), default_tz)
                        .map(|dt| dt.timestamp());
                }
                (ICalendarProperty::Dtend, Some(ICalendarValue::PartialDateTime(dt))) => {
                    end = resolve_date(dt, resolve(entry.tz_id()), default_tz)
                        .map(|dt| dt.timestamp());
                }
                (ICalendarProperty::Duration, Some(ICalendarValue::Duration(value))) => {
                    duration = Some(value.as_seconds());
                }
                (ICalendarProperty::Busytype, Some(ICalendarValue::BusyType(value))) => {
                    busy_type = match value {
                        ICalendarFreeBusyType::Busy => FreeBusyType::Busy,
                        ICalendarFreeBusyType::BusyTentative => FreeBusyType::BusyTentative,
                        ICalendarFreeBusyType::BusyUnavailable => FreeBusyType::BusyUnavailable,
                        ICalendarFreeBusyType::Free => FreeBusyType::None,
                    };
                }
                (name, Some(value)) if is_property(name, "BUSYTYPE") => {
                    if let Some(fbtype) = value.as_text().and_then(FreeBusyType::parse) {
                        busy_type = fbtype;
                    }
                }
                _ => {}
            }
        }

        let span = TimeRange {
            start: start.unwrap_or(i64::MIN),
            end: end
                .or_else(|| Some(start?.saturating_add(duration?)))
                .unwrap_or(i64::MAX),
        };
        let Some(covered) = span.intersection(window) else {
            continue;
        };

        let available = merge_ranges(
            available_components(ical, component)
                .flat_map(|available| {
                    let Some(times) = component_times(available, &resolve, default_tz) else {
                        return Vec::new();
                    };
                    expand_component(
                        available,
                        &times,
                        &resolve,
                        default_tz,
                        covered,
                        max_expansions,
                    )
                    .into_iter()
                    .map(|occurrence| {
                        TimeRange::new(occurrence.start, occurrence.start + occurrence.duration)
                    })
                    .collect()
                })
                .collect(),
        );

        entries.push(AvailabilityEntry {
            priority,
            span,
            busy_type,
            available,
        });
    }

    entries
}

fn available_components<'x>(
    ical: &'x ICalendar,
    component: &'x ICalendarComponent,
) -> impl Iterator<Item = &'x ICalendarComponent> + 'x {
    component
        .component_ids
        .iter()
        .filter_map(|id| ical.components.get(*id as usize))
        .filter(|child| child.component_type.as_str().eq_ignore_ascii_case("AVAILABLE"))
}

fn merge_ranges(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.retain(|range| !range.is_empty());
    ranges.sort_unstable_by_key(|range| (range.start, range.end));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Resolves availability entries by priority over the window.
///
/// Each entry claims the still unfilled parts of the window covered by its
/// span; within them, time outside its AVAILABLE instances becomes busy.
/// Ranges no entry covers are returned as unfilled and produce no output.
pub fn merge_availability(
    window: TimeRange,
    mut entries: Vec<AvailabilityEntry>,
    periods: &mut Vec<FreeBusyPeriod>,
) -> AvailabilityMerge {
    let mut result = AvailabilityMerge {
        unfilled: if window.is_empty() {
            vec![]
        } else {
            vec![window]
        },
        consumed: vec![],
    };

    entries.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.span.start.cmp(&b.span.start))
    });

    for entry in entries {
        if result.unfilled.is_empty() {
            break;
        }

        let mut unfilled = Vec::with_capacity(result.unfilled.len() + 1);
        for range in result.unfilled {
            let Some(overlap) = range.intersection(entry.span) else {
                unfilled.push(range);
                continue;
            };

            let mut cursor = overlap.start;
            for available in entry
                .available
                .iter()
                .filter_map(|available| available.intersection(overlap))
            {
                if available.start > cursor {
                    periods.push(FreeBusyPeriod::new(
                        cursor,
                        available.start,
                        entry.busy_type,
                    ));
                }
                cursor = cursor.max(available.end);
            }
            if cursor < overlap.end {
                periods.push(FreeBusyPeriod::new(cursor, overlap.end, entry.busy_type));
            }
            result.consumed.push(overlap);

            if range.start < overlap.start {
                unfilled.push(TimeRange::new(range.start, overlap.start));
            }
            if overlap.end < range.end {
                unfilled.push(TimeRange::new(overlap.end, range.end));
            }
        }
        result.unfilled = unfilled;
    }

    result
}
