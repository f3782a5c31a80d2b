/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{FreeBusyPeriod, FreeBusyType, TimeRange};
use ahash::AHashSet;
use calcard::{
    common::{PartialDateTime, timezone::Tz},
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarPeriod,
        ICalendarProperty, ICalendarStatus, ICalendarTransparency, ICalendarValue,
    },
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rrule::RRuleSet;

const DAY: i64 = 86400;

/// Start, duration and zone of one component, with times already resolved.
#[derive(Debug, Clone, Copy)]
pub struct ComponentTimes {
    pub start: i64,
    pub local_start: NaiveDateTime,
    pub tz: Tz,
    pub duration: i64,
}

/// One expanded instance of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start: i64,
    pub duration: i64,
}

pub(crate) fn resolve_date(dt: &PartialDateTime, tz: Tz, default_tz: Tz) -> Option<DateTime<Tz>> {
    let dt = dt.to_date_time_with_tz(tz)?;
    if dt.timezone().is_floating() && !default_tz.is_floating() {
        default_tz.from_local_datetime(&dt.naive_local()).earliest()
    } else {
        Some(dt)
    }
}

fn entry_date<'x>(entry: &'x ICalendarEntry) -> Option<&'x PartialDateTime> {
    match entry.values.first()? {
        ICalendarValue::PartialDateTime(dt) => Some(dt.as_ref()),
        _ => None,
    }
}

pub fn component_times(
    component: &ICalendarComponent,
    resolve: &impl Fn(Option<&str>) -> Tz,
    default_tz: Tz,
) -> Option<ComponentTimes> {
    let mut start = None;
    let mut end = None;
    let mut duration = None;
    let mut is_date = false;

    for entry in &component.entries {
        match &entry.name {
            ICalendarProperty::Dtstart => {
                if let Some(dt) = entry_date(entry) {
                    is_date = dt.hour.is_none();
                    start = resolve_date(dt, resolve(entry.tz_id()), default_tz);
                }
            }
            ICalendarProperty::Dtend | ICalendarProperty::Due => {
                if let Some(dt) = entry_date(entry) {
                    end = resolve_date(dt, resolve(entry.tz_id()), default_tz)
                        .map(|dt| dt.timestamp());
                }
            }
            ICalendarProperty::Duration => {
                if let Some(ICalendarValue::Duration(value)) = entry.values.first() {
                    duration = Some(value.as_seconds());
                }
            }
            _ => {}
        }
    }

    let start = start?;
    let duration = duration
        .or_else(|| end.map(|end| end - start.timestamp()))
        .unwrap_or(if is_date { DAY } else { 0 })
        .max(0);

    Some(ComponentTimes {
        start: start.timestamp(),
        local_start: start.naive_local(),
        tz: start.timezone(),
        duration,
    })
}

/// Extracts the RRULE text of an entry by serializing it.
fn rrule_text(entry: &ICalendarEntry) -> Option<String> {
    let ical = ICalendar {
        components: vec![
            ICalendarComponent {
                component_type: ICalendarComponentType::VCalendar,
                entries: vec![],
                component_ids: vec![1],
            },
            ICalendarComponent {
                component_type: ICalendarComponentType::VEvent,
                entries: vec![entry.clone()],
                component_ids: vec![],
            },
        ],
    };
    let text = ical.to_string().replace("\r\n ", "").replace("\n ", "");

    text.lines()
        .find_map(|line| {
            line.get(..6)
                .filter(|prefix| prefix.eq_ignore_ascii_case("RRULE:"))
                .map(|_| line[6..].trim().to_string())
        })
        .filter(|rule| !rule.is_empty())
}

/// RDATE or EXDATE instances. PERIOD values keep their own length,
/// plain dates use `default_duration`.
fn recurrence_instances(
    component: &ICalendarComponent,
    property: ICalendarProperty,
    resolve: &impl Fn(Option<&str>) -> Tz,
    default_tz: Tz,
    default_duration: i64,
) -> Vec<Occurrence> {
    component
        .entries
        .iter()
        .filter(|entry| entry.name == property)
        .flat_map(|entry| {
            let tz = resolve(entry.tz_id());
            let timestamp = move |dt: &PartialDateTime| {
                resolve_date(dt, tz, default_tz).map(|dt| dt.timestamp())
            };
            entry.values.iter().filter_map(move |value| match value {
                ICalendarValue::PartialDateTime(dt) => Some(Occurrence {
                    start: timestamp(dt.as_ref())?,
                    duration: default_duration,
                }),
                ICalendarValue::Period(ICalendarPeriod::Range { start, end }) => {
                    let start = timestamp(start)?;
                    Some(Occurrence {
                        start,
                        duration: (timestamp(end)? - start).max(0),
                    })
                }
                ICalendarValue::Period(ICalendarPeriod::Duration { start, duration }) => {
                    Some(Occurrence {
                        start: timestamp(start)?,
                        duration: duration.as_seconds().max(0),
                    })
                }
                _ => None,
            })
        })
        .collect()
}

fn to_local(tz: Tz, naive: &NaiveDateTime) -> Option<i64> {
    tz.from_local_datetime(naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Expands the occurrences of one component that fall in `window`,
/// honouring RRULE, RDATE and EXDATE.
pub fn expand_component(
    component: &ICalendarComponent,
    times: &ComponentTimes,
    resolve: &impl Fn(Option<&str>) -> Tz,
    default_tz: Tz,
    window: TimeRange,
    max_expansions: usize,
) -> Vec<Occurrence> {
    let mut occurrences = vec![Occurrence {
        start: times.start,
        duration: times.duration,
    }];

    for rule in component
        .entries
        .iter()
        .filter(|entry| entry.name == ICalendarProperty::Rrule)
        .filter_map(rrule_text)
    {
        // Local wall-clock times are expanded as UTC, then mapped back to the zone
        let source = format!(
            "DTSTART:{}Z\nRRULE:{rule}",
            times.local_start.format("%Y%m%dT%H%M%S")
        );
        let rrule_set = match source.parse::<RRuleSet>() {
            Ok(rrule_set) => rrule_set,
            Err(err) => {
                trc::event!(
                    Calendar(trc::CalendarEvent::RecurrenceExpansionError),
                    Details = rule,
                    Reason = err.to_string(),
                );
                continue;
            }
        };

        let tz: rrule::Tz = Utc.into();
        let (Some(after), Some(before)) = (
            DateTime::from_timestamp(
                window
                    .start
                    .saturating_sub(times.duration)
                    .saturating_sub(DAY),
                0,
            ),
            DateTime::from_timestamp(window.end.saturating_add(DAY), 0),
        ) else {
            continue;
        };
        let limit = max_expansions.min(u16::MAX as usize) as u16;
        let result = rrule_set
            .after(after.with_timezone(&tz))
            .before(before.with_timezone(&tz))
            .all(limit);

        if result.limited {
            trc::event!(
                Calendar(trc::CalendarEvent::RecurrenceExpansionLimit),
                Details = rule,
                Limit = max_expansions,
            );
        }

        occurrences.extend(
            result
                .dates
                .iter()
                .filter_map(|dt| to_local(times.tz, &dt.naive_utc()))
                .map(|start| Occurrence {
                    start,
                    duration: times.duration,
                }),
        );
    }

    occurrences.extend(recurrence_instances(
        component,
        ICalendarProperty::Rdate,
        resolve,
        default_tz,
        times.duration,
    ));

    let exdates = recurrence_instances(
        component,
        ICalendarProperty::Exdate,
        resolve,
        default_tz,
        0,
    )
    .into_iter()
    .map(|exdate| exdate.start)
    .collect::<AHashSet<_>>();

    // Longest first so an RDATE period wins over a rule instance at the same start
    occurrences.sort_unstable_by(|a, b| a.start.cmp(&b.start).then(b.duration.cmp(&a.duration)));
    occurrences.dedup_by_key(|occurrence| occurrence.start);
    occurrences.retain(|occurrence| {
        !exdates.contains(&occurrence.start)
            && window.intersects(occurrence.start, occurrence.start + occurrence.duration)
    });
    occurrences.truncate(max_expansions);
    occurrences
}

/// Busy type of a component, `None` when it does not block time.
pub fn component_busy_type(component: &ICalendarComponent, personal: bool) -> FreeBusyType {
    let mut fbtype = FreeBusyType::Busy;

    for entry in &component.entries {
        match (&entry.name, entry.values.first()) {
            (
                ICalendarProperty::Transp,
                Some(ICalendarValue::Transparency(ICalendarTransparency::Transparent)),
            ) if personal => {
                return FreeBusyType::None;
            }
            (ICalendarProperty::Status, Some(ICalendarValue::Status(status))) => match status {
                ICalendarStatus::Cancelled if personal => return FreeBusyType::None,
                ICalendarStatus::Tentative => fbtype = FreeBusyType::BusyTentative,
                _ => {}
            },
            _ => {}
        }
    }

    fbtype
}

fn recurrence_id(
    component: &ICalendarComponent,
    resolve: &impl Fn(Option<&str>) -> Tz,
    default_tz: Tz,
) -> Option<i64> {
    component
        .entries
        .iter()
        .find(|entry| entry.name == ICalendarProperty::RecurrenceId)
        .and_then(|entry| {
            resolve_date(entry_date(entry)?, resolve(entry.tz_id()), default_tz)
                .map(|dt| dt.timestamp())
        })
}

/// Expands the VEVENTs of a calendar object into busy periods within `window`.
///
/// Master instances replaced by an override stay in the list with
/// `FreeBusyType::None` and the override contributes its own period.
pub fn expand_object(
    ical: &ICalendar,
    window: TimeRange,
    default_tz: Tz,
    max_expansions: usize,
    personal: bool,
) -> Vec<FreeBusyPeriod> {
    let resolver = ical.build_tz_resolver();
    let resolve = |tz_id: Option<&str>| {
        let tz = resolver.resolve_or_default(tz_id);
        if tz.is_floating() { default_tz } else { tz }
    };

    let mut periods = Vec::new();
    let mut overrides = Vec::new();
    let mut master_duration = 0;

    for component in ical
        .components
        .iter()
        .filter(|comp| comp.component_type == ICalendarComponentType::VEvent)
    {
        if let Some(recurrence_id) = recurrence_id(component, &resolve, default_tz) {
            overrides.push((recurrence_id, component));
            continue;
        }
        let Some(times) = component_times(component, &resolve, default_tz) else {
            continue;
        };
        master_duration = times.duration;
        let fbtype = component_busy_type(component, personal);
        periods.extend(
            expand_component(
                component,
                &times,
                &resolve,
                default_tz,
                window,
                max_expansions,
            )
            .into_iter()
            .map(|occurrence| {
                FreeBusyPeriod::new(
                    occurrence.start,
                    occurrence.start + occurrence.duration,
                    fbtype,
                )
            }),
        );
    }

    periods.sort_unstable_by_key(|period| period.start);

    // The binary search below needs the master list sorted
    let mut moved = Vec::with_capacity(overrides.len());
    for (recurrence_id, component) in overrides {
        if let Ok(idx) = periods.binary_search_by_key(&recurrence_id, |period| period.start) {
            periods[idx].fbtype = FreeBusyType::None;
        }

        let (start, duration) = match component_times(component, &resolve, default_tz) {
            Some(times) => (times.start, times.duration),
            None => (recurrence_id, master_duration),
        };
        let fbtype = component_busy_type(component, personal);
        if fbtype != FreeBusyType::None && window.intersects(start, start + duration) {
            moved.push(FreeBusyPeriod::new(start, start + duration, fbtype));
        }
    }
    periods.extend(moved);

    periods
}
