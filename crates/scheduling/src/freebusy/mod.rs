/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use availability::{AvailabilityEntry, availability_entries, merge_availability};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendarComponentType, ICalendarDuration, ICalendarFreeBusyType, ICalendarPeriod,
    },
};
use expand::expand_object;
use trc::AddContext;

use crate::{Scheduler, SchedulingBackend, store::ResourceMeta};

pub mod availability;
pub mod expand;
pub mod request;

/// Half-open UTC interval in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FreeBusyType {
    Busy,
    BusyTentative,
    BusyUnavailable,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodEnd {
    End(i64),
    Duration(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeBusyPeriod {
    pub start: i64,
    pub end: PeriodEnd,
    pub fbtype: FreeBusyType,
}

#[derive(Debug, Clone)]
pub struct FreeBusyQuery {
    pub window: TimeRange,
    pub calendar_prefix: Option<String>,
    pub components: Vec<ICalendarComponentType>,
    pub consider_availability: bool,
    pub personal: bool,
}

/// Working state of one free/busy query.
#[derive(Debug)]
pub struct CalQueryFilter<'x> {
    pub query: &'x FreeBusyQuery,
    pub periods: Vec<FreeBusyPeriod>,
    pub availability: Vec<AvailabilityEntry>,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        TimeRange { start, end }
    }

    pub fn unbounded() -> Self {
        TimeRange {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    pub fn len(&self) -> i64 {
        self.end.saturating_sub(self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Zero-length intervals match when they fall inside the range.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        if start == end {
            start >= self.start && start < self.end
        } else {
            start < self.end && end > self.start
        }
    }

    pub fn intersection(&self, other: TimeRange) -> Option<TimeRange> {
        let range = TimeRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        };
        (!range.is_empty()).then_some(range)
    }
}

impl FreeBusyType {
    pub fn to_ical(&self) -> ICalendarFreeBusyType {
        match self {
            FreeBusyType::Busy => ICalendarFreeBusyType::Busy,
            FreeBusyType::BusyTentative => ICalendarFreeBusyType::BusyTentative,
            FreeBusyType::BusyUnavailable => ICalendarFreeBusyType::BusyUnavailable,
            FreeBusyType::None => ICalendarFreeBusyType::Free,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        hashify::tiny_map_ignore_case!(value.as_bytes(),
            "BUSY" => FreeBusyType::Busy,
            "BUSY-TENTATIVE" => FreeBusyType::BusyTentative,
            "BUSY-UNAVAILABLE" => FreeBusyType::BusyUnavailable,
            "FREE" => FreeBusyType::None,
        )
    }
}

impl FreeBusyPeriod {
    pub fn new(start: i64, end: i64, fbtype: FreeBusyType) -> Self {
        FreeBusyPeriod {
            start,
            end: PeriodEnd::End(end),
            fbtype,
        }
    }

    pub fn with_duration(start: i64, duration: i64, fbtype: FreeBusyType) -> Self {
        FreeBusyPeriod {
            start,
            end: PeriodEnd::Duration(duration),
            fbtype,
        }
    }

    pub fn end(&self) -> i64 {
        match self.end {
            PeriodEnd::End(end) => end,
            PeriodEnd::Duration(duration) => self.start.saturating_add(duration),
        }
    }

    fn set_end(&mut self, end: i64) {
        self.end = match self.end {
            PeriodEnd::End(_) => PeriodEnd::End(end),
            PeriodEnd::Duration(_) => PeriodEnd::Duration(end - self.start),
        };
    }

    fn clip(mut self, window: TimeRange) -> Option<Self> {
        let range = window.intersection(TimeRange::new(self.start, self.end()))?;
        if let PeriodEnd::Duration(_) = self.end {
            self.end = PeriodEnd::Duration(range.end - range.start);
        } else {
            self.end = PeriodEnd::End(range.end);
        }
        self.start = range.start;
        Some(self)
    }

    /// Value of the FREEBUSY property for this period.
    pub fn to_ical(&self) -> ICalendarPeriod {
        let start = PartialDateTime::from_utc_timestamp(self.start);
        match self.end {
            PeriodEnd::End(end) => ICalendarPeriod::Range {
                start,
                end: PartialDateTime::from_utc_timestamp(end),
            },
            PeriodEnd::Duration(duration) => ICalendarPeriod::Duration {
                start,
                duration: ICalendarDuration::from_seconds(duration),
            },
        }
    }
}

impl FreeBusyQuery {
    pub fn new(start: i64, end: i64) -> Self {
        FreeBusyQuery {
            window: TimeRange::new(start, end),
            calendar_prefix: None,
            components: vec![
                ICalendarComponentType::VEvent,
                ICalendarComponentType::VAvailability,
            ],
            consider_availability: false,
            personal: true,
        }
    }

    pub fn with_calendar_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.calendar_prefix = Some(prefix.into());
        self
    }

    pub fn with_availability(mut self, consider_availability: bool) -> Self {
        self.consider_availability = consider_availability;
        self
    }

    pub fn with_personal(mut self, personal: bool) -> Self {
        self.personal = personal;
        self
    }
}

impl<'x> CalQueryFilter<'x> {
    pub fn new(query: &'x FreeBusyQuery) -> Self {
        CalQueryFilter {
            query,
            periods: Vec::new(),
            availability: Vec::new(),
        }
    }

    pub fn matches(&self, resource: &ResourceMeta) -> bool {
        self.query.components.contains(&resource.component_type)
            && self.query.window.intersects(resource.start, resource.end)
    }

    pub fn finish(mut self) -> Vec<FreeBusyPeriod> {
        merge_availability(
            self.query.window,
            std::mem::take(&mut self.availability),
            &mut self.periods,
        );
        finish_periods(self.query.window, self.periods)
    }
}

/// Clips, coalesces and orders periods for output.
pub fn finish_periods(window: TimeRange, periods: Vec<FreeBusyPeriod>) -> Vec<FreeBusyPeriod> {
    let mut periods = periods
        .into_iter()
        .filter(|period| period.fbtype != FreeBusyType::None)
        .filter_map(|period| period.clip(window))
        .collect::<Vec<_>>();
    if periods.is_empty() {
        return periods;
    }

    periods.sort_unstable_by(|a, b| {
        a.fbtype
            .cmp(&b.fbtype)
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.end().cmp(&b.end()))
    });

    let mut merged: Vec<FreeBusyPeriod> = Vec::with_capacity(periods.len());
    for period in periods {
        match merged.last_mut() {
            Some(last) if last.fbtype == period.fbtype && period.start <= last.end() => {
                let end = last.end().max(period.end());
                if matches!(period.end, PeriodEnd::Duration(_)) {
                    last.end = PeriodEnd::Duration(end - last.start);
                } else {
                    last.set_end(end);
                }
            }
            _ => merged.push(period),
        }
    }

    merged.sort_unstable_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.end().cmp(&b.end()))
            .then_with(|| a.fbtype.cmp(&b.fbtype))
    });
    merged
}

impl<T: SchedulingBackend> Scheduler<T> {
    /// Computes the merged busy time of an account over a window.
    pub async fn free_busy(
        &self,
        account_id: u32,
        query: &FreeBusyQuery,
    ) -> trc::Result<Vec<FreeBusyPeriod>> {
        let mut filter = CalQueryFilter::new(query);
        let max_expansions = self.config.max_expansions;
        let default_tz = self.config.default_tz;

        for calendar in self
            .backend
            .list_calendars(account_id, query.calendar_prefix.as_deref())
            .await
            .caused_by(trc::location!())?
        {
            for resource in self
                .backend
                .scan_time_range(account_id, &calendar, query.window)
                .await
                .caused_by(trc::location!())?
            {
                if !filter.matches(&resource) {
                    continue;
                }

                if resource.component_type == ICalendarComponentType::VAvailability {
                    if let Some(ical) = self.fetch_calendar(&resource).await? {
                        filter.availability.extend(availability_entries(
                            &ical,
                            query.window,
                            default_tz,
                            max_expansions,
                        ));
                    }
                    continue;
                }

                if query.personal && (resource.is_transparent || resource.is_cancelled) {
                    continue;
                }

                if !resource.is_recurring {
                    filter.periods.push(FreeBusyPeriod::new(
                        resource.start,
                        resource.end,
                        if resource.is_tentative {
                            FreeBusyType::BusyTentative
                        } else {
                            FreeBusyType::Busy
                        },
                    ));
                } else if let Some(ical) = self.fetch_calendar(&resource).await? {
                    filter.periods.extend(expand_object(
                        &ical,
                        query.window,
                        default_tz,
                        max_expansions,
                        query.personal,
                    ));
                }
            }
        }

        if query.consider_availability
            && let Some(bytes) = self
                .backend
                .availability(account_id)
                .await
                .caused_by(trc::location!())?
        {
            match self.backend.parse(&bytes) {
                Ok(ical) => {
                    filter.availability.extend(availability_entries(
                        &ical,
                        query.window,
                        default_tz,
                        max_expansions,
                    ));
                }
                Err(err) => {
                    trc::error!(err.account_id(account_id).caused_by(trc::location!()));
                }
            }
        }

        let periods = filter.finish();

        trc::event!(
            Calendar(trc::CalendarEvent::FreeBusyQuery),
            AccountId = account_id,
            From = query.window.start,
            To = query.window.end,
            Total = periods.len(),
        );

        Ok(periods)
    }

    async fn fetch_calendar(
        &self,
        resource: &ResourceMeta,
    ) -> trc::Result<Option<calcard::icalendar::ICalendar>> {
        let Some(bytes) = self
            .backend
            .fetch(&resource.handle)
            .await
            .caused_by(trc::location!())?
        else {
            return Ok(None);
        };

        match self.backend.parse(&bytes) {
            Ok(ical) => Ok(Some(ical)),
            Err(err) => {
                trc::error!(
                    err.account_id(resource.handle.account_id)
                        .ctx(trc::Key::DocumentName, resource.handle.name.clone())
                        .caused_by(trc::location!())
                );
                Ok(None)
            }
        }
    }
}
