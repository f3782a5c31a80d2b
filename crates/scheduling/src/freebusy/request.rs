/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{FreeBusyPeriod, FreeBusyQuery, TimeRange, expand::resolve_date};
use crate::{
    ScheduleResult, Scheduler, SchedulingBackend,
    itip::{ItipError, SchedulingMethod, export::itip_build_envelope},
    status::ScheduleStatus,
    store::Capability,
};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarParameter,
        ICalendarProperty, ICalendarValue, Uri,
    },
};
use trc::AddContext;
use utils::sanitize_calendar_address;

pub const FREEBUSY_NO_USER: &str = "3.7;Invalid calendar user or insufficient permissions";

#[derive(Debug, Clone)]
pub struct FreeBusyResponse {
    pub recipient: String,
    pub request_status: &'static str,
    pub calendar_data: Option<ICalendar>,
}

struct FreeBusyRequest<'x> {
    window: TimeRange,
    organizer: &'x ICalendarEntry,
    uid: Option<&'x ICalendarEntry>,
    attendees: Vec<(String, &'x ICalendarEntry)>,
}

fn parse_request(ical: &ICalendar) -> Result<FreeBusyRequest<'_>, ItipError> {
    let resolver = ical.build_tz_resolver();
    let mut component = None;

    for comp in &ical.components {
        if comp.component_type == ICalendarComponentType::VFreebusy {
            if component.is_some() {
                return Err(ItipError::InvalidFreeBusyRequest(
                    "Multiple VFREEBUSY components found",
                ));
            }
            component = Some(comp);
        }
    }
    let component = component.ok_or(ItipError::InvalidFreeBusyRequest(
        "No VFREEBUSY component found",
    ))?;

    let mut start = None;
    let mut end = None;
    let mut organizer = None;
    let mut uid = None;
    let mut attendees: Vec<(String, &ICalendarEntry)> = Vec::new();

    for entry in &component.entries {
        let tz_id = entry.tz_id();
        match (&entry.name, entry.values.first()) {
            (ICalendarProperty::Dtstart, Some(ICalendarValue::PartialDateTime(dt))) => {
                let tz = resolver.resolve_or_default(tz_id);
                start = resolve_date(dt, tz, tz).map(|dt| dt.timestamp());
            }
            (ICalendarProperty::Dtend, Some(ICalendarValue::PartialDateTime(dt))) => {
                let tz = resolver.resolve_or_default(tz_id);
                end = resolve_date(dt, tz, tz).map(|dt| dt.timestamp());
            }
            (ICalendarProperty::Uid, Some(ICalendarValue::Text(_))) => {
                uid = Some(entry);
            }
            (
                ICalendarProperty::Organizer,
                Some(ICalendarValue::Text(_) | ICalendarValue::Uri(Uri::Location(_))),
            ) => {
                organizer = Some(entry);
            }
            (
                ICalendarProperty::Attendee,
                Some(ICalendarValue::Text(value) | ICalendarValue::Uri(Uri::Location(value))),
            ) => {
                if let Some(email) = sanitize_calendar_address(value)
                    && !attendees.iter().any(|(known, _)| known == &email)
                {
                    attendees.push((email, entry));
                }
            }
            _ => {}
        }
    }

    let (Some(start), Some(end)) = (start, end) else {
        return Err(ItipError::InvalidFreeBusyRequest(
            "Missing DTSTART or DTEND in VFREEBUSY component",
        ));
    };
    if start >= end {
        return Err(ItipError::InvalidFreeBusyRequest(
            "DTEND must be later than DTSTART",
        ));
    }
    let organizer = organizer.ok_or(ItipError::InvalidFreeBusyRequest(
        "Missing ORGANIZER in VFREEBUSY component",
    ))?;
    if attendees.is_empty() {
        return Err(ItipError::InvalidFreeBusyRequest(
            "Missing ATTENDEE in VFREEBUSY component",
        ));
    }

    Ok(FreeBusyRequest {
        window: TimeRange::new(start, end),
        organizer,
        uid,
        attendees,
    })
}

/// Builds a METHOD:REPLY VFREEBUSY object for the given periods.
pub fn build_freebusy_reply(
    prod_id: &str,
    window: TimeRange,
    periods: &[FreeBusyPeriod],
) -> ICalendar {
    let mut freebusy = ICalendarComponent {
        component_type: ICalendarComponentType::VFreebusy,
        entries: Vec::with_capacity(periods.len() + 6),
        component_ids: vec![],
    };
    freebusy.add_dtstamp(PartialDateTime::now());
    freebusy.add_property(
        ICalendarProperty::Dtstart,
        PartialDateTime::from_utc_timestamp(window.start),
    );
    freebusy.add_property(
        ICalendarProperty::Dtend,
        PartialDateTime::from_utc_timestamp(window.end),
    );
    for period in periods {
        freebusy.add_property_with_params(
            ICalendarProperty::Freebusy,
            [ICalendarParameter::fbtype(period.fbtype.to_ical())],
            period.to_ical(),
        );
    }

    let mut envelope = itip_build_envelope(&SchedulingMethod::Reply, prod_id);
    envelope.component_ids.push(1);
    ICalendar {
        components: vec![envelope, freebusy],
    }
}

impl<T: SchedulingBackend> Scheduler<T> {
    /// Answers a VFREEBUSY REQUEST with one response per attendee.
    pub async fn free_busy_request(
        &self,
        request: &ICalendar,
    ) -> ScheduleResult<Vec<FreeBusyResponse>> {
        let request = parse_request(request)?;
        let mut responses = Vec::with_capacity(request.attendees.len());

        for (email, attendee) in &request.attendees {
            let recipient = format!("mailto:{email}");
            let home = match self.backend.calendar_home(email).await {
                Ok(Some(home)) => home,
                Ok(None) => {
                    responses.push(FreeBusyResponse {
                        recipient,
                        request_status: FREEBUSY_NO_USER,
                        calendar_data: None,
                    });
                    continue;
                }
                Err(err) => {
                    trc::error!(err.caused_by(trc::location!()));
                    responses.push(FreeBusyResponse {
                        recipient,
                        request_status: ScheduleStatus::TempFail.as_request_status(),
                        calendar_data: None,
                    });
                    continue;
                }
            };

            let result = match self
                .backend
                .has_capability(home.account_id, Capability::FreeBusy)
                .await
                .caused_by(trc::location!())
            {
                Ok(true) => {
                    self.free_busy(
                        home.account_id,
                        &FreeBusyQuery::new(request.window.start, request.window.end)
                            .with_availability(true)
                            .with_personal(true),
                    )
                    .await
                }
                Ok(false) => {
                    responses.push(FreeBusyResponse {
                        recipient,
                        request_status: FREEBUSY_NO_USER,
                        calendar_data: None,
                    });
                    continue;
                }
                Err(err) => Err(err),
            };

            let reply = match result {
                Ok(periods) => Some(build_freebusy_reply(
                    &self.config.prod_id,
                    request.window,
                    &periods,
                )),
                Err(err) => {
                    trc::error!(err.account_id(home.account_id));
                    None
                }
            };

            match reply {
                Some(mut reply) => {
                    if let Some(component) = reply
                        .components
                        .iter_mut()
                        .find(|comp| comp.component_type == ICalendarComponentType::VFreebusy)
                    {
                        component.entries.push(request.organizer.clone());
                        component.entries.push((*attendee).clone());
                        if let Some(uid) = request.uid {
                            component.entries.push(uid.clone());
                        }
                    }
                    responses.push(FreeBusyResponse {
                        recipient,
                        request_status: ScheduleStatus::Success.as_request_status(),
                        calendar_data: Some(reply),
                    });
                }
                None => {
                    responses.push(FreeBusyResponse {
                        recipient,
                        request_status: ScheduleStatus::TempFail.as_request_status(),
                        calendar_data: None,
                    });
                }
            }
        }

        Ok(responses)
    }
}
