/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    Email, InstanceId, ItipDateTime, ItipEntry, ItipEntryValue, ItipError, ItipSnapshot,
    ItipSnapshots, Organizer, Participant, ParticipantKind, RecurrenceId, is_scheduling_component,
};
use ahash::{AHashMap, AHashSet};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry,
        ICalendarParameterName, ICalendarParameterValue, ICalendarProperty,
        ICalendarScheduleAgentValue, ICalendarValue, Uri, timezone::TzResolver,
    },
};

/// Indexes the scheduling components of an object by instance.
pub fn itip_snapshot<'x>(
    ical: &'x ICalendar,
    account_emails: &[String],
) -> Result<ItipSnapshots<'x>, ItipError> {
    let root = ical
        .components
        .first()
        .filter(|root| root.component_type == ICalendarComponentType::VCalendar)
        .ok_or(ItipError::ICalendarParseError)?;
    let scheduled = root
        .component_ids
        .iter()
        .filter_map(|comp_id| {
            ical.components
                .get(*comp_id as usize)
                .filter(|comp| is_scheduling_component(comp))
                .map(|comp| (*comp_id as u16, comp))
        })
        .collect::<Vec<_>>();
    if !scheduled.iter().any(|(_, comp)| {
        comp.entries
            .iter()
            .any(|entry| entry.name == ICalendarProperty::Organizer)
    }) {
        return Err(ItipError::NoSchedulingInfo);
    }

    let mut reader = SnapshotReader {
        ical,
        account_emails,
        tz_resolver: None,
        organizer: None,
        uid: None,
        has_local_emails: false,
    };
    let mut component_type: Option<&'x ICalendarComponentType> = None;
    let mut kind = ParticipantKind::Attendee;
    let mut components = AHashMap::with_capacity(scheduled.len());

    for (comp_id, comp) in scheduled {
        match component_type {
            Some(component_type) if component_type != &comp.component_type => {
                return Err(ItipError::MultipleObjectTypes);
            }
            Some(_) => {}
            None => {
                component_type = Some(&comp.component_type);
                kind = ParticipantKind::of(comp);
            }
        }

        let (instance_id, snapshot) = reader.read_component(comp_id, comp, kind)?;
        if components.insert(instance_id, snapshot).is_some() {
            return Err(ItipError::MultipleObjectInstances);
        }
    }

    if !reader.has_local_emails {
        return Err(ItipError::NotOrganizerNorAttendee);
    }

    Ok(ItipSnapshots {
        organizer: reader.organizer.ok_or(ItipError::NoSchedulingInfo)?,
        uid: reader.uid.ok_or(ItipError::MissingUid)?,
        component_type: component_type.ok_or(ItipError::NoSchedulingInfo)?,
        kind,
        components,
    })
}

struct SnapshotReader<'x, 'y> {
    ical: &'x ICalendar,
    account_emails: &'y [String],
    tz_resolver: Option<TzResolver<&'x str>>,
    organizer: Option<Organizer<'x>>,
    uid: Option<&'x str>,
    has_local_emails: bool,
}

impl<'x> SnapshotReader<'x, '_> {
    fn read_component(
        &mut self,
        comp_id: u16,
        comp: &'x ICalendarComponent,
        kind: ParticipantKind,
    ) -> Result<(InstanceId, ItipSnapshot<'x>), ItipError> {
        let mut instance_id = InstanceId::Main;
        let mut snapshot = ItipSnapshot {
            comp_id,
            comp,
            participants: AHashSet::new(),
            dtstamp: None,
            entries: AHashSet::new(),
            sequence: None,
            request_status: Vec::new(),
        };

        for (entry_id, entry) in comp.entries.iter().enumerate() {
            let entry_id = entry_id as u16;
            match &entry.name {
                ICalendarProperty::Organizer => {
                    if let Some(organizer) =
                        Organizer::from_entry(entry_id, entry, self.account_emails)
                    {
                        self.set_organizer(organizer)?;
                    }
                }
                name if kind.is_participant(name) => {
                    if let Some(participant) =
                        Participant::from_entry(entry_id, entry, self.account_emails)
                    {
                        self.has_local_emails |= participant.email.is_local;
                        snapshot.participants.insert(participant);
                    }
                }
                ICalendarProperty::Uid => {
                    if let Some(uid) = entry
                        .values
                        .first()
                        .and_then(|v| v.as_text())
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                    {
                        match self.uid {
                            Some(existing) if existing != uid => return Err(ItipError::MultipleUid),
                            Some(_) => {}
                            None => self.uid = Some(uid),
                        }
                    }
                }
                ICalendarProperty::Sequence => {
                    if let Some(sequence) = entry.values.first().and_then(|v| v.as_integer()) {
                        snapshot.sequence = Some(sequence);
                    }
                }
                ICalendarProperty::RecurrenceId => {
                    if let Some(recurrence_id) = self.recurrence_id(entry_id, entry) {
                        instance_id = InstanceId::Recurrence(recurrence_id);
                    }
                }
                ICalendarProperty::RequestStatus => {
                    if let Some(value) = entry.values.first().and_then(|v| v.as_text()) {
                        snapshot.request_status.push(value);
                    }
                }
                ICalendarProperty::Dtstamp => {
                    snapshot.dtstamp = entry.values.first().and_then(|v| v.as_partial_date_time());
                }
                name if is_compared_property(name) => {
                    let tz_id = entry.tz_id();
                    for value in &entry.values {
                        let value = match value {
                            ICalendarValue::PartialDateTime(date) => {
                                ItipEntryValue::DateTime(ItipDateTime {
                                    date: date.as_ref(),
                                    tz_id,
                                    timestamp: self.timestamp(date, tz_id),
                                })
                            }
                            ICalendarValue::Uri(Uri::Location(v)) | ICalendarValue::Text(v) => {
                                ItipEntryValue::Text(v.as_str())
                            }
                            ICalendarValue::Duration(v) => ItipEntryValue::Duration(v),
                            ICalendarValue::RecurrenceRule(v) => ItipEntryValue::RRule(v),
                            ICalendarValue::Period(v) => ItipEntryValue::Period(v),
                            ICalendarValue::Integer(v) => ItipEntryValue::Integer(*v),
                            ICalendarValue::Status(v) => ItipEntryValue::Status(v),
                            _ => continue,
                        };
                        snapshot.entries.insert(ItipEntry {
                            name: &entry.name,
                            value,
                        });
                    }
                }
                _ => {}
            }
        }

        Ok((instance_id, snapshot))
    }

    fn set_organizer(&mut self, organizer: Organizer<'x>) -> Result<(), ItipError> {
        self.has_local_emails |= organizer.email.is_local;
        match &self.organizer {
            Some(existing) if existing.email.email != organizer.email.email => {
                Err(ItipError::MultipleOrganizer)
            }
            Some(_) => Ok(()),
            None => {
                self.organizer = Some(organizer);
                Ok(())
            }
        }
    }

    fn recurrence_id(&mut self, entry_id: u16, entry: &'x ICalendarEntry) -> Option<RecurrenceId> {
        let date = entry.values.first().and_then(|v| v.as_partial_date_time())?;
        let this_and_future = entry
            .params
            .iter()
            .any(|param| param.name == ICalendarParameterName::Range);

        Some(RecurrenceId {
            entry_id,
            date: self.timestamp(date, entry.tz_id()),
            this_and_future,
        })
    }

    fn timestamp(&mut self, date: &PartialDateTime, tz_id: Option<&str>) -> i64 {
        let ical = self.ical;
        let tz = self
            .tz_resolver
            .get_or_insert_with(|| ical.build_tz_resolver())
            .resolve_or_default(tz_id);
        date.to_date_time_with_tz(tz)
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| date.to_timestamp().unwrap_or_default())
    }
}

/// Properties whose values are compared between two versions of an instance.
fn is_compared_property(name: &ICalendarProperty) -> bool {
    matches!(
        name,
        ICalendarProperty::Dtstart
            | ICalendarProperty::Dtend
            | ICalendarProperty::Duration
            | ICalendarProperty::Due
            | ICalendarProperty::Rrule
            | ICalendarProperty::Rdate
            | ICalendarProperty::Exdate
            | ICalendarProperty::Status
            | ICalendarProperty::Location
            | ICalendarProperty::Summary
            | ICalendarProperty::Description
            | ICalendarProperty::Priority
            | ICalendarProperty::PercentComplete
            | ICalendarProperty::Completed
    )
}

fn entry_email(entry: &ICalendarEntry, account_emails: &[String]) -> Option<Email> {
    entry
        .values
        .first()
        .and_then(|v| v.as_text())
        .and_then(|v| Email::new(v, account_emails))
}

impl<'x> Organizer<'x> {
    fn from_entry(
        entry_id: u16,
        entry: &'x ICalendarEntry,
        account_emails: &[String],
    ) -> Option<Self> {
        let mut organizer = Organizer {
            entry_id,
            email: entry_email(entry, account_emails)?,
            name: None,
            is_server_scheduling: true,
            force_send: None,
        };

        for param in &entry.params {
            match &param.value {
                ICalendarParameterValue::ScheduleAgent(
                    ICalendarScheduleAgentValue::Client | ICalendarScheduleAgentValue::None,
                ) if param.name == ICalendarParameterName::ScheduleAgent => {
                    organizer.is_server_scheduling = false;
                }
                ICalendarParameterValue::ScheduleForceSend(force_send) => {
                    organizer.force_send = Some(force_send);
                }
                ICalendarParameterValue::Text(name) if param.name == ICalendarParameterName::Cn => {
                    organizer.name = Some(name.as_str());
                }
                _ => {}
            }
        }

        Some(organizer)
    }
}

impl<'x> Participant<'x> {
    fn from_entry(
        entry_id: u16,
        entry: &'x ICalendarEntry,
        account_emails: &[String],
    ) -> Option<Self> {
        let mut participant = Participant {
            entry_id,
            email: entry_email(entry, account_emails)?,
            name: None,
            part_stat: None,
            delegated_from: vec![],
            delegated_to: vec![],
            role: None,
            cu_type: None,
            sent_by: None,
            rsvp: None,
            is_server_scheduling: true,
            force_send: None,
        };

        for param in &entry.params {
            match (&param.name, &param.value) {
                (
                    ICalendarParameterName::ScheduleAgent,
                    ICalendarParameterValue::ScheduleAgent(agent),
                ) => {
                    participant.is_server_scheduling =
                        agent == &ICalendarScheduleAgentValue::Server;
                }
                (
                    ICalendarParameterName::ScheduleForceSend,
                    ICalendarParameterValue::ScheduleForceSend(value),
                ) => {
                    participant.force_send = Some(value);
                }
                (ICalendarParameterName::Rsvp, ICalendarParameterValue::Bool(rsvp)) => {
                    participant.rsvp = Some(*rsvp);
                }
                (ICalendarParameterName::Partstat, ICalendarParameterValue::Partstat(value)) => {
                    participant.part_stat = Some(value);
                }
                (ICalendarParameterName::Cutype, ICalendarParameterValue::Cutype(value)) => {
                    participant.cu_type = Some(value);
                }
                (ICalendarParameterName::Role, ICalendarParameterValue::Role(value)) => {
                    participant.role = Some(value);
                }
                (ICalendarParameterName::DelegatedFrom, ICalendarParameterValue::Uri(uri)) => {
                    participant
                        .delegated_from
                        .extend(Email::from_uri(uri, account_emails));
                }
                (ICalendarParameterName::DelegatedTo, ICalendarParameterValue::Uri(uri)) => {
                    participant
                        .delegated_to
                        .extend(Email::from_uri(uri, account_emails));
                }
                (ICalendarParameterName::SentBy, ICalendarParameterValue::Uri(uri)) => {
                    participant.sent_by = Email::from_uri(uri, account_emails);
                }
                (ICalendarParameterName::Cn, ICalendarParameterValue::Text(name)) => {
                    participant.name = Some(name.as_str());
                }
                _ => {}
            }
        }

        Some(participant)
    }
}

impl<'x> ItipSnapshots<'x> {
    pub fn sender_is_organizer_or_attendee(&self, email: &str) -> bool {
        self.organizer.email.email == email
            || self.components.values().any(|snapshot| {
                snapshot
                    .participants
                    .iter()
                    .any(|participant| participant.email.email == email)
            })
    }

    pub fn main_instance(&self) -> Option<&ItipSnapshot<'x>> {
        self.components.get(&InstanceId::Main)
    }

    /// Instances ordered master first, then by RECURRENCE-ID.
    pub fn ordered(&self) -> Vec<(&InstanceId, &ItipSnapshot<'x>)> {
        let mut instances = self.components.iter().collect::<Vec<_>>();
        instances.sort_unstable_by(|a, b| a.0.cmp(b.0));
        instances
    }

    /// Addresses of every participant in any instance.
    pub fn participant_emails(&self) -> Vec<&str> {
        let mut emails = self
            .components
            .values()
            .flat_map(|snapshot| snapshot.participants.iter())
            .map(|participant| participant.email.email.as_str())
            .collect::<Vec<_>>();
        emails.sort_unstable();
        emails.dedup();
        emails
    }
}

impl<'x> ItipSnapshot<'x> {
    pub fn has_local_participant(&self) -> bool {
        self.participants
            .iter()
            .any(|participant| participant.email.is_local)
    }

    pub fn local_participant(&self) -> Option<&Participant<'x>> {
        self.participants
            .iter()
            .find(|participant| participant.email.is_local)
    }

    pub fn external_participants(&self) -> impl Iterator<Item = &Participant<'x>> + '_ {
        self.participants.iter().filter(|item| !item.email.is_local)
    }

    pub fn participant_by_email(&self, email: &str) -> Option<&Participant<'x>> {
        self.participants
            .iter()
            .find(|participant| participant.email.email == email)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.comp.status(),
            Some(calcard::icalendar::ICalendarStatus::Cancelled)
        )
    }

    /// Whether a property that invalidates replies differs between the two instances.
    pub fn has_significant_changes(&self, other: &ItipSnapshot<'_>) -> bool {
        self.entries
            .symmetric_difference(&other.entries)
            .any(|entry| entry.is_significant())
    }
}
