/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    Email, InstanceId, ItipError, ItipSnapshot, ItipSnapshots, ParticipantKind, SchedulingMethod,
    is_scheduling_component,
    merge::MergeAction,
};
use calcard::{
    common::{IanaString, PartialDateTime},
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarParameter,
        ICalendarParameterName, ICalendarParameterValue, ICalendarParticipationStatus,
        ICalendarProperty, ICalendarStatus, ICalendarValue,
    },
};
use roaring::RoaringBitmap;

pub fn itip_build_envelope(method: &SchedulingMethod, prod_id: &str) -> ICalendarComponent {
    ICalendarComponent {
        component_type: ICalendarComponentType::VCalendar,
        entries: vec![
            ICalendarEntry {
                name: ICalendarProperty::Version,
                params: vec![],
                values: vec![ICalendarValue::Text("2.0".to_string())],
            },
            ICalendarEntry {
                name: ICalendarProperty::Prodid,
                params: vec![],
                values: vec![ICalendarValue::Text(prod_id.to_string())],
            },
            ICalendarEntry {
                name: ICalendarProperty::Method,
                params: vec![],
                values: vec![method.to_value()],
            },
        ],
        component_ids: Default::default(),
    }
}

pub(crate) enum ItipExportAs<'x> {
    Organizer(&'x ICalendarParticipationStatus),
    Attendee(Vec<u16>),
}

fn is_schedule_param(name: &ICalendarParameterName) -> bool {
    matches!(
        name,
        ICalendarParameterName::ScheduleStatus
            | ICalendarParameterName::ScheduleAgent
            | ICalendarParameterName::ScheduleForceSend
    )
}

fn strip_schedule_params(entry: &ICalendarEntry) -> ICalendarEntry {
    ICalendarEntry {
        name: entry.name.clone(),
        params: entry
            .params
            .iter()
            .filter(|param| !is_schedule_param(&param.name))
            .cloned()
            .collect(),
        values: entry.values.clone(),
    }
}

/// Copies a component for transmission, dropping scheduling parameters and
/// anything the recipient role should not see.
pub(crate) fn itip_export_component(
    component: &ICalendarComponent,
    kind: ParticipantKind,
    uid: &str,
    dt_stamp: &PartialDateTime,
    sequence: i64,
    export_as: ItipExportAs<'_>,
) -> ICalendarComponent {
    let is_todo = component.component_type == ICalendarComponentType::VTodo;
    let mut comp = ICalendarComponent {
        component_type: component.component_type.clone(),
        entries: Vec::with_capacity(component.entries.len() + 1),
        component_ids: Default::default(),
    };

    comp.add_dtstamp(dt_stamp.clone());
    comp.add_sequence(sequence);
    comp.add_uid(uid);

    for (entry_id, entry) in component.entries.iter().enumerate() {
        let is_participant = kind.is_participant(&entry.name);
        let is_organizer = entry.name == ICalendarProperty::Organizer;

        match &export_as {
            ItipExportAs::Organizer(partstat) if is_participant || is_organizer => {
                let mut new_entry = strip_schedule_params(entry);
                let mut has_partstat = false;
                let mut rsvp = true;

                for param in &new_entry.params {
                    match &param.name {
                        ICalendarParameterName::Rsvp => {
                            rsvp = !matches!(param.value, ICalendarParameterValue::Bool(false));
                        }
                        ICalendarParameterName::Partstat => {
                            has_partstat = true;
                        }
                        _ => {}
                    }
                }

                if !has_partstat && rsvp && is_participant {
                    new_entry
                        .params
                        .push(ICalendarParameter::partstat((*partstat).clone()));
                }

                comp.entries.push(new_entry);
            }
            ItipExportAs::Attendee(entry_ids) if is_participant || is_organizer => {
                if is_organizer || entry_ids.contains(&(entry_id as u16)) {
                    comp.entries.push(strip_schedule_params(entry));
                }
            }
            _ => match &entry.name {
                ICalendarProperty::RequestStatus
                | ICalendarProperty::Dtstamp
                | ICalendarProperty::Sequence
                | ICalendarProperty::Uid
                | ICalendarProperty::Attendee => {}
                _ if matches!(export_as, ItipExportAs::Organizer(_)) => {
                    comp.entries.push(entry.clone());
                }
                ICalendarProperty::RecurrenceId
                | ICalendarProperty::Dtstart
                | ICalendarProperty::Dtend
                | ICalendarProperty::Duration
                | ICalendarProperty::Due
                | ICalendarProperty::Description
                | ICalendarProperty::Summary => {
                    comp.entries.push(entry.clone());
                }
                ICalendarProperty::Status
                | ICalendarProperty::PercentComplete
                | ICalendarProperty::Completed
                    if is_todo =>
                {
                    comp.entries.push(entry.clone());
                }
                _ => {}
            },
        }
    }

    if matches!(export_as, ItipExportAs::Attendee(_)) {
        comp.entries.push(success_request_status());
    }

    comp
}

pub(crate) fn success_request_status() -> ICalendarEntry {
    ICalendarEntry {
        name: ICalendarProperty::RequestStatus,
        params: vec![],
        values: vec![
            ICalendarValue::Text("2.0".to_string()),
            ICalendarValue::Text("Success".to_string()),
        ],
    }
}

/// Sub-components of a poll, with scheduling parameters removed from their voters.
pub(crate) fn itip_export_children(
    ical: &ICalendar,
    component: &ICalendarComponent,
) -> Vec<ICalendarComponent> {
    component
        .component_ids
        .iter()
        .filter_map(|comp_id| ical.components.get(*comp_id as usize))
        .filter(|child| child.component_type != ICalendarComponentType::VAlarm)
        .map(|child| ICalendarComponent {
            component_type: child.component_type.clone(),
            entries: child.entries.iter().map(strip_schedule_params).collect(),
            component_ids: vec![],
        })
        .collect()
}

pub(crate) fn itip_add_tz(message: &mut ICalendar, ical: &ICalendar) {
    let mut has_timezones = false;

    if message.components.iter().any(|c| {
        has_timezones = has_timezones || c.component_type == ICalendarComponentType::VTimezone;

        !has_timezones
            && c.entries.iter().any(|e| {
                e.params
                    .iter()
                    .any(|p| matches!(p.name, ICalendarParameterName::Tzid))
            })
    }) && !has_timezones
    {
        message.copy_timezones(ical);
    }
}

pub(crate) fn build_cancel_component(
    component: &ICalendarComponent,
    sequence: i64,
    dt_stamp: PartialDateTime,
    attendees: &[&str],
) -> ICalendarComponent {
    let mut cancel_comp = ICalendarComponent {
        component_type: component.component_type.clone(),
        entries: Vec::with_capacity(7),
        component_ids: vec![],
    };
    cancel_comp.add_property(
        ICalendarProperty::Status,
        ICalendarValue::Status(ICalendarStatus::Cancelled),
    );
    cancel_comp.add_dtstamp(dt_stamp);
    cancel_comp.add_sequence(sequence);
    cancel_comp.entries.extend(
        component
            .entries
            .iter()
            .filter(|e| match e.name {
                ICalendarProperty::Organizer
                | ICalendarProperty::Uid
                | ICalendarProperty::Summary
                | ICalendarProperty::Dtstart
                | ICalendarProperty::Dtend
                | ICalendarProperty::Duration
                | ICalendarProperty::Due
                | ICalendarProperty::RecurrenceId
                | ICalendarProperty::Location => true,
                ICalendarProperty::Attendee => {
                    attendees.is_empty()
                        || e.values
                            .first()
                            .and_then(|v| v.as_text())
                            .and_then(|v| Email::new(v, &[]))
                            .is_some_and(|email| attendees.contains(&email.email.as_str()))
                }
                _ => false,
            })
            .map(strip_schedule_params),
    );

    cancel_comp
}

/// Builds a component declining one instance on behalf of the local participant.
pub(crate) fn attendee_decline(
    instance_id: &InstanceId,
    itip: &ItipSnapshots<'_>,
    comp: &ItipSnapshot<'_>,
    dt_stamp: &PartialDateTime,
) -> Option<ICalendarComponent> {
    let component = comp.comp;
    let local_participant = comp.local_participant().filter(|participant| {
        participant.is_server_scheduling
            && !matches!(
                participant.part_stat,
                Some(ICalendarParticipationStatus::Declined)
            )
    })?;
    let mut cancel_comp = ICalendarComponent {
        component_type: component.component_type.clone(),
        entries: Vec::with_capacity(8),
        component_ids: vec![],
    };

    cancel_comp.add_property(
        ICalendarProperty::Organizer,
        ICalendarValue::Text(itip.organizer.email.to_string()),
    );
    let mut participant_entry = strip_schedule_params(
        &component.entries[local_participant.entry_id as usize],
    );
    participant_entry
        .params
        .retain(|param| param.name != ICalendarParameterName::Partstat);
    participant_entry
        .params
        .push(ICalendarParameter::partstat(ICalendarParticipationStatus::Declined));
    cancel_comp.entries.push(participant_entry);
    cancel_comp.add_uid(itip.uid);
    cancel_comp.add_dtstamp(dt_stamp.clone());
    cancel_comp.add_sequence(comp.sequence.unwrap_or_default());
    cancel_comp.entries.extend(
        component
            .entries
            .iter()
            .filter(|e| {
                matches!(
                    e.name,
                    ICalendarProperty::Dtstart
                        | ICalendarProperty::Dtend
                        | ICalendarProperty::Duration
                        | ICalendarProperty::Due
                        | ICalendarProperty::Summary
                )
            })
            .cloned(),
    );

    if let InstanceId::Recurrence(recurrence_id) = instance_id {
        cancel_comp
            .entries
            .push(component.entries[recurrence_id.entry_id as usize].clone());
    }
    cancel_comp.entries.push(success_request_status());

    Some(cancel_comp)
}

/// Converts the RECURRENCE-ID of an override into an EXDATE entry.
pub(crate) fn recurrence_id_to_exdate(component: &ICalendarComponent) -> Option<ICalendarEntry> {
    component
        .entries
        .iter()
        .find(|entry| entry.name == ICalendarProperty::RecurrenceId)
        .map(|entry| ICalendarEntry {
            name: ICalendarProperty::Exdate,
            params: entry
                .params
                .iter()
                .filter(|param| param.name != ICalendarParameterName::Range)
                .cloned()
                .collect(),
            values: entry.values.clone(),
        })
}

#[inline]
pub(crate) fn can_attendee_modify_property(
    component_type: &ICalendarComponentType,
    property: &ICalendarProperty,
) -> bool {
    match component_type {
        ICalendarComponentType::VEvent | ICalendarComponentType::VJournal => {
            matches!(
                property,
                ICalendarProperty::Exdate
                    | ICalendarProperty::Summary
                    | ICalendarProperty::Description
                    | ICalendarProperty::Comment
            )
        }
        ICalendarComponentType::VTodo => matches!(
            property,
            ICalendarProperty::Exdate
                | ICalendarProperty::Summary
                | ICalendarProperty::Description
                | ICalendarProperty::Status
                | ICalendarProperty::PercentComplete
                | ICalendarProperty::Completed
                | ICalendarProperty::Comment
        ),
        _ if component_type.as_str().eq_ignore_ascii_case("VPOLL") => matches!(
            property,
            ICalendarProperty::Summary | ICalendarProperty::Description | ICalendarProperty::Comment
        ),
        _ => false,
    }
}

pub fn itip_method(ical: &ICalendar) -> Result<SchedulingMethod, ItipError> {
    ical.components
        .first()
        .and_then(|comp| {
            comp.entries
                .iter()
                .filter(|entry| entry.name == ICalendarProperty::Method)
                .find_map(|entry| match entry.values.first()? {
                    ICalendarValue::Method(method) => Some(SchedulingMethod::parse(method.as_str())),
                    value => value.as_text().map(SchedulingMethod::parse),
                })
        })
        .ok_or(ItipError::MissingMethod)
}

/// Prepares a received message for storage.
pub fn itip_import_message(ical: &mut ICalendar) -> Result<(), ItipError> {
    if let Some(root) = ical.components.first() {
        let mut expect_object_type = None;
        for comp in root
            .component_ids
            .iter()
            .filter_map(|comp_id| ical.components.get(*comp_id as usize))
            .filter(|comp| is_scheduling_component(comp))
        {
            match expect_object_type {
                Some(expected) if expected != &comp.component_type => {
                    return Err(ItipError::MultipleObjectTypes);
                }
                None => {
                    expect_object_type = Some(&comp.component_type);
                }
                _ => {}
            }
        }
    }

    for comp in ical.components.iter_mut() {
        match comp.component_type {
            ICalendarComponentType::VCalendar => {
                comp.entries
                    .retain(|entry| !matches!(entry.name, ICalendarProperty::Method));
            }
            ICalendarComponentType::VTimezone => {}
            _ => {
                for entry in comp.entries.iter_mut() {
                    entry.params.retain(|param| !is_schedule_param(&param.name));
                }
                comp.entries
                    .retain(|entry| entry.name != ICalendarProperty::RequestStatus);
            }
        }
    }

    Ok(())
}

/// Who a status write-back targets within each component.
#[derive(Debug, Clone, Copy)]
pub enum StatusTarget<'x> {
    Organizer,
    Participant(&'x str),
}

/// Builds the actions that store a status on the target's property in every
/// instance selected by `comp_mask`.
pub fn schedule_status_actions(
    ical: &ICalendar,
    instances: &[Option<u16>],
    comp_mask: &RoaringBitmap,
    target: StatusTarget<'_>,
    status: &str,
) -> Vec<MergeAction> {
    let mut actions = Vec::new();

    for instance in comp_mask.iter() {
        let Some(Some(comp_id)) = instances.get(instance as usize) else {
            continue;
        };
        let Some(component) = ical.components.get(*comp_id as usize) else {
            continue;
        };
        let kind = ParticipantKind::of(component);

        for (entry_id, entry) in component.entries.iter().enumerate() {
            let matches = match target {
                StatusTarget::Organizer => entry.name == ICalendarProperty::Organizer,
                StatusTarget::Participant(address) => {
                    kind.is_participant(&entry.name)
                        && entry
                            .values
                            .first()
                            .and_then(|v| v.as_text())
                            .and_then(|v| Email::new(v, &[]))
                            .is_some_and(|email| email.email == address)
                }
            };

            if matches {
                actions.push(MergeAction::RemoveParameters {
                    component_id: *comp_id,
                    entry_id: entry_id as u16,
                    parameters: vec![ICalendarParameterName::ScheduleStatus],
                });
                actions.push(MergeAction::AddParameters {
                    component_id: *comp_id,
                    entry_id: entry_id as u16,
                    parameters: vec![ICalendarParameter::schedule_status(status.to_string())],
                });
            }
        }
    }

    actions
}
