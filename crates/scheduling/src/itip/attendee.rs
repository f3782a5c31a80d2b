/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    AttendeeAccumulator, InstanceId, ItipEntryValue, ItipError, ItipSnapshot, ItipSnapshots,
    ParticipantKind, SchedulingMethod,
    export::{
        ItipExportAs, attendee_decline, can_attendee_modify_property, itip_add_tz,
        itip_export_component,
    },
    merge::{MergeAction, itip_merge_changes},
    organizer::organizer_request_for,
    poll::vote_record,
    snapshot::itip_snapshot,
};
use ahash::AHashSet;
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarParameterName,
        ICalendarParticipationStatus, ICalendarProperty,
    },
};

/// Result of diffing two versions of an attendee's personal copy.
#[derive(Debug)]
pub struct AttendeeReply {
    /// Patched object to persist, `None` when the copy was deleted.
    pub object: Option<ICalendar>,
    pub organizer: String,
    pub from: String,
    pub uid: String,
    pub reply: Option<AttendeeAccumulator>,
    /// Invitations forwarded to participants the attendee delegated to.
    pub delegates: Vec<AttendeeAccumulator>,
    pub instances: Vec<Option<u16>>,
}

struct ReplyBuilder {
    accumulator: AttendeeAccumulator,
    instances: Vec<Option<u16>>,
    from: Option<String>,
    dt_stamp: PartialDateTime,
    new_delegates: AHashSet<String>,
}

pub fn attendee_reply(
    old: Option<&ICalendar>,
    new: Option<&ICalendar>,
    addresses: &[String],
    prod_id: &str,
) -> Result<AttendeeReply, ItipError> {
    match (old, new) {
        (old, Some(new)) => attendee_update(old, new, addresses, prod_id),
        (Some(old), None) => attendee_delete(old, addresses, prod_id),
        (None, None) => Err(ItipError::NoSchedulingInfo),
    }
}

fn attendee_update(
    old: Option<&ICalendar>,
    new: &ICalendar,
    addresses: &[String],
    prod_id: &str,
) -> Result<AttendeeReply, ItipError> {
    let new_itip = itip_snapshot(new, addresses)?;
    let old_itip = old.and_then(|old| itip_snapshot(old, addresses).ok());
    if new_itip.organizer.email.is_local {
        return Err(ItipError::NotOrganizerNorAttendee);
    }
    if let Some(old_itip) = &old_itip {
        if old_itip.uid != new_itip.uid {
            return Err(ItipError::UidMismatch);
        }
        if old_itip.organizer.email != new_itip.organizer.email {
            return Err(ItipError::OrganizerMismatch);
        }
        if old_itip.component_type != new_itip.component_type {
            return Err(ItipError::ComponentTypeMismatch);
        }
    }

    let mut builder = ReplyBuilder::new(&new_itip, prod_id);
    let mut force_send_actions = Vec::new();

    for (instance_id, instance) in new_itip.ordered() {
        let local_participant = instance.local_participant();
        if let Some(participant) = local_participant.filter(|p| p.force_send.is_some()) {
            force_send_actions.push(MergeAction::RemoveParameters {
                component_id: instance.comp_id,
                entry_id: participant.entry_id,
                parameters: vec![ICalendarParameterName::ScheduleForceSend],
            });
        }

        let Some(old_itip) = &old_itip else {
            // Personal copy created by the attendee, reply with any decision already taken
            if let Some(participant) = local_participant.filter(|p| {
                p.is_server_scheduling
                    && !matches!(
                        p.part_stat,
                        None | Some(ICalendarParticipationStatus::NeedsAction)
                    )
            }) {
                builder.add_reply(new, &new_itip, instance, participant.entry_id);
            }
            continue;
        };

        let Some(old_instance) = old_itip.components.get(instance_id) else {
            match local_participant {
                Some(participant) if instance_id != &InstanceId::Main => {
                    if participant.is_server_scheduling {
                        builder.add_reply(new, &new_itip, instance, participant.entry_id);
                    }
                    continue;
                }
                _ => return Err(ItipError::CannotModifyInstance),
            }
        };

        let participant = match (local_participant, old_instance.local_participant()) {
            (Some(participant), Some(old_participant))
                if participant.email == old_participant.email =>
            {
                Some((participant, old_participant))
            }
            (None, None) => None,
            _ => return Err(ItipError::CannotModifyAddress),
        };

        let mut send_update = false;
        for new_entry in instance.entries.difference(&old_instance.entries) {
            match (new_entry.name, &new_entry.value) {
                (ICalendarProperty::Exdate, ItipEntryValue::DateTime(date))
                    if instance_id == &InstanceId::Main =>
                {
                    if let Some(mut decline) = attendee_decline(
                        &InstanceId::Main,
                        old_itip,
                        old_instance,
                        &builder.dt_stamp,
                    ) {
                        decline
                            .entries
                            .push(date.to_entry(ICalendarProperty::RecurrenceId));
                        builder.add_declined(decline);
                    }
                }
                (name, _) => {
                    if !can_attendee_modify_property(&instance.comp.component_type, name) {
                        return Err(ItipError::CannotModifyProperty(name.clone()));
                    }
                    send_update = send_update
                        || (instance.comp.component_type == ICalendarComponentType::VTodo
                            && matches!(
                                name,
                                ICalendarProperty::Status
                                    | ICalendarProperty::PercentComplete
                                    | ICalendarProperty::Completed
                            ));
                }
            }
        }
        for removed_entry in old_instance.entries.difference(&instance.entries) {
            if !can_attendee_modify_property(&instance.comp.component_type, removed_entry.name) {
                return Err(ItipError::CannotModifyProperty(removed_entry.name.clone()));
            }
        }

        if let Some((participant, old_participant)) = participant {
            if participant.is_server_scheduling
                && (new_itip.kind == ParticipantKind::Voter
                    || participant.part_stat != old_participant.part_stat
                    || participant.force_send.is_some()
                    || send_update)
            {
                let old_delegates = old_instance
                    .external_participants()
                    .filter(|p| p.is_delegated_from(old_participant))
                    .map(|p| p.email.email.as_str())
                    .collect::<AHashSet<_>>();
                builder.add_reply(new, &new_itip, instance, participant.entry_id);
                builder
                    .new_delegates
                    .retain(|email| !old_delegates.contains(email.as_str()));
            }
        }
    }

    if let Some(old_itip) = &old_itip {
        for (instance_id, old_instance) in old_itip.ordered() {
            if new_itip.components.contains_key(instance_id) {
                continue;
            }
            if instance_id == &InstanceId::Main {
                return Err(ItipError::CannotModifyInstance);
            }
            if !old_instance.is_cancelled() {
                if let Some(decline) =
                    attendee_decline(instance_id, old_itip, old_instance, &builder.dt_stamp)
                {
                    builder.add_declined(decline);
                }
            }
        }
    }

    let organizer = new_itip.organizer.email.email.clone();
    let uid = new_itip.uid.to_string();
    let from = builder.from.clone().or_else(|| {
        new_itip
            .components
            .values()
            .find_map(|instance| instance.local_participant())
            .map(|participant| participant.email.email.clone())
    });
    let organizer_schedules = new_itip.organizer.is_server_scheduling;
    let new_delegates = builder
        .new_delegates
        .iter()
        .cloned()
        .collect::<Vec<_>>();
    let (reply, instances) = builder.finish(new);

    let mut object = new.clone();
    itip_merge_changes(&mut object, force_send_actions);

    let mut delegates = Vec::with_capacity(new_delegates.len());
    if reply.is_some() {
        for delegate in new_delegates {
            if let Ok((accumulator, _)) = organizer_request_for(&object, addresses, &delegate, prod_id)
            {
                delegates.push(accumulator);
            }
        }
    }

    Ok(AttendeeReply {
        object: Some(object),
        organizer,
        from: from.ok_or(ItipError::NotOrganizerNorAttendee)?,
        uid,
        reply: reply.filter(|_| organizer_schedules),
        delegates,
        instances,
    })
}

fn attendee_delete(
    old: &ICalendar,
    addresses: &[String],
    prod_id: &str,
) -> Result<AttendeeReply, ItipError> {
    let old_itip = itip_snapshot(old, addresses)?;
    if old_itip.organizer.email.is_local {
        return Err(ItipError::NotOrganizerNorAttendee);
    }

    let mut builder = ReplyBuilder::new(&old_itip, prod_id);
    for (instance_id, old_instance) in old_itip.ordered() {
        if !old_instance.is_cancelled() {
            if let Some(decline) =
                attendee_decline(instance_id, &old_itip, old_instance, &builder.dt_stamp)
            {
                builder.add_declined(decline);
            }
        }
    }

    let from = builder.from.clone().or_else(|| {
        old_itip
            .components
            .values()
            .find_map(|instance| instance.local_participant())
            .map(|participant| participant.email.email.clone())
    });
    let (reply, instances) = builder.finish(old);

    Ok(AttendeeReply {
        object: None,
        organizer: old_itip.organizer.email.email.clone(),
        from: from.ok_or(ItipError::NotOrganizerNorAttendee)?,
        uid: old_itip.uid.to_string(),
        reply: reply.filter(|_| old_itip.organizer.is_server_scheduling),
        delegates: vec![],
        instances,
    })
}

impl ReplyBuilder {
    fn new(itip: &ItipSnapshots<'_>, prod_id: &str) -> Self {
        ReplyBuilder {
            accumulator: AttendeeAccumulator::new(
                itip.organizer.email.email.as_str(),
                SchedulingMethod::Reply,
                prod_id,
            ),
            instances: vec![],
            from: None,
            dt_stamp: PartialDateTime::now(),
            new_delegates: AHashSet::new(),
        }
    }

    fn add_reply(
        &mut self,
        ical: &ICalendar,
        itip: &ItipSnapshots<'_>,
        instance: &ItipSnapshot<'_>,
        participant_entry_id: u16,
    ) {
        let Some(participant) = instance
            .participants
            .iter()
            .find(|p| p.entry_id == participant_entry_id)
        else {
            return;
        };

        let mut entry_ids = vec![participant.entry_id];
        for external in instance.external_participants() {
            if external.is_delegated_from(participant) {
                if external.is_server_scheduling {
                    self.new_delegates.insert(external.email.email.clone());
                }
            } else if !external.is_delegated_to(participant) {
                continue;
            }
            entry_ids.push(external.entry_id);
        }

        let ncomp = self.instances.len() as u32;
        self.instances.push(Some(instance.comp_id));
        let component = itip_export_component(
            instance.comp,
            itip.kind,
            itip.uid,
            &self.dt_stamp,
            instance.sequence.unwrap_or_default(),
            ItipExportAs::Attendee(entry_ids),
        );
        let children = if itip.kind == ParticipantKind::Voter {
            vote_record(ical, instance.comp, &participant.email.email)
        } else {
            vec![]
        };
        self.accumulator.add_component(
            ncomp,
            instance.comp.entries.iter().all(|e| e.name != ICalendarProperty::RecurrenceId),
            component,
            children,
        );
        self.from = Some(participant.email.email.clone());
    }

    fn add_declined(&mut self, decline: ICalendarComponent) {
        let ncomp = self.instances.len() as u32;
        self.instances.push(None);
        if self.from.is_none() {
            self.from = decline
                .entries
                .iter()
                .find(|e| e.name == ICalendarProperty::Attendee)
                .and_then(|e| e.values.first())
                .and_then(|v| v.as_text())
                .and_then(super::normalize_address);
        }
        self.accumulator.add_component(ncomp, false, decline, vec![]);
    }

    fn finish(mut self, source: &ICalendar) -> (Option<AttendeeAccumulator>, Vec<Option<u16>>) {
        if self.accumulator.has_components() {
            itip_add_tz(&mut self.accumulator.message, source);
            (Some(self.accumulator), self.instances)
        } else {
            (None, self.instances)
        }
    }
}
