/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    AttendeeAccumulator, InstanceId, ItipError, ItipSnapshots, ParticipantKind, SchedulingMethod,
    export::{
        ItipExportAs, build_cancel_component, itip_add_tz, itip_export_children,
        itip_export_component, recurrence_id_to_exdate,
    },
    merge::{MergeAction, itip_merge_changes},
    normalize_address,
    snapshot::itip_snapshot,
};
use ahash::{AHashMap, AHashSet};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarParameter, ICalendarParameterName,
        ICalendarParticipationStatus,
    },
};

/// Result of diffing two versions of an organizer's object.
#[derive(Debug)]
pub struct OrganizerUpdate {
    /// Patched object to persist, `None` when the object was deleted.
    pub object: Option<ICalendar>,
    pub organizer: String,
    pub uid: String,
    pub needs_action: bool,
    pub recipients: Vec<AttendeeAccumulator>,
    /// Maps each accumulator instance position to the component in `object`.
    pub instances: Vec<Option<u16>>,
}

struct Recipients {
    accumulators: AHashMap<String, AttendeeAccumulator>,
    dirty: AHashSet<String>,
}

pub fn organizer_update(
    old: Option<&ICalendar>,
    new: Option<&ICalendar>,
    addresses: &[String],
    updater: Option<&str>,
    prod_id: &str,
    max_recipients: usize,
) -> Result<OrganizerUpdate, ItipError> {
    let old_itip = old.and_then(|ical| itip_snapshot(ical, addresses).ok());
    let updater = updater.and_then(normalize_address);

    let Some(new_ical) = new else {
        return match (old, old_itip) {
            (Some(old), Some(old_itip)) => {
                organizer_delete(old, &old_itip, updater.as_deref(), prod_id, max_recipients)
            }
            _ => Err(ItipError::NoSchedulingInfo),
        };
    };

    let new_itip = itip_snapshot(new_ical, addresses)?;
    if !new_itip.organizer.email.is_local {
        return Err(ItipError::NotOrganizer);
    }
    if !new_itip.organizer.is_server_scheduling {
        return Err(ItipError::OtherSchedulingAgent);
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

    // Patch the new object
    let mut param_actions = Vec::new();
    let mut sequence_actions = Vec::new();
    let mut changed: AHashSet<InstanceId> = AHashSet::new();
    let mut needs_action = false;

    for (instance_id, instance) in &new_itip.components {
        for participant in &instance.participants {
            if participant.force_send.is_some() {
                param_actions.push(MergeAction::RemoveParameters {
                    component_id: instance.comp_id,
                    entry_id: participant.entry_id,
                    parameters: vec![ICalendarParameterName::ScheduleForceSend],
                });
            }
        }

        let Some(old_instance) = old_itip
            .as_ref()
            .and_then(|old_itip| old_itip.components.get(instance_id))
        else {
            changed.insert(instance_id.clone());
            continue;
        };

        let is_significant = instance.has_significant_changes(old_instance);
        let has_removals = old_instance.participants.iter().any(|participant| {
            participant.is_schedulable()
                && instance
                    .participant_by_email(&participant.email.email)
                    .is_none()
        });

        if is_significant {
            needs_action = true;
            for participant in &instance.participants {
                if !participant.email.is_local
                    && updater.as_deref() != Some(participant.email.email.as_str())
                {
                    param_actions.push(MergeAction::RemoveParameters {
                        component_id: instance.comp_id,
                        entry_id: participant.entry_id,
                        parameters: vec![ICalendarParameterName::Partstat],
                    });
                    param_actions.push(MergeAction::AddParameters {
                        component_id: instance.comp_id,
                        entry_id: participant.entry_id,
                        parameters: vec![ICalendarParameter::partstat(
                            ICalendarParticipationStatus::NeedsAction,
                        )],
                    });
                }
            }
        }

        if is_significant || has_removals {
            // Removed participants get a CANCEL carrying the new sequence
            let old_sequence = old_instance.sequence.unwrap_or_default();
            if instance.sequence.unwrap_or_default() <= old_sequence {
                sequence_actions.extend(MergeAction::set_sequence(
                    instance.comp_id,
                    old_sequence + 1,
                ));
            }
            changed.insert(instance_id.clone());
        } else if instance.entries != old_instance.entries
            || instance.participants != old_instance.participants
        {
            changed.insert(instance_id.clone());
        }
    }

    if let Some(old_itip) = &old_itip {
        if old_itip.main_instance().is_some() && new_itip.main_instance().is_none() {
            return Err(ItipError::CannotModifyInstance);
        }
    }

    let organizer = new_itip.organizer.email.email.clone();
    let uid = new_itip.uid.to_string();
    let mut object = new_ical.clone();
    param_actions.extend(sequence_actions);
    itip_merge_changes(&mut object, param_actions);

    let (recipients, instances) = organizer_build_requests(
        &object,
        old,
        old_itip.as_ref(),
        addresses,
        &changed,
        updater.as_deref(),
        prod_id,
    )?;

    if recipients.len() > max_recipients {
        return Err(ItipError::TooManyRecipients(recipients.len()));
    }

    Ok(OrganizerUpdate {
        object: Some(object),
        organizer,
        uid,
        needs_action,
        recipients,
        instances,
    })
}

fn organizer_build_requests(
    object: &ICalendar,
    old: Option<&ICalendar>,
    old_itip: Option<&ItipSnapshots<'_>>,
    addresses: &[String],
    changed: &AHashSet<InstanceId>,
    updater: Option<&str>,
    prod_id: &str,
) -> Result<(Vec<AttendeeAccumulator>, Vec<Option<u16>>), ItipError> {
    let patched = itip_snapshot(object, addresses)?;
    let organizer = patched.organizer.email.email.as_str();
    let dt_stamp = PartialDateTime::now();
    let ordered = patched.ordered();
    let mut instances: Vec<Option<u16>> = ordered
        .iter()
        .map(|(_, instance)| Some(instance.comp_id))
        .collect();
    let mut positions: AHashMap<InstanceId, u32> = ordered
        .iter()
        .enumerate()
        .map(|(ncomp, (instance_id, _))| ((*instance_id).clone(), ncomp as u32))
        .collect();
    let mut recipients = Recipients {
        accumulators: AHashMap::new(),
        dirty: AHashSet::new(),
    };
    let is_recipient = |email: &str| email != organizer && updater != Some(email);

    // Instances of the new object
    for (ncomp, (instance_id, instance)) in ordered.iter().enumerate() {
        let old_instance = old_itip.and_then(|old_itip| old_itip.components.get(*instance_id));
        let is_changed = changed.contains(*instance_id);
        let mut exported: Option<(ICalendarComponent, Vec<ICalendarComponent>)> = None;

        for participant in &instance.participants {
            let email = participant.email.email.as_str();
            if !participant.is_schedulable() || !is_recipient(email) {
                continue;
            }

            let (component, children) = exported.get_or_insert_with(|| {
                (
                    itip_export_component(
                        instance.comp,
                        patched.kind,
                        patched.uid,
                        &dt_stamp,
                        instance.sequence.unwrap_or_default(),
                        ItipExportAs::Organizer(&ICalendarParticipationStatus::NeedsAction),
                    ),
                    if patched.kind == ParticipantKind::Voter {
                        itip_export_children(object, instance.comp)
                    } else {
                        vec![]
                    },
                )
            });
            recipients
                .accumulator(email, SchedulingMethod::Request, prod_id)
                .add_component(
                    ncomp as u32,
                    *instance_id == &InstanceId::Main,
                    component.clone(),
                    children.clone(),
                );

            if is_changed
                || participant.force_send.is_some()
                || old_instance.is_none_or(|old| old.participant_by_email(email).is_none())
            {
                recipients.dirty.insert(email.to_string());
            }
        }

        if let Some(old_instance) = old_instance {
            for participant in &old_instance.participants {
                if participant.is_schedulable()
                    && instance
                        .participant_by_email(&participant.email.email)
                        .is_none()
                {
                    recipients.dirty.insert(participant.email.email.clone());
                }
            }
        }
    }

    // Exclude overrides the recipient does not take part in
    for accumulator in recipients.accumulators.values_mut() {
        let exdates = ordered
            .iter()
            .enumerate()
            .filter(|(ncomp, (instance_id, _))| {
                matches!(instance_id, InstanceId::Recurrence(_))
                    && !accumulator.comp_mask.contains(*ncomp as u32)
            })
            .filter_map(|(_, (_, instance))| recurrence_id_to_exdate(instance.comp))
            .collect::<Vec<_>>();
        if let Some(master) = accumulator.master_component_mut() {
            master.entries.extend(exdates);
        }
    }

    if let (Some(old), Some(old_itip)) = (old, old_itip) {
        let new_members = patched.participant_emails();

        // Overrides removed by the organizer
        for (instance_id, old_instance) in old_itip.ordered() {
            if patched.components.contains_key(instance_id) {
                continue;
            }
            let ncomp = instances.len() as u32;
            instances.push(None);
            positions.insert(instance_id.clone(), ncomp);

            let cancel = build_cancel_component(
                old_instance.comp,
                old_instance.sequence.unwrap_or_default() + 1,
                dt_stamp.clone(),
                &[],
            );
            for participant in &old_instance.participants {
                let email = participant.email.email.as_str();
                if participant.is_schedulable()
                    && is_recipient(email)
                    && new_members.binary_search(&email).is_ok()
                {
                    recipients
                        .accumulator(email, SchedulingMethod::Request, prod_id)
                        .add_component(ncomp, false, cancel.clone(), vec![]);
                    recipients.dirty.insert(email.to_string());
                }
            }
        }

        // Participants no longer invited to any instance
        for (instance_id, old_instance) in old_itip.ordered() {
            let Some(ncomp) = positions.get(instance_id).copied() else {
                continue;
            };
            for participant in &old_instance.participants {
                let email = participant.email.email.as_str();
                if participant.is_schedulable()
                    && is_recipient(email)
                    && new_members.binary_search(&email).is_err()
                {
                    let sequence = patched.components.get(instance_id).map_or(
                        old_instance.sequence.unwrap_or_default() + 1,
                        |instance| instance.sequence.unwrap_or_default(),
                    );
                    let accumulator =
                        recipients.accumulator(email, SchedulingMethod::Cancel, prod_id);
                    accumulator.add_component(
                        ncomp,
                        instance_id == &InstanceId::Main,
                        build_cancel_component(
                            old_instance.comp,
                            sequence,
                            dt_stamp.clone(),
                            &[email],
                        ),
                        vec![],
                    );
                    recipients.dirty.insert(email.to_string());
                }
            }
        }

        Ok((recipients.finish(object, Some(old)), instances))
    } else {
        Ok((recipients.finish(object, None), instances))
    }
}

fn organizer_delete(
    old: &ICalendar,
    old_itip: &ItipSnapshots<'_>,
    updater: Option<&str>,
    prod_id: &str,
    max_recipients: usize,
) -> Result<OrganizerUpdate, ItipError> {
    if !old_itip.organizer.email.is_local {
        return Err(ItipError::NotOrganizer);
    }

    let organizer = old_itip.organizer.email.email.as_str();
    let dt_stamp = PartialDateTime::now();
    let mut recipients = Recipients {
        accumulators: AHashMap::new(),
        dirty: AHashSet::new(),
    };
    let ordered = old_itip.ordered();

    for (ncomp, (instance_id, instance)) in ordered.iter().enumerate() {
        let cancel = build_cancel_component(
            instance.comp,
            instance.sequence.unwrap_or_default() + 1,
            dt_stamp.clone(),
            &[],
        );
        for participant in &instance.participants {
            let email = participant.email.email.as_str();
            if participant.is_schedulable() && email != organizer && updater != Some(email) {
                recipients
                    .accumulator(email, SchedulingMethod::Cancel, prod_id)
                    .add_component(
                        ncomp as u32,
                        *instance_id == &InstanceId::Main,
                        cancel.clone(),
                        vec![],
                    );
                recipients.dirty.insert(email.to_string());
            }
        }
    }

    let recipients = recipients.finish(old, None);
    if recipients.len() > max_recipients {
        return Err(ItipError::TooManyRecipients(recipients.len()));
    }

    Ok(OrganizerUpdate {
        object: None,
        organizer: organizer.to_string(),
        uid: old_itip.uid.to_string(),
        needs_action: false,
        recipients,
        instances: vec![None; ordered.len()],
    })
}

/// Builds the actions that stamp `status` on every participant the server
/// would have scheduled.
pub fn organizer_annotate_all(
    ical: &ICalendar,
    addresses: &[String],
    status: &str,
) -> Result<Vec<MergeAction>, ItipError> {
    let itip = itip_snapshot(ical, addresses)?;
    let mut actions = Vec::new();

    for instance in itip.components.values() {
        for participant in &instance.participants {
            if participant.is_schedulable() && participant.email != itip.organizer.email {
                actions.push(MergeAction::RemoveParameters {
                    component_id: instance.comp_id,
                    entry_id: participant.entry_id,
                    parameters: vec![ICalendarParameterName::ScheduleStatus],
                });
                actions.push(MergeAction::AddParameters {
                    component_id: instance.comp_id,
                    entry_id: participant.entry_id,
                    parameters: vec![ICalendarParameter::schedule_status(status.to_string())],
                });
            }
        }
    }

    Ok(actions)
}

/// Full REQUEST for a single participant, used to answer REFRESH.
pub fn organizer_request_for(
    ical: &ICalendar,
    addresses: &[String],
    participant: &str,
    prod_id: &str,
) -> Result<(AttendeeAccumulator, Vec<Option<u16>>), ItipError> {
    let (recipients, instances) = organizer_build_requests(
        ical,
        None,
        None,
        addresses,
        &AHashSet::new(),
        None,
        prod_id,
    )?;

    recipients
        .into_iter()
        .find(|accumulator| accumulator.address == participant)
        .map(|accumulator| (accumulator, instances))
        .ok_or_else(|| ItipError::SenderIsNotParticipant(participant.to_string()))
}

impl Recipients {
    fn accumulator(
        &mut self,
        email: &str,
        method: SchedulingMethod,
        prod_id: &str,
    ) -> &mut AttendeeAccumulator {
        self.accumulators
            .entry(email.to_string())
            .or_insert_with(|| AttendeeAccumulator::new(email, method, prod_id))
    }

    fn finish(self, object: &ICalendar, old: Option<&ICalendar>) -> Vec<AttendeeAccumulator> {
        let mut accumulators = self
            .accumulators
            .into_values()
            .filter(|accumulator| {
                accumulator.has_components() && self.dirty.contains(&accumulator.address)
            })
            .collect::<Vec<_>>();
        accumulators.sort_unstable_by(|a, b| a.address.cmp(&b.address));

        for accumulator in &mut accumulators {
            let source = match (&accumulator.method, old) {
                (SchedulingMethod::Cancel, Some(old)) => old,
                _ => object,
            };
            itip_add_tz(&mut accumulator.message, source);
        }

        accumulators
    }
}

#[cfg(test)]
mod tests {
    use calcard::icalendar::{
        ICalendar, ICalendarComponent, ICalendarParameterName, ICalendarParameterValue,
        ICalendarParticipationStatus, ICalendarProperty,
    };

    use super::organizer_update;
    use crate::itip::{ItipError, SchedulingMethod};

    const PROD_ID: &str = "-//Test//EN";

    fn event(dtstart: &str, attendees: &[&str]) -> ICalendar {
        let mut ics = String::from(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\nUID:meeting-1\r\nDTSTAMP:20250101T000000Z\r\n",
        );
        ics.push_str(&format!(
            "DTSTART:{dtstart}\r\nDURATION:PT1H\r\nSUMMARY:Planning\r\nORGANIZER:mailto:alice@example.com\r\n"
        ));
        for attendee in attendees {
            ics.push_str(&format!(
                "ATTENDEE;PARTSTAT=ACCEPTED:mailto:{attendee}\r\n"
            ));
        }
        ics.push_str("END:VEVENT\r\nEND:VCALENDAR\r\n");
        ICalendar::parse(&ics).unwrap()
    }

    fn sequence_of(component: &ICalendarComponent) -> Option<i64> {
        component
            .entries
            .iter()
            .find(|e| e.name == ICalendarProperty::Sequence)
            .and_then(|e| e.values.first())
            .and_then(|v| v.as_integer())
    }

    fn addresses() -> Vec<String> {
        vec!["alice@example.com".to_string()]
    }

    #[test]
    fn new_object_invites_everyone() {
        let new = event("20250310T100000Z", &["bob@example.com", "carol@example.net"]);
        let update = organizer_update(None, Some(&new), &addresses(), None, PROD_ID, 10).unwrap();

        assert!(!update.needs_action);
        assert_eq!(update.organizer, "alice@example.com");
        assert_eq!(
            update
                .recipients
                .iter()
                .map(|r| (r.address.as_str(), &r.method))
                .collect::<Vec<_>>(),
            vec![
                ("bob@example.com", &SchedulingMethod::Request),
                ("carol@example.net", &SchedulingMethod::Request)
            ]
        );
        for recipient in &update.recipients {
            assert_eq!(recipient.message.components.len(), 2);
            assert!(recipient.comp_mask.contains(0));
        }
    }

    #[test]
    fn time_change_resets_replies() {
        let old = event("20250310T100000Z", &["bob@example.com"]);
        let new = event("20250310T110000Z", &["bob@example.com"]);
        let update =
            organizer_update(Some(&old), Some(&new), &addresses(), None, PROD_ID, 10).unwrap();

        assert!(update.needs_action);
        assert_eq!(update.recipients.len(), 1);

        let object = update.object.unwrap();
        let event = &object.components[1];
        assert_eq!(
            event
                .entries
                .iter()
                .find(|e| e.name == ICalendarProperty::Sequence)
                .and_then(|e| e.values.first())
                .and_then(|v| v.as_integer()),
            Some(1)
        );
        let attendee = event
            .entries
            .iter()
            .find(|e| e.name == ICalendarProperty::Attendee)
            .unwrap();
        assert!(attendee.params.iter().any(|p| p.name == ICalendarParameterName::Partstat
            && p.value
                == ICalendarParameterValue::Partstat(ICalendarParticipationStatus::NeedsAction)));
        assert!(!attendee.params.iter().any(|p| p.name == ICalendarParameterName::Partstat
            && p.value
                == ICalendarParameterValue::Partstat(ICalendarParticipationStatus::Accepted)));
    }

    #[test]
    fn unchanged_object_sends_nothing() {
        let old = event("20250310T100000Z", &["bob@example.com"]);
        let new = event("20250310T100000Z", &["bob@example.com"]);
        let update =
            organizer_update(Some(&old), Some(&new), &addresses(), None, PROD_ID, 10).unwrap();
        assert!(update.recipients.is_empty());
        assert!(!update.needs_action);
    }

    #[test]
    fn removed_attendee_is_cancelled() {
        let old = event("20250310T100000Z", &["bob@example.com", "carol@example.net"]);
        let new = event("20250310T100000Z", &["bob@example.com"]);
        let update =
            organizer_update(Some(&old), Some(&new), &addresses(), None, PROD_ID, 10).unwrap();

        // Remaining attendees receive the updated list
        assert_eq!(
            update
                .recipients
                .iter()
                .map(|r| (r.address.as_str(), &r.method))
                .collect::<Vec<_>>(),
            vec![
                ("bob@example.com", &SchedulingMethod::Request),
                ("carol@example.net", &SchedulingMethod::Cancel)
            ]
        );
        assert!(!update.needs_action);

        // The stored object and the cancellation share the same sequence
        let object = update.object.unwrap();
        assert_eq!(sequence_of(&object.components[1]), Some(1));
        assert_eq!(
            sequence_of(&update.recipients[1].message.components[1]),
            Some(1)
        );
        assert_eq!(
            sequence_of(&update.recipients[0].message.components[1]),
            Some(1)
        );
    }

    #[test]
    fn deletion_cancels_everyone() {
        let old = event("20250310T100000Z", &["bob@example.com", "carol@example.net"]);
        let update = organizer_update(Some(&old), None, &addresses(), None, PROD_ID, 10).unwrap();

        assert!(update.object.is_none());
        assert_eq!(update.recipients.len(), 2);
        assert!(
            update
                .recipients
                .iter()
                .all(|r| r.method == SchedulingMethod::Cancel)
        );
    }

    #[test]
    fn recipient_limit() {
        let new = event(
            "20250310T100000Z",
            &["bob@example.com", "carol@example.net", "dave@example.org"],
        );
        assert_eq!(
            organizer_update(None, Some(&new), &addresses(), None, PROD_ID, 2).unwrap_err(),
            ItipError::TooManyRecipients(3)
        );
    }

    #[test]
    fn attendee_cannot_organize() {
        let new = event("20250310T100000Z", &["bob@example.com"]);
        assert_eq!(
            organizer_update(
                None,
                Some(&new),
                &["bob@example.com".to_string()],
                None,
                PROD_ID,
                10
            )
            .unwrap_err(),
            ItipError::NotOrganizer
        );
    }
}
