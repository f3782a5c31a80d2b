/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    AttendeeAccumulator, Email, ItipError, ParticipantKind, SchedulingMethod,
    export::{ItipExportAs, itip_add_tz, itip_export_children, itip_export_component},
    is_property,
    merge::MergeAction,
    snapshot::itip_snapshot,
};
use ahash::AHashSet;
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarEntry, ICalendarParameter,
        ICalendarParameterName, ICalendarParticipationStatus, ICalendarValue,
    },
};

pub fn poll_item_id(component: &ICalendarComponent) -> Option<String> {
    component
        .entries
        .iter()
        .find(|entry| is_property(&entry.name, "POLL-ITEM-ID"))
        .and_then(|entry| entry.values.first())
        .and_then(|value| match value {
            ICalendarValue::Integer(id) => Some(id.to_string()),
            value => value.as_text().map(|id| id.trim().to_string()),
        })
}

pub(crate) fn voter_email(entry: &ICalendarEntry) -> Option<String> {
    if ParticipantKind::Voter.is_participant(&entry.name) {
        entry
            .values
            .first()
            .and_then(|v| v.as_text())
            .and_then(|v| Email::new(v, &[]))
            .map(|email| email.email)
    } else {
        None
    }
}

fn poll_items<'x>(
    ical: &'x ICalendar,
    component: &'x ICalendarComponent,
) -> impl Iterator<Item = (String, u16, &'x ICalendarComponent)> + 'x {
    component.component_ids.iter().filter_map(|comp_id| {
        let child = ical.components.get(*comp_id as usize)?;
        poll_item_id(child).map(|id| (id, *comp_id as u16, child))
    })
}

/// Poll items reduced to their id and the votes cast by `voter`.
pub(crate) fn vote_record(
    ical: &ICalendar,
    component: &ICalendarComponent,
    voter: &str,
) -> Vec<ICalendarComponent> {
    poll_items(ical, component)
        .map(|(_, _, item)| ICalendarComponent {
            component_type: item.component_type.clone(),
            entries: item
                .entries
                .iter()
                .filter(|entry| {
                    is_property(&entry.name, "POLL-ITEM-ID")
                        || voter_email(entry).is_some_and(|email| email == voter)
                })
                .map(|entry| ICalendarEntry {
                    name: entry.name.clone(),
                    params: entry
                        .params
                        .iter()
                        .filter(|param| {
                            !matches!(
                                param.name,
                                ICalendarParameterName::ScheduleStatus
                                    | ICalendarParameterName::ScheduleAgent
                                    | ICalendarParameterName::ScheduleForceSend
                            )
                        })
                        .cloned()
                        .collect(),
                    values: entry.values.clone(),
                })
                .collect(),
            component_ids: vec![],
        })
        .collect()
}

/// Replaces stored votes with the ones carried by a message.
///
/// When `voter` is set only that voter's records are taken from the message,
/// otherwise every voter present in a message item replaces its stored votes.
pub(crate) fn merge_votes(
    stored: &ICalendar,
    stored_poll: &ICalendarComponent,
    message: &ICalendar,
    message_poll: &ICalendarComponent,
    voter: Option<&str>,
    schedule_status: Option<&str>,
) -> Vec<MergeAction> {
    let mut actions = Vec::new();
    let message_items = poll_items(message, message_poll).collect::<Vec<_>>();

    for (item_id, comp_id, item) in poll_items(stored, stored_poll) {
        let Some((_, _, message_item)) = message_items.iter().find(|(id, _, _)| id == &item_id)
        else {
            continue;
        };

        let votes = message_item
            .entries
            .iter()
            .filter_map(|entry| {
                let email = voter_email(entry)?;
                voter.is_none_or(|voter| voter == email).then(|| {
                    let mut entry = entry.clone();
                    entry.params.retain(|param| {
                        !matches!(
                            param.name,
                            ICalendarParameterName::ScheduleStatus
                                | ICalendarParameterName::ScheduleForceSend
                        )
                    });
                    if let Some(status) = schedule_status {
                        entry
                            .params
                            .push(ICalendarParameter::schedule_status(status.to_string()));
                    }
                    (email, entry)
                })
            })
            .collect::<Vec<_>>();
        if votes.is_empty() {
            continue;
        }
        let voters = votes
            .iter()
            .map(|(email, _)| email.as_str())
            .collect::<AHashSet<_>>();

        let entry_ids = item
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| voter_email(entry).is_some_and(|email| voters.contains(email.as_str())))
            .map(|(entry_id, _)| entry_id as u16)
            .collect::<Vec<_>>();
        let unchanged = entry_ids.len() == votes.len()
            && entry_ids
                .iter()
                .zip(votes.iter())
                .all(|(entry_id, (_, vote))| {
                    item.entries
                        .get(*entry_id as usize)
                        .is_some_and(|stored| stored.values == vote.values && stored.params == vote.params)
                });
        if unchanged {
            continue;
        }

        if !entry_ids.is_empty() {
            actions.push(MergeAction::RemoveEntryIds {
                component_id: comp_id,
                entry_ids,
            });
        }
        actions.push(MergeAction::AddEntries {
            component_id: comp_id,
            entries: votes.into_iter().map(|(_, entry)| entry).collect(),
        });
    }

    actions
}

/// Builds POLLSTATUS messages carrying the current votes to every voter
/// except `exclude`.
pub fn poll_status_messages(
    ical: &ICalendar,
    addresses: &[String],
    exclude: Option<&str>,
    prod_id: &str,
) -> Result<(Vec<AttendeeAccumulator>, Vec<Option<u16>>), ItipError> {
    let itip = itip_snapshot(ical, addresses)?;
    if itip.kind != ParticipantKind::Voter {
        return Err(ItipError::ComponentTypeMismatch);
    }
    if !itip.organizer.email.is_local {
        return Err(ItipError::NotOrganizer);
    }

    let dt_stamp = PartialDateTime::now();
    let ordered = itip.ordered();
    let instances = ordered
        .iter()
        .map(|(_, instance)| Some(instance.comp_id))
        .collect::<Vec<_>>();
    let mut accumulators: Vec<AttendeeAccumulator> = Vec::new();

    for (ncomp, (_, instance)) in ordered.iter().enumerate() {
        let component = itip_export_component(
            instance.comp,
            itip.kind,
            itip.uid,
            &dt_stamp,
            instance.sequence.unwrap_or_default(),
            ItipExportAs::Organizer(&ICalendarParticipationStatus::NeedsAction),
        );
        let children = itip_export_children(ical, instance.comp);

        for participant in &instance.participants {
            let email = participant.email.email.as_str();
            if !participant.is_schedulable()
                || participant.email == itip.organizer.email
                || exclude == Some(email)
            {
                continue;
            }

            let idx = match accumulators.iter().position(|acc| acc.address == email) {
                Some(idx) => idx,
                None => {
                    accumulators.push(AttendeeAccumulator::new(
                        email,
                        SchedulingMethod::PollStatus,
                        prod_id,
                    ));
                    accumulators.len() - 1
                }
            };
            accumulators[idx].add_component(ncomp as u32, true, component.clone(), children.clone());
        }
    }

    accumulators.sort_unstable_by(|a, b| a.address.cmp(&b.address));
    for accumulator in &mut accumulators {
        itip_add_tz(&mut accumulator.message, ical);
    }

    Ok((accumulators, instances))
}
