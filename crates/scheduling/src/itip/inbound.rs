/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    InstanceId, ItipError, ItipSnapshot, ItipSnapshots, ParticipantKind, SchedulingMethod,
    merge::MergeAction, poll::merge_votes,
};
use ahash::AHashSet;
use calcard::icalendar::{
    ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarParameter,
    ICalendarParameterName, ICalendarParticipationStatus, ICalendarProperty, ICalendarStatus,
    ICalendarTransparency, ICalendarValue, Uri,
};

/// Work left to the router once a merge has been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Send the current votes to every voter but the one who just replied.
    PollStatus { exclude: String },
    /// Send a full REQUEST to the attendee asking for it.
    Refresh { attendee: String },
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub actions: Vec<MergeAction>,
    pub deliver_inbox: bool,
    pub followup: Option<FollowUp>,
    /// Instances skipped because the stored copy has a higher SEQUENCE.
    pub stale: usize,
}

/// Computes the changes an inbound message makes to the recipient's stored object.
pub fn itip_process_message(
    stored: &ICalendar,
    snapshots: &ItipSnapshots<'_>,
    itip: &ICalendar,
    itip_snapshots: &ItipSnapshots<'_>,
    method: &SchedulingMethod,
    sender: &str,
    transparent_needs_action: bool,
) -> Result<MergeOutcome, ItipError> {
    if snapshots.component_type != itip_snapshots.component_type {
        return Err(ItipError::ComponentTypeMismatch);
    }
    if snapshots.organizer.email != itip_snapshots.organizer.email {
        return Err(ItipError::OrganizerMismatch);
    }

    let mut outcome = MergeOutcome::default();

    if snapshots.organizer.email.is_local {
        if snapshots.organizer.email.email == sender {
            return Err(ItipError::SenderIsNotOrganizerNorAttendee);
        }

        match method {
            SchedulingMethod::Reply => {
                handle_reply(stored, snapshots, itip, itip_snapshots, sender, &mut outcome)?;
                outcome.deliver_inbox = true;
                if snapshots.kind == ParticipantKind::Voter && !outcome.actions.is_empty() {
                    outcome.followup = Some(FollowUp::PollStatus {
                        exclude: sender.to_string(),
                    });
                }
            }
            SchedulingMethod::Refresh => {
                if !snapshots.sender_is_organizer_or_attendee(sender) {
                    return Err(ItipError::SenderIsNotParticipant(sender.to_string()));
                }
                outcome.followup = Some(FollowUp::Refresh {
                    attendee: sender.to_string(),
                });
            }
            SchedulingMethod::Request
            | SchedulingMethod::Add
            | SchedulingMethod::Cancel
            | SchedulingMethod::PollStatus => {
                return Err(ItipError::UnsupportedMethod(method.as_str().to_string()));
            }
            _ => {
                outcome.deliver_inbox = true;
            }
        }

        return Ok(outcome);
    }

    match method {
        SchedulingMethod::Request => {
            handle_request(
                stored,
                snapshots,
                itip,
                itip_snapshots,
                transparent_needs_action,
                &mut outcome,
            );
        }
        SchedulingMethod::Add => {
            for (instance_id, itip_snapshot) in itip_snapshots.ordered() {
                if !snapshots.components.contains_key(instance_id) {
                    outcome
                        .actions
                        .push(add_instance(itip, itip_snapshot, transparent_needs_action));
                }
            }
            outcome.deliver_inbox = !outcome.actions.is_empty();
        }
        SchedulingMethod::Cancel => {
            handle_cancel(snapshots, itip_snapshots, &mut outcome);
            outcome.deliver_inbox = !outcome.actions.is_empty();
        }
        SchedulingMethod::PollStatus => {
            if snapshots.kind != ParticipantKind::Voter {
                return Err(ItipError::ComponentTypeMismatch);
            }
            for (instance_id, itip_snapshot) in itip_snapshots.ordered() {
                if let Some(snapshot) = snapshots.components.get(instance_id) {
                    outcome.actions.extend(merge_votes(
                        stored,
                        snapshot.comp,
                        itip,
                        itip_snapshot.comp,
                        None,
                        None,
                    ));
                }
            }
            outcome.deliver_inbox = !outcome.actions.is_empty();
        }
        SchedulingMethod::Reply
            if itip_snapshots.components.values().any(|snapshot| {
                snapshot.external_participants().any(|participant| {
                    participant.email.email == sender
                        && participant.delegated_from.iter().any(|d| d.is_local)
                })
            }) =>
        {
            handle_reply(stored, snapshots, itip, itip_snapshots, sender, &mut outcome)?;
            outcome.deliver_inbox = true;
        }
        SchedulingMethod::Reply | SchedulingMethod::Refresh => {
            return Err(ItipError::UnsupportedMethod(method.as_str().to_string()));
        }
        _ => {
            outcome.deliver_inbox = true;
        }
    }

    Ok(outcome)
}

fn handle_request(
    stored: &ICalendar,
    snapshots: &ItipSnapshots<'_>,
    itip: &ICalendar,
    itip_snapshots: &ItipSnapshots<'_>,
    transparent_needs_action: bool,
    outcome: &mut MergeOutcome,
) {
    let mut is_full_update = false;
    let mut merged = false;

    for (instance_id, itip_snapshot) in itip_snapshots.ordered() {
        is_full_update = is_full_update || instance_id == &InstanceId::Main;

        let Some(snapshot) = snapshots.components.get(instance_id) else {
            outcome
                .actions
                .push(add_instance(itip, itip_snapshot, transparent_needs_action));
            outcome.deliver_inbox = true;
            merged = true;
            continue;
        };

        let itip_sequence = itip_snapshot.sequence.unwrap_or_default();
        let stored_sequence = snapshot.sequence.unwrap_or_default();
        if itip_sequence < stored_sequence {
            outcome.stale += 1;
            continue;
        }
        outcome.deliver_inbox |= itip_sequence > stored_sequence;
        merged = true;

        let entries = request_entries(snapshot.comp, itip_snapshot, transparent_needs_action);
        if itip_snapshots.kind == ParticipantKind::Voter {
            // Poll items are replaced along with the poll
            outcome.actions.extend(remove_with_children(stored, snapshot.comp_id));
            outcome.actions.push(MergeAction::AddComponent {
                component: ICalendarComponent {
                    component_type: itip_snapshot.comp.component_type.clone(),
                    entries,
                    component_ids: vec![],
                },
                children: children_of(itip, itip_snapshot.comp),
            });
        } else {
            outcome.actions.push(MergeAction::ReplaceEntries {
                component_id: snapshot.comp_id,
                entries,
            });
        }
    }

    if is_full_update {
        for (instance_id, snapshot) in snapshots.ordered() {
            if !itip_snapshots.components.contains_key(instance_id) {
                outcome.actions.extend(remove_with_children(stored, snapshot.comp_id));
            }
        }
    }

    if merged {
        merge_timezones(stored, itip, &mut outcome.actions);
    }
}

/// Builds the entries of an updated instance, keeping the values the
/// attendee owns.
fn request_entries(
    stored: &ICalendarComponent,
    itip_snapshot: &ItipSnapshot<'_>,
    transparent_needs_action: bool,
) -> Vec<ICalendarEntry> {
    let set_transparent = transparent_needs_action && needs_transparency(itip_snapshot);
    let carried = stored
        .entries
        .iter()
        .filter(|entry| {
            matches!(
                entry.name,
                ICalendarProperty::Completed | ICalendarProperty::PercentComplete
            ) || (entry.name == ICalendarProperty::Transp && !set_transparent)
        })
        .collect::<Vec<_>>();
    let carried_names = carried
        .iter()
        .map(|entry| entry.name.clone())
        .collect::<AHashSet<_>>();
    let organizer_status = stored
        .entries
        .iter()
        .find(|entry| entry.name == ICalendarProperty::Organizer)
        .map(|entry| {
            entry
                .params
                .iter()
                .filter(|param| param.name == ICalendarParameterName::ScheduleStatus)
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut entries = Vec::with_capacity(itip_snapshot.comp.entries.len() + carried.len() + 1);
    for entry in &itip_snapshot.comp.entries {
        match &entry.name {
            ICalendarProperty::RequestStatus => {}
            ICalendarProperty::Transp if set_transparent => {}
            name if carried_names.contains(name) => {}
            ICalendarProperty::Organizer => {
                let mut entry = entry.clone();
                entry
                    .params
                    .retain(|param| param.name != ICalendarParameterName::ScheduleStatus);
                entry.params.extend(organizer_status.iter().cloned());
                entries.push(entry);
            }
            _ => entries.push(entry.clone()),
        }
    }
    entries.extend(carried.into_iter().cloned());
    if set_transparent {
        entries.push(transparent_entry());
    }

    entries
}

fn needs_transparency(itip_snapshot: &ItipSnapshot<'_>) -> bool {
    itip_snapshot.comp.component_type == ICalendarComponentType::VEvent
        && itip_snapshot.local_participant().is_some_and(|participant| {
            matches!(
                participant.part_stat,
                None | Some(ICalendarParticipationStatus::NeedsAction)
            )
        })
}

fn transparent_entry() -> ICalendarEntry {
    ICalendarEntry {
        name: ICalendarProperty::Transp,
        params: vec![],
        values: vec![ICalendarValue::Transparency(
            ICalendarTransparency::Transparent,
        )],
    }
}

/// Marks the unanswered events of a freshly imported object as transparent.
pub fn transparency_actions(snapshots: &ItipSnapshots<'_>) -> Vec<MergeAction> {
    let mut actions = Vec::new();
    for snapshot in snapshots.components.values() {
        if needs_transparency(snapshot) {
            actions.push(MergeAction::RemoveEntries {
                component_id: snapshot.comp_id,
                entries: [ICalendarProperty::Transp].into_iter().collect(),
            });
            actions.push(MergeAction::AddEntries {
                component_id: snapshot.comp_id,
                entries: vec![transparent_entry()],
            });
        }
    }
    actions
}

fn add_instance(
    itip: &ICalendar,
    itip_snapshot: &ItipSnapshot<'_>,
    transparent_needs_action: bool,
) -> MergeAction {
    let set_transparent = transparent_needs_action && needs_transparency(itip_snapshot);
    let mut entries = itip_snapshot
        .comp
        .entries
        .iter()
        .filter(|entry| {
            entry.name != ICalendarProperty::RequestStatus
                && !(set_transparent && entry.name == ICalendarProperty::Transp)
        })
        .cloned()
        .collect::<Vec<_>>();
    if set_transparent {
        entries.push(transparent_entry());
    }

    MergeAction::AddComponent {
        component: ICalendarComponent {
            component_type: itip_snapshot.comp.component_type.clone(),
            entries,
            component_ids: vec![],
        },
        children: children_of(itip, itip_snapshot.comp),
    }
}

fn children_of(ical: &ICalendar, component: &ICalendarComponent) -> Vec<ICalendarComponent> {
    component
        .component_ids
        .iter()
        .filter_map(|comp_id| ical.components.get(*comp_id as usize))
        .map(|child| ICalendarComponent {
            component_type: child.component_type.clone(),
            entries: child.entries.clone(),
            component_ids: vec![],
        })
        .collect()
}

fn remove_with_children(ical: &ICalendar, comp_id: u16) -> Vec<MergeAction> {
    let mut actions = vec![MergeAction::RemoveComponent {
        component_id: comp_id,
    }];
    if let Some(component) = ical.components.get(comp_id as usize) {
        actions.extend(
            component
                .component_ids
                .iter()
                .map(|child_id| MergeAction::RemoveComponent {
                    component_id: *child_id as u16,
                }),
        );
    }
    actions
}

fn timezone_id(component: &ICalendarComponent) -> Option<&str> {
    component
        .entries
        .iter()
        .find(|entry| entry.name == ICalendarProperty::Tzid)
        .and_then(|entry| entry.values.first())
        .and_then(|value| value.as_text())
}

/// Replaces stored VTIMEZONEs with the message's ones sharing a TZID and adds the rest.
fn merge_timezones(stored: &ICalendar, itip: &ICalendar, actions: &mut Vec<MergeAction>) {
    let Some(itip_root) = itip.components.first() else {
        return;
    };
    let stored_timezones = stored
        .components
        .first()
        .map(|root| {
            root.component_ids
                .iter()
                .filter_map(|comp_id| {
                    let component = stored.components.get(*comp_id as usize)?;
                    (component.component_type == ICalendarComponentType::VTimezone)
                        .then(|| timezone_id(component).map(|tz_id| (tz_id, *comp_id as u16)))
                        .flatten()
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for timezone in itip_root
        .component_ids
        .iter()
        .filter_map(|comp_id| itip.components.get(*comp_id as usize))
        .filter(|component| component.component_type == ICalendarComponentType::VTimezone)
    {
        let Some(tz_id) = timezone_id(timezone) else {
            continue;
        };
        if let Some((_, comp_id)) = stored_timezones.iter().find(|(id, _)| *id == tz_id) {
            actions.extend(remove_with_children(stored, *comp_id));
        }
        actions.push(MergeAction::AddComponent {
            component: ICalendarComponent {
                component_type: ICalendarComponentType::VTimezone,
                entries: timezone.entries.clone(),
                component_ids: vec![],
            },
            children: children_of(itip, timezone),
        });
    }
}

fn handle_cancel(
    snapshots: &ItipSnapshots<'_>,
    itip_snapshots: &ItipSnapshots<'_>,
    outcome: &mut MergeOutcome,
) {
    let cancel = |snapshot: &ItipSnapshot<'_>, actions: &mut Vec<MergeAction>| {
        if !snapshot.is_cancelled() {
            actions.push(MergeAction::RemoveEntries {
                component_id: snapshot.comp_id,
                entries: [ICalendarProperty::Status, ICalendarProperty::Sequence]
                    .into_iter()
                    .collect(),
            });
            actions.push(MergeAction::AddEntries {
                component_id: snapshot.comp_id,
                entries: vec![
                    ICalendarEntry {
                        name: ICalendarProperty::Status,
                        params: vec![],
                        values: vec![ICalendarValue::Status(ICalendarStatus::Cancelled)],
                    },
                    ICalendarEntry {
                        name: ICalendarProperty::Sequence,
                        params: vec![],
                        values: vec![ICalendarValue::Integer(
                            snapshot.sequence.unwrap_or_default() + 1,
                        )],
                    },
                ],
            });
        }
    };

    if let Some(itip_main) = itip_snapshots.main_instance() {
        let is_stale = snapshots.main_instance().is_some_and(|main| {
            itip_main.sequence.unwrap_or_default() < main.sequence.unwrap_or_default()
        });
        if is_stale {
            outcome.stale += 1;
        } else {
            for (_, snapshot) in snapshots.ordered() {
                cancel(snapshot, &mut outcome.actions);
            }
        }
        return;
    }

    for (instance_id, itip_snapshot) in itip_snapshots.ordered() {
        if let Some(snapshot) = snapshots.components.get(instance_id) {
            if itip_snapshot.sequence.unwrap_or_default() < snapshot.sequence.unwrap_or_default() {
                outcome.stale += 1;
            } else {
                cancel(snapshot, &mut outcome.actions);
            }
        } else {
            outcome.actions.push(MergeAction::AddComponent {
                component: ICalendarComponent {
                    component_type: itip_snapshot.comp.component_type.clone(),
                    entries: itip_snapshot
                        .comp
                        .entries
                        .iter()
                        .filter(|entry| {
                            !matches!(
                                entry.name,
                                ICalendarProperty::Status | ICalendarProperty::RequestStatus
                            )
                        })
                        .cloned()
                        .chain([ICalendarEntry {
                            name: ICalendarProperty::Status,
                            params: vec![],
                            values: vec![ICalendarValue::Status(ICalendarStatus::Cancelled)],
                        }])
                        .collect(),
                    component_ids: vec![],
                },
                children: vec![],
            });
        }
    }
}

fn handle_reply(
    stored: &ICalendar,
    snapshots: &ItipSnapshots<'_>,
    itip: &ICalendar,
    itip_snapshots: &ItipSnapshots<'_>,
    sender: &str,
    outcome: &mut MergeOutcome,
) -> Result<(), ItipError> {
    for (instance_id, itip_snapshot) in itip_snapshots.ordered() {
        let status = itip_snapshot
            .request_status
            .first()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .unwrap_or("2.0");

        let Some(snapshot) = snapshots.components.get(instance_id) else {
            let Some(updated) = itip_snapshot.participant_by_email(sender) else {
                return Err(ItipError::SenderIsNotParticipant(sender.to_string()));
            };
            outcome.actions.push(self_added_instance(
                snapshots,
                itip_snapshot,
                updated.entry_id,
                status,
            ));
            continue;
        };

        let (Some(participant), Some(updated)) = (
            snapshot.participant_by_email(sender),
            itip_snapshot.participant_by_email(sender),
        ) else {
            return Err(ItipError::SenderIsNotParticipant(sender.to_string()));
        };
        let itip_component = itip_snapshot.comp;

        let mut add_parameters = vec![ICalendarParameter::schedule_status(status.to_string())];
        let mut remove_parameters = vec![ICalendarParameterName::ScheduleStatus];
        if participant.part_stat != updated.part_stat {
            remove_parameters.push(ICalendarParameterName::Partstat);
            if let Some(part_stat) = updated.part_stat {
                add_parameters.push(ICalendarParameter::partstat(part_stat.clone()));
            }
        }
        if participant.rsvp != updated.rsvp {
            remove_parameters.push(ICalendarParameterName::Rsvp);
            if let Some(rsvp) = updated.rsvp {
                add_parameters.push(ICalendarParameter::rsvp(rsvp));
            }
        }
        if participant.delegated_to != updated.delegated_to {
            remove_parameters.push(ICalendarParameterName::DelegatedTo);
            add_parameters.extend(
                updated
                    .delegated_to
                    .iter()
                    .map(|email| ICalendarParameter::delegated_to(Uri::Location(email.to_string()))),
            );
        }
        outcome.actions.push(MergeAction::RemoveParameters {
            component_id: snapshot.comp_id,
            entry_id: participant.entry_id,
            parameters: remove_parameters,
        });
        outcome.actions.push(MergeAction::AddParameters {
            component_id: snapshot.comp_id,
            entry_id: participant.entry_id,
            parameters: add_parameters,
        });

        // Delegates unknown to the organizer become participants
        for delegated_to in &updated.delegated_to {
            let Some(itip_delegated) = itip_snapshot.participant_by_email(&delegated_to.email)
            else {
                continue;
            };
            let delegated_params = || {
                itip_component.entries[itip_delegated.entry_id as usize]
                    .params
                    .iter()
                    .filter(|param| {
                        matches!(
                            param.name,
                            ICalendarParameterName::DelegatedTo
                                | ICalendarParameterName::DelegatedFrom
                                | ICalendarParameterName::Partstat
                                | ICalendarParameterName::Rsvp
                                | ICalendarParameterName::Role
                        )
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            };

            if let Some(delegated) = snapshot.participant_by_email(&delegated_to.email) {
                if delegated != itip_delegated {
                    outcome.actions.push(MergeAction::RemoveParameters {
                        component_id: snapshot.comp_id,
                        entry_id: delegated.entry_id,
                        parameters: vec![
                            ICalendarParameterName::DelegatedTo,
                            ICalendarParameterName::DelegatedFrom,
                            ICalendarParameterName::Partstat,
                            ICalendarParameterName::Rsvp,
                            ICalendarParameterName::Role,
                        ],
                    });
                    outcome.actions.push(MergeAction::AddParameters {
                        component_id: snapshot.comp_id,
                        entry_id: delegated.entry_id,
                        parameters: delegated_params(),
                    });
                }
            } else if let Some(entry) = itip_component.entries.get(itip_delegated.entry_id as usize)
            {
                outcome.actions.push(MergeAction::AddEntries {
                    component_id: snapshot.comp_id,
                    entries: vec![entry.clone()],
                });
            }
        }

        if snapshot.comp.component_type == ICalendarComponentType::VTodo {
            let mut remove_entries = AHashSet::new();
            let mut add_entries = Vec::new();
            for entry in &itip_component.entries {
                if matches!(
                    entry.name,
                    ICalendarProperty::PercentComplete
                        | ICalendarProperty::Status
                        | ICalendarProperty::Completed
                ) {
                    remove_entries.insert(entry.name.clone());
                    add_entries.push(entry.clone());
                }
            }
            if !add_entries.is_empty() {
                outcome.actions.push(MergeAction::RemoveEntries {
                    component_id: snapshot.comp_id,
                    entries: remove_entries,
                });
                outcome.actions.push(MergeAction::AddEntries {
                    component_id: snapshot.comp_id,
                    entries: add_entries,
                });
            }
        }

        if snapshots.kind == ParticipantKind::Voter {
            outcome.actions.extend(merge_votes(
                stored,
                snapshot.comp,
                itip,
                itip_component,
                Some(sender),
                Some(status),
            ));
        }
    }

    Ok(())
}

/// Builds an override for an instance the sender replied to but the
/// organizer never detached from the series.
fn self_added_instance(
    snapshots: &ItipSnapshots<'_>,
    itip_snapshot: &ItipSnapshot<'_>,
    sender_entry_id: u16,
    status: &str,
) -> MergeAction {
    let itip_component = itip_snapshot.comp;
    let overridden = |name: &ICalendarProperty| {
        matches!(
            name,
            ICalendarProperty::Dtstart
                | ICalendarProperty::Dtend
                | ICalendarProperty::Duration
                | ICalendarProperty::Sequence
                | ICalendarProperty::RecurrenceId
                | ICalendarProperty::Dtstamp
        )
    };
    let mut sender_entry = itip_component.entries[sender_entry_id as usize].clone();
    sender_entry
        .params
        .retain(|param| param.name != ICalendarParameterName::ScheduleStatus);
    sender_entry
        .params
        .push(ICalendarParameter::schedule_status(status.to_string()));
    let sender_email = itip_snapshot
        .participants
        .iter()
        .find(|participant| participant.entry_id == sender_entry_id)
        .map(|participant| participant.email.email.as_str());

    let entries = if let Some(master) = snapshots.main_instance() {
        let has_duration = itip_component
            .entries
            .iter()
            .any(|entry| matches!(entry.name, ICalendarProperty::Dtend | ICalendarProperty::Duration));
        let mut entries = master
            .comp
            .entries
            .iter()
            .enumerate()
            .filter(|(entry_id, entry)| {
                !overridden(&entry.name)
                    && !matches!(
                        entry.name,
                        ICalendarProperty::Rrule
                            | ICalendarProperty::Rdate
                            | ICalendarProperty::Exdate
                    )
                    && !master.participants.iter().any(|participant| {
                        participant.entry_id as usize == *entry_id
                            && Some(participant.email.email.as_str()) == sender_email
                    })
            })
            .map(|(_, entry)| entry.clone())
            .collect::<Vec<_>>();
        entries.extend(
            itip_component
                .entries
                .iter()
                .filter(|entry| overridden(&entry.name))
                .cloned(),
        );
        if !has_duration {
            entries.extend(
                master
                    .comp
                    .entries
                    .iter()
                    .filter(|entry| {
                        matches!(entry.name, ICalendarProperty::Dtend | ICalendarProperty::Duration)
                    })
                    .cloned(),
            );
        }
        if !entries
            .iter()
            .any(|entry| entry.name == ICalendarProperty::Dtstart)
        {
            if let Some(recurrence_id) = itip_component
                .entries
                .iter()
                .find(|entry| entry.name == ICalendarProperty::RecurrenceId)
            {
                entries.push(ICalendarEntry {
                    name: ICalendarProperty::Dtstart,
                    params: recurrence_id
                        .params
                        .iter()
                        .filter(|param| param.name != ICalendarParameterName::Range)
                        .cloned()
                        .collect(),
                    values: recurrence_id.values.clone(),
                });
            }
        }
        entries.push(sender_entry);
        entries
    } else {
        let is_todo = itip_component.component_type == ICalendarComponentType::VTodo;
        itip_component
            .entries
            .iter()
            .enumerate()
            .filter(|(entry_id, entry)| {
                *entry_id != sender_entry_id as usize
                    && (matches!(
                        entry.name,
                        ICalendarProperty::Organizer
                            | ICalendarProperty::Attendee
                            | ICalendarProperty::Uid
                    ) || overridden(&entry.name)
                        || (is_todo
                            && matches!(
                                entry.name,
                                ICalendarProperty::PercentComplete
                                    | ICalendarProperty::Status
                                    | ICalendarProperty::Completed
                            )))
            })
            .map(|(_, entry)| entry.clone())
            .chain([sender_entry])
            .collect()
    };

    MergeAction::AddComponent {
        component: ICalendarComponent {
            component_type: itip_component.component_type.clone(),
            entries,
            component_ids: vec![],
        },
        children: vec![],
    }
}
