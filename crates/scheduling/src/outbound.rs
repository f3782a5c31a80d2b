/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use calcard::icalendar::ICalendar;
use roaring::RoaringBitmap;
use trc::AddContext;

use crate::{
    ScheduleResult, Scheduler, SchedulingBackend,
    itip::{
        AttendeeAccumulator, ItipError,
        attendee::{AttendeeReply, attendee_reply},
        export::{StatusTarget, schedule_status_actions},
        merge::{MergeAction, itip_merge_changes},
        organizer::{OrganizerUpdate, organizer_annotate_all, organizer_update},
        snapshot::itip_snapshot,
    },
    status::ScheduleStatus,
    store::Capability,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientStatus {
    pub address: String,
    pub status: ScheduleStatus,
}

/// Result of scheduling a change to a calendar object.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Object to persist in place of the submitted one, annotated with the
    /// delivery status of every recipient. `None` when the object was deleted.
    pub object: Option<ICalendar>,
    pub recipients: Vec<RecipientStatus>,
    pub needs_action: bool,
}

enum Role {
    Organizer,
    Attendee,
}

impl<T: SchedulingBackend> Scheduler<T> {
    /// Sends the scheduling messages implied by a create (`old` is `None`),
    /// an update, or a delete (`new` is `None`) of a calendar object owned
    /// by `account_id`.
    ///
    /// `updater` is the attendee whose reply caused the change, if any; it
    /// is not sent a copy of its own update.
    pub async fn schedule_update(
        &self,
        account_id: u32,
        old: Option<&ICalendar>,
        new: Option<&ICalendar>,
        updater: Option<&str>,
    ) -> ScheduleResult<ScheduleOutcome> {
        let unchanged = || ScheduleOutcome {
            object: new.cloned(),
            ..Default::default()
        };
        if !self.config.enabled {
            return Ok(unchanged());
        }
        let Some(reference) = new.or(old) else {
            return Ok(unchanged());
        };

        let addresses = self
            .backend
            .addresses(account_id)
            .await
            .caused_by(trc::location!())?;

        let (role, uid) = match itip_snapshot(reference, &addresses) {
            Ok(snapshot) if snapshot.organizer.email.is_local => {
                (Role::Organizer, snapshot.uid.to_string())
            }
            Ok(snapshot) => (Role::Attendee, snapshot.uid.to_string()),
            Err(ItipError::NoSchedulingInfo | ItipError::NotOrganizerNorAttendee) => {
                return Ok(unchanged());
            }
            Err(err) => return Err(err.into()),
        };

        match role {
            Role::Organizer => {
                self.organizer_schedule(account_id, &addresses, &uid, old, new, updater)
                    .await
            }
            Role::Attendee => {
                self.attendee_schedule(account_id, &addresses, &uid, old, new)
                    .await
            }
        }
    }

    async fn organizer_schedule(
        &self,
        account_id: u32,
        addresses: &[String],
        uid: &str,
        old: Option<&ICalendar>,
        new: Option<&ICalendar>,
        updater: Option<&str>,
    ) -> ScheduleResult<ScheduleOutcome> {
        if !self
            .backend
            .has_capability(account_id, Capability::InviteOutbound)
            .await
            .caused_by(trc::location!())?
        {
            trc::event!(
                Calendar(trc::CalendarEvent::SchedulingRefused),
                AccountId = account_id,
                Uid = uid.to_string(),
                Reason = "Missing outbound invite capability",
            );

            let Some(new) = new else {
                return Err(ItipError::PermissionDenied.into());
            };
            let status = ScheduleStatus::NoPrivileges;
            let snapshot = itip_snapshot(new, addresses)?;
            let mut recipients = snapshot
                .components
                .values()
                .flat_map(|instance| instance.participants.iter())
                .filter(|participant| {
                    participant.is_schedulable()
                        && participant.email.email != snapshot.organizer.email.email
                })
                .map(|participant| participant.email.email.clone())
                .collect::<Vec<_>>();
            recipients.sort_unstable();
            recipients.dedup();

            let actions = organizer_annotate_all(new, addresses, status.as_schedule_status())?;
            let mut object = new.clone();
            itip_merge_changes(&mut object, actions);

            return Ok(ScheduleOutcome {
                object: Some(object),
                recipients: recipients
                    .into_iter()
                    .map(|address| RecipientStatus { address, status })
                    .collect(),
                needs_action: false,
            });
        }

        let OrganizerUpdate {
            object,
            organizer,
            uid: _,
            needs_action,
            mut recipients,
            instances,
        } = match organizer_update(
            old,
            new,
            addresses,
            updater,
            &self.config.prod_id,
            self.config.max_recipients,
        ) {
            Ok(update) => update,
            Err(ItipError::OtherSchedulingAgent) => {
                return Ok(ScheduleOutcome {
                    object: new.cloned(),
                    ..Default::default()
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut followups = Vec::new();
        self.route(&organizer, &mut recipients, &mut followups)
            .await;

        let object = object.map(|mut object| {
            let actions = status_actions(&object, &instances, &recipients);
            itip_merge_changes(&mut object, actions);
            object
        });

        self.dispatch_followups(followups).await;

        Ok(ScheduleOutcome {
            object,
            recipients: recipient_statuses(&recipients),
            needs_action,
        })
    }

    async fn attendee_schedule(
        &self,
        account_id: u32,
        addresses: &[String],
        uid: &str,
        old: Option<&ICalendar>,
        new: Option<&ICalendar>,
    ) -> ScheduleResult<ScheduleOutcome> {
        if !self
            .backend
            .has_capability(account_id, Capability::ReplyOutbound)
            .await
            .caused_by(trc::location!())?
        {
            trc::event!(
                Calendar(trc::CalendarEvent::SchedulingRefused),
                AccountId = account_id,
                Uid = uid.to_string(),
                Reason = "Missing outbound reply capability",
            );

            let Some(new) = new else {
                return Err(ItipError::PermissionDenied.into());
            };
            let status = ScheduleStatus::NoPrivileges;
            let snapshot = itip_snapshot(new, addresses)?;
            let organizer = snapshot.organizer.email.email.clone();
            let instances = snapshot
                .ordered()
                .into_iter()
                .map(|(_, instance)| Some(instance.comp_id))
                .collect::<Vec<_>>();
            let comp_mask = (0..instances.len() as u32).collect::<RoaringBitmap>();
            let actions = schedule_status_actions(
                new,
                &instances,
                &comp_mask,
                StatusTarget::Organizer,
                status.as_schedule_status(),
            );
            let mut object = new.clone();
            itip_merge_changes(&mut object, actions);

            return Ok(ScheduleOutcome {
                object: Some(object),
                recipients: vec![RecipientStatus {
                    address: organizer,
                    status,
                }],
                needs_action: false,
            });
        }

        let AttendeeReply {
            mut object,
            organizer: _,
            from,
            uid: _,
            reply,
            mut delegates,
            instances,
        } = attendee_reply(old, new, addresses, &self.config.prod_id)?;

        let mut followups = Vec::new();
        let mut recipients = Vec::new();

        if let Some(reply) = reply {
            let mut replies = [reply];
            self.route(&from, &mut replies, &mut followups).await;
            let [reply] = replies;

            if let Some(object) = &mut object {
                let actions = schedule_status_actions(
                    object,
                    &instances,
                    &reply.comp_mask,
                    StatusTarget::Organizer,
                    reply.status.as_schedule_status(),
                );
                itip_merge_changes(object, actions);
            }
            recipients.push(RecipientStatus {
                address: reply.address,
                status: reply.status,
            });
        }

        if !delegates.is_empty() {
            self.route(&from, &mut delegates, &mut followups).await;
            recipients.extend(recipient_statuses(&delegates));
        }

        self.dispatch_followups(followups).await;

        Ok(ScheduleOutcome {
            object,
            recipients,
            needs_action: false,
        })
    }
}

fn status_actions(
    object: &ICalendar,
    instances: &[Option<u16>],
    recipients: &[AttendeeAccumulator],
) -> Vec<MergeAction> {
    recipients
        .iter()
        .flat_map(|accumulator| {
            schedule_status_actions(
                object,
                instances,
                &accumulator.comp_mask,
                StatusTarget::Participant(&accumulator.address),
                accumulator.status.as_schedule_status(),
            )
        })
        .collect()
}

fn recipient_statuses(recipients: &[AttendeeAccumulator]) -> Vec<RecipientStatus> {
    recipients
        .iter()
        .map(|accumulator| RecipientStatus {
            address: accumulator.address.clone(),
            status: accumulator.status,
        })
        .collect()
}
