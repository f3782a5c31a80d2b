/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use calcard::icalendar::ICalendar;
use trc::AddContext;

use crate::{
    ScheduleError, ScheduleResult, Scheduler, SchedulingBackend,
    itip::{
        ItipError, SchedulingMethod,
        export::{itip_import_message, itip_method},
        inbound::{FollowUp, itip_process_message, transparency_actions},
        merge::itip_merge_changes,
        normalize_address,
        snapshot::itip_snapshot,
    },
    status::ScheduleStatus,
    store::{Capability, Notification, OverwritePolicy, StoreOutcome},
};

/// Organizer-side work queued by a local delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFollowUp {
    pub account_id: u32,
    pub uid: String,
    pub followup: FollowUp,
}

struct Delivery {
    uid: String,
    deliver_inbox: bool,
    followup: Option<PendingFollowUp>,
}

impl<T: SchedulingBackend> Scheduler<T> {
    /// Entry point for scheduling messages arriving from outside the server,
    /// such as iSchedule POSTs or iMIP messages.
    pub async fn receive(
        &self,
        account_id: u32,
        sender: &str,
        recipient: &str,
        message: &ICalendar,
    ) -> ScheduleStatus {
        let (status, followup) = self
            .deliver_local(sender, account_id, recipient, message)
            .await;
        if let Some(followup) = followup {
            self.dispatch_followups(vec![followup]).await;
        }
        status
    }

    pub(crate) async fn deliver_local(
        &self,
        sender: &str,
        account_id: u32,
        recipient: &str,
        message: &ICalendar,
    ) -> (ScheduleStatus, Option<PendingFollowUp>) {
        let sender = normalize_address(sender).unwrap_or_else(|| sender.to_string());

        match self
            .deliver_local_(&sender, account_id, recipient, message)
            .await
        {
            Ok(delivery) => {
                if delivery.deliver_inbox {
                    self.notify(&sender, account_id, recipient, &delivery.uid, message)
                        .await;
                }

                trc::event!(
                    Calendar(trc::CalendarEvent::ItipMessageReceived),
                    AccountId = account_id,
                    From = sender,
                    To = recipient.to_string(),
                    Uid = delivery.uid,
                );

                (ScheduleStatus::Delivered, delivery.followup)
            }
            Err(ScheduleError::Itip(err)) => {
                let status = match &err {
                    ItipError::ComponentTypeMismatch | ItipError::OrganizerMismatch => {
                        ScheduleStatus::Rejected
                    }
                    ItipError::PermissionDenied => ScheduleStatus::NoPrivileges,
                    _ => ScheduleStatus::PermFail,
                };

                trc::event!(
                    Calendar(trc::CalendarEvent::ItipMessageError),
                    AccountId = account_id,
                    From = sender,
                    To = recipient.to_string(),
                    Reason = err.to_string(),
                );

                (status, None)
            }
            Err(ScheduleError::Internal(err)) => {
                trc::error!(
                    err.account_id(account_id)
                        .ctx(trc::Key::From, sender)
                        .caused_by(trc::location!())
                );

                (ScheduleStatus::TempFail, None)
            }
        }
    }

    async fn deliver_local_(
        &self,
        sender: &str,
        account_id: u32,
        recipient: &str,
        message: &ICalendar,
    ) -> ScheduleResult<Delivery> {
        let method = itip_method(message)?;
        let capability = if method.is_reply_class() {
            Capability::ReplyInbound
        } else {
            Capability::InviteInbound
        };
        if !self
            .backend
            .has_capability(account_id, capability)
            .await
            .caused_by(trc::location!())?
        {
            return Err(ItipError::PermissionDenied.into());
        }

        let mut itip = message.clone();
        itip_import_message(&mut itip)?;

        let mut addresses = self
            .backend
            .addresses(account_id)
            .await
            .caused_by(trc::location!())?;
        if let Some(recipient) = normalize_address(recipient)
            && !addresses.contains(&recipient)
        {
            addresses.push(recipient);
        }

        let itip_snapshots = itip_snapshot(&itip, &addresses)?;
        let uid = itip_snapshots.uid.to_string();

        let Some(handle) = self
            .backend
            .lookup_by_uid(account_id, &uid)
            .await
            .caused_by(trc::location!())?
        else {
            let deliver_inbox = match method {
                SchedulingMethod::Request if self.config.auto_add => {
                    let calendar = self
                        .backend
                        .default_calendar(account_id)
                        .await
                        .caused_by(trc::location!())?
                        .ok_or(ItipError::NoDefaultCalendar)?;

                    let mut ical = itip.clone();
                    if self.config.transparent_needs_action {
                        itip_merge_changes(&mut ical, transparency_actions(&itip_snapshots));
                    }

                    match self
                        .backend
                        .store(
                            account_id,
                            &calendar,
                            &resource_name(&uid),
                            &ical,
                            OverwritePolicy::CreateOnly,
                        )
                        .await
                        .caused_by(trc::location!())?
                    {
                        StoreOutcome::Created(_) | StoreOutcome::Updated(_) => true,
                        StoreOutcome::Conflict => {
                            return Err(trc::StoreEvent::AssertValueFailed
                                .into_err()
                                .details("Calendar resource already exists")
                                .ctx(trc::Key::Uid, uid)
                                .into());
                        }
                    }
                }
                SchedulingMethod::Request => true,
                SchedulingMethod::Cancel | SchedulingMethod::PollStatus | SchedulingMethod::Add => {
                    false
                }
                SchedulingMethod::Reply | SchedulingMethod::Refresh => {
                    return Err(ItipError::EventNotFound.into());
                }
                _ => true,
            };

            return Ok(Delivery {
                uid,
                deliver_inbox,
                followup: None,
            });
        };

        let bytes = self
            .backend
            .fetch(&handle)
            .await
            .caused_by(trc::location!())?
            .ok_or_else(|| {
                trc::StoreEvent::NotFound
                    .into_err()
                    .ctx(trc::Key::Uid, uid.clone())
                    .caused_by(trc::location!())
            })?;
        let stored = self.backend.parse(&bytes).caused_by(trc::location!())?;
        let snapshots = itip_snapshot(&stored, &addresses)?;

        let outcome = itip_process_message(
            &stored,
            &snapshots,
            &itip,
            &itip_snapshots,
            &method,
            sender,
            self.config.transparent_needs_action,
        )?;

        if outcome.stale > 0 {
            trc::event!(
                Calendar(trc::CalendarEvent::ItipStaleUpdate),
                AccountId = account_id,
                Uid = uid.clone(),
                Total = outcome.stale,
            );
        }

        if !outcome.actions.is_empty() {
            let mut merged = stored.clone();
            itip_merge_changes(&mut merged, outcome.actions);

            if let StoreOutcome::Conflict = self
                .backend
                .store(
                    account_id,
                    &handle.calendar,
                    &handle.name,
                    &merged,
                    OverwritePolicy::IfVersion(handle.version),
                )
                .await
                .caused_by(trc::location!())?
            {
                return Err(trc::StoreEvent::AssertValueFailed
                    .into_err()
                    .details("Calendar resource was modified concurrently")
                    .ctx(trc::Key::Uid, uid)
                    .into());
            }
        }

        Ok(Delivery {
            followup: outcome.followup.map(|followup| PendingFollowUp {
                account_id,
                uid: uid.clone(),
                followup,
            }),
            deliver_inbox: outcome.deliver_inbox,
            uid,
        })
    }

    async fn notify(
        &self,
        sender: &str,
        account_id: u32,
        recipient: &str,
        uid: &str,
        message: &ICalendar,
    ) {
        let method = itip_method(message)
            .map(|method| method.as_str().to_string())
            .unwrap_or_default();

        if let Err(err) = self
            .backend
            .store_notification(
                account_id,
                Notification {
                    sender: sender.to_string(),
                    recipient: recipient.to_string(),
                    method,
                    uid: uid.to_string(),
                    message: message.clone(),
                },
            )
            .await
        {
            trc::event!(
                Calendar(trc::CalendarEvent::NotificationStoreFailed),
                AccountId = account_id,
                Uid = uid.to_string(),
                CausedBy = err,
            );
        }
    }
}

/// File name used when importing an invitation into a calendar.
pub fn resource_name(uid: &str) -> String {
    let mut name = uid
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '@') {
                ch
            } else {
                '_'
            }
        })
        .take(200)
        .collect::<String>();
    name.push_str(".ics");
    name
}
