/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use trc::AddContext;

use crate::{
    ScheduleError, ScheduleResult, Scheduler, SchedulingBackend,
    deliver::local::PendingFollowUp,
    itip::{
        AttendeeAccumulator,
        export::{StatusTarget, schedule_status_actions},
        inbound::FollowUp,
        merge::itip_merge_changes,
        normalize_address,
        organizer::organizer_request_for,
        poll::poll_status_messages,
        snapshot::itip_snapshot,
    },
    resolver::{ResolveError, Transport},
    status::ScheduleStatus,
    store::{IScheduleRequest, OverwritePolicy, StoreOutcome},
};

const MAX_FOLLOWUPS: usize = 64;

struct IScheduleBatch {
    url: String,
    body: Vec<u8>,
    accumulators: Vec<usize>,
    recipients: Vec<String>,
}

impl<T: SchedulingBackend> Scheduler<T> {
    /// Delivers every accumulator and records the outcome in its `status`.
    ///
    /// Accumulators bound for the same iSchedule server whose serialized
    /// messages are identical share a single request.
    pub(crate) async fn route(
        &self,
        sender: &str,
        accumulators: &mut [AttendeeAccumulator],
        followups: &mut Vec<PendingFollowUp>,
    ) {
        let mut batches: Vec<IScheduleBatch> = Vec::new();

        for (idx, accumulator) in accumulators.iter_mut().enumerate() {
            let param = match self.resolve_address(&accumulator.address).await {
                Ok(param) => param,
                Err(ResolveError::AddressNotFound) => {
                    accumulator.status = ScheduleStatus::NoUser;
                    continue;
                }
                Err(ResolveError::ResolutionError(_)) => {
                    accumulator.status = ScheduleStatus::TempFail;
                    continue;
                }
            };

            match param.transport {
                Transport::Local => {
                    let Some(account_id) = param.account_id else {
                        accumulator.status = ScheduleStatus::TempFail;
                        continue;
                    };
                    let (status, followup) = self
                        .deliver_local(sender, account_id, &param.address, &accumulator.message)
                        .await;
                    accumulator.status = status;
                    followups.extend(followup);
                }
                Transport::IMip => {
                    accumulator.status = self.deliver_imip(sender, accumulator).await;
                }
                Transport::ISchedule { url } => {
                    let body = self.backend.serialize(&accumulator.message);
                    if let Some(batch) = batches
                        .iter_mut()
                        .find(|batch| batch.url == url && batch.body == body)
                    {
                        batch.accumulators.push(idx);
                        batch.recipients.push(param.address);
                    } else {
                        batches.push(IScheduleBatch {
                            url,
                            body,
                            accumulators: vec![idx],
                            recipients: vec![param.address],
                        });
                    }
                }
            }
        }

        for batch in batches {
            let Some(first) = batch.accumulators.first().map(|idx| &accumulators[*idx]) else {
                continue;
            };
            let method = first.method.as_str().to_string();
            let component = first.component_name().to_string();

            let result = self
                .backend
                .send_ischedule(IScheduleRequest {
                    url: &batch.url,
                    originator: sender,
                    recipients: &batch.recipients,
                    method: &method,
                    component: &component,
                    body: &batch.body,
                })
                .await;

            match result {
                Ok(responses) => {
                    for (idx, recipient) in batch.accumulators.iter().zip(&batch.recipients) {
                        let status = responses
                            .iter()
                            .find(|response| {
                                normalize_address(&response.recipient).as_deref()
                                    == Some(recipient.as_str())
                            })
                            .map_or(ScheduleStatus::TempFail, |response| {
                                ScheduleStatus::from_request_status(&response.request_status)
                            });

                        if status.is_success() {
                            trc::event!(
                                Calendar(trc::CalendarEvent::ItipMessageSent),
                                From = sender.to_string(),
                                To = recipient.clone(),
                                Method = method.clone(),
                                Url = batch.url.clone(),
                            );
                        } else {
                            trc::event!(
                                Calendar(trc::CalendarEvent::ItipMessageError),
                                From = sender.to_string(),
                                To = recipient.clone(),
                                Url = batch.url.clone(),
                                Status = status.as_request_status(),
                            );
                        }
                        accumulators[*idx].status = status;
                    }
                }
                Err(err) => {
                    trc::error!(
                        err.ctx(trc::Key::From, sender.to_string())
                            .ctx(trc::Key::Total, batch.recipients.len())
                            .caused_by(trc::location!())
                    );
                    for idx in &batch.accumulators {
                        accumulators[*idx].status = ScheduleStatus::TempFail;
                    }
                }
            }
        }
    }

    /// Runs the organizer-side work queued by local deliveries.
    pub(crate) async fn dispatch_followups(&self, mut queue: Vec<PendingFollowUp>) {
        let mut processed = 0;

        while let Some(pending) = queue.pop() {
            if processed == MAX_FOLLOWUPS {
                trc::event!(
                    Calendar(trc::CalendarEvent::ItipMessageIgnored),
                    AccountId = pending.account_id,
                    Uid = pending.uid,
                    Limit = MAX_FOLLOWUPS,
                    Total = queue.len() + 1,
                );
                break;
            }
            processed += 1;

            let account_id = pending.account_id;
            match self.followup(pending, &mut queue).await {
                Ok(()) => {}
                Err(ScheduleError::Itip(err)) => {
                    trc::event!(
                        Calendar(trc::CalendarEvent::ItipMessageError),
                        AccountId = account_id,
                        Reason = err.to_string(),
                    );
                }
                Err(ScheduleError::Internal(err)) => {
                    trc::error!(err.account_id(account_id).caused_by(trc::location!()));
                }
            }
        }
    }

    async fn followup(
        &self,
        pending: PendingFollowUp,
        queue: &mut Vec<PendingFollowUp>,
    ) -> ScheduleResult<()> {
        let account_id = pending.account_id;
        let Some(handle) = self
            .backend
            .lookup_by_uid(account_id, &pending.uid)
            .await
            .caused_by(trc::location!())?
        else {
            return Ok(());
        };
        let Some(bytes) = self
            .backend
            .fetch(&handle)
            .await
            .caused_by(trc::location!())?
        else {
            return Ok(());
        };
        let ical = self.backend.parse(&bytes).caused_by(trc::location!())?;
        let addresses = self
            .backend
            .addresses(account_id)
            .await
            .caused_by(trc::location!())?;
        let organizer = itip_snapshot(&ical, &addresses)?.organizer.email.email;

        let (mut accumulators, instances) = match &pending.followup {
            FollowUp::PollStatus { exclude } => poll_status_messages(
                &ical,
                &addresses,
                Some(exclude.as_str()),
                &self.config.prod_id,
            )?,
            FollowUp::Refresh { attendee } => {
                let (accumulator, instances) =
                    organizer_request_for(&ical, &addresses, attendee, &self.config.prod_id)?;
                (vec![accumulator], instances)
            }
        };
        if accumulators.is_empty() {
            return Ok(());
        }

        self.route(&organizer, &mut accumulators, queue).await;

        if let FollowUp::PollStatus { .. } = &pending.followup {
            trc::event!(
                Calendar(trc::CalendarEvent::PollStatusSent),
                AccountId = account_id,
                Uid = pending.uid.clone(),
                Total = accumulators.len(),
            );
        }

        let actions = accumulators
            .iter()
            .flat_map(|accumulator| {
                schedule_status_actions(
                    &ical,
                    &instances,
                    &accumulator.comp_mask,
                    StatusTarget::Participant(&accumulator.address),
                    accumulator.status.as_schedule_status(),
                )
            })
            .collect::<Vec<_>>();
        if actions.is_empty() {
            return Ok(());
        }

        let mut updated = ical.clone();
        itip_merge_changes(&mut updated, actions);
        if let StoreOutcome::Conflict = self
            .backend
            .store(
                account_id,
                &handle.calendar,
                &handle.name,
                &updated,
                OverwritePolicy::IfVersion(handle.version),
            )
            .await
            .caused_by(trc::location!())?
        {
            return Err(trc::StoreEvent::AssertValueFailed
                .into_err()
                .details("Calendar resource was modified concurrently")
                .ctx(trc::Key::Uid, pending.uid)
                .into());
        }

        Ok(())
    }
}
