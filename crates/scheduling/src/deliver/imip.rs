/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use calcard::icalendar::{ICalendar, ICalendarProperty};
use mail_builder::{
    MessageBuilder,
    headers::{HeaderType, content_type::ContentType},
    mime::{BodyPart, MimePart},
};

use crate::{
    Scheduler, SchedulingBackend,
    itip::{AttendeeAccumulator, SchedulingMethod, is_scheduling_component, is_vpoll},
    status::ScheduleStatus,
    store::MailEnvelope,
};

fn summary(ical: &ICalendar) -> Option<&str> {
    ical.components
        .iter()
        .filter(|comp| is_scheduling_component(comp))
        .flat_map(|comp| comp.entries.iter())
        .find(|entry| entry.name == ICalendarProperty::Summary)
        .and_then(|entry| entry.values.first())
        .and_then(|value| value.as_text())
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
}

pub fn imip_subject(method: &SchedulingMethod, summary: &str) -> String {
    let prefix = match method {
        SchedulingMethod::Request => "Invitation",
        SchedulingMethod::Reply => "Reply",
        SchedulingMethod::Cancel => "Cancelled",
        SchedulingMethod::Add => "Updated invitation",
        SchedulingMethod::Refresh => "Refresh request",
        SchedulingMethod::PollStatus => "Poll update",
        SchedulingMethod::Publish => "Event",
        SchedulingMethod::Counter => "Counter proposal",
        SchedulingMethod::DeclineCounter => "Counter proposal declined",
        SchedulingMethod::Other(method) => method.as_str(),
    };
    format!("{prefix}: {summary}")
}

fn imip_text_body(method: &SchedulingMethod, from: &str, summary: &str) -> String {
    match method {
        SchedulingMethod::Request | SchedulingMethod::Add => {
            format!("{from} has invited you to \"{summary}\".\r\n")
        }
        SchedulingMethod::Reply => format!("{from} has replied to \"{summary}\".\r\n"),
        SchedulingMethod::Cancel => format!("{from} has cancelled \"{summary}\".\r\n"),
        SchedulingMethod::Refresh => {
            format!("{from} has requested the latest version of \"{summary}\".\r\n")
        }
        SchedulingMethod::PollStatus => {
            format!("The votes for \"{summary}\" have been updated by {from}.\r\n")
        }
        SchedulingMethod::Publish
        | SchedulingMethod::Counter
        | SchedulingMethod::DeclineCounter
        | SchedulingMethod::Other(_) => {
            format!("{from} has sent a scheduling message about \"{summary}\".\r\n")
        }
    }
}

/// Wraps a scheduling message in an RFC 5322 message.
pub fn build_imip_message(
    from: &str,
    to: &str,
    accumulator: &AttendeeAccumulator,
) -> trc::Result<Vec<u8>> {
    let summary = summary(&accumulator.message).unwrap_or("Untitled");
    let method = accumulator.method.as_str();
    let is_poll = accumulator
        .message
        .components
        .iter()
        .any(is_vpoll);

    MessageBuilder::new()
        .from(from)
        .to(to)
        .header("Auto-Submitted", HeaderType::Text("auto-generated".into()))
        .header("Reply-To", HeaderType::Text(from.into()))
        .subject(imip_subject(&accumulator.method, summary))
        .body(MimePart::new(
            ContentType::new("multipart/mixed"),
            BodyPart::Multipart(vec![
                MimePart::new(
                    ContentType::new("text/plain").attribute("charset", "utf-8"),
                    BodyPart::Text(imip_text_body(&accumulator.method, from, summary).into()),
                ),
                MimePart::new(
                    ContentType::new("text/calendar")
                        .attribute("method", method)
                        .attribute("charset", "utf-8"),
                    BodyPart::Text(accumulator.message.to_string().into()),
                )
                .attachment(if is_poll { "poll.ics" } else { "event.ics" }),
            ]),
        ))
        .write_to_vec()
        .map_err(|err| {
            trc::NetworkEvent::MailTransportError
                .into_err()
                .reason(err)
                .caused_by(trc::location!())
        })
}

impl<T: SchedulingBackend> Scheduler<T> {
    pub(crate) async fn deliver_imip(
        &self,
        sender: &str,
        accumulator: &AttendeeAccumulator,
    ) -> ScheduleStatus {
        let result = match build_imip_message(sender, &accumulator.address, accumulator) {
            Ok(message) => {
                self.backend
                    .send_mail(
                        MailEnvelope {
                            from: sender.to_string(),
                            to: vec![accumulator.address.clone()],
                        },
                        message,
                    )
                    .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(_) => {
                trc::event!(
                    Calendar(trc::CalendarEvent::ItipMessageSent),
                    From = sender.to_string(),
                    To = accumulator.address.clone(),
                    Method = accumulator.method.as_str().to_string(),
                );
                ScheduleStatus::Sent
            }
            Err(err) => {
                trc::event!(
                    Calendar(trc::CalendarEvent::ItipMessageError),
                    From = sender.to_string(),
                    To = accumulator.address.clone(),
                    Reason = "Mail transport failure",
                    CausedBy = err,
                );
                ScheduleStatus::TempFail
            }
        }
    }
}
