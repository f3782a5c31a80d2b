/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use common::config::scheduling::SchedulingConfig;
use quick_xml::{Reader, events::Event};
use reqwest::header::CONTENT_TYPE;
use utils::{
    HttpLimitResponse,
    config::{Config, http::build_http_client},
};

use crate::store::{IScheduleRequest, IScheduleResponse, IScheduleTransport};

pub const ISCHEDULE_VERSION: &str = "1.0";

/// iSchedule client posting messages to remote servers and cluster peers.
#[derive(Debug, Clone)]
pub struct HttpIScheduleTransport {
    client: reqwest::Client,
    max_response_size: usize,
}

impl HttpIScheduleTransport {
    pub fn parse(config: &mut Config, scheduling: &SchedulingConfig) -> Option<Self> {
        build_http_client(config, "calendar.scheduling.ischedule", Some("text/calendar")).map(
            |client| HttpIScheduleTransport {
                client,
                max_response_size: scheduling.ischedule_max_response_size,
            },
        )
    }

    pub fn new(client: reqwest::Client, max_response_size: usize) -> Self {
        HttpIScheduleTransport {
            client,
            max_response_size,
        }
    }
}

impl IScheduleTransport for HttpIScheduleTransport {
    async fn send_ischedule(
        &self,
        request: IScheduleRequest<'_>,
    ) -> trc::Result<Vec<IScheduleResponse>> {
        let recipients = request
            .recipients
            .iter()
            .map(|recipient| format!("mailto:{recipient}"))
            .collect::<Vec<_>>()
            .join(", ");

        let response = self
            .client
            .post(request.url)
            .header("Originator", format!("mailto:{}", request.originator))
            .header("Recipient", recipients)
            .header("iSchedule-Version", ISCHEDULE_VERSION)
            .header(
                CONTENT_TYPE,
                format!(
                    "text/calendar; method={}; component={}",
                    request.method, request.component
                ),
            )
            .body(request.body.to_vec())
            .send()
            .await
            .map_err(|err| {
                trc::NetworkEvent::HttpError
                    .into_err()
                    .reason(err)
                    .ctx(trc::Key::Url, request.url.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(trc::NetworkEvent::HttpStatus
                .into_err()
                .ctx(trc::Key::Url, request.url.to_string())
                .ctx(trc::Key::Code, status.as_u16()));
        }

        let body = response
            .bytes_with_limit(self.max_response_size)
            .await
            .map_err(|err| {
                trc::NetworkEvent::HttpError
                    .into_err()
                    .reason(err)
                    .ctx(trc::Key::Url, request.url.to_string())
            })?
            .ok_or_else(|| {
                trc::NetworkEvent::ResponseTooLarge
                    .into_err()
                    .ctx(trc::Key::Url, request.url.to_string())
                    .ctx(trc::Key::Limit, self.max_response_size)
            })?;

        parse_schedule_response(&body)
            .map_err(|err| err.ctx(trc::Key::Url, request.url.to_string()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Recipient,
    RequestStatus,
    CalendarData,
}

#[derive(Default)]
struct PartialResponse {
    recipient: String,
    request_status: String,
    calendar_data: String,
}

/// Parses an iSchedule or CalDAV `schedule-response` body.
///
/// Elements are matched by local name so both namespaces are accepted.
/// Responses without a recipient or a request status are skipped.
pub fn parse_schedule_response(xml: &[u8]) -> trc::Result<Vec<IScheduleResponse>> {
    let mut reader = Reader::from_reader(xml);

    let mut buf = Vec::new();
    let mut responses = Vec::new();
    let mut current: Option<PartialResponse> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    current = Some(PartialResponse::default());
                    field = Field::None;
                }
                b"recipient" if current.is_some() => field = Field::Recipient,
                b"request-status" if current.is_some() => field = Field::RequestStatus,
                b"calendar-data" if current.is_some() => field = Field::CalendarData,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(response) = current.take() {
                        let recipient = response.recipient.trim();
                        let request_status = response.request_status.trim();
                        if !recipient.is_empty() && !request_status.is_empty() {
                            responses.push(IScheduleResponse {
                                recipient: recipient.to_string(),
                                request_status: request_status.to_string(),
                                calendar_data: Some(response.calendar_data)
                                    .filter(|data| !data.trim().is_empty()),
                            });
                        }
                    }
                    field = Field::None;
                }
                b"recipient" | b"request-status" | b"calendar-data" => field = Field::None,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = std::str::from_utf8(e.as_ref()).map_err(parse_error)?;
                append(
                    &mut current,
                    field,
                    &quick_xml::escape::unescape(text).map_err(parse_error)?,
                );
            }
            Ok(Event::GeneralRef(e)) => {
                let entity = format!("&{};", std::str::from_utf8(e.as_ref()).map_err(parse_error)?);
                append(
                    &mut current,
                    field,
                    &quick_xml::escape::unescape(&entity).map_err(parse_error)?,
                );
            }
            Ok(Event::CData(e)) => {
                append(
                    &mut current,
                    field,
                    std::str::from_utf8(e.as_ref()).map_err(parse_error)?,
                );
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(parse_error(err)),
        }
        buf.clear();
    }

    Ok(responses)
}

fn append(current: &mut Option<PartialResponse>, field: Field, text: &str) {
    if let Some(current) = current {
        match field {
            Field::Recipient => current.recipient.push_str(text),
            Field::RequestStatus => current.request_status.push_str(text),
            Field::CalendarData => current.calendar_data.push_str(text),
            Field::None => {}
        }
    }
}

fn parse_error(err: impl std::fmt::Display) -> trc::Error {
    trc::NetworkEvent::ResponseParseError
        .into_err()
        .reason(err)
        .caused_by(trc::location!())
}
