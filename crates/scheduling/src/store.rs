/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::future::Future;

use calcard::icalendar::{ICalendar, ICalendarComponentType};

use crate::freebusy::TimeRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub account_id: u32,
    pub calendar: String,
    pub name: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    CreateOnly,
    IfVersion(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Created(ResourceHandle),
    Updated(ResourceHandle),
    Conflict,
}

/// Index entry returned by time range scans.
#[derive(Debug, Clone)]
pub struct ResourceMeta {
    pub handle: ResourceHandle,
    pub component_type: ICalendarComponentType,
    pub start: i64,
    pub end: i64,
    pub is_recurring: bool,
    pub is_cancelled: bool,
    pub is_transparent: bool,
    pub is_tentative: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarHome {
    pub account_id: u32,
    pub node_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub sender: String,
    pub recipient: String,
    pub method: String,
    pub uid: String,
    pub message: ICalendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    InviteOutbound,
    ReplyOutbound,
    InviteInbound,
    ReplyInbound,
    FreeBusy,
}

#[derive(Debug, Clone)]
pub struct MailEnvelope {
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IScheduleRequest<'x> {
    pub url: &'x str,
    pub originator: &'x str,
    pub recipients: &'x [String],
    pub method: &'x str,
    pub component: &'x str,
    pub body: &'x [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IScheduleResponse {
    pub recipient: String,
    pub request_status: String,
    pub calendar_data: Option<String>,
}

pub trait CalendarStore: Sync + Send {
    fn parse(&self, bytes: &[u8]) -> trc::Result<ICalendar> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| ICalendar::parse(text).ok())
            .filter(|ical| {
                ical.components
                    .first()
                    .is_some_and(|root| root.component_type == ICalendarComponentType::VCalendar)
            })
            .ok_or_else(|| {
                trc::StoreEvent::CalendarParseError
                    .into_err()
                    .details("Invalid iCalendar data")
            })
    }

    fn serialize(&self, ical: &ICalendar) -> Vec<u8> {
        ical.to_string().into_bytes()
    }

    fn lookup_by_uid(
        &self,
        account_id: u32,
        uid: &str,
    ) -> impl Future<Output = trc::Result<Option<ResourceHandle>>> + Send;

    fn fetch(
        &self,
        handle: &ResourceHandle,
    ) -> impl Future<Output = trc::Result<Option<Vec<u8>>>> + Send;

    fn store(
        &self,
        account_id: u32,
        calendar: &str,
        name: &str,
        ical: &ICalendar,
        policy: OverwritePolicy,
    ) -> impl Future<Output = trc::Result<StoreOutcome>> + Send;

    fn store_notification(
        &self,
        account_id: u32,
        notification: Notification,
    ) -> impl Future<Output = trc::Result<()>> + Send;

    fn default_calendar(
        &self,
        account_id: u32,
    ) -> impl Future<Output = trc::Result<Option<String>>> + Send;

    /// Lists the calendars of an account, optionally restricted to names starting with `prefix`.
    fn list_calendars(
        &self,
        account_id: u32,
        prefix: Option<&str>,
    ) -> impl Future<Output = trc::Result<Vec<String>>> + Send;

    fn scan_time_range(
        &self,
        account_id: u32,
        calendar: &str,
        range: TimeRange,
    ) -> impl Future<Output = trc::Result<Vec<ResourceMeta>>> + Send;

    /// Returns the account-level VAVAILABILITY object, if any.
    fn availability(
        &self,
        account_id: u32,
    ) -> impl Future<Output = trc::Result<Option<Vec<u8>>>> + Send;
}

pub trait Directory: Sync + Send {
    fn calendar_home(
        &self,
        address: &str,
    ) -> impl Future<Output = trc::Result<Option<CalendarHome>>> + Send;

    fn addresses(&self, account_id: u32) -> impl Future<Output = trc::Result<Vec<String>>> + Send;
}

pub trait AccessControl: Sync + Send {
    fn has_capability(
        &self,
        account_id: u32,
        capability: Capability,
    ) -> impl Future<Output = trc::Result<bool>> + Send;
}

pub trait MailTransport: Sync + Send {
    fn send_mail(
        &self,
        envelope: MailEnvelope,
        message: Vec<u8>,
    ) -> impl Future<Output = trc::Result<()>> + Send;
}

pub trait IScheduleTransport: Sync + Send {
    fn send_ischedule(
        &self,
        request: IScheduleRequest<'_>,
    ) -> impl Future<Output = trc::Result<Vec<IScheduleResponse>>> + Send;
}
