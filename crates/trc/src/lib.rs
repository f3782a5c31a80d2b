/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod event;
pub mod macros;
pub mod serializers;

use compact_str::CompactString;

pub type Result<T> = std::result::Result<T, Error>;
pub type Error = Event<EventType>;

#[derive(Debug, Clone)]
pub struct Event<T> {
    pub inner: T,
    pub keys: Vec<(Key, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Calendar(CalendarEvent),
    Store(StoreEvent),
    Config(ConfigEvent),
    Network(NetworkEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarEvent {
    ItipMessageSent,
    ItipMessageReceived,
    ItipMessageError,
    ItipMessageIgnored,
    ItipStaleUpdate,
    AddressNotFound,
    AddressResolutionError,
    NotificationStoreFailed,
    SchedulingRefused,
    PollStatusSent,
    FreeBusyQuery,
    RecurrenceExpansionError,
    RecurrenceExpansionLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEvent {
    NotFound,
    UnexpectedError,
    DataCorruption,
    AssertValueFailed,
    CalendarParseError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigEvent {
    ParseError,
    BuildError,
    ParseWarning,
    MissingSetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkEvent {
    HttpError,
    HttpStatus,
    ResponseTooLarge,
    ResponseParseError,
    MailTransportError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    AccountId,
    CausedBy,
    Code,
    Collection,
    Details,
    DocumentName,
    From,
    Id,
    Key,
    Limit,
    Method,
    Reason,
    Status,
    To,
    Total,
    Uid,
    Url,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    Static(&'static str),
    String(CompactString),
    UInt(u64),
    Int(i64),
    Bool(bool),
    Event(Box<Error>),
    Array(Vec<Value>),
    #[default]
    None,
}

pub trait AddContext<T> {
    fn caused_by(self, location: &'static str) -> Result<T>;

    fn add_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce(Error) -> Error;
}
