/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::fmt::Display;

use compact_str::{CompactString, ToCompactString};

use crate::{
    AddContext, CalendarEvent, ConfigEvent, Error, Event, EventType, Key, Level, NetworkEvent,
    Result, StoreEvent, Value,
};

impl<T> Event<T> {
    pub fn new(inner: T) -> Self {
        Event {
            inner,
            keys: Vec::with_capacity(5),
        }
    }

    pub fn with_capacity(inner: T, capacity: usize) -> Self {
        Event {
            inner,
            keys: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub fn ctx(mut self, key: Key, value: impl Into<Value>) -> Self {
        self.keys.push((key, value.into()));
        self
    }

    #[inline(always)]
    pub fn ctx_opt(self, key: Key, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.ctx(key, value),
            None => self,
        }
    }

    #[inline(always)]
    pub fn ctx_unique(self, key: Key, value: impl Into<Value>) -> Self {
        if self.keys.iter().all(|(k, _)| *k != key) {
            self.ctx(key, value)
        } else {
            self
        }
    }

    pub fn value(&self, key: Key) -> Option<&Value> {
        self.keys
            .iter()
            .find_map(|(k, v)| if *k == key { Some(v) } else { None })
    }

    pub fn value_as_str(&self, key: Key) -> Option<&str> {
        self.value(key).and_then(|v| v.as_str())
    }

    pub fn take_value(&mut self, key: Key) -> Option<Value> {
        self.keys
            .iter_mut()
            .find_map(|(k, v)| if *k == key { Some(std::mem::take(v)) } else { None })
    }
}

impl Event<EventType> {
    #[inline(always)]
    pub fn details(self, error: impl Into<Value>) -> Self {
        self.ctx(Key::Details, error)
    }

    #[inline(always)]
    pub fn reason(self, error: impl Display) -> Self {
        self.ctx(Key::Reason, error.to_compact_string())
    }

    #[inline(always)]
    pub fn caused_by(self, error: impl Into<Value>) -> Self {
        self.ctx(Key::CausedBy, error)
    }

    #[inline(always)]
    pub fn account_id(self, id: impl Into<Value>) -> Self {
        self.ctx(Key::AccountId, id)
    }

    #[inline(always)]
    pub fn id(self, id: impl Into<Value>) -> Self {
        self.ctx(Key::Id, id)
    }

    #[inline(always)]
    pub fn code(self, code: impl Into<Value>) -> Self {
        self.ctx(Key::Code, code)
    }

    #[inline(always)]
    pub fn matches(&self, inner: EventType) -> bool {
        self.inner == inner
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self.inner, EventType::Store(_))
    }

    pub fn send(self) {
        let level = self.inner.level();
        let name = self.inner.name();
        let fields = crate::serializers::json::keys_to_json(&self.keys);

        match level {
            Level::Error => tracing::error!(event = name, %fields, "{}", self.inner.description()),
            Level::Warn => tracing::warn!(event = name, %fields, "{}", self.inner.description()),
            Level::Info => tracing::info!(event = name, %fields, "{}", self.inner.description()),
            Level::Debug => tracing::debug!(event = name, %fields, "{}", self.inner.description()),
            Level::Trace => tracing::trace!(event = name, %fields, "{}", self.inner.description()),
        }
    }
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::Calendar(event) => event.name(),
            EventType::Store(event) => event.name(),
            EventType::Config(event) => event.name(),
            EventType::Network(event) => event.name(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EventType::Calendar(event) => event.description(),
            EventType::Store(event) => event.description(),
            EventType::Config(event) => event.description(),
            EventType::Network(event) => event.description(),
        }
    }

    pub fn level(&self) -> Level {
        match self {
            EventType::Calendar(event) => match event {
                CalendarEvent::ItipMessageSent
                | CalendarEvent::ItipMessageReceived
                | CalendarEvent::PollStatusSent => Level::Info,
                CalendarEvent::ItipMessageError
                | CalendarEvent::NotificationStoreFailed
                | CalendarEvent::SchedulingRefused => Level::Warn,
                CalendarEvent::ItipMessageIgnored
                | CalendarEvent::ItipStaleUpdate
                | CalendarEvent::AddressNotFound
                | CalendarEvent::AddressResolutionError
                | CalendarEvent::FreeBusyQuery
                | CalendarEvent::RecurrenceExpansionError
                | CalendarEvent::RecurrenceExpansionLimit => Level::Debug,
            },
            EventType::Store(event) => match event {
                StoreEvent::NotFound | StoreEvent::AssertValueFailed => Level::Debug,
                StoreEvent::UnexpectedError
                | StoreEvent::DataCorruption
                | StoreEvent::CalendarParseError => Level::Error,
            },
            EventType::Config(event) => match event {
                ConfigEvent::ParseError | ConfigEvent::BuildError => Level::Error,
                ConfigEvent::ParseWarning | ConfigEvent::MissingSetting => Level::Warn,
            },
            EventType::Network(event) => match event {
                NetworkEvent::ResponseParseError | NetworkEvent::ResponseTooLarge => Level::Warn,
                NetworkEvent::HttpError
                | NetworkEvent::HttpStatus
                | NetworkEvent::MailTransportError => Level::Debug,
            },
        }
    }

    #[inline(always)]
    pub fn into_err(self) -> Error {
        Error::new(self)
    }

    #[inline(always)]
    pub fn ctx(self, key: Key, value: impl Into<Value>) -> Error {
        Error::new(self).ctx(key, value)
    }
}

impl CalendarEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CalendarEvent::ItipMessageSent => "calendar.itip-message-sent",
            CalendarEvent::ItipMessageReceived => "calendar.itip-message-received",
            CalendarEvent::ItipMessageError => "calendar.itip-message-error",
            CalendarEvent::ItipMessageIgnored => "calendar.itip-message-ignored",
            CalendarEvent::ItipStaleUpdate => "calendar.itip-stale-update",
            CalendarEvent::AddressNotFound => "calendar.address-not-found",
            CalendarEvent::AddressResolutionError => "calendar.address-resolution-error",
            CalendarEvent::NotificationStoreFailed => "calendar.notification-store-failed",
            CalendarEvent::SchedulingRefused => "calendar.scheduling-refused",
            CalendarEvent::PollStatusSent => "calendar.poll-status-sent",
            CalendarEvent::FreeBusyQuery => "calendar.free-busy-query",
            CalendarEvent::RecurrenceExpansionError => "calendar.recurrence-expansion-error",
            CalendarEvent::RecurrenceExpansionLimit => "calendar.recurrence-expansion-limit",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CalendarEvent::ItipMessageSent => "iTIP message sent",
            CalendarEvent::ItipMessageReceived => "iTIP message received",
            CalendarEvent::ItipMessageError => "iTIP message delivery failed",
            CalendarEvent::ItipMessageIgnored => "iTIP message ignored",
            CalendarEvent::ItipStaleUpdate => "Out of sequence iTIP update skipped",
            CalendarEvent::AddressNotFound => "Calendar user address not found",
            CalendarEvent::AddressResolutionError => "Failed to resolve calendar user address",
            CalendarEvent::NotificationStoreFailed => "Failed to store scheduling notification",
            CalendarEvent::SchedulingRefused => "Scheduling action refused",
            CalendarEvent::PollStatusSent => "Poll status sent to voters",
            CalendarEvent::FreeBusyQuery => "Free/busy query",
            CalendarEvent::RecurrenceExpansionError => "Failed to expand recurrence rule",
            CalendarEvent::RecurrenceExpansionLimit => "Recurrence expansion limit reached",
        }
    }

    #[inline(always)]
    pub fn into_err(self) -> Error {
        EventType::Calendar(self).into_err()
    }
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::NotFound => "store.not-found",
            StoreEvent::UnexpectedError => "store.unexpected-error",
            StoreEvent::DataCorruption => "store.data-corruption",
            StoreEvent::AssertValueFailed => "store.assert-value-failed",
            StoreEvent::CalendarParseError => "store.calendar-parse-error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StoreEvent::NotFound => "Record not found",
            StoreEvent::UnexpectedError => "Unexpected store error",
            StoreEvent::DataCorruption => "Data corruption detected",
            StoreEvent::AssertValueFailed => "Another process modified the record",
            StoreEvent::CalendarParseError => "Failed to parse calendar data",
        }
    }

    #[inline(always)]
    pub fn into_err(self) -> Error {
        EventType::Store(self).into_err()
    }
}

impl ConfigEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigEvent::ParseError => "config.parse-error",
            ConfigEvent::BuildError => "config.build-error",
            ConfigEvent::ParseWarning => "config.parse-warning",
            ConfigEvent::MissingSetting => "config.missing-setting",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConfigEvent::ParseError => "Configuration parse error",
            ConfigEvent::BuildError => "Configuration build error",
            ConfigEvent::ParseWarning => "Configuration parse warning",
            ConfigEvent::MissingSetting => "Missing configuration setting",
        }
    }

    #[inline(always)]
    pub fn into_err(self) -> Error {
        EventType::Config(self).into_err()
    }
}

impl NetworkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkEvent::HttpError => "network.http-error",
            NetworkEvent::HttpStatus => "network.http-status",
            NetworkEvent::ResponseTooLarge => "network.response-too-large",
            NetworkEvent::ResponseParseError => "network.response-parse-error",
            NetworkEvent::MailTransportError => "network.mail-transport-error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            NetworkEvent::HttpError => "HTTP request failed",
            NetworkEvent::HttpStatus => "Unexpected HTTP status",
            NetworkEvent::ResponseTooLarge => "Response exceeds size limit",
            NetworkEvent::ResponseParseError => "Failed to parse response",
            NetworkEvent::MailTransportError => "Mail transport failed",
        }
    }

    #[inline(always)]
    pub fn into_err(self) -> Error {
        EventType::Network(self).into_err()
    }
}

impl Key {
    pub fn name(&self) -> &'static str {
        match self {
            Key::AccountId => "accountId",
            Key::CausedBy => "causedBy",
            Key::Code => "code",
            Key::Collection => "collection",
            Key::Details => "details",
            Key::DocumentName => "documentName",
            Key::From => "from",
            Key::Id => "id",
            Key::Key => "key",
            Key::Limit => "limit",
            Key::Method => "method",
            Key::Reason => "reason",
            Key::Status => "status",
            Key::To => "to",
            Key::Total => "total",
            Key::Uid => "uid",
            Key::Url => "url",
        }
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Static(value) => Some(value),
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn to_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(value) => Some(*value),
            Value::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }
}

impl From<&'static str> for Value {
    fn from(value: &'static str) -> Self {
        Value::Static(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(CompactString::from(value))
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(CompactString::from(value.as_str()))
    }
}

impl From<CompactString> for Value {
    fn from(value: CompactString) -> Self {
        Value::String(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Error> for Value {
    fn from(value: Error) -> Self {
        Value::Event(Box::new(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

impl<T> AddContext<T> for Result<T> {
    #[inline(always)]
    fn caused_by(self, location: &'static str) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.ctx(Key::CausedBy, location)),
        }
    }

    #[inline(always)]
    fn add_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce(Error) -> Error,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(f(err)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.description())?;
        for (key, value) in &self.keys {
            match value {
                Value::None => {}
                value => write!(f, ", {}: {}", key.name(), value)?,
            }
        }
        Ok(())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Static(value) => value.fmt(f),
            Value::String(value) => value.fmt(f),
            Value::UInt(value) => value.fmt(f),
            Value::Int(value) => value.fmt(f),
            Value::Bool(value) => value.fmt(f),
            Value::Event(event) => write!(f, "({event})"),
            Value::Array(values) => {
                f.write_str("[")?;
                for (pos, value) in values.iter().enumerate() {
                    if pos > 0 {
                        f.write_str(", ")?;
                    }
                    value.fmt(f)?;
                }
                f.write_str("]")
            }
            Value::None => f.write_str("(null)"),
        }
    }
}

impl std::error::Error for Error {}
