/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use ahash::{AHashMap, AHashSet};
use calcard::{
    common::{IanaString, PartialDateTime},
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarDuration, ICalendarEntry,
        ICalendarMethod, ICalendarParameter, ICalendarParticipationRole,
        ICalendarParticipationStatus, ICalendarPeriod, ICalendarProperty, ICalendarRecurrenceRule,
        ICalendarScheduleForceSendValue, ICalendarStatus, ICalendarUserTypes, ICalendarValue, Uri,
    },
};
use roaring::RoaringBitmap;
use std::{cmp::Ordering, fmt::Display, hash::Hash};

use crate::status::ScheduleStatus;

pub mod attendee;
pub mod export;
pub mod inbound;
pub mod merge;
pub mod organizer;
pub mod poll;
pub mod snapshot;

#[derive(Debug)]
pub struct ItipSnapshots<'x> {
    pub organizer: Organizer<'x>,
    pub uid: &'x str,
    pub component_type: &'x ICalendarComponentType,
    pub kind: ParticipantKind,
    pub components: AHashMap<InstanceId, ItipSnapshot<'x>>,
}

#[derive(Debug)]
pub struct ItipSnapshot<'x> {
    pub comp_id: u16,
    pub comp: &'x ICalendarComponent,
    pub participants: AHashSet<Participant<'x>>,
    pub dtstamp: Option<&'x PartialDateTime>,
    pub entries: AHashSet<ItipEntry<'x>>,
    pub sequence: Option<i64>,
    pub request_status: Vec<&'x str>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ItipEntry<'x> {
    pub name: &'x ICalendarProperty,
    pub value: ItipEntryValue<'x>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum ItipEntryValue<'x> {
    DateTime(ItipDateTime<'x>),
    Period(&'x ICalendarPeriod),
    Duration(&'x ICalendarDuration),
    Status(&'x ICalendarStatus),
    RRule(&'x ICalendarRecurrenceRule),
    Text(&'x str),
    Integer(i64),
}

#[derive(Debug)]
pub struct ItipDateTime<'x> {
    pub date: &'x PartialDateTime,
    pub tz_id: Option<&'x str>,
    pub timestamp: i64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum InstanceId {
    Main,
    Recurrence(RecurrenceId),
}

#[derive(Debug, Clone)]
pub struct RecurrenceId {
    pub entry_id: u16,
    pub date: i64,
    pub this_and_future: bool,
}

/// Whether scheduling participants are ATTENDEEs or, for polls, VOTERs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKind {
    Attendee,
    Voter,
}

#[derive(Debug)]
pub struct Participant<'x> {
    pub entry_id: u16,
    pub email: Email,
    pub name: Option<&'x str>,
    pub part_stat: Option<&'x ICalendarParticipationStatus>,
    pub delegated_from: Vec<Email>,
    pub delegated_to: Vec<Email>,
    pub role: Option<&'x ICalendarParticipationRole>,
    pub cu_type: Option<&'x ICalendarUserTypes>,
    pub sent_by: Option<Email>,
    pub rsvp: Option<bool>,
    pub is_server_scheduling: bool,
    pub force_send: Option<&'x ICalendarScheduleForceSendValue>,
}

#[derive(Debug)]
pub struct Organizer<'x> {
    pub entry_id: u16,
    pub email: Email,
    pub name: Option<&'x str>,
    pub is_server_scheduling: bool,
    pub force_send: Option<&'x ICalendarScheduleForceSendValue>,
}

#[derive(Debug, Clone)]
pub struct Email {
    pub email: String,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchedulingMethod {
    Publish,
    Request,
    Reply,
    Add,
    Cancel,
    Refresh,
    Counter,
    DeclineCounter,
    PollStatus,
    Other(String),
}

/// Per-recipient outbound message under construction.
#[derive(Debug)]
pub struct AttendeeAccumulator {
    pub address: String,
    pub method: SchedulingMethod,
    pub message: ICalendar,
    /// Positions of the source object's instances carried by this message.
    pub comp_mask: RoaringBitmap,
    pub status: ScheduleStatus,
    master_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItipError {
    NoSchedulingInfo,
    OtherSchedulingAgent,
    NotOrganizer,
    NotOrganizerNorAttendee,
    MissingUid,
    MultipleUid,
    UidMismatch,
    MultipleOrganizer,
    MultipleObjectTypes,
    MultipleObjectInstances,
    CannotModifyProperty(ICalendarProperty),
    CannotModifyInstance,
    CannotModifyAddress,
    OrganizerMismatch,
    ComponentTypeMismatch,
    MissingMethod,
    UnsupportedMethod(String),
    SenderIsNotOrganizerNorAttendee,
    SenderIsNotParticipant(String),
    TooManyRecipients(usize),
    InvalidFreeBusyRequest(&'static str),
    ICalendarParseError,
    EventNotFound,
    NoDefaultCalendar,
    PermissionDenied,
}

impl Participant<'_> {
    /// Participants the organizer's server sends messages to.
    pub fn is_schedulable(&self) -> bool {
        !self.email.is_local && self.is_server_scheduling
    }

    pub fn is_delegated_from(&self, participant: &Participant<'_>) -> bool {
        self.delegated_from
            .iter()
            .any(|d| d.email == participant.email.email)
    }

    pub fn is_delegated_to(&self, participant: &Participant<'_>) -> bool {
        self.delegated_to
            .iter()
            .any(|d| d.email == participant.email.email)
    }
}

impl ParticipantKind {
    pub fn of(component: &ICalendarComponent) -> Self {
        if is_vpoll(component) {
            ParticipantKind::Voter
        } else {
            ParticipantKind::Attendee
        }
    }

    pub fn is_participant(&self, property: &ICalendarProperty) -> bool {
        match self {
            ParticipantKind::Attendee => property == &ICalendarProperty::Attendee,
            ParticipantKind::Voter => is_property(property, "VOTER"),
        }
    }
}

impl Email {
    pub fn new(email: &str, local_addresses: &[String]) -> Option<Self> {
        normalize_address(email).map(|email| {
            let is_local = local_addresses.contains(&email);
            Email { email, is_local }
        })
    }

    pub fn from_uri(uri: &Uri, local_addresses: &[String]) -> Option<Self> {
        if let Uri::Location(uri) = uri {
            Email::new(uri.as_str(), local_addresses)
        } else {
            None
        }
    }
}

/// Trims, strips a `mailto:` scheme and lowercases a calendar user address.
pub fn normalize_address(address: &str) -> Option<String> {
    let address = address.trim();
    let address = address
        .get(..7)
        .filter(|scheme| scheme.eq_ignore_ascii_case("mailto:"))
        .map_or(address, |_| &address[7..])
        .trim();

    (address.contains('@') && !address.starts_with('@') && !address.ends_with('@'))
        .then(|| address.to_lowercase())
}

pub fn is_vpoll(component: &ICalendarComponent) -> bool {
    component.component_type.as_str().eq_ignore_ascii_case("VPOLL")
}

pub fn is_property(property: &ICalendarProperty, name: &str) -> bool {
    property.as_str().eq_ignore_ascii_case(name)
}

pub fn is_scheduling_component(component: &ICalendarComponent) -> bool {
    (component.component_type.is_scheduling_object()
        && component.component_type != ICalendarComponentType::VFreebusy)
        || is_vpoll(component)
}

impl SchedulingMethod {
    pub fn parse(value: &str) -> Self {
        hashify::tiny_map_ignore_case!(value.trim().as_bytes(),
            "PUBLISH" => SchedulingMethod::Publish,
            "REQUEST" => SchedulingMethod::Request,
            "REPLY" => SchedulingMethod::Reply,
            "ADD" => SchedulingMethod::Add,
            "CANCEL" => SchedulingMethod::Cancel,
            "REFRESH" => SchedulingMethod::Refresh,
            "COUNTER" => SchedulingMethod::Counter,
            "DECLINECOUNTER" => SchedulingMethod::DeclineCounter,
            "POLLSTATUS" => SchedulingMethod::PollStatus,
        )
        .unwrap_or_else(|| SchedulingMethod::Other(value.trim().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            SchedulingMethod::Publish => "PUBLISH",
            SchedulingMethod::Request => "REQUEST",
            SchedulingMethod::Reply => "REPLY",
            SchedulingMethod::Add => "ADD",
            SchedulingMethod::Cancel => "CANCEL",
            SchedulingMethod::Refresh => "REFRESH",
            SchedulingMethod::Counter => "COUNTER",
            SchedulingMethod::DeclineCounter => "DECLINECOUNTER",
            SchedulingMethod::PollStatus => "POLLSTATUS",
            SchedulingMethod::Other(method) => method.as_str(),
        }
    }

    /// Methods sent by the organizer.
    pub fn is_request_class(&self) -> bool {
        matches!(
            self,
            SchedulingMethod::Request
                | SchedulingMethod::Cancel
                | SchedulingMethod::Add
                | SchedulingMethod::PollStatus
        )
    }

    /// Methods sent by an attendee.
    pub fn is_reply_class(&self) -> bool {
        matches!(self, SchedulingMethod::Reply | SchedulingMethod::Refresh)
    }

    pub fn to_value(&self) -> ICalendarValue {
        match self {
            SchedulingMethod::Publish => ICalendarValue::Method(ICalendarMethod::Publish),
            SchedulingMethod::Request => ICalendarValue::Method(ICalendarMethod::Request),
            SchedulingMethod::Reply => ICalendarValue::Method(ICalendarMethod::Reply),
            SchedulingMethod::Add => ICalendarValue::Method(ICalendarMethod::Add),
            SchedulingMethod::Cancel => ICalendarValue::Method(ICalendarMethod::Cancel),
            SchedulingMethod::Refresh => ICalendarValue::Method(ICalendarMethod::Refresh),
            SchedulingMethod::Counter => ICalendarValue::Method(ICalendarMethod::Counter),
            SchedulingMethod::DeclineCounter => {
                ICalendarValue::Method(ICalendarMethod::Declinecounter)
            }
            SchedulingMethod::PollStatus | SchedulingMethod::Other(_) => {
                ICalendarValue::Text(self.as_str().to_string())
            }
        }
    }
}

impl AttendeeAccumulator {
    pub fn new(address: impl Into<String>, method: SchedulingMethod, prod_id: &str) -> Self {
        let message = ICalendar {
            components: vec![export::itip_build_envelope(&method, prod_id)],
        };
        AttendeeAccumulator {
            address: address.into(),
            method,
            message,
            comp_mask: RoaringBitmap::new(),
            status: ScheduleStatus::Pending,
            master_index: None,
        }
    }

    /// Appends a component linked from the envelope, with its own sub-components.
    pub fn add_component(
        &mut self,
        instance: u32,
        is_master: bool,
        mut component: ICalendarComponent,
        children: Vec<ICalendarComponent>,
    ) {
        let comp_id = self.message.components.len();
        component.component_ids.clear();
        self.message.components[0].component_ids.push(comp_id as u32);
        self.message.components.push(component);
        for child in children {
            let child_id = self.message.components.len() as u32;
            self.message.components[comp_id].component_ids.push(child_id);
            self.message.components.push(child);
        }
        self.comp_mask.insert(instance);
        if is_master {
            self.master_index = Some(comp_id);
        }
    }

    pub fn master_component_mut(&mut self) -> Option<&mut ICalendarComponent> {
        self.master_index
            .and_then(|idx| self.message.components.get_mut(idx))
    }

    pub fn has_components(&self) -> bool {
        self.message
            .components
            .first()
            .is_some_and(|root| !root.component_ids.is_empty())
    }

    /// Name of the scheduling component type carried by the message.
    pub fn component_name(&self) -> &str {
        self.message
            .components
            .iter()
            .find(|comp| is_scheduling_component(comp))
            .map(|comp| comp.component_type.as_str())
            .unwrap_or("VEVENT")
    }

    /// Replaces the message with a fresh envelope for a different method.
    pub fn reset(&mut self, method: SchedulingMethod, prod_id: &str) {
        self.message = ICalendar {
            components: vec![export::itip_build_envelope(&method, prod_id)],
        };
        self.method = method;
        self.comp_mask.clear();
        self.master_index = None;
    }
}

impl ItipError {
    /// Errors caused by the submitted data rather than by the server.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ItipError::MultipleOrganizer
                | ItipError::NotOrganizer
                | ItipError::OtherSchedulingAgent
                | ItipError::SenderIsNotParticipant(_)
                | ItipError::SenderIsNotOrganizerNorAttendee
                | ItipError::OrganizerMismatch
                | ItipError::ComponentTypeMismatch
                | ItipError::CannotModifyProperty(_)
                | ItipError::CannotModifyInstance
                | ItipError::CannotModifyAddress
                | ItipError::MissingUid
                | ItipError::MultipleUid
                | ItipError::UidMismatch
                | ItipError::MultipleObjectTypes
                | ItipError::MultipleObjectInstances
                | ItipError::MissingMethod
                | ItipError::UnsupportedMethod(_)
                | ItipError::TooManyRecipients(_)
                | ItipError::InvalidFreeBusyRequest(_)
                | ItipError::ICalendarParseError
        )
    }
}

impl PartialEq for Participant<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.email == other.email
            && self.part_stat == other.part_stat
            && self.delegated_from == other.delegated_from
            && self.delegated_to == other.delegated_to
            && self.role == other.role
            && self.cu_type == other.cu_type
            && self.sent_by == other.sent_by
    }
}

impl Eq for Participant<'_> {}

impl Hash for Participant<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.email.hash(state);
        self.part_stat.hash(state);
        self.delegated_from.hash(state);
        self.delegated_to.hash(state);
        self.role.hash(state);
        self.cu_type.hash(state);
        self.sent_by.hash(state);
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mailto:{}", self.email)
    }
}

impl Hash for Email {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.email.hash(state);
    }
}

impl PartialEq for Email {
    fn eq(&self, other: &Self) -> bool {
        self.email == other.email
    }
}

impl Eq for Email {}

impl PartialEq for RecurrenceId {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.this_and_future == other.this_and_future
    }
}

impl Eq for RecurrenceId {}

impl PartialOrd for RecurrenceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecurrenceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then(self.this_and_future.cmp(&other.this_and_future))
    }
}

impl Hash for RecurrenceId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.date.hash(state);
        self.this_and_future.hash(state);
    }
}

impl PartialEq for ItipDateTime<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for ItipDateTime<'_> {}

impl Hash for ItipDateTime<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.timestamp.hash(state);
    }
}

impl ItipDateTime<'_> {
    pub fn to_entry(&self, name: ICalendarProperty) -> ICalendarEntry {
        ICalendarEntry {
            name,
            params: self
                .tz_id
                .map(|tz_id| vec![ICalendarParameter::tzid(tz_id.to_string())])
                .unwrap_or_default(),
            values: vec![ICalendarValue::PartialDateTime(Box::new(self.date.clone()))],
        }
    }
}

impl ItipEntry<'_> {
    /// Changes to these properties invalidate prior participant replies.
    pub fn is_significant(&self) -> bool {
        matches!(
            self.name,
            ICalendarProperty::Dtstart
                | ICalendarProperty::Dtend
                | ICalendarProperty::Duration
                | ICalendarProperty::Due
                | ICalendarProperty::Rrule
                | ICalendarProperty::Rdate
                | ICalendarProperty::Exdate
        )
    }
}

impl Display for ItipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItipError::NoSchedulingInfo => write!(f, "No scheduling information found"),
            ItipError::OtherSchedulingAgent => write!(f, "Other scheduling agent"),
            ItipError::NotOrganizer => write!(f, "Not the organizer of the event"),
            ItipError::NotOrganizerNorAttendee => write!(f, "Not an organizer or attendee"),
            ItipError::MissingUid => write!(f, "Missing UID in iCalendar object"),
            ItipError::MultipleUid => write!(f, "Multiple UIDs found in iCalendar object"),
            ItipError::UidMismatch => write!(f, "UID cannot be changed"),
            ItipError::MultipleOrganizer => {
                write!(f, "Multiple organizers found in iCalendar object")
            }
            ItipError::MultipleObjectTypes => {
                write!(f, "Multiple object types found in iCalendar object")
            }
            ItipError::MultipleObjectInstances => {
                write!(f, "Multiple object instances found in iCalendar object")
            }
            ItipError::CannotModifyProperty(prop) => {
                write!(f, "Cannot modify property {}", prop.as_str())
            }
            ItipError::CannotModifyInstance => write!(f, "Cannot modify instance of the event"),
            ItipError::CannotModifyAddress => write!(f, "Cannot modify address of the event"),
            ItipError::OrganizerMismatch => write!(f, "Organizer mismatch in iCalendar object"),
            ItipError::ComponentTypeMismatch => {
                write!(f, "Component type does not match the stored object")
            }
            ItipError::MissingMethod => write!(f, "Missing method in the iTIP message"),
            ItipError::UnsupportedMethod(method) => write!(f, "Unsupported method: {method}"),
            ItipError::SenderIsNotOrganizerNorAttendee => {
                write!(f, "Sender is neither organizer nor attendee")
            }
            ItipError::SenderIsNotParticipant(participant) => {
                write!(f, "Sender {participant:?} is not a participant")
            }
            ItipError::TooManyRecipients(count) => {
                write!(f, "Too many recipients ({count})")
            }
            ItipError::InvalidFreeBusyRequest(reason) => {
                write!(f, "Invalid free/busy request: {reason}")
            }
            ItipError::ICalendarParseError => write!(f, "Failed to parse iCalendar object"),
            ItipError::EventNotFound => write!(f, "No matching scheduling object found"),
            ItipError::NoDefaultCalendar => write!(f, "No default calendar found for the account"),
            ItipError::PermissionDenied => write!(f, "Scheduling privilege missing"),
        }
    }
}
