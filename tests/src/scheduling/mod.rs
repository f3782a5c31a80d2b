/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::sync::{Mutex, MutexGuard};

use ahash::{AHashMap, AHashSet};
use calcard::icalendar::{
    ICalendar, ICalendarComponentType, ICalendarParameter, ICalendarParameterName,
    ICalendarParticipationStatus, ICalendarProperty,
};
use common::config::scheduling::SchedulingConfig;
use scheduling::{
    Scheduler,
    freebusy::TimeRange,
    itip::normalize_address,
    outbound::ScheduleOutcome,
    store::{
        AccessControl, CalendarHome, CalendarStore, Capability, Directory, IScheduleRequest,
        IScheduleResponse, IScheduleTransport, MailEnvelope, MailTransport, Notification,
        OverwritePolicy, ResourceHandle, ResourceMeta, StoreOutcome,
    },
};
use utils::config::Config;

pub mod freebusy;
pub mod inbound;
pub mod organizer;
pub mod routing;

pub const ALICE: u32 = 1;
pub const BOB: u32 = 2;
pub const CAROL: u32 = 3;
pub const FRANK: u32 = 4;

pub const CONFIG: &str = r#"
[calendar.scheduling]
prod-id = "-//Stalwart Labs LLC//Scheduling Tests//EN"
node-id = "node-a"
local-domains = ["example.com"]

[calendar.scheduling.ischedule.cluster]
node-b = "https://node-b.example.com/ischedule"

[calendar.scheduling.ischedule.peer]
"partner.example.net" = "https://partner.example.net/ischedule"
"#;

#[derive(Debug, Clone)]
pub struct StoredResource {
    pub calendar: String,
    pub name: String,
    pub uid: String,
    pub version: u64,
    pub component_type: ICalendarComponentType,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SentISchedule {
    pub url: String,
    pub originator: String,
    pub recipients: Vec<String>,
    pub method: String,
    pub component: String,
    pub body: String,
}

#[derive(Default)]
pub struct State {
    pub homes: AHashMap<String, CalendarHome>,
    pub addresses: AHashMap<u32, Vec<String>>,
    pub denied: AHashSet<(u32, Capability)>,
    pub resources: AHashMap<u32, Vec<StoredResource>>,
    pub default_calendars: AHashMap<u32, String>,
    pub availability: AHashMap<u32, Vec<u8>>,
    pub notifications: Vec<(u32, Notification)>,
    pub mail: Vec<(MailEnvelope, Vec<u8>)>,
    pub ischedule: Vec<SentISchedule>,
    pub ischedule_status: AHashMap<String, String>,
    pub ischedule_missing: AHashSet<String>,
    pub fail_ischedule: bool,
    pub fail_mail: bool,
    pub next_version: u64,
}

/// In-memory server used to drive the scheduling engine end to end.
pub struct TestBackend {
    state: Mutex<State>,
}

pub struct TestEnv {
    pub scheduler: Scheduler<TestBackend>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut SchedulingConfig)) -> Self {
        let mut config = Config::new(CONFIG).unwrap();
        let mut scheduling = SchedulingConfig::parse(&mut config);
        customize(&mut scheduling);

        TestEnv {
            scheduler: Scheduler::new(scheduling, TestBackend::default()),
        }
    }

    pub fn backend(&self) -> &TestBackend {
        &self.scheduler.backend
    }

    /// Schedules a change and persists the resulting object, the way a
    /// CalDAV PUT or DELETE would.
    pub async fn save(
        &self,
        account_id: u32,
        calendar: &str,
        name: &str,
        old: Option<&ICalendar>,
        new: Option<ICalendar>,
    ) -> ScheduleOutcome {
        let outcome = self
            .scheduler
            .schedule_update(account_id, old, new.as_ref(), None)
            .await
            .unwrap();
        match &outcome.object {
            Some(object) => self.backend().put(account_id, calendar, name, object),
            None => self.backend().remove(account_id, calendar, name),
        }
        outcome
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        let mut state = State::default();

        for (address, account_id, node_id) in [
            ("alice@example.com", ALICE, "node-a"),
            ("bob@example.com", BOB, "node-a"),
            ("carol@example.com", CAROL, "node-a"),
            ("frank@example.com", FRANK, "node-b"),
        ] {
            state.homes.insert(
                address.to_string(),
                CalendarHome {
                    account_id,
                    node_id: Some(node_id.to_string()),
                },
            );
            state
                .addresses
                .insert(account_id, vec![address.to_string()]);
            state
                .default_calendars
                .insert(account_id, "default".to_string());
        }

        TestBackend {
            state: Mutex::new(state),
        }
    }
}

impl TestBackend {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn put(&self, account_id: u32, calendar: &str, name: &str, ical: &ICalendar) {
        let uid = uid_of(ical).unwrap_or_default();
        let component_type = main_component_type(ical);
        let bytes = ical.to_string().into_bytes();
        let mut state = self.state();
        state.next_version += 1;
        let version = state.next_version;
        let resources = state.resources.entry(account_id).or_default();
        resources.retain(|resource| resource.calendar != calendar || resource.name != name);
        resources.push(StoredResource {
            calendar: calendar.to_string(),
            name: name.to_string(),
            uid,
            version,
            component_type,
            bytes,
        });
    }

    pub fn remove(&self, account_id: u32, calendar: &str, name: &str) {
        if let Some(resources) = self.state().resources.get_mut(&account_id) {
            resources.retain(|resource| resource.calendar != calendar || resource.name != name);
        }
    }

    pub fn get(&self, account_id: u32, uid: &str) -> Option<ICalendar> {
        self.state()
            .resources
            .get(&account_id)
            .and_then(|resources| resources.iter().find(|resource| resource.uid == uid))
            .map(|resource| parse_bytes(&resource.bytes))
    }

    pub fn resource_count(&self, account_id: u32) -> usize {
        self.state()
            .resources
            .get(&account_id)
            .map_or(0, |resources| resources.len())
    }

    pub fn notifications(&self, account_id: u32) -> Vec<Notification> {
        self.state()
            .notifications
            .iter()
            .filter(|(id, _)| *id == account_id)
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    pub fn deny(&self, account_id: u32, capability: Capability) {
        self.state().denied.insert((account_id, capability));
    }

    pub fn set_availability(&self, account_id: u32, ical: &str) {
        self.state()
            .availability
            .insert(account_id, ical_text(ical).into_bytes());
    }

    pub fn sent_mail(&self) -> Vec<(MailEnvelope, Vec<u8>)> {
        self.state().mail.clone()
    }

    pub fn sent_ischedule(&self) -> Vec<SentISchedule> {
        self.state().ischedule.clone()
    }
}

impl CalendarStore for TestBackend {
    async fn lookup_by_uid(
        &self,
        account_id: u32,
        uid: &str,
    ) -> trc::Result<Option<ResourceHandle>> {
        Ok(self
            .state()
            .resources
            .get(&account_id)
            .and_then(|resources| resources.iter().find(|resource| resource.uid == uid))
            .map(|resource| resource.handle(account_id)))
    }

    async fn fetch(&self, handle: &ResourceHandle) -> trc::Result<Option<Vec<u8>>> {
        Ok(self
            .state()
            .resources
            .get(&handle.account_id)
            .and_then(|resources| {
                resources.iter().find(|resource| {
                    resource.calendar == handle.calendar && resource.name == handle.name
                })
            })
            .map(|resource| resource.bytes.clone()))
    }

    async fn store(
        &self,
        account_id: u32,
        calendar: &str,
        name: &str,
        ical: &ICalendar,
        policy: OverwritePolicy,
    ) -> trc::Result<StoreOutcome> {
        let uid = uid_of(ical).ok_or_else(|| {
            trc::StoreEvent::UnexpectedError
                .into_err()
                .details("Missing UID")
        })?;
        let component_type = main_component_type(ical);
        let bytes = ical.to_string().into_bytes();

        let mut state = self.state();
        state.next_version += 1;
        let version = state.next_version;
        let resources = state.resources.entry(account_id).or_default();
        let existing = resources
            .iter_mut()
            .find(|resource| resource.calendar == calendar && resource.name == name);

        Ok(match (existing, policy) {
            (Some(resource), OverwritePolicy::IfVersion(expected))
                if resource.version == expected =>
            {
                resource.uid = uid;
                resource.version = version;
                resource.component_type = component_type;
                resource.bytes = bytes;
                StoreOutcome::Updated(resource.handle(account_id))
            }
            (None, OverwritePolicy::CreateOnly) => {
                let resource = StoredResource {
                    calendar: calendar.to_string(),
                    name: name.to_string(),
                    uid,
                    version,
                    component_type,
                    bytes,
                };
                let handle = resource.handle(account_id);
                resources.push(resource);
                StoreOutcome::Created(handle)
            }
            _ => StoreOutcome::Conflict,
        })
    }

    async fn store_notification(
        &self,
        account_id: u32,
        notification: Notification,
    ) -> trc::Result<()> {
        self.state().notifications.push((account_id, notification));
        Ok(())
    }

    async fn default_calendar(&self, account_id: u32) -> trc::Result<Option<String>> {
        Ok(self.state().default_calendars.get(&account_id).cloned())
    }

    async fn list_calendars(
        &self,
        account_id: u32,
        prefix: Option<&str>,
    ) -> trc::Result<Vec<String>> {
        let state = self.state();
        let mut calendars = state
            .resources
            .get(&account_id)
            .into_iter()
            .flatten()
            .map(|resource| resource.calendar.clone())
            .chain(state.default_calendars.get(&account_id).cloned())
            .filter(|calendar| prefix.is_none_or(|prefix| calendar.starts_with(prefix)))
            .collect::<Vec<_>>();
        calendars.sort_unstable();
        calendars.dedup();
        Ok(calendars)
    }

    async fn scan_time_range(
        &self,
        account_id: u32,
        calendar: &str,
        _range: TimeRange,
    ) -> trc::Result<Vec<ResourceMeta>> {
        // No index, every object is expanded by the engine
        Ok(self
            .state()
            .resources
            .get(&account_id)
            .into_iter()
            .flatten()
            .filter(|resource| resource.calendar == calendar)
            .map(|resource| ResourceMeta {
                handle: resource.handle(account_id),
                component_type: resource.component_type.clone(),
                start: i64::MIN,
                end: i64::MAX,
                is_recurring: true,
                is_cancelled: false,
                is_transparent: false,
                is_tentative: false,
            })
            .collect())
    }

    async fn availability(&self, account_id: u32) -> trc::Result<Option<Vec<u8>>> {
        Ok(self.state().availability.get(&account_id).cloned())
    }
}

impl Directory for TestBackend {
    async fn calendar_home(&self, address: &str) -> trc::Result<Option<CalendarHome>> {
        Ok(self.state().homes.get(address).cloned())
    }

    async fn addresses(&self, account_id: u32) -> trc::Result<Vec<String>> {
        Ok(self
            .state()
            .addresses
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl AccessControl for TestBackend {
    async fn has_capability(&self, account_id: u32, capability: Capability) -> trc::Result<bool> {
        Ok(!self.state().denied.contains(&(account_id, capability)))
    }
}

impl MailTransport for TestBackend {
    async fn send_mail(&self, envelope: MailEnvelope, message: Vec<u8>) -> trc::Result<()> {
        let mut state = self.state();
        if state.fail_mail {
            return Err(trc::NetworkEvent::MailTransportError
                .into_err()
                .details("Connection refused"));
        }
        state.mail.push((envelope, message));
        Ok(())
    }
}

impl IScheduleTransport for TestBackend {
    async fn send_ischedule(
        &self,
        request: IScheduleRequest<'_>,
    ) -> trc::Result<Vec<IScheduleResponse>> {
        let mut state = self.state();
        state.ischedule.push(SentISchedule {
            url: request.url.to_string(),
            originator: request.originator.to_string(),
            recipients: request.recipients.to_vec(),
            method: request.method.to_string(),
            component: request.component.to_string(),
            body: String::from_utf8_lossy(request.body).into_owned(),
        });
        if state.fail_ischedule {
            return Err(trc::NetworkEvent::HttpStatus
                .into_err()
                .ctx(trc::Key::Url, request.url.to_string())
                .ctx(trc::Key::Code, 503u16));
        }

        Ok(request
            .recipients
            .iter()
            .filter(|recipient| !state.ischedule_missing.contains(recipient.as_str()))
            .map(|recipient| IScheduleResponse {
                recipient: format!("mailto:{recipient}"),
                request_status: state
                    .ischedule_status
                    .get(recipient)
                    .cloned()
                    .unwrap_or_else(|| "2.0;Success".to_string()),
                calendar_data: None,
            })
            .collect())
    }
}

impl StoredResource {
    fn handle(&self, account_id: u32) -> ResourceHandle {
        ResourceHandle {
            account_id,
            calendar: self.calendar.clone(),
            name: self.name.clone(),
            version: self.version,
        }
    }
}

/// Normalizes line endings so fixtures can be written with plain newlines.
pub fn ical_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

pub fn ical(text: &str) -> ICalendar {
    let text = ical_text(text);
    ICalendar::parse(&text).unwrap()
}

fn parse_bytes(bytes: &[u8]) -> ICalendar {
    ICalendar::parse(std::str::from_utf8(bytes).unwrap()).unwrap()
}

pub fn uid_of(ical: &ICalendar) -> Option<String> {
    ical.components
        .iter()
        .flat_map(|comp| comp.entries.iter())
        .find(|entry| entry.name == ICalendarProperty::Uid)
        .and_then(|entry| entry.values.first())
        .and_then(|value| value.as_text())
        .map(|uid| uid.to_string())
}

fn main_component_type(ical: &ICalendar) -> ICalendarComponentType {
    ical.components
        .first()
        .into_iter()
        .flat_map(|root| root.component_ids.iter())
        .filter_map(|comp_id| ical.components.get(*comp_id as usize))
        .map(|comp| comp.component_type.clone())
        .find(|component_type| *component_type != ICalendarComponentType::VTimezone)
        .unwrap_or(ICalendarComponentType::VEvent)
}

/// Unfolded content lines of the serialized object.
pub fn lines(ical: &ICalendar) -> Vec<String> {
    ical.to_string()
        .replace("\r\n ", "")
        .replace("\r\n\t", "")
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/// Content lines of `property` whose text mentions `address`.
pub fn property_lines(ical: &ICalendar, property: &str, address: &str) -> Vec<String> {
    let address = address.to_lowercase();
    lines(ical)
        .into_iter()
        .filter(|line| {
            line.split([';', ':'])
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case(property))
                && line.to_lowercase().contains(&address)
        })
        .collect()
}

pub fn has_schedule_status(line: &str, code: &str) -> bool {
    line.contains(&format!("SCHEDULE-STATUS={code}"))
        || line.contains(&format!("SCHEDULE-STATUS=\"{code}"))
}

pub fn count_components(ical: &ICalendar, component_type: ICalendarComponentType) -> usize {
    ical.components
        .iter()
        .filter(|comp| comp.component_type == component_type)
        .count()
}

/// Changes the participation status of an attendee in every instance.
pub fn set_partstat(ical: &mut ICalendar, address: &str, partstat: ICalendarParticipationStatus) {
    for comp in &mut ical.components {
        for entry in &mut comp.entries {
            if entry.name == ICalendarProperty::Attendee
                && entry
                    .values
                    .first()
                    .and_then(|value| value.as_text())
                    .and_then(normalize_address)
                    .is_some_and(|email| email == address)
            {
                entry
                    .params
                    .retain(|param| param.name != ICalendarParameterName::Partstat);
                entry
                    .params
                    .push(ICalendarParameter::partstat(partstat.clone()));
            }
        }
    }
}

/// Single instance event organized by alice.
pub fn invitation(uid: &str, attendees: &[&str]) -> ICalendar {
    let mut text = format!(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VEVENT
UID:{uid}
DTSTAMP:20250101T000000Z
DTSTART:20250310T100000Z
DTEND:20250310T110000Z
SUMMARY:Planning
ORGANIZER:mailto:alice@example.com
ATTENDEE;PARTSTAT=ACCEPTED:mailto:alice@example.com
"
    );
    for attendee in attendees {
        text.push_str(&format!("ATTENDEE;RSVP=TRUE:mailto:{attendee}\n"));
    }
    text.push_str("END:VEVENT\nEND:VCALENDAR\n");
    ical(&text)
}

/// Weekly event organized by alice.
pub fn weekly(uid: &str, attendees: &[&str]) -> ICalendar {
    let mut text = format!(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VEVENT
UID:{uid}
DTSTAMP:20250101T000000Z
DTSTART:20250303T090000Z
DURATION:PT30M
RRULE:FREQ=WEEKLY;COUNT=4
SUMMARY:Weekly
ORGANIZER:mailto:alice@example.com
"
    );
    for attendee in attendees {
        text.push_str(&format!("ATTENDEE:mailto:{attendee}\n"));
    }
    text.push_str("END:VEVENT\nEND:VCALENDAR\n");
    ical(&text)
}
