/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use calcard::icalendar::ICalendarComponentType;
use scheduling::{deliver::local::resource_name, status::ScheduleStatus, store::Capability};

use super::{
    ALICE, BOB, CAROL, TestEnv, count_components, has_schedule_status, ical, invitation, lines,
    property_lines, weekly,
};

const POLL: &str = "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VPOLL
UID:poll-1
DTSTAMP:20250101T000000Z
SUMMARY:Offsite
ORGANIZER:mailto:alice@example.com
VOTER:mailto:bob@example.com
VOTER:mailto:carol@example.com
BEGIN:VEVENT
POLL-ITEM-ID:1
DTSTART:20250310T100000Z
DURATION:PT1H
END:VEVENT
BEGIN:VEVENT
POLL-ITEM-ID:2
DTSTART:20250311T100000Z
DURATION:PT1H
END:VEVENT
END:VPOLL
END:VCALENDAR
";

const POLL_REPLY: &str = "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
METHOD:REPLY
BEGIN:VPOLL
UID:poll-1
DTSTAMP:20250102T000000Z
ORGANIZER:mailto:alice@example.com
VOTER:mailto:bob@example.com
BEGIN:VEVENT
POLL-ITEM-ID:1
VOTER;RESPONSE=100:mailto:bob@example.com
END:VEVENT
BEGIN:VEVENT
POLL-ITEM-ID:2
VOTER;RESPONSE=0:mailto:bob@example.com
END:VEVENT
END:VPOLL
END:VCALENDAR
";

#[tokio::test]
async fn import_policies() {
    crate::enable_logging();

    // Unanswered invitations do not block time
    let env = TestEnv::with_config(|config| config.transparent_needs_action = true);
    env.save(
        ALICE,
        "default",
        "planning.ics",
        None,
        Some(invitation("planning-1", &["bob@example.com"])),
    )
    .await;
    let bob_lines = lines(&env.backend().get(BOB, "planning-1").unwrap());
    assert!(
        bob_lines.iter().any(|line| line == "TRANSP:TRANSPARENT"),
        "{bob_lines:?}"
    );

    // Without auto-add only the inbox item is kept
    let env = TestEnv::with_config(|config| config.auto_add = false);
    let outcome = env
        .save(
            ALICE,
            "default",
            "planning.ics",
            None,
            Some(invitation("planning-1", &["bob@example.com"])),
        )
        .await;
    assert_eq!(outcome.recipients[0].status, ScheduleStatus::Delivered);
    assert!(env.backend().get(BOB, "planning-1").is_none());
    assert_eq!(env.backend().notifications(BOB).len(), 1);

    // Attendees refusing invitations
    let env = TestEnv::new();
    env.backend().deny(BOB, Capability::InviteInbound);
    let outcome = env
        .save(
            ALICE,
            "default",
            "planning.ics",
            None,
            Some(invitation("planning-1", &["bob@example.com"])),
        )
        .await;
    assert_eq!(outcome.recipients[0].status, ScheduleStatus::NoPrivileges);
    let attendee = property_lines(outcome.object.as_ref().unwrap(), "ATTENDEE", "bob@example.com");
    assert!(has_schedule_status(&attendee[0], "3.8"), "{attendee:?}");
    assert_eq!(env.backend().resource_count(BOB), 0);
}

#[tokio::test]
async fn reply_to_unknown_instance() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    env.save(
        ALICE,
        "default",
        "weekly.ics",
        None,
        Some(weekly("weekly-2", &["bob@example.com"])),
    )
    .await;

    // Bob declines a single occurrence the organizer never detached
    let bob_copy = backend.get(BOB, "weekly-2").unwrap();
    let mut text = bob_copy.to_string();
    let end = text.rfind("END:VCALENDAR").unwrap();
    text.insert_str(
        end,
        "BEGIN:VEVENT\r\nUID:weekly-2\r\nDTSTAMP:20250101T000000Z\r\n\
RECURRENCE-ID:20250317T090000Z\r\nDTSTART:20250317T090000Z\r\nDURATION:PT30M\r\n\
SUMMARY:Weekly\r\nORGANIZER:mailto:alice@example.com\r\n\
ATTENDEE;PARTSTAT=DECLINED:mailto:bob@example.com\r\nEND:VEVENT\r\n",
    );
    let outcome = env
        .save(
            BOB,
            "default",
            &resource_name("weekly-2"),
            Some(&bob_copy),
            Some(ical(&text)),
        )
        .await;
    assert_eq!(outcome.recipients.len(), 1);
    assert_eq!(outcome.recipients[0].address, "alice@example.com");
    assert_eq!(outcome.recipients[0].status, ScheduleStatus::Delivered);

    // The organizer copy gains the override
    let alice_copy = backend.get(ALICE, "weekly-2").unwrap();
    assert_eq!(count_components(&alice_copy, ICalendarComponentType::VEvent), 2);
    let alice_lines = lines(&alice_copy);
    assert!(
        alice_lines
            .iter()
            .any(|line| line.starts_with("RECURRENCE-ID") && line.contains("20250317T090000Z")),
        "{alice_lines:?}"
    );
    assert!(
        property_lines(&alice_copy, "ATTENDEE", "bob@example.com")
            .iter()
            .any(|line| line.contains("PARTSTAT=DECLINED"))
    );
}

#[tokio::test]
async fn poll_votes_are_shared() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    let outcome = env
        .save(ALICE, "default", "poll.ics", None, Some(ical(POLL)))
        .await;
    assert_eq!(outcome.recipients.len(), 2);
    assert!(
        outcome
            .recipients
            .iter()
            .all(|recipient| recipient.status == ScheduleStatus::Delivered)
    );
    assert!(backend.get(CAROL, "poll-1").is_some());

    // Bob votes, the organizer forwards the tally to the other voters
    let status = env
        .scheduler
        .receive(ALICE, "mailto:bob@example.com", "alice@example.com", &ical(POLL_REPLY))
        .await;
    assert_eq!(status, ScheduleStatus::Delivered);

    let alice_copy = backend.get(ALICE, "poll-1").unwrap();
    assert!(
        property_lines(&alice_copy, "VOTER", "bob@example.com")
            .iter()
            .any(|line| line.contains("RESPONSE=100")),
    );

    let carol_copy = backend.get(CAROL, "poll-1").unwrap();
    assert!(
        property_lines(&carol_copy, "VOTER", "bob@example.com")
            .iter()
            .any(|line| line.contains("RESPONSE=100")),
        "{:?}",
        lines(&carol_copy)
    );
    assert!(
        backend
            .notifications(CAROL)
            .iter()
            .any(|notification| notification.method == "POLLSTATUS")
    );
    assert!(
        !backend
            .notifications(BOB)
            .iter()
            .any(|notification| notification.method == "POLLSTATUS")
    );
}

#[tokio::test]
async fn invalid_messages() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    env.save(
        ALICE,
        "default",
        "planning.ics",
        None,
        Some(invitation("planning-1", &["bob@example.com"])),
    )
    .await;

    // Same UID, different organizer
    let forged = ical(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
METHOD:REQUEST
BEGIN:VEVENT
UID:planning-1
DTSTAMP:20250102T000000Z
SEQUENCE:5
DTSTART:20250310T120000Z
DTEND:20250310T130000Z
SUMMARY:Planning
ORGANIZER:mailto:mallory@attacker.example
ATTENDEE:mailto:bob@example.com
END:VEVENT
END:VCALENDAR
",
    );
    assert_eq!(
        env.scheduler
            .receive(BOB, "mallory@attacker.example", "bob@example.com", &forged)
            .await,
        ScheduleStatus::Rejected
    );
    let bob_copy = backend.get(BOB, "planning-1").unwrap();
    assert_eq!(
        property_lines(&bob_copy, "ORGANIZER", "alice@example.com").len(),
        1
    );

    // Same UID, different component type
    let todo = ical(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
METHOD:REQUEST
BEGIN:VTODO
UID:planning-1
DTSTAMP:20250102T000000Z
SEQUENCE:5
SUMMARY:Planning
ORGANIZER:mailto:alice@example.com
ATTENDEE:mailto:bob@example.com
END:VTODO
END:VCALENDAR
",
    );
    assert_eq!(
        env.scheduler
            .receive(BOB, "alice@example.com", "bob@example.com", &todo)
            .await,
        ScheduleStatus::Rejected
    );
    assert_eq!(
        count_components(
            &backend.get(BOB, "planning-1").unwrap(),
            ICalendarComponentType::VTodo
        ),
        0
    );

    // Replies need a stored object
    let reply = ical(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
METHOD:REPLY
BEGIN:VEVENT
UID:unknown-1
DTSTAMP:20250102T000000Z
ORGANIZER:mailto:alice@example.com
ATTENDEE;PARTSTAT=ACCEPTED:mailto:bob@example.com
END:VEVENT
END:VCALENDAR
",
    );
    assert_eq!(
        env.scheduler
            .receive(ALICE, "bob@example.com", "alice@example.com", &reply)
            .await,
        ScheduleStatus::PermFail
    );

    // Cancelling something never received is a no-op
    let cancel = ical(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
METHOD:CANCEL
BEGIN:VEVENT
UID:unknown-2
DTSTAMP:20250102T000000Z
SEQUENCE:1
ORGANIZER:mailto:alice@example.com
ATTENDEE:mailto:carol@example.com
STATUS:CANCELLED
END:VEVENT
END:VCALENDAR
",
    );
    assert_eq!(
        env.scheduler
            .receive(CAROL, "alice@example.com", "carol@example.com", &cancel)
            .await,
        ScheduleStatus::Delivered
    );
    assert!(backend.get(CAROL, "unknown-2").is_none());
    assert!(backend.notifications(CAROL).is_empty());

    // Messages without a method
    let no_method = invitation("planning-9", &["carol@example.com"]);
    assert_eq!(
        env.scheduler
            .receive(CAROL, "alice@example.com", "carol@example.com", &no_method)
            .await,
        ScheduleStatus::PermFail
    );
}
