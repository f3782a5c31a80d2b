/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use calcard::icalendar::{ICalendarComponentType, ICalendarParticipationStatus};
use mail_parser::{MessageParser, MimeHeaders};
use scheduling::{
    ScheduleError,
    deliver::local::resource_name,
    itip::ItipError,
    outbound::RecipientStatus,
    status::ScheduleStatus,
    store::Capability,
};

use super::{
    ALICE, BOB, CAROL, TestEnv, count_components, has_schedule_status, ical, invitation, lines,
    property_lines, set_partstat, weekly,
};

fn statuses(recipients: &[RecipientStatus]) -> Vec<(&str, ScheduleStatus)> {
    recipients
        .iter()
        .map(|recipient| (recipient.address.as_str(), recipient.status))
        .collect()
}

#[tokio::test]
async fn invitation_lifecycle() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    let attendees = [
        "bob@example.com",
        "dave@partner.example.net",
        "erin@external.org",
    ];

    // Create the event, one attendee per transport
    let outcome = env
        .save(
            ALICE,
            "default",
            "planning.ics",
            None,
            Some(invitation("planning-1", &attendees)),
        )
        .await;
    assert_eq!(
        statuses(&outcome.recipients),
        vec![
            ("bob@example.com", ScheduleStatus::Delivered),
            ("dave@partner.example.net", ScheduleStatus::Delivered),
            ("erin@external.org", ScheduleStatus::Sent),
        ]
    );
    assert!(!outcome.needs_action);
    let object = outcome.object.unwrap();
    for (address, code) in [
        ("bob@example.com", "1.2"),
        ("dave@partner.example.net", "1.2"),
        ("erin@external.org", "1.1"),
    ] {
        let attendee = property_lines(&object, "ATTENDEE", address);
        assert_eq!(attendee.len(), 1, "{attendee:?}");
        assert!(has_schedule_status(&attendee[0], code), "{attendee:?}");
    }

    // Local attendee received a copy and an inbox item
    let bob_copy = backend.get(BOB, "planning-1").unwrap();
    let bob_lines = lines(&bob_copy);
    assert!(bob_lines.iter().any(|line| line == "SUMMARY:Planning"));
    assert!(!bob_lines.iter().any(|line| line.starts_with("METHOD")));
    let notifications = backend.notifications(BOB);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].method, "REQUEST");
    assert_eq!(notifications[0].sender, "alice@example.com");
    assert_eq!(notifications[0].uid, "planning-1");

    // Remote attendee was posted over iSchedule
    let posts = backend.sent_ischedule();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url, "https://partner.example.net/ischedule");
    assert_eq!(posts[0].originator, "alice@example.com");
    assert_eq!(posts[0].recipients, vec!["dave@partner.example.net".to_string()]);
    assert_eq!(posts[0].method, "REQUEST");
    assert_eq!(posts[0].component, "VEVENT");
    assert!(posts[0].body.contains("METHOD:REQUEST"), "{}", posts[0].body);

    // External attendee was invited by email
    let mail = backend.sent_mail();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].0.from, "alice@example.com");
    assert_eq!(mail[0].0.to, vec!["erin@external.org".to_string()]);
    let message = MessageParser::default().parse(mail[0].1.as_slice()).unwrap();
    assert_eq!(message.subject(), Some("Invitation: Planning"));
    let attachment = message.attachment(0).unwrap();
    assert_eq!(attachment.attachment_name(), Some("event.ics"));
    let calendar = String::from_utf8_lossy(attachment.contents());
    assert!(calendar.contains("METHOD:REQUEST"), "{calendar}");
    assert!(calendar.contains("UID:planning-1"), "{calendar}");

    // Bob declines
    let mut bob_new = bob_copy.clone();
    set_partstat(
        &mut bob_new,
        "bob@example.com",
        ICalendarParticipationStatus::Declined,
    );
    let outcome = env
        .save(
            BOB,
            "default",
            &resource_name("planning-1"),
            Some(&bob_copy),
            Some(bob_new),
        )
        .await;
    assert_eq!(
        statuses(&outcome.recipients),
        vec![("alice@example.com", ScheduleStatus::Delivered)]
    );
    let organizer = property_lines(outcome.object.as_ref().unwrap(), "ORGANIZER", "alice@example.com");
    assert!(has_schedule_status(&organizer[0], "1.2"), "{organizer:?}");

    let alice_copy = backend.get(ALICE, "planning-1").unwrap();
    let bob_attendee = property_lines(&alice_copy, "ATTENDEE", "bob@example.com");
    assert_eq!(bob_attendee.len(), 1);
    assert!(bob_attendee[0].contains("PARTSTAT=DECLINED"), "{bob_attendee:?}");
    assert!(has_schedule_status(&bob_attendee[0], "2.0"), "{bob_attendee:?}");
    let dave_attendee = property_lines(&alice_copy, "ATTENDEE", "dave@partner.example.net");
    assert!(!dave_attendee[0].contains("PARTSTAT=DECLINED"));
    assert!(has_schedule_status(&dave_attendee[0], "1.2"), "{dave_attendee:?}");
    assert!(
        backend
            .notifications(ALICE)
            .iter()
            .any(|notification| notification.method == "REPLY"
                && notification.sender == "bob@example.com")
    );

    // Moving the event asks everyone again
    let moved = ical(
        &alice_copy
            .to_string()
            .replace("DTSTART:20250310T100000Z", "DTSTART:20250310T140000Z")
            .replace("DTEND:20250310T110000Z", "DTEND:20250310T150000Z"),
    );
    let outcome = env
        .save(ALICE, "default", "planning.ics", Some(&alice_copy), Some(moved))
        .await;
    assert!(outcome.needs_action);
    assert_eq!(outcome.recipients.len(), 3);
    let bob_copy = backend.get(BOB, "planning-1").unwrap();
    let bob_lines = lines(&bob_copy);
    assert!(
        bob_lines
            .iter()
            .any(|line| line == "DTSTART:20250310T140000Z"),
        "{bob_lines:?}"
    );
    assert!(bob_lines.iter().any(|line| line == "SEQUENCE:1"), "{bob_lines:?}");

    // Deleting the event cancels it everywhere
    let alice_copy = backend.get(ALICE, "planning-1").unwrap();
    let outcome = env
        .save(ALICE, "default", "planning.ics", Some(&alice_copy), None)
        .await;
    assert!(outcome.object.is_none());
    assert_eq!(
        statuses(&outcome.recipients),
        vec![
            ("bob@example.com", ScheduleStatus::Delivered),
            ("dave@partner.example.net", ScheduleStatus::Delivered),
            ("erin@external.org", ScheduleStatus::Sent),
        ]
    );
    assert!(
        lines(&backend.get(BOB, "planning-1").unwrap())
            .iter()
            .any(|line| line == "STATUS:CANCELLED")
    );
    assert_eq!(backend.sent_ischedule().last().unwrap().method, "CANCEL");
    let mail = backend.sent_mail();
    let message = MessageParser::default().parse(mail.last().unwrap().1.as_slice()).unwrap();
    assert_eq!(message.subject(), Some("Cancelled: Planning"));
}

#[tokio::test]
async fn override_without_attendee() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();

    // Carol is not invited to the second occurrence
    let mut text = weekly("weekly-1", &["bob@example.com", "carol@example.com"]).to_string();
    let end = text.rfind("END:VCALENDAR").unwrap();
    text.insert_str(
        end,
        "BEGIN:VEVENT\r\nUID:weekly-1\r\nDTSTAMP:20250101T000000Z\r\n\
RECURRENCE-ID:20250310T090000Z\r\nDTSTART:20250310T100000Z\r\nDURATION:PT30M\r\n\
SUMMARY:Weekly\r\nORGANIZER:mailto:alice@example.com\r\n\
ATTENDEE:mailto:bob@example.com\r\nEND:VEVENT\r\n",
    );
    let outcome = env
        .save(ALICE, "default", "weekly.ics", None, Some(ical(&text)))
        .await;
    assert_eq!(
        statuses(&outcome.recipients),
        vec![
            ("bob@example.com", ScheduleStatus::Delivered),
            ("carol@example.com", ScheduleStatus::Delivered),
        ]
    );

    let bob_copy = backend.get(BOB, "weekly-1").unwrap();
    assert_eq!(count_components(&bob_copy, ICalendarComponentType::VEvent), 2);

    let carol_copy = backend.get(CAROL, "weekly-1").unwrap();
    assert_eq!(count_components(&carol_copy, ICalendarComponentType::VEvent), 1);
    let carol_lines = lines(&carol_copy);
    assert!(
        carol_lines
            .iter()
            .any(|line| line.starts_with("EXDATE") && line.contains("20250310T090000Z")),
        "{carol_lines:?}"
    );
}

#[tokio::test]
async fn organizer_without_capability() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    backend.deny(ALICE, Capability::InviteOutbound);

    let event = invitation(
        "planning-2",
        &["bob@example.com", "dave@partner.example.net"],
    );
    let outcome = env
        .save(ALICE, "default", "planning.ics", None, Some(event.clone()))
        .await;
    assert_eq!(
        statuses(&outcome.recipients),
        vec![
            ("bob@example.com", ScheduleStatus::NoPrivileges),
            ("dave@partner.example.net", ScheduleStatus::NoPrivileges),
        ]
    );
    let object = outcome.object.unwrap();
    for address in ["bob@example.com", "dave@partner.example.net"] {
        let attendee = property_lines(&object, "ATTENDEE", address);
        assert!(has_schedule_status(&attendee[0], "3.8"), "{attendee:?}");
    }
    assert!(backend.get(BOB, "planning-2").is_none());
    assert!(backend.sent_ischedule().is_empty());
    assert!(backend.sent_mail().is_empty());

    // Deletions cannot be annotated and are refused
    assert!(matches!(
        env.scheduler
            .schedule_update(ALICE, Some(&event), None, None)
            .await,
        Err(ScheduleError::Itip(ItipError::PermissionDenied))
    ));
}

#[tokio::test]
async fn unscheduled_objects_pass_through() {
    let env = TestEnv::new();

    // No ORGANIZER, nothing to schedule
    let event = ical(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VEVENT
UID:private-1
DTSTAMP:20250101T000000Z
DTSTART:20250310T100000Z
DTEND:20250310T110000Z
SUMMARY:Dentist
END:VEVENT
END:VCALENDAR
",
    );
    let outcome = env
        .save(ALICE, "default", "dentist.ics", None, Some(event))
        .await;
    assert!(outcome.recipients.is_empty());
    assert!(outcome.object.is_some());

    // Scheduling disabled
    let env = TestEnv::with_config(|config| config.enabled = false);
    let outcome = env
        .save(
            ALICE,
            "default",
            "planning.ics",
            None,
            Some(invitation("planning-3", &["bob@example.com"])),
        )
        .await;
    assert!(outcome.recipients.is_empty());
    assert!(env.backend().get(BOB, "planning-3").is_none());
}
