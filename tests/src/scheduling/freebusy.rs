/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use scheduling::{
    freebusy::{FreeBusyPeriod, FreeBusyQuery, FreeBusyType, request::FREEBUSY_NO_USER},
    store::Capability,
};

use super::{ALICE, BOB, CAROL, TestEnv, ical, lines};

const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;
// 2025-03-10T00:00:00Z
const MONDAY: i64 = 1741564800;

fn event(uid: &str, start: &str, end: &str, extra: &str) -> String {
    format!(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VEVENT
UID:{uid}
DTSTAMP:20250101T000000Z
DTSTART:{start}
DTEND:{end}
{extra}SUMMARY:Busy
END:VEVENT
END:VCALENDAR
"
    )
}

fn simplify(periods: &[FreeBusyPeriod]) -> Vec<(i64, i64, FreeBusyType)> {
    periods
        .iter()
        .map(|period| (period.start - MONDAY, period.end() - MONDAY, period.fbtype))
        .collect()
}

#[tokio::test]
async fn busy_time() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();

    for (calendar, name, text) in [
        (
            "default",
            "single.ics",
            event("single", "20250310T100000Z", "20250310T110000Z", ""),
        ),
        (
            "default",
            "transparent.ics",
            event(
                "transparent",
                "20250311T100000Z",
                "20250311T110000Z",
                "TRANSP:TRANSPARENT\n",
            ),
        ),
        (
            "default",
            "tentative.ics",
            event(
                "tentative",
                "20250312T090000Z",
                "20250312T100000Z",
                "STATUS:TENTATIVE\n",
            ),
        ),
        (
            "default",
            "cancelled.ics",
            event(
                "cancelled",
                "20250313T090000Z",
                "20250313T100000Z",
                "STATUS:CANCELLED\n",
            ),
        ),
        (
            "work",
            "work.ics",
            event("work", "20250314T090000Z", "20250314T100000Z", ""),
        ),
        (
            "default",
            "standup.ics",
            "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VEVENT
UID:standup
DTSTAMP:20250101T000000Z
DTSTART:20250303T140000Z
DURATION:PT30M
RRULE:FREQ=WEEKLY;COUNT=3
SUMMARY:Standup
END:VEVENT
END:VCALENDAR
"
            .to_string(),
        ),
    ] {
        backend.put(ALICE, calendar, name, &ical(&text));
    }

    // Transparent and cancelled events are free time
    let periods = env
        .scheduler
        .free_busy(
            ALICE,
            &FreeBusyQuery::new(MONDAY, MONDAY + 7 * DAY).with_calendar_prefix("default"),
        )
        .await
        .unwrap();
    assert_eq!(
        simplify(&periods),
        vec![
            (10 * HOUR, 11 * HOUR, FreeBusyType::Busy),
            (14 * HOUR, 14 * HOUR + 1800, FreeBusyType::Busy),
            (
                2 * DAY + 9 * HOUR,
                2 * DAY + 10 * HOUR,
                FreeBusyType::BusyTentative
            ),
        ]
    );

    // Every calendar contributes without a prefix
    let periods = env
        .scheduler
        .free_busy(ALICE, &FreeBusyQuery::new(MONDAY, MONDAY + 7 * DAY))
        .await
        .unwrap();
    assert!(
        simplify(&periods).contains(&(4 * DAY + 9 * HOUR, 4 * DAY + 10 * HOUR, FreeBusyType::Busy))
    );

    // Periods are clipped to the window
    let periods = env
        .scheduler
        .free_busy(
            ALICE,
            &FreeBusyQuery::new(MONDAY + 10 * HOUR + 1800, MONDAY + 12 * HOUR),
        )
        .await
        .unwrap();
    assert_eq!(
        simplify(&periods),
        vec![(10 * HOUR + 1800, 11 * HOUR, FreeBusyType::Busy)]
    );

    // Empty accounts have no busy time
    assert!(
        env.scheduler
            .free_busy(CAROL, &FreeBusyQuery::new(MONDAY, MONDAY + 7 * DAY))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn availability() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    backend.put(
        ALICE,
        "default",
        "single.ics",
        &ical(&event(
            "single",
            "20250310T100000Z",
            "20250310T110000Z",
            "",
        )),
    );
    backend.set_availability(
        ALICE,
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
BEGIN:VAVAILABILITY
UID:office-hours
DTSTAMP:20250101T000000Z
BEGIN:AVAILABLE
UID:office-hours-1
DTSTAMP:20250101T000000Z
DTSTART:20250303T090000Z
DTEND:20250303T170000Z
RRULE:FREQ=DAILY
END:AVAILABLE
END:VAVAILABILITY
END:VCALENDAR
",
    );

    // Outside office hours the account is unavailable
    let query = FreeBusyQuery::new(MONDAY, MONDAY + DAY).with_availability(true);
    let periods = env.scheduler.free_busy(ALICE, &query).await.unwrap();
    assert_eq!(
        simplify(&periods),
        vec![
            (0, 9 * HOUR, FreeBusyType::BusyUnavailable),
            (10 * HOUR, 11 * HOUR, FreeBusyType::Busy),
            (17 * HOUR, 24 * HOUR, FreeBusyType::BusyUnavailable),
        ]
    );

    // Availability is opt-in
    let query = FreeBusyQuery::new(MONDAY, MONDAY + DAY);
    let periods = env.scheduler.free_busy(ALICE, &query).await.unwrap();
    assert_eq!(
        simplify(&periods),
        vec![(10 * HOUR, 11 * HOUR, FreeBusyType::Busy)]
    );
}

#[tokio::test]
async fn freebusy_request() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    backend.put(
        BOB,
        "default",
        "single.ics",
        &ical(&event(
            "single",
            "20250310T100000Z",
            "20250310T110000Z",
            "",
        )),
    );
    backend.deny(CAROL, Capability::FreeBusy);

    let request = ical(
        "BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//EN
METHOD:REQUEST
BEGIN:VFREEBUSY
UID:fb-1
DTSTAMP:20250101T000000Z
DTSTART:20250310T090000Z
DTEND:20250310T170000Z
ORGANIZER:mailto:alice@example.com
ATTENDEE:mailto:bob@example.com
ATTENDEE:mailto:carol@example.com
ATTENDEE:mailto:nobody@example.com
END:VFREEBUSY
END:VCALENDAR
",
    );
    let responses = env.scheduler.free_busy_request(&request).await.unwrap();
    assert_eq!(
        responses
            .iter()
            .map(|response| (response.recipient.as_str(), response.request_status))
            .collect::<Vec<_>>(),
        vec![
            ("mailto:bob@example.com", "2.0;Success"),
            ("mailto:carol@example.com", FREEBUSY_NO_USER),
            ("mailto:nobody@example.com", FREEBUSY_NO_USER),
        ]
    );
    assert!(responses[1].calendar_data.is_none());
    assert!(responses[2].calendar_data.is_none());

    let reply = lines(responses[0].calendar_data.as_ref().unwrap());
    assert!(reply.iter().any(|line| line == "METHOD:REPLY"), "{reply:?}");
    assert!(
        reply.iter().any(|line| line.starts_with("FREEBUSY")
            && line.contains("BUSY")
            && line.ends_with("20250310T100000Z/20250310T110000Z")),
        "{reply:?}"
    );
    assert!(reply.iter().any(|line| line == "UID:fb-1"), "{reply:?}");
    assert!(
        reply
            .iter()
            .any(|line| line.starts_with("ORGANIZER") && line.contains("alice@example.com")),
        "{reply:?}"
    );
    assert!(
        reply
            .iter()
            .any(|line| line.starts_with("ATTENDEE") && line.contains("bob@example.com")),
        "{reply:?}"
    );
}
