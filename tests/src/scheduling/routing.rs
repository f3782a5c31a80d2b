/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use scheduling::{
    resolver::{ResolveError, SchedulingParam, Transport},
    status::ScheduleStatus,
};

use super::{ALICE, BOB, FRANK, TestEnv, has_schedule_status, invitation, property_lines};

#[tokio::test]
async fn address_resolution() {
    crate::enable_logging();

    let env = TestEnv::new();
    let scheduler = &env.scheduler;

    assert_eq!(
        scheduler
            .resolve_address("mailto:Bob@Example.com")
            .await
            .unwrap(),
        SchedulingParam {
            address: "bob@example.com".to_string(),
            account_id: Some(BOB),
            transport: Transport::Local,
        }
    );
    assert_eq!(
        scheduler.resolve_address("frank@example.com").await.unwrap(),
        SchedulingParam {
            address: "frank@example.com".to_string(),
            account_id: Some(FRANK),
            transport: Transport::ISchedule {
                url: "https://node-b.example.com/ischedule".to_string()
            },
        }
    );
    assert_eq!(
        scheduler
            .resolve_address("dave@partner.example.net")
            .await
            .unwrap(),
        SchedulingParam {
            address: "dave@partner.example.net".to_string(),
            account_id: None,
            transport: Transport::ISchedule {
                url: "https://partner.example.net/ischedule".to_string()
            },
        }
    );
    assert_eq!(
        scheduler.resolve_address("erin@external.org").await.unwrap(),
        SchedulingParam {
            address: "erin@external.org".to_string(),
            account_id: None,
            transport: Transport::IMip,
        }
    );
    for address in ["nobody@example.com", "not-an-address", "mailto:"] {
        assert!(
            matches!(
                scheduler.resolve_address(address).await,
                Err(ResolveError::AddressNotFound)
            ),
            "{address}"
        );
    }

    // Unknown cluster node
    env.backend()
        .state()
        .homes
        .get_mut("frank@example.com")
        .unwrap()
        .node_id = Some("node-z".to_string());
    assert!(matches!(
        scheduler.resolve_address("frank@example.com").await,
        Err(ResolveError::ResolutionError(_))
    ));

    // External addresses are unreachable without iMIP
    let env = TestEnv::with_config(|config| config.imip_enabled = false);
    assert!(matches!(
        env.scheduler.resolve_address("erin@external.org").await,
        Err(ResolveError::AddressNotFound)
    ));
}

#[tokio::test]
async fn ischedule_batches() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    {
        let mut state = backend.state();
        state.ischedule_status.insert(
            "gina@partner.example.net".to_string(),
            "3.7;Invalid calendar user".to_string(),
        );
        state
            .ischedule_missing
            .insert("henk@partner.example.net".to_string());
    }

    let outcome = env
        .save(
            ALICE,
            "default",
            "planning.ics",
            None,
            Some(invitation(
                "planning-1",
                &[
                    "dave@partner.example.net",
                    "frank@example.com",
                    "gina@partner.example.net",
                    "henk@partner.example.net",
                ],
            )),
        )
        .await;
    assert_eq!(
        outcome
            .recipients
            .iter()
            .map(|recipient| (recipient.address.as_str(), recipient.status))
            .collect::<Vec<_>>(),
        vec![
            ("dave@partner.example.net", ScheduleStatus::Delivered),
            ("frank@example.com", ScheduleStatus::Delivered),
            ("gina@partner.example.net", ScheduleStatus::NoUser),
            ("henk@partner.example.net", ScheduleStatus::TempFail),
        ]
    );

    // One request per server when the payloads match
    let mut posts = backend.sent_ischedule();
    posts.sort_by(|a, b| a.url.cmp(&b.url));
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].url, "https://node-b.example.com/ischedule");
    assert_eq!(posts[0].recipients, vec!["frank@example.com".to_string()]);
    assert_eq!(posts[1].url, "https://partner.example.net/ischedule");
    assert_eq!(
        posts[1].recipients,
        vec![
            "dave@partner.example.net".to_string(),
            "gina@partner.example.net".to_string(),
            "henk@partner.example.net".to_string(),
        ]
    );

    let object = outcome.object.unwrap();
    for (address, code) in [
        ("dave@partner.example.net", "1.2"),
        ("gina@partner.example.net", "3.7"),
        ("henk@partner.example.net", "5.1"),
    ] {
        let attendee = property_lines(&object, "ATTENDEE", address);
        assert!(has_schedule_status(&attendee[0], code), "{attendee:?}");
    }
}

#[tokio::test]
async fn transport_failures() {
    crate::enable_logging();

    let env = TestEnv::new();
    let backend = env.backend();
    {
        let mut state = backend.state();
        state.fail_ischedule = true;
        state.fail_mail = true;
    }

    let outcome = env
        .save(
            ALICE,
            "default",
            "planning.ics",
            None,
            Some(invitation(
                "planning-1",
                &[
                    "dave@partner.example.net",
                    "erin@external.org",
                    "nobody@example.com",
                ],
            )),
        )
        .await;
    assert_eq!(
        outcome
            .recipients
            .iter()
            .map(|recipient| (recipient.address.as_str(), recipient.status))
            .collect::<Vec<_>>(),
        vec![
            ("dave@partner.example.net", ScheduleStatus::TempFail),
            ("erin@external.org", ScheduleStatus::TempFail),
            ("nobody@example.com", ScheduleStatus::NoUser),
        ]
    );
    assert!(backend.sent_mail().is_empty());

    let object = outcome.object.unwrap();
    let attendee = property_lines(&object, "ATTENDEE", "nobody@example.com");
    assert!(has_schedule_status(&attendee[0], "3.7"), "{attendee:?}");
}
