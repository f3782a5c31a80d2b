/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

/// Delivery outcome for a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    Pending,
    Sent,
    Delivered,
    Success,
    NoUser,
    NoPrivileges,
    TempFail,
    PermFail,
    Rejected,
}

/// The two string forms a status can be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVocabulary {
    /// Full REQUEST-STATUS text, used for iSchedule triggered writes.
    RequestStatus,
    /// Short SCHEDULE-STATUS code, used for CalDAV triggered writes.
    ScheduleStatus,
}

impl ScheduleStatus {
    pub fn as_request_status(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "1.0;Pending",
            ScheduleStatus::Sent => "1.1;Sent",
            ScheduleStatus::Delivered => "1.2;Delivered",
            ScheduleStatus::Success => "2.0;Success",
            ScheduleStatus::NoUser => "3.7;Invalid calendar user",
            ScheduleStatus::NoPrivileges => "3.8;Noauthority",
            ScheduleStatus::TempFail => "5.1;Service unavailable",
            ScheduleStatus::PermFail => "5.2;Invalid calendar service",
            ScheduleStatus::Rejected => "5.3;No scheduling support for user",
        }
    }

    pub fn as_schedule_status(&self) -> &'static str {
        &self.as_request_status()[..3]
    }

    pub fn render(&self, vocabulary: StatusVocabulary) -> &'static str {
        match vocabulary {
            StatusVocabulary::RequestStatus => self.as_request_status(),
            StatusVocabulary::ScheduleStatus => self.as_schedule_status(),
        }
    }

    /// Maps a REQUEST-STATUS returned by a remote server.
    pub fn from_request_status(value: &str) -> Self {
        let code = value
            .split_once(';')
            .map_or(value, |(code, _)| code)
            .trim();

        match code {
            "1.0" => ScheduleStatus::Pending,
            "1.1" => ScheduleStatus::Sent,
            "3.7" => ScheduleStatus::NoUser,
            "3.8" => ScheduleStatus::NoPrivileges,
            "5.1" => ScheduleStatus::TempFail,
            "5.2" => ScheduleStatus::PermFail,
            "5.3" => ScheduleStatus::Rejected,
            _ if code.starts_with("1.") || code.starts_with("2.") => ScheduleStatus::Delivered,
            _ if code.starts_with("3.") => ScheduleStatus::PermFail,
            _ => ScheduleStatus::TempFail,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Sent | ScheduleStatus::Delivered | ScheduleStatus::Success
        )
    }
}
