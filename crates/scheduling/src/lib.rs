/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::{fmt::Display, sync::Arc};

use common::config::scheduling::SchedulingConfig;
use itip::ItipError;
use store::{AccessControl, CalendarStore, Directory, IScheduleTransport, MailTransport};

pub mod deliver;
pub mod freebusy;
pub mod itip;
pub mod outbound;
pub mod resolver;
pub mod router;
pub mod status;
pub mod store;

/// Everything the engine needs from the embedding server.
pub trait SchedulingBackend:
    CalendarStore + Directory + AccessControl + MailTransport + IScheduleTransport + Sync + Send
{
}

impl<T> SchedulingBackend for T where
    T: CalendarStore + Directory + AccessControl + MailTransport + IScheduleTransport + Sync + Send
{
}

pub struct Scheduler<T> {
    pub config: Arc<SchedulingConfig>,
    pub backend: T,
}

#[derive(Debug)]
pub enum ScheduleError {
    Itip(ItipError),
    Internal(trc::Error),
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

impl<T: SchedulingBackend> Scheduler<T> {
    pub fn new(config: impl Into<Arc<SchedulingConfig>>, backend: T) -> Self {
        Scheduler {
            config: config.into(),
            backend,
        }
    }
}

impl From<ItipError> for ScheduleError {
    fn from(err: ItipError) -> Self {
        ScheduleError::Itip(err)
    }
}

impl From<trc::Error> for ScheduleError {
    fn from(err: trc::Error) -> Self {
        ScheduleError::Internal(err)
    }
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::Itip(err) => err.fmt(f),
            ScheduleError::Internal(err) => err.fmt(f),
        }
    }
}
