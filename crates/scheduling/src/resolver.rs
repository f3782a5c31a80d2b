/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use trc::AddContext;
use utils::DomainPart;

use crate::{Scheduler, SchedulingBackend, itip::normalize_address};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Local,
    IMip,
    ISchedule { url: String },
}

/// Resolved delivery target of a calendar user address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingParam {
    pub address: String,
    pub account_id: Option<u32>,
    pub transport: Transport,
}

#[derive(Debug)]
pub enum ResolveError {
    AddressNotFound,
    ResolutionError(trc::Error),
}

impl<T: SchedulingBackend> Scheduler<T> {
    pub async fn resolve_address(&self, address: &str) -> Result<SchedulingParam, ResolveError> {
        let result = self.resolve_address_(address).await;

        match &result {
            Err(ResolveError::AddressNotFound) => {
                trc::event!(
                    Calendar(trc::CalendarEvent::AddressNotFound),
                    To = address.to_string(),
                );
            }
            Err(ResolveError::ResolutionError(err)) => {
                trc::event!(
                    Calendar(trc::CalendarEvent::AddressResolutionError),
                    To = address.to_string(),
                    CausedBy = err.clone(),
                );
            }
            Ok(_) => {}
        }

        result
    }

    async fn resolve_address_(&self, address: &str) -> Result<SchedulingParam, ResolveError> {
        let address = normalize_address(address).ok_or(ResolveError::AddressNotFound)?;

        if let Some(home) = self
            .backend
            .calendar_home(&address)
            .await
            .caused_by(trc::location!())
            .map_err(ResolveError::ResolutionError)?
        {
            let transport = match home.node_id {
                Some(node_id) if node_id != self.config.node_id => {
                    let url = self
                        .config
                        .ischedule_cluster
                        .get(&node_id)
                        .ok_or_else(|| {
                            ResolveError::ResolutionError(
                                trc::CalendarEvent::AddressResolutionError
                                    .into_err()
                                    .details("Unknown cluster node")
                                    .ctx(trc::Key::Id, node_id.clone()),
                            )
                        })?;
                    Transport::ISchedule { url: url.clone() }
                }
                _ => Transport::Local,
            };

            return Ok(SchedulingParam {
                address,
                account_id: Some(home.account_id),
                transport,
            });
        }

        let domain = address.domain_part();
        if self.config.is_local_domain(domain) {
            Err(ResolveError::AddressNotFound)
        } else if let Some(url) = self.config.ischedule_peers.get(domain) {
            Ok(SchedulingParam {
                transport: Transport::ISchedule { url: url.clone() },
                address,
                account_id: None,
            })
        } else if self.config.imip_enabled {
            Ok(SchedulingParam {
                address,
                account_id: None,
                transport: Transport::IMip,
            })
        } else {
            Err(ResolveError::AddressNotFound)
        }
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::AddressNotFound => write!(f, "Calendar user address not found"),
            ResolveError::ResolutionError(err) => write!(f, "Address resolution failed: {err}"),
        }
    }
}
