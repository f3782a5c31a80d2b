/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::{str::FromStr, time::Duration};

use ahash::{AHashMap, AHashSet};
use calcard::common::timezone::Tz;
use utils::config::Config;

pub const DEFAULT_PROD_ID: &str = "-//Stalwart Labs LLC//CalDAV Scheduling//EN";

#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub enabled: bool,
    pub prod_id: String,
    pub node_id: String,
    pub local_domains: AHashSet<String>,

    // Inbound
    pub auto_add: bool,
    pub transparent_needs_action: bool,

    // Outbound
    pub max_recipients: usize,
    pub imip_enabled: bool,

    // iSchedule
    pub ischedule_cluster: AHashMap<String, String>,
    pub ischedule_peers: AHashMap<String, String>,
    pub ischedule_timeout: Duration,
    pub ischedule_max_response_size: usize,

    // Free/busy
    pub max_expansions: usize,
    pub default_tz: Tz,
}

impl SchedulingConfig {
    pub fn parse(config: &mut Config) -> Self {
        let local_domains = config
            .values("calendar.scheduling.local-domains")
            .map(|(_, domain)| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect::<AHashSet<_>>();
        let ischedule_cluster = config
            .iterate_prefix("calendar.scheduling.ischedule.cluster")
            .map(|(node, url)| (node.to_string(), url.trim_end_matches('/').to_string()))
            .collect::<AHashMap<_, _>>();
        let ischedule_peers = config
            .iterate_prefix("calendar.scheduling.ischedule.peer")
            .map(|(domain, url)| (domain.to_lowercase(), url.trim_end_matches('/').to_string()))
            .collect::<AHashMap<_, _>>();

        let default_tz = match config.value("calendar.default-timezone") {
            Some(tz) => match Tz::from_str(tz) {
                Ok(tz) => tz,
                Err(_) => {
                    let err = format!("Unknown time zone {tz:?}");
                    config.new_parse_error("calendar.default-timezone", err);
                    Tz::UTC
                }
            },
            None => Tz::UTC,
        };

        SchedulingConfig {
            enabled: config
                .property("calendar.scheduling.enable")
                .unwrap_or(true),
            prod_id: config
                .value("calendar.scheduling.prod-id")
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(DEFAULT_PROD_ID)
                .to_string(),
            node_id: config
                .value("calendar.scheduling.node-id")
                .unwrap_or("local")
                .to_string(),
            local_domains,
            auto_add: config
                .property("calendar.scheduling.inbound.auto-add")
                .unwrap_or(true),
            transparent_needs_action: config
                .property("calendar.scheduling.inbound.transparent-needs-action")
                .unwrap_or(false),
            max_recipients: config
                .property("calendar.scheduling.outbound.max-recipients")
                .unwrap_or(100),
            imip_enabled: config
                .property("calendar.scheduling.outbound.imip.enable")
                .unwrap_or(true),
            ischedule_cluster,
            ischedule_peers,
            ischedule_timeout: config
                .property_or_default::<Duration>("calendar.scheduling.ischedule.timeout", "30s")
                .unwrap_or(Duration::from_secs(30)),
            ischedule_max_response_size: config
                .property("calendar.scheduling.ischedule.max-response-size")
                .unwrap_or(1024 * 1024),
            max_expansions: config
                .property("calendar.max-recurrence-expansions")
                .unwrap_or(3000),
            default_tz,
        }
    }

    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.local_domains.contains(domain)
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        SchedulingConfig::parse(&mut Config::default())
    }
}
