// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Route to link resolution
//!
//! An (S,G) route is sourced through the link that leads towards S:
//! unicast LPM on the source gives the next hop, the interface whose subnet
//! holds the next hop gives the link, and the host service gives the next
//! hop's MAC on that interface's VLAN.

use std::net::Ipv4Addr;

use pnet::util::MacAddr;

use crate::log_warning;
use crate::logging::{Facility, Logger};
use crate::mroute::McastRoute;
use crate::services::{AttachmentPoint, Services};

/// A route bound to the engine that sources it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub route: McastRoute,
    pub attachment_point: AttachmentPoint,
    pub next_hop: Ipv4Addr,
    pub next_hop_mac: MacAddr,
}

/// Resolve `route` to a link engine. `has_engine` reports whether an
/// engine exists on an attachment point.
///
/// Every failed step logs a warning and yields `None`.
pub fn resolve<F>(
    services: &Services,
    logger: &Logger,
    route: &McastRoute,
    has_engine: F,
) -> Option<RouteBinding>
where
    F: Fn(&AttachmentPoint) -> bool,
{
    let Some(unicast) = services.unicast_routes.longest_prefix_match(route.source) else {
        log_warning!(
            logger,
            Facility::Binding,
            &format!("No unicast route to source of {}", route)
        );
        return None;
    };

    // Directly connected source
    let next_hop = if unicast.next_hop.is_unspecified() {
        route.source
    } else {
        unicast.next_hop
    };

    let Some(interface) = services.interfaces.matching_interface(next_hop) else {
        log_warning!(
            logger,
            Facility::Binding,
            &format!("No interface reaches next hop {} for {}", next_hop, route)
        );
        return None;
    };

    if !has_engine(&interface.attachment_point) {
        log_warning!(
            logger,
            Facility::Binding,
            &format!(
                "No PIM engine on {} ({}) for {}",
                interface.name, interface.attachment_point, route
            )
        );
        return None;
    }

    let Some(host) = services
        .hosts
        .hosts_by_ip(next_hop)
        .into_iter()
        .find(|h| h.vlan == interface.vlan)
    else {
        log_warning!(
            logger,
            Facility::Binding,
            &format!(
                "Next hop {} for {} not known on {}",
                next_hop, route, interface.name
            )
        );
        return None;
    };

    Some(RouteBinding {
        route: *route,
        attachment_point: interface.attachment_point,
        next_hop,
        next_hop_mac: host.mac,
    })
}
