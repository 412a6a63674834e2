// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Engine manager
//!
//! Owns one [`LinkEngine`] per attachment point and everything that spans
//! engines: interface configuration, inbound frame dispatch, the periodic
//! sweeps, and the binding of (S,G) routes to the engine that sources them.
//!
//! Locking: the engine map is a `RwLock`, each engine its own `Mutex`, and
//! route bookkeeping (bound and unresolved routes) a single `Mutex`. Lock
//! order is route table, then engine map, then one engine. No code path holds
//! two engine locks at once. The route table is held across resolve, Join and
//! commit, and across engine removal, so a binding never outlives its route
//! or its engine.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use super::binding::{self, RouteBinding};
use super::frame::{decode_frame, is_pim_frame, LinkAddress};
use super::interface::{EngineSnapshot, LinkEngine};
use crate::config::{InterfaceConfig, PimConfig};
use crate::logging::{Facility, Logger};
use crate::mroute::{JoinPruneIntent, McastRoute, RouteEvent};
use crate::protocols::pim::{DEFAULT_JOIN_PRUNE_PERIOD, PIM_HELLO, PIM_JOIN_PRUNE};
use crate::services::{AttachmentPoint, InterfaceEvent, InterfaceInfo, Services};
use crate::{log_debug, log_info, log_notice, log_warning};

/// Shared handle to one link engine
pub type EngineHandle = Arc<Mutex<LinkEngine>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Route bookkeeping; a known route is either bound or unresolved
#[derive(Debug, Default)]
struct RouteTable {
    bindings: HashMap<McastRoute, RouteBinding>,
    unresolved: BTreeSet<McastRoute>,
}

/// Registry of link engines and route bindings
pub struct EngineManager {
    services: Services,
    logger: Logger,
    join_period: RwLock<Duration>,
    engines: RwLock<HashMap<AttachmentPoint, EngineHandle>>,
    /// Enabled interface configs by interface name, with or without an engine
    configs: Mutex<HashMap<String, InterfaceConfig>>,
    routes: Mutex<RouteTable>,
}

impl EngineManager {
    pub fn new(services: Services, logger: Logger) -> Self {
        Self {
            services,
            logger,
            join_period: RwLock::new(DEFAULT_JOIN_PRUNE_PERIOD),
            engines: RwLock::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            routes: Mutex::new(RouteTable::default()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn join_period(&self) -> Duration {
        *self
            .join_period
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Engine on `attachment_point`, if any
    pub fn engine(&self, attachment_point: &AttachmentPoint) -> Option<EngineHandle> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(attachment_point)
            .cloned()
    }

    fn engine_handles(&self) -> Vec<(AttachmentPoint, EngineHandle)> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(ap, engine)| (ap.clone(), Arc::clone(engine)))
            .collect()
    }

    fn has_engine(&self, attachment_point: &AttachmentPoint) -> bool {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(attachment_point)
    }

    pub fn engine_count(&self) -> usize {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Attachment points of every engine whose interface is `name`
    fn engines_for_interface(&self, name: &str) -> Vec<AttachmentPoint> {
        self.engine_handles()
            .into_iter()
            .filter(|(_, engine)| lock(engine).interface_name() == name)
            .map(|(ap, _)| ap)
            .collect()
    }

    /// Configured interfaces still waiting for their interface to appear
    pub fn pending_interfaces(&self) -> Vec<String> {
        let configured: Vec<String> = lock(&self.configs).keys().cloned().collect();
        let mut pending: Vec<String> = configured
            .into_iter()
            .filter(|name| self.engines_for_interface(name).is_empty())
            .collect();
        pending.sort();
        pending
    }

    /// Create the engine for `config`, or update the existing one.
    ///
    /// If the interface (or its IPv4 address) is not known yet, the config is
    /// kept and applied when the interface shows up. Returns the engine if
    /// one is running after the call.
    pub fn create_or_update_engine(&self, config: &InterfaceConfig) -> Option<EngineHandle> {
        if !config.enabled {
            lock(&self.configs).remove(&config.interface);
            for ap in self.engines_for_interface(&config.interface) {
                self.remove_engine(&ap);
            }
            return None;
        }

        lock(&self.configs).insert(config.interface.clone(), config.clone());

        let Some(info) = self.services.interfaces.interface_by_name(&config.interface) else {
            log_info!(
                self.logger,
                Facility::Manager,
                &format!(
                    "Interface {} not available, engine creation deferred",
                    config.interface
                )
            );
            return None;
        };

        self.start_engine(&info, config)
    }

    fn start_engine(&self, info: &InterfaceInfo, config: &InterfaceConfig) -> Option<EngineHandle> {
        let Some(ip) = info.primary_address() else {
            log_info!(
                self.logger,
                Facility::Manager,
                &format!(
                    "Interface {} has no IPv4 address, engine creation deferred",
                    info.name
                )
            );
            return None;
        };

        // The interface may have moved to another attachment point
        for ap in self.engines_for_interface(&info.name) {
            if ap != info.attachment_point {
                self.remove_engine(&ap);
            }
        }

        let params = config.params(self.join_period());
        let link = LinkAddress {
            mac: info.mac,
            ip,
            vlan: info.vlan,
        };

        if let Some(existing) = self.engine(&info.attachment_point) {
            let same_link = {
                let engine = lock(&existing);
                engine.link_address() == &link && engine.interface_name() == info.name
            };
            if same_link {
                lock(&existing).apply_params(params);
                return Some(existing);
            }
            log_notice!(
                self.logger,
                Facility::Manager,
                &format!(
                    "Addressing of {} changed, replacing engine on {}",
                    info.name, info.attachment_point
                )
            );
            self.remove_engine(&info.attachment_point);
        }

        let engine = Arc::new(Mutex::new(LinkEngine::new(
            info.attachment_point.clone(),
            info.name.clone(),
            link,
            params,
            Arc::clone(&self.services.transport),
            Arc::clone(&self.services.clock),
            self.logger.clone(),
        )));
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.attachment_point.clone(), Arc::clone(&engine));

        log_info!(
            self.logger,
            Facility::Manager,
            &format!(
                "PIM engine started on {} ({}, {})",
                info.name, info.attachment_point, ip
            )
        );

        self.retry_unresolved();
        Some(engine)
    }

    /// Stop the engine on `attachment_point`.
    ///
    /// Sends a goodbye Hello, withdraws downstream interest learned on the
    /// link and moves the routes it sourced back to the unresolved set.
    pub fn remove_engine(&self, attachment_point: &AttachmentPoint) -> bool {
        let mut routes = lock(&self.routes);

        let Some(engine) = self
            .engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(attachment_point)
        else {
            return false;
        };

        let (name, downstream) = {
            let engine = lock(&engine);
            engine.send_goodbye();
            let downstream: Vec<JoinPruneIntent> = engine
                .downstream()
                .map(|(entry, _)| JoinPruneIntent::Prune { entry: *entry })
                .collect();
            (engine.interface_name().to_string(), downstream)
        };

        let orphaned: Vec<McastRoute> = routes
            .bindings
            .values()
            .filter(|b| &b.attachment_point == attachment_point)
            .map(|b| b.route)
            .collect();
        for route in &orphaned {
            routes.bindings.remove(route);
            routes.unresolved.insert(*route);
        }
        drop(routes);

        self.forward_intents(attachment_point, &downstream);

        log_info!(
            self.logger,
            Facility::Manager,
            &format!(
                "PIM engine on {} ({}) removed, {} route(s) unresolved",
                name,
                attachment_point,
                orphaned.len()
            )
        );

        if !orphaned.is_empty() {
            self.retry_unresolved();
        }
        true
    }

    /// Reconcile engines with a full configuration
    pub fn apply_config(&self, config: &PimConfig) {
        *self
            .join_period
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.join_period();

        let enabled: HashSet<&str> = config
            .enabled_interfaces()
            .map(|i| i.interface.as_str())
            .collect();

        lock(&self.configs).retain(|name, _| enabled.contains(name.as_str()));

        let stale: Vec<AttachmentPoint> = self
            .engine_handles()
            .into_iter()
            .filter(|(_, engine)| !enabled.contains(lock(engine).interface_name()))
            .map(|(ap, _)| ap)
            .collect();
        for ap in stale {
            self.remove_engine(&ap);
        }

        for iface in config.enabled_interfaces() {
            self.create_or_update_engine(iface);
        }
    }

    /// React to interface inventory changes
    pub fn handle_interface_event(&self, event: &InterfaceEvent) {
        match event {
            InterfaceEvent::Added(info) | InterfaceEvent::Updated(info) => {
                let config = lock(&self.configs).get(&info.name).cloned();
                match config {
                    Some(config) => {
                        self.start_engine(info, &config);
                    }
                    None => log_debug!(
                        self.logger,
                        Facility::Manager,
                        &format!("Interface {} is not PIM enabled", info.name)
                    ),
                }
            }
            InterfaceEvent::Removed(info) => {
                self.remove_engine(&info.attachment_point);
            }
        }
    }

    /// React to route directory changes
    pub fn handle_route_event(&self, event: &RouteEvent) {
        match event {
            RouteEvent::Added(route) => {
                let mut routes = lock(&self.routes);
                if !routes.bindings.contains_key(route) {
                    self.bind_route(&mut routes, route);
                }
            }
            RouteEvent::Removed(route) => {
                let mut routes = lock(&self.routes);
                routes.unresolved.remove(route);
                if let Some(binding) = routes.bindings.remove(route) {
                    if let Some(engine) = self.engine(&binding.attachment_point) {
                        lock(&engine).remove_route(route);
                    }
                }
                drop(routes);
                log_debug!(
                    self.logger,
                    Facility::Manager,
                    &format!("Route {} withdrawn", route)
                );
            }
        }
    }

    /// Pull the full route list from the directory and reconcile
    pub fn sync_routes(&self) {
        let current: HashSet<McastRoute> = self.services.mcast_routes.routes().into_iter().collect();

        let known: Vec<McastRoute> = {
            let routes = lock(&self.routes);
            routes
                .bindings
                .keys()
                .chain(routes.unresolved.iter())
                .copied()
                .collect()
        };

        for route in known.iter().filter(|r| !current.contains(r)) {
            self.handle_route_event(&RouteEvent::Removed(*route));
        }
        for route in &current {
            self.handle_route_event(&RouteEvent::Added(*route));
        }
    }

    /// Bind `route` to an engine, or park it as unresolved. The caller holds
    /// the route table for the whole call.
    fn bind_route(&self, routes: &mut RouteTable, route: &McastRoute) -> bool {
        let resolved = binding::resolve(&self.services, &self.logger, route, |ap| {
            self.has_engine(ap)
        });

        let engine = resolved
            .as_ref()
            .and_then(|b| self.engine(&b.attachment_point));

        match (resolved, engine) {
            (Some(binding), Some(engine)) => {
                lock(&engine).add_route(*route, binding.next_hop, binding.next_hop_mac);
                routes.unresolved.remove(route);
                routes.bindings.insert(*route, binding);
                true
            }
            _ => {
                routes.unresolved.insert(*route);
                false
            }
        }
    }

    /// Try to bind every unresolved route again
    pub fn retry_unresolved(&self) -> usize {
        let mut routes = lock(&self.routes);
        let pending: Vec<McastRoute> = routes.unresolved.iter().copied().collect();
        pending
            .iter()
            .filter(|route| self.bind_route(&mut routes, route))
            .count()
    }

    pub fn binding(&self, route: &McastRoute) -> Option<RouteBinding> {
        lock(&self.routes).bindings.get(route).cloned()
    }

    pub fn unresolved_routes(&self) -> Vec<McastRoute> {
        lock(&self.routes).unresolved.iter().copied().collect()
    }

    fn forward_intents(&self, attachment_point: &AttachmentPoint, intents: &[JoinPruneIntent]) {
        for intent in intents {
            self.services
                .mcast_routes
                .join_prune(attachment_point, intent);
        }
    }

    /// Inbound entry point for raw link-layer frames
    pub fn on_frame_received(&self, attachment_point: &AttachmentPoint, frame: &[u8]) {
        if !is_pim_frame(frame) {
            return;
        }

        let Some(engine) = self.engine(attachment_point) else {
            log_debug!(
                self.logger,
                Facility::Manager,
                &format!("PIM frame on {} without an engine", attachment_point)
            );
            return;
        };

        let decoded = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                log_warning!(
                    self.logger,
                    Facility::Codec,
                    &format!("Dropping PIM frame on {}: {}", attachment_point, e)
                );
                return;
            }
        };

        match decoded.header.msg_type {
            PIM_HELLO => lock(&engine).process_hello(&decoded),
            PIM_JOIN_PRUNE => {
                let intents = lock(&engine).process_join_prune(&decoded);
                self.forward_intents(attachment_point, &intents);
            }
            _ => log_debug!(
                self.logger,
                Facility::Manager,
                &format!(
                    "Ignoring PIM {} from {} on {}",
                    decoded.header.type_name(),
                    decoded.src_ip,
                    attachment_point
                )
            ),
        }
    }

    /// Hello sweep. Returns the number of Hellos sent.
    pub fn send_hellos(&self) -> usize {
        self.engine_handles()
            .into_iter()
            .filter(|(_, engine)| lock(engine).send_hello())
            .count()
    }

    /// Neighbor and downstream-state expiry sweep
    pub fn check_neighbor_timeouts(&self) {
        for (ap, engine) in self.engine_handles() {
            let intents = lock(&engine).check_neighbor_timeouts();
            self.forward_intents(&ap, &intents);
        }
    }

    /// Join refresh sweep; also retries unresolved routes.
    /// Returns the number of Joins sent.
    pub fn send_joins(&self) -> usize {
        let sent: usize = self
            .engine_handles()
            .into_iter()
            .map(|(_, engine)| lock(&engine).send_joins())
            .sum();
        self.retry_unresolved();
        sent
    }

    /// Diagnostic view of every engine, ordered by interface name
    pub fn neighbors_snapshot(&self) -> Vec<EngineSnapshot> {
        let mut snapshots: Vec<EngineSnapshot> = self
            .engine_handles()
            .into_iter()
            .map(|(_, engine)| lock(&engine).snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.interface.cmp(&b.interface));
        snapshots
    }

    /// Stop every engine
    pub fn shutdown(&self) {
        let aps: Vec<AttachmentPoint> = self
            .engine_handles()
            .into_iter()
            .map(|(ap, _)| ap)
            .collect();
        for ap in aps {
            self.remove_engine(&ap);
        }
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = lock(&self.routes);
        f.debug_struct("EngineManager")
            .field("engines", &self.engine_count())
            .field("bindings", &routes.bindings.len())
            .field("unresolved", &routes.unresolved.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Severity;
    use crate::testing::TestEnvironment;

    fn manager(env: &TestEnvironment) -> (EngineManager, Arc<crate::logging::MemorySink>) {
        let (logger, sink) = Logger::memory();
        (EngineManager::new(env.services(), logger), sink)
    }

    #[test]
    fn test_disabled_config_removes_engine() {
        let env = TestEnvironment::new();
        let (mgr, _) = manager(&env);
        let info = env.add_interface("eth0", 1, "10.0.0.1/24", None);

        assert!(mgr.create_or_update_engine(&InterfaceConfig::new("eth0")).is_some());
        assert!(mgr.engine(&info.attachment_point).is_some());

        let mut disabled = InterfaceConfig::new("eth0");
        disabled.enabled = false;
        assert!(mgr.create_or_update_engine(&disabled).is_none());
        assert!(mgr.engine(&info.attachment_point).is_none());
        assert!(mgr.pending_interfaces().is_empty());
    }

    #[test]
    fn test_update_keeps_engine_identity() {
        let env = TestEnvironment::new();
        let (mgr, _) = manager(&env);
        env.add_interface("eth0", 1, "10.0.0.1/24", None);

        let first = mgr.create_or_update_engine(&InterfaceConfig::new("eth0")).unwrap();
        let genid = lock(&first).generation_id();

        let mut config = InterfaceConfig::new("eth0");
        config.priority = Some(50);
        let second = mgr.create_or_update_engine(&config).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock(&second).generation_id(), genid);
        assert_eq!(lock(&second).params().priority, 50);
    }

    #[test]
    fn test_address_change_replaces_engine() {
        let env = TestEnvironment::new();
        let (mgr, _) = manager(&env);
        env.add_interface("eth0", 1, "10.0.0.1/24", None);
        let first = mgr.create_or_update_engine(&InterfaceConfig::new("eth0")).unwrap();

        let info = env.add_interface("eth0", 1, "10.0.0.5/24", None);
        mgr.handle_interface_event(&InterfaceEvent::Updated(info.clone()));

        let second = mgr.engine(&info.attachment_point).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(
            lock(&second).local_address(),
            "10.0.0.5".parse::<std::net::Ipv4Addr>().unwrap()
        );
    }

    #[test]
    fn test_unknown_attachment_point_is_dropped_quietly() {
        let env = TestEnvironment::new();
        let (mgr, sink) = manager(&env);
        let other = crate::testing::interface_info("eth9", 9, "10.9.0.1/24", None);
        let frame = crate::pim::frame::build_hello(
            &LinkAddress {
                mac: other.mac,
                ip: "10.9.0.2".parse().unwrap(),
                vlan: None,
            },
            &crate::protocols::pim::PimHelloBuilder::new(105, 1, 1),
        )
        .unwrap();

        mgr.on_frame_received(&other.attachment_point, &frame);
        assert!(sink.contains(Severity::Debug, "without an engine"));
        assert!(!sink.contains(Severity::Warning, ""));
    }

    #[test]
    fn test_non_pim_frame_is_silent() {
        let env = TestEnvironment::new();
        let (mgr, sink) = manager(&env);
        let info = env.add_interface("eth0", 1, "10.0.0.1/24", None);
        mgr.create_or_update_engine(&InterfaceConfig::new("eth0"));
        sink.clear();

        let mut arp = vec![0u8; 42];
        arp[12] = 0x08;
        arp[13] = 0x06;
        mgr.on_frame_received(&info.attachment_point, &arp);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_shutdown_sends_goodbyes() {
        let env = TestEnvironment::new();
        let (mgr, _) = manager(&env);
        env.add_interface("eth0", 1, "10.0.0.1/24", None);
        env.add_interface("eth1", 2, "10.0.1.1/24", None);
        mgr.apply_config(&PimConfig {
            interfaces: vec![InterfaceConfig::new("eth0"), InterfaceConfig::new("eth1")],
            ..PimConfig::default()
        });
        assert_eq!(mgr.engine_count(), 2);

        mgr.shutdown();
        assert_eq!(mgr.engine_count(), 0);
        assert_eq!(env.transport.frames().len(), 2);
    }
}
