// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Periodic sweeps and the inbound frame loop
//!
//! Three independent tokio tasks drive the engine manager:
//!
//! | Sweep | Default tick | Action |
//! |-------|--------------|--------|
//! | hello | 1 s | `EngineManager::send_hellos` |
//! | timeout | 250 ms | `EngineManager::check_neighbor_timeouts` |
//! | join | 5 s | `EngineManager::send_joins` |
//!
//! Ticks only poll; each engine decides from its own timestamps whether
//! anything is due. All tasks stop when the shutdown watch flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::manager::EngineManager;
use crate::config::PimConfig;
use crate::logging::{Facility, Logger};
use crate::services::AttachmentPoint;
use crate::{log_debug, log_info};

/// Sweep periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepIntervals {
    pub hello: Duration,
    pub timeout: Duration,
    pub join: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self::from(&PimConfig::default())
    }
}

impl From<&PimConfig> for SweepIntervals {
    fn from(config: &PimConfig) -> Self {
        Self {
            hello: config.hello_tick(),
            timeout: config.timeout_tick(),
            join: config.join_tick(),
        }
    }
}

/// A raw frame pushed by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub attachment_point: AttachmentPoint,
    pub data: Vec<u8>,
}

/// Running sweep tasks
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Shutdown signal shared with the sweeps, for other loops to follow
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signal every task and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Spawn the hello, timeout and join sweeps on the current runtime
pub fn start(manager: Arc<EngineManager>, intervals: SweepIntervals, logger: Logger) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = vec![
        spawn_sweep(
            "hello",
            intervals.hello,
            Arc::clone(&manager),
            shutdown_rx.clone(),
            logger.clone(),
            |m| {
                m.send_hellos();
            },
        ),
        spawn_sweep(
            "timeout",
            intervals.timeout,
            Arc::clone(&manager),
            shutdown_rx.clone(),
            logger.clone(),
            |m| m.check_neighbor_timeouts(),
        ),
        spawn_sweep(
            "join",
            intervals.join,
            manager,
            shutdown_rx,
            logger.clone(),
            |m| {
                m.send_joins();
            },
        ),
    ];

    log_info!(
        logger,
        Facility::Scheduler,
        &format!(
            "Sweeps started (hello {:?}, timeout {:?}, join {:?})",
            intervals.hello, intervals.timeout, intervals.join
        )
    );

    SchedulerHandle { shutdown_tx, tasks }
}

fn spawn_sweep<F>(
    name: &'static str,
    period: Duration,
    manager: Arc<EngineManager>,
    mut shutdown_rx: watch::Receiver<bool>,
    logger: Logger,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn(&EngineManager) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => sweep(&manager),
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        log_debug!(
            logger,
            Facility::Scheduler,
            &format!("{} sweep stopped", name)
        );
    })
}

/// Feed frames from `frames` into the manager until the channel closes or
/// shutdown is signalled
pub async fn run_receiver(
    manager: Arc<EngineManager>,
    mut frames: mpsc::Receiver<InboundFrame>,
    mut shutdown_rx: watch::Receiver<bool>,
    logger: Logger,
) {
    log_debug!(logger, Facility::Scheduler, "Frame receiver started");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => manager.on_frame_received(&frame.attachment_point, &frame.data),
                None => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    log_debug!(logger, Facility::Scheduler, "Frame receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceConfig;
    use crate::pim::frame::{build_hello, LinkAddress};
    use crate::protocols::pim::PimHelloBuilder;
    use crate::testing::TestEnvironment;

    fn setup() -> (TestEnvironment, Arc<EngineManager>, AttachmentPoint) {
        let env = TestEnvironment::new();
        let (logger, _) = Logger::memory();
        let info = env.add_interface("eth0", 1, "10.0.0.1/24", None);
        let manager = Arc::new(EngineManager::new(env.services(), logger));
        manager.create_or_update_engine(&InterfaceConfig::new("eth0"));
        (env, manager, info.attachment_point)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_sweep_respects_engine_interval() {
        let (env, manager, _) = setup();
        let (logger, _) = Logger::memory();
        let handle = start(Arc::clone(&manager), SweepIntervals::default(), logger);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(env.transport.frames().len(), 1);

        env.clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(env.transport.frames().len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeps() {
        let (env, manager, _) = setup();
        let (logger, _) = Logger::memory();
        let handle = start(Arc::clone(&manager), SweepIntervals::default(), logger);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;

        let before = env.transport.frames().len();
        env.clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(env.transport.frames().len(), before);
    }

    #[tokio::test]
    async fn test_receiver_dispatches_frames() {
        let (_env, manager, ap) = setup();
        let (logger, _) = Logger::memory();
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let peer = LinkAddress {
            mac: pnet::util::MacAddr::new(2, 0, 0, 0, 0, 2),
            ip: "10.0.0.2".parse().unwrap(),
            vlan: None,
        };
        let data = build_hello(&peer, &PimHelloBuilder::new(105, 1, 9)).unwrap();
        tx.send(InboundFrame {
            attachment_point: ap.clone(),
            data,
        })
        .await
        .unwrap();
        drop(tx);

        run_receiver(Arc::clone(&manager), rx, shutdown_rx, logger).await;

        let engine = manager.engine(&ap).unwrap();
        let engine = engine.lock().unwrap();
        assert_eq!(engine.neighbor_count(), 2);
        assert_eq!(engine.dr(), peer.ip);
    }
}
