//! ST 2110 uncompressed media streaming core: transmit pacing, receive
//! reassembly, and the PTP-synchronised epoch clock that drives both (spec
//! §1).
//!
//! Sample CLI applications, the `.json` plugin config loader's dynamic
//! loading step, ST 2110-22 codec plugins, ST 2110-30/40 session managers,
//! SIMD pixel-conversion kernels, and ARP/IGMP/KNI/hugepage helpers are left
//! to external collaborators; this crate only exposes the interfaces they
//! plug into (spec §1).
//!
//! SPDX-License-Identifier: MPL-2.0

pub mod clock;
pub mod config;
pub mod converter;
pub mod dma;
pub mod ebu;
pub mod error;
pub mod formats;
pub mod nic;
pub mod rtp;
pub mod sched;
pub mod session;

pub use error::{ErrorCode, Result, St2110Error};

use std::sync::Arc;

use config::InitConfig;

/// The top-level library handle. Every global-looking resource (PTP clock,
/// DMA pool, NIC ports, session managers) is owned here rather than as a
/// process-wide static, per spec §9: "model each as an owned singleton
/// inside the top-level library handle; all references flow through this
/// handle."
pub struct St2110Core {
    config: InitConfig,
    clock: Arc<clock::EpochClock>,
    dma_pool: dma::DmaPool,
    ports: Vec<nic::NicPort>,
    tx_sessions: session::SessionManager,
    rx_sessions: session::SessionManager,
}

/// DMA channels and their lender fan-out, sized conservatively for a single
/// host; concrete deployments may want to size this from the init config's
/// lcore mask instead.
const DEFAULT_DMA_CHANNELS: usize = 2;
const DEFAULT_DMA_MAX_SHARED: usize = 8;
const DEFAULT_DMA_RING_CAPACITY: u16 = 128;

impl St2110Core {
    /// Builds the handle and brings up a TSC-calibrated clock. The clock is
    /// not yet PTP-synced; sessions created before the first SYNC exchange
    /// fail to pace (spec §4.1 `PtpNotSynced`).
    pub fn new(config: InitConfig) -> Self {
        let clock = Arc::new(clock::EpochClock::calibrate_from_system_clock());
        let link_speed_mbps = 25_000; // conservative default; real deployments query the NIC.
        let ports = config
            .ports
            .iter()
            .enumerate()
            .map(|(i, _)| nic::NicPort::new(i as u16, link_speed_mbps, 8, 8))
            .collect();

        let scheduler_budgets_bps = vec![link_speed_mbps as u64 * 1_000_000; config.lcore_mask.len().max(1)];

        St2110Core {
            dma_pool: dma::DmaPool::new(DEFAULT_DMA_CHANNELS, DEFAULT_DMA_MAX_SHARED, DEFAULT_DMA_RING_CAPACITY),
            ports,
            tx_sessions: session::SessionManager::new(config.max_tx_sessions, &scheduler_budgets_bps),
            rx_sessions: session::SessionManager::new(config.max_rx_sessions, &scheduler_budgets_bps),
            config,
            clock,
        }
    }

    pub fn clock(&self) -> Arc<clock::EpochClock> {
        self.clock.clone()
    }

    pub fn config(&self) -> &InitConfig {
        &self.config
    }

    pub fn dma_pool_mut(&mut self) -> &mut dma::DmaPool {
        &mut self.dma_pool
    }

    pub fn port_mut(&mut self, idx: usize) -> Option<&mut nic::NicPort> {
        self.ports.get_mut(idx)
    }

    pub fn tx_sessions(&self) -> &session::SessionManager {
        &self.tx_sessions
    }

    pub fn rx_sessions(&self) -> &session::SessionManager {
        &self.rx_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_starts_unsynced_and_owns_one_port_per_config_entry() {
        let mut config = InitConfig::default();
        config.ports.push(config::PortConfig {
            port: "0000:af:00.0".into(),
            source_ip: "192.168.0.2".parse().unwrap(),
            pmd: config::PmdType::Auto,
            header_split_queues: 0,
        });

        let mut core = St2110Core::new(config);
        assert!(!core.clock().is_synced());
        assert!(core.port_mut(0).is_some());
        assert!(core.port_mut(1).is_none());
    }
}
