//! Shared fixtures for dispatch integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cell_config::CellSettings;
use cell_dispatch::{CellTimer, DispatchCell};
use cell_network::{CellNucleus, LocalCellNucleus, LocalRouter, Mailbox};
use cell_types::{impl_vehicle, PayloadKind, VehicleState, VEHICLE};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);
pub const DOMAIN: &str = "dCacheDomain";

pub const POOL_REQUEST: PayloadKind = PayloadKind::new("test.pool.request", &VEHICLE);
pub const POOL_FETCH: PayloadKind = PayloadKind::new("test.pool.fetch", &POOL_REQUEST);

/// Request to stage a file on a pool
#[derive(Debug, Clone)]
pub struct PoolFetch {
    pub pnfs_id: String,
    pub size: Option<u64>,
    pub state: VehicleState,
}

impl_vehicle!(PoolFetch, &POOL_FETCH, state);

impl PoolFetch {
    pub fn request(pnfs_id: &str) -> Self {
        Self {
            pnfs_id: pnfs_id.to_string(),
            size: None,
            state: VehicleState::requiring_reply(),
        }
    }

    pub fn one_way(pnfs_id: &str) -> Self {
        Self {
            pnfs_id: pnfs_id.to_string(),
            size: None,
            state: VehicleState::new(),
        }
    }

    pub fn answered(&self, size: u64) -> Self {
        let mut reply = self.clone();
        reply.size = Some(size);
        reply
    }
}

/// Initialize tracing for tests (call once per test)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .try_init();
}

/// Plain substrate cell with delivery enabled
pub fn plain_cell(router: &Arc<LocalRouter>, name: &str) -> (LocalCellNucleus, Mailbox) {
    let (nucleus, mailbox) = LocalCellNucleus::attach(router, name).unwrap();
    nucleus.start();
    (nucleus, mailbox)
}

/// Dispatch cell attached to `router`, not yet initialized
pub fn dispatch_cell(
    router: &Arc<LocalRouter>,
    timer: &Arc<CellTimer>,
    settings: CellSettings,
) -> (DispatchCell, LocalCellNucleus, Mailbox) {
    let (nucleus, mailbox) = LocalCellNucleus::attach(router, &settings.cell_name).unwrap();
    let cell = DispatchCell::new(Arc::new(nucleus.clone()), settings, Arc::clone(timer));
    (cell, nucleus, mailbox)
}

/// Initialize `cell` and run its delivery loop in the background
pub fn serve(cell: &DispatchCell, mailbox: Mailbox) -> JoinHandle<()> {
    cell.do_init(|| Ok(())).unwrap();
    assert_eq!(cell.nucleus().cell_name(), cell.settings().cell_name);
    let cell = cell.clone();
    tokio::spawn(async move { cell.serve(mailbox).await })
}
