//! Shared application state and global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use axum::extract::State;

use sqlpulse_core::Monitor;

/// The monitor is immutable configuration; every request opens its own
/// connection, so no lock is needed around it.
pub(crate) type SharedMonitor<C> = Arc<Monitor<C>>;

pub(crate) type AppState<C> = State<SharedMonitor<C>>;
