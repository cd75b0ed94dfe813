//! Background jobs for TENDER.
//!
//! - `tick`: drives deadlines, heartbeat expiry and announcement pruning
//!
//! # Usage
//!
//! ```ignore
//! use tender_alloc::jobs::allocation_tick_task;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(allocation_tick_task(Arc::clone(&coordinator), config, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod tick;

pub use tick::allocation_tick_task;
