// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Survey Engines
//!
//! - [`sync`] - inventory sync and reconciliation sweep
//! - [`eligibility`] - per-user eligibility cache and best-bid selection
//! - [`session`] - session start, callback verification and settlement

pub mod eligibility;
pub mod session;
pub mod sync;

pub use eligibility::{EligibilityCache, EligibilityError, EligibilityResult};
pub use session::{SessionError, SessionOrchestrator, StartedSession};
pub use sync::{InventorySyncEngine, SyncError, SyncSummary};
