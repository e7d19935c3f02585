// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Survey Partner Server - Partner Integration Engine
//!
//! This crate connects a survey marketplace partner to the platform: it
//! mirrors the partner's survey inventory, matches users to surveys, issues
//! signed entry links and settles signed completion callbacks into user
//! wallets.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `crypto` - Credential vault and Ed25519 key signer
//! - `partner` - Partner API client, URL signing and provisioning
//! - `surveys` - Inventory sync, eligibility cache and session orchestration
//! - `scheduler` - Periodic sync, job-log housekeeping and credit backfill
//! - `storage` - Storage ports and the redb adapter

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod partner;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod surveys;
