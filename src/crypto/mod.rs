// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptographic primitives: the credential vault and Ed25519 signing.

pub mod signing;
pub mod vault;

pub use signing::{generate_key_pair, public_key_for, sign, verify, KeyPair, SigningError};
pub use vault::{CredentialVault, VaultError};
