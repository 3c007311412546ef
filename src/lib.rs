// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ad-hoc Mach-O code signing in pure Rust.
//!
//! This crate generates and embeds ad-hoc code signatures into Mach-O
//! executables and universal binaries in the format Apple's loader
//! expects, without requiring a signing identity or an Apple operating
//! system.
//!
//! # Getting started
//!
//! [allocator::codesign] signs a binary in place (or to a new path),
//! handling both thin and fat/universal Mach-O files. [reader] exposes
//! the read-only query operations ([reader::requires_signature],
//! [reader::show_arch], [reader::show_size], [reader::generate],
//! [reader::verify_signature]) that don't rewrite anything.
//!
//! # What this crate does not do
//!
//! It does not perform identity-based cryptographic signing (only
//! ad-hoc "`-`" signing), does not encode DER entitlements, does not
//! validate a signature beyond checking that a `LC_CODE_SIGNATURE`
//! load command exists, and does not sign bundles, frameworks, or DMGs.

pub mod allocator;
pub mod code_directory;
pub mod code_hash;
pub mod embedded_signature;
pub mod error;
pub mod macho;
pub mod reader;
pub mod settings;
pub mod signer;

pub use error::{AdhocSignError, Result};
pub use settings::SigningSettings;
