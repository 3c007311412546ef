// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing configuration collected from the CLI.
//!
//! Trimmed relative to a general-purpose signer's settings: there is no
//! certificate, private key, team ID, or notarization configuration here,
//! since this system only ever produces ad-hoc signatures.

/// Parameters controlling how a single `sign` invocation behaves.
#[derive(Debug, Default, Clone)]
pub struct SigningSettings {
    /// Identifier string embedded in the CodeDirectory. Falls back to the
    /// input file's name when unset by the caller.
    pub identifier: Option<String>,

    /// Raw entitlements plist XML, if `--entitlements` was given. Treated
    /// as an opaque byte string; never parsed.
    pub entitlements_xml: Option<Vec<u8>>,

    /// Re-sign even if the binary already carries a code signature.
    pub force: bool,

    /// Overrides the `codesign_allocate` binary to invoke. Falls back to
    /// the `CODESIGN_ALLOCATE` environment variable, then to resolving
    /// `codesign_allocate` on `PATH`.
    pub allocator_path: Option<std::path::PathBuf>,
}
