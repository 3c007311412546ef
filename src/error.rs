// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for ad-hoc Mach-O code signing.
#[derive(Debug, Error)]
pub enum AdhocSignError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument: {0}")]
    CliBadArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary parsing error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("data structure parse error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("input is not a Mach-O file (magic {0:#010x})")]
    NotMachO(u32),

    #[error("invalid Mach-O binary: {0}")]
    InvalidBinary(String),

    #[error("unable to locate __LINKEDIT segment")]
    MissingLinkedit,

    #[error("__LINKEDIT isn't the final Mach-O segment")]
    LinkeditNotLast,

    #[error("bad header magic in {0}")]
    BadMagic(&'static str),

    #[error("SuperBlob data is malformed")]
    SuperblobMalformed,

    #[error("no identifier string provided and binary has none to inherit")]
    NoIdentifier,

    #[error("file is already signed; pass --force to re-sign")]
    AlreadySigned,

    #[error("cannot inject signature without a LC_CODE_SIGNATURE load command")]
    MissingCodeSignatureCommand,

    #[error("allocated signature region too small: needed {needed} bytes, got {available}")]
    AllocatedSizeTooSmall { needed: u64, available: u64 },

    #[error("unknown architecture for cpu type {0:#010x}/{1:#010x}")]
    UnknownArchitecture(u32, u32),

    #[error("failed to locate {0} executable; set CODESIGN_ALLOCATE or install it on PATH")]
    AllocatorNotFound(String),

    #[error("allocator process {0} exited with status {1}")]
    AllocatorExitedNonZero(String, i32),

    #[error("only ad-hoc signing (-s -) is supported; identity-based signing is not implemented")]
    UnsupportedIdentity,

    #[error("functionality not implemented: {0}")]
    Unimplemented(&'static str),
}

pub type Result<T> = std::result::Result<T, AdhocSignError>;
