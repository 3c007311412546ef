// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mach-O and fat binary parsing.
//!
//! This module locates architecture slices within thin or universal Mach-O
//! files and answers the structural questions the signer and allocator
//! coordinator need: where `__TEXT` and `__LINKEDIT` live, whether a
//! `LC_CODE_SIGNATURE` command is already present, and how many bytes of
//! the file are covered by code (as opposed to the signature region).

use crate::error::{AdhocSignError, Result};
use goblin::mach::constants::{SEG_LINKEDIT, SEG_TEXT};
use goblin::mach::header::{
    MH_BUNDLE, MH_DYLIB, MH_DYLINKER, MH_EXECUTE, MH_KEXT_BUNDLE, MH_PRELOAD,
};
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};

/// Mask applied to `cpusubtype` before comparison or naming; the high byte
/// carries capability bits (e.g. `CPU_SUBTYPE_LIB64`) unrelated to identity.
pub const CPU_SUBTYPE_MASK: u32 = 0xff000000;

pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_SUBTYPE_X86_64_H: u32 = 8;
pub const CPU_SUBTYPE_ARM64_E: u32 = 2;

/// Masks off the capability bits of a cpusubtype value.
pub fn normalize_subtype(subtype: u32) -> u32 {
    subtype & !CPU_SUBTYPE_MASK
}

/// Maps a masked `(cputype, cpusubtype)` pair to the name `codesign -v` prints.
pub fn architecture_name(cputype: u32, cpusubtype: u32) -> Result<&'static str> {
    let subtype = normalize_subtype(cpusubtype);

    match (cputype, subtype) {
        (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H) => Ok("x86_64h"),
        (CPU_TYPE_X86_64, _) => Ok("x86_64"),
        (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_E) => Ok("arm64e"),
        (CPU_TYPE_ARM64, _) => Ok("arm64"),
        _ => Err(AdhocSignError::UnknownArchitecture(cputype, cpusubtype)),
    }
}

/// Extension methods for a parsed Mach-O slice, mirroring the queries the
/// signer and allocator coordinator need from a single architecture image.
pub trait MachOSlice {
    fn requires_signature(&self) -> bool;

    fn linkedit_range(&self) -> Result<(usize, usize)>;

    fn text_segment_range(&self) -> Option<(u64, u64)>;

    fn code_signature_data_offset(&self) -> Option<(u64, u64)>;

    /// Byte offset at which code digests stop: the start of the existing
    /// signature region if present, otherwise the slice length.
    fn code_limit_offset(&self, slice_size: u64) -> u64;

    /// Validates the invariants the allocator coordinator relies on: a
    /// `__LINKEDIT` segment exists and is the last segment in the file.
    fn check_signing_capability(&self) -> Result<()>;
}

impl<'a> MachOSlice for MachO<'a> {
    fn requires_signature(&self) -> bool {
        matches!(
            self.header.filetype,
            MH_EXECUTE | MH_PRELOAD | MH_DYLIB | MH_DYLINKER | MH_BUNDLE | MH_KEXT_BUNDLE
        )
    }

    fn linkedit_range(&self) -> Result<(usize, usize)> {
        for segment in &self.segments {
            if matches!(segment.name(), Ok(SEG_LINKEDIT)) {
                return Ok((segment.fileoff as usize, segment.filesize as usize));
            }
        }

        Err(AdhocSignError::MissingLinkedit)
    }

    fn text_segment_range(&self) -> Option<(u64, u64)> {
        for segment in &self.segments {
            if matches!(segment.name(), Ok(SEG_TEXT)) {
                return Some((segment.fileoff, segment.fileoff + segment.filesize));
            }
        }

        None
    }

    fn code_signature_data_offset(&self) -> Option<(u64, u64)> {
        for command in &self.load_commands {
            if let CommandVariant::CodeSignature(cmd) = &command.command {
                return Some((cmd.dataoff as u64, cmd.datasize as u64));
            }
        }

        None
    }

    fn code_limit_offset(&self, slice_size: u64) -> u64 {
        match self.code_signature_data_offset() {
            Some((data_offset, _)) => data_offset,
            None => slice_size,
        }
    }

    fn check_signing_capability(&self) -> Result<()> {
        let (linkedit_start, _) = self.linkedit_range()?;

        let max_other_segment_end = self
            .segments
            .iter()
            .filter(|segment| !matches!(segment.name(), Ok(SEG_LINKEDIT)))
            .map(|segment| segment.fileoff + segment.filesize)
            .max()
            .unwrap_or(0);

        if (linkedit_start as u64) < max_other_segment_end {
            return Err(AdhocSignError::LinkeditNotLast);
        }

        Ok(())
    }
}

/// One architecture slice together with the raw bytes backing it.
pub struct Slice<'a> {
    pub offset: usize,
    pub data: &'a [u8],
    pub macho: MachO<'a>,
}

/// Parses `data` (the full contents of a thin or fat Mach-O file) into its
/// constituent architecture slices.
pub fn parse_slices(data: &[u8]) -> Result<Vec<Slice<'_>>> {
    match Mach::parse(data) {
        Ok(Mach::Binary(macho)) => Ok(vec![Slice {
            offset: 0,
            data,
            macho,
        }]),
        Ok(Mach::Fat(multi_arch)) => {
            let mut slices = Vec::with_capacity(multi_arch.narches);

            for arch in multi_arch.iter_arches() {
                let arch = arch?;
                let offset = arch.offset as usize;
                let end = offset + arch.size as usize;
                let slice_data = &data[offset..end];
                let macho = MachO::parse(slice_data, 0)?;

                slices.push(Slice {
                    offset,
                    data: slice_data,
                    macho,
                });
            }

            Ok(slices)
        }
        Err(goblin::error::Error::BadMagic(magic)) => {
            Err(AdhocSignError::NotMachO(magic as u32))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_mask_strips_capability_bits() {
        assert_eq!(normalize_subtype(CPU_SUBTYPE_X86_64_H | 0x8000_0000), 8);
    }

    #[test]
    fn architecture_names_match_codesign() {
        assert_eq!(architecture_name(CPU_TYPE_X86_64, 3).unwrap(), "x86_64");
        assert_eq!(
            architecture_name(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H).unwrap(),
            "x86_64h"
        );
        assert_eq!(architecture_name(CPU_TYPE_ARM64, 0).unwrap(), "arm64");
        assert_eq!(
            architecture_name(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_E).unwrap(),
            "arm64e"
        );
        assert!(architecture_name(0xdead_beef, 0).is_err());
    }
}
