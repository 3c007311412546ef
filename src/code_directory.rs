// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The CodeDirectory blob: per-page code hashes and the metadata the
//! loader verifies against the mapped image.
//!
//! This system only ever emits the fixed version `0x020400` prelude; the
//! newer, version-gated optional fields (scatter vectors, team
//! identifiers, runtime version, linkage hashes) that later CodeDirectory
//! revisions support are out of scope and are not modeled here.

use crate::embedded_signature::{Blob, CodeSigningMagic};
use crate::error::Result;
use scroll::IOwrite;
use std::collections::BTreeMap;
use std::io::Cursor;

bitflags::bitflags! {
    /// `CS_*` flags stored in the CodeDirectory's `flags` field.
    pub struct CodeSignatureFlags: u32 {
        const HOST = 0x1;
        const ADHOC = 0x2;
        const FORCE_HARD = 0x100;
        const FORCE_KILL = 0x200;
        const FORCE_EXPIRATION = 0x400;
        const RESTRICT = 0x800;
        const ENFORCEMENT = 0x1000;
        const LIBRARY_VALIDATION = 0x2000;
        const RUNTIME = 0x1_0000;
        const LINKER_SIGNED = 0x2_0000;
    }
}

bitflags::bitflags! {
    /// `CS_EXECSEG_*` flags stored in a CodeDirectory's `execSegFlags` field.
    pub struct ExecutableSegmentFlags: u64 {
        const MAIN_BINARY = 0x1;
        const ALLOW_UNSIGNED = 0x10;
        const DEBUGGER = 0x20;
        const JIT = 0x40;
        const SKIP_LIBRARY_VALIDATION = 0x80;
        const CAN_LOAD_CD_HASH = 0x100;
        const CAN_EXEC_CD_HASH = 0x200;
    }
}

/// Fixed `0x020400` CodeDirectory version this system always emits.
pub const CODE_DIRECTORY_VERSION: u32 = 0x0002_0400;

pub const CS_HASHTYPE_SHA256: u8 = 2;
pub const CS_HASH_SIZE_SHA256: u8 = 32;

/// Size in bytes of the fixed-layout prelude preceding the identifier and
/// hash tables. `identOffset` always equals this constant.
pub const CODE_DIRECTORY_PRELUDE_SIZE: usize = 88;

/// log2(4096), the encoding CodeDirectory uses for its page size field.
pub const CODE_DIRECTORY_PAGE_SIZE_LOG2: u8 = 12;

#[derive(Debug, Clone)]
pub struct CodeDirectoryBlob {
    pub flags: CodeSignatureFlags,
    pub code_limit: u32,
    pub code_limit_64: u64,
    pub exec_seg_base: u64,
    pub exec_seg_limit: u64,
    pub exec_seg_flags: ExecutableSegmentFlags,
    pub identifier: String,
    /// Special hash slots, keyed by their 1-based index (2=Requirements,
    /// 5=Entitlements).
    pub special_hashes: BTreeMap<u32, [u8; 32]>,
    pub code_hashes: Vec<[u8; 32]>,
}

impl CodeDirectoryBlob {
    /// `nSpecialSlots` is the highest populated special index, not the
    /// count of populated slots (unpopulated lower indices still occupy
    /// space in the reversed hash table).
    fn n_special_slots(&self) -> u32 {
        self.special_hashes.keys().next_back().copied().unwrap_or(0)
    }

    fn ident_offset(&self) -> usize {
        CODE_DIRECTORY_PRELUDE_SIZE
    }

    fn hash_offset(&self) -> usize {
        self.ident_offset()
            + self.identifier.len()
            + 1
            + 32 * self.n_special_slots() as usize
    }

    pub fn payload_length(&self) -> usize {
        self.hash_offset() + 32 * self.code_hashes.len()
    }
}

impl Blob for CodeDirectoryBlob {
    fn magic(&self) -> CodeSigningMagic {
        CodeSigningMagic::CodeDirectory
    }

    fn length(&self) -> usize {
        8 + self.payload_length()
    }

    fn emit(&self, out: &mut Vec<u8>) -> Result<()> {
        let ident_offset = self.ident_offset();
        let hash_offset = self.hash_offset();
        let n_special_slots = self.n_special_slots();
        let n_code_slots = self.code_hashes.len() as u32;
        let length = self.length();

        let mut cursor = Cursor::new(Vec::with_capacity(length));

        cursor.iowrite_with(u32::from(self.magic()), scroll::BE)?;
        cursor.iowrite_with(length as u32, scroll::BE)?;
        cursor.iowrite_with(CODE_DIRECTORY_VERSION, scroll::BE)?;
        cursor.iowrite_with(self.flags.bits(), scroll::BE)?;
        cursor.iowrite_with(hash_offset as u32, scroll::BE)?;
        cursor.iowrite_with(ident_offset as u32, scroll::BE)?;
        cursor.iowrite_with(n_special_slots, scroll::BE)?;
        cursor.iowrite_with(n_code_slots, scroll::BE)?;
        cursor.iowrite_with(self.code_limit, scroll::BE)?;
        cursor.iowrite_with(CS_HASH_SIZE_SHA256, scroll::BE)?;
        cursor.iowrite_with(CS_HASHTYPE_SHA256, scroll::BE)?;
        cursor.iowrite_with(0u8, scroll::BE)?; // platform
        cursor.iowrite_with(CODE_DIRECTORY_PAGE_SIZE_LOG2, scroll::BE)?;
        cursor.iowrite_with(0u32, scroll::BE)?; // spare2
        cursor.iowrite_with(0u32, scroll::BE)?; // scatterOffset
        cursor.iowrite_with(0u32, scroll::BE)?; // teamOffset
        cursor.iowrite_with(0u32, scroll::BE)?; // spare3
        cursor.iowrite_with(self.code_limit_64, scroll::BE)?;
        cursor.iowrite_with(self.exec_seg_base, scroll::BE)?;
        cursor.iowrite_with(self.exec_seg_limit, scroll::BE)?;
        cursor.iowrite_with(self.exec_seg_flags.bits(), scroll::BE)?;

        debug_assert_eq!(cursor.position() as usize, CODE_DIRECTORY_PRELUDE_SIZE);

        std::io::Write::write_all(&mut cursor, self.identifier.as_bytes())?;
        std::io::Write::write_all(&mut cursor, &[0u8])?;

        for index in (1..=n_special_slots).rev() {
            let hash = self.special_hashes.get(&index).copied().unwrap_or([0u8; 32]);
            std::io::Write::write_all(&mut cursor, &hash)?;
        }

        for hash in &self.code_hashes {
            std::io::Write::write_all(&mut cursor, hash)?;
        }

        out.extend_from_slice(&cursor.into_inner());
        Ok(())
    }
}

/// Computes `(codeLimit, codeLimit64)` per the 32/64-bit clamp rule: a
/// `limit` at or beyond `u32::MAX` is represented in the 64-bit field with
/// `codeLimit` pinned to `u32::MAX`.
pub fn clamp_code_limit(limit: u64) -> (u32, u64) {
    if limit >= u32::MAX as u64 {
        (u32::MAX, limit)
    } else {
        (limit as u32, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cd() -> CodeDirectoryBlob {
        let mut special_hashes = BTreeMap::new();
        special_hashes.insert(2, [0xAAu8; 32]);
        special_hashes.insert(5, [0xBBu8; 32]);

        CodeDirectoryBlob {
            flags: CodeSignatureFlags::ADHOC,
            code_limit: 8192,
            code_limit_64: 0,
            exec_seg_base: 0,
            exec_seg_limit: 0x4000,
            exec_seg_flags: ExecutableSegmentFlags::MAIN_BINARY,
            identifier: "hello".to_string(),
            special_hashes,
            code_hashes: vec![[0x11u8; 32], [0x22u8; 32]],
        }
    }

    #[test]
    fn length_matches_emit_length() {
        let cd = sample_cd();
        let bytes = cd.to_blob_bytes().unwrap();
        assert_eq!(bytes.len(), cd.length());
    }

    #[test]
    fn identifier_is_nul_terminated_at_expected_offset() {
        let cd = sample_cd();
        let bytes = cd.to_blob_bytes().unwrap();
        let ident_offset = CODE_DIRECTORY_PRELUDE_SIZE;
        assert_eq!(
            &bytes[ident_offset..ident_offset + 6],
            b"hello\0"
        );
    }

    #[test]
    fn special_hashes_are_descending_before_hash_offset() {
        let cd = sample_cd();
        let bytes = cd.to_blob_bytes().unwrap();
        let hash_offset = cd.hash_offset();

        // index 1 immediately precedes hash_offset; index 2 precedes that.
        let slot_1 = &bytes[hash_offset - 32..hash_offset];
        let slot_2 = &bytes[hash_offset - 64..hash_offset - 32];
        assert_eq!(slot_1, &[0u8; 32]); // unpopulated
        assert_eq!(slot_2, &[0xAAu8; 32]);
    }

    #[test]
    fn code_hashes_follow_hash_offset_in_order() {
        let cd = sample_cd();
        let bytes = cd.to_blob_bytes().unwrap();
        let hash_offset = cd.hash_offset();

        assert_eq!(&bytes[hash_offset..hash_offset + 32], &[0x11u8; 32]);
        assert_eq!(&bytes[hash_offset + 32..hash_offset + 64], &[0x22u8; 32]);
    }

    #[test]
    fn n_special_slots_is_highest_populated_index() {
        let cd = sample_cd();
        assert_eq!(cd.n_special_slots(), 5);
    }

    #[test]
    fn clamp_below_threshold_uses_32_bit_field() {
        let (limit, limit64) = clamp_code_limit(8192);
        assert_eq!(limit, 8192);
        assert_eq!(limit64, 0);
    }

    #[test]
    fn clamp_at_threshold_uses_64_bit_field() {
        let (limit, limit64) = clamp_code_limit(u32::MAX as u64);
        assert_eq!(limit, u32::MAX);
        assert_eq!(limit64, u32::MAX as u64);
    }
}
