// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing a single Mach-O slice: page hashing, CodeDirectory population,
//! and SuperBlob assembly.

use crate::code_directory::{
    clamp_code_limit, CodeDirectoryBlob, CodeSignatureFlags, ExecutableSegmentFlags,
};
use crate::code_hash::{paged_hashes, sha256, CS_PAGE_SIZE};
use crate::embedded_signature::{
    create_superblob, Blob, CodeSigningSlot, EntitlementsBlob, RequirementsBlob, SignatureBlob,
};
use crate::error::{AdhocSignError, Result};
use crate::macho::MachOSlice;
use crate::settings::SigningSettings;
use goblin::mach::header::MH_EXECUTE;
use goblin::mach::MachO;
use log::info;
use std::collections::BTreeMap;

/// Builds the embedded signature SuperBlob for one architecture slice.
///
/// `slice_data` is the raw bytes of just this slice (offset 0 within it is
/// the slice's own Mach-O header), matching what the allocator coordinator
/// re-parses after staging.
pub fn sign_slice(
    macho: &MachO,
    slice_data: &[u8],
    settings: &SigningSettings,
) -> Result<Vec<u8>> {
    let identifier = settings
        .identifier
        .clone()
        .ok_or(AdhocSignError::NoIdentifier)?;

    let flags = CodeSignatureFlags::ADHOC;
    let mut exec_seg_flags = ExecutableSegmentFlags::empty();

    if macho.header.filetype == MH_EXECUTE {
        exec_seg_flags |= ExecutableSegmentFlags::MAIN_BINARY;
    }

    // A slice without __TEXT (e.g. MH_KEXT_BUNDLE, MH_PRELOAD) is still
    // signed; exec_seg_base/exec_seg_limit are simply left at 0.
    let (exec_seg_base, exec_seg_limit) = macho.text_segment_range().unwrap_or((0, 0));

    let limit = macho.code_limit_offset(slice_data.len() as u64);
    let (code_limit, code_limit_64) = clamp_code_limit(limit);

    info!(
        "hashing {} bytes of code in {} byte pages",
        limit, CS_PAGE_SIZE
    );
    let code_hashes = paged_hashes(&slice_data[..limit as usize], CS_PAGE_SIZE);

    let requirements = RequirementsBlob;
    let requirements_bytes = requirements.to_blob_bytes()?;

    let mut special_hashes = BTreeMap::new();
    special_hashes.insert(u32::from(CodeSigningSlot::Requirements), sha256(&requirements_bytes));

    let mut extra_blobs = vec![(CodeSigningSlot::Requirements, requirements_bytes)];

    if let Some(entitlements_xml) = &settings.entitlements_xml {
        let blob = EntitlementsBlob::new(entitlements_xml.clone());
        let bytes = blob.to_blob_bytes()?;
        special_hashes.insert(u32::from(CodeSigningSlot::Entitlements), sha256(&bytes));
        extra_blobs.push((CodeSigningSlot::Entitlements, bytes));
    }

    let code_directory = CodeDirectoryBlob {
        flags,
        code_limit,
        code_limit_64,
        exec_seg_base,
        exec_seg_limit,
        exec_seg_flags,
        identifier,
        special_hashes,
        code_hashes,
    };

    info!(
        "code directory: {} code hashes, {} special hashes",
        code_directory.code_hashes.len(),
        code_directory.special_hashes.len()
    );

    let mut blobs = vec![(
        CodeSigningSlot::CodeDirectory,
        code_directory.to_blob_bytes()?,
    )];
    blobs.extend(extra_blobs);
    blobs.push((CodeSigningSlot::Signature, SignatureBlob.to_blob_bytes()?));

    create_superblob(blobs.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::parse_slices;

    // A minimal thin 64-bit Mach-O with one empty __TEXT segment and no
    // existing signature, enough to exercise the signer's code path.
    fn build_test_macho(code_size: usize) -> Vec<u8> {
        use scroll::IOwrite;
        use std::io::Cursor;

        const MH_MAGIC_64: u32 = 0xfeed_facf;
        const LC_SEGMENT_64: u32 = 0x19;
        const CPU_TYPE_ARM64: u32 = 0x0100_000c;

        let text_cmdsize = 72u32; // SegmentCommand64 with 0 sections
        let ncmds = 1u32;
        let sizeofcmds = text_cmdsize;
        let header_size = 32usize;

        let mut cursor = Cursor::new(Vec::new());
        cursor.iowrite_with(MH_MAGIC_64, scroll::LE).unwrap();
        cursor.iowrite_with(CPU_TYPE_ARM64, scroll::LE).unwrap();
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // cpusubtype
        cursor.iowrite_with(2u32, scroll::LE).unwrap(); // MH_EXECUTE
        cursor.iowrite_with(ncmds, scroll::LE).unwrap();
        cursor.iowrite_with(sizeofcmds, scroll::LE).unwrap();
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // flags
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // reserved

        let mut segname = [0u8; 16];
        segname[..5].copy_from_slice(b"__TEXT");
        cursor.iowrite_with(LC_SEGMENT_64, scroll::LE).unwrap();
        cursor.iowrite_with(text_cmdsize, scroll::LE).unwrap();
        std::io::Write::write_all(&mut cursor, &segname[..16]).unwrap();
        cursor.iowrite_with(0u64, scroll::LE).unwrap(); // vmaddr
        cursor.iowrite_with(code_size as u64, scroll::LE).unwrap(); // vmsize
        cursor.iowrite_with(0u64, scroll::LE).unwrap(); // fileoff
        cursor.iowrite_with(code_size as u64, scroll::LE).unwrap(); // filesize
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // maxprot
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // initprot
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // nsects
        cursor.iowrite_with(0u32, scroll::LE).unwrap(); // flags

        let mut data = cursor.into_inner();
        assert_eq!(data.len(), header_size + text_cmdsize as usize);
        data.resize(code_size.max(data.len()), 0);
        data
    }

    #[test]
    fn signs_thin_executable_with_expected_code_hash_count() {
        let data = build_test_macho(8192);
        let slices = parse_slices(&data).unwrap();
        assert_eq!(slices.len(), 1);

        let settings = SigningSettings {
            identifier: Some("hello".to_string()),
            ..Default::default()
        };

        let superblob = sign_slice(&slices[0].macho, slices[0].data, &settings).unwrap();

        assert_eq!(&superblob[0..4], &0xfade_0cc0u32.to_be_bytes());
        let count = u32::from_be_bytes(superblob[8..12].try_into().unwrap());
        assert_eq!(count, 3); // CodeDirectory, Requirements, Signature
    }
}
