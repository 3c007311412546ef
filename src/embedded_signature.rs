// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The embedded signature SuperBlob and its constituent blob types.
//!
//! Every multi-byte field in this module's wire format is big-endian,
//! regardless of host endianness; Mach-O code signature data is always
//! written this way.

use crate::error::{AdhocSignError, Result};
use scroll::{IOwrite, Pread};
use std::io::Cursor;

/// Magic numbers for the `CSMAGIC_*` blob family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSigningMagic {
    Requirement,
    RequirementSet,
    CodeDirectory,
    EmbeddedSignature,
    Entitlements,
    BlobWrapper,
    Unknown(u32),
}

impl From<u32> for CodeSigningMagic {
    fn from(v: u32) -> Self {
        match v {
            0xfade_0c00 => Self::Requirement,
            0xfade_0c01 => Self::RequirementSet,
            0xfade_0c02 => Self::CodeDirectory,
            0xfade_0cc0 => Self::EmbeddedSignature,
            0xfade_7171 => Self::Entitlements,
            0xfade_0b01 => Self::BlobWrapper,
            other => Self::Unknown(other),
        }
    }
}

impl From<CodeSigningMagic> for u32 {
    fn from(m: CodeSigningMagic) -> u32 {
        match m {
            CodeSigningMagic::Requirement => 0xfade_0c00,
            CodeSigningMagic::RequirementSet => 0xfade_0c01,
            CodeSigningMagic::CodeDirectory => 0xfade_0c02,
            CodeSigningMagic::EmbeddedSignature => 0xfade_0cc0,
            CodeSigningMagic::Entitlements => 0xfade_7171,
            CodeSigningMagic::BlobWrapper => 0xfade_0b01,
            CodeSigningMagic::Unknown(v) => v,
        }
    }
}

/// Slot indices within a SuperBlob's index and a CodeDirectory's special
/// hash table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodeSigningSlot {
    CodeDirectory,
    Requirements,
    Entitlements,
    Signature,
    Other(u32),
}

impl From<u32> for CodeSigningSlot {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::CodeDirectory,
            2 => Self::Requirements,
            5 => Self::Entitlements,
            0x10000 => Self::Signature,
            other => Self::Other(other),
        }
    }
}

impl From<CodeSigningSlot> for u32 {
    fn from(slot: CodeSigningSlot) -> u32 {
        match slot {
            CodeSigningSlot::CodeDirectory => 0,
            CodeSigningSlot::Requirements => 2,
            CodeSigningSlot::Entitlements => 5,
            CodeSigningSlot::Signature => 0x10000,
            CodeSigningSlot::Other(v) => v,
        }
    }
}

/// A child record in a SuperBlob's index: `{slot type, absolute data offset}`.
#[derive(Debug, Clone, Copy, Pread)]
pub struct BlobIndex {
    pub slot_type: u32,
    pub offset: u32,
}

pub const SIZEOF_BLOB_INDEX: usize = 8;
pub const SIZEOF_SUPERBLOB_HEADER: usize = 12;

/// Common behavior of every blob that can live inside a SuperBlob. `length`
/// must be pure and must equal the number of bytes `emit` writes.
pub trait Blob {
    fn magic(&self) -> CodeSigningMagic;

    /// Total serialized length, including the 8-byte magic+length prefix.
    fn length(&self) -> usize;

    /// Writes this blob's full serialized form (prefix and payload).
    fn emit(&self, out: &mut Vec<u8>) -> Result<()>;

    fn to_blob_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.length());
        self.emit(&mut buf)?;
        Ok(buf)
    }
}

/// An empty code requirement set (slot 2). This system never emits
/// non-empty requirements.
#[derive(Debug, Default, Clone)]
pub struct RequirementsBlob;

impl Blob for RequirementsBlob {
    fn magic(&self) -> CodeSigningMagic {
        CodeSigningMagic::RequirementSet
    }

    fn length(&self) -> usize {
        12
    }

    fn emit(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.length()));
        cursor.iowrite_with(u32::from(self.magic()), scroll::BE)?;
        cursor.iowrite_with(self.length() as u32, scroll::BE)?;
        cursor.iowrite_with(0u32, scroll::BE)?;
        out.extend_from_slice(&cursor.into_inner());
        Ok(())
    }
}

/// Wraps a raw entitlements XML plist (slot 5). Contents are treated as an
/// opaque byte string; this system does not parse or validate the plist.
#[derive(Debug, Clone)]
pub struct EntitlementsBlob {
    pub xml: Vec<u8>,
}

impl EntitlementsBlob {
    pub fn new(xml: Vec<u8>) -> Self {
        Self { xml }
    }
}

impl Blob for EntitlementsBlob {
    fn magic(&self) -> CodeSigningMagic {
        CodeSigningMagic::Entitlements
    }

    fn length(&self) -> usize {
        8 + self.xml.len()
    }

    fn emit(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.length()));
        cursor.iowrite_with(u32::from(self.magic()), scroll::BE)?;
        cursor.iowrite_with(self.length() as u32, scroll::BE)?;
        out.extend_from_slice(&cursor.into_inner());
        out.extend_from_slice(&self.xml);
        Ok(())
    }
}

/// An empty CMS signature wrapper (slot `0x10000`). Ad-hoc signing never
/// produces a cryptographic signature; this blob exists only so the loader
/// finds the slot populated.
#[derive(Debug, Default, Clone)]
pub struct SignatureBlob;

impl Blob for SignatureBlob {
    fn magic(&self) -> CodeSigningMagic {
        CodeSigningMagic::BlobWrapper
    }

    fn length(&self) -> usize {
        8
    }

    fn emit(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.length()));
        cursor.iowrite_with(u32::from(self.magic()), scroll::BE)?;
        cursor.iowrite_with(self.length() as u32, scroll::BE)?;
        out.extend_from_slice(&cursor.into_inner());
        Ok(())
    }
}

/// Assembles a SuperBlob from `(slot, serialized blob bytes)` pairs, in the
/// order given. `dataOffset` for the Nth child equals the header size plus
/// the index size plus the cumulative length of the preceding children.
pub fn create_superblob<'a>(
    children: impl Iterator<Item = &'a (CodeSigningSlot, Vec<u8>)>,
) -> Result<Vec<u8>> {
    let children: Vec<_> = children.collect();

    let index_size = SIZEOF_BLOB_INDEX * children.len();
    let mut data_offset = SIZEOF_SUPERBLOB_HEADER + index_size;
    let total_length = data_offset + children.iter().map(|(_, data)| data.len()).sum::<usize>();

    let mut cursor = Cursor::new(Vec::with_capacity(total_length));
    cursor.iowrite_with(u32::from(CodeSigningMagic::EmbeddedSignature), scroll::BE)?;
    cursor.iowrite_with(total_length as u32, scroll::BE)?;
    cursor.iowrite_with(children.len() as u32, scroll::BE)?;

    for (slot, data) in &children {
        cursor.iowrite_with(u32::from(*slot), scroll::BE)?;
        cursor.iowrite_with(data_offset as u32, scroll::BE)?;
        data_offset += data.len();
    }

    for (_, data) in &children {
        std::io::Write::write_all(&mut cursor, data)?;
    }

    Ok(cursor.into_inner())
}

/// A parsed SuperBlob: enough to answer "does this file already carry a
/// signature" and, for `verifySignature`, nothing more.
pub struct ParsedSuperBlob {
    pub magic: u32,
    pub length: u32,
    pub indices: Vec<BlobIndex>,
}

/// Parses a SuperBlob header and index from raw bytes. Does not descend
/// into child blob payloads; this system's query operations only need the
/// index (for `verifySignature`/diagnostics), not full re-parsing of a
/// previously-produced signature.
pub fn parse_superblob(data: &[u8]) -> Result<ParsedSuperBlob> {
    let magic: u32 = data.pread_with(0, scroll::BE)?;
    if CodeSigningMagic::from(magic) != CodeSigningMagic::EmbeddedSignature {
        return Err(AdhocSignError::SuperblobMalformed);
    }

    let length: u32 = data.pread_with(4, scroll::BE)?;
    let count: u32 = data.pread_with(8, scroll::BE)?;

    if length as usize > data.len() {
        return Err(AdhocSignError::SuperblobMalformed);
    }

    let mut indices = Vec::with_capacity(count as usize);
    let mut offset = SIZEOF_SUPERBLOB_HEADER;

    for _ in 0..count {
        let index: BlobIndex = data.pread_with(offset, scroll::BE)?;
        indices.push(index);
        offset += SIZEOF_BLOB_INDEX;
    }

    Ok(ParsedSuperBlob {
        magic,
        length,
        indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_blob_length_matches_emit() {
        let blob = RequirementsBlob;
        let bytes = blob.to_blob_bytes().unwrap();
        assert_eq!(bytes.len(), blob.length());
        assert_eq!(&bytes[0..4], &0xfade_0c01u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &12u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0u32.to_be_bytes());
    }

    #[test]
    fn entitlements_blob_length_matches_emit() {
        let xml = b"<plist/>".to_vec();
        let blob = EntitlementsBlob::new(xml.clone());
        let bytes = blob.to_blob_bytes().unwrap();
        assert_eq!(bytes.len(), 8 + xml.len());
        assert_eq!(bytes.len(), blob.length());
    }

    #[test]
    fn superblob_index_offsets_are_cumulative() {
        let cd = (CodeSigningSlot::CodeDirectory, vec![0u8; 20]);
        let req = (
            CodeSigningSlot::Requirements,
            RequirementsBlob.to_blob_bytes().unwrap(),
        );
        let sig = (CodeSigningSlot::Signature, SignatureBlob.to_blob_bytes().unwrap());

        let children = vec![cd, req, sig];
        let bytes = create_superblob(children.iter()).unwrap();

        let parsed = parse_superblob(&bytes).unwrap();
        assert_eq!(parsed.indices.len(), 3);
        assert_eq!(parsed.length as usize, bytes.len());

        let header_and_index = SIZEOF_SUPERBLOB_HEADER + SIZEOF_BLOB_INDEX * 3;
        assert_eq!(parsed.indices[0].offset as usize, header_and_index);
        assert_eq!(
            parsed.indices[1].offset as usize,
            header_and_index + children[0].1.len()
        );
        assert_eq!(
            parsed.indices[2].offset as usize,
            header_and_index + children[0].1.len() + children[1].1.len()
        );
    }
}
