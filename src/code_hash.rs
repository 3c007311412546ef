// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Page hashing.
//!
//! Computes the per-page SHA-256 digests that become a CodeDirectory's code
//! hashes, by chunking a flat byte range the way `codesign` chunks the
//! mapped image up to the signature region.

use ring::digest::{Context, SHA256};

pub const CS_PAGE_SIZE: usize = 4096;

/// Digests successive `page_size` chunks of `data`. The final chunk is
/// short when `data.len()` is not a multiple of `page_size`; only the
/// valid bytes are hashed, never padding.
pub fn paged_hashes(data: &[u8], page_size: usize) -> Vec<[u8; 32]> {
    data.chunks(page_size)
        .map(|page| {
            let mut ctx = Context::new(&SHA256);
            ctx.update(page);
            let digest = ctx.finish();

            let mut out = [0u8; 32];
            out.copy_from_slice(digest.as_ref());
            out
        })
        .collect()
}

/// Digests an arbitrary byte string, used for hashing serialized Requirements
/// and Entitlements blobs to populate CodeDirectory special slots.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut ctx = Context::new(&SHA256);
    ctx.update(data);
    let digest = ctx.finish();

    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_data_produces_no_hashes() {
        assert!(paged_hashes(&[], CS_PAGE_SIZE).is_empty());
    }

    #[test]
    fn exact_page_multiple() {
        let data = vec![0u8; CS_PAGE_SIZE * 3];
        assert_eq!(paged_hashes(&data, CS_PAGE_SIZE).len(), 3);
    }

    #[test]
    fn short_final_page() {
        let data = vec![0u8; CS_PAGE_SIZE + 1];
        let hashes = paged_hashes(&data, CS_PAGE_SIZE);
        assert_eq!(hashes.len(), 2);

        let full_page_hash = sha256(&data[..CS_PAGE_SIZE]);
        let short_page_hash = sha256(&data[CS_PAGE_SIZE..]);
        assert_eq!(hashes[0], full_page_hash);
        assert_eq!(hashes[1], short_page_hash);
    }
}
