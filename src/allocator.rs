// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coordinates with the external `codesign_allocate` helper to resize a
//! Mach-O's `LC_CODE_SIGNATURE` region, then injects the finished
//! SuperBlob at the allocated offset.
//!
//! `codesign_allocate` itself is an opaque collaborator: its only contract
//! is that, given a source file and a list of `(arch, size)` triples, it
//! produces a Mach-O at the requested output path whose signature region
//! for each named architecture is at least `size` bytes.

use crate::error::{AdhocSignError, Result};
use crate::macho::{normalize_subtype, parse_slices, MachOSlice};
use crate::settings::SigningSettings;
use crate::signer::sign_slice;
use log::{info, warn};
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const DEFAULT_ALLOCATOR_BINARY: &str = "codesign_allocate";
pub const ALLOCATOR_ENV_VAR: &str = "CODESIGN_ALLOCATE";

/// 16-byte alignment plus 1 KiB slack applied to a SuperBlob's length to
/// get the region size requested from the allocator.
fn needed_region_size(superblob_len: usize) -> u64 {
    let aligned = (superblob_len + 15) & !15;
    aligned as u64 + 1024
}

/// Resolves the allocator binary to invoke: explicit setting, then the
/// `CODESIGN_ALLOCATE` environment variable, then `PATH` lookup.
pub fn resolve_allocator_path(settings: &SigningSettings) -> Result<PathBuf> {
    if let Some(path) = &settings.allocator_path {
        return Ok(path.clone());
    }

    if let Some(path) = std::env::var_os(ALLOCATOR_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    which::which(DEFAULT_ALLOCATOR_BINARY)
        .map_err(|_| AdhocSignError::AllocatorNotFound(DEFAULT_ALLOCATOR_BINARY.to_string()))
}

/// Stages a copy of `source_path` next to it (same directory, so the
/// final rename is same-filesystem and atomic), preserving mode bits.
fn stage_temp_file(source_path: &Path) -> Result<tempfile::NamedTempFile> {
    let dir = source_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let prefix = source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "machosign".to_string());

    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(dir)?;

    let mode = std::fs::metadata(source_path)?.permissions().mode();
    std::fs::set_permissions(temp.path(), Permissions::from_mode(mode))?;

    Ok(temp)
}

/// Invokes the allocator to produce `output_path` sized to hold a
/// signature of `region_size` bytes per `(cputype, cpusubtype)` slice.
fn run_allocator(
    allocator: &Path,
    input_path: &Path,
    output_path: &Path,
    per_slice_sizes: &[(u32, u32, u64)],
    remove: bool,
) -> Result<()> {
    let mut args: Vec<String> = vec!["-i".to_string(), input_path.display().to_string()];

    if remove {
        args.push("-r".to_string());
    } else {
        for (cputype, cpusubtype, size) in per_slice_sizes {
            args.push("-A".to_string());
            args.push(format!("{}", cputype));
            args.push(format!("{}", normalize_subtype(*cpusubtype)));
            args.push(format!("{}", size));
        }
    }

    args.push("-o".to_string());
    args.push(output_path.display().to_string());

    info!("invoking {} with args: {:?}", allocator.display(), args);

    let expr = duct::cmd(allocator, args).stderr_to_stdout().unchecked();
    let output = expr.run().map_err(|e| {
        warn!("failed to spawn allocator: {}", e);
        AdhocSignError::AllocatorExitedNonZero(allocator.display().to_string(), -1)
    })?;

    if !output.status.success() {
        return Err(AdhocSignError::AllocatorExitedNonZero(
            allocator.display().to_string(),
            output.status.code().unwrap_or(-1),
        ));
    }

    Ok(())
}

/// Signs every architecture slice of the Mach-O at `input_path`, writing
/// the result to `output_path` (which may be the same path for in-place
/// signing).
pub fn codesign(input_path: &Path, output_path: &Path, settings: &SigningSettings) -> Result<()> {
    let source_data = std::fs::read(input_path)?;
    let slices = parse_slices(&source_data)?;

    for slice in &slices {
        if slice.macho.code_signature_data_offset().is_some() && !settings.force {
            return Err(AdhocSignError::AlreadySigned);
        }
        slice.macho.check_signing_capability()?;
    }

    let mut superblobs = Vec::with_capacity(slices.len());
    let mut per_slice_sizes = Vec::with_capacity(slices.len());

    for slice in &slices {
        let superblob = sign_slice(&slice.macho, slice.data, settings)?;
        let size = needed_region_size(superblob.len());
        per_slice_sizes.push((slice.macho.header.cputype as u32, slice.macho.header.cpusubtype as u32, size));
        superblobs.push(superblob);
    }

    let allocator = resolve_allocator_path(settings)?;
    let temp = stage_temp_file(input_path)?;

    run_allocator(&allocator, input_path, temp.path(), &per_slice_sizes, false)?;

    let staged_data = std::fs::read(temp.path())?;
    let mut staged_slices = parse_slices(&staged_data)?;

    // Re-read so we can splice in each slice's signature bytes at its
    // newly allocated offset without holding overlapping borrows.
    let mut rewritten = staged_data.clone();

    for (slice, superblob) in staged_slices.iter_mut().zip(superblobs.iter()) {
        let (data_offset, data_size) = slice
            .macho
            .code_signature_data_offset()
            .ok_or(AdhocSignError::MissingCodeSignatureCommand)?;

        if data_size < superblob.len() as u64 {
            return Err(AdhocSignError::AllocatedSizeTooSmall {
                needed: superblob.len() as u64,
                available: data_size,
            });
        }

        let absolute_offset = slice.offset + data_offset as usize;
        rewritten[absolute_offset..absolute_offset + superblob.len()]
            .copy_from_slice(superblob);
    }

    // Write the finished bytes back into the staged temp file, then rename
    // it into place. The original (or previous output_path contents) is
    // never truncated or partially overwritten in place: a crash or write
    // error here leaves the temp file incomplete and output_path untouched.
    std::fs::write(temp.path(), &rewritten)?;

    std::fs::rename(temp.path(), output_path)
        .or_else(|_| std::fs::copy(temp.path(), output_path).map(|_| ()))?;

    info!(
        "wrote signed binary to {} ({} slice(s))",
        output_path.display(),
        staged_slices.len()
    );

    Ok(())
}

/// `inject`: splices a freshly computed SuperBlob directly into each
/// slice's *existing* `LC_CODE_SIGNATURE` region, without invoking the
/// external allocator. Unlike [`codesign`], this never resizes or relocates
/// the signature region — it fails if a slice has no such load command, or
/// if the existing region is too small for the new SuperBlob.
pub fn inject(path: &Path, settings: &SigningSettings) -> Result<()> {
    let source_data = std::fs::read(path)?;
    let slices = parse_slices(&source_data)?;

    let mut rewritten = source_data.clone();

    for slice in &slices {
        let (data_offset, data_size) = slice
            .macho
            .code_signature_data_offset()
            .ok_or(AdhocSignError::MissingCodeSignatureCommand)?;

        let superblob = sign_slice(&slice.macho, slice.data, settings)?;

        if data_size < superblob.len() as u64 {
            return Err(AdhocSignError::AllocatedSizeTooSmall {
                needed: superblob.len() as u64,
                available: data_size,
            });
        }

        let absolute_offset = slice.offset + data_offset as usize;
        rewritten[absolute_offset..absolute_offset + superblob.len()]
            .copy_from_slice(&superblob);
    }

    let temp = stage_temp_file(path)?;
    std::fs::write(temp.path(), &rewritten)?;

    std::fs::rename(temp.path(), path)
        .or_else(|_| std::fs::copy(temp.path(), path).map(|_| ()))?;

    info!("injected signature into {} in place", path.display());

    Ok(())
}

/// Removes any embedded signature, leaving the binary otherwise unchanged.
pub fn remove_signature(input_path: &Path, output_path: &Path, settings: &SigningSettings) -> Result<()> {
    let allocator = resolve_allocator_path(settings)?;
    let temp = stage_temp_file(input_path)?;

    run_allocator(&allocator, input_path, temp.path(), &[], true)?;

    std::fs::rename(temp.path(), output_path).or_else(|_| {
        std::fs::copy(temp.path(), output_path).map(|_| ())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needed_size_rounds_up_to_16_and_adds_slack() {
        assert_eq!(needed_region_size(1), 1040);
        assert_eq!(needed_region_size(16), 1040);
        assert_eq!(needed_region_size(17), 1056);
    }
}
