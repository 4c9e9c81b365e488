// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::path::Path;

use crate::error::{FipError, Result};

/// Check that a host's SSH key file exists and is private before handing it to libssh2.
///
/// Every failure is reported as a connection failure: from the caller's point of
/// view a bad key is no different from a refused login.
pub fn validate_key_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(FipError::Connection(format!(
            "SSH key file not found: {}",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(FipError::Connection(format!(
            "SSH key path is not a file: {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::metadata(path).map_err(|e| {
            FipError::Connection(format!(
                "Cannot read SSH key file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mode = metadata.mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(FipError::Connection(format!(
                "SSH key file {} has insecure permissions {:o}. Should be 600 or 400.",
                path.display(),
                mode
            )));
        }
    }

    Ok(())
}
