//! Root filesystem, mount and device configuration.
//!
//! Nothing here touches the mount table. The backend performs the mounts
//! from the directives; the mount hook creates devices and masks paths from
//! the side files written into the runtime directory.

pub mod devices;
pub mod mounts;
pub mod rootfs;

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use kennel_common::{KennelError, KennelResult};

pub use devices::DevicePlan;

/// A path as UTF-8, the configuration format has no other encoding.
pub(crate) fn path_str(path: &Path) -> KennelResult<&str> {
    path.to_str()
        .ok_or_else(|| KennelError::config(format!("path is not valid UTF-8: {}", path.display())))
}

/// Create a new file in the runtime directory. Existing files are an error,
/// a runtime directory is populated exactly once.
pub(crate) fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> KennelResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|e| KennelError::config(format!("failed to create {}: {e}", path.display())))?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn new_files_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmdline");

        write_new_file(&path, b"sh\0", 0o400).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o400);

        assert!(write_new_file(&path, b"sh\0", 0o400).is_err());
    }
}
