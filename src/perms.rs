// src/perms.rs
// Executable-bit handling for generated scripts, extracted binaries and downloaded tools.

use std::io;
use std::path::Path;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::fs::PermissionsExt;

        /// Adds the execute bits (`chmod +x`) to `path`, keeping its other mode bits.
        pub fn set_executable(path: &Path) -> io::Result<()> {
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(path, perms)
        }

        pub fn is_executable(path: &Path) -> bool {
            std::fs::metadata(path)
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        }
    } else {
        // AppImages only run on Linux; elsewhere the bit has no meaning.
        pub fn set_executable(path: &Path) -> io::Result<()> {
            std::fs::metadata(path).map(|_| ())
        }

        pub fn is_executable(path: &Path) -> bool {
            path.is_file()
        }
    }
}
