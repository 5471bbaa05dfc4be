//! Shared test fixtures: tiny real images and stub engine executables.

use image::{ImageBuffer, Rgb};
use std::path::{Path, PathBuf};

pub(crate) fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_pixel(width, height, Rgb([200, 200, 200]));
    img.save(&path).unwrap();
    path
}

/// A stand-in engine: a shell script that drains stdin, optionally records
/// it, and exits with the given code. Arguments are ignored, so the batch
/// invocation flags are harmless.
#[cfg(unix)]
pub(crate) fn write_stub_engine(dir: &Path, exit_code: i32, record_to: Option<&Path>) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let body = match record_to {
        // Append so several engine invocations of one run share the record.
        Some(log) => format!("#!/bin/sh\ncat >> \"{}\"\nexit {}\n", log.display(), exit_code),
        None => format!("#!/bin/sh\ncat > /dev/null\nexit {}\n", exit_code),
    };
    let path = dir.join(format!("stub-engine-{}", exit_code));
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A stub engine that closes its stdin immediately, producing a broken pipe
/// for the writer, then exits 0.
#[cfg(unix)]
pub(crate) fn write_closing_engine(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("stub-engine-close");
    std::fs::write(&path, "#!/bin/sh\nexec <&-\nsleep 0.2\nexit 0\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
