//! Collision-free output path allocation.
//!
//! Every path handed out during a run is remembered (case-insensitively) so
//! concurrent batches can never write over each other, even when unrelated
//! inputs share a base filename. Discriminator attempts are bounded purely
//! to guarantee termination; the timestamp fallback is not expected to be
//! reached in practice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const MAX_DISCRIMINATOR_ATTEMPTS: u32 = 64;

#[derive(Debug, Default)]
pub struct PathRegistry {
    issued: Mutex<HashSet<String>>,
    fallback_serial: AtomicU64,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `base` is the extension-less output stem, `suffix` the tail including
    /// the extension (e.g. `".jpg"` or `"-1.jpg"`). The returned path has
    /// never been returned before within this run, compared
    /// case-insensitively.
    pub fn unique_path(&self, base: &Path, suffix: &str) -> PathBuf {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());

        let plain = join_suffix(base, suffix);
        if issued.insert(key_of(&plain)) {
            return plain;
        }

        for attempt in 2..=MAX_DISCRIMINATOR_ATTEMPTS {
            let candidate = join_suffix(base, &format!("-{}{}", attempt, suffix));
            if issued.insert(key_of(&candidate)) {
                return candidate;
            }
        }

        // Timestamp plus a run-lifetime serial: unique even when many
        // callers exhaust the discriminators within the same millisecond.
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let serial = self.fallback_serial.fetch_add(1, Ordering::Relaxed);
        let fallback = join_suffix(base, &format!("-{}-{}{}", stamp, serial, suffix));
        issued.insert(key_of(&fallback));
        fallback
    }

    /// Forget every issued path; called between runs.
    pub fn reset(&self) {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn join_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn key_of(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}
