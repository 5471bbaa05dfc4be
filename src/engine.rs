//! Conversion engine: discovery, availability check, command construction.
//!
//! The engine is GraphicsMagick run in batch mode (`gm batch -stop-on-error
//! off -`): one `convert` command per input line, applied independently,
//! until stdin closes. Availability is verified up front because a missing
//! engine is a run-fatal precondition.

use crate::config::ConvertParams;
use crate::error::RunError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const DEFAULT_ENGINE: &str = "gm";

const BATCH_ARGS: &[&str] = &["batch", "-stop-on-error", "off", "-"];

#[derive(Debug, Clone)]
pub struct Engine {
    program: PathBuf,
}

impl Engine {
    /// Resolve the engine executable from PATH.
    pub fn locate() -> Result<Self, RunError> {
        let program = which::which(DEFAULT_ENGINE)
            .map_err(|e| RunError::EngineUnavailable(format!("{}: {}", DEFAULT_ENGINE, e)))?;
        Ok(Self { program })
    }

    /// Use an explicit executable; also how tests substitute a stub.
    pub fn from_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `gm version` once to prove the executable actually executes.
    pub fn verify(&self) -> Result<(), RunError> {
        let output = Command::new(&self.program)
            .arg("version")
            .output()
            .map_err(|e| {
                RunError::EngineUnavailable(format!("{}: {}", self.program.display(), e))
            })?;
        if !output.status.success() {
            return Err(RunError::EngineUnavailable(format!(
                "{} exited with {:?}",
                self.program.display(),
                output.status.code()
            )));
        }
        let banner = String::from_utf8_lossy(&output.stdout);
        info!(
            engine = %self.program.display(),
            version = banner.lines().next().unwrap_or(""),
            "conversion engine verified"
        );
        Ok(())
    }

    /// The per-batch invocation. Stop-on-first-error is disabled so one bad
    /// command does not abort the rest of the batch inside the engine.
    pub fn batch_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(BATCH_ARGS);
        debug!(engine = %self.program.display(), args = ?BATCH_ARGS, "engine batch invocation");
        cmd
    }
}

/// Crop rectangle for spread splitting, rendered as `WxH+X+Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Escape a path for the engine command line: backslashes and double quotes
/// escaped, whole path double-quoted.
pub fn escape_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// One newline-terminated `convert` command.
pub fn convert_command(
    input: &Path,
    output: &Path,
    crop: Option<Crop>,
    params: &ConvertParams,
) -> String {
    let mut cmd = String::from("convert ");
    cmd.push_str(&escape_path(input));
    if let Some(c) = crop {
        cmd.push_str(&format!(" -crop {}x{}+{}+{}", c.width, c.height, c.x, c.y));
    }
    cmd.push_str(&format!(" -resize x{}", params.resize_height));
    if params.grayscale {
        cmd.push_str(" -colorspace GRAY");
    }
    if let Some(u) = params.unsharp {
        cmd.push_str(&format!(
            " -unsharp {}x{}+{}+{}",
            u.radius, u.sigma, u.amount, u.threshold
        ));
    }
    cmd.push_str(&format!(" -quality {} ", params.quality));
    cmd.push_str(&escape_path(output));
    cmd.push('\n');
    cmd
}

/// Left/right crops for a spread: the left page takes ceil(width/2), the
/// right page the remainder.
pub fn split_crops(width: u32, height: u32) -> (Crop, Crop) {
    let left_width = width.div_ceil(2);
    let right_width = width - left_width;
    (
        Crop {
            width: left_width,
            height,
            x: 0,
            y: 0,
        },
        Crop {
            width: right_width,
            height,
            x: left_width,
            y: 0,
        },
    )
}
