//! Run summary: the structured result handed to the presentation side.
//!
//! The core only fills the fields; formatting below is one presentation of
//! them (boxed terminal report plus a JSON mode).

use console::style;
use serde::Serialize;

/// At most this many failed file names are printed; the rest is summarized
/// as a count. The full list stays in the struct (and in JSON output).
pub const FAILURE_DISPLAY_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct DirCount {
    pub name: String,
    pub images: usize,
    pub isolated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub directories: Vec<DirCount>,
    pub global_images: usize,
    pub total_images: usize,
    pub processed: usize,
    pub failed: Vec<String>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self {
            directories: Vec::new(),
            global_images: 0,
            total_images: 0,
            processed: 0,
            failed: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    /// Failures capped for display, plus how many were cut off.
    pub fn truncated_failures(&self) -> (&[String], usize) {
        let shown = self.failed.len().min(FAILURE_DISPLAY_LIMIT);
        (&self.failed[..shown], self.failed.len() - shown)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "directories": self.directories,
            "globalImages": self.global_images,
            "totalImages": self.total_images,
            "processed": self.processed,
            "failed": self.failed,
            "elapsedSecs": self.elapsed_secs,
        })
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("══════════════════ Conversion Summary ══════════════════");
    for dir in &summary.directories {
        let kind = if dir.isolated { "isolated" } else { "pooled" };
        println!("  {:<40} {:>6} images ({})", dir.name, dir.images, kind);
    }
    println!("  global batch pool: {} images", summary.global_images);
    println!("─────────────────────────────────────────────────────────");
    println!(
        "  {} {:>8} / {} images",
        style("processed").green(),
        summary.processed,
        summary.total_images
    );
    println!(
        "  {} {:>8}",
        style("failed   ").red(),
        summary.failed.len()
    );
    println!("  elapsed   {:>8.1}s", summary.elapsed_secs);
    println!("═════════════════════════════════════════════════════════");

    if !summary.failed.is_empty() {
        let (shown, hidden) = summary.truncated_failures();
        println!("\n{}", style("Failed files:").red().bold());
        for name in shown {
            println!("   {}", name);
        }
        if hidden > 0 {
            println!("   … and {} more", hidden);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with_failures(n: usize) -> RunSummary {
        RunSummary {
            directories: vec![DirCount {
                name: "vol1".to_string(),
                images: 12,
                isolated: true,
            }],
            global_images: 30,
            total_images: 42,
            processed: 42 - n,
            failed: (0..n).map(|i| format!("f{}.jpg", i)).collect(),
            elapsed_secs: 3.5,
        }
    }

    #[test]
    fn test_truncation_below_limit() {
        let summary = summary_with_failures(3);
        let (shown, hidden) = summary.truncated_failures();
        assert_eq!(shown.len(), 3);
        assert_eq!(hidden, 0);
    }

    #[test]
    fn test_truncation_above_limit() {
        let summary = summary_with_failures(FAILURE_DISPLAY_LIMIT + 7);
        let (shown, hidden) = summary.truncated_failures();
        assert_eq!(shown.len(), FAILURE_DISPLAY_LIMIT);
        assert_eq!(hidden, 7);
    }

    #[test]
    fn test_json_shape() {
        let summary = summary_with_failures(1);
        let json = summary.to_json();
        assert_eq!(json["totalImages"], 42);
        assert_eq!(json["processed"], 41);
        assert_eq!(json["failed"].as_array().unwrap().len(), 1);
        assert_eq!(json["directories"][0]["name"], "vol1");
    }

    #[test]
    fn test_print_summary_no_panic() {
        print_summary(&summary_with_failures(0));
        print_summary(&summary_with_failures(FAILURE_DISPLAY_LIMIT + 2));
        print_summary(&RunSummary::empty());
    }
}
