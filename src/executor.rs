//! Batch executor: one engine subprocess per batch task.
//!
//! Probes every image, builds one (narrow) or two (spread) convert commands
//! per image, streams them to the engine's stdin in list order, then waits
//! for the engine to drain. stdout and stderr are consumed by dedicated
//! threads so the child can never stall on a full pipe; their content is
//! captured for logs only.
//!
//! Failure policy is conservative: a nonzero engine exit fails the whole
//! batch (processed reset to 0, every requested image marked failed) because
//! the engine's exit code says nothing reliable about partial success. A
//! broken pipe fails everything not yet submitted. Cancellation kills the
//! subprocess, which also breaks the pipe and unblocks a writer stuck on
//! backpressure; cancelled work is counted as neither success nor failure.

use crate::cancel::CancelToken;
use crate::collision::PathRegistry;
use crate::config::ConvertParams;
use crate::engine::{convert_command, split_crops, Engine};
use crate::organizer::BatchTask;
use crate::probe;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Output suffix for a narrow page.
const SINGLE_SUFFIX: &str = ".jpg";
/// Output suffixes for the two halves of a split spread.
const LEFT_SUFFIX: &str = "-1.jpg";
const RIGHT_SUFFIX: &str = "-2.jpg";

/// How often the supervisor re-checks cancellation while the writer runs.
const WRITER_POLL: Duration = Duration::from_millis(20);

/// Bounded backoff for a temporarily-full pipe before giving up on the
/// write; only reachable when the pipe is non-blocking.
const WRITE_STALL_LIMIT: u32 = 200;
const WRITE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: Vec<String>,
    pub global: bool,
    pub cancelled: bool,
}

impl BatchOutcome {
    fn cancelled(global: bool) -> Self {
        Self {
            processed: 0,
            failed: Vec::new(),
            global,
            cancelled: true,
        }
    }

    fn whole_batch_failed(task: &BatchTask) -> Self {
        Self {
            processed: 0,
            failed: task.images.iter().map(|p| display_name(p)).collect(),
            global: task.global,
            cancelled: false,
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Convert one batch. All failure modes fold into the outcome; nothing is
/// raised past the batch boundary so sibling batches keep running.
pub fn run_batch(
    engine: &Engine,
    task: &BatchTask,
    params: &ConvertParams,
    registry: &PathRegistry,
    cancel: &CancelToken,
) -> BatchOutcome {
    if cancel.is_cancelled() {
        return BatchOutcome::cancelled(task.global);
    }

    let dims = probe::probe_all(&task.images);

    let mut failed: Vec<String> = Vec::new();
    let plan = build_plan(task, &dims, params, registry, &mut failed);

    if cancel.is_cancelled() {
        return BatchOutcome::cancelled(task.global);
    }

    let (mut process, stdin) = match EngineProcess::spawn(engine) {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "failed to launch conversion engine, batch failed");
            return BatchOutcome::whole_batch_failed(task);
        }
    };

    // The writer owns stdin on its own thread; killing the child from here
    // breaks the pipe and unblocks it if it is stuck on backpressure.
    let writer_cancel = cancel.clone();
    let writer_plan = plan.clone();
    let writer: JoinHandle<WriterReport> =
        thread::spawn(move || write_commands(stdin, &writer_plan, &writer_cancel));

    let mut killed = false;
    while !writer.is_finished() {
        if cancel.is_cancelled() && !killed {
            warn!("cancellation during command writing, terminating engine");
            process.kill();
            killed = true;
        }
        thread::park_timeout(WRITER_POLL);
    }

    let report = match writer.join() {
        Ok(report) => report,
        Err(_) => {
            error!("command writer thread panicked, batch failed");
            process.terminate();
            return BatchOutcome::whole_batch_failed(task);
        }
    };

    if cancel.is_cancelled() || matches!(report.end, WriteEnd::Cancelled) {
        process.terminate();
        return BatchOutcome::cancelled(task.global);
    }

    let (status, stdout, stderr) = match process.wait() {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "failed waiting for conversion engine, batch failed");
            return BatchOutcome::whole_batch_failed(task);
        }
    };
    log_engine_streams(&stdout, &stderr);

    let fatal_write = match report.end {
        WriteEnd::Fatal(ref err) => {
            error!(error = %err, "engine stdin write failed, batch failed");
            true
        }
        _ => false,
    };

    if !status.success() || fatal_write {
        // The engine's own accounting is not trusted through its exit code:
        // reset the batch and fail every originally-requested image.
        error!(
            exit_code = status.code(),
            images = task.images.len(),
            "engine exited with failure, whole batch marked failed"
        );
        return BatchOutcome::whole_batch_failed(task);
    }

    if matches!(report.end, WriteEnd::BrokenPipe) {
        warn!("engine closed its input early, unsubmitted images marked failed");
        for entry in &plan {
            if !report.queued.contains(&entry.image_index) {
                failed.push(display_name(&task.images[entry.image_index]));
            }
        }
    }

    let processed = report.queued.len();
    debug!(
        processed,
        failed = failed.len(),
        commands = report.commands_written,
        "batch complete"
    );
    BatchOutcome {
        processed,
        failed,
        global: task.global,
        cancelled: false,
    }
}

#[derive(Debug, Clone)]
struct PlanEntry {
    image_index: usize,
    commands: Vec<String>,
}

/// Probe results to command plan. Images without dimensions are marked
/// failed here and excluded. Duplicate base filenames (case-insensitive,
/// extension stripped) get the source extension folded into the output base
/// so unrelated inputs cannot overwrite each other.
fn build_plan(
    task: &BatchTask,
    dims: &[Option<(u32, u32)>],
    params: &ConvertParams,
    registry: &PathRegistry,
    failed: &mut Vec<String>,
) -> Vec<PlanEntry> {
    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for image in &task.images {
        if let Some(stem) = image.file_stem() {
            *stem_counts
                .entry(stem.to_string_lossy().to_lowercase())
                .or_insert(0) += 1;
        }
    }

    let mut plan = Vec::new();
    for (index, image) in task.images.iter().enumerate() {
        let Some((width, height)) = dims[index] else {
            failed.push(display_name(image));
            continue;
        };

        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_name(image));
        let duplicated = stem_counts
            .get(&stem.to_lowercase())
            .map(|&n| n > 1)
            .unwrap_or(false);
        let base_name = if duplicated {
            let ext = image
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            format!("{}_{}", stem, ext)
        } else {
            stem
        };
        let base = task.output_dir.join(base_name);

        let commands = if width < params.width_threshold {
            let output = registry.unique_path(&base, SINGLE_SUFFIX);
            vec![convert_command(image, &output, None, params)]
        } else {
            let (left, right) = split_crops(width, height);
            let left_out = registry.unique_path(&base, LEFT_SUFFIX);
            let right_out = registry.unique_path(&base, RIGHT_SUFFIX);
            vec![
                convert_command(image, &left_out, Some(left), params),
                convert_command(image, &right_out, Some(right), params),
            ]
        };
        plan.push(PlanEntry {
            image_index: index,
            commands,
        });
    }
    plan
}

#[derive(Debug)]
enum WriteEnd {
    Finished,
    BrokenPipe,
    Fatal(io::Error),
    Cancelled,
}

#[derive(Debug)]
struct WriterReport {
    /// Image indices whose commands were all written successfully.
    queued: Vec<usize>,
    commands_written: usize,
    end: WriteEnd,
}

/// Stream the plan to the engine in image-list order, one command per line,
/// closing stdin afterwards to signal completion. An image counts as queued
/// only once every one of its commands is on the wire.
fn write_commands(mut stdin: ChildStdin, plan: &[PlanEntry], cancel: &CancelToken) -> WriterReport {
    let mut report = WriterReport {
        queued: Vec::new(),
        commands_written: 0,
        end: WriteEnd::Finished,
    };

    'entries: for entry in plan {
        if cancel.is_cancelled() {
            report.end = WriteEnd::Cancelled;
            break;
        }
        for command in &entry.commands {
            match write_line(&mut stdin, command) {
                Ok(PipeWrite::Complete) => report.commands_written += 1,
                Ok(PipeWrite::Closed) => {
                    report.end = WriteEnd::BrokenPipe;
                    break 'entries;
                }
                Err(err) => {
                    report.end = WriteEnd::Fatal(err);
                    break 'entries;
                }
            }
        }
        report.queued.push(entry.image_index);
    }

    // Dropping stdin closes the pipe: end-of-input for the engine.
    drop(stdin);
    report
}

enum PipeWrite {
    Complete,
    Closed,
}

/// Chunked write with the retry discipline the pipe needs: interrupted
/// writes retry immediately, a temporarily-full pipe retries with bounded
/// backoff, a broken pipe reports the closed end, anything else is an error.
fn write_line(stdin: &mut ChildStdin, line: &str) -> io::Result<PipeWrite> {
    let bytes = line.as_bytes();
    let mut written = 0;
    let mut stalls = 0u32;

    while written < bytes.len() {
        match stdin.write(&bytes[written..]) {
            Ok(0) => return Ok(PipeWrite::Closed),
            Ok(n) => {
                written += n;
                stalls = 0;
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                stalls += 1;
                if stalls > WRITE_STALL_LIMIT {
                    return Err(e);
                }
                thread::sleep(WRITE_BACKOFF);
            }
            Err(ref e) if e.kind() == ErrorKind::BrokenPipe => return Ok(PipeWrite::Closed),
            Err(e) => return Err(e),
        }
    }
    Ok(PipeWrite::Complete)
}

/// Engine child plus its stream drains. stdout/stderr are consumed on
/// dedicated threads from spawn so the child can never block on a full
/// output pipe while we are busy writing its input.
struct EngineProcess {
    child: Child,
    stdout_thread: Option<JoinHandle<String>>,
    stderr_thread: Option<JoinHandle<String>>,
}

impl EngineProcess {
    fn spawn(engine: &Engine) -> io::Result<(Self, ChildStdin)> {
        let mut cmd = engine.batch_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("engine stdin not captured"))?;
        let stdout_thread = child.stdout.take().map(drain_stream);
        let stderr_thread = child.stderr.take().map(drain_stream);

        info!(pid = child.id(), "engine subprocess started");
        Ok((
            Self {
                child,
                stdout_thread,
                stderr_thread,
            },
            stdin,
        ))
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
    }

    /// Blocking wait for exit, then collect both captured streams.
    fn wait(mut self) -> io::Result<(ExitStatus, String, String)> {
        let status = self.child.wait()?;
        let stdout = join_drain(self.stdout_thread.take());
        let stderr = join_drain(self.stderr_thread.take());
        Ok((status, stdout, stderr))
    }

    /// Kill, reap and discard: the cancellation teardown path.
    fn terminate(mut self) {
        self.kill();
        let _ = self.child.wait();
        join_drain(self.stdout_thread.take());
        join_drain(self.stderr_thread.take());
        info!("engine subprocess terminated");
    }
}

fn drain_stream<R: Read + Send + 'static>(stream: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = io::BufReader::new(stream);
        let _ = reader.read_to_string(&mut buf);
        buf
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|t| t.join().unwrap_or_default())
        .unwrap_or_default()
}

fn log_engine_streams(stdout: &str, stderr: &str) {
    if !stdout.trim().is_empty() {
        debug!(output = %stdout.trim_end(), "engine stdout");
    }
    if !stderr.trim().is_empty() {
        debug!(output = %stderr.trim_end(), "engine stderr");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::{write_closing_engine, write_stub_engine, write_test_image};
    use std::fs;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::TempDir;

    fn narrow_batch(dir: &Path, count: usize) -> BatchTask {
        let images = (0..count)
            .map(|i| write_test_image(dir, &format!("img{}.png", i + 1), 1000, 1400))
            .collect();
        BatchTask {
            images,
            output_dir: dir.join("out"),
            batch_size: count,
            global: true,
        }
    }

    fn params() -> ConvertParams {
        ConvertParams {
            width_threshold: 3000,
            resize_height: 1600,
            quality: 85,
            grayscale: false,
            unsharp: None,
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_successful_batch_streams_commands_in_order() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("commands.txt");
        let engine = Engine::from_program(write_stub_engine(temp.path(), 0, Some(&record)));
        let task = narrow_batch(temp.path(), 3);

        let outcome = run_batch(
            &engine,
            &task,
            &params(),
            &PathRegistry::new(),
            &CancelToken::new(),
        );

        assert!(!outcome.cancelled);
        assert_eq!(outcome.processed, 3);
        assert!(outcome.failed.is_empty());

        let lines = read_lines(&record);
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.starts_with("convert "));
            assert!(
                line.contains(&format!("img{}.png", i + 1)),
                "line {} out of order: {}",
                i,
                line
            );
        }
    }

    #[test]
    fn test_wide_images_emit_split_pairs() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("commands.txt");
        let engine = Engine::from_program(write_stub_engine(temp.path(), 0, Some(&record)));
        let images = vec![
            write_test_image(temp.path(), "spread1.png", 4000, 1500),
            write_test_image(temp.path(), "spread2.png", 4000, 1500),
        ];
        let task = BatchTask {
            images,
            output_dir: temp.path().join("out"),
            batch_size: 2,
            global: false,
        };

        let outcome = run_batch(
            &engine,
            &task,
            &params(),
            &PathRegistry::new(),
            &CancelToken::new(),
        );

        assert_eq!(outcome.processed, 2);
        let lines = read_lines(&record);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("-crop 2000x1500+0+0"));
        assert!(lines[0].contains("spread1-1.jpg"));
        assert!(lines[1].contains("-crop 2000x1500+2000+0"));
        assert!(lines[1].contains("spread1-2.jpg"));
    }

    #[test]
    fn test_probe_failure_marks_file_failed_and_skips_command() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("commands.txt");
        let engine = Engine::from_program(write_stub_engine(temp.path(), 0, Some(&record)));

        let mut images = Vec::new();
        for i in 1..=5 {
            if i == 3 {
                let path = temp.path().join("img3.png");
                fs::write(&path, b"corrupted").unwrap();
                images.push(path);
            } else {
                images.push(write_test_image(
                    temp.path(),
                    &format!("img{}.png", i),
                    1000,
                    1400,
                ));
            }
        }
        let task = BatchTask {
            images,
            output_dir: temp.path().join("out"),
            batch_size: 5,
            global: true,
        };

        let outcome = run_batch(
            &engine,
            &task,
            &params(),
            &PathRegistry::new(),
            &CancelToken::new(),
        );

        assert_eq!(outcome.processed, 4);
        assert_eq!(outcome.failed, vec!["img3.png".to_string()]);
        assert_eq!(read_lines(&record).len(), 4);
    }

    #[test]
    fn test_nonzero_exit_fails_whole_batch() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("commands.txt");
        let engine = Engine::from_program(write_stub_engine(temp.path(), 1, Some(&record)));
        let task = narrow_batch(temp.path(), 5);

        let outcome = run_batch(
            &engine,
            &task,
            &params(),
            &PathRegistry::new(),
            &CancelToken::new(),
        );

        // Commands were streamed, but the exit code voids all of them.
        assert_eq!(read_lines(&record).len(), 5);
        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.failed.len(), 5);
        for i in 1..=5 {
            assert!(outcome.failed.contains(&format!("img{}.png", i)));
        }
    }

    #[test]
    fn test_duplicate_stems_get_disambiguated_outputs() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("commands.txt");
        let engine = Engine::from_program(write_stub_engine(temp.path(), 0, Some(&record)));
        let images = vec![
            write_test_image(temp.path(), "page.png", 1000, 1400),
            write_test_image(temp.path(), "page.bmp", 1000, 1400),
        ];
        let task = BatchTask {
            images,
            output_dir: temp.path().join("out"),
            batch_size: 2,
            global: true,
        };

        let outcome = run_batch(
            &engine,
            &task,
            &params(),
            &PathRegistry::new(),
            &CancelToken::new(),
        );

        assert_eq!(outcome.processed, 2);
        let lines = read_lines(&record);
        assert!(lines[0].contains("page_png.jpg"), "{}", lines[0]);
        assert!(lines[1].contains("page_bmp.jpg"), "{}", lines[1]);
    }

    #[test]
    fn test_cancelled_before_launch_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("commands.txt");
        let engine = Engine::from_program(write_stub_engine(temp.path(), 0, Some(&record)));
        let task = narrow_batch(temp.path(), 2);

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_batch(&engine, &task, &params(), &PathRegistry::new(), &cancel);

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed, 0);
        assert!(outcome.failed.is_empty());
        assert!(!record.exists(), "engine must not have been spawned");
    }

    /// A deep output path inflates every command line so the batch overflows
    /// the pipe buffer against an engine that never reads: the writer is
    /// guaranteed to be blocked when cancellation lands, and must be
    /// unblocked by the kill.
    fn deep_output_dir(root: &Path) -> PathBuf {
        let mut dir = root.to_path_buf();
        for i in 0..5 {
            dir = dir.join(format!("{}{}", "level".repeat(40), i));
        }
        dir
    }

    #[test]
    fn test_cancel_mid_batch_terminates_engine_and_counts_nothing() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let stalled = temp.path().join("stub-engine-stalled");
        // Stalls without reading. The loop (not one long sleep) matters:
        // each short-lived child inherits the pipe read end, so once the
        // shell is killed the pipe actually closes within a second.
        fs::write(&stalled, "#!/bin/sh\nwhile :; do sleep 1; done\n").unwrap();
        let mut perms = fs::metadata(&stalled).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&stalled, perms).unwrap();

        let engine = Engine::from_program(&stalled);
        let images: Vec<PathBuf> = (0..200)
            .map(|i| write_test_image(temp.path(), &format!("p{:03}.png", i), 1000, 1400))
            .collect();
        let task = BatchTask {
            images,
            output_dir: deep_output_dir(temp.path()),
            batch_size: 200,
            global: true,
        };

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = run_batch(&engine, &task, &params(), &PathRegistry::new(), &cancel);
        canceller.join().unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed, 0);
        assert!(outcome.failed.is_empty());
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "executor must not wait out the stalled engine"
        );
    }

    #[test]
    fn test_broken_pipe_fails_unsubmitted_images_only() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::from_program(write_closing_engine(temp.path()));
        let images: Vec<PathBuf> = (0..100)
            .map(|i| write_test_image(temp.path(), &format!("p{:03}.png", i), 1000, 1400))
            .collect();
        let count = images.len();
        let task = BatchTask {
            images,
            output_dir: deep_output_dir(temp.path()),
            batch_size: count,
            global: true,
        };

        let outcome = run_batch(
            &engine,
            &task,
            &params(),
            &PathRegistry::new(),
            &CancelToken::new(),
        );

        assert!(!outcome.cancelled);
        assert!(
            outcome.processed < count,
            "pipe closed early, not everything can have been queued"
        );
        assert!(!outcome.failed.is_empty());
        assert_eq!(outcome.processed + outcome.failed.len(), count);
    }
}
