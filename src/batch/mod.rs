//! Batch Process Orchestrator.
//!
//! Runs the external reconciliation worker for one product line:
//!
//! ```text
//! Idle -> Validating -> Launching -> Streaming -> AwaitingExit -> Completed | TimedOut | Failed
//! ```
//!
//! Both output pipes are drained on their own threads while the driving thread
//! waits on a ceiling timer. The ceiling covers the whole run; when it fires the
//! worker is killed and reaped and no output is parsed. On unix the worker leads
//! its own process group and the whole group is killed, so helpers it forked
//! cannot keep the output pipes open. Each call is a single attempt; there are no
//! retries.

pub mod report;

pub use report::{extract_report, BatchReport, BatchStats, WorkerReport};

use crate::config::{BatchConfig, DatabaseConfig};
use crate::registry::ProductLineRegistry;
use crossbeam_channel::{at, bounded, never, select, Receiver};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Validating,
    Launching,
    Streaming,
    AwaitingExit,
    Completed,
    TimedOut,
    Failed,
}

#[derive(Debug)]
pub enum BatchError {
    /// Product line not in the registry; nothing was launched
    InvalidProductLine { given: String, valid: Vec<String> },
    /// The worker could not be started or supervised
    Launch(String),
    /// The worker outlived the ceiling and was killed
    Timeout(Duration),
    /// The worker exited unsuccessfully; `code` is `None` when killed by a signal
    ExitStatus {
        code: Option<i32>,
        stderr: String,
        stdout: String,
    },
    /// Exit code 0 but no well-formed report on stdout
    Parse(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::InvalidProductLine { given, valid } => write!(
                f,
                "invalid product line: '{given}' (valid: {})",
                valid.join(", ")
            ),
            BatchError::Launch(msg) => write!(f, "Failed to launch worker: {msg}"),
            BatchError::Timeout(ceiling) => write!(
                f,
                "Worker timed out after {}s and was killed",
                ceiling.as_secs()
            ),
            BatchError::ExitStatus {
                code,
                stderr,
                stdout,
            } => {
                match code {
                    Some(code) => write!(f, "Worker failed with exit code {code}")?,
                    None => write!(f, "Worker was terminated by a signal")?,
                }
                if !stderr.trim().is_empty() {
                    write!(f, "\nstderr: {}", stderr.trim())?;
                }
                if !stdout.trim().is_empty() {
                    write!(f, "\nstdout: {}", stdout.trim())?;
                }
                Ok(())
            }
            BatchError::Parse(msg) => write!(f, "Failed to parse worker result: {msg}"),
        }
    }
}

impl std::error::Error for BatchError {}

/// Per-run bookkeeping
struct BatchRun {
    run_id: Uuid,
    product_type: String,
    state: BatchState,
    started: Instant,
}

impl BatchRun {
    fn new(product_type: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            product_type: product_type.trim().to_string(),
            state: BatchState::Idle,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: BatchState) {
        debug!("batch {}: {:?} -> {:?}", self.run_id, self.state, next);
        self.state = next;
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Launches and supervises reconciliation workers.
///
/// Holds no per-run state, so one orchestrator can serve concurrent runs for
/// different product lines from several threads.
pub struct BatchOrchestrator {
    registry: Arc<ProductLineRegistry>,
    database: DatabaseConfig,
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<ProductLineRegistry>,
        database: DatabaseConfig,
        batch: BatchConfig,
    ) -> Self {
        let timeout = batch.timeout();
        Self {
            registry,
            database,
            program: batch.program,
            args: batch.args,
            working_dir: batch.working_dir,
            env: batch.env.into_iter().collect(),
            timeout,
        }
    }

    /// Override the execution ceiling.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the worker for `product_type` and return its parsed report.
    ///
    /// # Errors
    ///
    /// See [`BatchError`]; every variant is a failed run.
    pub fn run(&self, product_type: &str) -> Result<BatchReport, BatchError> {
        let mut run = BatchRun::new(product_type);
        let result = self.supervise(&mut run);
        self.record(&run, result.as_ref().err());
        result.map(|worker| BatchReport::completed(run.run_id, worker, run.elapsed_ms()))
    }

    /// Like [`run`](Self::run), with errors folded into a failed report.
    pub fn execute(&self, product_type: &str) -> BatchReport {
        let mut run = BatchRun::new(product_type);
        let result = self.supervise(&mut run);
        self.record(&run, result.as_ref().err());
        match result {
            Ok(worker) => BatchReport::completed(run.run_id, worker, run.elapsed_ms()),
            Err(e) => BatchReport::failed(
                run.run_id,
                &run.product_type,
                run.state,
                &e,
                run.elapsed_ms(),
            ),
        }
    }

    fn record(&self, run: &BatchRun, error: Option<&BatchError>) {
        match error {
            None => info!(
                "batch {} for {} completed in {}ms",
                run.run_id,
                run.product_type,
                run.elapsed_ms()
            ),
            Some(e) => warn!("batch {} for {} failed: {e}", run.run_id, run.product_type),
        }
        #[cfg(feature = "metrics")]
        METRICS.record_batch_run(match (run.state, error) {
            (BatchState::Completed, _) => "completed",
            (BatchState::TimedOut, _) => "timed_out",
            (_, Some(BatchError::InvalidProductLine { .. })) => "rejected",
            _ => "failed",
        });
    }

    fn supervise(&self, run: &mut BatchRun) -> Result<WorkerReport, BatchError> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::batch_run_span(&run.product_type, &run.run_id.to_string()).entered();

        let result = self.drive(run);
        let terminal = match &result {
            Ok(_) => BatchState::Completed,
            Err(BatchError::Timeout(_)) => BatchState::TimedOut,
            Err(_) => BatchState::Failed,
        };
        run.advance(terminal);
        result
    }

    fn drive(&self, run: &mut BatchRun) -> Result<WorkerReport, BatchError> {
        run.advance(BatchState::Validating);
        if !self.registry.is_valid(&run.product_type) {
            return Err(BatchError::InvalidProductLine {
                given: run.product_type.clone(),
                valid: self.registry.names(),
            });
        }

        run.advance(BatchState::Launching);
        let deadline = run.started + self.timeout;
        let mut child = self.spawn(&run.product_type)?;
        info!(
            "batch {}: worker pid {} started for {}",
            run.run_id,
            child.id(),
            run.product_type
        );

        run.advance(BatchState::Streaming);
        let (stdout, stderr) = match drain(&mut child, deadline) {
            Ok(output) => output,
            Err(e) => {
                terminate(&mut child);
                return Err(self.map_deadline(e));
            }
        };

        run.advance(BatchState::AwaitingExit);
        let status = match wait_until(&mut child, deadline) {
            Ok(status) => status,
            Err(e) => {
                terminate(&mut child);
                return Err(self.map_deadline(e));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        if !stderr.trim().is_empty() {
            debug!("batch {} stderr:\n{}", run.run_id, stderr.trim_end());
        }
        if status.success() {
            extract_report(&stdout)
        } else {
            Err(BatchError::ExitStatus {
                code: status.code(),
                stderr,
                stdout,
            })
        }
    }

    fn map_deadline(&self, e: Supervision) -> BatchError {
        match e {
            Supervision::Deadline => BatchError::Timeout(self.timeout),
            Supervision::Io(msg) => BatchError::Launch(msg),
        }
    }

    fn spawn(&self, product_type: &str) -> Result<Child, BatchError> {
        let (user, password) = self.database.credentials();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--db-url")
            .arg(&self.database.url)
            .arg("--db-user")
            .arg(user)
            .arg("--db-password")
            .arg(password)
            .arg("--product-type")
            .arg(product_type)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout also reaches helpers holding the pipes.
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|e| BatchError::Launch(format!("{}: {e}", self.program)))
    }
}

/// Why supervision stopped early
enum Supervision {
    Deadline,
    Io(String),
}

/// Read a pipe to EOF on its own thread; the buffer arrives as one message.
fn spawn_reader<R>(mut stream: R, name: &str) -> Result<Receiver<Vec<u8>>, Supervision>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(format!("batch-{name}"))
        .spawn(move || {
            let mut buffer = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buffer) {
                warn!("reading worker output failed: {e}");
            }
            // Receiver is gone once the run gave up.
            let _ = tx.send(buffer);
        })
        .map_err(|e| Supervision::Io(format!("cannot start {name} reader: {e}")))?;
    Ok(rx)
}

/// Drain stdout and stderr concurrently until both close or the deadline passes.
fn drain(child: &mut Child, deadline: Instant) -> Result<(Vec<u8>, Vec<u8>), Supervision> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Supervision::Io("worker stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Supervision::Io("worker stderr was not captured".to_string()))?;
    let stdout_rx = spawn_reader(stdout, "stdout")?;
    let stderr_rx = spawn_reader(stderr, "stderr")?;

    let timer = at(deadline);
    let closed = never();
    let mut out = None;
    let mut err = None;
    while out.is_none() || err.is_none() {
        select! {
            recv(if out.is_none() { &stdout_rx } else { &closed }) -> msg => {
                out = Some(msg.unwrap_or_default());
            }
            recv(if err.is_none() { &stderr_rx } else { &closed }) -> msg => {
                err = Some(msg.unwrap_or_default());
            }
            recv(timer) -> _ => return Err(Supervision::Deadline),
        }
    }
    Ok((out.unwrap_or_default(), err.unwrap_or_default()))
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<ExitStatus, Supervision> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => return Err(Supervision::Io(format!("waiting for worker failed: {e}"))),
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Supervision::Deadline);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill the worker (and on unix its whole process group) and reap it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    kill_process_group(child.id());
    if let Err(e) = child.kill() {
        warn!("killing worker pid {} failed: {e}", child.id());
    }
    match child.wait() {
        Ok(status) => debug!("worker pid {} reaped ({status})", child.id()),
        Err(e) => warn!("reaping worker pid {} failed: {e}", child.id()),
    }
}

/// SIGKILL every process in the group led by `pgid`, so descendants that inherited
/// the output pipes let the reader threads reach EOF.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let group = format!("-{pgid}");
    match Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => debug!("killed worker process group {pgid}"),
        Ok(status) => debug!("kill of process group {pgid} exited with {status}"),
        Err(e) => warn!("cannot signal worker process group {pgid}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn orchestrator(program: &str, args: &[&str]) -> BatchOrchestrator {
        let registry = Arc::new(ProductLineRegistry::with_lines(["VGA", "MB"]).unwrap());
        let batch = BatchConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: PathBuf::from("."),
            timeout_seconds: 5,
            env: HashMap::new(),
        };
        BatchOrchestrator::new(registry, DatabaseConfig::default(), batch)
    }

    #[test]
    fn test_unknown_product_line_lists_valid_ones() {
        let err = orchestrator("/nonexistent/worker", &[]).run("NB").unwrap_err();
        match &err {
            BatchError::InvalidProductLine { given, valid } => {
                assert_eq!(given, "NB");
                assert_eq!(valid, &vec!["VGA".to_string(), "MB".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("VGA, MB"));
    }

    #[test]
    fn test_launch_failure_is_reported() {
        let report = orchestrator("/nonexistent/worker", &[]).execute("VGA");
        assert!(!report.success);
        assert_eq!(report.state, BatchState::Failed);
        assert!(report.message.starts_with("Failed to launch worker"), "{}", report.message);
        assert_eq!(report.product_type, "VGA");
    }

    #[test]
    fn test_exit_status_message_carries_both_streams() {
        let err = BatchError::ExitStatus {
            code: Some(2),
            stderr: "Traceback: boom\n".to_string(),
            stdout: "{\"success\":true}\n".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("exit code 2"));
        assert!(message.contains("stderr: Traceback: boom"));
        assert!(message.contains("stdout: {\"success\":true}"));
    }

    #[test]
    fn test_with_timeout_overrides_config() {
        let orchestrator = orchestrator("sh", &[]).with_timeout(Duration::from_secs(1));
        assert_eq!(orchestrator.timeout(), Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_receives_connection_arguments() {
        // Echo the arguments back inside the report message.
        let script = r#"printf '{"success":true,"message":"%s","productType":"%s"}' "$*" "$8""#;
        let report = orchestrator("sh", &["-c", script, "worker"]).run("MB").unwrap();
        assert_eq!(report.product_type, "MB");
        assert!(report.message.starts_with("--db-url postgresql://"), "{}", report.message);
        assert!(report.message.contains("--db-user postgres --db-password postgres"));
        assert!(report.message.ends_with("--product-type MB"));
    }
}
