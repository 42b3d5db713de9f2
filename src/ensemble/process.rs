use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use super::task::{SCORES_ARRAY, Task, WorkerOutput, WorkerReport};
use super::{EnsembleError, WorkerLauncher};
use crate::config::RunConfig;
use crate::features::archive;

/// Subcommand under which the binary serves one ensemble task.
pub const WORKER_SUBCOMMAND: &str = "ensemble-worker";

const STDERR_TAIL_LINES: usize = 20;

/// Spawns one fresh child process per task.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `ensemble.worker_program` when set, otherwise the running executable.
    pub fn from_config(conf: &RunConfig) -> Result<Self, EnsembleError> {
        match conf
            .ensemble
            .worker_program
            .as_ref()
            .filter(|program| !program.as_os_str().is_empty())
        {
            Some(program) => Ok(Self::new(program.clone())),
            None => Ok(Self::new(std::env::current_exe()?)),
        }
    }
}

impl ProcessLauncher {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, task: &Task) -> Result<WorkerOutput, EnsembleError> {
        let failure = |reason: String| EnsembleError::WorkerFailure {
            index: task.index,
            model: task.model_path.clone(),
            reason,
        };
        let payload = serde_json::to_vec(task)
            .map_err(|err| failure(format!("failed to encode task: {err}")))?;
        let mut child = self
            .command()
            .spawn()
            .map_err(|err| {
                failure(format!("failed to spawn {}: {err}", self.program.display()))
            })?;
        let pid = child.id();
        debug!(
            "Spawned worker pid {pid} for model {} ({})",
            task.index,
            task.model_path.display()
        );
        let stderr_pipe = child.stderr.take();
        let dispatch = tracing::dispatcher::get_default(|current| current.clone());
        let (sent, output, tail) = std::thread::scope(|scope| {
            let forward = scope.spawn(|| match stderr_pipe {
                Some(pipe) => tracing::dispatcher::with_default(&dispatch, || {
                    forward_stderr(BufReader::new(pipe), task.index, pid)
                }),
                None => Vec::new(),
            });
            // The worker reads the whole task before doing anything else.
            let sent = match child.stdin.take() {
                Some(mut stdin) => stdin.write_all(&payload),
                None => Ok(()),
            };
            let output = child.wait_with_output();
            let tail = forward.join().unwrap_or_default();
            (sent, output, tail)
        });
        let output = output.map_err(|err| failure(format!("failed to wait for worker: {err}")))?;
        let stderr = format_tail(&tail);
        if !output.status.success() {
            return Err(failure(format!("worker exited with {}{stderr}", output.status)));
        }
        if let Err(err) = sent {
            return Err(failure(format!("failed to send task: {err}{stderr}")));
        }
        let report = parse_report(&output.stdout)
            .ok_or_else(|| failure(format!("worker sent no readable report{stderr}")))?;
        if report.index != task.index {
            return Err(failure(format!(
                "worker reported task {} instead of {}",
                report.index, task.index
            )));
        }
        let scores = archive::read_array(&task.scores_path, SCORES_ARRAY)
            .map_err(|err| failure(format!("unreadable scores: {err}")))?;
        if scores.dim() != (report.rows, report.cols) {
            return Err(failure(format!(
                "worker reported {}x{} scores, archive holds {}x{}",
                report.rows,
                report.cols,
                scores.nrows(),
                scores.ncols()
            )));
        }
        Ok(WorkerOutput {
            scores,
            worker_pid: Some(report.pid),
        })
    }
}

fn parse_report(stdout: &[u8]) -> Option<WorkerReport> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line.trim()).ok())
}

/// Log every worker stderr line in this process and keep the last few.
fn forward_stderr(reader: impl BufRead, index: usize, pid: u32) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    for line in reader.lines().map_while(Result::ok) {
        if line.trim().is_empty() {
            continue;
        }
        info!(worker = index, pid, "{line}");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

/// Worker stderr lines formatted for appending to an error.
fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    format!("\nworker stderr:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn report_is_the_last_non_empty_line() {
        let stdout = b"noise\n{\"index\":3,\"pid\":99,\"rows\":2,\"cols\":1}\n\n";
        assert_eq!(
            parse_report(stdout),
            Some(WorkerReport {
                index: 3,
                pid: 99,
                rows: 2,
                cols: 1
            })
        );
        assert_eq!(parse_report(b"not json\n"), None);
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {i}\n\n")).collect();
        let tail = forward_stderr(std::io::Cursor::new(stderr), 0, 1);
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        let formatted = format_tail(&tail);
        assert!(formatted.starts_with("\nworker stderr:\nline 10"));
        assert!(formatted.ends_with("line 29"));
        assert_eq!(format_tail(&[]), "");
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[cfg(unix)]
    #[test]
    fn worker_stderr_is_logged_by_the_coordinator() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("chatty-worker.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho 'load pretrained model from m.json' >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let task = Task {
            index: 2,
            config: RunConfig::default(),
            model_path: dir.path().join("m.json"),
            features_path: dir.path().join("features.zip"),
            scores_path: dir.path().join("scores.zip"),
            batch_size: 8,
        };

        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, || {
            ProcessLauncher::new(script.clone()).launch(&task)
        });

        let logged = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("load pretrained model from m.json"), "{logged}");
        assert!(logged.contains("worker=2"), "{logged}");
        match result {
            Err(EnsembleError::WorkerFailure { reason, .. }) => {
                assert!(reason.contains("load pretrained model from m.json"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_worker_program_falls_back_to_current_exe() {
        let mut conf = RunConfig::default();
        conf.ensemble.worker_program = Some(PathBuf::new());
        let launcher = ProcessLauncher::from_config(&conf).unwrap();
        assert_eq!(launcher.program, std::env::current_exe().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_is_a_worker_failure() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task {
            index: 4,
            config: RunConfig::default(),
            model_path: dir.path().join("model.json"),
            features_path: dir.path().join("features.zip"),
            scores_path: dir.path().join("scores.zip"),
            batch_size: 8,
        };
        let err = ProcessLauncher::new("false").launch(&task).unwrap_err();
        assert!(matches!(err, EnsembleError::WorkerFailure { index: 4, .. }));
    }
}
