//! Subprocess plumbing
//!
//! The build worker proper is an external program; [`CommandWorker`]
//! bridges to it with a small exit-code protocol and a per-package log
//! file. Prerun/postrun hooks from the configuration run through the
//! same module.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::core::worker::{BuildFailure, BuildJob, BuildOutcome, BuildResult, BuildWorker};
use crate::error::SetupError;

/// Exit code a worker uses for a staged build
const EXIT_STAGED: i32 = 10;
/// Exit code a worker uses for a deliberate skip
const EXIT_SKIPPED: i32 = 20;

/// Log line prefix a worker uses to announce the built version
const VERSION_MARKER: &str = "built version: ";
/// Log line prefix a worker uses to announce missing dependencies
const MISSING_MARKER: &str = "missing dependencies: ";

/// Runs the configured worker command once per package.
///
/// The command gets the pkgbase appended to its argv, the package
/// directory as working directory, and the commit message in
/// `LILAC_COMMIT_MSG`. Its combined output is captured to
/// `<logdir>/<pkgbase>.log`.
#[derive(Debug)]
pub struct CommandWorker {
    argv: Vec<String>,
    repodir: PathBuf,
}

impl CommandWorker {
    pub fn new(argv: Vec<String>, repodir: PathBuf) -> Self {
        Self { argv, repodir }
    }
}

impl BuildWorker for CommandWorker {
    fn build(&self, worker_id: usize, job: &BuildJob) -> BuildOutcome {
        let pkgbase = &job.to_build.pkgbase;
        let logfile = job.logdir.join(format!("{pkgbase}.log"));
        let started = Instant::now();

        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(pkgbase)
            .current_dir(self.repodir.join(pkgbase))
            .env("LILAC_COMMIT_MSG", &job.commit_msg)
            .env("LILAC_WORKER_ID", worker_id.to_string())
            .stdin(Stdio::null())
            .output();

        let elapsed = started.elapsed();
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return BuildOutcome {
                    result: BuildResult::Failed(BuildFailure::Error(format!(
                        "cannot spawn worker: {e}"
                    ))),
                    version: None,
                    elapsed,
                    rusage: None,
                }
            }
        };

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        if let Err(e) = std::fs::write(&logfile, &log) {
            tracing::warn!("Cannot write build log {}: {e}", logfile.display());
        }

        let version = scan_marker(&log, VERSION_MARKER);
        let result = match output.status.code() {
            Some(0) => BuildResult::Successful,
            Some(EXIT_STAGED) => BuildResult::Staged,
            Some(EXIT_SKIPPED) => {
                BuildResult::Skipped(last_line(&log).unwrap_or_else(|| "skipped".to_string()))
            }
            code => match scan_marker(&log, MISSING_MARKER) {
                Some(names) => BuildResult::Failed(BuildFailure::MissingDependencies(
                    names.split_whitespace().map(String::from).collect(),
                )),
                None => BuildResult::Failed(BuildFailure::Error(format!(
                    "worker exited with {code:?}"
                ))),
            },
        };

        BuildOutcome {
            result,
            version,
            elapsed,
            rusage: None,
        }
    }
}

fn scan_marker(log: &str, marker: &str) -> Option<String> {
    log.lines()
        .rev()
        .find_map(|line| line.strip_prefix(marker))
        .map(|rest| rest.trim().to_string())
}

fn last_line(log: &str) -> Option<String> {
    log.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(String::from)
}

/// Worker used when no command is configured: everything is skipped
#[derive(Debug, Default)]
pub struct SkipAllWorker;

impl BuildWorker for SkipAllWorker {
    fn build(&self, _worker_id: usize, job: &BuildJob) -> BuildOutcome {
        tracing::warn!(
            "No build worker configured, skipping {}",
            job.to_build.pkgbase
        );
        BuildOutcome::of(BuildResult::Skipped("no build worker configured".to_string()))
    }
}

/// Run setup hooks; the first failing command aborts the batch
pub fn run_prerun(commands: &[Vec<String>]) -> Result<(), SetupError> {
    for argv in commands {
        let status = run_hook(argv);
        if status != 0 {
            return Err(SetupError::Prerun {
                argv: argv.clone(),
                status,
            });
        }
    }
    Ok(())
}

/// Run teardown hooks; failures are logged and ignored
pub fn run_postrun(commands: &[Vec<String>]) {
    for argv in commands {
        let status = run_hook(argv);
        if status != 0 {
            tracing::warn!("Postrun command {argv:?} exited with {status}");
        }
    }
}

fn run_hook(argv: &[String]) -> i32 {
    let Some((program, args)) = argv.split_first() else {
        return 0;
    };
    match Command::new(program).args(args).status() {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            tracing::warn!("Cannot run {program}: {e}");
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_marker_takes_last() {
        let log = "built version: 1.0\nnoise\nbuilt version: 2.0\n";
        assert_eq!(scan_marker(log, VERSION_MARKER), Some("2.0".to_string()));
        assert_eq!(scan_marker("nothing here", VERSION_MARKER), None);
    }

    #[test]
    fn test_run_prerun_failure_is_fatal() {
        let err = run_prerun(&[vec!["false".to_string()]]).unwrap_err();
        assert!(matches!(err, SetupError::Prerun { status: 1, .. }));
        assert!(run_prerun(&[vec!["true".to_string()]]).is_ok());
    }
}
