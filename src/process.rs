//! Child process runner.
//!
//! One [`Process`] runs one child: `run` spawns and returns the pid, `wait`
//! blocks until exit and collects the captured output, `kill` force-stops and
//! reaps. `run` and `wait` are split so the caller can record the pid in
//! between; a concurrent stop from another thread signals that pid while the
//! worker is still blocked in `wait`.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::debug;

/// How the child ended: a normal exit (any code) or a signal/abnormal stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Normal,
    Crash,
}

pub struct Process {
    child: Option<Child>,
    pid: u32,
    exit_code: i32,
    exit_kind: ExitKind,
    stdout_reader: Option<JoinHandle<String>>,
    stderr_reader: Option<JoinHandle<String>>,
    stdout: String,
    stderr: String,
}

impl Process {
    pub fn new() -> Process {
        Process {
            child: None,
            pid: 0,
            exit_code: -1,
            exit_kind: ExitKind::Crash,
            stdout_reader: None,
            stderr_reader: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Spawn the child. The working directory applies to the child only; the
    /// parent's cwd is never touched.
    pub fn run(&mut self, command: &str, arguments: &[String], startin: &str) -> Result<u32> {
        let mut cmd = Command::new(command);
        cmd.args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !startin.is_empty() {
            cmd.current_dir(startin);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start {command}"))?;
        // Drain both pipes on their own threads so a chatty child cannot fill
        // one pipe and stall before wait() is reached.
        let stdout = child.stdout.take().context("child stdout not piped")?;
        let stderr = child.stderr.take().context("child stderr not piped")?;
        self.stdout_reader = Some(spawn_reader(stdout));
        self.stderr_reader = Some(spawn_reader(stderr));
        self.pid = child.id();
        self.child = Some(child);
        debug!(pid = self.pid, command, "child started");
        Ok(self.pid)
    }

    /// Block until the child exits. Returns true iff it exited normally with
    /// code zero. Captured stdout/stderr are complete once this returns.
    pub fn wait(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };
        let status = child.wait();
        if let Some(reader) = self.stdout_reader.take() {
            self.stdout = reader.join().unwrap_or_default();
        }
        if let Some(reader) = self.stderr_reader.take() {
            self.stderr = reader.join().unwrap_or_default();
        }
        match status {
            Ok(status) => {
                if let Some(code) = status.code() {
                    self.exit_code = code;
                    self.exit_kind = ExitKind::Normal;
                } else {
                    // Signal-killed: negated signal number, crash status.
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        self.exit_code = -status.signal().unwrap_or(1);
                    }
                    #[cfg(not(unix))]
                    {
                        self.exit_code = -1;
                    }
                    self.exit_kind = ExitKind::Crash;
                }
            }
            Err(_) => {
                self.exit_code = -1;
                self.exit_kind = ExitKind::Crash;
            }
        }
        debug!(pid = self.pid, code = self.exit_code, "child exited");
        self.exit_code == 0
    }

    /// Force-stop the child and reap it. Returns once the child is gone.
    pub fn kill(&mut self) {
        if self.child.is_some() {
            Self::kill_pid(self.pid);
            self.wait();
        }
    }

    /// Signal a pid without reaping; the owning worker reaps in `wait`.
    pub fn kill_pid(pid: u32) {
        if pid == 0 {
            return;
        }
        #[cfg(unix)]
        {
            // SAFETY: kill(2) is safe to call with any pid and signal number.
            let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                // ESRCH: already gone, nothing to do.
                if err.raw_os_error() != Some(libc::ESRCH) {
                    debug!(pid, %err, "kill failed");
                }
            }
        }
    }

    /// Whether `command` can be located: an absolute path must be an
    /// executable file, a bare name is searched on `$PATH`.
    pub fn exists(command: &str) -> bool {
        let path = Path::new(command);
        if path.is_absolute() {
            return is_executable(path);
        }
        let Some(paths) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(command)))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn exit_kind(&self) -> ExitKind {
        self.exit_kind
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }
}

impl Default for Process {
    fn default() -> Self {
        Process::new()
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => bytes.extend_from_slice(&chunk[..n]),
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_finds_shell_on_path() {
        assert!(Process::exists("sh"));
    }

    #[test]
    fn exists_rejects_missing_absolute_path() {
        assert!(!Process::exists("/no/such/command/anywhere"));
        assert!(!Process::exists("definitely-not-a-real-command-xyz"));
    }

    #[test]
    fn echo_succeeds_and_captures_stdout() {
        let mut p = Process::new();
        let pid = p.run("echo", &["hello".to_string()], "").unwrap();
        assert!(pid > 0);
        assert!(p.wait());
        assert_eq!(p.exit_code(), 0);
        assert_eq!(p.exit_kind(), ExitKind::Normal);
        assert!(p.stdout().contains("hello"));
        assert!(p.stderr().is_empty());
    }

    #[test]
    fn nonzero_exit_is_normal_failure() {
        let mut p = Process::new();
        p.run("false", &[], "").unwrap();
        assert!(!p.wait());
        assert_eq!(p.exit_code(), 1);
        assert_eq!(p.exit_kind(), ExitKind::Normal);
    }

    #[cfg(unix)]
    #[test]
    fn killed_child_reports_crash_with_negated_signal() {
        let mut p = Process::new();
        p.run("sleep", &["30".to_string()], "").unwrap();
        p.kill();
        assert_eq!(p.exit_code(), -libc::SIGKILL);
        assert_eq!(p.exit_kind(), ExitKind::Crash);
    }

    #[test]
    fn startin_applies_to_child_only() {
        let before = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut p = Process::new();
        p.run("pwd", &[], dir.path().to_str().unwrap()).unwrap();
        assert!(p.wait());
        let reported = std::path::PathBuf::from(p.stdout().trim());
        assert!(
            reported
                .canonicalize()
                .map(|c| c == dir.path().canonicalize().unwrap())
                .unwrap_or(false)
        );
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
