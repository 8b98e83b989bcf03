use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::error::PreconditionError;

pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 外部プロセスのライフサイクル。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// 起動済みだが、所有者が入出力の接続を終えていない
    Starting,
    Running,
    Terminating,
    Exited,
}

/// 子プロセスを所有するハンドル。
///
/// どの経路で drop されても「穏当な終了要求 → 猶予 → 強制 kill」を必ず通る。
pub struct ManagedProcess {
    child: Child,
    state: ProcessState,
    grace: Duration,
    pub label: String,
}

/// 起動時の標準入出力の扱い。
#[derive(Clone, Copy, Debug)]
pub struct PipeSpec {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr_inherit: bool,
}

impl ManagedProcess {
    pub fn spawn(
        path: &Path,
        args: &[String],
        pipes: PipeSpec,
        grace: Duration,
        label: impl Into<String>,
    ) -> Result<Self> {
        let label = label.into();
        log::debug!("{label}: starting {} {}", path.display(), args.join(" "));
        let mut cmd = Command::new(path);
        cmd.args(args)
            .stdin(if pipes.stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(if pipes.stdout { Stdio::piped() } else { Stdio::null() })
            .stderr(if pipes.stderr_inherit { Stdio::inherit() } else { Stdio::null() });
        let child = cmd
            .spawn()
            .with_context(|| format!("{label}: failed to spawn {}", path.display()))?;
        Ok(Self {
            child,
            state: ProcessState::Starting,
            grace,
            label,
        })
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// 入出力の準備が済んだら呼ぶ。終了処理に入った後は何もしない。
    pub fn mark_running(&mut self) {
        if self.state == ProcessState::Starting {
            self.state = ProcessState::Running;
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child.stdin.take().ok_or_else(|| anyhow!("{}: no stdin", self.label))
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child.stdout.take().ok_or_else(|| anyhow!("{}: no stdout", self.label))
    }

    /// 終了済みかを確認し、終了していれば状態を `Exited` に進める。
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        if self.state == ProcessState::Exited {
            return None;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.state = ProcessState::Exited;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                log::debug!("{}: try_wait failed: {e}", self.label);
                None
            }
        }
    }

    /// 穏当に終了を求め、猶予内に終わらなければ kill する。何度呼んでもよい。
    pub fn terminate(&mut self) {
        if self.state == ProcessState::Exited {
            return;
        }
        if self.try_wait().is_some() {
            return;
        }
        self.state = ProcessState::Terminating;
        request_exit(&mut self.child);

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if self.try_wait().is_some() {
                return;
            }
            std::thread::sleep(PROCESS_POLL_INTERVAL);
        }
        log::debug!("{}: did not exit within {:?}, killing", self.label, self.grace);
        self.kill();
    }

    /// 猶予なしで kill して回収する。
    pub fn kill(&mut self) {
        if self.state == ProcessState::Exited {
            return;
        }
        self.state = ProcessState::Terminating;
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.state = ProcessState::Exited;
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("label", &self.label)
            .field("pid", &self.child.id())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    // SIGTERM で終了を要求する。送信に失敗したら kill に任せる。
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: 自プロセスが起動し未回収の子プロセスの pid に対するシグナル送信のみ。
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.kill();
}

/// 外部バイナリが存在し実行可能かを確認する。
pub fn check_executable(
    path: &Path,
    role: &'static str,
) -> std::result::Result<PathBuf, PreconditionError> {
    if !path.is_file() {
        return Err(PreconditionError::Missing {
            role,
            path: path.to_path_buf(),
        });
    }
    if !is_executable(path) {
        return Err(PreconditionError::NotExecutable {
            role,
            path: path.to_path_buf(),
        });
    }
    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const SH: &str = "/bin/sh";

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    const QUIET: PipeSpec = PipeSpec {
        stdin: false,
        stdout: false,
        stderr_inherit: false,
    };

    #[test]
    fn terminate_stops_long_running_process() {
        let mut proc = ManagedProcess::spawn(
            Path::new(SH),
            &sh("sleep 30"),
            QUIET,
            Duration::from_secs(5),
            "sleeper",
        )
        .unwrap();
        assert_eq!(proc.state(), ProcessState::Starting);
        proc.mark_running();
        assert_eq!(proc.state(), ProcessState::Running);
        let start = Instant::now();
        proc.terminate();
        assert_eq!(proc.state(), ProcessState::Exited);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn terminate_forces_kill_when_sigterm_is_ignored() {
        let mut proc = ManagedProcess::spawn(
            Path::new(SH),
            &sh("trap '' TERM; sleep 30"),
            QUIET,
            Duration::from_millis(200),
            "stubborn",
        )
        .unwrap();
        // trap が設定されるのを待つ
        std::thread::sleep(Duration::from_millis(100));
        proc.terminate();
        assert_eq!(proc.state(), ProcessState::Exited);
    }

    #[test]
    fn check_executable_reports_missing_and_non_executable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            check_executable(&missing, "evaluator"),
            Err(PreconditionError::Missing { .. })
        ));

        let plain = dir.path().join("plain.txt");
        std::fs::write(&plain, "not a program").unwrap();
        assert!(matches!(
            check_executable(&plain, "evaluator"),
            Err(PreconditionError::NotExecutable { .. })
        ));

        assert!(check_executable(Path::new(SH), "evaluator").is_ok());
    }

    #[test]
    fn process_can_be_terminated_while_starting() {
        let mut proc = ManagedProcess::spawn(
            Path::new(SH),
            &sh("sleep 30"),
            QUIET,
            Duration::from_secs(5),
            "starting",
        )
        .unwrap();
        assert_eq!(proc.state(), ProcessState::Starting);
        proc.terminate();
        assert_eq!(proc.state(), ProcessState::Exited);
        // 終了後は Running に戻らない
        proc.mark_running();
        assert_eq!(proc.state(), ProcessState::Exited);
    }
}
