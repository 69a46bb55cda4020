//! External process execution with output capture and timeout control
//!
//! Output pipes are drained by dedicated reader threads while the calling
//! thread waits on the child, so a child that fills its pipe buffer can never
//! stall. On timeout the whole process group is killed (Unix) and whatever
//! output was read so far is returned.
//!
//! Launches made with a [`ProcessRegistry`] are tracked until they exit, so a
//! batch ceiling or an interrupt can kill every live process group at once.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exit code reported when a process was killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

// How long reader threads get to drain pipes once the child is gone
const READER_GRACE: Duration = Duration::from_secs(1);

/// How stdout and stderr are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// stderr is appended into the same buffer as stdout
    #[default]
    Merged,
    /// stdout and stderr are kept apart
    Separate,
}

/// A single command to execute
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<OsString, OsString>,
    /// Search-path variable and the directories to prepend to it
    pub search_path: Option<(OsString, Vec<PathBuf>)>,
    pub timeout: Option<Duration>,
    pub capture: CaptureMode,
    pub registry: Option<ProcessRegistry>,
}

impl ProcessInvocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            search_path: None,
            timeout: None,
            capture: CaptureMode::Merged,
            registry: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Prepend `dir` to the path-list variable `var`, keeping any existing value as a suffix
    ///
    /// Repeated calls accumulate directories in call order.
    pub fn prepend_search_path(mut self, var: impl Into<OsString>, dir: impl Into<PathBuf>) -> Self {
        let var = var.into();
        match &mut self.search_path {
            Some((existing, dirs)) if *existing == var => dirs.push(dir.into()),
            _ => self.search_path = Some((var, vec![dir.into()])),
        }
        self
    }

    /// Set the timeout; a zero duration disables it
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn capture(mut self, mode: CaptureMode) -> Self {
        self.capture = mode;
        self
    }

    /// Track the launched process in `registry` until it exits
    pub fn registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn to_command(&self) -> Result<Command> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&self.env);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        if let Some((var, dirs)) = &self.search_path {
            let existing = self
                .env
                .get(var)
                .cloned()
                .or_else(|| env::var_os(var));
            let value = prepend_path_list(dirs, existing.as_deref())?;
            command.env(var, value);
        }

        // Own process group so a timeout can take down grandchildren too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Ok(command)
    }
}

/// Live child process groups that can be killed together
///
/// Clones share state. Once cancelled, every live group is killed and later
/// launches through the registry fail without spawning.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    state: Arc<Mutex<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    cancelled: bool,
    live: BTreeSet<u32>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Number of tracked processes that have not exited yet
    pub fn live(&self) -> usize {
        self.lock().live.len()
    }

    /// Refuse further launches and kill every live process group
    ///
    /// Returns how many groups were signalled.
    pub fn cancel(&self) -> usize {
        let mut state = self.lock();
        state.cancelled = true;
        for pid in &state.live {
            kill_group(*pid);
        }
        state.live.len()
    }

    /// Track `pid`; false if the registry was cancelled in the meantime
    fn register(&self, pid: u32) -> bool {
        let mut state = self.lock();
        if state.cancelled {
            return false;
        }
        state.live.insert(pid);
        true
    }

    fn unregister(&self, pid: u32) {
        self.lock().live.remove(&pid);
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of running one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    /// stdout, or stdout and stderr interleaved in merged mode
    pub output: String,
    /// stderr, only in separate mode
    pub stderr: Option<String>,
    /// Killed by a signal or for exceeding the timeout
    pub abnormal: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.abnormal
    }

    pub fn timed_out(&self) -> bool {
        self.abnormal && self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// stdout followed by stderr, whichever capture mode was used
    pub fn combined_output(&self) -> String {
        match &self.stderr {
            Some(stderr) if !stderr.is_empty() => format!("{}{}", self.output, stderr),
            _ => self.output.clone(),
        }
    }
}

/// Join `dirs` in front of an existing path-list value using the host separator
pub fn prepend_path_list(dirs: &[PathBuf], existing: Option<&OsStr>) -> Result<OsString> {
    let inherited = existing
        .map(|value| env::split_paths(value).collect::<Vec<_>>())
        .unwrap_or_default();

    let joined = dirs
        .iter()
        .cloned()
        .chain(inherited.into_iter().filter(|p| !p.as_os_str().is_empty()));

    env::join_paths(joined).context("search path entry contains the path separator")
}

/// Run a process to completion or timeout
///
/// A non-zero exit code is a normal outcome. Errors are returned only when the
/// process cannot be launched or waited on.
pub fn run_process(invocation: &ProcessInvocation) -> Result<ProcessOutcome> {
    let program = invocation.program.to_string_lossy();
    if invocation.registry.as_ref().map_or(false, ProcessRegistry::is_cancelled) {
        bail!("launch of {} cancelled", program);
    }

    let mut command = invocation.to_command()?;
    debug!(
        program = %program,
        args = ?invocation.args,
        cwd = ?invocation.working_dir,
        "launching process"
    );

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to launch {}", program))?;

    let pid = child.id();
    let Some(registry) = &invocation.registry else {
        return supervise(&mut child, invocation);
    };
    if !registry.register(pid) {
        terminate(&mut child);
        bail!("launch of {} cancelled", program);
    }
    let outcome = supervise(&mut child, invocation);
    registry.unregister(pid);
    outcome
}

/// Capture output and wait for `child`, enforcing the invocation's timeout
fn supervise(child: &mut Child, invocation: &ProcessInvocation) -> Result<ProcessOutcome> {
    let capture = OutputCapture::start(child, invocation.capture);

    let waited = match invocation.timeout {
        Some(timeout) => wait_with_deadline(child, timeout),
        None => child
            .wait()
            .map(Some)
            .context("failed to wait for child process"),
    };

    let status = match waited {
        Ok(status) => status,
        Err(e) => {
            terminate(child);
            return Err(e);
        }
    };

    match status {
        Some(status) => {
            // Background grandchildren may hold the pipes open after the child exits
            let (output, stderr) = capture.finish(READER_GRACE);
            let (exit_code, abnormal) = decode_exit_status(status);
            Ok(ProcessOutcome {
                exit_code,
                output,
                stderr,
                abnormal,
            })
        }
        None => {
            warn!(
                program = %invocation.program.to_string_lossy(),
                timeout_ms = invocation.timeout.map(|t| t.as_millis() as u64),
                "process timed out, terminating"
            );
            terminate(child);
            let (output, stderr) = capture.finish(READER_GRACE);
            Ok(ProcessOutcome {
                exit_code: TIMEOUT_EXIT_CODE,
                output,
                stderr,
                abnormal: true,
            })
        }
    }
}

/// Poll until the child exits or the deadline passes (`None`)
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill the child and its process group, then reap it
fn terminate(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    if let Err(e) = child.wait() {
        warn!(pid = child.id(), error = %e, "failed to reap terminated process");
    }
}

/// SIGKILL the process group led by `pid`
fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn decode_exit_status(status: ExitStatus) -> (i32, bool) {
    if let Some(code) = status.code() {
        return (code, false);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, true);
        }
    }

    (1, true)
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Reader threads draining the child's pipes into shared buffers
struct OutputCapture {
    stdout: SharedBuffer,
    stderr: Option<SharedBuffer>,
    done: mpsc::Receiver<()>,
    readers: usize,
}

impl OutputCapture {
    fn start(child: &mut Child, mode: CaptureMode) -> Self {
        let (tx, done) = mpsc::channel();
        let stdout: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        let stderr = match mode {
            CaptureMode::Merged => None,
            CaptureMode::Separate => Some(Arc::new(Mutex::new(Vec::new()))),
        };

        let mut readers = 0;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Arc::clone(&stdout), tx.clone());
            readers += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            let sink = stderr.as_ref().unwrap_or(&stdout);
            spawn_reader(pipe, Arc::clone(sink), tx.clone());
            readers += 1;
        }

        Self {
            stdout,
            stderr,
            done,
            readers,
        }
    }

    /// Wait up to `grace` for the readers and decode the buffers
    fn finish(self, grace: Duration) -> (String, Option<String>) {
        let deadline = Instant::now() + grace;
        for _ in 0..self.readers {
            let received = self
                .done
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .is_ok();
            if !received {
                debug!("output reader still running, returning partial output");
                break;
            }
        }

        (snapshot(&self.stdout), self.stderr.as_ref().map(snapshot))
    }
}

fn spawn_reader<R>(mut source: R, sink: SharedBuffer, done: mpsc::Sender<()>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut out) => out.extend_from_slice(&buf[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&buf[..n]),
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
}

fn snapshot(buffer: &SharedBuffer) -> String {
    let bytes = match buffer.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_path_list_keeps_existing_suffix() {
        let existing = env::join_paths(["/opt/lib", "/usr/lib"]).unwrap();
        let value = prepend_path_list(&[PathBuf::from("/deps")], Some(existing.as_os_str())).unwrap();

        let expected = env::join_paths(["/deps", "/opt/lib", "/usr/lib"]).unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_prepend_path_list_without_existing_value() {
        let value = prepend_path_list(&[PathBuf::from("/a"), PathBuf::from("/b")], None).unwrap();
        assert_eq!(value, env::join_paths(["/a", "/b"]).unwrap());

        let empty = OsString::new();
        let value = prepend_path_list(&[PathBuf::from("/a")], Some(empty.as_os_str())).unwrap();
        assert_eq!(value, OsString::from("/a"));
    }

    #[test]
    fn test_zero_timeout_disables_timeout() {
        let invocation = ProcessInvocation::new("true").timeout(Some(Duration::ZERO));
        assert_eq!(invocation.timeout, None);
    }

    #[test]
    fn test_missing_executable_is_an_error() {
        let invocation = ProcessInvocation::new("definitely-not-a-real-binary-xyz123");
        let err = run_process(&invocation).unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> ProcessInvocation {
        ProcessInvocation::new("/bin/sh").arg("-c").arg(script)
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout_and_exit_code() {
        let outcome = run_process(&sh("echo hello; exit 3")).unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.abnormal);
        assert!(!outcome.success());
        assert_eq!(outcome.output.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_merged_capture_includes_stderr() {
        let outcome = run_process(&sh("echo out; echo err >&2")).unwrap();
        assert!(outcome.success());
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
        assert_eq!(outcome.stderr, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_separate_capture_splits_streams() {
        let invocation = sh("echo out; echo err >&2").capture(CaptureMode::Separate);
        let outcome = run_process(&invocation).unwrap();
        assert_eq!(outcome.output.trim(), "out");
        assert_eq!(outcome.stderr.as_deref().map(str::trim), Some("err"));
        assert!(outcome.combined_output().contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn test_large_output_does_not_deadlock() {
        // Well beyond a 64 KiB pipe buffer on both streams
        let script = "i=0; while [ $i -lt 4000 ]; do \
                      echo 0123456789012345678901234567890123456789; \
                      echo 0123456789012345678901234567890123456789 >&2; \
                      i=$((i+1)); done";
        let outcome = run_process(&sh(script)).unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.output.lines().count(), 8000);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_process_and_returns_sentinel() {
        let start = Instant::now();
        let invocation = sh("echo started; sleep 30").timeout(Some(Duration::from_millis(300)));
        let outcome = run_process(&invocation).unwrap();

        assert!(outcome.timed_out());
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(outcome.output.contains("started"));
    }

    #[cfg(unix)]
    #[test]
    fn test_working_directory_is_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let outcome = run_process(&sh("pwd").current_dir(dir.path())).unwrap();
        let reported = PathBuf::from(outcome.output.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_search_path_is_prepended_to_existing_value() {
        let invocation = sh("echo \"$HEALTH_TEST_PATH\"")
            .env("HEALTH_TEST_PATH", "/existing")
            .prepend_search_path("HEALTH_TEST_PATH", "/first")
            .prepend_search_path("HEALTH_TEST_PATH", "/second");
        let outcome = run_process(&invocation).unwrap();
        assert_eq!(outcome.output.trim(), "/first:/second:/existing");
    }

    #[cfg(unix)]
    #[test]
    fn test_background_grandchild_does_not_hold_untimed_run() {
        let start = Instant::now();
        let outcome = run_process(&sh("sleep 4 & echo hi")).unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.output.trim(), "hi");
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_cancelled_registry_refuses_launch() {
        let registry = ProcessRegistry::new();
        assert_eq!(registry.cancel(), 0);
        assert!(registry.is_cancelled());

        let err = run_process(&ProcessInvocation::new("true").registry(registry.clone())).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(registry.live(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_live_process_group() {
        let registry = ProcessRegistry::new();
        let invocation = sh("sleep 30 & sleep 30").registry(registry.clone());
        let start = Instant::now();
        let handle = thread::spawn(move || run_process(&invocation));

        while registry.live() == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(registry.cancel(), 1);

        let outcome = handle.join().unwrap().unwrap();
        assert!(outcome.abnormal);
        assert_eq!(outcome.exit_code, 128 + 9);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(registry.live(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_killed_by_signal_is_abnormal() {
        let outcome = run_process(&sh("kill -9 $$")).unwrap();
        assert!(outcome.abnormal);
        assert!(!outcome.timed_out());
        assert_eq!(outcome.exit_code, 128 + 9);
    }
}
