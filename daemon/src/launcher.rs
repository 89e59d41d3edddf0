//! Child process plumbing shared by the process-based backends
//!
//! Binary resolution (well-known locations first, then `PATH`), argument
//! templates, liveness tracking with a settle window and graceful shutdown.

use common::DisplayError;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Timing knobs for launched processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTiming {
    /// How long a child must stay alive before it counts as started
    pub settle: Duration,
    /// How long a graceful termination may take before the child is killed
    pub grace: Duration,
}

impl Default for ProcessTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1000),
            grace: Duration::from_millis(1500),
        }
    }
}

/// Find the first usable binary among `candidates`.
///
/// Entries containing a path separator are checked as-is (after `~`
/// expansion), bare names are looked up on `PATH`.
pub fn resolve_binary(candidates: &[String]) -> Option<PathBuf> {
    candidates.iter().find_map(|candidate| {
        let expanded = shellexpand::tilde(candidate).into_owned();
        if expanded.contains(std::path::MAIN_SEPARATOR) || expanded.contains('/') {
            let path = PathBuf::from(expanded);
            is_executable(&path).then_some(path)
        } else {
            search_path(&expanded)
        }
    })
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", name));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Substitute `{name}` placeholders in every template argument
pub fn expand_args(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

/// Command that opens `target` with the desktop's default handler
pub fn default_open_command(target: &str) -> (String, Vec<String>) {
    if cfg!(target_os = "macos") {
        ("open".to_string(), vec![target.to_string()])
    } else if cfg!(windows) {
        (
            "cmd".to_string(),
            vec!["/C".into(), "start".into(), String::new(), target.to_string()],
        )
    } else {
        ("xdg-open".to_string(), vec![target.to_string()])
    }
}

/// Command that shows `path` selected (or its folder) in the file browser
pub fn reveal_command(path: &Path) -> (String, Vec<String>) {
    if cfg!(target_os = "macos") {
        ("open".to_string(), vec!["-R".into(), path.display().to_string()])
    } else if cfg!(windows) {
        (
            "explorer".to_string(),
            vec![format!("/select,{}", path.display())],
        )
    } else {
        let folder = path.parent().unwrap_or(path);
        ("xdg-open".to_string(), vec![folder.display().to_string()])
    }
}

/// Spawn a helper that nobody waits on from the display loop
pub fn spawn_detached(program: &str, args: &[String]) -> Result<(), DisplayError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| DisplayError::ProcessLaunchFailure(format!("{}: {}", program, e)))?;

    let name = program.to_string();
    std::thread::Builder::new()
        .name("detached-wait".into())
        .spawn(move || match child.wait() {
            Ok(status) => log::debug!("{} exited with {}", name, status),
            Err(e) => log::warn!("Failed to wait for {}: {}", name, e),
        })
        .map_err(|e| DisplayError::Io(e.to_string()))?;
    Ok(())
}

/// Where a launched process is in its startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Alive, but not for the whole settle window yet
    Starting,
    /// Alive past the settle window
    Alive,
    Exited(ExitStatus),
}

/// A child process owned by a backend
pub struct ManagedProcess {
    name: String,
    child: Child,
    started: Instant,
    exit: Option<ExitStatus>,
}

impl ManagedProcess {
    pub fn spawn(name: &str, binary: &Path, args: &[String]) -> Result<Self, DisplayError> {
        log::info!("Launching {}: {} {}", name, binary.display(), args.join(" "));

        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                DisplayError::ProcessLaunchFailure(format!("{} ({}): {}", name, binary.display(), e))
            })?;

        Ok(Self {
            name: name.to_string(),
            child,
            started: Instant::now(),
            exit: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status if the child has exited, without blocking
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => log::warn!("Failed to poll {}: {}", self.name, e),
            }
        }
        self.exit
    }

    pub fn is_alive(&mut self) -> bool {
        self.try_exit().is_none()
    }

    pub fn liveness(&mut self, settle: Duration) -> Liveness {
        match self.try_exit() {
            Some(status) => Liveness::Exited(status),
            None if self.started.elapsed() >= settle => Liveness::Alive,
            None => Liveness::Starting,
        }
    }

    /// Ask the child to exit; does not wait
    pub fn terminate(&mut self) {
        if !self.is_alive() {
            return;
        }

        #[cfg(unix)]
        {
            let pid = self.child.id() as libc::pid_t;
            // SAFETY: plain signal delivery to a child we spawned and have not reaped
            let result = unsafe { libc::kill(pid, libc::SIGTERM) };
            if result != 0 {
                log::warn!(
                    "Failed to send SIGTERM to {} ({}): {}",
                    self.name,
                    pid,
                    std::io::Error::last_os_error()
                );
            }
        }

        #[cfg(not(unix))]
        if let Err(e) = self.child.kill() {
            log::warn!("Failed to terminate {}: {}", self.name, e);
        }
    }

    /// Terminate, wait up to `grace`, then kill and reap
    pub fn stop(&mut self, grace: Duration) {
        if !self.is_alive() {
            return;
        }

        self.terminate();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_alive() {
                log::debug!("{} exited after termination request", self.name);
                return;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        log::warn!(
            "{} did not exit within {}ms, killing it",
            self.name,
            grace.as_millis()
        );
        self.kill();
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            log::warn!("Failed to kill {}: {}", self.name, e);
        }
        match self.child.wait() {
            Ok(status) => self.exit = Some(status),
            Err(e) => log::warn!("Failed to reap {}: {}", self.name, e),
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            self.kill();
        }
    }
}

/// Describe an exit status for attempt logs
pub fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_args() {
        let template = vec![
            "{path}".to_string(),
            "--geometry={width}x{height}+{x}+{y}".to_string(),
            "--title=marquee-{screen}".to_string(),
        ];
        let vars = [
            ("path", "/tmp/a b.mp4".to_string()),
            ("x", "1920".to_string()),
            ("y", "0".to_string()),
            ("width", "1280".to_string()),
            ("height", "720".to_string()),
            ("screen", "side".to_string()),
        ];

        let args = expand_args(&template, &vars);

        assert_eq!(
            args,
            vec!["/tmp/a b.mp4", "--geometry=1280x720+1920+0", "--title=marquee-side"]
        );
    }

    #[test]
    fn test_expand_args_unknown_placeholder_kept() {
        let args = expand_args(&["{nope}".to_string()], &[("path", "x".to_string())]);
        assert_eq!(args, vec!["{nope}"]);
    }

    #[test]
    fn test_resolve_binary_missing() {
        let candidates = vec![
            "/definitely/not/here/player".to_string(),
            "marquee-no-such-binary-xyz".to_string(),
        ];
        assert_eq!(resolve_binary(&candidates), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_binary_explicit_path() {
        assert_eq!(
            resolve_binary(&["/nonexistent".to_string(), "/bin/sh".to_string()]),
            Some(PathBuf::from("/bin/sh"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_liveness_of_short_lived_child() {
        let mut process =
            ManagedProcess::spawn("true", Path::new("/bin/sh"), &["-c".into(), "exit 3".into()])
                .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            if let Liveness::Exited(status) = process.liveness(Duration::from_secs(10)) {
                break status;
            }
            assert!(Instant::now() < deadline, "child never exited");
            std::thread::sleep(Duration::from_millis(10));
        };

        assert_eq!(status.code(), Some(3));
        assert_eq!(describe_exit(status), "exited with status 3");
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_terminates_long_running_child() {
        let mut process =
            ManagedProcess::spawn("sleeper", Path::new("/bin/sh"), &["-c".into(), "sleep 30".into()])
                .unwrap();
        assert_eq!(process.liveness(Duration::from_secs(10)), Liveness::Starting);

        let start = Instant::now();
        process.stop(Duration::from_millis(1500));

        assert!(!process.is_alive());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let result = ManagedProcess::spawn("ghost", Path::new("/no/such/binary"), &[]);
        assert!(matches!(result, Err(DisplayError::ProcessLaunchFailure(_))));
    }
}
