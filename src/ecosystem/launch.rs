use super::{AppDescriptor, ExecMode, Interpreter, MemorySize};
use crate::error::{ResizerError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Target platform used to pick platform-specific launch fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Unix => write!(f, "unix"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

/// A descriptor resolved for one platform: the exact command to execute
#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub name: String,
    pub platform: Platform,

    /// Executable handed to the OS
    pub program: PathBuf,

    /// Full argument vector passed to `program`
    pub args: Vec<String>,

    /// Script path after resolution against the working directory
    pub script: PathBuf,
    pub interpreter: Interpreter,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,

    pub exec_mode: ExecMode,
    pub instances: usize,
    pub autorestart: bool,
    pub watch: bool,
    pub max_memory_restart: Option<MemorySize>,
}

impl LaunchPlan {
    pub(super) fn resolve(app: &AppDescriptor, platform: Platform, base_dir: &Path) -> Self {
        let cwd = match app.cwd.as_deref() {
            Some(cwd) if cwd.is_absolute() => cwd.to_path_buf(),
            Some(cwd) => base_dir.join(cwd),
            None => base_dir.to_path_buf(),
        };

        let raw_script = app.script_for(platform);
        let script = if raw_script.is_absolute() {
            raw_script.to_path_buf()
        } else {
            cwd.join(raw_script)
        };

        let interpreter = app.interpreter_for(platform);
        let script_arg = script.to_string_lossy().into_owned();
        let mut args = Vec::new();

        let program = match interpreter {
            Interpreter::None => script.clone(),
            Interpreter::Cmd => {
                args.push("/C".to_string());
                args.push(script_arg);
                PathBuf::from("cmd")
            }
            other => {
                args.push(script_arg);
                PathBuf::from(other.to_string())
            }
        };
        args.extend(app.args_for(platform));

        LaunchPlan {
            name: app.name.clone(),
            platform,
            program,
            args,
            script,
            interpreter,
            cwd,
            env: app.env.clone(),
            exec_mode: app.exec_mode,
            instances: app.instances,
            autorestart: app.autorestart,
            watch: app.watch,
            max_memory_restart: app.max_memory_restart,
        }
    }

    /// Variables this plan adds to the child's environment
    pub fn injected_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The plan as a single shell-like command line
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check the resolved plan against the filesystem
    pub fn check(&self) -> Result<()> {
        if !self.cwd.is_dir() {
            return Err(ResizerError::LaunchCheckError(format!(
                "Working directory does not exist: {}",
                self.cwd.display()
            )));
        }

        if !self.script.is_file() {
            return Err(ResizerError::LaunchCheckError(format!(
                "Script does not exist: {}",
                self.script.display()
            )));
        }

        if self.interpreter == Interpreter::None && !is_executable(&self.script) {
            return Err(ResizerError::LaunchCheckError(format!(
                "Script is not executable: {}",
                self.script.display()
            )));
        }

        Ok(())
    }

    /// Start the resolved command with inherited stdio
    pub fn spawn(&self) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.injected_env())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            ResizerError::SpawnError(format!("Failed to spawn '{}': {}", self.name, e))
        })?;

        info!(
            "Launched {} (pid {}): {}",
            self.name,
            child.id().unwrap_or_default(),
            self.command_line()
        );

        Ok(child)
    }

    /// Run the plan in the foreground until the child exits. Ctrl-C or
    /// SIGTERM stops the child first.
    pub async fn run(&self) -> Result<ExitStatus> {
        // Registered before the child starts so an early SIGTERM is not lost
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let stop = async move {
            #[cfg(unix)]
            let terminate = async move {
                sigterm.recv().await;
            };
            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
                _ = terminate => info!("SIGTERM received"),
            }
        };

        self.run_until(stop).await
    }

    /// Run the plan until the child exits or `stop` resolves
    pub async fn run_until<F>(&self, stop: F) -> Result<ExitStatus>
    where
        F: Future<Output = ()>,
    {
        if self.autorestart || self.watch || self.max_memory_restart.is_some() {
            warn!(
                "{}: restart, watch and memory policies are enforced by the supervisor, not by launch",
                self.name
            );
        }

        let mut child = self.spawn()?;

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = stop => {
                info!("Stopping {}", self.name);
                terminate(&mut child).await
            }
        }
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child) -> Result<ExitStatus> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to {}: {}", pid, e);
            child.start_kill()?;
        }
    }
    Ok(child.wait().await?)
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> Result<ExitStatus> {
    child.start_kill()?;
    Ok(child.wait().await?)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(path, AccessFlags::X_OK).is_ok()
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            ["exe", "bat", "cmd", "com"]
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecosystem::{Args, PlatformOverride};
    use std::fs;
    use tempfile::TempDir;

    fn create_test_app(name: &str, script: &str, interpreter: Interpreter) -> AppDescriptor {
        AppDescriptor {
            name: name.to_string(),
            script: PathBuf::from(script),
            args: Args::default(),
            interpreter,
            exec_mode: ExecMode::Fork,
            instances: 1,
            autorestart: false,
            watch: false,
            max_memory_restart: None,
            cwd: None,
            env: BTreeMap::new(),
            windows: None,
            unix: None,
        }
    }

    #[test]
    fn test_resolve_bash_wrapping() {
        let mut app = create_test_app("resizer", "start.sh", Interpreter::Bash);
        app.args = Args::Line("--port 8001".to_string());

        let plan = app.resolve(Platform::Unix, Path::new("/srv/app"));
        assert_eq!(plan.program, PathBuf::from("bash"));
        assert_eq!(plan.script, PathBuf::from("/srv/app/start.sh"));
        assert_eq!(plan.args, vec!["/srv/app/start.sh", "--port", "8001"]);
        assert_eq!(plan.cwd, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_resolve_cmd_wrapping_on_windows() {
        let mut app = create_test_app("resizer", "start.sh", Interpreter::Bash);
        app.windows = Some(PlatformOverride {
            script: Some(PathBuf::from("start.bat")),
            interpreter: Some(Interpreter::Cmd),
            args: None,
        });

        let plan = app.resolve(Platform::Windows, Path::new("/srv/app"));
        assert_eq!(plan.program, PathBuf::from("cmd"));
        assert_eq!(plan.args[0], "/C");
        assert!(plan.args[1].ends_with("start.bat"));
        assert_eq!(plan.interpreter, Interpreter::Cmd);
    }

    #[test]
    fn test_resolve_direct_execution() {
        let mut app = create_test_app("resizer", "/opt/venv/bin/python", Interpreter::None);
        app.args = Args::Line("-m uvicorn app.main:app --port 8001".to_string());
        app.cwd = Some(PathBuf::from("service"));

        let plan = app.resolve(Platform::Unix, Path::new("/srv"));
        assert_eq!(plan.program, PathBuf::from("/opt/venv/bin/python"));
        assert_eq!(plan.args.len(), 5);
        assert_eq!(plan.cwd, PathBuf::from("/srv/service"));
        assert_eq!(
            plan.command_line(),
            "/opt/venv/bin/python -m uvicorn app.main:app --port 8001"
        );
    }

    #[test]
    fn test_injected_env_is_declared_env() {
        let mut app = create_test_app("resizer", "start.sh", Interpreter::Bash);
        app.env
            .insert("NODE_ENV".to_string(), "production".to_string());

        let plan = app.resolve(Platform::Unix, Path::new("."));
        let injected: Vec<_> = plan.injected_env().keys().cloned().collect();
        assert_eq!(injected, vec!["NODE_ENV".to_string()]);
    }

    #[test]
    fn test_check_missing_script() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_test_app("resizer", "missing.sh", Interpreter::Bash);

        let plan = app.resolve(Platform::Unix, temp_dir.path());
        match plan.check() {
            Err(ResizerError::LaunchCheckError(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("Expected LaunchCheckError, got {:?}", other),
        }
    }

    #[test]
    fn test_check_missing_cwd() {
        let app = {
            let mut app = create_test_app("resizer", "start.sh", Interpreter::Bash);
            app.cwd = Some(PathBuf::from("/nonexistent/directory"));
            app
        };

        let plan = app.resolve(Platform::Unix, Path::new("."));
        assert!(matches!(
            plan.check(),
            Err(ResizerError::LaunchCheckError(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        // Interpreted scripts only need to exist
        let wrapped = create_test_app("resizer", "run.sh", Interpreter::Sh);
        assert!(wrapped.resolve(Platform::Unix, temp_dir.path()).check().is_ok());

        let direct = create_test_app("resizer", "run.sh", Interpreter::None);
        let plan = direct.resolve(Platform::Unix, temp_dir.path());
        assert!(plan.check().is_err());

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(plan.check().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("exit.sh");
        fs::write(&script, "test \"$GREETING\" = hello && exit 3\nexit 1\n").unwrap();

        let mut app = create_test_app("exit", "exit.sh", Interpreter::Sh);
        app.env.insert("GREETING".to_string(), "hello".to_string());

        let plan = app.resolve(Platform::Unix, temp_dir.path());
        let status = plan.run().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_request_terminates_child() {
        use std::os::unix::process::ExitStatusExt;
        use std::time::{Duration, Instant};

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("linger.sh"), "exec sleep 30\n").unwrap();

        let app = create_test_app("linger", "linger.sh", Interpreter::Sh);
        let plan = app.resolve(Platform::Unix, temp_dir.path());

        let started = Instant::now();
        let status = plan
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_program() {
        let app = create_test_app("ghost", "/nonexistent/program", Interpreter::None);
        let plan = app.resolve(Platform::current(), Path::new("."));

        match plan.spawn() {
            Err(ResizerError::SpawnError(msg)) => assert!(msg.contains("ghost")),
            other => panic!("Expected SpawnError, got {:?}", other.map(|_| ())),
        }
    }
}
