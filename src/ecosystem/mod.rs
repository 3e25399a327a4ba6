// Ecosystem module - declarative launch descriptors for a process supervisor

mod launch;
mod memory;

pub use launch::{LaunchPlan, Platform};
pub use memory::MemorySize;

use crate::error::{ResizerError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Upper bound on replicas accepted for a single app
pub const MAX_INSTANCES: usize = 100;

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env reference pattern is valid")
});

/// Runtime that wraps the script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpreter {
    /// Execute the script directly
    #[default]
    None,
    Bash,
    Sh,
    Cmd,
    Node,
    Python,
}

impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpreter::None => write!(f, "none"),
            Interpreter::Bash => write!(f, "bash"),
            Interpreter::Sh => write!(f, "sh"),
            Interpreter::Cmd => write!(f, "cmd"),
            Interpreter::Node => write!(f, "node"),
            Interpreter::Python => write!(f, "python"),
        }
    }
}

/// Process topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    #[default]
    Fork,
    Cluster,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Fork => write!(f, "fork"),
            ExecMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// Process arguments, either one command line or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Args {
    Line(String),
    List(Vec<String>),
}

impl Default for Args {
    fn default() -> Self {
        Args::List(Vec::new())
    }
}

impl Args {
    /// Argument vector; a command line is split on whitespace
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Args::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Args::List(list) => list.clone(),
        }
    }

    fn map(&self, f: impl Fn(&str) -> String) -> Args {
        match self {
            Args::Line(line) => Args::Line(f(line)),
            Args::List(list) => Args::List(list.iter().map(|a| f(a)).collect()),
        }
    }
}

/// Fields replaced when resolving for a particular platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformOverride {
    #[serde(default)]
    pub script: Option<PathBuf>,

    #[serde(default)]
    pub interpreter: Option<Interpreter>,

    #[serde(default)]
    pub args: Option<Args>,
}

/// Launch descriptor for one managed application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Process name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Args,

    /// Wrapper runtime
    #[serde(default)]
    pub interpreter: Interpreter,

    #[serde(default)]
    pub exec_mode: ExecMode,

    /// Number of instances to run
    #[serde(default = "default_instances")]
    pub instances: usize,

    /// Whether the supervisor relaunches the process on exit
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Whether file-system changes trigger a restart
    #[serde(default)]
    pub watch: bool,

    /// Memory ceiling at which the supervisor restarts the process
    #[serde(default)]
    pub max_memory_restart: Option<MemorySize>,

    /// Working directory, relative to the ecosystem file
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables injected into the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub windows: Option<PlatformOverride>,

    #[serde(default)]
    pub unix: Option<PlatformOverride>,
}

fn default_instances() -> usize {
    1
}

fn default_autorestart() -> bool {
    true
}

impl AppDescriptor {
    /// Validate the descriptor against the supervisor's schema
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ResizerError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(ResizerError::MissingConfigField("script".to_string()));
        }

        for (label, o) in [("windows", &self.windows), ("unix", &self.unix)] {
            if let Some(o) = o {
                if o.script.as_ref().is_some_and(|s| s.as_os_str().is_empty()) {
                    return Err(ResizerError::MissingConfigField(format!("{}.script", label)));
                }
            }
        }

        if self.instances == 0 {
            return Err(ResizerError::ConfigValidationError(format!(
                "{}: instances must be at least 1",
                self.name
            )));
        }

        if self.instances > MAX_INSTANCES {
            return Err(ResizerError::ConfigValidationError(format!(
                "{}: instances cannot exceed {}",
                self.name, MAX_INSTANCES
            )));
        }

        if self.exec_mode == ExecMode::Cluster {
            for platform in [Platform::Unix, Platform::Windows] {
                let interpreter = self.interpreter_for(platform);
                if interpreter != Interpreter::Node {
                    return Err(ResizerError::ConfigValidationError(format!(
                        "{}: cluster mode requires the node interpreter, got '{}' on {}",
                        self.name, interpreter, platform
                    )));
                }
            }
        }

        if let Some(limit) = self.max_memory_restart {
            if limit.bytes() == 0 {
                return Err(ResizerError::ConfigValidationError(format!(
                    "{}: max_memory_restart must be greater than zero",
                    self.name
                )));
            }
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ResizerError::ConfigValidationError(format!(
                    "{}: invalid environment variable name '{}'",
                    self.name, key
                )));
            }
        }

        Ok(())
    }

    fn platform_override(&self, platform: Platform) -> Option<&PlatformOverride> {
        match platform {
            Platform::Windows => self.windows.as_ref(),
            Platform::Unix => self.unix.as_ref(),
        }
    }

    /// Script after applying the platform override
    pub fn script_for(&self, platform: Platform) -> &Path {
        self.platform_override(platform)
            .and_then(|o| o.script.as_deref())
            .unwrap_or(&self.script)
    }

    /// Interpreter after applying the platform override
    pub fn interpreter_for(&self, platform: Platform) -> Interpreter {
        self.platform_override(platform)
            .and_then(|o| o.interpreter)
            .unwrap_or(self.interpreter)
    }

    /// Arguments after applying the platform override
    pub fn args_for(&self, platform: Platform) -> Vec<String> {
        self.platform_override(platform)
            .and_then(|o| o.args.as_ref())
            .unwrap_or(&self.args)
            .to_vec()
    }

    /// Resolve the descriptor into a concrete launch plan
    pub fn resolve(&self, platform: Platform, base_dir: &Path) -> LaunchPlan {
        LaunchPlan::resolve(self, platform, base_dir)
    }

    /// Expand `$VAR` and `${VAR}` references using the given lookup
    fn expand_env_vars<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let expand = |s: &str| expand_env_in_string(s, lookup);
        let expand_path = |p: &Path| PathBuf::from(expand(&p.to_string_lossy()));

        self.script = expand_path(&self.script);
        self.args = self.args.map(expand);
        self.cwd = self.cwd.as_deref().map(expand_path);
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand(v)))
            .collect();

        for o in [self.windows.as_mut(), self.unix.as_mut()].into_iter().flatten() {
            o.script = o.script.as_deref().map(expand_path);
            o.args = o.args.as_ref().map(|a| a.map(expand));
        }
    }
}

/// Replace environment references; unknown variables are left untouched
fn expand_env_in_string<F>(s: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REF
        .replace_all(s, |caps: &Captures| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(key).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// The set of apps declared in one ecosystem file
#[derive(Debug, Clone)]
pub struct Ecosystem {
    pub apps: Vec<AppDescriptor>,

    /// Directory relative paths resolve against
    pub base_dir: PathBuf,
}

impl Ecosystem {
    /// Load an ecosystem file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Ecosystem> {
        Self::from_file_with(path, &|key| std::env::var(key).ok())
    }

    /// Load an ecosystem file, expanding references through `lookup`
    pub fn from_file_with<F>(path: &Path, lookup: &F) -> Result<Ecosystem>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResizerError::ConfigError(format!(
                "Failed to read ecosystem file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut apps = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(ResizerError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        for app in &mut apps {
            app.expand_env_vars(lookup);
        }

        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let ecosystem = Ecosystem { apps, base_dir };
        ecosystem.validate()?;

        tracing::debug!(
            "Loaded {} app(s) from {}",
            ecosystem.apps.len(),
            path.display()
        );

        Ok(ecosystem)
    }

    /// Parse TOML ecosystem contents
    pub fn parse_toml(contents: &str) -> Result<Vec<AppDescriptor>> {
        let parse_err = |e: toml::de::Error| {
            ResizerError::InvalidConfig(format!("Failed to parse TOML: {}", e))
        };

        let mut table: toml::Table = toml::from_str(contents).map_err(parse_err)?;

        // Support both the apps list and a single top-level app
        let apps = match table.remove("apps") {
            Some(apps) => Vec::<AppDescriptor>::deserialize(apps).map_err(parse_err)?,
            None if table.is_empty() => Vec::new(),
            None => {
                let single = AppDescriptor::deserialize(toml::Value::Table(table));
                vec![single.map_err(parse_err)?]
            }
        };

        non_empty(apps)
    }

    /// Parse JSON ecosystem contents
    pub fn parse_json(contents: &str) -> Result<Vec<AppDescriptor>> {
        let parse_err = |e: serde_json::Error| {
            ResizerError::InvalidConfig(format!("Failed to parse JSON: {}", e))
        };

        let mut value: serde_json::Value = serde_json::from_str(contents).map_err(parse_err)?;

        let apps = match value.as_object_mut().and_then(|obj| obj.remove("apps")) {
            Some(apps) => Vec::<AppDescriptor>::deserialize(apps).map_err(parse_err)?,
            None => vec![AppDescriptor::deserialize(value).map_err(parse_err)?],
        };

        non_empty(apps)
    }

    /// Validate every app and enforce unique names
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for app in &self.apps {
            app.validate()?;
            if !seen.insert(app.name.as_str()) {
                return Err(ResizerError::ConfigValidationError(format!(
                    "duplicate app name: {}",
                    app.name
                )));
            }
        }
        Ok(())
    }

    /// Look up an app by name
    pub fn app(&self, name: &str) -> Result<&AppDescriptor> {
        self.apps
            .iter()
            .find(|app| app.name == name)
            .ok_or_else(|| ResizerError::AppNotFound(name.to_string()))
    }

    /// The named app, or the only app when no name is given
    pub fn select(&self, name: Option<&str>) -> Result<&AppDescriptor> {
        match name {
            Some(name) => self.app(name),
            None => match self.apps.as_slice() {
                [only] => Ok(only),
                _ => Err(ResizerError::ConfigError(format!(
                    "{} apps declared; choose one with --app",
                    self.apps.len()
                ))),
            },
        }
    }
}

fn non_empty(apps: Vec<AppDescriptor>) -> Result<Vec<AppDescriptor>> {
    if apps.is_empty() {
        return Err(ResizerError::InvalidConfig(
            "No app configuration found in file".to_string(),
        ));
    }
    Ok(apps)
}
