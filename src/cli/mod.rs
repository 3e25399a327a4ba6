// CLI module - User-facing command-line interface

mod output;

use crate::ecosystem::{Ecosystem, ExecMode, Platform};
use crate::server;
use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

pub use output::print_error;

/// image-resizer - image CDN with on-demand resizing
#[derive(Parser)]
#[command(name = "image-resizer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the image service
    Serve {
        /// Project root; `.env` and relative directories resolve against it
        #[arg(short, long, env = "IMAGE_RESIZER_ROOT", default_value = ".")]
        root: PathBuf,

        /// Address to listen on (overrides LISTEN_HOST)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate an ecosystem file
    Check {
        /// Path to the ecosystem file (.toml or .json)
        file: PathBuf,

        /// Also check scripts and working directories on disk
        #[arg(short, long)]
        strict: bool,

        /// Platform to resolve for (defaults to the current one)
        #[arg(long, value_enum)]
        platform: Option<Platform>,
    },

    /// Show the resolved launch plan for an app
    Show {
        /// Path to the ecosystem file (.toml or .json)
        file: PathBuf,

        /// App name (required when the file declares several)
        #[arg(short, long)]
        app: Option<String>,

        /// Platform to resolve for (defaults to the current one)
        #[arg(long, value_enum)]
        platform: Option<Platform>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run an app in the foreground without a supervisor
    Launch {
        /// Path to the ecosystem file (.toml or .json)
        file: PathBuf,

        /// App name (required when the file declares several)
        #[arg(short, long)]
        app: Option<String>,
    },
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> Result<ExitCode> {
        let cli = Cli::parse();
        cli.execute().await
    }

    /// Execute the parsed command
    async fn execute(self) -> Result<ExitCode> {
        match self.command {
            Commands::Serve { root, host, port } => {
                let mut settings = Settings::load(&root)
                    .with_context(|| format!("Failed to load settings from {}", root.display()))?;
                if let Some(host) = host {
                    settings.host = host;
                }
                if let Some(port) = port {
                    settings.port = port;
                }

                server::serve(settings).await?;
                Ok(ExitCode::SUCCESS)
            }

            Commands::Check {
                file,
                strict,
                platform,
            } => {
                let ecosystem = load_ecosystem(&file)?;
                let platform = platform.unwrap_or_else(Platform::current);
                output::print_app_table(&ecosystem.apps, platform);

                if strict {
                    let mut failures = 0;
                    for app in &ecosystem.apps {
                        let plan = app.resolve(platform, &ecosystem.base_dir);
                        if let Err(e) = plan.check() {
                            output::print_error(&format!("{}: {}", app.name, e));
                            failures += 1;
                        }
                    }
                    if failures > 0 {
                        bail!("{} app(s) failed launch checks", failures);
                    }
                }

                output::print_success_msg(&format!("{} is valid", file.display()));
                Ok(ExitCode::SUCCESS)
            }

            Commands::Show {
                file,
                app,
                platform,
                json,
            } => {
                let ecosystem = load_ecosystem(&file)?;
                let platform = platform.unwrap_or_else(Platform::current);
                let plan = ecosystem
                    .select(app.as_deref())?
                    .resolve(platform, &ecosystem.base_dir);

                if json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    output::print_plan(&plan);
                }
                Ok(ExitCode::SUCCESS)
            }

            Commands::Launch { file, app } => {
                let ecosystem = load_ecosystem(&file)?;
                let plan = ecosystem
                    .select(app.as_deref())?
                    .resolve(Platform::current(), &ecosystem.base_dir);
                plan.check()?;

                if plan.instances > 1 || plan.exec_mode == ExecMode::Cluster {
                    output::print_warning(&format!(
                        "{} declares {} {} instance(s); launch runs a single process",
                        plan.name, plan.instances, plan.exec_mode
                    ));
                }

                output::print_info(&format!("Launching {}: {}", plan.name, plan.command_line()));
                let status = plan.run().await?;

                match status.code() {
                    Some(0) => {
                        output::print_success_msg(&format!("{} exited cleanly", plan.name));
                        Ok(ExitCode::SUCCESS)
                    }
                    Some(code) => {
                        output::print_warning(&format!("{} exited with code {}", plan.name, code));
                        Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
                    }
                    None => {
                        output::print_warning(&format!("{} was terminated by a signal", plan.name));
                        Ok(ExitCode::FAILURE)
                    }
                }
            }
        }
    }
}

fn load_ecosystem(file: &Path) -> Result<Ecosystem> {
    Ecosystem::from_file(file)
        .with_context(|| format!("Failed to load ecosystem file {}", file.display()))
}
