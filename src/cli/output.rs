// Output formatting and display for CLI

use crate::ecosystem::{AppDescriptor, LaunchPlan, MemorySize, Platform};
use colored::*;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print a warning message to stderr
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of app descriptors as resolved for `platform`
pub fn print_app_table(apps: &[AppDescriptor], platform: Platform) {
    #[derive(Tabled)]
    struct AppRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Script")]
        script: String,
        #[tabled(rename = "Interpreter")]
        interpreter: String,
        #[tabled(rename = "Mode")]
        mode: String,
        #[tabled(rename = "Instances")]
        instances: String,
        #[tabled(rename = "Autorestart")]
        autorestart: String,
        #[tabled(rename = "Watch")]
        watch: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Env")]
        env: String,
    }

    let rows: Vec<AppRow> = apps
        .iter()
        .map(|app| AppRow {
            name: truncate(&app.name, 24),
            script: truncate(&app.script_for(platform).display().to_string(), 32),
            interpreter: app.interpreter_for(platform).to_string(),
            mode: app.exec_mode.to_string(),
            instances: app.instances.to_string(),
            autorestart: format_flag(app.autorestart),
            watch: format_flag(app.watch),
            memory: format_memory(app.max_memory_restart),
            env: app.env.len().to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} app(s) for {}", apps.len(), platform)
            .dimmed()
            .italic()
    );
}

/// Print the detailed view of a resolved launch plan
pub fn print_plan(plan: &LaunchPlan) {
    println!("\n{}", "Launch Plan".bold().underline());
    println!();
    println!("  {:<15} {}", "Name:".bold(), plan.name.cyan());
    println!("  {:<15} {}", "Platform:".bold(), plan.platform);
    println!("  {:<15} {}", "Command:".bold(), plan.command_line());
    println!("  {:<15} {}", "Script:".bold(), plan.script.display());
    println!("  {:<15} {}", "Interpreter:".bold(), plan.interpreter);
    println!("  {:<15} {}", "Working Dir:".bold(), plan.cwd.display());
    println!(
        "  {:<15} {} x {}",
        "Topology:".bold(),
        plan.exec_mode,
        plan.instances
    );
    println!(
        "  {:<15} {}",
        "Autorestart:".bold(),
        format_flag(plan.autorestart)
    );
    println!("  {:<15} {}", "Watch:".bold(), format_flag(plan.watch));
    println!(
        "  {:<15} {}",
        "Memory Limit:".bold(),
        format_memory(plan.max_memory_restart)
    );

    if plan.injected_env().is_empty() {
        println!("  {:<15} {}", "Env:".bold(), "-".dimmed());
    } else {
        println!("  {}", "Env:".bold());
        for (key, value) in plan.injected_env() {
            println!("    {}={}", key.cyan(), value);
        }
    }

    println!();
}

fn format_flag(flag: bool) -> String {
    if flag {
        "yes".green().to_string()
    } else {
        "no".bright_black().to_string()
    }
}

/// Format a memory ceiling, or `-` when unset
fn format_memory(size: Option<MemorySize>) -> String {
    size.map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
