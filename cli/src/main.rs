//! Cellbox CLI - run notebook cells inside a workspace container
//!
//! Every command is a thin call into the orchestrator library.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use cellbox_orchestrator::config::AppConfig;
use cellbox_orchestrator::execution::{CellExecutionController, CellInput};
use cellbox_orchestrator::logging::init_logging;
use cellbox_orchestrator::models::{CellExecutionRecord, CellState, KernelSpec, OutputItem};
use cellbox_orchestrator::notebook::Notebook;

/// Cellbox CLI - execute notebook cells in an isolated container
#[derive(Parser)]
#[command(name = "cellbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run notebook cells inside a reproducible workspace container", long_about = None)]
struct Cli {
    /// Workspace directory (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every code cell of a notebook
    Run {
        /// Notebook to execute
        notebook: PathBuf,

        /// Write the executed notebook here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Execute a single snippet
    Exec {
        /// Code to execute (or path to file with @ prefix)
        code: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: String,
    },

    /// Rebuild the workspace image and container
    Rebuild,

    /// Stop and remove the workspace container
    Stop,

    /// Show image, container and kernel state
    Status,

    /// List kernels available in the container
    Kernels,

    /// Select the kernel to run cells with
    SelectKernel {
        /// Kernel name as reported by `kernels`
        name: String,

        /// Also record the kernel in this notebook's metadata
        #[arg(short, long)]
        notebook: Option<PathBuf>,
    },
}

/// Print a batch-level failure and exit non-zero
fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "✗".red().bold(), message.to_string().red());
    std::process::exit(1);
}

fn read_code(code: String) -> Result<String> {
    match code.strip_prefix('@') {
        Some(file_path) => fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read code file: {}", file_path)),
        None => Ok(code),
    }
}

fn read_notebook(path: &Path) -> Result<Notebook> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read notebook: {}", path.display()))?;
    Notebook::from_slice(&bytes)
        .with_context(|| format!("Failed to parse notebook: {}", path.display()))
}

fn write_notebook(path: &Path, notebook: &Notebook) -> Result<()> {
    let bytes = notebook.to_vec()?;
    fs::write(path, bytes)
        .with_context(|| format!("Failed to write notebook: {}", path.display()))
}

fn print_record(record: &CellExecutionRecord) {
    let label = match record.execution_order {
        Some(order) => format!("[{}] {}", order, record.cell_id),
        None => format!("[ ] {}", record.cell_id),
    };
    let state = match record.state() {
        CellState::Succeeded => record.state().as_str().green(),
        CellState::Failed => record.state().as_str().red(),
        _ => record.state().as_str().yellow(),
    };
    println!("{} {}", label.bright_cyan(), state);

    for output in record.outputs() {
        match output {
            OutputItem::Text { .. } => {
                if let Some(text) = output.as_text() {
                    print!("{}", text);
                    if !text.ends_with('\n') {
                        println!();
                    }
                }
            }
            OutputItem::Error { trace, .. } => {
                for line in trace {
                    eprintln!("{}", line.red());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.workspace.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level, config.log_file.as_deref())?;

    let mut controller = match CellExecutionController::connect(config) {
        Ok(controller) => controller,
        Err(e) => fail(e),
    };
    debug!(container = %controller.manager().container_name(), "Controller ready");

    match cli.command {
        Commands::Run { notebook, output } => {
            let mut document = read_notebook(&notebook)?;
            let inputs = document.execution_inputs();

            let records = match controller.execute_batch(&inputs).await {
                Ok(records) => records,
                Err(e) => fail(format!("Failed to start workspace container: {}", e)),
            };
            for record in &records {
                print_record(record);
            }

            document.apply_records(&records);
            if document.metadata.kernelspec.is_none() {
                document.set_kernel(&KernelSpec::fallback(controller.manager().selected_kernel()));
            }

            let target = output.unwrap_or(notebook);
            write_notebook(&target, &document)?;

            let failed = records.iter().filter(|r| r.state() == CellState::Failed).count();
            println!(
                "{} {} cells, {} failed, written to {}",
                "✓".green(),
                records.len(),
                failed,
                target.display()
            );

            controller.into_manager().dispose().await;
            if failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::Exec { code, output } => {
            let source = read_code(code)?;
            let records = match controller.execute_batch(&[CellInput::new("exec", source)]).await {
                Ok(records) => records,
                Err(e) => fail(format!("Failed to start workspace container: {}", e)),
            };

            let failed = records.iter().any(|r| r.state() == CellState::Failed);
            if output == "json" {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    for item in record.outputs() {
                        match item {
                            OutputItem::Error { trace, .. } => {
                                for line in trace {
                                    eprintln!("{}", line.red());
                                }
                            }
                            OutputItem::Text { .. } => {
                                if let Some(text) = item.as_text() {
                                    print!("{}", text);
                                }
                            }
                        }
                    }
                }
            }

            controller.into_manager().dispose().await;
            if failed {
                std::process::exit(1);
            }
        }

        Commands::Rebuild => {
            let manager = controller.manager_mut();
            println!("{} {}", "Rebuilding".bright_cyan(), manager.image().name);
            match manager.rebuild_container().await {
                Ok(handle) => println!("{} {} ({})", "✓ Running:".green(), handle.name, handle.id),
                Err(e) => fail(format!("Rebuild failed: {}", e)),
            }
        }

        Commands::Stop => {
            let manager = controller.manager_mut();
            manager.stop_container().await;
            println!("{} {}", "✓ Stopped:".green(), manager.container_name());
        }

        Commands::Status => {
            let manager = controller.manager();
            let running = manager.is_container_running().await;

            println!("{}", "Cellbox Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!("{} {}", "Workspace:".cyan(), manager.config().workspace_dir.display());
            println!("{} {}", "Image:".cyan(), manager.image().name);
            println!("{} {}", "Container:".cyan(), manager.container_name());
            println!(
                "{} {}",
                "State:".cyan(),
                if running { "running".green() } else { "stopped".yellow() }
            );
            println!("{} {}", "Kernel:".cyan(), manager.selected_kernel());
        }

        Commands::Kernels => {
            let manager = controller.manager_mut();
            manager.activate().await;
            let kernels = manager.list_available_kernels().await;

            println!("{}", "Available kernels:".bright_cyan().bold());
            for kernel in kernels {
                let marker = if kernel.name == manager.selected_kernel() { "*" } else { " " };
                println!(
                    "  {} {} ({})",
                    marker.green(),
                    kernel.name,
                    kernel.display_name
                );
            }
        }

        Commands::SelectKernel { name, notebook } => {
            let manager = controller.manager_mut();
            manager.activate().await;
            let kernel = match manager.select_kernel(&name).await {
                Ok(kernel) => kernel,
                Err(e) => fail(e),
            };

            if let Some(path) = notebook {
                let mut document = read_notebook(&path)?;
                document.set_kernel(&kernel);
                write_notebook(&path, &document)?;
            }

            println!(
                "{} {}",
                "✓ Selected kernel:".green(),
                json!({ "name": kernel.name, "display_name": kernel.display_name })
            );
        }
    }

    Ok(())
}
