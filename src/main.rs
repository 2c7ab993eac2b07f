mod appdir;
mod compress;
mod config;
mod context;
mod error;
mod perms;
mod pipeline;
mod tool;
mod ui;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::*;

use crate::config::{AppConfig, IconPolicy, ProjectConfig};
use crate::context::{BuildContext, HostArch};
use crate::error::PackError;
use crate::tool::BuilderKind;
use crate::ui::TerminalConsole;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "neu-appimage")]
#[command(about = "Packages a Neutralino release build into a portable AppImage")]
struct Cli {
    /// Show debug diagnostics (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Builds <app>-<arch>.AppImage from dist/<app>-release.zip
    Build {
        /// Project directory (defaults to the current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Release archive to package instead of dist/<app>-release.zip
        #[arg(short, long)]
        archive: Option<PathBuf>,

        /// Image builder: linuxdeploy or appimagetool
        #[arg(short, long)]
        builder: Option<BuilderKind>,

        /// Keep the downloaded builder for the next run
        #[arg(long)]
        keep_tool: bool,

        /// Fail instead of using the default icon when none is configured
        #[arg(long)]
        strict_icon: bool,

        /// Replace an existing AppDir without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Removes a leftover AppDir and downloaded builder
    Clean {
        /// Project directory (defaults to the current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },
    /// Show version and host architecture
    Version,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
    {
        eprintln!("{} failed to initialize tracing: {}", "WARNING".bold().yellow(), e);
    }
}

fn project_root(project: Option<PathBuf>) -> Result<PathBuf, PackError> {
    let cwd = std::env::current_dir()
        .map_err(|e| PackError::io("reading the current directory", e))?;
    let root = match project {
        Some(p) if p.is_absolute() => p,
        Some(p) => cwd.join(p),
        None => cwd,
    };
    root.canonicalize()
        .map_err(|e| PackError::Configuration(format!("project {}: {}", root.display(), e)))
}

fn report(e: &PackError) -> ExitCode {
    eprintln!("{} [{}] {}", "ERROR".bold().red().on_black(), e.kind(), e);
    ExitCode::from(e.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Ambient process state is read once here and passed down.
    let vars: BTreeMap<String, String> = std::env::vars().collect();
    let mut cfg = AppConfig::load(&vars);
    let arch = HostArch::detect();

    match cli.command {
        Commands::Build { project, archive, builder, keep_tool, strict_icon, yes } => {
            if let Some(kind) = builder { cfg.builder = kind; }
            if keep_tool { cfg.keep_tool = true; }
            if strict_icon { cfg.icon_policy = IconPolicy::Strict; }

            let ctx = match project_root(project).and_then(|root| {
                let project_cfg = ProjectConfig::load(&root)?;
                BuildContext::from_project(&root, &project_cfg, arch)
            }) {
                Ok(ctx) => match archive {
                    Some(a) => ctx.with_archive(a),
                    None => ctx,
                },
                Err(e) => return report(&e),
            };
            tracing::debug!(?ctx, ?cfg, "starting packaging run");

            let mut console = TerminalConsole::new(yes);
            pipeline::run(&ctx, &cfg, &mut console).await
        }
        Commands::Clean { project } => {
            let ctx = match project_root(project)
                .and_then(|root| BuildContext::new(&root, None, arch))
            {
                Ok(ctx) => ctx,
                Err(e) => return report(&e),
            };
            match pipeline::clean(&ctx, &cfg) {
                Ok(removed) if removed.is_empty() => {
                    println!("{}", "Nothing to clean.".yellow());
                    ExitCode::SUCCESS
                }
                Ok(removed) => {
                    for path in removed {
                        println!("{} {}", "removed".green(), path.display());
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => report(&e),
            }
        }
        Commands::Version => {
            println!("neu-appimage v{} ({})", VERSION, arch);
            ExitCode::SUCCESS
        }
    }
}
