use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use img_customizer::config::{compose_boots, default_config_path, load_customization};
use img_customizer::emulator::{BootDriver, Emulator};
use img_customizer::libguestfs::LibguestfsTool;
use img_customizer::os::{catalog, OperatingSystemImage};
use img_customizer::patch::apply_each;
use img_customizer::report::{write_report, PatchReport};
use img_customizer::{logging, preflight};

/// Customize and boot-test disk images for single-board computers
#[derive(Parser)]
#[command(
    name = "img-customizer",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Log libguestfs and console details
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a customization config to an image
    Customize {
        /// Config file; defaults to the user config directory
        config: Option<PathBuf>,

        /// Image to customize, overriding the config's `image`
        #[arg(long)]
        image: Option<PathBuf>,

        /// Run libguestfs in a container instead of from the host
        #[arg(long)]
        docker: bool,
    },

    /// Boot an image, log in and shut it down again
    Boot {
        /// Operating system name as listed by `os list`
        os: String,
        image: PathBuf,
    },

    /// Supported operating systems
    #[command(subcommand)]
    Os(OsCommand),
}

#[derive(Subcommand)]
enum OsCommand {
    /// List supported operating systems
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.trace);

    let result = match cli.command {
        Command::Customize {
            config,
            image,
            docker,
        } => customize(config, image, docker, cli.trace),
        Command::Boot { os, image } => boot(&os, &image),
        Command::Os(OsCommand::List) => {
            list_operating_systems();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn customize(config: Option<PathBuf>, image: Option<PathBuf>, docker: bool, trace: bool) -> Result<()> {
    let config_path = match config.or_else(default_config_path) {
        Some(path) => path,
        None => bail!("No config given and no user config directory found"),
    };
    let customization = load_customization(&config_path)?;
    let image_path = match image.or_else(|| customization.image.clone()) {
        Some(path) => path,
        None => bail!("No image given; pass --image or set 'image' in {}", config_path.display()),
    };
    if !image_path.is_file() {
        bail!("Image '{}' does not exist", image_path.display());
    }

    let disk = if docker {
        LibguestfsTool::docker()
    } else {
        LibguestfsTool::native()
    }
    .trace(trace || customization.trace);
    let emulator = Emulator::new(customization.emulator.clone());
    preflight::check_host_tools(disk.runtime(), emulator.command.program())?;

    let mut image = OperatingSystemImage::new(customization.os.clone(), &image_path);
    let patches = compose_boots(customization.patches, &image);
    banner(&format!(
        "{}: {} patch(es) for {} on {}",
        customization.name,
        patches.len(),
        customization.os.full_name,
        image.file_name()
    ));

    let (outcomes, errors) = match apply_each(&mut image, &patches, &disk, &emulator) {
        Ok(outcomes) => (outcomes, Vec::new()),
        Err(e) => (Vec::new(), vec![e]),
    };
    let report = PatchReport::new(&image, &outcomes, &errors);
    let report_path = write_report(&image, &report)?;
    info!("Report written to {}", report_path.display());

    if report.is_success() {
        banner(&format!("{} customized successfully", image.file_name()));
        return Ok(());
    }
    for error in outcomes.iter().flat_map(|o| &o.errors).chain(&errors) {
        eprintln!("  - {:#}", error);
    }
    banner(&format!(
        "{} customization failed with {} error(s)",
        image.file_name(),
        report.error_count()
    ));
    bail!("see {}", report_path.display())
}

fn boot(os_name: &str, image_path: &Path) -> Result<()> {
    let os = catalog::find(os_name).with_context(|| format!("'{}' is not supported", os_name))?;
    if !image_path.is_file() {
        bail!("Image '{}' does not exist", image_path.display());
    }
    let emulator = Emulator::default();
    let program = emulator.command.program();
    preflight::check_required_tools(&[(program, program)])?;

    let image = OperatingSystemImage::new(os, image_path);
    let _lock = image.lock()?;
    emulator.boot(&image, Vec::new())
}

fn list_operating_systems() {
    for os in catalog::all() {
        println!("{:<22} {}", os.name, os.full_name);
    }
}

fn banner(message: &str) {
    let line = "─".repeat(message.chars().count() + 2);
    println!("╭{}╮", line);
    println!("│ {} │", message);
    println!("╰{}╯", line);
}
