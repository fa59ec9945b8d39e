//! extpack - package broker extensions for mounting.
//!
//! Builds or unpacks an extension into a staging directory and prints the
//! resulting extension folder as JSON on stdout:
//!
//! ```text
//! extpack gradle ./my-extension
//! extpack maven ./my-extension --out /tmp/extensions
//! extpack archive build/hivemq-extension/my-extension-1.0.zip
//! extpack classes --id ext --name "My Extension" --version 1.0 \
//!     --main com.example.Main --classes build/classes/java/main
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` for details.

use brokerlab::{
    ClassDirResolver, CommandBuildProducer, ExtensionDescriptor, ExtensionPackager,
    PackagedExtension,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "extpack")]
#[command(about = "Package broker extensions into a mountable staging directory")]
#[command(version)]
struct Args {
    /// Staging directory (defaults to the user cache)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a Gradle project and package its distribution zip
    Gradle {
        /// Project directory
        project: PathBuf,
    },
    /// Build a Maven project and package its distribution zip
    Maven {
        /// Project directory
        project: PathBuf,
    },
    /// Unpack an extension distribution zip
    Archive {
        /// Path to the zip
        archive: PathBuf,
    },
    /// Copy an exploded extension folder
    Folder {
        /// Extension folder (its name is the extension id)
        folder: PathBuf,
    },
    /// Package compiled classes from a descriptor
    Classes {
        /// Extension id
        #[arg(long)]
        id: String,
        /// Extension name
        #[arg(long)]
        name: String,
        /// Extension version
        #[arg(long)]
        version: String,
        /// Fully-qualified main class
        #[arg(long)]
        main: String,
        /// Additional classes
        #[arg(long = "class")]
        classes_extra: Vec<String>,
        /// Evaluation priority
        #[arg(long, default_value = "0")]
        priority: i32,
        /// Start priority
        #[arg(long, default_value = "0")]
        start_priority: i32,
        /// Load but do not start the extension
        #[arg(long)]
        disabled: bool,
        /// Compiled classes directory
        #[arg(long)]
        classes: PathBuf,
    },
}

/// JSON summary printed on success.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    id: &'a str,
    path: String,
    digest: Option<&'a str>,
    disabled: bool,
}

impl<'a> From<&'a PackagedExtension> for Summary<'a> {
    fn from(extension: &'a PackagedExtension) -> Self {
        Self {
            id: extension.id(),
            path: extension.host_path().display().to_string(),
            digest: extension.digest(),
            disabled: extension.is_disabled(),
        }
    }
}

fn run(args: Args) -> brokerlab::Result<PackagedExtension> {
    let out = args.out.unwrap_or_else(ExtensionPackager::default_staging_dir);
    let packager = ExtensionPackager::with_staging_dir(&out)?;
    info!(staging = %out.display(), "Packaging extension");

    match args.command {
        Command::Gradle { project } => packager.package_project(&project, &CommandBuildProducer::gradle()),
        Command::Maven { project } => packager.package_project(&project, &CommandBuildProducer::maven()),
        Command::Archive { archive } => packager.package_archive(&archive),
        Command::Folder { folder } => packager.package_folder(&folder),
        Command::Classes {
            id,
            name,
            version,
            main,
            classes_extra,
            priority,
            start_priority,
            disabled,
            classes,
        } => {
            let descriptor = classes_extra
                .into_iter()
                .fold(
                    ExtensionDescriptor::builder()
                        .id(id)
                        .name(name)
                        .version(version)
                        .priority(priority)
                        .start_priority(start_priority)
                        .disabled_on_startup(disabled)
                        .main_class(main),
                    |builder, class| builder.add_additional_class(class),
                )
                .build()?;
            packager.package(&descriptor, &ClassDirResolver::new(classes))
        }
    }
}

fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
        return ExitCode::FAILURE;
    }

    let args = Args::parse();
    match run(args) {
        Ok(extension) => match serde_json::to_string_pretty(&Summary::from(&extension)) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Failed to render summary");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(kind = ?e.kind(), "{}", e);
            ExitCode::FAILURE
        }
    }
}
