mod client_config;
mod config;
mod error;
mod publish;

use crate::config::PublisherConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the publisher configuration
    #[arg(short, long, value_name = "FILE", default_value = "publisher.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new publisher configuration
    Init {
        /// Product name
        name: String,

        #[arg(long, default_value_t = 1)]
        build: u64,

        /// Display version
        #[arg(long, default_value = "1.0")]
        display: String,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Print the current configuration
    Show,
    /// Set the build number (and optionally the display version)
    SetVersion {
        build: u64,

        /// Display version
        #[arg(long)]
        display: Option<String>,
    },
    /// Register a mirror
    AddMirror {
        name: String,
        url: String,

        /// Probe priority, lower first
        #[arg(long, default_value_t = 0)]
        rating: u32,
    },
    /// Unregister a mirror
    RemoveMirror { name: String },
    /// Publish a build directory into a mirror tree
    Publish {
        build_dir: PathBuf,
        out_dir: PathBuf,

        /// Replace a non-empty output directory
        #[arg(long)]
        clean: bool,

        /// Bump the build number before publishing
        #[arg(long)]
        bump: bool,
    },
    /// Print an updater.toml for installs of this product
    ClientConfig {
        /// Where the product is installed on client machines
        #[arg(long)]
        install_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // stdout carries command output, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let path = args.config.as_path();

    match args.command {
        Command::Init {
            name,
            build,
            display,
            force,
        } => {
            PublisherConfig::init(path, &PublisherConfig::new(name, build, display), force)?;
            tracing::info!("Created {}", path.display());
        }
        Command::Show => {
            let config = PublisherConfig::load(path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::SetVersion { build, display } => {
            let mut config = PublisherConfig::load(path)?;
            config.set_version(build, display);
            config.save(path)?;
            tracing::info!("Build set to {}", config.product_version());
        }
        Command::AddMirror { name, url, rating } => {
            let mut config = PublisherConfig::load(path)?;
            config.add_mirror(&name, &url, rating)?;
            config.save(path)?;
            tracing::info!("Mirror {} added ({}, rating {})", name, url, rating);
        }
        Command::RemoveMirror { name } => {
            let mut config = PublisherConfig::load(path)?;
            let removed = config.remove_mirror(&name)?;
            config.save(path)?;
            tracing::info!("Mirror {} removed ({})", removed.name, removed.url);
        }
        Command::Publish {
            build_dir,
            out_dir,
            clean,
            bump,
        } => {
            let mut config = PublisherConfig::load(path)?;
            if bump {
                config.set_version(config.product.build + 1, None);
            }

            let report = publish::publish(&config, &build_dir, &out_dir, clean)?;
            if bump {
                config.save(path)?;
            }
            println!(
                "Published build {}: {} files ({} compressed), {} bytes -> {} bytes",
                report.version,
                report.files,
                report.compressed_files,
                report.build_bytes,
                report.published_bytes
            );
            println!("Manifest: {}", report.remote_manifest.display());
        }
        Command::ClientConfig { install_dir } => {
            let config = PublisherConfig::load(path)?;
            print!("{}", client_config::render(&config, &install_dir)?);
        }
    }

    Ok(())
}
