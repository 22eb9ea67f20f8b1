//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Grocker - build reproducible Docker runner images
///
/// Compiles a released application's wheels inside an isolated container
/// and assembles a runnable image on top of cached, content-addressed
/// prerequisite images.
#[derive(Parser, Debug)]
#[command(name = "grocker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the runner image for a release
    Build(BuildArgs),

    /// Remove stale grocker containers, volumes and images
    Purge(PurgeArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Application to build: `name[extras]==version` or a wheel path
    pub release: String,

    /// Grocker config file (repeatable; later files override earlier ones)
    #[arg(short, long = "config", value_name = "FILE")]
    pub config: Vec<PathBuf>,

    /// Runtime used to build and run this image
    #[arg(short, long)]
    pub runtime: Option<String>,

    /// Entrypoint used to run this image
    #[arg(short, long)]
    pub entrypoint_name: Option<String>,

    /// Container storage and configuration area (repeatable)
    #[arg(long = "volume", value_name = "PATH")]
    pub volumes: Vec<String>,

    /// Port on which the container will listen for connections (repeatable)
    #[arg(long = "port", value_name = "PORT")]
    pub ports: Vec<u16>,

    /// Pip configuration file used to download dependencies
    /// (by default use the host pip config getter)
    #[arg(long, value_name = "FILE")]
    pub pip_conf: Option<PathBuf>,

    /// Pip constraint file used to pin transitive dependencies
    #[arg(long, value_name = "FILE")]
    pub pip_constraint: Option<PathBuf>,

    /// Docker registry or account on the Docker official registry to use
    #[arg(long, value_name = "URL")]
    pub docker_image_prefix: Option<String>,

    /// Name used to tag the built image
    #[arg(short = 'n', long, value_name = "NAME")]
    pub image_name: Option<String>,

    /// YAML file where results (image name, ...) are written
    #[arg(long, value_name = "FILE")]
    pub result_file: Option<PathBuf>,

    /// Skip the dependency-compilation phase
    #[arg(long)]
    pub skip_dep: bool,

    /// Skip the image-build phase
    #[arg(long)]
    pub skip_img: bool,

    /// Skip the push phase
    #[arg(long)]
    pub skip_push: bool,
}

/// Arguments for the purge command
#[derive(Parser, Debug)]
pub struct PurgeArgs {
    /// What to purge
    pub scope: PurgeScope,

    /// Also remove objects created by the running grocker version
    #[arg(long)]
    pub current_version: bool,

    /// Also remove final application images (protected by default)
    #[arg(long)]
    pub include_runners: bool,
}

/// Object classes a purge pass can cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PurgeScope {
    /// Exited build containers
    Containers,
    /// Wheel cache volumes
    Volumes,
    /// Prerequisite and runner images
    Images,
    /// Everything above
    All,
}
