//! Build command - compile wheels, assemble the runner image, push it
//!
//! The three phases are independently skippable. Configuration and
//! release validation, then both freshness checks, all run before the
//! first engine operation: a doomed invocation fails in milliseconds,
//! not after a long build.

use crate::build::{
    build_runner_image, compile_wheels, get_or_build_compiler_image, get_or_build_root_image,
    PipConf,
};
use crate::cli::args::BuildArgs;
use crate::config::{self, Config, Overrides};
use crate::engine::{ContainerEngine, DockerCli};
use crate::error::{GrockerError, GrockerResult};
use crate::freshness;
use crate::naming::{default_image_name, is_prefixed_image};
use crate::release::Release;
use crate::ui::{BuildProgress, TaskSpinner, UiContext};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// What one build invocation produced, written to `--result-file`
#[derive(Debug, Default, Serialize)]
pub struct BuildResults {
    pub release: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Execute the build command
pub async fn execute(args: BuildArgs) -> GrockerResult<()> {
    let overrides = Overrides {
        runtime: args.runtime.clone(),
        entrypoint_name: args.entrypoint_name.clone(),
        pip_constraint: args.pip_constraint.clone(),
        docker_image_prefix: args.docker_image_prefix.clone(),
        image_base_name: None,
        volumes: args.volumes.clone(),
        ports: args.ports.clone(),
    };
    let config = config::resolve(&args.config, &overrides)?;

    // fail fast, before any engine call
    config.runtime_spec()?;
    let release = Release::parse(&args.release)?;

    tokio::task::spawn_blocking(freshness::check_tool_is_current)
        .await
        .map_err(|e| GrockerError::Internal(format!("freshness check aborted: {e}")))??;

    let engine = DockerCli::connect().await?;
    let results = run_build(&engine, &config, &release, &args).await?;

    if let Some(path) = &args.result_file {
        write_results(path, &results)?;
    }

    println!("Built {}", results.image);
    Ok(())
}

/// Run the build phases against an already-connected engine.
pub async fn run_build(
    engine: &dyn ContainerEngine,
    config: &Config,
    release: &Release,
    args: &BuildArgs,
) -> GrockerResult<BuildResults> {
    let ui = UiContext::detect();
    let image = args
        .image_name
        .clone()
        .unwrap_or_else(|| default_image_name(config, release));

    let mut results = BuildResults {
        release: args.release.clone(),
        image: image.clone(),
        ..BuildResults::default()
    };

    if !args.skip_dep {
        info!("Compiling dependencies...");
        let progress = BuildProgress::new(&ui, "compiler");
        let on_line = |line: String| progress.on_line(line);
        let compiler = get_or_build_compiler_image(engine, config, &on_line).await;
        progress.finish();
        results.compiler_image = Some(compiler?);

        let mut spinner = TaskSpinner::new(&ui);
        spinner.start("Compiling wheels...");
        let pip_conf = PipConf::resolve(args.pip_conf.as_deref()).await?;
        let compiled = compile_wheels(engine, config, release, &pip_conf, &print_line).await;
        match &compiled {
            Ok(()) => spinner.stop("Wheels compiled"),
            Err(_) => spinner.stop_error("Wheel compilation failed"),
        }
        compiled?;
    }

    if !args.skip_img {
        info!("Building image...");
        let progress = BuildProgress::new(&ui, "runner");
        let on_line = |line: String| progress.on_line(line);
        let root = get_or_build_root_image(engine, config, &on_line).await;
        let built = match root {
            Ok(root) => {
                results.root_image = Some(root);
                build_runner_image(engine, config, &image, release, &on_line).await
            }
            Err(err) => Err(err),
        };
        progress.finish();
        built?;
    }

    if !args.skip_push {
        if is_prefixed_image(&image) {
            let mut spinner = TaskSpinner::new(&ui);
            spinner.start("Pushing image...");
            let pushed = engine.push_image(&image).await;
            match &pushed {
                Ok(_) => spinner.stop("Image pushed"),
                Err(_) => spinner.stop_error("Push failed"),
            }
            results.hash = Some(pushed?);
        } else {
            warn!("Not pushing any image since the registry is unclear in {}", image);
        }
    }

    Ok(results)
}

fn print_line(line: String) {
    println!("{line}");
}

fn write_results(path: &Path, results: &BuildResults) -> GrockerResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GrockerError::io(format!("creating {}", parent.display()), e))?;
        }
    }
    let content = serde_yaml::to_string(results)?;
    std::fs::write(path, content)
        .map_err(|e| GrockerError::io(format!("writing results to {}", path.display()), e))
}
