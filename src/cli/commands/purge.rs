//! Purge command - garbage-collect stale grocker objects

use crate::cli::args::{PurgeArgs, PurgeScope};
use crate::engine::{ContainerEngine, DockerCli};
use crate::error::GrockerResult;
use crate::purge::{purge, PurgeOptions};

/// Execute the purge command
pub async fn execute(args: PurgeArgs) -> GrockerResult<()> {
    let engine = DockerCli::connect().await?;
    run_purge(&engine, &args).await
}

/// Run a purge pass against an already-connected engine.
pub async fn run_purge(engine: &dyn ContainerEngine, args: &PurgeArgs) -> GrockerResult<()> {
    let options = options_for(args);
    let report = purge(engine, &options).await?;

    if report.failed > 0 {
        println!(
            "Removed {} object(s), {} could not be removed.",
            report.removed, report.failed
        );
    } else {
        println!("Removed {} object(s).", report.removed);
    }
    Ok(())
}

fn options_for(args: &PurgeArgs) -> PurgeOptions {
    let all = args.scope == PurgeScope::All;
    PurgeOptions {
        containers: all || args.scope == PurgeScope::Containers,
        volumes: all || args.scope == PurgeScope::Volumes,
        images: all || args.scope == PurgeScope::Images,
        current_version_too: args.current_version,
        include_runners: args.include_runners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_maps_to_options() {
        let args = PurgeArgs {
            scope: PurgeScope::Volumes,
            current_version: false,
            include_runners: false,
        };
        let options = options_for(&args);
        assert!(options.volumes);
        assert!(!options.containers);
        assert!(!options.images);

        let args = PurgeArgs {
            scope: PurgeScope::All,
            current_version: true,
            include_runners: true,
        };
        let options = options_for(&args);
        assert!(options.containers && options.volumes && options.images);
        assert!(options.current_version_too);
        assert!(options.include_runners);
    }
}
