//! Tooling freshness checks
//!
//! Both checks run once, up front, before any build work: a stale engine
//! or a stale grocker would waste a long build producing wrong images.
//! The engine API check lives in the engine adapter; this module asks the
//! package index whether a newer grocker has been released.

use crate::error::{GrockerError, GrockerResult};
use crate::naming::GROCKER_VERSION;
use semver::Version;
use std::time::Duration;
use tracing::{debug, warn};

/// Package index record consulted for the latest released version
const INDEX_URL: &str = "https://pypi.org/pypi/grocker/json";

const TRIES: u32 = 3;
const DELAY: Duration = Duration::from_secs(1);

/// Abort when a newer grocker is released.
///
/// An unreachable index only warns: offline builds must keep working.
pub fn check_tool_is_current() -> GrockerResult<()> {
    let latest = match fetch_latest_version() {
        Ok(latest) => latest,
        Err(err) => {
            warn!("Could not check for a newer grocker release: {}", err);
            return Ok(());
        }
    };

    let current = Version::parse(GROCKER_VERSION).expect("crate version is valid semver");
    match Version::parse(&latest) {
        Ok(released) if released > current => Err(GrockerError::ToolOutdated {
            current: GROCKER_VERSION.to_string(),
            latest,
        }),
        Ok(_) => {
            debug!("grocker {} is current (latest: {})", GROCKER_VERSION, latest);
            Ok(())
        }
        Err(err) => {
            warn!("Unparseable released version {:?}: {}", latest, err);
            Ok(())
        }
    }
}

/// Ask the index for the latest version, with a small fixed retry.
fn fetch_latest_version() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let mut attempt = 1;
    loop {
        match query_index() {
            Ok(version) => return Ok(version),
            Err(err) if attempt < TRIES => {
                debug!("Index query attempt {}/{} failed: {}", attempt, TRIES, err);
                std::thread::sleep(DELAY);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn query_index() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let mut response = ureq::get(INDEX_URL).call()?;
    let body: serde_json::Value = response.body_mut().read_json()?;
    body.pointer("/info/version")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| "index answer has no info.version".into())
}
