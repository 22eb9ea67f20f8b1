//! Scoped build context directories
//!
//! Each stage materializes its packaged file set into a fresh temporary
//! directory, renders templates into it, hands the directory to the
//! engine's build call and lets RAII delete it on every exit path,
//! success or failure.

use crate::error::{GrockerError, GrockerResult};
use crate::naming::Role;
use crate::template::{render, TemplateContext};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// One packaged context file: name in the context, embedded content, and
/// whether it needs rendering before use.
struct ResourceFile {
    name: &'static str,
    content: &'static str,
    template: bool,
}

const ROOT_FILES: &[ResourceFile] = &[
    ResourceFile {
        name: "Dockerfile",
        content: include_str!("../../resources/docker/root-image/Dockerfile.tmpl"),
        template: true,
    },
    ResourceFile {
        name: "provision.sh",
        content: include_str!("../../resources/docker/root-image/provision.sh.tmpl"),
        template: true,
    },
];

const COMPILER_FILES: &[ResourceFile] = &[
    ResourceFile {
        name: "Dockerfile",
        content: include_str!("../../resources/docker/compiler-image/Dockerfile.tmpl"),
        template: true,
    },
    ResourceFile {
        name: "compile.py",
        content: include_str!("../../resources/docker/compiler-image/compile.py"),
        template: false,
    },
];

const WHEEL_SERVER_FILES: &[ResourceFile] = &[ResourceFile {
    name: "Dockerfile",
    content: include_str!("../../resources/docker/wheel-server/Dockerfile"),
    template: false,
}];

const RUNNER_FILES: &[ResourceFile] = &[ResourceFile {
    name: "Dockerfile",
    content: include_str!("../../resources/docker/runner-image/Dockerfile.tmpl"),
    template: true,
}];

fn resource_files(role: Role) -> &'static [ResourceFile] {
    match role {
        Role::Root => ROOT_FILES,
        Role::Compiler => COMPILER_FILES,
        Role::WheelServer => WHEEL_SERVER_FILES,
        Role::Runner => RUNNER_FILES,
        Role::Wheel => &[],
    }
}

/// A build context: temporary directory plus the role's packaged files.
///
/// Static files land on disk at acquisition; templates are written by
/// [`BuildContext::render_all`] once the stage has assembled its context
/// map. Dropping the value deletes the directory.
pub struct BuildContext {
    role: Role,
    dir: TempDir,
}

impl BuildContext {
    /// Create the context directory and materialize the static files
    pub fn acquire(role: Role) -> GrockerResult<Self> {
        let dir = TempDir::with_prefix("grocker-build-")
            .map_err(|e| GrockerError::io("creating build context directory", e))?;
        debug!("Build context for {} at {}", role, dir.path().display());

        let context = Self { role, dir };
        for file in resource_files(role) {
            if !file.template {
                context.write_file(file.name, file.content)?;
            }
        }
        Ok(context)
    }

    /// Directory handed to the engine's build call
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Render every packaged template of this role with `values`
    pub fn render_all(&self, values: &TemplateContext) -> GrockerResult<()> {
        for file in resource_files(self.role) {
            if file.template {
                self.write_file(file.name, &render(file.content, values))?;
            }
        }
        Ok(())
    }

    /// Copy an external file (constraint file, local wheel) into the context
    pub fn copy_in(&self, source: &Path, name: &str) -> GrockerResult<()> {
        std::fs::copy(source, self.dir.path().join(name)).map_err(|e| {
            GrockerError::io(
                format!("copying {} into build context", source.display()),
                e,
            )
        })?;
        Ok(())
    }

    fn write_file(&self, name: &str, content: &str) -> GrockerResult<()> {
        std::fs::write(self.dir.path().join(name), content)
            .map_err(|e| GrockerError::io(format!("writing {name} into build context"), e))
    }
}
