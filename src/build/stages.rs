//! Build stages
//!
//! Each stage follows the same pattern: acquire a fresh build context,
//! render the packaged templates with an explicit value map, then submit
//! the prepared directory to the engine under the stage's name and role
//! label. The context directory disappears when the stage returns,
//! whichever way it returns.

use crate::build::context::BuildContext;
use crate::build::server::with_wheel_server;
use crate::config::{Config, Repository};
use crate::engine::{BuildRequest, ContainerEngine};
use crate::error::GrockerResult;
use crate::naming::{image_name, Role};
use crate::release::Release;
use crate::template::TemplateContext;
use std::collections::BTreeMap;

/// Build the root image: base OS, extra repositories, run dependencies.
pub async fn build_root_image(
    engine: &dyn ContainerEngine,
    config: &Config,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<()> {
    let runtime = config.runtime_spec()?;
    let context = BuildContext::acquire(Role::Root)?;

    context.render_all(
        &TemplateContext::new()
            .set("base_image", runtime.image.as_str())
            .set("runtime", runtime.runtime.as_str())
            .set("repository_setup", repository_setup(&config.repositories)),
    )?;

    let mut request = BuildRequest::new(
        context.path().to_path_buf(),
        image_name(config, Role::Root)?,
        Role::Root,
    );
    request.pull = true;
    request.build_args.insert(
        "SYSTEM_DEPENDENCIES".to_string(),
        config.system_dependencies(false)?.join(" "),
    );

    engine.build_image(&request, on_output).await
}

/// Build the compiler image on top of the resolved root image, adding the
/// build-time dependencies.
pub async fn build_compiler_image(
    engine: &dyn ContainerEngine,
    config: &Config,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<()> {
    let runtime = config.runtime_spec()?;
    let context = BuildContext::acquire(Role::Compiler)?;

    context.render_all(
        &TemplateContext::new()
            .set("base_image", image_name(config, Role::Root)?)
            .set("runtime", runtime.runtime.as_str()),
    )?;

    let mut request = BuildRequest::new(
        context.path().to_path_buf(),
        image_name(config, Role::Compiler)?,
        Role::Compiler,
    );
    request.pull = config.docker_image_prefix.is_some();
    request.build_args.insert(
        "SYSTEM_DEPENDENCIES".to_string(),
        config.system_dependencies(true)?.join(" "),
    );

    engine.build_image(&request, on_output).await
}

/// Build the static wheel-server image. Its context has no
/// config-dependent content, so its name carries no config hash.
pub async fn build_wheel_server_image(
    engine: &dyn ContainerEngine,
    config: &Config,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<()> {
    let context = BuildContext::acquire(Role::WheelServer)?;

    let request = BuildRequest::new(
        context.path().to_path_buf(),
        image_name(config, Role::WheelServer)?,
        Role::WheelServer,
    );

    engine.build_image(&request, on_output).await
}

/// Build the final runner image.
///
/// Needs a running wheel server: its address becomes a build argument so
/// the in-build installer can fetch the compiled wheels over plain HTTP.
/// The engine layer cache is disabled; the application version changes
/// every build and a stale final layer would be wrong.
pub async fn build_runner_image(
    engine: &dyn ContainerEngine,
    config: &Config,
    name: &str,
    release: &Release,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<()> {
    let runtime = config.runtime_spec()?;
    let context = BuildContext::acquire(Role::Runner)?;

    let has_constraint = match &config.pip_constraint {
        Some(path) => {
            context.copy_in(path, "constraints.txt")?;
            true
        }
        None => false,
    };

    context.render_all(
        &TemplateContext::new()
            .set("base_image", image_name(config, Role::Root)?)
            .set("runtime", runtime.runtime.as_str())
            .set("entrypoint_name", config.entrypoint_name.as_str())
            .set("app_requirement", release.as_requirement())
            .set(
                "constraint_copy",
                if has_constraint {
                    "COPY constraints.txt /home/grocker/constraints.txt"
                } else {
                    ""
                },
            )
            .set(
                "pip_constraint_arg",
                if has_constraint {
                    "--constraint /home/grocker/constraints.txt"
                } else {
                    ""
                },
            )
            .set("envs_directive", envs_directive(&config.envs))
            .set("volumes_directive", volumes_directive(&config.volumes))
            .set("ports_directive", ports_directive(&config.ports)),
    )?;

    with_wheel_server(engine, config, on_output, |server_ip| async move {
        let mut request =
            BuildRequest::new(context.path().to_path_buf(), name, Role::Runner);
        request.pull = config.docker_image_prefix.is_some();
        request.no_cache = true;
        request
            .build_args
            .insert("GROCKER_WHEEL_SERVER_IP".to_string(), server_ip);

        engine.build_image(&request, on_output).await
    })
    .await
}

/// Shell commands installing the configured extra repositories, rendered
/// into the root image's provision script.
fn repository_setup(repositories: &BTreeMap<String, Repository>) -> String {
    let mut lines = Vec::new();
    for (name, repository) in repositories {
        lines.push(format!(
            "cat <<'GROCKER_KEY_EOF' > /etc/apt/trusted.gpg.d/{name}.asc"
        ));
        lines.push(repository.key.trim_end().to_string());
        lines.push("GROCKER_KEY_EOF".to_string());
        lines.push(format!(
            "echo '{}' > /etc/apt/sources.list.d/{name}.list",
            repository.uri
        ));
    }
    lines.join("\n")
}

/// `ENV` lines for the runner Dockerfile, sorted by key
fn envs_directive(envs: &BTreeMap<String, String>) -> String {
    envs.iter()
        .map(|(key, value)| format!("ENV {key}={}", dockerfile_quote(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `VOLUME` declaration for the runner Dockerfile
fn volumes_directive(volumes: &[String]) -> String {
    if volumes.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = volumes.iter().map(|v| format!("\"{v}\"")).collect();
    format!("VOLUME [{}]", quoted.join(", "))
}

/// `EXPOSE` declaration for the runner Dockerfile
fn ports_directive(ports: &[u16]) -> String {
    if ports.is_empty() {
        return String::new();
    }
    let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
    format!("EXPOSE {}", ports.join(" "))
}

/// Quote a value for a Dockerfile ENV instruction.
/// Embedded double quotes and backslashes are escaped to prevent injection.
fn dockerfile_quote(value: &str) -> String {
    if value.contains('$') || value.contains(' ') || value.contains('"') || value.contains('\\') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volumes_directive_lists_every_volume() {
        let volumes = vec!["/data".to_string(), "/config".to_string()];
        assert_eq!(volumes_directive(&volumes), "VOLUME [\"/data\", \"/config\"]");
        assert_eq!(volumes_directive(&[]), "");
    }

    #[test]
    fn ports_directive_exposes_every_port() {
        assert_eq!(ports_directive(&[8080, 9090]), "EXPOSE 8080 9090");
        assert_eq!(ports_directive(&[]), "");
    }

    #[test]
    fn envs_directive_is_sorted_and_quoted() {
        let mut envs = BTreeMap::new();
        envs.insert("ZONE".to_string(), "eu".to_string());
        envs.insert("APP_MODE".to_string(), "prod server".to_string());

        assert_eq!(
            envs_directive(&envs),
            "ENV APP_MODE=\"prod server\"\nENV ZONE=eu"
        );
    }

    #[test]
    fn dockerfile_quote_simple() {
        assert_eq!(dockerfile_quote("/data"), "/data");
    }

    #[test]
    fn dockerfile_quote_with_variable() {
        assert_eq!(dockerfile_quote("/opt/bin:${PATH}"), "\"/opt/bin:${PATH}\"");
    }

    #[test]
    fn dockerfile_quote_escapes_embedded_quotes() {
        assert_eq!(
            dockerfile_quote("value with \"quotes\""),
            "\"value with \\\"quotes\\\"\""
        );
    }

    #[test]
    fn repository_setup_writes_key_and_source() {
        let mut repositories = BTreeMap::new();
        repositories.insert(
            "internal".to_string(),
            Repository {
                uri: "deb https://apt.example.com stable main".to_string(),
                key: "-----BEGIN PGP PUBLIC KEY BLOCK-----\nabc\n-----END PGP PUBLIC KEY BLOCK-----".to_string(),
            },
        );

        let script = repository_setup(&repositories);
        assert!(script.contains("/etc/apt/trusted.gpg.d/internal.asc"));
        assert!(script.contains("deb https://apt.example.com stable main"));
        assert!(script.contains("sources.list.d/internal.list"));
        assert_eq!(repository_setup(&BTreeMap::new()), "");
    }
}
