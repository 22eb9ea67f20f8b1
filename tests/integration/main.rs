//! Integration tests for grocker

mod stub_engine;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn grocker() -> Command {
        let mut cmd = cargo_bin_cmd!("grocker");
        // keep config discovery away from the repository's own files
        cmd.current_dir(std::env::temp_dir());
        cmd
    }

    #[test]
    fn help_displays() {
        grocker()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("reproducible Docker runner images"));
    }

    #[test]
    fn version_displays() {
        grocker()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("grocker"));
    }

    #[test]
    fn build_rejects_release_ranges_before_any_engine_call() {
        grocker()
            .args(["build", "my-app>=1.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unsupported release specifier"));
    }

    #[test]
    fn build_rejects_unknown_runtime() {
        grocker()
            .args(["build", "-r", "cobol", "my-app==1.0.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown runtime: cobol"));
    }

    #[test]
    fn build_rejects_missing_config_file() {
        grocker()
            .args(["build", "-c", "/nonexistent/grocker.yml", "my-app==1.0.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"));
    }

    #[test]
    fn purge_help() {
        grocker()
            .args(["purge", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stale grocker"));
    }
}

mod cache_resolver_tests {
    use crate::stub_engine::StubEngine;
    use grocker::build::get_or_build_image;

    #[tokio::test]
    async fn local_hit_never_invokes_the_builder() {
        let engine = StubEngine::new().with_local_image("registry.local/grocker-root:8.0.0-abc");

        let name = get_or_build_image(&engine, "registry.local/grocker-root:8.0.0-abc", || async {
            panic!("builder must not be called on a local hit");
        })
        .await
        .unwrap();

        assert_eq!(name, "registry.local/grocker-root:8.0.0-abc");
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn registry_hit_pulls_without_building() {
        let engine = StubEngine::new().with_registry_image("registry.local/grocker-root:8.0.0-abc");

        get_or_build_image(&engine, "registry.local/grocker-root:8.0.0-abc", || async {
            panic!("builder must not be called on a registry hit");
        })
        .await
        .unwrap();

        assert_eq!(engine.events(), vec!["pull registry.local/grocker-root:8.0.0-abc"]);
    }

    #[tokio::test]
    async fn full_miss_builds_then_pushes_prefixed_names() {
        let engine = StubEngine::new();

        get_or_build_image(&engine, "registry.local/grocker-root:8.0.0-abc", || async {
            engine
                .local_images
                .lock()
                .unwrap()
                .insert("registry.local/grocker-root:8.0.0-abc".to_string());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(
            engine.events(),
            vec![
                "pull registry.local/grocker-root:8.0.0-abc",
                "push registry.local/grocker-root:8.0.0-abc"
            ]
        );
    }

    #[tokio::test]
    async fn unprefixed_names_never_touch_the_registry() {
        let engine = StubEngine::new();

        get_or_build_image(&engine, "grocker-root:8.0.0-abc", || async { Ok(()) })
            .await
            .unwrap();

        assert!(engine.events().iter().all(|e| !e.starts_with("pull")));
        assert!(engine.events().iter().all(|e| !e.starts_with("push")));
    }
}

mod build_flow_tests {
    use crate::stub_engine::StubEngine;
    use grocker::cli::args::BuildArgs;
    use grocker::cli::commands::build::run_build;
    use grocker::config::{self, Overrides};
    use grocker::naming::{self, Role};
    use grocker::release::Release;
    use std::fs;

    fn build_args(release: &str) -> BuildArgs {
        BuildArgs {
            release: release.to_string(),
            config: vec![],
            runtime: None,
            entrypoint_name: None,
            volumes: vec![],
            ports: vec![],
            pip_conf: None,
            pip_constraint: None,
            docker_image_prefix: None,
            image_name: None,
            result_file: None,
            skip_dep: false,
            skip_img: false,
            skip_push: false,
        }
    }

    fn test_config(extra_yaml: &str) -> grocker::config::Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yml");
        fs::write(
            &path,
            format!(
                "dependencies:\n  run: [libjpeg62-turbo]\n  build: [libjpeg62-turbo-dev]\n{extra_yaml}"
            ),
        )
        .unwrap();
        config::resolve_in(dir.path(), &[path], &Overrides::default()).unwrap()
    }

    #[tokio::test]
    async fn full_build_runs_every_stage_in_order() {
        let engine = StubEngine::new();
        let config = test_config("");
        let release = Release::parse("grocker-test-project==3.0.1").unwrap();
        let args = build_args("grocker-test-project==3.0.1");

        let results = run_build(&engine, &config, &release, &args).await.unwrap();

        assert_eq!(results.image, "grocker-test-project:3.0.1");
        assert_eq!(
            results.root_image.as_deref(),
            Some(naming::image_name(&config, Role::Root).unwrap().as_str())
        );
        assert!(results.compiler_image.is_some());
        // unprefixed image: push phase warns and records no digest
        assert!(results.hash.is_none());

        let events = engine.events();
        let build_events: Vec<&String> =
            events.iter().filter(|e| e.starts_with("build ")).collect();
        // root, compiler, wheel-server, runner
        assert_eq!(build_events.len(), 4);
        assert!(build_events[0].contains("-root:"));
        assert!(build_events[1].contains("-compiler:"));
        assert!(build_events[2].contains("wheel-server:"));
        assert!(build_events[3].ends_with("grocker-test-project:3.0.1"));

        // the compiler ran against the cache volume
        let volume = naming::wheel_volume_name(&config).unwrap();
        assert!(events.contains(&format!("volume {volume}")));
        // the wheel server was started and cleaned up
        assert!(events.iter().any(|e| e.starts_with("start ")));
        assert!(events.contains(&"rm stub-container".to_string()));
    }

    #[tokio::test]
    async fn second_build_is_an_image_cache_hit() {
        let engine = StubEngine::new();
        let config = test_config("");
        let release = Release::parse("grocker-test-project==3.0.1").unwrap();
        let args = build_args("grocker-test-project==3.0.1");

        run_build(&engine, &config, &release, &args).await.unwrap();
        engine.clear_events();

        run_build(&engine, &config, &release, &args).await.unwrap();
        let events = engine.events();

        // prerequisite images resolve locally; only the runner is rebuilt
        let build_events: Vec<&String> =
            events.iter().filter(|e| e.starts_with("build ")).collect();
        assert_eq!(build_events.len(), 1);
        assert!(build_events[0].ends_with("grocker-test-project:3.0.1"));
    }

    #[tokio::test]
    async fn prefixed_build_pushes_and_records_the_digest() {
        let engine = StubEngine::new();
        let config = test_config("docker_image_prefix: registry.local\n");
        let release = Release::parse("grocker-test-project==3.0.1").unwrap();
        let args = build_args("grocker-test-project==3.0.1");

        let results = run_build(&engine, &config, &release, &args).await.unwrap();

        assert_eq!(results.image, "registry.local/grocker-test-project:3.0.1");
        assert_eq!(results.hash.as_deref(), Some("sha256:stubdigest"));
        // prerequisite images get pushed for other machines to pull
        assert!(engine.events().iter().any(|e| e.starts_with("push registry.local/grocker-")));
    }

    #[tokio::test]
    async fn skip_toggles_disable_phases() {
        let engine = StubEngine::new();
        let config = test_config("");
        let release = Release::parse("grocker-test-project==3.0.1").unwrap();
        let mut args = build_args("grocker-test-project==3.0.1");
        args.skip_dep = true;
        args.skip_img = true;
        args.skip_push = true;

        let results = run_build(&engine, &config, &release, &args).await.unwrap();

        assert!(engine.events().is_empty());
        assert!(results.compiler_image.is_none());
        assert!(results.root_image.is_none());
    }

    #[tokio::test]
    async fn failed_compilation_is_fatal() {
        let engine = StubEngine::new();
        *engine.run_exit_code.lock().unwrap() = 2;
        let config = test_config("");
        let release = Release::parse("grocker-test-project==3.0.1").unwrap();
        let args = build_args("grocker-test-project==3.0.1");

        let err = run_build(&engine, &config, &release, &args).await.unwrap_err();
        assert!(matches!(
            err,
            grocker::GrockerError::CompilationFailed { code: 2 }
        ));
    }

    #[tokio::test]
    async fn wheel_server_is_removed_even_when_the_runner_build_fails() {
        let engine = StubEngine::new();
        engine
            .failing_builds
            .lock()
            .unwrap()
            .insert("grocker-test-project:3.0.1".to_string());
        let config = test_config("");
        let release = Release::parse("grocker-test-project==3.0.1").unwrap();
        let mut args = build_args("grocker-test-project==3.0.1");
        args.skip_dep = true;

        let err = run_build(&engine, &config, &release, &args).await.unwrap_err();
        assert!(matches!(err, grocker::GrockerError::ImageBuildFailed { .. }));
        // best-effort cleanup still removed the ephemeral server
        assert!(engine.events().contains(&"rm stub-container".to_string()));
    }
}

mod purge_tests {
    use crate::stub_engine::StubEngine;
    use grocker::engine::{labels, EngineObject};
    use grocker::naming::GROCKER_VERSION;
    use grocker::purge::{purge, PurgeOptions};
    use std::collections::HashMap;

    fn object(id: &str, version: Option<&str>, role: Option<&str>) -> EngineObject {
        let mut object_labels = HashMap::new();
        if let Some(version) = version {
            object_labels.insert(labels::VERSION.to_string(), version.to_string());
        }
        if let Some(role) = role {
            object_labels.insert(labels::ROLE.to_string(), role.to_string());
        }
        EngineObject {
            id: id.to_string(),
            names: vec![format!("{id}-name")],
            labels: object_labels,
        }
    }

    fn image_options() -> PurgeOptions {
        PurgeOptions {
            images: true,
            ..PurgeOptions::default()
        }
    }

    #[tokio::test]
    async fn current_version_objects_are_protected_by_default() {
        let engine = StubEngine::new();
        engine.images.lock().unwrap().extend([
            object("old", Some("7.1.0"), Some("root")),
            object("current", Some(GROCKER_VERSION), Some("root")),
        ]);

        let report = purge(&engine, &image_options()).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(engine.events(), vec!["rmi old-name"]);
    }

    #[tokio::test]
    async fn current_version_too_removes_everything_labeled() {
        let engine = StubEngine::new();
        engine.images.lock().unwrap().extend([
            object("old", Some("7.1.0"), Some("root")),
            object("current", Some(GROCKER_VERSION), Some("compiler")),
        ]);

        let options = PurgeOptions {
            current_version_too: true,
            ..image_options()
        };
        let report = purge(&engine, &options).await.unwrap();
        assert_eq!(report.removed, 2);
    }

    #[tokio::test]
    async fn runner_images_are_protected_unless_included() {
        let engine = StubEngine::new();
        engine.images.lock().unwrap().extend([
            object("old-root", Some("7.1.0"), Some("root")),
            object("old-runner", Some("7.1.0"), Some("runner")),
        ]);

        let report = purge(&engine, &image_options()).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(engine.events(), vec!["rmi old-root-name"]);

        engine.clear_events();
        let options = PurgeOptions {
            include_runners: true,
            ..image_options()
        };
        let report = purge(&engine, &options).await.unwrap();
        assert_eq!(report.removed, 2);
    }

    #[tokio::test]
    async fn unlabeled_objects_are_never_touched() {
        let engine = StubEngine::new();
        engine
            .images
            .lock()
            .unwrap()
            .push(object("foreign", None, None));
        engine
            .volumes
            .lock()
            .unwrap()
            .push(object("user-data", None, None));

        let options = PurgeOptions {
            containers: true,
            volumes: true,
            images: true,
            current_version_too: true,
            include_runners: true,
        };
        let report = purge(&engine, &options).await.unwrap();

        assert_eq!(report.removed, 0);
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn legacy_labeled_volumes_are_collected_once() {
        let engine = StubEngine::new();
        let mut volume = object("legacy-vol", Some("6.0.0"), Some("wheel"));
        volume
            .labels
            .insert(labels::LEGACY.to_string(), "true".to_string());
        engine.volumes.lock().unwrap().push(volume);

        let options = PurgeOptions {
            volumes: true,
            ..PurgeOptions::default()
        };
        let report = purge(&engine, &options).await.unwrap();

        // the volume matches both the version and the legacy filter but is
        // removed exactly once
        assert_eq!(report.removed, 1);
        assert_eq!(engine.events(), vec!["volume rm legacy-vol"]);
    }

    #[tokio::test]
    async fn runner_containers_are_not_removed() {
        let engine = StubEngine::new();
        engine.containers.lock().unwrap().extend([
            object("old-wheel", Some("7.1.0"), Some("wheel")),
            object("app", Some("7.1.0"), Some("runner")),
        ]);

        let options = PurgeOptions {
            containers: true,
            ..PurgeOptions::default()
        };
        let report = purge(&engine, &options).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(engine.events(), vec!["rm old-wheel"]);
    }
}

mod identifier_tests {
    use grocker::config::{self, Overrides};
    use grocker::naming::config_identifier;
    use std::fs;

    fn resolve(yaml: &str) -> grocker::config::Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grocker.yml");
        fs::write(&path, yaml).unwrap();
        config::resolve_in(dir.path(), &[path], &Overrides::default()).unwrap()
    }

    #[test]
    fn equal_content_different_order_same_digest() {
        let a = resolve("dependencies:\n  run: [libzbar0, libjpeg62-turbo]\n");
        let b = resolve("dependencies:\n  run: [libjpeg62-turbo, libzbar0]\n");
        assert_eq!(
            config_identifier(&a).unwrap(),
            config_identifier(&b).unwrap()
        );
    }

    #[test]
    fn single_dependency_change_changes_the_digest() {
        let a = resolve("dependencies:\n  run: [libjpeg62-turbo]\n");
        let b = resolve("dependencies:\n  run: [libjpeg62-turbo]\n  build: [libjpeg62-turbo-dev]\n");
        assert_ne!(
            config_identifier(&a).unwrap(),
            config_identifier(&b).unwrap()
        );
    }
}
