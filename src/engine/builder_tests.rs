//! Tests for the container builder
//!
//! Covers immutability, validation and the registries the builder consults.

#[cfg(test)]
mod builder_tests {
    use super::super::*;
    use crate::image::ImageRef;
    use crate::parse::parse_env_str;
    use crate::spec::{FileChunk, FileSource, Operation, Protocol, SharingMode, SpecState};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn alpine(engine: &Engine) -> ContainerBuilder {
        engine.from_image("test", ImageRef::parse("alpine").unwrap())
    }

    #[test]
    fn test_base_selection_is_first_operation() {
        let engine = Engine::new();
        let builder = engine.container("test");
        assert_eq!(builder.state(), SpecState::Unbased);
        assert_eq!(builder.op_count(), 0);

        let based = builder.from_url("alpine").unwrap();
        assert_eq!(based.state(), SpecState::Based);
        let spec = based.spec().unwrap();
        assert_eq!(spec.base().url(), "alpine:latest");
        assert!(matches!(spec.ops()[0], Operation::From { .. }));
    }

    #[test]
    fn test_operations_require_a_base() {
        let engine = Engine::new();
        let err = engine.container("test").with_exec(["uname"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(engine.container("test").spec().is_err());
    }

    #[test]
    fn test_base_can_only_be_set_once() {
        let engine = Engine::new();
        let err = alpine(&engine)
            .from(ImageRef::parse("golang").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_op_count_matches_mutating_calls() {
        let engine = Engine::new();
        let builder = engine
            .container("test")
            .from_url("alpine")
            .unwrap()
            .with_env_variable("A", "1", false)
            .unwrap()
            .with_workdir("/src")
            .unwrap()
            .with_exec(["ls"])
            .unwrap()
            .with_user("nobody")
            .unwrap()
            .with_exposed_port(8080, Protocol::Tcp)
            .unwrap()
            .with_tag("team", "infra")
            .unwrap()
            .without_entrypoint()
            .unwrap();
        assert_eq!(builder.op_count(), 8);
        assert_eq!(builder.state(), SpecState::Configured);
    }

    #[test]
    fn test_published_spec_is_never_mutated() {
        let engine = Engine::new();
        let base = alpine(&engine).with_env_variable("A", "1", false).unwrap();
        let snapshot = base.spec().unwrap();

        let left = base.with_exec(["echo", "left"]).unwrap();
        let right = base.with_exec(["echo", "right"]).unwrap();

        assert_eq!(base.spec().unwrap(), snapshot);
        assert_eq!(left.op_count(), 3);
        assert_eq!(right.op_count(), 3);
        assert_ne!(left.spec().unwrap().ops()[2], right.spec().unwrap().ops()[2]);
    }

    #[test]
    fn test_failed_validation_leaves_builder_usable() {
        let engine = Engine::new();
        let builder = alpine(&engine);
        assert!(builder.with_env_variable("BAD-NAME", "x", false).is_err());
        assert!(builder.with_workdir("relative").is_err());
        assert!(builder.with_exec(Vec::<String>::new()).is_err());
        assert!(builder.with_exposed_port(0, Protocol::Tcp).is_err());
        assert_eq!(builder.op_count(), 1);
    }

    #[test]
    fn test_expanded_value_is_stored_unresolved() {
        let engine = Engine::new();
        let spec = alpine(&engine)
            .with_env_variable("PATH", "${UNSET}:$GOPATH/bin", true)
            .unwrap()
            .spec()
            .unwrap();
        assert_eq!(
            spec.ops()[1],
            Operation::SetEnv {
                name: "PATH".to_string(),
                value: "${UNSET}:$GOPATH/bin".to_string(),
                expand: true,
            }
        );
    }

    #[test]
    fn test_env_vars_apply_in_order_and_last_wins() {
        let engine = Engine::new();
        let vars = parse_env_str("HOST=localhost,PORT=8080,HOST=remote").unwrap();
        let spec = alpine(&engine).with_env_vars(&vars).unwrap().spec().unwrap();
        assert_eq!(spec.len(), 4);
        assert_eq!(spec.env_value("HOST"), Some("remote"));
        assert_eq!(spec.env_value("PORT"), Some("8080"));
    }

    #[test]
    fn test_unknown_secret_is_rejected_when_bound() {
        let engine = Engine::new();
        let other = Engine::new();
        let foreign = other.define_secret("token", "abc").unwrap();
        let err = alpine(&engine)
            .with_secret_variable("TOKEN", &foreign)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSecret);

        let err = alpine(&engine)
            .with_new_file("/etc/token", vec![FileChunk::secret("missing")], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSecret);
    }

    #[test]
    fn test_render_never_contains_secret_values() {
        let engine = Engine::new();
        let token = engine.define_secret("gh-token", "s3cr3t-value").unwrap();
        let spec = alpine(&engine)
            .with_secret_variable("GITHUB_TOKEN", &token)
            .unwrap()
            .with_new_file(
                "/root/.token",
                vec![FileChunk::text("token="), FileChunk::secret("gh-token")],
                Some("0600"),
            )
            .unwrap()
            .spec()
            .unwrap();

        let rendered = spec.render();
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(rendered.contains("${secret:gh-token}"));
        assert!(!spec.to_json().unwrap().contains("s3cr3t-value"));
        assert_eq!(spec.secret_names(), vec!["gh-token"]);
    }

    #[test]
    fn test_same_volume_name_resolves_to_one_volume() {
        let engine = Engine::new();
        let a = alpine(&engine)
            .with_mounted_cache("/cache", "shared-cache", Some(SharingMode::Shared), None)
            .unwrap();
        let b = alpine(&engine)
            .with_mounted_cache("/other", "shared-cache", None, None)
            .unwrap();

        assert_eq!(engine.volumes().len(), 1);
        let first = engine.cache_volume("shared-cache", None, None).unwrap();
        let second = engine.volumes().get("shared-cache").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(a.spec().unwrap().cache_volumes(), vec!["shared-cache"]);
        assert_eq!(b.spec().unwrap().cache_volumes(), vec!["shared-cache"]);
    }

    #[test]
    fn test_conflicting_sharing_mode_fails_at_append() {
        let engine = Engine::new();
        let builder = alpine(&engine)
            .with_mounted_cache("/cache", "deps", Some(SharingMode::Locked), None)
            .unwrap();
        let err = builder
            .with_mounted_cache("/cache2", "deps", Some(SharingMode::Private), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheVolumeConflict);
        assert_eq!(builder.op_count(), 2);
    }

    #[test]
    fn test_cache_op_records_effective_mode() {
        let engine = Engine::new();
        engine
            .cache_volume("deps", Some(SharingMode::Private), None)
            .unwrap();
        let spec = alpine(&engine)
            .with_mounted_cache("/deps", "deps", None, None)
            .unwrap()
            .spec()
            .unwrap();
        assert!(matches!(
            &spec.ops()[1],
            Operation::MountCacheVolume {
                sharing: SharingMode::Private,
                ..
            }
        ));
    }

    #[test]
    fn test_mount_options_validate_mode() {
        let engine = Engine::new();
        let builder = alpine(&engine);
        assert!(
            builder
                .with_mounted_directory("/src", ".", MountOptions::default().mode("0755"))
                .is_ok()
        );
        let err = builder
            .with_mounted_directory("/src", ".", MountOptions::default().mode("rwx"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_mounted_file_url_must_be_http() {
        let engine = Engine::new();
        let builder = alpine(&engine);
        assert!(
            builder
                .with_mounted_file(
                    "/mnt/tool.tgz",
                    FileSource::Url("https://example.com/tool.tgz".to_string()),
                    None
                )
                .is_ok()
        );
        assert!(
            builder
                .with_mounted_file(
                    "/mnt/tool.tgz",
                    FileSource::Url("ftp://example.com/tool.tgz".to_string()),
                    None
                )
                .is_err()
        );
    }

    #[test]
    fn test_chown_and_chmod_validation() {
        let engine = Engine::new();
        let builder = alpine(&engine);
        let empty: [&str; 0] = [];
        assert!(builder.with_chown("app", None, &empty, true).is_err());
        assert!(builder.with_chmod("999", &["/data"], true, None).is_err());

        let spec = builder
            .with_chown("app", Some("app"), &["/data"], true)
            .unwrap()
            .with_chmod("0750", &["/data"], true, Some("app"))
            .unwrap()
            .spec()
            .unwrap();
        let rendered = spec.render();
        assert!(rendered.contains("CHOWN app:app /data (as root)"));
        assert!(rendered.contains("CHMOD 0750 /data (as root)"));
    }

    #[test]
    fn test_service_binding_embeds_service_spec() {
        let engine = Engine::new();
        let service = alpine(&engine)
            .with_exec(["nc", "-l", "-p", "80"])
            .unwrap()
            .spec()
            .unwrap();
        let spec = alpine(&engine)
            .with_service_binding("web", &service)
            .unwrap()
            .spec()
            .unwrap();
        match &spec.ops()[1] {
            Operation::BindService { alias, service: bound } => {
                assert_eq!(alias, "web");
                assert_eq!(bound.len(), 2);
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_adopted_spec_is_continued_verbatim() {
        let engine = Engine::new();
        let existing = alpine(&engine)
            .with_env_variable("A", "1", false)
            .unwrap()
            .spec()
            .unwrap();
        let adopted = engine.adopt(existing.clone());
        assert_eq!(adopted.spec().unwrap(), existing);
        assert_eq!(adopted.module(), "test");
    }
}
