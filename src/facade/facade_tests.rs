//! Tests for the façade contract

#[cfg(test)]
mod facade_tests {
    use super::super::*;
    use crate::driver::{ExecResponse, SimulatedDriver};
    use crate::engine::ErrorKind;
    use crate::spec::Operation;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn executor(engine: &Engine) -> (Arc<SimulatedDriver>, Executor) {
        let driver = Arc::new(SimulatedDriver::new());
        (driver.clone(), Executor::new(driver, engine.clone()))
    }

    #[test]
    fn test_default_image_is_resolved() {
        let engine = Engine::new();
        let toolbox = Toolbox::new(&engine, &FacadeOptions::new()).unwrap();
        assert_eq!(toolbox.spec().unwrap().base().url(), "alpine:latest");
        assert_eq!(toolbox.module(), "toolbox");

        let pinned = Toolbox::new(&engine, &FacadeOptions::new().version("3.20")).unwrap();
        assert_eq!(pinned.spec().unwrap().base().url(), "alpine:3.20");
    }

    #[test]
    fn test_image_url_wins_over_version() {
        let engine = Engine::new();
        let opts = FacadeOptions::new()
            .version("3.20")
            .image_url("registry.example.com/tools/alpine:edge");
        let toolbox = Toolbox::new(&engine, &opts).unwrap();
        assert_eq!(
            toolbox.spec().unwrap().base().url(),
            "registry.example.com/tools/alpine:edge"
        );

        let err = Toolbox::new(&engine, &FacadeOptions::new().image_url("bad image:")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidImageUrl);
    }

    #[test]
    fn test_existing_spec_wins_over_everything() {
        let engine = Engine::new();
        let existing = Toolbox::new(&engine, &FacadeOptions::new().version("3.19"))
            .unwrap()
            .spec()
            .unwrap();
        let opts = FacadeOptions::new()
            .existing(existing.clone())
            .image_url("golang:1.22");
        let toolbox = Toolbox::new(&engine, &opts).unwrap();
        assert_eq!(toolbox.spec().unwrap(), existing);
    }

    #[test]
    fn test_env_vars_and_packages_are_appended() {
        let engine = Engine::new();
        let opts = FacadeOptions::new()
            .env_vars(["HOST=localhost", "PORT=8080"])
            .packages(["git", " "]);
        let spec = Toolbox::new(&engine, &opts).unwrap().spec().unwrap();
        assert_eq!(spec.env_value("HOST"), Some("localhost"));
        assert_eq!(spec.env_value("PORT"), Some("8080"));
        assert!(matches!(
            spec.ops().last(),
            Some(Operation::Exec { argv, .. }) if argv == &vec!["apk", "add", "git"]
        ));

        let err = Toolbox::new(&engine, &FacadeOptions::new().env_vars(["NOVALUE"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn test_print_env_lists_forwarded_vars() {
        let engine = Engine::new();
        let (_driver, executor) = executor(&engine);
        let opts = FacadeOptions::new().env_vars(["HOST=localhost", "PORT=8080"]);
        let toolbox = Toolbox::new(&engine, &opts).unwrap();

        let env = toolbox.print_env(&executor, &RunOptions::new()).await.unwrap();
        assert!(env.contains("HOST=localhost"));
        assert!(env.contains("PORT=8080"));
    }

    #[tokio::test]
    async fn test_inspect_env() {
        let engine = Engine::new();
        let (_driver, executor) = executor(&engine);
        let toolbox = Toolbox::new(&engine, &FacadeOptions::new().env_vars(["STAGE=dev"])).unwrap();
        let run = RunOptions::new();

        assert_eq!(toolbox.inspect_env(&executor, "STAGE", &run).await.unwrap(), "dev");

        let err = toolbox.inspect_env(&executor, "MISSING", &run).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainError);
        assert_eq!(err.to_string(), "environment variable MISSING not found");
        assert_eq!(err.module(), "toolbox");

        let err = toolbox.inspect_env(&executor, "BAD-KEY", &run).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(toolbox.inspect_env(&executor, "", &run).await.is_err());
    }

    #[tokio::test]
    async fn test_run_shell_returns_stdout() {
        let engine = Engine::new();
        let (driver, executor) = executor(&engine);
        let toolbox = Toolbox::new(&engine, &FacadeOptions::new()).unwrap();

        let out = toolbox
            .run_shell(&executor, "cd /tmp && pwd", &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(out, "/tmp\n");
        assert!(driver.calls().iter().any(|c| c.starts_with("WithExec([\"sh\", \"-c\"")));
    }

    #[tokio::test]
    async fn test_run_shell_failure_is_tagged_with_module() {
        let engine = Engine::new();
        let (driver, executor) = executor(&engine);
        driver.respond("sh -c make", ExecResponse::fail(2, "no rule\n"));
        let toolbox = Toolbox::new(&engine, &FacadeOptions::new()).unwrap();

        let err = toolbox
            .run_shell(&executor, "make", &RunOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecFailed);
        assert_eq!(err.module(), "toolbox");
    }

    #[tokio::test]
    async fn test_terminal_uses_sh() {
        let engine = Engine::new();
        let (driver, executor) = executor(&engine);
        let toolbox = Toolbox::new(&engine, &FacadeOptions::new()).unwrap();
        assert_eq!(toolbox.terminal(&executor, &RunOptions::new()).await.unwrap(), 0);
        assert_eq!(
            driver.calls().last().map(String::as_str),
            Some("Terminal([\"/bin/sh\"])")
        );
    }

    #[tokio::test]
    async fn test_terraform_plan_runs_through_executor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "terraform {}\n").unwrap();
        let engine = Engine::new();
        let (driver, executor) = executor(&engine);

        let tf = Terraform::new(&engine, &FacadeOptions::new(), dir.path())
            .unwrap()
            .plan(".", "-input=false", "")
            .unwrap();
        tf.run(&executor, &RunOptions::new()).await.unwrap();

        let execs: Vec<String> = driver
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("WithExec"))
            .collect();
        assert_eq!(
            execs,
            vec![
                "WithExec([\"terraform\", \"init\"])",
                "WithExec([\"terraform\", \"plan\", \"-input=false\"])",
            ]
        );
        assert!(driver.calls().contains(&"WithWorkdir(/mnt)".to_string()));
    }

    #[test]
    fn test_terraform_existing_spec_skips_cache() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new();
        let existing = Toolbox::new(&engine, &FacadeOptions::new())
            .unwrap()
            .spec()
            .unwrap();
        let tf = Terraform::new(&engine, &FacadeOptions::new().existing(existing), dir.path())
            .unwrap();
        assert!(tf.spec().unwrap().cache_volumes().is_empty());
    }

    #[tokio::test]
    async fn test_gotest_failure_surfaces_exit_code() {
        let engine = Engine::new();
        let (driver, executor) = executor(&engine);
        driver.respond("go test", ExecResponse::fail(1, "--- FAIL: TestParse\n"));

        let gotest = GoTest::new(&engine, &FacadeOptions::new())
            .unwrap()
            .with_source("/tmp/project", None)
            .unwrap()
            .test(&["./..."], &GoTestOptions::default())
            .unwrap();
        match gotest.run(&executor, &RunOptions::new()).await.unwrap_err() {
            crate::engine::EngineError::ExecFailed { output_tail, .. } => {
                assert!(output_tail.contains("TestParse"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
