//! Tests for spec execution
//!
//! Drives whole specs through the [`SimulatedDriver`] and asserts on the
//! recorded driver calls and the run results.

#[cfg(test)]
mod adapter_tests {
    use super::super::*;
    use crate::engine::recipes::NETRC_PATH;
    use crate::engine::{
        CancelToken, ContainerBuilder, Engine, EngineError, ErrorKind, NetrcPassword,
        ParallelRunner,
    };
    use crate::image::ImageRef;
    use crate::parse::parse_env_str;
    use crate::spec::{FileChunk, SharingMode, SpecState};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    fn setup() -> (Engine, Arc<SimulatedDriver>, Executor) {
        setup_with(SimulatedDriver::new())
    }

    fn setup_with(driver: SimulatedDriver) -> (Engine, Arc<SimulatedDriver>, Executor) {
        let engine = Engine::new();
        let driver = Arc::new(driver);
        let executor = Executor::new(driver.clone(), engine.clone());
        (engine, driver, executor)
    }

    fn alpine(engine: &Engine) -> ContainerBuilder {
        engine.from_image("adapter", ImageRef::parse("alpine").unwrap())
    }

    #[tokio::test]
    async fn test_minimal_spec_calls_driver_in_order() {
        let (engine, driver, executor) = setup();
        let spec = alpine(&engine).with_exec(["uname"]).unwrap().spec().unwrap();
        assert_eq!(spec.len(), 2);

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.execs, 1);
        assert_eq!(output.stdout, "Linux\n");

        let calls: Vec<String> = driver
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("From") || c.starts_with("WithExec"))
            .collect();
        assert_eq!(calls, vec!["From(alpine:latest)", "WithExec([\"uname\"])"]);
    }

    #[tokio::test]
    async fn test_env_vars_reach_the_container() {
        let (engine, _driver, executor) = setup();
        let vars = parse_env_str("HOST=localhost,PORT=8080").unwrap();
        let spec = alpine(&engine)
            .with_env_vars(&vars)
            .unwrap()
            .with_exec(["printenv"])
            .unwrap()
            .spec()
            .unwrap();

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert!(output.stdout.contains("HOST=localhost\n"));
        assert!(output.stdout.contains("PORT=8080\n"));
    }

    #[tokio::test]
    async fn test_netrc_secret_is_visible_only_inside_the_container() {
        let (engine, driver, executor) = setup();
        let password = engine.define_secret("p", "ohboy").unwrap();
        let spec = alpine(&engine)
            .with_netrc("github.com", "u", &NetrcPassword::Secret(password))
            .unwrap()
            .with_exec(["cat", NETRC_PATH])
            .unwrap()
            .spec()
            .unwrap();

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert_eq!(output.stdout, "machine github.com\nlogin u\npassword ohboy\n");
        assert!(!spec.render().contains("ohboy"));
        assert!(driver.calls().iter().all(|c| !c.contains("ohboy")));
    }

    #[tokio::test]
    async fn test_secret_env_binding() {
        let (engine, driver, executor) = setup();
        let token = engine.define_secret("gh-token", "t0k3n").unwrap();
        let spec = alpine(&engine)
            .with_secret_variable("GITHUB_TOKEN", &token)
            .unwrap()
            .with_exec(["printenv", "GITHUB_TOKEN"])
            .unwrap()
            .spec()
            .unwrap();

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert_eq!(output.stdout, "t0k3n\n");
        let calls = driver.calls();
        assert!(calls.contains(&"SetSecret(gh-token)".to_string()));
        assert!(calls.contains(&"WithSecretVariable(GITHUB_TOKEN, secret:gh-token)".to_string()));
    }

    #[tokio::test]
    async fn test_output_sink_is_scrubbed() {
        let (engine, _driver, executor) = setup();
        let token = engine.define_secret("token", "hunter2").unwrap();
        let spec = alpine(&engine)
            .with_secret_variable("TOKEN", &token)
            .unwrap()
            .with_shell_exec("echo start && printenv TOKEN")
            .unwrap()
            .spec()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = executor
            .run(&spec, &RunOptions::new().with_output(tx))
            .await
            .unwrap();
        assert_eq!(output.stdout, "start\nhunter2\n");

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.op_index, 2);
        assert_eq!(chunk.stream, OutputStream::Stdout);
        assert!(!chunk.text.contains("hunter2"));
        assert!(chunk.text.contains("start"));
    }

    #[tokio::test]
    async fn test_failing_exec_reports_operation_index() {
        let (engine, _driver, executor) = setup();
        let spec = alpine(&engine)
            .with_exec(["echo", "ok"])
            .unwrap()
            .with_exec(["false"])
            .unwrap()
            .with_exec(["echo", "never"])
            .unwrap()
            .spec()
            .unwrap();

        let err = executor.run(&spec, &RunOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecFailed);
        assert!(matches!(
            err,
            EngineError::ExecFailed {
                op_index: 2,
                exit_code: 1,
                ..
            }
        ));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(executor.state_of(&spec), SpecState::Executed);
    }

    #[tokio::test]
    async fn test_exec_failure_keeps_scrubbed_tail() {
        let (engine, driver, executor) = setup();
        engine.define_secret("pw", "letmein").unwrap();
        driver.respond("deploy", ExecResponse::fail(3, "auth failed for letmein\n"));
        let spec = alpine(&engine).with_exec(["deploy"]).unwrap().spec().unwrap();

        match executor.run(&spec, &RunOptions::new()).await.unwrap_err() {
            EngineError::ExecFailed {
                exit_code,
                output_tail,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert!(output_tail.contains("auth failed"));
                assert!(!output_tail.contains("letmein"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_secret_fails_at_run() {
        let (_engine, _driver, executor) = setup();
        let other = Engine::new();
        other.define_secret("p", "x").unwrap();
        let spec = alpine(&other)
            .with_new_file("/etc/p", vec![FileChunk::secret("p")], None)
            .unwrap()
            .spec()
            .unwrap();

        let err = executor.run(&spec, &RunOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSecret);
        assert_eq!(err.module(), "adapter");
    }

    #[tokio::test]
    async fn test_driver_unavailable() {
        let (engine, driver, executor) = setup();
        driver.set_available(false);
        let spec = alpine(&engine).with_exec(["uname"]).unwrap().spec().unwrap();

        let err = executor.run(&spec, &RunOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DriverUnavailable);
        assert_eq!(err.exit_code(), 2);
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_interrupts_the_run() {
        let (engine, _driver, executor) =
            setup_with(SimulatedDriver::new().with_latency(Duration::from_millis(200)));
        let spec = alpine(&engine)
            .with_exec(["true"])
            .unwrap()
            .with_exec(["true"])
            .unwrap()
            .spec()
            .unwrap();

        let err = executor
            .run(&spec, &RunOptions::new().with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.exit_code(), 130);
        assert_eq!(executor.state_of(&spec), SpecState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_stops_the_run() {
        let (engine, driver, executor) =
            setup_with(SimulatedDriver::new().with_latency(Duration::from_millis(100)));
        let spec = alpine(&engine)
            .with_exec(["echo", "one"])
            .unwrap()
            .with_exec(["echo", "two"])
            .unwrap()
            .spec()
            .unwrap();

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = executor
            .run(&spec, &RunOptions::new().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(executor.state_of(&spec), SpecState::Canceled);
        let execs = driver.calls().iter().filter(|c| c.starts_with("WithExec")).count();
        assert!(execs < 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_runs_nothing() {
        let (engine, driver, executor) = setup();
        let spec = alpine(&engine).with_exec(["uname"]).unwrap().spec().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = executor
            .run(&spec, &RunOptions::new().with_cancel(cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_state_of_unexecuted_spec() {
        let (engine, _driver, executor) = setup();
        let spec = alpine(&engine).with_exec(["uname"]).unwrap().spec().unwrap();
        assert_eq!(executor.state_of(&spec), SpecState::Configured);
        executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert_eq!(executor.state_of(&spec), SpecState::Executed);
    }

    #[tokio::test]
    async fn test_shared_volume_used_by_concurrent_runs() {
        let (engine, driver, executor) =
            setup_with(SimulatedDriver::new().with_latency(Duration::from_millis(20)));
        let specs: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|name| {
                engine
                    .from_image(name, ImageRef::parse("alpine").unwrap())
                    .with_mounted_cache("/cache", "deps", Some(SharingMode::Shared), None)
                    .unwrap()
                    .with_exec(["echo", name])
                    .unwrap()
                    .spec()
                    .unwrap()
            })
            .collect();

        let runner = ParallelRunner::new(Arc::new(executor), 2);
        let results = runner.run_all(specs, &RunOptions::new()).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(engine.volumes().len(), 1);
        let mounts = driver
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("WithMountedCache(/cache, deps, shared)"))
            .count();
        assert_eq!(mounts, 2);
    }

    #[tokio::test]
    async fn test_locked_volume_serialises_execs() {
        let (engine, _driver, executor) =
            setup_with(SimulatedDriver::new().with_latency(Duration::from_millis(60)));
        let executor = Arc::new(executor);
        let spec = alpine(&engine)
            .with_mounted_cache("/cache", "locked", Some(SharingMode::Locked), None)
            .unwrap()
            .with_exec(["true"])
            .unwrap()
            .spec()
            .unwrap();

        let start = Instant::now();
        let first = {
            let executor = executor.clone();
            let spec = spec.clone();
            tokio::spawn(async move { executor.run(&spec, &RunOptions::new()).await })
        };
        let second = executor.run(&spec, &RunOptions::new()).await;
        assert!(first.await.unwrap().is_ok());
        assert!(second.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_private_volume_excludes_concurrent_specs() {
        let (engine, _driver, executor) =
            setup_with(SimulatedDriver::new().with_latency(Duration::from_millis(50)));
        let specs: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|name| {
                engine
                    .from_image(name, ImageRef::parse("alpine").unwrap())
                    .with_mounted_cache("/cache", "private-deps", Some(SharingMode::Private), None)
                    .unwrap()
                    .with_exec(["echo", name])
                    .unwrap()
                    .with_exec(["true"])
                    .unwrap()
                    .spec()
                    .unwrap()
            })
            .collect();

        let runner = ParallelRunner::new(Arc::new(executor), 2);
        let start = Instant::now();
        let results = runner.run_all(specs, &RunOptions::new()).await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(engine.volumes().len(), 1);
        // Two execs per spec; the second spec waits for the whole first run
        assert!(elapsed >= Duration::from_millis(200), "ran in {elapsed:?}");
    }

    #[tokio::test]
    async fn test_shell_exec_bypasses_entrypoint_and_sees_last_env() {
        let (engine, _driver, executor) = setup();
        let spec = alpine(&engine)
            .with_entrypoint(["false"])
            .unwrap()
            .with_env_variable("K", "v1", false)
            .unwrap()
            .with_env_variable("K", "v2", false)
            .unwrap()
            .with_shell_exec("printenv K")
            .unwrap()
            .spec()
            .unwrap();

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "v2\n");
    }

    #[tokio::test]
    async fn test_chown_as_root_switches_user_and_back() {
        let (engine, driver, executor) = setup();
        let spec = alpine(&engine)
            .with_user("app")
            .unwrap()
            .with_chown("app", Some("app"), &["/data"], true)
            .unwrap()
            .with_exec(["whoami"])
            .unwrap()
            .spec()
            .unwrap();

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        assert_eq!(output.stdout, "app\n");
        let users: Vec<String> = driver
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("WithUser") || c.starts_with("WithExec([\"chown\""))
            .collect();
        assert_eq!(
            users,
            vec![
                "WithUser(app)",
                "WithUser(root)",
                "WithExec([\"chown\", \"-R\", \"app:app\", \"/data\"])",
                "WithUser(app)",
            ]
        );
    }

    #[tokio::test]
    async fn test_service_binding_starts_service_first() {
        let (engine, driver, executor) = setup();
        let service = alpine(&engine)
            .with_exposed_port(80, crate::spec::Protocol::Tcp)
            .unwrap()
            .with_exec(["httpd", "-f"])
            .unwrap()
            .spec()
            .unwrap();
        let spec = alpine(&engine)
            .with_service_binding("web", &service)
            .unwrap()
            .with_exec(["echo", "up"])
            .unwrap()
            .spec()
            .unwrap();

        executor.run(&spec, &RunOptions::new()).await.unwrap();
        let calls = driver.calls();
        let service_at = calls
            .iter()
            .position(|c| c.starts_with("AsService([\"httpd\", \"-f\"]"))
            .unwrap();
        let binding_at = calls
            .iter()
            .position(|c| c == "WithServiceBinding(web)")
            .unwrap();
        assert!(service_at < binding_at);
        // the trailing exec is the service command, not an exec
        assert!(!calls.iter().any(|c| c.starts_with("WithExec([\"httpd\"")));
    }

    #[tokio::test]
    async fn test_labels_and_ports_are_applied() {
        let (engine, driver, executor) = setup();
        let spec = alpine(&engine)
            .with_tag("team", "infra")
            .unwrap()
            .with_exposed_port(8080, crate::spec::Protocol::Udp)
            .unwrap()
            .with_exec(["true"])
            .unwrap()
            .spec()
            .unwrap();

        let output = executor.run(&spec, &RunOptions::new()).await.unwrap();
        let labels = driver.labels_of(output.container).unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(
            driver.ports_of(output.container).unwrap(),
            vec![(8080, crate::spec::Protocol::Udp)]
        );
    }

    #[tokio::test]
    async fn test_terminal_opens_shell_after_run() {
        let (engine, driver, executor) = setup();
        let spec = alpine(&engine).with_workdir("/src").unwrap().spec().unwrap();
        let code = executor
            .terminal(&spec, &["/bin/sh".to_string()], &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            driver.calls().last().map(String::as_str),
            Some("Terminal([\"/bin/sh\"])")
        );
    }
}
