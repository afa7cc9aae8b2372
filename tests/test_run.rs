//! Full runs over fake hosts

mod common;

use common::{FakeFactory, FakeTransfer, StageRecorder};
use hostwalk::{
    Cmd, EngineConfig, Host, HostwalkError, NodeSpec, Role, Run, RunConfig, RunSummary, ScriptRef, Script, Stage,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> EngineConfig {
    EngineConfig::builder()
        .worker_threads(8)
        .nanny_interval(None)
        .write_summary(false)
        .build()
        .unwrap()
}

async fn execute(run: &Arc<Run>) -> RunSummary {
    tokio::time::timeout(Duration::from_secs(10), run.run())
        .await
        .expect("run should finish")
        .expect("run should start")
}

fn script(name: &str, steps: Vec<Cmd>) -> Script {
    Script::new(name, steps.into_iter().map(NodeSpec::from).collect())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stages_run_in_order() {
    let factory = FakeFactory::new();
    let recorder = Arc::new(StageRecorder::default());
    let config = RunConfig::builder("stages")
        .script(script("prepare", vec![Cmd::set_state("HOST.PREPARED", "ready"), Cmd::sh("echo setup")]))
        .script(script("work", vec![Cmd::sh("echo ${{PREPARED}}")]))
        .script(script("tidy", vec![Cmd::sh("echo cleanup")]))
        .role(
            Role::new("server")
                .host(Host::new("alpha"))
                .setup("prepare")
                .run("work")
                .cleanup("tidy"),
        )
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .observer(recorder.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(!summary.aborted);
    assert_eq!(summary.stage, Stage::Done);
    assert_eq!(recorder.stages.lock().clone(), Stage::ALL[1..].to_vec());
    assert_eq!(
        factory.commands(),
        vec![
            "alpha: echo setup".to_string(),
            "alpha: echo ready".to_string(),
            "alpha: echo cleanup".to_string(),
        ]
    );
    for key in ["start", "setupStart", "setupStop", "runStart", "cleanupStop", "stop"] {
        assert!(summary.timestamps.contains_key(key), "missing timestamp {}", key);
    }
    // one primary shell plus one session for the run script
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_across_hosts() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("barrier")
        .script(script(
            "meet",
            vec![
                Cmd::sh("echo arrived"),
                Cmd::signal("READY"),
                Cmd::wait_for("READY"),
                Cmd::set_state("HOST.PASSED", "yes"),
            ],
        ))
        .role(
            Role::new("cluster")
                .host(Host::new("a"))
                .host(Host::new("b"))
                .host(Host::new("c"))
                .run("meet"),
        )
        .build();
    assert_eq!(config.signal_count("READY"), Some(3));

    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory)
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(!summary.aborted, "{:?}", summary.errors);
    assert_eq!(summary.coordinator.latches.get("READY"), Some(&0));
    for name in ["a", "b", "c"] {
        assert_eq!(run.host_state(&Host::new(name)).get("PASSED"), Some(json!("yes")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_routes_to_cleanup() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("abort")
        .script(script("explode", vec![Cmd::abort("boom", false), Cmd::sh("echo unreachable")]))
        .script(script("later", vec![Cmd::sleep("50ms"), Cmd::sh("echo too late")]))
        .script(script("tidy", vec![Cmd::sh("echo cleaned")]))
        .role(
            Role::new("server")
                .host(Host::new("alpha"))
                .run("explode")
                .run("later")
                .cleanup("tidy"),
        )
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(summary.aborted);
    assert_eq!(summary.abort_reason.as_deref(), Some("boom"));
    assert_eq!(summary.stage, Stage::Done);
    assert!(factory.saw("alpha: echo cleaned"));
    assert!(!factory.saw("alpha: echo unreachable"));
    assert!(!factory.saw("alpha: echo too late"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_is_idempotent() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("twice")
        .script(script("first", vec![Cmd::abort("first", false)]))
        .script(script("second", vec![Cmd::abort("second", false)]))
        .script(script("tidy", vec![Cmd::sh("echo cleaned")]))
        .role(
            Role::new("server")
                .host(Host::new("alpha"))
                .run("first")
                .cleanup("second")
                .cleanup("tidy"),
        )
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    // the cleanup abort stops its own walk only
    assert!(!factory.saw("alpha: echo cleaned"));
    assert_eq!(summary.abort_reason.as_deref(), Some("first"));
    assert_eq!(summary.errors, vec!["first".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_failure_skips_cleanup() {
    let factory = FakeFactory::refusing("beta");
    let recorder = Arc::new(StageRecorder::default());
    let config = RunConfig::builder("refused")
        .script(script("work", vec![Cmd::sh("echo work")]))
        .script(script("tidy", vec![Cmd::sh("echo cleaned")]))
        .role(
            Role::new("server")
                .host(Host::new("alpha"))
                .host(Host::new("beta"))
                .run("work")
                .cleanup("tidy"),
        )
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .observer(recorder.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(summary.aborted);
    assert!(factory.commands().is_empty());
    assert_eq!(recorder.stages.lock().clone(), vec![Stage::PreSetup, Stage::Done]);
    assert!(summary.errors.iter().any(|e| e.contains("beta")));
}

#[tokio::test]
async fn test_invalid_config_never_connects() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("invalid")
        .script(script("gate", vec![Cmd::wait_for("NEVER")]))
        .role(Role::new("server").host(Host::new("alpha")).run("gate").run("missing"))
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();

    match run.run().await {
        Err(HostwalkError::InvalidConfig { errors }) => assert_eq!(errors.len(), 2),
        other => panic!("expected an invalid config error, got {:?}", other.map(|s| s.stage)),
    }
    assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    assert_eq!(run.stage(), Stage::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invoke_with_bindings() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("invoke")
        .script(script("greet", vec![Cmd::sh("echo hello ${{who}}")]))
        .script(script("caller", vec![Cmd::invoke("greet"), Cmd::sh("echo after")]))
        .role(
            Role::new("server")
                .host(Host::new("alpha"))
                .run(ScriptRef::new("caller").with("who", "world")),
        )
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(!summary.aborted, "{:?}", summary.errors);
    assert_eq!(
        factory.commands(),
        vec!["alpha: echo hello world".to_string(), "alpha: echo after".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_script_runs_in_its_own_context() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("async")
        .script(script("background", vec![Cmd::wait_for("MAIN_DONE"), Cmd::sh("echo background")]))
        .script(script(
            "main",
            vec![Cmd::script_cmd("background", true), Cmd::sh("echo main"), Cmd::signal("MAIN_DONE")],
        ))
        .role(Role::new("server").host(Host::new("alpha")).run("main"))
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(!summary.aborted, "{:?}", summary.errors);
    assert_eq!(
        factory.commands(),
        vec!["alpha: echo main".to_string(), "alpha: echo background".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_transfers_abort() {
    for step in [Cmd::upload("./missing.tar", "/opt"), Cmd::download("/missing.log", "./logs", None)] {
        let factory = FakeFactory::new();
        let transfer = Arc::new(FakeTransfer::default());
        let config = RunConfig::builder("transfer-failure")
            .script(script("move", vec![step, Cmd::sh("echo after")]))
            .script(script("tidy", vec![Cmd::sh("echo cleanup")]))
            .role(Role::new("server").host(Host::new("alpha")).run("move").cleanup("tidy"))
            .build();
        let run = Run::builder(config)
            .engine(engine())
            .shell_factory(factory.clone())
            .transfer(transfer.clone())
            .build()
            .unwrap();
        let summary = execute(&run).await;

        assert!(summary.aborted);
        let reason = summary.abort_reason.clone().unwrap_or_default();
        assert!(reason.starts_with("Transfer failed:"), "{}", reason);
        assert_eq!(transfer.done.lock().len(), 1);
        assert!(!factory.saw("alpha: echo after"));
        assert!(factory.saw("alpha: echo cleanup"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_transfers() {
    let factory = FakeFactory::new();
    let transfer = Arc::new(FakeTransfer::default());
    let config = RunConfig::builder("transfers")
        .script(script(
            "collect",
            vec![
                Cmd::queue_download("/var/log/app.log", "./logs"),
                Cmd::queue_delete("/tmp/scratch"),
            ],
        ))
        .role(Role::new("server").host(Host::new("alpha")).run("collect"))
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .transfer(transfer.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(!summary.aborted, "{:?}", summary.errors);
    assert_eq!(
        transfer.done.lock().clone(),
        vec!["download alpha:/var/log/app.log -> ./logs".to_string()]
    );
    assert!(factory.saw("alpha: rm -rf /tmp/scratch"));
    assert!(summary.pending_downloads.is_empty());
    assert!(summary.pending_deletes.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_done_ends_stage_for_everyone() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("done")
        .script(script("finisher", vec![Cmd::sleep("20ms"), Cmd::done()]))
        .script(script("slow", vec![Cmd::sleep("2s"), Cmd::sh("echo slow")]))
        .script(script("tidy", vec![Cmd::sh("echo cleaned")]))
        .role(
            Role::new("server")
                .host(Host::new("alpha"))
                .run("finisher")
                .run("slow")
                .cleanup("tidy"),
        )
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(!summary.aborted);
    assert!(factory.saw("alpha: echo cleaned"));
    assert!(!factory.saw("alpha: echo slow"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_skip_stage() {
    let factory = FakeFactory::new();
    let config = RunConfig::builder("skip")
        .script(script("prepare", vec![Cmd::sh("echo setup")]))
        .script(script("work", vec![Cmd::sh("echo work")]))
        .role(Role::new("server").host(Host::new("alpha")).setup("prepare").run("work"))
        .skip_stage(Stage::Setup)
        .build();
    let run = Run::builder(config)
        .engine(engine())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    execute(&run).await;

    assert_eq!(factory.commands(), vec!["alpha: echo work".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_summary_masks_secrets() {
    let dir = std::env::temp_dir().join(format!("hostwalk-{}", uuid::Uuid::new_v4()));
    let factory = FakeFactory::new();
    let config = RunConfig::builder("secrets")
        .script(script(
            "login",
            vec![Cmd::sh("echo ${{TOKEN}}"), Cmd::set_state("HOST.LAST", "${{TOKEN}}")],
        ))
        .role(Role::new("server").host(Host::new("alpha")).run("login"))
        .state("_TOKEN", "s3cret")
        .output_dir(&dir)
        .build();
    let run = Run::builder(config)
        .engine(EngineConfig::builder().nanny_interval(None).build().unwrap())
        .shell_factory(factory.clone())
        .build()
        .unwrap();
    let summary = execute(&run).await;

    assert!(factory.saw("alpha: echo s3cret"));
    assert_eq!(summary.state["TOKEN"], json!("****"));
    let written = std::fs::read_to_string(dir.join(hostwalk::run::SUMMARY_FILE)).unwrap();
    assert!(!written.contains("s3cret"));
    assert!(written.contains("\"aborted\": false"));
    let _ = std::fs::remove_dir_all(&dir);
}
