//! Supervision ticks end to end against a scripted process world

mod common;

use combinator_core::{MemorySink, SupervisorEvent, TerminationOutcome};
use combinator_supervisor::{
    ActionKind, ActionReport, Dispatched, StartReport, Supervisor, TeardownReport,
};
use common::{config, context, names, Behavior, World};
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const GAME: &str = r#"{
    "Processes": [{
        "ProcessName": "game",
        "GracePeriod": "00:00:05",
        "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper", "Arguments": ["--quiet"]},
            {"ProgramPath": "/opt/tools/overlay", "KeepRunning": true}
        ]
    }]
}"#;

fn supervisor(json: &str) -> (Supervisor, World, MemorySink) {
    let world = World::new();
    let sink = MemorySink::new();
    let supervisor = Supervisor::new(config(json), context(&world, &sink));
    (supervisor, world, sink)
}

fn at(base: Instant, secs: u64) -> Instant {
    base + Duration::from_secs(secs)
}

async fn collect_reports(dispatched: Vec<Dispatched>) -> Vec<ActionReport> {
    join_all(dispatched.into_iter().map(|d| d.handle))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_parent_lifecycle_starts_and_stops_companions() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    let base = Instant::now();

    assert!(supervisor.tick(at(base, 0)).is_empty());
    assert!(sink.is_empty());

    world.start("game");
    let dispatched = supervisor.tick(at(base, 1));
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched.iter().all(|d| d.kind == ActionKind::Start));
    let reports = collect_reports(dispatched).await;
    assert!(reports
        .iter()
        .all(|r| matches!(r, ActionReport::Started(StartReport::Launched { .. }))));

    let spawned = world.spawned();
    assert_eq!(spawned.len(), 2);
    assert_eq!(spawned[0].args, vec!["--quiet"]);
    assert_eq!(world.running("helper"), 1);
    assert_eq!(world.running("overlay"), 1);

    // Still running: nothing new
    assert!(supervisor.tick(at(base, 2)).is_empty());

    world.stop("game");
    assert!(supervisor.tick(at(base, 3)).is_empty(), "within grace");
    let dispatched = supervisor.tick(at(base, 8));
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].companion, "helper");
    let reports = collect_reports(dispatched).await;
    assert!(matches!(
        reports[0],
        ActionReport::TornDown(TeardownReport {
            outcome: Some(TerminationOutcome::ClosedGracefully),
            fallback: false,
            ..
        })
    ));

    assert_eq!(world.running("helper"), 0);
    assert_eq!(world.running("overlay"), 1, "keep-running companion survives");
    assert_eq!(
        names(&sink),
        vec![
            "parentStarted",
            "companionLaunching",
            "companionLaunching",
            "parentStopped",
            "companionClosing",
            "companionClosed",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_parent_returning_within_grace_keeps_companions() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    let base = Instant::now();

    world.start("game");
    collect_reports(supervisor.tick(at(base, 0))).await;
    world.stop("game");
    assert!(supervisor.tick(at(base, 4)).is_empty());
    world.start("game");
    assert!(supervisor.tick(at(base, 5)).is_empty());
    world.stop("game");
    // Clock restarted at t=5
    assert!(supervisor.tick(at(base, 9)).is_empty());

    assert_eq!(sink.count("parentStarted"), 1);
    assert_eq!(sink.count("parentStopped"), 0);
    assert_eq!(world.running("helper"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_ticks_do_not_relaunch() {
    let (mut supervisor, world, _sink) = supervisor(GAME);
    let base = Instant::now();
    world.start("game");

    for second in 0..10 {
        collect_reports(supervisor.tick(at(base, second))).await;
    }

    assert_eq!(world.spawned().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_existing_companion_is_not_duplicated() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    world.start("helper");
    world.start("game");

    let dispatched = supervisor.tick(Instant::now());

    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].companion, "overlay");
    assert_eq!(sink.count("companionAlreadyRunning"), 1);
    collect_reports(dispatched).await;
    assert_eq!(world.running("helper"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_always_run_launches_alongside_existing() {
    let (mut supervisor, world, sink) = supervisor(
        r#"{"Processes": [{"ProcessName": "game", "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper", "AlwaysRun": true}
        ]}]}"#,
    );
    world.start("helper");
    world.start("game");

    collect_reports(supervisor.tick(Instant::now())).await;

    assert_eq!(world.running("helper"), 2);
    assert_eq!(sink.count("companionAlreadyRunning"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_entries_are_inert() {
    let (mut supervisor, world, sink) = supervisor(
        r#"{"Processes": [
            {"ProcessName": "game", "Enabled": false, "SubPrograms": [
                {"ProgramPath": "/opt/tools/helper"}
            ]},
            {"ProcessName": "editor", "SubPrograms": [
                {"ProgramPath": "/opt/tools/linter", "Enabled": false},
                {"ProgramPath": "/opt/tools/formatter"}
            ]}
        ]}"#,
    );
    world.start("game");
    world.start("editor");

    let dispatched = supervisor.tick(Instant::now());

    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].parent, "editor");
    assert_eq!(dispatched[0].companion, "formatter");
    assert!(sink.events().iter().all(|e| e.parent() != Some("game")));
    assert!(!supervisor.presence().is_present("game"));
}

#[tokio::test(start_paused = true)]
async fn test_delayed_launch_waits() {
    let (mut supervisor, world, sink) = supervisor(
        r#"{"Processes": [{"ProcessName": "game", "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper", "Delay": "00:00:03"}
        ]}]}"#,
    );
    world.start("game");

    let started = tokio::time::Instant::now();
    let reports = collect_reports(supervisor.tick(Instant::now())).await;

    assert!(matches!(
        reports[0],
        ActionReport::Started(StartReport::Launched { .. })
    ));
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(
        names(&sink),
        vec!["parentStarted", "companionDelayed", "companionLaunching"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_delayed_launch_aborts_when_parent_leaves() {
    let (mut supervisor, world, sink) = supervisor(
        r#"{"Processes": [{"ProcessName": "game", "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper", "Delay": 3}
        ]}]}"#,
    );
    world.start("game");

    let dispatched = supervisor.tick(Instant::now());
    world.stop("game");
    let reports = collect_reports(dispatched).await;

    assert_eq!(reports[0], ActionReport::Started(StartReport::ParentGone));
    assert!(world.spawned().is_empty());
    assert_eq!(sink.count("companionLaunchAborted"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_launch_skips_duplicate_started_meanwhile() {
    let (mut supervisor, world, sink) = supervisor(
        r#"{"Processes": [{"ProcessName": "game", "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper", "Delay": "2s"}
        ]}]}"#,
    );
    world.start("game");

    let dispatched = supervisor.tick(Instant::now());
    world.start("helper");
    let reports = collect_reports(dispatched).await;

    assert_eq!(reports[0], ActionReport::Started(StartReport::Duplicate));
    assert_eq!(sink.count("companionSkippedDuplicate"), 1);
    assert_eq!(world.running("helper"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_always_run_ignores_duplicate() {
    let (mut supervisor, world, _sink) = supervisor(
        r#"{"Processes": [{"ProcessName": "game", "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper", "Delay": "2s", "AlwaysRun": true}
        ]}]}"#,
    );
    world.start("game");

    let dispatched = supervisor.tick(Instant::now());
    world.start("helper");
    collect_reports(dispatched).await;

    assert_eq!(world.running("helper"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_grace_period_never_stops_companions() {
    let (mut supervisor, world, sink) = supervisor(
        r#"{"Processes": [{"ProcessName": "game", "GracePeriod": null, "SubPrograms": [
            {"ProgramPath": "/opt/tools/helper"}
        ]}]}"#,
    );
    let base = Instant::now();
    world.start("game");
    collect_reports(supervisor.tick(base)).await;
    world.stop("game");

    for hours in 1..5 {
        assert!(supervisor.tick(at(base, hours * 3600)).is_empty());
    }

    assert_eq!(sink.count("parentStopped"), 0);
    assert_eq!(world.running("helper"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_instance_is_torn_down() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    let base = Instant::now();
    let first = world.start("helper");
    let second = world.start("helper");
    world.start("game");
    collect_reports(supervisor.tick(base)).await;
    world.stop("game");

    let dispatched = supervisor.tick(at(base, 6));
    let mut pids: Vec<u32> = dispatched
        .iter()
        .filter_map(|d| match d.kind {
            ActionKind::Teardown { pid } => Some(pid),
            ActionKind::Start => None,
        })
        .collect();
    pids.sort_unstable();
    collect_reports(dispatched).await;

    assert_eq!(pids, vec![first, second]);
    assert_eq!(world.running("helper"), 0);
    assert_eq!(sink.count("companionClosed"), 2);
    assert!(world.released(first) && world.released(second));
}

#[tokio::test(start_paused = true)]
async fn test_unkillable_companion_falls_back_to_kill_by_name() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    let base = Instant::now();
    let pid = world.start_with("helper", Behavior::Unkillable, true);
    world.start("game");
    collect_reports(supervisor.tick(base)).await;
    world.stop("game");

    let reports = collect_reports(supervisor.tick(at(base, 6))).await;

    assert_eq!(
        reports,
        vec![ActionReport::TornDown(TeardownReport {
            pid,
            outcome: Some(TerminationOutcome::GaveUp),
            fallback: true,
        })]
    );
    assert_eq!(world.killed_by_name(), vec!["helper".to_string()]);
    assert!(!world.is_alive(pid));
    let fallback = sink.named("companionKillFallback");
    assert!(matches!(
        &fallback[0],
        SupervisorEvent::CompanionKillFallback { error: None, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_termination_error_falls_back_and_reports_failure() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    let base = Instant::now();
    let pid = world.start_with("helper", Behavior::FailsCloseRequest, true);
    world.start("game");
    collect_reports(supervisor.tick(base)).await;
    world.stop("game");
    world.fail_kill_by_name();

    let reports = collect_reports(supervisor.tick(at(base, 6))).await;

    assert_eq!(
        reports,
        vec![ActionReport::TornDown(TeardownReport {
            pid,
            outcome: None,
            fallback: true,
        })]
    );
    assert_eq!(sink.count("companionClosed"), 0);
    let fallback = sink.named("companionKillFallback");
    assert!(fallback[0].is_error());
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_does_not_stop_supervision() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    let base = Instant::now();
    world.fail_spawns();
    world.start("game");

    let reports = collect_reports(supervisor.tick(base)).await;

    assert!(reports
        .iter()
        .all(|r| *r == ActionReport::Started(StartReport::Failed)));
    assert_eq!(sink.count("launchFailed"), 2);
    assert!(supervisor.presence().is_present("game"));
    assert!(supervisor.tick(at(base, 1)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_ticks_until_cancelled() {
    let world = World::new();
    let sink = MemorySink::new();
    let supervisor = Supervisor::new(config(GAME), context(&world, &sink));
    world.start("game");

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(world.running("helper"), 1);

    world.stop("game");
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(world.running("helper"), 0);

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(sink.count("parentStarted"), 1);
    assert_eq!(sink.count("parentStopped"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tick_reads_process_table_once() {
    let (mut supervisor, world, sink) = supervisor(GAME);
    world.start("game");
    world.start("overlay");

    let reports = collect_reports(supervisor.tick(Instant::now())).await;

    assert_eq!(world.scans(), 1);
    assert_eq!(world.lookups(), 0);
    assert_eq!(reports.len(), 1);
    assert_eq!(sink.count("companionAlreadyRunning"), 1);
    assert_eq!(
        supervisor.watched_names(),
        vec!["game".to_string(), "helper".to_string(), "overlay".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_lookup_reports_tick_error_and_loop_continues() {
    let world = World::new();
    let sink = MemorySink::new();
    let supervisor = Supervisor::new(config(GAME), context(&world, &sink));
    world.start("game");
    world.fail_next_lookup();

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    shutdown.cancel();
    task.await.unwrap();

    let events = names(&sink);
    let failed = events.iter().position(|name| *name == "tickError");
    let started = events.iter().position(|name| *name == "parentStarted");
    assert_eq!(sink.count("tickError"), 1);
    assert!(failed.unwrap() < started.unwrap());
    assert!(sink.named("tickError")[0].is_error());
    assert_eq!(world.running("helper"), 1);
}
