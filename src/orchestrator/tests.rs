use super::*;
use crate::services::announcer::{AnnounceError, MockAnnouncer};
use crate::services::mirror::FsMirror;
use crate::services::process::MockProcessSupervisor;
use crate::services::server::LaunchOptions;
use crate::services::updater::{DisabledUpdater, MockPackageUpdater};
use async_trait::async_trait;
use camino::Utf8Path;
use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Announcer that remembers what it was asked to say.
#[derive(Default)]
struct RecordingAnnouncer {
    messages: Mutex<Vec<String>>,
}

impl RecordingAnnouncer {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn said(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Announcer for RecordingAnnouncer {
    async fn announce(&self, text: &str) -> Result<(), AnnounceError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Process table with a single server that is alive between start and kill.
struct FakeProcessTable {
    alive: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
    launches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeProcessTable {
    fn new(initially_alive: bool) -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(initially_alive)),
            starts: Arc::new(AtomicUsize::new(0)),
            kills: Arc::new(AtomicUsize::new(0)),
            launches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn mock(&self) -> MockProcessSupervisor {
        let mut process = MockProcessSupervisor::new();

        let alive = self.alive.clone();
        process
            .expect_is_running()
            .returning(move |_| alive.load(Ordering::SeqCst));

        let alive = self.alive.clone();
        let starts = self.starts.clone();
        let launches = self.launches.clone();
        process.expect_start().returning(move |_, args| {
            alive.store(true, Ordering::SeqCst);
            starts.fetch_add(1, Ordering::SeqCst);
            launches.lock().unwrap().push(args.to_vec());
            Ok(1000)
        });

        let alive = self.alive.clone();
        let kills = self.kills.clone();
        process.expect_kill().returning(move |_| {
            kills.fetch_add(1, Ordering::SeqCst);
            usize::from(alive.swap(false, Ordering::SeqCst))
        });

        process
    }

    fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn last_launch(&self) -> Vec<String> {
        self.launches.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

struct Fixture {
    _dir: TempDir,
    settings: OrchestratorSettings,
    executable: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let server_dir = root.join("server");
        let workshop_dir = root.join("workshop");
        fs::create_dir_all(&server_dir).unwrap();
        fs::create_dir_all(&workshop_dir).unwrap();

        let executable = server_dir.join("DayZServer_x64.exe");
        fs::write(&executable, b"").unwrap();

        let mod_list = root.join("modlist.txt");
        fs::write(&mod_list, "1559212036,@CF\n111111111,@MyMod\n").unwrap();

        write_file(&workshop_dir.join("1559212036/addons/cf.pbo"), 64);
        write_file(&workshop_dir.join("111111111/addons/mymod.pbo"), 10);

        let settings = OrchestratorSettings {
            mod_list,
            workshop_dir,
            server_mod_dir: server_dir,
            check_mods_at_startup: false,
            existing_process: ExistingProcessPolicy::Restart,
            game_app_id: 221100,
            server_app_id: 223350,
            update_server: true,
            timings: LoopTimings {
                poll: Duration::ZERO,
                grace: Duration::ZERO,
                drain: Duration::ZERO,
                mod_check: Duration::from_secs(1800),
            },
        };

        Self {
            _dir: dir,
            settings,
            executable,
        }
    }

    fn orchestrator(
        &self,
        table: &FakeProcessTable,
        updater: Arc<dyn PackageUpdater>,
        announcer: Arc<dyn Announcer>,
    ) -> Orchestrator {
        let triggers = Triggers::new();
        let supervisor = ServerSupervisor::new(
            &self.executable,
            3600,
            LaunchOptions::default(),
            Arc::new(table.mock()),
            triggers.restart_flag(),
        )
        .unwrap();

        Orchestrator::new(
            supervisor,
            triggers,
            self.settings.clone(),
            Collaborators {
                mirror: Arc::new(FsMirror::new()),
                updater,
                announcer,
            },
            Arc::new(Metrics::new()),
        )
    }

    fn workshop_file(&self, rel: &str) -> Utf8PathBuf {
        self.settings.workshop_dir.join(rel)
    }

    fn server_file(&self, rel: &str) -> Utf8PathBuf {
        self.settings.server_mod_dir.join(rel)
    }
}

fn write_file(path: &Utf8Path, len: usize) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![b'z'; len]).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_startup_syncs_and_starts_server() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let announcer = Arc::new(RecordingAnnouncer::default());
    let mut orchestrator = fixture.orchestrator(&table, Arc::new(DisabledUpdater), announcer.clone());

    orchestrator.startup().await.unwrap();

    assert_eq!(orchestrator.state(), OrchestrationState::Running);
    assert_eq!(table.starts(), 1);
    assert_eq!(table.kills(), 0);
    assert_eq!(
        fs::metadata(fixture.server_file("@MyMod/addons/mymod.pbo")).unwrap().len(),
        10
    );
    assert!(table.last_launch().contains(&"-mod=@CF;@MyMod;".to_string()));
    assert!(orchestrator.supervisor().is_timer_armed());
    assert!(announcer.said("Server started! Next restart scheduled at"));
}

#[tokio::test(start_paused = true)]
async fn test_startup_takes_over_running_server() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(true);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );

    orchestrator.startup().await.unwrap();

    assert_eq!(table.kills(), 1);
    assert_eq!(table.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_aborts_when_configured() {
    let mut fixture = Fixture::new();
    fixture.settings.existing_process = ExistingProcessPolicy::Abort;
    let table = FakeProcessTable::new(true);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );

    assert!(orchestrator.startup().await.is_err());
    assert_eq!(table.kills(), 0);
    assert_eq!(table.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_startup_fails_without_mod_list() {
    let fixture = Fixture::new();
    fs::remove_file(&fixture.settings.mod_list).unwrap();
    let table = FakeProcessTable::new(false);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );

    assert!(orchestrator.startup().await.is_err());
    assert_eq!(table.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_iteration_does_nothing() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    let outcome = orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Idle);
    assert_eq!(table.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_crash_is_recovered() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let announcer = Arc::new(RecordingAnnouncer::default());
    let mut orchestrator = fixture.orchestrator(&table, Arc::new(DisabledUpdater), announcer.clone());
    orchestrator.startup().await.unwrap();

    table.crash();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(outcome, IterationOutcome::CrashRecovery);
    assert_eq!(table.starts(), 2);
    assert!(announcer.said("Server crashed, restarting."));
    assert_eq!(orchestrator.metrics().crashes_detected.load(Ordering::Relaxed), 1);
    assert_eq!(orchestrator.state(), OrchestrationState::Running);

    let outcome = orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_restart() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let announcer = Arc::new(RecordingAnnouncer::default());
    let mut orchestrator = fixture.orchestrator(&table, Arc::new(DisabledUpdater), announcer.clone());
    orchestrator.startup().await.unwrap();

    orchestrator.triggers().request_restart();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(outcome, IterationOutcome::Restart);
    assert_eq!(table.kills(), 1);
    assert_eq!(table.starts(), 2);
    assert!(announcer.said("Server Restart-Timer Elapsed, restarting now."));
    assert_eq!(
        orchestrator.supervisor().time_until_next_restart(),
        Some(Duration::from_secs(3600))
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_timer_drives_restart() {
    let mut fixture = Fixture::new();
    fixture.settings.timings.mod_check = Duration::from_secs(24 * 60 * 60);
    let table = FakeProcessTable::new(false);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3601)).await;

    let outcome = orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Restart);
}

#[tokio::test(start_paused = true)]
async fn test_mod_check_with_nothing_stale() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    orchestrator.triggers().request_mod_check();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(outcome, IterationOutcome::ModsUpToDate);
    assert_eq!(table.starts(), 1);
    assert_eq!(table.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mod_update_cycles_server_and_wins_over_restart() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let announcer = Arc::new(RecordingAnnouncer::default());
    let mut orchestrator = fixture.orchestrator(&table, Arc::new(DisabledUpdater), announcer.clone());
    orchestrator.startup().await.unwrap();
    let mut events = orchestrator.subscribe();

    write_file(&fixture.workshop_file("111111111/addons/mymod.pbo"), 25);
    orchestrator.triggers().request_mod_check();
    orchestrator.triggers().request_restart();

    let outcome = orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::ModUpdate { stale: 1, copied: 1 });
    assert_eq!(table.kills(), 1);
    assert_eq!(table.starts(), 2);
    assert_eq!(
        fs::metadata(fixture.server_file("@MyMod/addons/mymod.pbo")).unwrap().len(),
        25
    );
    assert!(announcer.said("1 Mod(s) need an update. Restarting in 0 Seconds!"));
    assert!(announcer.said("Stopping server now..."));

    // The mod update restart covers the pending scheduled restart
    let outcome = orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Idle);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&StateChange::Transition {
        from: OrchestrationState::Running,
        to: OrchestrationState::HandlingModUpdate,
    }));
    assert!(seen.contains(&StateChange::ModUpdateHandled { stale: 1, copied: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_mod_check_picks_up_new_registry_entries() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    write_file(&fixture.workshop_file("222222222/addons/trader.pbo"), 7);
    fs::write(
        &fixture.settings.mod_list,
        "1559212036,@CF\n111111111,@MyMod\n222222222,@Trader\n",
    )
    .unwrap();

    orchestrator.triggers().request_mod_check();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(outcome, IterationOutcome::ModUpdate { stale: 1, copied: 1 });
    assert!(fixture.server_file("@Trader/addons/trader.pbo").is_file());
    assert!(table.last_launch().contains(&"-mod=@CF;@MyMod;@Trader;".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_mod_check_downloads_mods_missing_from_workshop() {
    let mut fixture = Fixture::new();
    fixture.settings.update_server = false;
    let table = FakeProcessTable::new(false);

    let requested = Arc::new(Mutex::new(Vec::new()));
    let downloaded = fixture.workshop_file("333333333/addons/expansion.pbo");
    let mut updater = MockPackageUpdater::new();
    updater.expect_is_enabled().return_const(true);
    let seen = requested.clone();
    updater
        .expect_update_workshop_items()
        .returning(move |_, ids| {
            seen.lock().unwrap().push(ids.to_vec());
            if ids.contains(&333333333) {
                write_file(&downloaded, 40);
            }
            Ok(true)
        });

    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(updater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    fs::write(
        &fixture.settings.mod_list,
        "1559212036,@CF\n111111111,@MyMod\n333333333,@Expansion\n",
    )
    .unwrap();
    orchestrator.triggers().request_mod_check();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(
        requested.lock().unwrap().last().cloned().unwrap(),
        vec![1559212036, 111111111, 333333333]
    );
    assert_eq!(outcome, IterationOutcome::ModUpdate { stale: 1, copied: 1 });
    assert!(fixture.server_file("@Expansion/addons/expansion.pbo").is_file());
    assert!(table.last_launch().contains(&"-mod=@CF;@MyMod;@Expansion;".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_startup_downloads_into_empty_workshop() {
    let mut fixture = Fixture::new();
    fixture.settings.check_mods_at_startup = true;
    fixture.settings.update_server = false;
    fs::remove_dir_all(&fixture.settings.workshop_dir).unwrap();
    fs::create_dir_all(&fixture.settings.workshop_dir).unwrap();
    let table = FakeProcessTable::new(false);

    let workshop = fixture.settings.workshop_dir.clone();
    let mut updater = MockPackageUpdater::new();
    updater.expect_is_enabled().return_const(true);
    updater
        .expect_update_workshop_items()
        .withf(|_, ids| ids.to_vec() == vec![1559212036, 111111111])
        .times(1)
        .returning(move |_, _| {
            write_file(&workshop.join("1559212036/addons/cf.pbo"), 64);
            write_file(&workshop.join("111111111/addons/mymod.pbo"), 10);
            Ok(true)
        });

    let announcer = Arc::new(RecordingAnnouncer::default());
    let mut orchestrator = fixture.orchestrator(&table, Arc::new(updater), announcer.clone());
    orchestrator.startup().await.unwrap();

    assert_eq!(orchestrator.engine().pairings().len(), 2);
    assert!(fixture.server_file("@CF/addons/cf.pbo").is_file());
    assert!(announcer.said("2 Mod(s) updated at startup."));
    assert!(table.last_launch().contains(&"-mod=@CF;@MyMod;".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_mod_check_keeps_pairings_when_reload_fails() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);
    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(DisabledUpdater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    fs::remove_file(&fixture.settings.mod_list).unwrap();
    orchestrator.triggers().request_mod_check();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(outcome, IterationOutcome::ModsUpToDate);
    assert_eq!(orchestrator.engine().pairings().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_updater_runs_during_restart_and_failures_are_tolerated() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);

    let mut updater = MockPackageUpdater::new();
    updater.expect_is_enabled().return_const(true);
    updater
        .expect_update_app()
        .withf(|app_id| *app_id == 223350)
        .times(2)
        .returning(|_| Ok(false));

    let mut orchestrator = fixture.orchestrator(
        &table,
        Arc::new(updater),
        Arc::new(RecordingAnnouncer::default()),
    );
    orchestrator.startup().await.unwrap();

    orchestrator.triggers().request_restart();
    let outcome = orchestrator.run_iteration().await.unwrap();

    assert_eq!(outcome, IterationOutcome::Restart);
    assert_eq!(orchestrator.metrics().update_failures.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_startup_mod_check_downloads_updates() {
    let mut fixture = Fixture::new();
    fixture.settings.check_mods_at_startup = true;
    fixture.settings.update_server = false;
    let table = FakeProcessTable::new(false);

    let touched = fixture.workshop_file("1559212036/addons/cf.pbo");
    let mut updater = MockPackageUpdater::new();
    updater.expect_is_enabled().return_const(true);
    updater
        .expect_update_workshop_items()
        .times(1)
        .returning(move |_, _| {
            fs::write(&touched, vec![b'n'; 99]).unwrap();
            Ok(true)
        });

    let announcer = Arc::new(RecordingAnnouncer::default());
    let mut orchestrator = fixture.orchestrator(&table, Arc::new(updater), announcer.clone());
    orchestrator.startup().await.unwrap();

    assert_eq!(
        fs::metadata(fixture.server_file("@CF/addons/cf.pbo")).unwrap().len(),
        99
    );
    assert!(announcer.said("1 Mod(s) updated at startup."));
    assert_eq!(table.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_announce_failures_are_swallowed() {
    let fixture = Fixture::new();
    let table = FakeProcessTable::new(false);

    let mut announcer = MockAnnouncer::new();
    announcer
        .expect_announce()
        .returning(|_| Err(AnnounceError::Rejected(500)));

    let mut orchestrator = fixture.orchestrator(&table, Arc::new(DisabledUpdater), Arc::new(announcer));
    orchestrator.startup().await.unwrap();

    table.crash();
    let outcome = orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::CrashRecovery);
    assert!(orchestrator.metrics().announce_failures.load(Ordering::Relaxed) >= 2);
}

#[test]
fn test_describe_duration() {
    assert_eq!(describe_duration(Duration::from_secs(300)), "5 Minutes");
    assert_eq!(describe_duration(Duration::from_secs(60)), "1 Minute");
    assert_eq!(describe_duration(Duration::from_secs(20)), "20 Seconds");
    assert_eq!(describe_duration(Duration::from_secs(90)), "90 Seconds");
}

#[test]
fn test_settings_from_config() {
    let mut config = WardenConfig::default();
    config.server.executable = Utf8PathBuf::from("/srv/dayz/DayZServer_x64.exe");
    config.schedule.grace_period_secs = 120;

    let settings = OrchestratorSettings::from_config(&config);
    assert_eq!(settings.server_mod_dir, Utf8PathBuf::from("/srv/dayz"));
    assert_eq!(settings.timings.grace, Duration::from_secs(120));
    assert_eq!(settings.timings.mod_check, Duration::from_secs(1800));
    assert!(settings.check_mods_at_startup);
}
