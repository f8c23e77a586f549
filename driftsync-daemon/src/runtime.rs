use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use driftsync_core::{paths, MetadataStore};
use driftsync_sync::{SyncOrchestrator, TickSummary};

use crate::error::{io_err, DaemonError};

const TICK_STATUS_FILE: &str = "last_tick.json";

/// Outcome of the most recent scheduler tick, written after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickStatus {
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: TickSummary,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking<S: MetadataStore>(
    orchestrator: Arc<SyncOrchestrator<S>>,
    home: &Path,
) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(orchestrator, home.to_path_buf()))
}

/// Run the scheduler until ctrl-c, or until a tick fails to list entries.
pub async fn run<S: MetadataStore>(
    orchestrator: Arc<SyncOrchestrator<S>>,
    home: PathBuf,
) -> Result<(), DaemonError> {
    let run_dir = paths::run_dir(&home);
    fs::create_dir_all(&run_dir).map_err(|e| io_err(&run_dir, e))?;

    let period = orchestrator.config().sync_interval();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = scheduler_task(orchestrator, home, period, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Runtime(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, signal_result) = tokio::join!(scheduler_handle, signal_handle);

    handle_join("scheduler", scheduler_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn scheduler_task<S: MetadataStore>(
    orchestrator: Arc<SyncOrchestrator<S>>,
    home: PathBuf,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    tracing::info!(period_secs = period.as_secs_f64(), "starting sync runner loop");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let orchestrator = orchestrator.clone();
                let tick = tokio::task::spawn_blocking(move || orchestrator.run_scheduled_syncs(Utc::now()))
                    .await
                    .map_err(|err| DaemonError::Runtime(format!("sync tick join error: {err}")))?;
                let summary = match tick {
                    Ok(summary) => summary,
                    Err(err) => {
                        tracing::error!(error = %err, "error running sync");
                        tracing::warn!("sync runner stopped");
                        return Err(err.into());
                    }
                };
                if summary.ran + summary.failed > 0 {
                    tracing::info!(ran = summary.ran, failed = summary.failed, skipped = summary.skipped, "sync tick complete");
                }
                let status = TickStatus { finished_at: Utc::now(), summary };
                if let Err(err) = write_tick_status(&home, &status) {
                    tracing::warn!(error = %err, "failed to write tick status");
                }
            }
        }
    }
    tracing::info!("sync runner stopped");
    Ok(())
}

pub fn tick_status_path(home: &Path) -> PathBuf {
    paths::run_dir(home).join(TICK_STATUS_FILE)
}

/// Last written tick status, or `None` before the first tick.
pub fn read_tick_status(home: &Path) -> Result<Option<TickStatus>, DaemonError> {
    let path = tick_status_path(home);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_tick_status(home: &Path, status: &TickStatus) -> Result<(), DaemonError> {
    let path = tick_status_path(home);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(status)?;
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Runtime(format!("{task} task join failure: {err}"))),
    }
}

/// `DRIFTSYNC_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("DRIFTSYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).with_target(false).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use driftsync_core::{
        ApplyResponse, FileStore, FileTransaction, ReloadResult, SyncEntry, SyncId,
        SyncJobStatus, SyncMetadata, SystemConfig, Transaction,
    };
    use driftsync_repo::{
        CloneRequest, CommitInfo, GitAuth, GitBackend, RemoteRef, RepoCache, RepoCacheFactory,
    };
    use driftsync_sync::{
        Applier, ApplyOutcome, ApplyRequest, CollaboratorError, ReloadRequest, Reloader,
    };
    use tempfile::TempDir;

    struct NoRemote;

    impl GitBackend for NoRemote {
        fn list_refs(&self, _url: &str, _auth: &GitAuth) -> Result<Vec<RemoteRef>, git2::Error> {
            Err(git2::Error::from_str("no remote in daemon tests"))
        }

        fn clone_checkout(&self, _req: &CloneRequest<'_>) -> Result<CommitInfo, git2::Error> {
            Err(git2::Error::from_str("no remote in daemon tests"))
        }
    }

    #[derive(Default)]
    struct CountingApplier {
        calls: Mutex<usize>,
    }

    impl Applier<FileTransaction> for CountingApplier {
        fn apply(
            &self,
            _tx: &mut FileTransaction,
            req: &ApplyRequest<'_>,
            _cache: &mut RepoCache,
        ) -> Result<ApplyOutcome, CollaboratorError> {
            *self.calls.lock().unwrap() += 1;
            Ok(ApplyOutcome {
                response: ApplyResponse {
                    dry_run: req.dry_run,
                    commit_id: "abc123".to_string(),
                    ..ApplyResponse::default()
                },
                updated_apps: Vec::new(),
            })
        }
    }

    struct NoReload;

    impl Reloader<FileTransaction> for NoReload {
        fn reload(
            &self,
            _tx: &mut FileTransaction,
            _req: &ReloadRequest<'_>,
            _cache: &mut RepoCache,
        ) -> Result<ReloadResult, CollaboratorError> {
            Err(CollaboratorError::Other("reload not expected".to_string()))
        }
    }

    struct Fixture {
        home: TempDir,
        store: Arc<FileStore>,
        applier: Arc<CountingApplier>,
        orchestrator: Arc<SyncOrchestrator<FileStore>>,
    }

    fn fixture(config: SystemConfig) -> Fixture {
        let home = TempDir::new().expect("home");
        let store = Arc::new(FileStore::open_at(home.path()).expect("store"));
        let config = Arc::new(config);
        let caches = RepoCacheFactory::new(
            config.clone(),
            paths::app_src_dir(home.path()),
            Arc::new(NoRemote),
        );
        let applier = Arc::new(CountingApplier::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            config,
            caches,
            applier.clone(),
            Arc::new(NoReload),
        ));
        fs::create_dir_all(paths::run_dir(home.path())).expect("run dir");
        Fixture {
            home,
            store,
            applier,
            orchestrator,
        }
    }

    fn seed_due_entry(store: &FileStore) -> SyncId {
        let now = Utc::now();
        let entry = SyncEntry {
            id: SyncId::from("cl_syn_due"),
            path: "github.com/acme/apps/prod.star".to_string(),
            is_scheduled: true,
            user_id: "admin".to_string(),
            metadata: SyncMetadata {
                schedule_frequency: 10,
                ..SyncMetadata::default()
            },
            status: SyncJobStatus::default(),
            created_at: now,
            updated_at: now,
        };
        let mut tx = store.begin_transaction().expect("begin");
        store.create_sync(&mut tx, &entry).expect("create");
        tx.commit().expect("commit");
        entry.id
    }

    async fn wait_for_tick_status(home: &Path) -> TickStatus {
        for _ in 0..200 {
            if let Some(status) = read_tick_status(home).expect("read status") {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no tick status written");
    }

    #[tokio::test]
    async fn scheduler_runs_due_entry_once_and_records_tick() {
        let f = fixture(SystemConfig::default());
        let id = seed_due_entry(&f.store);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let task = tokio::spawn(scheduler_task(
            f.orchestrator.clone(),
            f.home.path().to_path_buf(),
            Duration::from_millis(20),
            shutdown_rx,
        ));
        let status = wait_for_tick_status(f.home.path()).await;
        assert_eq!(status.summary.ran, 1);

        // Later ticks see the entry as not due.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).expect("send shutdown");
        task.await.expect("join").expect("scheduler result");

        assert_eq!(*f.applier.calls.lock().unwrap(), 1);
        let tx = f.store.begin_transaction().expect("begin");
        let entry = f.store.get_sync_entry(&tx, &id).expect("entry");
        assert_eq!(entry.status.commit_id, "abc123");
    }

    #[tokio::test]
    async fn listing_failure_stops_scheduler() {
        let f = fixture(SystemConfig::default());
        let syncs = paths::syncs_dir(f.store.root());
        fs::remove_dir_all(&syncs).expect("rm");
        fs::write(&syncs, b"not a directory").expect("write");
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler_task(
                f.orchestrator.clone(),
                f.home.path().to_path_buf(),
                Duration::from_millis(10),
                shutdown_rx,
            ),
        )
        .await
        .expect("scheduler stops on its own");
        assert!(matches!(result, Err(DaemonError::Sync(_))), "got: {result:?}");
        assert!(read_tick_status(f.home.path()).expect("read").is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn shutdown_stops_idle_scheduler() {
        let f = fixture(SystemConfig::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let task = tokio::spawn(scheduler_task(
            f.orchestrator.clone(),
            f.home.path().to_path_buf(),
            Duration::from_secs(3600),
            shutdown_rx,
        ));
        shutdown_tx.send(()).expect("send shutdown");
        task.await.expect("join").expect("scheduler result");
        assert_eq!(*f.applier.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn run_exits_with_error_when_scheduler_stops() {
        let f = fixture(SystemConfig {
            sync_interval_secs: 1,
            ..SystemConfig::default()
        });
        let syncs = paths::syncs_dir(f.store.root());
        fs::remove_dir_all(&syncs).expect("rm");
        fs::write(&syncs, b"not a directory").expect("write");

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run(f.orchestrator.clone(), f.home.path().to_path_buf()),
        )
        .await
        .expect("daemon exits on its own");
        assert!(matches!(result, Err(DaemonError::Sync(_))), "got: {result:?}");
    }

    #[test]
    fn tick_status_round_trips_as_flat_json() {
        let home = TempDir::new().expect("home");
        fs::create_dir_all(paths::run_dir(home.path())).expect("run dir");
        let status = TickStatus {
            finished_at: Utc::now(),
            summary: TickSummary {
                ran: 2,
                skipped: 1,
                failed: 0,
            },
        };
        write_tick_status(home.path(), &status).expect("write");

        let raw = fs::read_to_string(tick_status_path(home.path())).expect("read raw");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["ran"], 2);
        assert_eq!(read_tick_status(home.path()).expect("read"), Some(status));
    }
}
