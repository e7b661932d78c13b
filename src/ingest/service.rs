//! Knowledge service: owns the coordinator and the directory watcher and
//! drives the single ingestion loop between `start` and `stop`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::coordinator::{IngestReport, IngestionCoordinator};
use crate::config::Config;
use crate::error::{ChemkgError, Result};
use crate::gateway::{CommandParserGateway, ParserGateway};
use crate::query::{QueryEngine, QueryOptions};
use crate::store::KnowledgeStore;
use crate::watch::{DirectoryWatcher, WatchSubscription};

pub struct KnowledgeService {
    coordinator: Arc<IngestionCoordinator>,
    watcher: DirectoryWatcher,
    query: QueryEngine,
    shutdown_tx: watch::Sender<bool>,
    loop_task: Option<JoinHandle<()>>,
    started: bool,
}

impl KnowledgeService {
    pub fn new(
        store: Arc<KnowledgeStore>,
        watcher: DirectoryWatcher,
        gateway: Arc<dyn ParserGateway>,
        source_tag: impl Into<String>,
        parse_timeout: Duration,
        query_options: QueryOptions,
    ) -> Result<Self> {
        let coordinator = Arc::new(
            IngestionCoordinator::open(Arc::clone(&store), gateway, watcher.dir(), source_tag)?
                .with_parse_timeout(parse_timeout),
        );
        let query = QueryEngine::new(store, query_options);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            coordinator,
            watcher,
            query,
            shutdown_tx,
            loop_task: None,
            started: false,
        })
    }

    /// Wire up the store, watcher and command gateway described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(KnowledgeStore::open(config.store_path())?);
        let watcher = DirectoryWatcher::from_config(config)?;
        let gateway: Arc<dyn ParserGateway> = Arc::new(CommandParserGateway::from_config(&config.parser)?);
        Self::new(
            store,
            watcher,
            gateway,
            config.parser.source_tag.clone(),
            config.parser.timeout(),
            QueryOptions::from(&config.query),
        )
    }

    pub fn coordinator(&self) -> &Arc<IngestionCoordinator> {
        &self.coordinator
    }

    pub fn watcher(&self) -> &DirectoryWatcher {
        &self.watcher
    }

    /// Read-only query handle over the same store.
    pub fn query_engine(&self) -> QueryEngine {
        self.query.clone()
    }

    /// Process the backlog, then follow live changes in a background task.
    ///
    /// If the live subscription cannot be set up the service keeps running in
    /// backlog-only mode; call [`rescan`](Self::rescan) to pick up new files.
    pub async fn start(&mut self) -> Result<IngestReport> {
        if self.started {
            return Err(ChemkgError::InvalidInput("service already started".to_string()));
        }
        self.started = true;

        let report = self.rescan().await?;

        match self.watcher.subscribe() {
            Ok(subscription) => {
                let coordinator = Arc::clone(&self.coordinator);
                let shutdown_rx = self.shutdown_tx.subscribe();
                self.loop_task = Some(tokio::spawn(run_loop(coordinator, subscription, shutdown_rx)));
            }
            Err(e) => {
                log::error!(
                    "Cannot watch {} ({}); continuing with backlog scans only",
                    self.watcher.dir().display(),
                    e
                );
            }
        }

        Ok(report)
    }

    /// Scan the directory once and process every matching file not yet committed.
    pub async fn rescan(&self) -> Result<IngestReport> {
        let files = self.watcher.backlog_scan()?;
        Ok(self.coordinator.process_backlog(&files).await)
    }

    pub fn is_live(&self) -> bool {
        self.loop_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop watching and wait for the loop to exit. A parse still running is
    /// abandoned and its result discarded.
    pub async fn stop(&mut self) {
        self.coordinator.request_shutdown();
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.loop_task.take() {
            if let Err(e) = task.await {
                log::error!("ingestion loop ended abnormally: {}", e);
            }
        }
        log::info!("Knowledge service stopped");
    }
}

async fn run_loop(
    coordinator: Arc<IngestionCoordinator>,
    mut subscription: WatchSubscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            next = subscription.next() => {
                let Some(file) = next else {
                    log::warn!("watch stream ended; live ingestion stopped");
                    break;
                };
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        log::info!("ingest: abandoning {} (shutting down)", file.name);
                        break;
                    }
                    outcome = coordinator.handle_candidate(&file) => {
                        log::debug!("ingest: {} -> {:?}", file.name, outcome);
                    }
                }
            }
        }
    }
    subscription.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ParseMetadata, ParseOutcome};
    use async_trait::async_trait;
    use std::path::Path;
    use crate::ingest::coordinator::DEFAULT_PARSE_TIMEOUT;
    use tempfile::TempDir;

    /// Produces a fixed molecule payload from the file content.
    struct EchoGateway;

    #[async_trait]
    impl ParserGateway for EchoGateway {
        async fn parse(&self, file_path: &Path, metadata: &ParseMetadata) -> ParseOutcome {
            match std::fs::read_to_string(file_path) {
                Ok(text) if text.contains("Normal termination") => ParseOutcome::Success(format!(
                    "ex:{0} a ontocompchem:QuantumCalculation ;\n    ontocompchem:hasSCFEnergy -1.25 .\n",
                    metadata.filename.replace('.', "_")
                )),
                Ok(_) => ParseOutcome::rejected("no normal termination"),
                Err(e) => ParseOutcome::rejected(e.to_string()),
            }
        }
    }

    fn service(temp_dir: &TempDir) -> KnowledgeService {
        let store = Arc::new(KnowledgeStore::open(temp_dir.path().join("facts.ttl")).unwrap());
        let watcher = DirectoryWatcher::new(temp_dir.path().join("in"), vec!["log".into()], 50, 16).unwrap();
        KnowledgeService::new(
            store,
            watcher,
            Arc::new(EchoGateway),
            "test",
            DEFAULT_PARSE_TIMEOUT,
            QueryOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_processes_backlog_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let incoming = temp_dir.path().join("in");
        std::fs::create_dir_all(&incoming).unwrap();
        std::fs::write(incoming.join("a.log"), "Normal termination").unwrap();
        std::fs::write(incoming.join("bad.log"), "crashed").unwrap();

        let mut svc = service(&temp_dir);
        let report = svc.start().await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.parse_failed, 1);
        assert!(svc.start().await.is_err());

        svc.stop().await;
        assert!(!svc.is_live());
        assert_eq!(svc.query_engine().aggregate_stats().unwrap().total_files, 1);
    }

    #[tokio::test]
    async fn test_rescan_retries_failed_file() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(&temp_dir);
        let incoming = svc.watcher().dir().to_path_buf();
        std::fs::write(incoming.join("bad.log"), "crashed").unwrap();

        let first = svc.rescan().await.unwrap();
        assert_eq!(first.parse_failed, 1);

        std::fs::write(incoming.join("bad.log"), "Normal termination").unwrap();
        let second = svc.rescan().await.unwrap();
        assert_eq!(second.committed, 1);

        let third = svc.rescan().await.unwrap();
        assert_eq!(third.skipped, 1);
    }

    #[tokio::test]
    async fn test_live_file_is_ingested() {
        let temp_dir = TempDir::new().unwrap();
        let mut svc = service(&temp_dir);
        svc.start().await.unwrap();

        // Write under a different name, then move into place in one step.
        let dir = svc.watcher().dir().to_path_buf();
        std::fs::write(dir.join("live.tmp"), "Normal termination").unwrap();
        std::fs::rename(dir.join("live.tmp"), dir.join("live.log")).unwrap();

        let coordinator = Arc::clone(svc.coordinator());
        let committed = tokio::time::timeout(Duration::from_secs(10), async move {
            while !coordinator.is_processed("live.log") {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        svc.stop().await;
        assert!(committed.is_ok(), "live.log was not ingested");
    }

    #[tokio::test]
    async fn test_restart_after_torn_write_reingests_file() {
        use crate::store::{escape_payload, render_block};
        use std::io::Write;

        let temp_dir = TempDir::new().unwrap();
        let incoming = temp_dir.path().join("in");
        std::fs::create_dir_all(&incoming).unwrap();
        for name in ["a.log", "b.log", "c.log"] {
            std::fs::write(incoming.join(name), "Normal termination").unwrap();
        }

        {
            let svc = service(&temp_dir);
            let files = svc.watcher().backlog_scan().unwrap();
            // Only a and b complete before the "crash".
            let report = svc.coordinator().process_backlog(&files[..2]).await;
            assert_eq!(report.committed, 2);
        }
        let store_path = temp_dir.path().join("facts.ttl");
        let torn = render_block("c.log", chrono::Utc::now(), &escape_payload("ex:c a ontocompchem:QuantumCalculation .")).unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(&store_path).unwrap();
        file.write_all(&torn.as_bytes()[..torn.len() / 2]).unwrap();
        drop(file);

        let svc = service(&temp_dir);
        assert_eq!(
            svc.coordinator().processed_filenames(),
            vec!["a.log".to_string(), "b.log".to_string()]
        );
        let report = svc.rescan().await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.skipped, 2);

        let records = svc.query_engine().list_files().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["a.log", "b.log", "c.log"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lactone_through_command_parser() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("parse.sh");
        // Emits facts for files that terminated normally, an error comment otherwise.
        std::fs::write(
            &script,
            r##"#!/bin/sh
if grep -q "Normal termination" "$1"; then
cat <<'TTL'
@prefix ontocompchem: <http://www.theworldavatar.com/ontology/ontocompchem/> .
@prefix ex: <https://example.org/gaussian#> .
ex:lactone a ontocompchem:QuantumCalculation ;
    ontocompchem:hasMolecularFormula "C4H6O2" .
ex:lactone ontocompchem:hasSCFEnergy -227.85626900 .
TTL
else
echo "# Error: Could not parse file"
fi
"##,
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let store = Arc::new(KnowledgeStore::open(temp_dir.path().join("kg/facts.ttl")).unwrap());
        let watcher = DirectoryWatcher::new(temp_dir.path().join("in"), vec!["log".into()], 50, 16).unwrap();
        let gateway = CommandParserGateway::new(
            script.to_str().unwrap(),
            vec![],
            Duration::from_secs(10),
        )
        .unwrap();
        let svc = KnowledgeService::new(
            store,
            watcher,
            Arc::new(gateway),
            "test",
            DEFAULT_PARSE_TIMEOUT,
            QueryOptions::default(),
        )
        .unwrap();

        let incoming = svc.watcher().dir().to_path_buf();
        std::fs::write(incoming.join("lactone.log"), " Normal termination of Gaussian 16").unwrap();
        std::fs::write(incoming.join("bad.log"), "Error termination").unwrap();

        let report = svc.rescan().await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.parse_failed, 1);

        let engine = svc.query_engine();
        let stats = engine.aggregate_stats().unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.molecule_count, 1);
        assert_eq!(stats.energy_count, 1);
        let energies = engine.energies_by_file().unwrap();
        assert_eq!(energies["lactone.log"].len(), 1);
        assert!((energies["lactone.log"][0].hartree - -227.856269).abs() < 1e-9);

        // Running again changes nothing.
        let before = std::fs::read_to_string(temp_dir.path().join("kg/facts.ttl")).unwrap();
        let again = svc.rescan().await.unwrap();
        assert_eq!(again.committed, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(again.parse_failed, 1);
        let after = std::fs::read_to_string(temp_dir.path().join("kg/facts.ttl")).unwrap();
        assert_eq!(before, after);
    }
}
