// tests/common/mod.rs

//! Shared fakes and helpers for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use toolrig::component::DownloadSpec;
use toolrig::install::{InstallContext, InstallStrategy};
use toolrig::platform::{
    DownloadOutcome, Downloader, FileEnvironmentStore, PreparationReport, Preparer,
    RegistryStore, ServiceManager, TarArchiveExtractor, VerificationReport, Verifier,
};
use toolrig::transaction::AtomicOperation;
use toolrig::{
    AtomicTransaction, Collaborators, Component, ComponentCatalog, EngineConfig, Error,
    InstallMethod, InstallationOrchestrator, SilentProgress, StrategyRegistry,
};

pub struct PassPreparer;

impl Preparer for PassPreparer {
    fn prepare(&self, _components: &[&Component]) -> PreparationReport {
        PreparationReport {
            success: true,
            errors: Vec::new(),
        }
    }
}

/// Writes a small file named after the URL instead of fetching it
pub struct LocalDownloader;

impl Downloader for LocalDownloader {
    fn fetch(&self, spec: &DownloadSpec, dest_dir: &Path) -> DownloadOutcome {
        if std::fs::create_dir_all(dest_dir).is_err() {
            return DownloadOutcome::failed("cannot create download directory");
        }
        let path = dest_dir.join(spec.file_name());
        match std::fs::write(&path, spec.url.as_bytes()) {
            Ok(()) => DownloadOutcome::ok(path),
            Err(e) => DownloadOutcome::failed(e.to_string()),
        }
    }
}

/// Serves the same file body for every download
pub struct ScriptDownloader {
    pub body: String,
}

impl Downloader for ScriptDownloader {
    fn fetch(&self, spec: &DownloadSpec, dest_dir: &Path) -> DownloadOutcome {
        if std::fs::create_dir_all(dest_dir).is_err() {
            return DownloadOutcome::failed("cannot create download directory");
        }
        let path = dest_dir.join(spec.file_name());
        match std::fs::write(&path, &self.body) {
            Ok(()) => DownloadOutcome::ok(path),
            Err(e) => DownloadOutcome::failed(e.to_string()),
        }
    }
}

pub struct PassVerifier;

impl Verifier for PassVerifier {
    fn verify(&self, _component: &Component, install_path: &Path) -> VerificationReport {
        VerificationReport {
            success: true,
            installed_path: Some(install_path.to_path_buf()),
            version: None,
            details: BTreeMap::new(),
        }
    }
}

/// What the scripted strategy does for one component
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Fail every attempt with this message
    Fail(String),
    /// Fail the first `n` attempts, then succeed
    FailTimes(u32, String),
}

/// Install strategy driven by a per-component script of outcomes.
///
/// Successful installs write `payload.txt` into the install path through the
/// transaction. Every call is counted and its start order recorded.
#[derive(Default)]
pub struct ScriptedStrategy {
    behaviors: HashMap<String, Behavior>,
    delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn behave(mut self, name: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    /// Hold each install for `delay` so overlapping calls can be observed
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    /// Highest number of installs that ran at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl InstallStrategy for ScriptedStrategy {
    fn install(&self, ctx: &InstallContext<'_>, tx: &mut AtomicTransaction) -> toolrig::Result<()> {
        let name = ctx.component.name.clone();
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.order.lock().unwrap().push(name.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .get(&name)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Fail(message) => return Err(Error::CommandError(message)),
            Behavior::FailTimes(n, message) if attempt <= n => {
                return Err(Error::CommandError(message));
            }
            _ => {}
        }

        tx.apply(AtomicOperation::create_file(
            ctx.install_path.join("payload.txt"),
            format!("{} attempt {}", name, attempt),
        ))?;
        Ok(())
    }
}

/// Registry fake that logs every call in order
#[derive(Default)]
pub struct MemoryRegistry {
    pub values: Mutex<BTreeMap<(String, String), String>>,
    pub calls: Mutex<Vec<String>>,
}

impl RegistryStore for MemoryRegistry {
    fn get_value(&self, key: &str, name: &str) -> toolrig::Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(&(key.to_string(), name.to_string()))
            .cloned())
    }

    fn set_value(&self, key: &str, name: &str, value: &str) -> toolrig::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("set {}\\{}={}", key, name, value));
        self.values
            .lock()
            .unwrap()
            .insert((key.to_string(), name.to_string()), value.to_string());
        Ok(())
    }

    fn delete_value(&self, key: &str, name: &str) -> toolrig::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {}\\{}", key, name));
        self.values
            .lock()
            .unwrap()
            .remove(&(key.to_string(), name.to_string()));
        Ok(())
    }

    fn delete_key(&self, key: &str) -> toolrig::Result<()> {
        self.calls.lock().unwrap().push(format!("delete-key {}", key));
        self.values.lock().unwrap().retain(|(k, _), _| k != key);
        Ok(())
    }
}

/// Service manager fake; removing a service named in `broken` fails
#[derive(Default)]
pub struct RecordingServices {
    pub broken: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingServices {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ServiceManager for RecordingServices {
    fn stop(&self, service: &str) -> toolrig::Result<()> {
        self.calls.lock().unwrap().push(format!("stop {}", service));
        Ok(())
    }

    fn remove(&self, service: &str) -> toolrig::Result<()> {
        self.calls.lock().unwrap().push(format!("remove {}", service));
        if self.broken.iter().any(|s| s == service) {
            return Err(Error::CommandError(format!("{} is still running", service)));
        }
        Ok(())
    }
}

/// Config rooted in `temp_dir` with no retry backoff
pub fn test_config(temp_dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::with_base_path(temp_dir.path().join("state"));
    config.retry_backoff_base_secs = 0.0;
    config
}

/// Script component whose install is handled by the scripted strategy
pub fn component(name: &str, deps: &[&str]) -> Component {
    let mut component = Component::new(name, InstallMethod::Script).with_dependencies(deps);
    component.install_args = vec!["true".to_string()];
    component
}

pub fn collaborators(config: &EngineConfig) -> Collaborators {
    Collaborators {
        preparer: Arc::new(PassPreparer),
        downloader: Arc::new(LocalDownloader),
        verifier: Arc::new(PassVerifier),
        env: Arc::new(FileEnvironmentStore::new(config.env_dir()).with_elevated(false)),
        extractor: Arc::new(TarArchiveExtractor::new()),
        registry: None,
        services: None,
    }
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub orchestrator: InstallationOrchestrator,
    pub strategy: Arc<ScriptedStrategy>,
}

/// Orchestrator over `components` with every script install routed to `strategy`
pub fn harness(components: Vec<Component>, strategy: ScriptedStrategy) -> Harness {
    harness_with(components, strategy, |_| {})
}

pub fn harness_with(
    components: Vec<Component>,
    strategy: ScriptedStrategy,
    tune: impl FnOnce(&mut Collaborators),
) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let mut collaborators = collaborators(&config);
    tune(&mut collaborators);

    let strategy = Arc::new(strategy);
    let mut strategies = StrategyRegistry::empty();
    strategies.register(InstallMethod::Script, strategy.clone());

    let orchestrator = InstallationOrchestrator::new(
        config,
        ComponentCatalog::from_components(components).unwrap(),
        collaborators,
    )
    .unwrap()
    .with_strategies(strategies)
    .with_progress(Arc::new(SilentProgress));

    Harness {
        temp_dir,
        orchestrator,
        strategy,
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}
