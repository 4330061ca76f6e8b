//! The plugin manager.
//!
//! Owns every library handle and instance, decides load order and drives
//! each plugin through its lifecycle:
//!
//! ```text
//! Unloaded -> Loading -> Loaded -> Unloading -> Unloaded
//! ```
//!
//! A batch load runs in four phases:
//! 1. per path: open, read metadata, check the API version and the name,
//!    resolve entry points;
//! 2. order the batch by declared dependency; a cycle rejects all of it, even
//!    when a member also has a missing dependency;
//! 3. check declared dependencies against loaded plugins and the rest of the
//!    batch, propagating failures to dependents;
//! 4. in order: create, mark Loaded, run the `loaded` hook.
//!
//! No module code runs before phase 4, and a failure only takes out the
//! module that failed (and whatever depends on it).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use justplug_sdk::abi::PLUGIN_API_VERSION;
use justplug_sdk::{DispatchError, PluginMetadata, PluginRef, Reply, Request};
use parking_lot::{Mutex, RwLock};
use semver::{Version, VersionReq};

use crate::config::{self, ManagerConfig};
use crate::discovery::{discover, Discovery};
use crate::dispatch::{Dispatcher, Envelope, RequestContext, RequestHandler};
use crate::error::{PluginError, Result};
use crate::graph::DependencyGraph;
use crate::instance::{EntryPoints, PluginInstance, PluginState};
use crate::library::{LibraryHandle, ModuleLoader, NativeLoader};
use crate::metadata::read_metadata;
use crate::registry::{PluginSlot, Registry};
use crate::report::{LoadReport, UnloadEntry, UnloadReport};

/// State shared between the manager and the request contexts of its plugins.
pub(crate) struct ManagerShared {
    pub(crate) registry: RwLock<Registry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) app_dir: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    config: ManagerConfig,
    lifecycle: Mutex<()>,
    next_load_index: AtomicU64,
    locations: RwLock<Vec<PathBuf>>,
}

impl ManagerShared {
    fn next_load_index(&self) -> u64 {
        self.next_load_index.fetch_add(1, Ordering::SeqCst)
    }
}

/// A module that passed phase 1.
struct Candidate {
    slot: usize,
    library: LibraryHandle,
    metadata: PluginMetadata,
    entry: EntryPoints,
}

/// Host-side plugin manager.
pub struct PluginManager {
    shared: Arc<ManagerShared>,
}

impl PluginManager {
    /// Manager loading shared libraries from disk.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_loader(config, Arc::new(NativeLoader::new()))
    }

    /// Manager opening modules through `loader`.
    pub fn with_loader(config: ManagerConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                registry: RwLock::new(Registry::new()),
                dispatcher: Dispatcher::default(),
                app_dir: config::app_directory(),
                loader,
                config,
                lifecycle: Mutex::new(()),
                next_load_index: AtomicU64::new(1),
                locations: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load a batch of modules. Every path gets an entry in the report; a
    /// failing path never stops the others unless `continue_on_error` is off.
    pub fn load_all<I, P>(&self, paths: I) -> LoadReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        let _lifecycle = self.shared.lifecycle.lock();
        self.load_batch(&paths)
    }

    /// Discover modules under `root` and load them as one batch.
    pub fn load_directory(&self, root: impl AsRef<Path>, recursive: bool) -> LoadReport {
        let root = root.as_ref();
        let discovery = discover(root, recursive);
        tracing::info!(
            "Found {} plugin module(s) in {}",
            discovery.paths.len(),
            root.display()
        );

        let _lifecycle = self.shared.lifecycle.lock();
        let mut report = self.load_batch(&discovery.paths);
        if report.loaded_count() > 0 {
            self.remember_location(root);
        }
        report.discovery = Some(discovery);
        report
    }

    /// Load everything under the configured plugin directories as one batch,
    /// so dependencies may cross directories.
    pub fn load_configured(&self) -> LoadReport {
        let dirs = self.shared.config.plugin_dirs.clone();
        let recursive = self.shared.config.recursive;
        let scans: Vec<(PathBuf, Discovery)> = dirs
            .into_iter()
            .map(|dir| {
                let found = discover(&dir, recursive);
                (dir, found)
            })
            .collect();
        let paths: Vec<PathBuf> = scans
            .iter()
            .flat_map(|(_, found)| found.paths.iter().cloned())
            .collect();
        tracing::info!("Found {} plugin module(s) in configured directories", paths.len());

        let _lifecycle = self.shared.lifecycle.lock();
        let mut report = self.load_batch(&paths);
        for (dir, found) in &scans {
            let loaded_here = found
                .paths
                .iter()
                .any(|p| report.entry(p).map_or(false, |e| e.outcome.is_loaded()));
            if loaded_here {
                self.remember_location(dir);
            }
        }
        report.discovery = Some(
            scans
                .into_iter()
                .map(|(_, found)| found)
                .fold(
                    Discovery {
                        complete: true,
                        ..Default::default()
                    },
                    Discovery::merge,
                ),
        );
        report
    }

    fn remember_location(&self, dir: &Path) {
        let mut locations = self.shared.locations.write();
        if !locations.iter().any(|l| l == dir) {
            locations.push(dir.to_path_buf());
        }
    }

    fn load_batch(&self, paths: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::with_paths(paths);
        let stop_on_error = !self.shared.config.continue_on_error;

        let candidates = self.open_candidates(paths, &mut report, stop_on_error);
        if stop_on_error && report.failures().next().is_some() {
            // Remaining candidates stay Skipped; their handles close on drop.
            return report;
        }

        let ordered = match Self::order_candidates(candidates, &mut report) {
            Some(ordered) => ordered,
            None => return report,
        };

        let ordered = self.check_dependencies(ordered, &mut report);
        if stop_on_error && report.failures().next().is_some() {
            return report;
        }
        tracing::info!(
            "Load order: {}",
            ordered
                .iter()
                .map(|c| c.metadata.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.instantiate(ordered, &mut report, stop_on_error);
        tracing::info!(
            "Loaded {} of {} plugin module(s)",
            report.loaded_count(),
            paths.len()
        );
        report
    }

    /// Phase 1: open, read metadata, validate, resolve entry points.
    fn open_candidates(
        &self,
        paths: &[PathBuf],
        report: &mut LoadReport,
        stop_on_error: bool,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for (slot, path) in paths.iter().enumerate() {
            match self.open_candidate(slot, path, &candidates, report) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    report.fail(slot, e);
                    if stop_on_error {
                        break;
                    }
                }
            }
        }
        candidates
    }

    fn open_candidate(
        &self,
        slot: usize,
        path: &Path,
        batch: &[Candidate],
        report: &mut LoadReport,
    ) -> Result<Candidate> {
        // Any early return drops `library`, which closes it.
        let library = LibraryHandle::open(self.shared.loader.as_ref(), path)?;
        let metadata = read_metadata(&library)?;
        report.set_name(slot, &metadata.name);

        if metadata.api_version != PLUGIN_API_VERSION {
            return Err(PluginError::IncompatibleApi {
                name: metadata.name,
                expected: PLUGIN_API_VERSION,
                found: metadata.api_version,
            });
        }

        let existing = self
            .shared
            .registry
            .read()
            .get(&metadata.name)
            .map(|s| s.metadata().version.clone())
            .or_else(|| {
                batch
                    .iter()
                    .find(|c| c.metadata.name == metadata.name)
                    .map(|c| c.metadata.version.clone())
            });
        if let Some(existing) = existing {
            return Err(PluginError::DuplicateName {
                name: metadata.name,
                existing,
            });
        }

        let entry = EntryPoints::resolve(&library)?;
        tracing::debug!("Validated {} from {}", metadata, path.display());
        Ok(Candidate {
            slot,
            library,
            metadata,
            entry,
        })
    }

    /// Phase 3: drop candidates whose dependencies cannot be satisfied, until
    /// nothing changes. Keeps the order of the survivors.
    fn check_dependencies(&self, mut candidates: Vec<Candidate>, report: &mut LoadReport) -> Vec<Candidate> {
        let loaded: HashMap<String, Version> = self
            .shared
            .registry
            .read()
            .slots()
            .filter(|s| s.is_loaded())
            .map(|s| (s.name().to_string(), s.metadata().version.clone()))
            .collect();
        let mut failed: HashSet<String> = HashSet::new();

        loop {
            let in_batch: HashMap<&str, &Version> = candidates
                .iter()
                .map(|c| (c.metadata.name.as_str(), &c.metadata.version))
                .collect();

            let rejected: Vec<(usize, PluginError)> = candidates
                .iter()
                .enumerate()
                .filter_map(|(i, c)| {
                    unmet_dependency(&c.metadata, &loaded, &in_batch, &failed).map(|e| (i, e))
                })
                .collect();
            if rejected.is_empty() {
                return candidates;
            }

            for (i, error) in rejected.into_iter().rev() {
                let candidate = candidates.remove(i);
                failed.insert(candidate.metadata.name.clone());
                report.fail(candidate.slot, error);
            }
        }
    }

    /// Phase 2: dependency order. A cycle rejects every candidate.
    fn order_candidates(candidates: Vec<Candidate>, report: &mut LoadReport) -> Option<Vec<Candidate>> {
        let mut graph = DependencyGraph::new();
        for candidate in &candidates {
            graph.add_node(
                candidate.metadata.name.clone(),
                candidate.metadata.dependency_names(),
            );
        }

        match graph.topological_order() {
            Ok(order) => {
                let mut by_name: HashMap<String, Candidate> = candidates
                    .into_iter()
                    .map(|c| (c.metadata.name.clone(), c))
                    .collect();
                Some(order.iter().filter_map(|n| by_name.remove(n)).collect())
            }
            Err(cycle) => {
                tracing::error!("Dependency cycle: {}", cycle.join(" -> "));
                for candidate in candidates {
                    report.fail(candidate.slot, PluginError::DependencyCycle(cycle.clone()));
                }
                report.cycle = Some(cycle);
                None
            }
        }
    }

    /// Phase 4: create instances in order and run their `loaded` hooks.
    fn instantiate(&self, ordered: Vec<Candidate>, report: &mut LoadReport, stop_on_error: bool) {
        let mut failed: HashSet<String> = HashSet::new();
        let mut stopped = false;

        for candidate in ordered {
            if stopped {
                continue;
            }
            let name = candidate.metadata.name.clone();
            let slot = candidate.slot;

            if let Some(dep) = candidate.metadata.dependency_names().find(|d| failed.contains(*d)) {
                let error = PluginError::UnmetDependency {
                    name: name.clone(),
                    dependency: dep.to_string(),
                    reason: "dependency failed to load".to_string(),
                };
                report.fail(slot, error);
                failed.insert(name);
                stopped = stop_on_error;
                continue;
            }

            match self.instantiate_one(candidate) {
                Ok(load_index) => {
                    tracing::info!("Loaded plugin {} (#{})", name, load_index);
                    report.loaded(slot, &name, load_index);
                }
                Err(e) => {
                    report.fail(slot, e);
                    failed.insert(name);
                    stopped = stop_on_error;
                }
            }
        }
    }

    fn instantiate_one(&self, candidate: Candidate) -> Result<u64> {
        let Candidate {
            library,
            metadata,
            entry,
            ..
        } = candidate;
        let name = metadata.name.clone();
        let load_index = self.shared.next_load_index();

        let slot = Arc::new(PluginSlot::loading(metadata, library, load_index));
        self.shared.registry.write().insert(Arc::clone(&slot))?;

        let context = RequestContext::new(Arc::downgrade(&self.shared), name.clone());
        let host = context.host_api();
        let instance = match PluginInstance::create(&name, entry, context, host) {
            Ok(instance) => instance,
            Err(e) => {
                self.roll_back(&slot, "create failed");
                return Err(e);
            }
        };
        slot.install(instance);

        // Loaded before the hook runs, so the plugin counts itself and can be
        // reached by requests from inside its own hook.
        if let Err(e) = slot.transition(PluginState::Loaded, "created") {
            tracing::warn!("Rolling back {}: {}", name, e);
            self.roll_back(&slot, "not loadable");
            return Err(e);
        }
        self.shared.registry.write().mark_loaded(&name);

        let hook = slot
            .with_instance(|instance| instance.loaded())
            .unwrap_or_else(|| Err(PluginError::TargetUnavailable(name.clone())));
        if let Err(e) = hook {
            tracing::warn!("Rolling back {}: {}", name, e);
            self.roll_back(&slot, "loaded hook failed");
            return Err(e);
        }

        Ok(load_index)
    }

    /// Undo a load that did not finish: destroy the instance, drop the entry
    /// and close the library.
    fn roll_back(&self, slot: &PluginSlot, reason: &str) {
        if slot.state() == PluginState::Loaded {
            let _ = slot.transition(PluginState::Unloading, reason);
        }
        slot.destroy_instance();
        self.shared.registry.write().remove(slot.name());
        if let Err(e) = slot.close_library() {
            tracing::warn!("{}", e);
        }
        let _ = slot.transition(PluginState::Unloaded, "rolled back");
    }

    // ========================================================================
    // Unloading
    // ========================================================================

    /// Unload every plugin in reverse load order.
    pub fn unload_all(&self) -> UnloadReport {
        let _lifecycle = self.shared.lifecycle.lock();
        let order: Vec<String> = self.shared.registry.read().load_order().to_vec();
        let mut report = UnloadReport::default();

        for name in order.iter().rev() {
            let Some(slot) = self.shared.registry.read().get(name) else {
                continue;
            };
            let error = self.unload_slot(&slot).err();
            report.entries.push(UnloadEntry {
                name: name.clone(),
                error,
            });
        }

        self.shared.locations.write().clear();
        tracing::info!("Unloaded {} plugin(s)", report.entries.len());
        report
    }

    /// Unload one plugin. Refused while other loaded plugins depend on it.
    ///
    /// The plugin is unloaded even when its `about_to_be_unloaded` hook fails;
    /// the hook error is returned.
    pub fn unload(&self, name: &str) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock();
        let slot = {
            let registry = self.shared.registry.read();
            let slot = registry
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if !slot.is_loaded() {
                return Err(PluginError::TargetUnavailable(name.to_string()));
            }
            let dependents = registry.dependents_of(name);
            if !dependents.is_empty() {
                return Err(PluginError::HasDependents {
                    name: name.to_string(),
                    dependents,
                });
            }
            slot
        };
        self.unload_slot(&slot)
    }

    fn unload_slot(&self, slot: &PluginSlot) -> Result<()> {
        let name = slot.name().to_string();
        slot.transition(PluginState::Unloading, "unload requested")?;

        let hook = slot
            .with_instance(|instance| instance.about_to_be_unloaded())
            .unwrap_or(Ok(()));
        if let Err(e) = &hook {
            tracing::warn!("{}", e);
        }

        slot.destroy_instance();
        self.shared.registry.write().remove(&name);
        let closed = slot.close_library();
        slot.transition(PluginState::Unloaded, "closed")?;
        tracing::info!("Unloaded plugin {}", name);

        hook.and(closed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of Loaded plugins.
    pub fn count(&self) -> usize {
        self.shared.registry.read().loaded_count()
    }

    /// Handle to a Loaded plugin, pinned to its current load.
    pub fn find_by_name(&self, name: &str) -> Result<PluginRef> {
        let slot = self
            .shared
            .registry
            .read()
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if !slot.is_loaded() {
            return Err(PluginError::TargetUnavailable(name.to_string()));
        }
        Ok(PluginRef::new(name, slot.load_index()))
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.shared.registry.read().contains(name)
    }

    pub fn has_plugin_matching(&self, name: &str, requirement: &VersionReq) -> bool {
        self.shared
            .registry
            .read()
            .get(name)
            .map_or(false, |slot| requirement.matches(&slot.metadata().version))
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.shared
            .registry
            .read()
            .get(name)
            .map_or(false, |slot| slot.is_loaded())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.shared.registry.read().get(name).map(|slot| slot.state())
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginMetadata> {
        self.shared
            .registry
            .read()
            .get(name)
            .map(|slot| slot.metadata().clone())
    }

    /// Names of Loaded plugins in load order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.shared.registry.read().load_order().to_vec()
    }

    /// Directories from which at least one plugin was loaded.
    pub fn locations(&self) -> Vec<PathBuf> {
        self.shared.locations.read().clone()
    }

    pub fn app_directory(&self) -> &Path {
        &self.shared.app_dir
    }

    pub fn plugin_api(&self) -> u32 {
        PLUGIN_API_VERSION
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Send a request as the host. The answer is owned by the caller.
    pub fn dispatch(&self, envelope: Envelope<'_>) -> std::result::Result<Vec<u8>, DispatchError> {
        self.shared.dispatcher.dispatch(&self.shared, None, envelope)
    }

    /// Send a typed request as the host.
    pub fn request(&self, request: &Request) -> std::result::Result<Reply, DispatchError> {
        let input = request.encode_input();
        let envelope = Envelope {
            opcode: request.opcode(),
            target: request.target().cloned(),
            input: &input,
        };
        let output = self.dispatch(envelope)?;
        Reply::decode(request.opcode(), &output)
    }

    /// Answer host-directed requests with user opcode `opcode`.
    pub fn register_handler(
        &self,
        opcode: u16,
        handler: impl RequestHandler + 'static,
    ) -> std::result::Result<(), DispatchError> {
        self.shared.dispatcher.register(opcode, Arc::new(handler))
    }

    pub fn unregister_handler(&self, opcode: u16) -> bool {
        self.shared.dispatcher.unregister(opcode)
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(ManagerConfig::from_env())
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if !self.shared.registry.read().is_empty() {
            tracing::debug!("Plugin manager dropped with plugins loaded, unloading");
            self.unload_all();
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_names())
            .field("app_dir", &self.shared.app_dir)
            .finish()
    }
}

/// First dependency of `metadata` that neither loaded plugins nor the batch
/// can satisfy.
fn unmet_dependency(
    metadata: &PluginMetadata,
    loaded: &HashMap<String, Version>,
    in_batch: &HashMap<&str, &Version>,
    failed: &HashSet<String>,
) -> Option<PluginError> {
    metadata.dependencies.iter().find_map(|dep| {
        let reason = if failed.contains(&dep.name) {
            "dependency failed to load".to_string()
        } else {
            let version = loaded
                .get(&dep.name)
                .or_else(|| in_batch.get(dep.name.as_str()).copied());
            match version {
                None => "not found".to_string(),
                Some(v) if !dep.is_satisfied_by(v) => {
                    format!("version {} does not satisfy {}", v, dep.version)
                }
                Some(_) => return None,
            }
        };
        Some(PluginError::UnmetDependency {
            name: metadata.name.clone(),
            dependency: dep.name.clone(),
            reason,
        })
    })
}
