use relaunch_core::{
    BuildContext, CachePolicy, RelaunchConfig, RuntimeEnv, StorageBinding, StorageLocation,
};
use relaunch_runtime::{ContainerRuntime, Removal, RunSpec, RuntimeError, SourceControl, SyncError};
use std::path::{Path, PathBuf};

/// Everything a deploy needs, resolved from config before any side effect.
#[derive(Debug, Clone)]
pub(crate) struct DeployPlan {
    pub service_name: String,
    pub image_tag: String,
    pub restart: String,
    pub env_file: PathBuf,
    pub required_keys: Vec<String>,
    pub context: BuildContext,
    pub storage: StorageBinding,
    pub policy: CachePolicy,
    /// Operator accepted moving durable storage away from where the
    /// previous instance kept it.
    pub allow_storage_change: bool,
}

impl DeployPlan {
    pub fn new(config: &RelaunchConfig, project_dir: &Path, policy: CachePolicy) -> Self {
        Self {
            service_name: config.service.name.clone(),
            image_tag: config.image_tag(),
            restart: config.service.restart.clone(),
            env_file: config.env_file_path(project_dir),
            required_keys: config.env.required.clone(),
            context: BuildContext::new(&config.context_dir(project_dir), &config.build.dockerfile),
            storage: StorageBinding::new(
                config.storage_location(project_dir),
                &config.storage.mount,
            ),
            policy,
            allow_storage_change: false,
        }
    }

    pub fn allow_storage_change(mut self, allow: bool) -> Self {
        self.allow_storage_change = allow;
        self
    }
}

/// Deploy progress. Strictly linear; a failure at any point aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Stage {
    Start,
    Validated,
    Synced,
    CacheResolved,
    ImageBuilt,
    OldRemoved,
    NewRunning,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Validated => "validated",
            Self::Synced => "synced",
            Self::CacheResolved => "cache-resolved",
            Self::ImageBuilt => "image-built",
            Self::OldRemoved => "old-removed",
            Self::NewRunning => "new-running",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a successful deploy pipeline run.
#[derive(Debug)]
pub(crate) struct DeployOutcome {
    pub stage: Stage,
    pub steps: Vec<String>,
    pub revision: String,
    pub container_id: String,
    pub storage: StorageLocation,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DeployError {
    #[error("deploy failed at validate: runtime configuration is missing or unusable")]
    MissingConfiguration { source: relaunch_core::Error },

    #[error("deploy failed at sync: could not update the source tree")]
    SyncFailed { source: SyncError },

    #[error("deploy failed at build: build context is not usable")]
    BuildContext { source: relaunch_core::Error },

    #[error("deploy failed at build: image build did not complete")]
    BuildFailed { source: RuntimeError },

    #[error("deploy failed at storage: could not prepare durable storage")]
    StorageFailed { source: relaunch_core::Error },

    #[error("deploy failed at storage: could not prepare durable storage volume")]
    VolumeFailed { source: RuntimeError },

    #[error(
        "deploy failed at storage: previous instance keeps its data at {previous}, \
         this deploy would use {requested} \
         (rerun with --allow-storage-change to switch; data is not copied)"
    )]
    StorageChanged {
        previous: StorageLocation,
        requested: StorageLocation,
    },

    #[error("deploy failed at remove: previous instance {name} could not be removed")]
    RemovalFailed { name: String, source: RuntimeError },

    #[error(
        "deploy failed at launch: new instance did not start \
         (previous instance was already removed; fix the cause and rerun)"
    )]
    LaunchFailed { source: RuntimeError },
}

impl DeployError {
    pub fn stage_label(&self) -> &'static str {
        match self {
            Self::MissingConfiguration { .. } => "validate",
            Self::SyncFailed { .. } => "sync",
            Self::BuildContext { .. } | Self::BuildFailed { .. } => "build",
            Self::StorageFailed { .. }
            | Self::VolumeFailed { .. }
            | Self::StorageChanged { .. } => "storage",
            Self::RemovalFailed { .. } => "remove",
            Self::LaunchFailed { .. } => "launch",
        }
    }
}

/// Run the full deploy pipeline:
/// validate → sync → resolve cache policy → build → storage → remove old → run new.
pub(crate) async fn run<R, S>(
    runtime: &R,
    source: &S,
    plan: &DeployPlan,
) -> Result<DeployOutcome, DeployError>
where
    R: ContainerRuntime,
    S: SourceControl,
{
    let mut steps = Vec::new();
    let mut stage = Stage::Start;

    // Validate runtime configuration before anything touches git or docker
    let env = RuntimeEnv::validate(&plan.env_file, &plan.required_keys)
        .map_err(|e| DeployError::MissingConfiguration { source: e })?;
    advance(&mut stage, Stage::Validated);
    steps.push(format!(
        "Runtime configuration found ({} key(s))",
        env.keys.len()
    ));

    // Sync source
    let revision = source
        .sync()
        .await
        .map_err(|e| DeployError::SyncFailed { source: e })?;
    advance(&mut stage, Stage::Synced);
    steps.push(format!("Source synced at {revision}"));

    // Resolve cache policy
    let flags = plan.policy.build_flags();
    advance(&mut stage, Stage::CacheResolved);
    steps.push(format!("Cache policy: {}", plan.policy));

    // Build
    let declares_volume = plan
        .context
        .declares_volume(plan.storage.mount())
        .map_err(|e| DeployError::BuildContext { source: e })?;
    if !declares_volume {
        tracing::warn!(
            dockerfile = %plan.context.dockerfile.display(),
            mount = plan.storage.mount(),
            "container definition does not declare the storage mount as a VOLUME"
        );
    }

    if flags.purge_existing {
        match runtime.remove_image(&plan.image_tag).await {
            Ok(Removal::Removed) => steps.push(format!("Removed image {}", plan.image_tag)),
            Ok(Removal::Absent) => steps.push(format!("No previous image {}", plan.image_tag)),
            Err(e) => {
                tracing::warn!(image = %plan.image_tag, error = %e, "could not remove previous image");
                steps.push(format!("Warning: could not remove image {}: {e}", plan.image_tag));
            }
        }
    }

    runtime
        .build_image(&plan.context, &plan.image_tag, flags)
        .await
        .map_err(|e| DeployError::BuildFailed { source: e })?;
    advance(&mut stage, Stage::ImageBuilt);
    steps.push(format!("Built image {}", plan.image_tag));

    // Durable storage, prepared before the old instance goes away
    let location = plan
        .storage
        .location
        .resolve()
        .map_err(|e| DeployError::StorageFailed { source: e })?;
    check_storage_unchanged(runtime, plan, &location, &mut steps).await?;
    let storage = StorageBinding::new(location.clone(), plan.storage.mount());
    match &location {
        StorageLocation::HostDir(_) => {
            storage
                .ensure_host_layout()
                .map_err(|e| DeployError::StorageFailed { source: e })?;
        }
        StorageLocation::Volume(name) => {
            runtime
                .ensure_volume(name)
                .await
                .map_err(|e| DeployError::VolumeFailed { source: e })?;
        }
    }
    steps.push(format!("Storage ready: {location}"));

    // Remove the previous instance
    match runtime.remove_container(&plan.service_name).await {
        Ok(Removal::Removed) => steps.push(format!("Removed instance {}", plan.service_name)),
        Ok(Removal::Absent) => steps.push("No previous instance".to_owned()),
        Err(e) => ensure_removed(runtime, &plan.service_name, e, &mut steps).await?,
    }
    advance(&mut stage, Stage::OldRemoved);

    // Launch the new instance
    let spec = RunSpec {
        name: plan.service_name.clone(),
        image: plan.image_tag.clone(),
        restart: plan.restart.clone(),
        env_file: plan.env_file.clone(),
        env: storage
            .derived_env()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect(),
        volume: storage.volume_arg(),
    };
    let container_id = runtime
        .run_detached(&spec)
        .await
        .map_err(|e| DeployError::LaunchFailed { source: e })?;
    advance(&mut stage, Stage::NewRunning);
    steps.push(format!("Started instance {}", plan.service_name));

    Ok(DeployOutcome {
        stage,
        steps,
        revision,
        container_id,
        storage: location,
    })
}

/// Refuse to silently point the new instance at different storage than the
/// instance it replaces; the old data would look lost.
async fn check_storage_unchanged<R: ContainerRuntime>(
    runtime: &R,
    plan: &DeployPlan,
    location: &StorageLocation,
    steps: &mut Vec<String>,
) -> Result<(), DeployError> {
    let previous = match runtime
        .mounted_storage(&plan.service_name, plan.storage.mount())
        .await
    {
        Ok(Some(previous)) => previous,
        Ok(None) => return Ok(()),
        Err(e) => {
            tracing::warn!(container = %plan.service_name, error = %e, "could not read storage of previous instance");
            steps.push(format!("Warning: could not read storage of previous instance: {e}"));
            return Ok(());
        }
    };

    if same_location(&previous, location) {
        return Ok(());
    }
    if !plan.allow_storage_change {
        return Err(DeployError::StorageChanged {
            previous,
            requested: location.clone(),
        });
    }

    tracing::warn!(from = %previous, to = %location, "durable storage location changed");
    steps.push(format!(
        "Warning: storage moved from {previous} to {location}; existing data was not copied"
    ));
    Ok(())
}

fn same_location(a: &StorageLocation, b: &StorageLocation) -> bool {
    match (a, b) {
        (StorageLocation::HostDir(a), StorageLocation::HostDir(b)) => {
            a == b
                || matches!(
                    (std::fs::canonicalize(a), std::fs::canonicalize(b)),
                    (Ok(a), Ok(b)) if a == b
                )
        }
        _ => a == b,
    }
}

/// A removal error is tolerated only if the name is free afterwards;
/// a leftover container would block the launch.
async fn ensure_removed<R: ContainerRuntime>(
    runtime: &R,
    name: &str,
    error: RuntimeError,
    steps: &mut Vec<String>,
) -> Result<(), DeployError> {
    match runtime.container_exists(name).await {
        Ok(false) => {
            tracing::warn!(container = name, error = %error, "removal reported an error but the container is gone");
            steps.push(format!("Warning: removal of {name} reported: {error}"));
            Ok(())
        }
        Ok(true) => Err(DeployError::RemovalFailed {
            name: name.to_owned(),
            source: error,
        }),
        Err(inspect_error) => {
            tracing::warn!(container = name, error = %inspect_error, "could not re-check container after failed removal");
            Err(DeployError::RemovalFailed {
                name: name.to_owned(),
                source: error,
            })
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug_assert!(next > *stage, "stage must move forward");
    tracing::info!(from = ?*stage, to = ?next, "deploy stage");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ── Fakes ──

    #[derive(Default)]
    struct FakeState {
        next_image_id: u32,
        /// tag → image id
        images: HashMap<String, u32>,
        /// name → (image id, spec)
        containers: HashMap<String, (u32, RunSpec)>,
        volumes: HashSet<String>,
        calls: Vec<String>,
        launches: Vec<RunSpec>,
        /// Whether the tag still resolved when the last build started
        tag_present_at_build: Option<bool>,
    }

    #[derive(Default)]
    struct Faults {
        build: bool,
        run: bool,
        remove_image: bool,
        /// Removal errors; `true` leaves the container in place
        remove_container: Option<bool>,
    }

    #[derive(Default)]
    struct FakeRuntime {
        state: Mutex<FakeState>,
        faults: Faults,
    }

    fn cmd_err(msg: &str) -> relaunch_runtime::CommandError {
        relaunch_runtime::CommandError::CommandFailed {
            program: "docker".to_owned(),
            args: vec![],
            stderr: msg.to_owned(),
        }
    }

    impl FakeRuntime {
        fn with_faults(faults: Faults) -> Self {
            Self {
                state: Mutex::default(),
                faults,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn image_id(&self, tag: &str) -> Option<u32> {
            self.state.lock().unwrap().images.get(tag).copied()
        }

        fn running(&self) -> usize {
            self.state.lock().unwrap().containers.len()
        }

        fn seed_instance(&self, name: &str, tag: &str) {
            self.seed_instance_with_volume(name, tag, "");
        }

        fn seed_instance_with_volume(&self, name: &str, tag: &str, volume: &str) {
            let mut s = self.state.lock().unwrap();
            s.next_image_id += 1;
            let id = s.next_image_id;
            s.images.insert(tag.to_owned(), id);
            let spec = RunSpec {
                name: name.to_owned(),
                image: tag.to_owned(),
                restart: "unless-stopped".to_owned(),
                env_file: PathBuf::from(".env"),
                env: vec![],
                volume: volume.to_owned(),
            };
            s.containers.insert(name.to_owned(), (id, spec));
        }
    }

    impl ContainerRuntime for FakeRuntime {
        async fn remove_image(&self, tag: &str) -> Result<Removal, RuntimeError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("remove_image {tag}"));
            if self.faults.remove_image {
                return Err(RuntimeError::RemoveImage {
                    tag: tag.to_owned(),
                    source: cmd_err("daemon hiccup"),
                });
            }
            Ok(match s.images.remove(tag) {
                Some(_) => Removal::Removed,
                None => Removal::Absent,
            })
        }

        async fn build_image(
            &self,
            _context: &BuildContext,
            tag: &str,
            flags: relaunch_core::BuildFlags,
        ) -> Result<(), RuntimeError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("build {tag} {}", flags.to_args().join(" ")));
            s.tag_present_at_build = Some(s.images.contains_key(tag));
            if self.faults.build {
                return Err(RuntimeError::Build {
                    tag: tag.to_owned(),
                    source: cmd_err("syntax error"),
                });
            }
            // Unchanged source with a warm cache reproduces the same image
            if flags.no_cache || !s.images.contains_key(tag) {
                s.next_image_id += 1;
                let id = s.next_image_id;
                s.images.insert(tag.to_owned(), id);
            }
            Ok(())
        }

        async fn remove_container(&self, name: &str) -> Result<Removal, RuntimeError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("remove_container {name}"));
            if let Some(leave_behind) = self.faults.remove_container {
                if !leave_behind {
                    s.containers.remove(name);
                }
                return Err(RuntimeError::RemoveContainer {
                    name: name.to_owned(),
                    source: cmd_err("removal in progress"),
                });
            }
            Ok(match s.containers.remove(name) {
                Some(_) => Removal::Removed,
                None => Removal::Absent,
            })
        }

        async fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("container_exists {name}"));
            Ok(s.containers.contains_key(name))
        }

        async fn run_detached(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("run {}", spec.name));
            if self.faults.run || s.containers.contains_key(&spec.name) {
                return Err(RuntimeError::Run {
                    name: spec.name.clone(),
                    source: cmd_err("port is already allocated"),
                });
            }
            let Some(id) = s.images.get(&spec.image).copied() else {
                return Err(RuntimeError::Run {
                    name: spec.name.clone(),
                    source: cmd_err("No such image"),
                });
            };
            s.containers
                .insert(spec.name.clone(), (id, spec.clone()));
            s.launches.push(spec.clone());
            Ok(format!("container-{}", s.launches.len()))
        }

        async fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("ensure_volume {name}"));
            Ok(s.volumes.insert(name.to_owned()))
        }

        async fn mounted_storage(
            &self,
            name: &str,
            mount: &str,
        ) -> Result<Option<StorageLocation>, RuntimeError> {
            let s = self.state.lock().unwrap();
            let Some((_, spec)) = s.containers.get(name) else {
                return Ok(None);
            };
            Ok(match spec.volume.rsplit_once(':') {
                Some((source, target)) if target == mount => Some(if source.starts_with('/') {
                    StorageLocation::HostDir(PathBuf::from(source))
                } else {
                    StorageLocation::Volume(source.to_owned())
                }),
                _ => None,
            })
        }
    }

    #[derive(Default)]
    struct FakeSource {
        syncs: Mutex<u32>,
        fail: bool,
    }

    impl SourceControl for FakeSource {
        async fn sync(&self) -> Result<String, SyncError> {
            *self.syncs.lock().unwrap() += 1;
            if self.fail {
                return Err(SyncError::Pull {
                    source: relaunch_runtime::CommandError::CommandFailed {
                        program: "git".to_owned(),
                        args: vec![],
                        stderr: "Could not resolve host".to_owned(),
                    },
                });
            }
            Ok("a1b2c3d".to_owned())
        }
    }

    impl FakeSource {
        fn syncs(&self) -> u32 {
            *self.syncs.lock().unwrap()
        }
    }

    // ── Fixture ──

    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join(".env"), "BOT_TOKEN=t\nBOT_ADMINS=1,2\n").unwrap();
            std::fs::write(
                dir.path().join("Dockerfile"),
                "FROM python:3.12-slim\nVOLUME [\"/app/data\"]\n",
            )
            .unwrap();
            Self { dir }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn plan(&self, policy: CachePolicy) -> DeployPlan {
            DeployPlan::new(&RelaunchConfig::default(), self.path(), policy)
        }

        fn plan_with(&self, config: &RelaunchConfig, policy: CachePolicy) -> DeployPlan {
            DeployPlan::new(config, self.path(), policy)
        }
    }

    const TAG: &str = "trader-watcher:latest";
    const NAME: &str = "trader-watcher";

    // ── Scenarios ──

    #[tokio::test]
    async fn first_deploy_on_empty_host() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        let source = FakeSource::default();

        let outcome = run(&runtime, &source, &project.plan(CachePolicy::Cached))
            .await
            .unwrap();

        assert_eq!(outcome.stage, Stage::NewRunning);
        assert_eq!(outcome.revision, "a1b2c3d");
        assert_eq!(outcome.container_id, "container-1");
        assert_eq!(runtime.running(), 1);
        assert!(outcome.steps.iter().any(|s| s == "No previous instance"));
        assert_eq!(
            runtime.calls(),
            vec![
                format!("build {TAG} "),
                format!("remove_container {NAME}"),
                format!("run {NAME}"),
            ]
        );
        assert!(project.path().join("data/db").is_dir());
        assert!(project.path().join("data/logs").is_dir());
    }

    #[tokio::test]
    async fn forced_deploy_purges_previous_image_before_build() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        runtime.seed_instance(NAME, TAG);
        let old_id = runtime.image_id(TAG).unwrap();

        let outcome = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Fresh),
        )
        .await
        .unwrap();

        assert_eq!(outcome.stage, Stage::NewRunning);
        assert_eq!(runtime.state.lock().unwrap().tag_present_at_build, Some(false));
        assert_ne!(runtime.image_id(TAG), Some(old_id));
        assert_eq!(
            runtime.calls(),
            vec![
                format!("remove_image {TAG}"),
                format!("build {TAG} --no-cache --pull"),
                format!("remove_container {NAME}"),
                format!("run {NAME}"),
            ]
        );
        assert_eq!(runtime.running(), 1);
    }

    #[tokio::test]
    async fn forced_deploy_without_prior_image_is_fine() {
        let project = Project::new();
        let runtime = FakeRuntime::default();

        let outcome = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Fresh),
        )
        .await
        .unwrap();

        assert!(outcome.steps.iter().any(|s| s.starts_with("No previous image")));
    }

    #[tokio::test]
    async fn cached_deploy_keeps_existing_image() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        runtime.seed_instance(NAME, TAG);
        let old_id = runtime.image_id(TAG);

        run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap();

        assert_eq!(runtime.image_id(TAG), old_id);
        assert!(!runtime.calls().iter().any(|c| c.starts_with("remove_image")));
    }

    #[tokio::test]
    async fn repeated_deploys_leave_one_instance() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        let source = FakeSource::default();
        let plan = project.plan(CachePolicy::Cached);

        for _ in 0..2 {
            let outcome = run(&runtime, &source, &plan).await.unwrap();
            assert_eq!(runtime.running(), 1);
            assert!(!outcome.steps.iter().any(|s| s.starts_with("Warning")));
        }
        assert_eq!(source.syncs(), 2);
    }

    #[tokio::test]
    async fn missing_env_file_touches_nothing() {
        let project = Project::new();
        std::fs::remove_file(project.path().join(".env")).unwrap();
        let runtime = FakeRuntime::default();
        let source = FakeSource::default();

        let err = run(&runtime, &source, &project.plan(CachePolicy::Fresh))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::MissingConfiguration { .. }));
        assert_eq!(err.stage_label(), "validate");
        assert!(runtime.calls().is_empty());
        assert_eq!(source.syncs(), 0);
    }

    #[tokio::test]
    async fn missing_required_key_is_missing_configuration() {
        let project = Project::new();
        let mut config = RelaunchConfig::default();
        config.env.required = vec!["HL_POLL_INTERVAL_SECONDS".to_owned()];
        let runtime = FakeRuntime::default();

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan_with(&config, CachePolicy::Cached),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::MissingConfiguration { .. }));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn sync_failure_aborts_before_build() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        runtime.seed_instance(NAME, TAG);
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };

        let err = run(&runtime, &source, &project.plan(CachePolicy::Fresh))
            .await
            .unwrap_err();

        assert_eq!(err.stage_label(), "sync");
        assert!(runtime.calls().is_empty());
        assert_eq!(runtime.running(), 1);
    }

    #[tokio::test]
    async fn missing_dockerfile_aborts_before_purge() {
        let project = Project::new();
        std::fs::remove_file(project.path().join("Dockerfile")).unwrap();
        let runtime = FakeRuntime::default();
        runtime.seed_instance(NAME, TAG);

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Fresh),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::BuildContext { .. }));
        assert!(runtime.calls().is_empty());
        assert!(runtime.image_id(TAG).is_some());
    }

    #[tokio::test]
    async fn build_failure_leaves_running_instance_alone() {
        let project = Project::new();
        let runtime = FakeRuntime::with_faults(Faults {
            build: true,
            ..Default::default()
        });
        runtime.seed_instance(NAME, TAG);

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::BuildFailed { .. }));
        assert_eq!(err.stage_label(), "build");
        assert_eq!(runtime.running(), 1);
        assert!(!runtime.calls().iter().any(|c| c.starts_with("remove_container")));
    }

    #[tokio::test]
    async fn image_purge_error_is_tolerated() {
        let project = Project::new();
        let runtime = FakeRuntime::with_faults(Faults {
            remove_image: true,
            ..Default::default()
        });

        let outcome = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Fresh),
        )
        .await
        .unwrap();

        assert_eq!(outcome.stage, Stage::NewRunning);
        assert!(outcome.steps.iter().any(|s| s.starts_with("Warning")));
    }

    #[tokio::test]
    async fn removal_error_with_name_freed_continues() {
        let project = Project::new();
        let runtime = FakeRuntime::with_faults(Faults {
            remove_container: Some(false),
            ..Default::default()
        });
        runtime.seed_instance(NAME, TAG);

        let outcome = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap();

        assert_eq!(outcome.stage, Stage::NewRunning);
        assert_eq!(runtime.running(), 1);
    }

    #[tokio::test]
    async fn removal_error_with_orphan_aborts_before_launch() {
        let project = Project::new();
        let runtime = FakeRuntime::with_faults(Faults {
            remove_container: Some(true),
            ..Default::default()
        });
        runtime.seed_instance(NAME, TAG);

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::RemovalFailed { .. }));
        assert_eq!(err.stage_label(), "remove");
        assert!(!runtime.calls().iter().any(|c| c.starts_with("run")));
    }

    #[tokio::test]
    async fn launch_failure_is_terminal() {
        let project = Project::new();
        let runtime = FakeRuntime::with_faults(Faults {
            run: true,
            ..Default::default()
        });
        runtime.seed_instance(NAME, TAG);

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::LaunchFailed { .. }));
        assert_eq!(err.stage_label(), "launch");
        // No automatic resurrection of the removed instance
        assert_eq!(runtime.running(), 0);
        assert!(err.to_string().contains("launch"));
    }

    // ── Durable storage ──

    #[tokio::test]
    async fn host_data_survives_fresh_rebuild() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        let source = FakeSource::default();

        run(&runtime, &source, &project.plan(CachePolicy::Cached))
            .await
            .unwrap();
        // The running instance writes state
        let db = project.path().join("data/db/app.sqlite3");
        std::fs::write(&db, b"watched-wallets").unwrap();

        run(&runtime, &source, &project.plan(CachePolicy::Fresh))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&db).unwrap(), b"watched-wallets");
        let launches = runtime.state.lock().unwrap().launches.clone();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[0].volume, launches[1].volume);
        assert_eq!(launches[0].env, launches[1].env);
    }

    #[tokio::test]
    async fn launch_carries_env_file_and_derived_paths() {
        let project = Project::new();
        let runtime = FakeRuntime::default();

        run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap();

        let spec = runtime.state.lock().unwrap().launches[0].clone();
        assert_eq!(spec.env_file, project.path().join(".env"));
        assert_eq!(spec.restart, "unless-stopped");
        assert_eq!(
            spec.env,
            vec![
                ("DATA_DIR".to_owned(), "/app/data".to_owned()),
                ("DB_PATH".to_owned(), "/app/data/db/app.sqlite3".to_owned()),
                ("LOG_DIR".to_owned(), "/app/data/logs".to_owned()),
            ]
        );
        assert!(spec.volume.ends_with(":/app/data"));
        assert!(Path::new(spec.volume.trim_end_matches(":/app/data")).is_absolute());
    }

    #[tokio::test]
    async fn named_volume_is_ensured_before_removal() {
        let project = Project::new();
        let mut config = RelaunchConfig::default();
        config.storage.volume = Some("watcher-data".to_owned());
        let runtime = FakeRuntime::default();
        let plan = project.plan_with(&config, CachePolicy::Cached);

        let outcome = run(&runtime, &FakeSource::default(), &plan).await.unwrap();

        assert_eq!(
            outcome.storage,
            StorageLocation::Volume("watcher-data".to_owned())
        );
        let calls = runtime.calls();
        let ensure = calls.iter().position(|c| c == "ensure_volume watcher-data");
        let remove = calls.iter().position(|c| c.starts_with("remove_container"));
        assert!(ensure.is_some() && ensure < remove);
        assert_eq!(
            runtime.state.lock().unwrap().launches[0].volume,
            "watcher-data:/app/data"
        );
        assert!(!project.path().join("data").exists());
    }

    #[tokio::test]
    async fn storage_change_aborts_before_removal() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        runtime.seed_instance_with_volume(NAME, TAG, "/srv/elsewhere/data:/app/data");

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap_err();

        match &err {
            DeployError::StorageChanged { previous, requested } => {
                assert_eq!(
                    previous,
                    &StorageLocation::HostDir(PathBuf::from("/srv/elsewhere/data"))
                );
                assert_eq!(
                    requested,
                    &StorageLocation::HostDir(project.path().join("data"))
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.stage_label(), "storage");
        assert!(err.to_string().contains("--allow-storage-change"));
        assert_eq!(runtime.running(), 1);
        assert!(!runtime.calls().iter().any(|c| c.starts_with("remove_container")));
        assert!(!project.path().join("data").exists());
    }

    #[tokio::test]
    async fn switching_to_a_named_volume_needs_consent() {
        let project = Project::new();
        let mut config = RelaunchConfig::default();
        config.storage.volume = Some("watcher-data".to_owned());
        let runtime = FakeRuntime::default();
        let old_dir = project.path().join("data");
        runtime.seed_instance_with_volume(NAME, TAG, &format!("{}:/app/data", old_dir.display()));

        let err = run(
            &runtime,
            &FakeSource::default(),
            &project.plan_with(&config, CachePolicy::Cached),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeployError::StorageChanged { .. }));
        assert!(!runtime.calls().iter().any(|c| c.starts_with("ensure_volume")));

        let plan = project
            .plan_with(&config, CachePolicy::Cached)
            .allow_storage_change(true);
        let outcome = run(&runtime, &FakeSource::default(), &plan).await.unwrap();

        assert_eq!(outcome.stage, Stage::NewRunning);
        assert!(
            outcome
                .steps
                .iter()
                .any(|s| s.starts_with("Warning: storage moved from"))
        );
        assert_eq!(
            runtime.state.lock().unwrap().launches[0].volume,
            "watcher-data:/app/data"
        );
    }

    #[tokio::test]
    async fn previous_instance_without_storage_mount_is_not_a_change() {
        let project = Project::new();
        let runtime = FakeRuntime::default();
        runtime.seed_instance(NAME, TAG);

        let outcome = run(
            &runtime,
            &FakeSource::default(),
            &project.plan(CachePolicy::Cached),
        )
        .await
        .unwrap();

        assert!(!outcome.steps.iter().any(|s| s.starts_with("Warning")));
    }

    #[test]
    fn stage_labels_follow_pipeline_order() {
        let stages = [
            Stage::Start,
            Stage::Validated,
            Stage::Synced,
            Stage::CacheResolved,
            Stage::ImageBuilt,
            Stage::OldRemoved,
            Stage::NewRunning,
        ];
        assert!(stages.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Stage::NewRunning.to_string(), "new-running");
        assert_eq!(Stage::CacheResolved.label(), "cache-resolved");
    }
}
