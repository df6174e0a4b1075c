//! Local backend
//!
//! Executes a plan against a rootfs directory in the image store. Each
//! directive's layer key is chained from the previous key and the
//! directive's inputs, including file digests for the staging directives.
//! Cached layers are not unpacked one by one: the backend remembers the last
//! hit and restores it once, right before the first directive that has to
//! run.
//!
//! RUN directives do not execute inside the image: their commands are
//! rewritten to install under the image root, exported to the runner as
//! `$BOTPACK_ROOTFS`. A dry run skips them altogether, keys its layers apart
//! from real builds and commits under [`dry_run_reference`] so it never
//! stands in for a real image.

use super::context::BuildContext;
use super::image::ImageConfig;
use super::runner::{CommandRunner, HostRunner, RunInvocation, SkipRunner, ROOTFS_ENV};
use super::store::ImageStore;
use super::{
    millis, BuildBackend, BuildOutcome, BuildRequest, DirectiveRecord, DirectiveStatus,
    InspectedImage,
};
use crate::cache::{Digest, LayerCache};
use crate::error::BuildError;
use crate::pipeline::directive::{Directive, DirectiveKind, APT_LISTS_DIR};
use crate::pipeline::plan::BuildPlan;
use crate::progress::{ProgressEvent, ProgressHandler};
use async_trait::async_trait;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const OUTPUT_TAIL_LINES: usize = 20;

/// Seed of the layer key chain of dry runs
const DRY_RUN_SEED: &str = "dry-run";

/// Reference a dry run of `image` commits under: the tag gains a
/// `-dry-run` suffix (`bot:latest` becomes `bot:latest-dry-run`)
pub fn dry_run_reference(image: &str) -> String {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    if image[name_start..].contains(':') {
        format!("{}-dry-run", image)
    } else {
        format!("{}:dry-run", image)
    }
}

pub struct LocalBackend {
    store: ImageStore,
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
}

impl LocalBackend {
    pub fn new(store: ImageStore) -> Self {
        Self {
            store,
            runner: Arc::new(HostRunner::default()),
            dry_run: false,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Skip every RUN command. File directives and image config still apply.
    pub fn dry_run(mut self) -> Self {
        self.runner = Arc::new(SkipRunner);
        self.dry_run = true;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }
}

/// Map an image path onto the rootfs. Relative paths resolve against the
/// working directory; `..` never climbs above the rootfs.
fn host_path(rootfs: &Path, workdir: &str, image_path: &str) -> PathBuf {
    let joined = Path::new(workdir).join(image_path);
    let mut out = rootfs.to_path_buf();
    let mut depth = 0usize;
    for component in joined.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::ParentDir if depth > 0 => {
                out.pop();
                depth -= 1;
            }
            _ => {}
        }
    }
    out
}

fn is_pip(argv: &[String]) -> bool {
    let pip_like = |arg: &str| arg == "pip" || arg.starts_with("pip3");
    let program = argv
        .first()
        .and_then(|p| Path::new(p).file_name())
        .and_then(|p| p.to_str())
        .unwrap_or_default();
    pip_like(program) || argv.windows(2).any(|w| w[0] == "-m" && pip_like(&w[1]))
}

/// Host command for a RUN directive, writing under the image root instead
/// of the host's own prefixes. Packages the host (standing in for the base
/// image) already has are not copied.
fn rootfs_command(directive: &Directive) -> Result<Option<String>, BuildError> {
    let root = format!("\"${}\"", ROOTFS_ENV);
    match directive {
        Directive::InstallSystemPackages { packages } if !packages.is_empty() => {
            let archives = format!("{}/var/cache/apt/archives", root);
            Ok(Some(format!(
                "mkdir -p {archives}/partial && apt-get update && \
                 apt-get install -y --download-only -o Dir::Cache::archives={archives} {packages} && \
                 for deb in {archives}/*.deb; do [ -e \"$deb\" ] || continue; \
                 dpkg-deb -x \"$deb\" {root} || exit 1; done && \
                 rm -rf {root}/var/cache/apt {lists}/*",
                archives = archives,
                packages = packages.join(" "),
                root = root,
                lists = APT_LISTS_DIR,
            )))
        }
        Directive::InstallDependencies { argv } => {
            if !is_pip(argv) {
                return Err(BuildError::directive_failed(
                    DirectiveKind::InstallDependencies,
                    format!(
                        "installer `{}` cannot install into the image root; build with the docker backend",
                        argv.join(" ")
                    ),
                ));
            }
            Ok(Some(format!("{} --root {}", argv.join(" "), root)))
        }
        _ => Ok(None),
    }
}

struct BuildState {
    config: ImageConfig,
    workdir: String,
    parent: Option<Digest>,
    /// Last cache hit not yet materialized in the rootfs
    pending: Option<Digest>,
}

impl LocalBackend {
    fn fingerprint(
        &self,
        directive: &Directive,
        context: &BuildContext,
    ) -> Result<String, BuildError> {
        let mut fingerprint = directive.fingerprint();
        match directive {
            Directive::StageManifest { manifest } => {
                let digest = context.file_digest(manifest).map_err(|e| BuildError::SourceCopy {
                    directive: DirectiveKind::StageManifest,
                    path: manifest.clone(),
                    message: format!("{:#}", e),
                })?;
                fingerprint.push_str(&format!("\n{}", digest));
            }
            Directive::StageSource { context: path, .. } => {
                let digest = context.digest().map_err(|e| BuildError::SourceCopy {
                    directive: DirectiveKind::StageSource,
                    path: path.clone(),
                    message: format!("{:#}", e),
                })?;
                fingerprint.push_str(&format!("\n{}", digest));
            }
            _ => {}
        }
        Ok(fingerprint)
    }

    /// Config-only effects. These apply whether or not the filesystem part
    /// of a directive came from the cache.
    fn apply_config(directive: &Directive, state: &mut BuildState) -> Result<(), BuildError> {
        match directive {
            Directive::SelectBase { image } => {
                if image.image.trim().is_empty() {
                    return Err(BuildError::BaseImage {
                        reference: image.reference(),
                        message: "empty image name".to_string(),
                    });
                }
                state.config.base = image.reference();
            }
            Directive::SetWorkdir { path } => {
                state.workdir = path.clone();
                state.config.working_dir = path.clone();
            }
            Directive::SetEnv { vars } => {
                state
                    .config
                    .env
                    .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Directive::Expose { ports } => {
                for port in ports {
                    if !state.config.exposed_ports.contains(port) {
                        state.config.exposed_ports.push(*port);
                    }
                }
            }
            Directive::Healthcheck { check } => {
                state.config.healthcheck = Some(check.clone());
            }
            Directive::Entrypoint { argv } => {
                state.config.entrypoint = argv.clone();
            }
            _ => {}
        }
        Ok(())
    }

    async fn execute(
        &self,
        directive: &Directive,
        context: &BuildContext,
        rootfs: &Path,
        state: &BuildState,
        progress: &dyn ProgressHandler,
    ) -> Result<(), BuildError> {
        let kind = directive.kind();
        let workdir = host_path(rootfs, "/", &state.workdir);

        match directive {
            Directive::SetWorkdir { path } => {
                fs::create_dir_all(&workdir)
                    .map_err(|e| BuildError::directive_failed(kind, format!("{}: {}", path, e)))?;
            }
            Directive::InstallSystemPackages { .. } | Directive::InstallDependencies { .. } => {
                let Some(command) = rootfs_command(directive)? else {
                    debug!(directive = %kind, "Nothing to run");
                    return Ok(());
                };
                let invocation = RunInvocation {
                    directive: kind,
                    command,
                    rootfs: rootfs.to_path_buf(),
                    workdir: workdir.clone(),
                    env: state.config.env.clone(),
                };
                let output = self
                    .runner
                    .run(&invocation)
                    .await
                    .map_err(|e| BuildError::directive_failed(kind, format!("{:#}", e)))?;
                for line in output.stdout.lines().chain(output.stderr.lines()) {
                    progress.on_progress(&ProgressEvent::Output {
                        directive: Some(kind),
                        line: line.to_string(),
                    });
                }
                if !output.is_success() {
                    let status = output
                        .code
                        .map(|c| format!("exit code {}", c))
                        .unwrap_or_else(|| "killed by signal".to_string());
                    return Err(BuildError::directive_failed(
                        kind,
                        format!(
                            "`{}` failed with {}\n{}",
                            invocation.command,
                            status,
                            output.tail(OUTPUT_TAIL_LINES)
                        ),
                    ));
                }
            }
            Directive::StageManifest { manifest } => {
                context
                    .stage_file(manifest, &workdir)
                    .map_err(|e| BuildError::SourceCopy {
                        directive: kind,
                        path: manifest.clone(),
                        message: format!("{:#}", e),
                    })?;
            }
            Directive::StageSource { context: path, .. } => {
                let copied = context
                    .stage_all(&workdir)
                    .map_err(|e| BuildError::SourceCopy {
                        directive: kind,
                        path: path.clone(),
                        message: format!("{:#}", e),
                    })?;
                debug!(entries = copied, "Source staged");
            }
            Directive::ProvisionDataDir { paths } => {
                for path in paths {
                    let target = host_path(rootfs, &state.workdir, path);
                    fs::create_dir_all(&target).map_err(|e| BuildError::DirectoryProvision {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

struct Step {
    status: DirectiveStatus,
    key: Digest,
    /// Whether `key` names a filesystem layer
    layer: bool,
}

impl LocalBackend {
    #[allow(clippy::too_many_arguments)]
    async fn step(
        &self,
        directive: &Directive,
        context: &BuildContext,
        cache: &LayerCache,
        rootfs: &Path,
        request: &BuildRequest,
        state: &mut BuildState,
        progress: &dyn ProgressHandler,
    ) -> Result<Step, BuildError> {
        let kind = directive.kind();
        let key = LayerCache::chain_key(state.parent.as_ref(), &self.fingerprint(directive, context)?);
        Self::apply_config(directive, state)?;

        if !kind.mutates_filesystem() {
            return Ok(Step {
                status: DirectiveStatus::Executed,
                key,
                layer: false,
            });
        }

        if request.use_cache && cache.contains(&key) {
            state.pending = Some(key.clone());
            return Ok(Step {
                status: DirectiveStatus::Cached,
                key,
                layer: true,
            });
        }

        if let Some(hit) = state.pending.take() {
            cache.restore(&hit, rootfs)?;
        }
        self.execute(directive, context, rootfs, state, progress).await?;
        if let Err(e) = cache.snapshot(&key, rootfs) {
            warn!(directive = %kind, error = %e, "Failed to record layer");
        }
        Ok(Step {
            status: DirectiveStatus::Executed,
            key,
            layer: true,
        })
    }
}

#[async_trait]
impl BuildBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn build(
        &self,
        plan: &BuildPlan,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuildOutcome, BuildError> {
        let start = Instant::now();
        let (context_dir, exclude) = match plan.get(DirectiveKind::StageSource) {
            Some(Directive::StageSource { context, exclude }) => {
                (request.context.join(context), exclude.clone())
            }
            _ => (request.context.clone(), Vec::new()),
        };
        let context = BuildContext::new(context_dir, exclude);
        let cache: LayerCache = self.store.layer_cache();
        let work = self
            .store
            .begin()
            .map_err(|e| BuildError::Store(format!("{:#}", e)))?;
        let rootfs = work.rootfs();

        let image = if self.dry_run {
            dry_run_reference(&plan.image)
        } else {
            plan.image.clone()
        };
        let mut state = BuildState {
            config: ImageConfig {
                tag: image.clone(),
                working_dir: "/".to_string(),
                ..Default::default()
            },
            workdir: "/".to_string(),
            parent: self
                .dry_run
                .then(|| LayerCache::chain_key(None, DRY_RUN_SEED)),
            pending: None,
        };
        let mut records = Vec::with_capacity(plan.len());
        let total = plan.len();

        for (i, directive) in plan.directives.iter().enumerate() {
            let index = i + 1;
            let kind = directive.kind();
            let started = Instant::now();
            progress.on_progress(&ProgressEvent::DirectiveStarted {
                index,
                total,
                directive: kind,
                summary: directive.summary(),
            });

            let result = self
                .step(directive, &context, &cache, &rootfs, request, &mut state, progress)
                .await;

            match result {
                Ok(step) => {
                    state.parent = Some(step.key.clone());
                    let layer = step.layer.then(|| step.key.as_str());
                    if let Some(ref layer) = layer {
                        state.config.layers.push(layer.clone());
                    }
                    let event = match step.status {
                        DirectiveStatus::Cached => ProgressEvent::DirectiveCached {
                            index,
                            total,
                            directive: kind,
                            layer: step.key.short().to_string(),
                        },
                        DirectiveStatus::Executed => ProgressEvent::DirectiveComplete {
                            index,
                            total,
                            directive: kind,
                            duration: started.elapsed(),
                        },
                    };
                    progress.on_progress(&event);
                    records.push(DirectiveRecord {
                        index,
                        directive: kind,
                        status: step.status,
                        duration_ms: millis(started.elapsed()),
                        layer,
                    });
                }
                Err(e) => {
                    progress.on_progress(&ProgressEvent::DirectiveFailed {
                        index,
                        total,
                        directive: kind,
                        error: e.to_string(),
                    });
                    // `work` drops here and takes the scratch rootfs with it
                    return Err(e);
                }
            }
        }

        if let Some(hit) = state.pending.take() {
            cache.restore(&hit, &rootfs)?;
        }

        let config = self
            .store
            .commit(work, state.config)
            .map_err(|e| BuildError::Store(format!("{:#}", e)))?;

        info!(
            image = %config.tag,
            id = %config.id,
            duration_ms = millis(start.elapsed()),
            "Local build committed"
        );

        Ok(BuildOutcome {
            image,
            backend: self.name().to_string(),
            config,
            directives: records,
            duration_ms: millis(start.elapsed()),
        })
    }

    async fn inspect(&self, image: &str) -> Result<Option<InspectedImage>, BuildError> {
        let config = self
            .store
            .resolve(image)
            .map_err(|e| BuildError::Store(format!("{:#}", e)))?;
        Ok(config.map(|config| {
            let rootfs = self.store.rootfs(&config.id);
            InspectedImage {
                config,
                rootfs: Some(rootfs),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::runner::RunOutput;
    use crate::output::schema::ImageRecipe;
    use crate::progress::NoOpHandler;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const INSTALLED: &str = "usr/local/lib/python3.11/site-packages/.installed";

    /// Records commands and fails the ones whose directive is listed.
    /// Dependency installs leave a marker under the image root, but only when
    /// the command was pointed at it.
    #[derive(Default)]
    struct MockRunner {
        calls: Mutex<Vec<(DirectiveKind, String)>>,
        invocations: Mutex<Vec<RunInvocation>>,
        fail: Vec<DirectiveKind>,
    }

    impl MockRunner {
        fn failing(kind: DirectiveKind) -> Self {
            Self {
                fail: vec![kind],
                ..Default::default()
            }
        }

        fn count(&self, kind: DirectiveKind) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == kind)
                .count()
        }
    }

    #[async_trait]
    impl CommandRunner for MockRunner {
        async fn run(&self, invocation: &RunInvocation) -> anyhow::Result<RunOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((invocation.directive, invocation.command.clone()));
            self.invocations.lock().unwrap().push(invocation.clone());
            if self.fail.contains(&invocation.directive) {
                return Ok(RunOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "ERROR: No matching distribution found".to_string(),
                });
            }
            if invocation.directive == DirectiveKind::InstallDependencies
                && invocation.command.ends_with("--root \"$BOTPACK_ROOTFS\"")
            {
                let marker = invocation.rootfs.join(INSTALLED);
                fs::create_dir_all(marker.parent().unwrap()).unwrap();
                fs::write(marker, "ok").unwrap();
            }
            Ok(RunOutput::success())
        }
    }

    fn bot_source() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.py"), "print('bot')\n").unwrap();
        fs::write(dir.path().join("requirements.txt"), "aiohttp==3.9.1\n").unwrap();
        dir
    }

    fn backend(store: &TempDir, runner: Arc<MockRunner>) -> LocalBackend {
        LocalBackend::new(ImageStore::new(store.path())).with_runner(runner)
    }

    fn plan() -> BuildPlan {
        BuildPlan::from_recipe(&ImageRecipe::python_bot())
    }

    #[test]
    fn test_host_path() {
        let rootfs = Path::new("/store/rootfs");
        assert_eq!(host_path(rootfs, "/app", "/app/data"), PathBuf::from("/store/rootfs/app/data"));
        assert_eq!(host_path(rootfs, "/app", "data"), PathBuf::from("/store/rootfs/app/data"));
        assert_eq!(host_path(rootfs, "/", "../../etc"), PathBuf::from("/store/rootfs/etc"));
    }

    #[tokio::test]
    async fn test_build_commits_image() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let backend = backend(&store, runner.clone());

        let outcome = backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        assert_eq!(outcome.image, "bot:latest");
        assert_eq!(outcome.executed(), 9);
        assert_eq!(outcome.cached(), 0);
        assert_eq!(runner.count(DirectiveKind::InstallSystemPackages), 1);
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 1);

        let image = backend.inspect("bot:latest").await.unwrap().unwrap();
        let rootfs = image.rootfs.unwrap();
        assert!(rootfs.join("app/main.py").is_file());
        assert!(rootfs.join("app/requirements.txt").is_file());
        assert!(rootfs.join(INSTALLED).is_file());
        assert!(rootfs.join("app/data").is_dir());
        assert_eq!(image.config.working_dir, "/app");
        assert_eq!(image.config.base, "python:3.11-slim");
        assert_eq!(image.config.layers.len(), 6);
    }

    #[tokio::test]
    async fn test_system_package_command_cleans_lists() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        backend(&store, runner.clone())
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        let (_, command) = calls
            .iter()
            .find(|(k, _)| *k == DirectiveKind::InstallSystemPackages)
            .unwrap();
        assert!(command.contains("apt-get install -y --download-only"));
        assert!(command.contains("dpkg-deb -x \"$deb\" \"$BOTPACK_ROOTFS\""));
        assert!(command.contains(" gcc && "));
        assert!(command.ends_with("rm -rf \"$BOTPACK_ROOTFS\"/var/cache/apt /var/lib/apt/lists/*"));
    }

    #[tokio::test]
    async fn test_install_commands_target_image_root() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        backend(&store, runner.clone())
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        let invocations = runner.invocations.lock().unwrap();
        let install = invocations
            .iter()
            .find(|i| i.directive == DirectiveKind::InstallDependencies)
            .unwrap();
        assert_eq!(
            install.command,
            "pip install --no-cache-dir -r requirements.txt --root \"$BOTPACK_ROOTFS\""
        );
        assert!(install.rootfs.starts_with(store.path().join("tmp")));
        assert_eq!(install.workdir, install.rootfs.join("app"));
    }

    #[test]
    fn test_pip_detection() {
        let argv = |args: &[&str]| args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        assert!(is_pip(&argv(&["pip", "install"])));
        assert!(is_pip(&argv(&["/usr/local/bin/pip3.11", "install"])));
        assert!(is_pip(&argv(&["python", "-m", "pip", "install"])));
        assert!(!is_pip(&argv(&["poetry", "install"])));
        assert!(!is_pip(&argv(&["pipenv", "install"])));
    }

    #[tokio::test]
    async fn test_installer_without_root_support_fails() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let mut recipe = ImageRecipe::python_bot();
        recipe.dependencies.installer = vec!["poetry".to_string(), "install".to_string()];

        let err = backend(&store, runner.clone())
            .build(
                &BuildPlan::from_recipe(&recipe),
                &BuildRequest::new(source.path()),
                &NoOpHandler,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::DependencyInstall(_)));
        assert!(err.to_string().contains("docker backend"));
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_runner_installs_into_image_root() {
        use std::os::unix::fs::PermissionsExt;

        let store = TempDir::new().unwrap();
        let source = bot_source();
        let tools = TempDir::new().unwrap();
        // Stand-in pip that installs whatever --root says
        let pip = tools.path().join("pip");
        fs::write(
            &pip,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do [ \"$1\" = --root ] && root=\"$2\"; shift; done\n\
             mkdir -p \"$root/usr/local/lib/site-packages/aiohttp\"\n",
        )
        .unwrap();
        fs::set_permissions(&pip, fs::Permissions::from_mode(0o755)).unwrap();

        let mut recipe = ImageRecipe::python_bot();
        recipe.system_packages.clear();
        recipe.dependencies.installer = vec![pip.display().to_string(), "install".to_string()];

        let backend = LocalBackend::new(ImageStore::new(store.path()));
        backend
            .build(
                &BuildPlan::from_recipe(&recipe),
                &BuildRequest::new(source.path()),
                &NoOpHandler,
            )
            .await
            .unwrap();

        let rootfs = backend.inspect("bot:latest").await.unwrap().unwrap().rootfs.unwrap();
        assert!(rootfs.join("usr/local/lib/site-packages/aiohttp").is_dir());
        assert!(rootfs.join("app/main.py").is_file());
    }

    #[test]
    fn test_dry_run_reference() {
        assert_eq!(dry_run_reference("bot:latest"), "bot:latest-dry-run");
        assert_eq!(dry_run_reference("bot"), "bot:dry-run");
        assert_eq!(
            dry_run_reference("registry.local:5000/acme/bot"),
            "registry.local:5000/acme/bot:dry-run"
        );
    }

    #[tokio::test]
    async fn test_dry_run_leaves_real_tag_and_layers_alone() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let real = backend(&store, runner.clone());

        let first = real
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        fs::write(source.path().join("requirements.txt"), "aiohttp==3.9.2\n").unwrap();
        let dry = LocalBackend::new(ImageStore::new(store.path())).dry_run();
        assert!(dry.is_dry_run());
        let rehearsal = dry
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();
        assert_eq!(rehearsal.image, "bot:latest-dry-run");
        assert_eq!(rehearsal.config.tag, "bot:latest-dry-run");
        assert_eq!(rehearsal.cached(), 0);
        assert_eq!(
            real.inspect("bot:latest").await.unwrap().unwrap().config.id,
            first.config.id
        );

        let second = real
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 2);
        assert_eq!(
            second.status_of(DirectiveKind::InstallDependencies),
            Some(DirectiveStatus::Executed)
        );
        let rootfs = real.inspect("bot:latest").await.unwrap().unwrap().rootfs.unwrap();
        assert!(rootfs.join(INSTALLED).is_file());
    }

    #[tokio::test]
    async fn test_source_change_reuses_dependency_layer() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let backend = backend(&store, runner.clone());

        backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();
        fs::write(source.path().join("main.py"), "print('bot v2')\n").unwrap();
        let second = backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 1);
        assert_eq!(
            second.status_of(DirectiveKind::InstallDependencies),
            Some(DirectiveStatus::Cached)
        );
        assert_eq!(
            second.status_of(DirectiveKind::StageSource),
            Some(DirectiveStatus::Executed)
        );

        let rootfs = backend.inspect("bot:latest").await.unwrap().unwrap().rootfs.unwrap();
        assert_eq!(
            fs::read_to_string(rootfs.join("app/main.py")).unwrap(),
            "print('bot v2')\n"
        );
        assert!(rootfs.join(INSTALLED).is_file());
    }

    #[tokio::test]
    async fn test_manifest_change_reinstalls() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let backend = backend(&store, runner.clone());

        backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();
        fs::write(source.path().join("requirements.txt"), "aiohttp==3.9.2\n").unwrap();
        backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        assert_eq!(runner.count(DirectiveKind::InstallSystemPackages), 1);
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 2);
    }

    #[tokio::test]
    async fn test_no_cache_reruns_everything() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let backend = backend(&store, runner.clone());

        for _ in 0..2 {
            backend
                .build(
                    &plan(),
                    &BuildRequest::new(source.path()).without_cache(),
                    &NoOpHandler,
                )
                .await
                .unwrap();
        }
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 2);
    }

    #[tokio::test]
    async fn test_fully_cached_rebuild_restores_rootfs() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::default());
        let backend = backend(&store, runner.clone());

        let first = backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();
        let second = backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        assert_eq!(second.cached(), 6);
        assert_eq!(first.config.id, second.config.id);
        let rootfs = backend.inspect("bot:latest").await.unwrap().unwrap().rootfs.unwrap();
        assert!(rootfs.join("app/data").is_dir());
    }

    #[tokio::test]
    async fn test_failed_install_stops_build_and_keeps_tag() {
        let store = TempDir::new().unwrap();
        let source = bot_source();

        let good = backend(&store, Arc::new(MockRunner::default()));
        let previous = good
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();

        fs::write(source.path().join("requirements.txt"), "nonexistent-pkg==0.0\n").unwrap();
        let runner = Arc::new(MockRunner::failing(DirectiveKind::InstallDependencies));
        let failing = backend(&store, runner.clone());
        let err = failing
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::DependencyInstall(_)));
        assert!(err.to_string().contains("No matching distribution"));
        assert_eq!(err.directive(), Some(DirectiveKind::InstallDependencies));

        let current = failing.inspect("bot:latest").await.unwrap().unwrap();
        assert_eq!(current.config.id, previous.config.id);
        let tmp = store.path().join("tmp");
        assert_eq!(fs::read_dir(tmp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_source_copy_error() {
        let store = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("main.py"), "print('bot')\n").unwrap();
        let runner = Arc::new(MockRunner::default());

        let err = backend(&store, runner.clone())
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap_err();

        assert_eq!(err.directive(), Some(DirectiveKind::StageManifest));
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 0);
        assert!(backend(&store, runner).inspect("bot:latest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_build_without_previous_tag() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        let runner = Arc::new(MockRunner::failing(DirectiveKind::InstallSystemPackages));
        let backend = backend(&store, runner.clone());

        let err = backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PackageInstall(_)));
        assert_eq!(runner.count(DirectiveKind::InstallDependencies), 0);
        assert!(backend.inspect("bot:latest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_over_existing_dir() {
        let store = TempDir::new().unwrap();
        let source = bot_source();
        // The source tree already carries a data directory
        fs::create_dir_all(source.path().join("data")).unwrap();
        fs::write(source.path().join("data/seed.json"), "{}").unwrap();

        let backend = backend(&store, Arc::new(MockRunner::default()));
        let outcome = backend
            .build(&plan(), &BuildRequest::new(source.path()), &NoOpHandler)
            .await
            .unwrap();
        assert_eq!(
            outcome.status_of(DirectiveKind::ProvisionDataDir),
            Some(DirectiveStatus::Executed)
        );
        let rootfs = backend.inspect("bot:latest").await.unwrap().unwrap().rootfs.unwrap();
        assert!(rootfs.join("app/data").is_dir());
        assert!(rootfs.join("app/data/seed.json").is_file());
    }
}
