//! Docker backend
//!
//! Renders the plan to a Dockerfile, streams the filtered build context to
//! `docker build` as a tar on stdin, and follows the plain progress output
//! to tell which directive is running, which came from the builder cache and
//! which one failed. Image inspection goes through the Docker API.

use super::context::BuildContext;
use super::image::ImageConfig;
use super::{
    millis, BuildBackend, BuildOutcome, BuildRequest, DirectiveRecord, DirectiveStatus,
    InspectedImage,
};
use crate::error::BuildError;
use crate::output::schema::Healthcheck;
use crate::pipeline::directive::{Directive, DirectiveKind};
use crate::pipeline::plan::BuildPlan;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::render::{render, render_dockerignore, render_instructions, RenderedInstruction};
use async_trait::async_trait;
use bollard::Docker;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Name of the generated Dockerfile inside the build context
pub const DOCKERFILE_NAME: &str = "Dockerfile.botpack";

const ERROR_TAIL_LINES: usize = 20;

pub struct DockerBackend {
    docker_bin: String,
    timeout: Duration,
}

impl DockerBackend {
    pub fn new(docker_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            timeout,
        }
    }

    fn connect() -> Result<Docker, BuildError> {
        Docker::connect_with_local_defaults()
            .map_err(|e| BuildError::Docker(format!("Failed to connect to Docker: {}", e)))
    }

    /// Fail early when the daemon is unreachable
    pub async fn ensure_available(&self) -> Result<(), BuildError> {
        let docker = Self::connect()?;
        let version = docker
            .version()
            .await
            .map_err(|e| BuildError::Docker(format!("Docker daemon is not reachable: {}", e)))?;
        debug!(
            api_version = version.api_version.as_deref().unwrap_or("unknown"),
            "Docker daemon available"
        );
        Ok(())
    }

    /// Arguments of the `docker build` invocation; the context is read from stdin
    pub fn build_args(&self, plan: &BuildPlan, use_cache: bool) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--progress=plain".to_string(),
            "-t".to_string(),
            plan.image.clone(),
            "-f".to_string(),
            DOCKERFILE_NAME.to_string(),
        ];
        if !use_cache {
            args.push("--no-cache".to_string());
        }
        args.push("-".to_string());
        args
    }
}

fn buildkit_step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^#(\d+) \[(?:[^\]]*\s)?(\d+)/(\d+)\] (.+)$").expect("valid regex")
    })
}

fn buildkit_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#(\d+) (CACHED|ERROR:?.*)$").expect("valid regex"))
}

fn legacy_step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Step (\d+)/(\d+) : (.+)$").expect("valid regex"))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Follows builder output and maps it back to directives
#[derive(Debug)]
pub struct StepTracker {
    instructions: Vec<RenderedInstruction>,
    next: usize,
    vertices: BTreeMap<u32, DirectiveKind>,
    current: Option<DirectiveKind>,
    cached: HashSet<DirectiveKind>,
    failed: Option<DirectiveKind>,
    errors: Vec<String>,
    tail: Vec<String>,
}

/// What one output line meant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Started(DirectiveKind),
    Cached(DirectiveKind),
    Failed(DirectiveKind),
}

impl StepTracker {
    pub fn new(plan: &BuildPlan) -> Self {
        Self {
            instructions: render_instructions(plan),
            next: 0,
            vertices: BTreeMap::new(),
            current: None,
            cached: HashSet::new(),
            failed: None,
            errors: Vec::new(),
            tail: Vec::new(),
        }
    }

    /// Match an instruction as echoed by the builder to its directive.
    /// Instructions are searched from the last match onwards so repeated
    /// text (two `COPY ... .` lines) resolves in plan order.
    fn match_instruction(&mut self, text: &str) -> Option<DirectiveKind> {
        let text = normalize(text);
        if text.to_ascii_uppercase().starts_with("FROM ") {
            return Some(DirectiveKind::SelectBase);
        }
        let position = self.instructions[self.next..].iter().position(|instruction| {
            let first_line = instruction.text.lines().next().unwrap_or_default();
            let rendered = normalize(first_line.trim_end_matches('\\'));
            rendered == text || rendered.starts_with(&text) || text.starts_with(&rendered)
        })?;
        let index = self.next + position;
        self.next = index + 1;
        Some(self.instructions[index].kind)
    }

    pub fn observe(&mut self, line: &str) -> Option<StepEvent> {
        let line = line.trim_end();
        self.tail.push(line.to_string());
        if self.tail.len() > ERROR_TAIL_LINES {
            self.tail.remove(0);
        }

        if let Some(cap) = buildkit_step_re().captures(line) {
            let vertex: u32 = cap[1].parse().ok()?;
            let kind = self.match_instruction(&cap[4])?;
            self.vertices.insert(vertex, kind);
            self.current = Some(kind);
            return Some(StepEvent::Started(kind));
        }

        if let Some(cap) = buildkit_status_re().captures(line) {
            let vertex: u32 = cap[1].parse().ok()?;
            let kind = *self.vertices.get(&vertex)?;
            if &cap[2] == "CACHED" {
                self.cached.insert(kind);
                return Some(StepEvent::Cached(kind));
            }
            self.errors.push(cap[2].to_string());
            self.failed = Some(kind);
            return Some(StepEvent::Failed(kind));
        }

        if let Some(cap) = legacy_step_re().captures(line) {
            let kind = self.match_instruction(&cap[3])?;
            self.current = Some(kind);
            return Some(StepEvent::Started(kind));
        }

        if line.trim() == "---> Using cache" {
            let kind = self.current?;
            self.cached.insert(kind);
            return Some(StepEvent::Cached(kind));
        }

        if line.starts_with("ERROR") || line.contains("returned a non-zero code") {
            self.errors.push(line.to_string());
        }
        None
    }

    /// Directive the build stopped at: the one the builder flagged, or the
    /// last one it started
    pub fn failed_directive(&self) -> Option<DirectiveKind> {
        self.failed.or(self.current)
    }

    pub fn is_cached(&self, kind: DirectiveKind) -> bool {
        self.cached.contains(&kind)
    }

    pub fn failure_message(&self) -> String {
        if self.errors.is_empty() {
            self.tail.join("\n")
        } else {
            self.errors.join("\n")
        }
    }
}

/// Translate a failed step into the build error taxonomy
pub fn failure_error(plan: &BuildPlan, kind: Option<DirectiveKind>, message: String) -> BuildError {
    let Some(kind) = kind else {
        return BuildError::Docker(message);
    };
    match plan.get(kind) {
        Some(Directive::SelectBase { image }) => BuildError::BaseImage {
            reference: image.reference(),
            message,
        },
        Some(Directive::StageManifest { manifest }) => BuildError::SourceCopy {
            directive: kind,
            path: manifest.clone(),
            message,
        },
        Some(Directive::StageSource { context, .. }) => BuildError::SourceCopy {
            directive: kind,
            path: context.clone(),
            message,
        },
        Some(Directive::ProvisionDataDir { paths }) => BuildError::DirectoryProvision {
            path: paths.join(" "),
            message,
        },
        _ => BuildError::directive_failed(kind, message),
    }
}

fn format_duration_ns(nanos: i64) -> String {
    format!("{}s", nanos / 1_000_000_000)
}

/// Image config as reported by the Docker API
fn config_from_inspect(image: &str, inspect: bollard::models::ImageInspect) -> ImageConfig {
    let mut config = ImageConfig {
        id: inspect.id.unwrap_or_default(),
        tag: image.to_string(),
        ..Default::default()
    };

    if let Some(container) = inspect.config {
        config.working_dir = container.working_dir.unwrap_or_default();
        config.env = ImageConfig::env_from_list(&container.env.unwrap_or_default());
        let mut argv = container.entrypoint.unwrap_or_default();
        argv.extend(container.cmd.unwrap_or_default());
        config.entrypoint = argv;
        if let Some(ports) = container.exposed_ports {
            let mut exposed: Vec<u16> = ports
                .keys()
                .filter_map(|p| p.split('/').next().and_then(|n| n.parse().ok()))
                .collect();
            exposed.sort_unstable();
            config.exposed_ports = exposed;
        }
        if let Some(health) = container.healthcheck {
            let mut test = health.test.unwrap_or_default();
            if test.first().map(|t| t == "CMD").unwrap_or(false) {
                test.remove(0);
            }
            if !test.is_empty() && test.first().map(|t| t != "NONE").unwrap_or(true) {
                config.healthcheck = Some(Healthcheck {
                    test,
                    interval: health.interval.filter(|n| *n > 0).map(format_duration_ns),
                    timeout: health.timeout.filter(|n| *n > 0).map(format_duration_ns),
                    retries: health.retries.and_then(|r| u32::try_from(r).ok()),
                });
            }
        }
    }

    config
}

#[async_trait]
impl BuildBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn build(
        &self,
        plan: &BuildPlan,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuildOutcome, BuildError> {
        let start = Instant::now();
        self.ensure_available().await?;

        let (context_dir, exclude, context_label) = match plan.get(DirectiveKind::StageSource) {
            Some(Directive::StageSource { context, exclude }) => {
                (request.context.join(context), exclude.clone(), context.clone())
            }
            _ => (request.context.clone(), Vec::new(), ".".to_string()),
        };
        let dockerfile = render(plan);
        let dockerignore = render_dockerignore(plan);
        let mut generated = vec![(DOCKERFILE_NAME, dockerfile.as_str())];
        if let Some(ref ignore) = dockerignore {
            generated.push((".dockerignore", ignore.as_str()));
        }
        let tarball = BuildContext::new(context_dir, exclude)
            .write_tar(Vec::new(), &generated)
            .map_err(|e| BuildError::SourceCopy {
                directive: DirectiveKind::StageSource,
                path: context_label,
                message: format!("{:#}", e),
            })?;
        debug!(bytes = tarball.len(), "Build context archived");

        let args = self.build_args(plan, request.use_cache);
        info!(image = %plan.image, command = %format!("{} {}", self.docker_bin, args.join(" ")), "Running docker build");

        let mut child = Command::new(&self.docker_bin)
            .args(&args)
            .env("DOCKER_BUILDKIT", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Docker(format!("Failed to run {}: {}", self.docker_bin, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BuildError::Docker("docker build stdin unavailable".to_string()))?;
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&tarball).await;
            drop(stdin);
            result
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildError::Docker("docker build stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BuildError::Docker("docker build stderr unavailable".to_string()))?;

        let mut tracker = StepTracker::new(plan);
        let total = plan.len();
        let follow = async {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let (mut out_open, mut err_open) = (true, true);
            while out_open || err_open {
                let line = tokio::select! {
                    line = out.next_line(), if out_open => match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            out_open = false;
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read docker build stdout");
                            out_open = false;
                            continue;
                        }
                    },
                    line = err.next_line(), if err_open => match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            err_open = false;
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read docker build stderr");
                            err_open = false;
                            continue;
                        }
                    },
                };
                match tracker.observe(&line) {
                    Some(StepEvent::Started(kind)) => {
                        let index = plan.position(kind).map(|i| i + 1).unwrap_or(0);
                        let summary = plan.get(kind).map(|d| d.summary()).unwrap_or_default();
                        progress.on_progress(&ProgressEvent::DirectiveStarted {
                            index,
                            total,
                            directive: kind,
                            summary,
                        });
                    }
                    Some(StepEvent::Cached(kind)) => {
                        let index = plan.position(kind).map(|i| i + 1).unwrap_or(0);
                        progress.on_progress(&ProgressEvent::DirectiveCached {
                            index,
                            total,
                            directive: kind,
                            layer: "builder cache".to_string(),
                        });
                    }
                    Some(StepEvent::Failed(_)) | None => {}
                }
                progress.on_progress(&ProgressEvent::Output {
                    directive: tracker.current,
                    line,
                });
            }
            child.wait().await
        };

        let status = tokio::time::timeout(self.timeout, follow)
            .await
            .map_err(|_| {
                BuildError::Docker(format!(
                    "docker build timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| BuildError::Docker(format!("Failed to wait for docker build: {}", e)))?;

        match writer.await {
            Ok(Err(e)) if status.success() => {
                return Err(BuildError::Docker(format!("Failed to send build context: {}", e)))
            }
            Err(e) => warn!(error = %e, "Context writer task failed"),
            _ => {}
        }

        if !status.success() {
            let kind = tracker.failed_directive();
            if let Some(kind) = kind {
                let index = plan.position(kind).map(|i| i + 1).unwrap_or(0);
                progress.on_progress(&ProgressEvent::DirectiveFailed {
                    index,
                    total,
                    directive: kind,
                    error: tracker.failure_message(),
                });
            }
            return Err(failure_error(plan, kind, tracker.failure_message()));
        }

        let inspected = self
            .inspect(&plan.image)
            .await?
            .ok_or_else(|| BuildError::Docker(format!("{} missing after build", plan.image)))?;

        let directives = plan
            .directives
            .iter()
            .enumerate()
            .map(|(i, d)| DirectiveRecord {
                index: i + 1,
                directive: d.kind(),
                status: if tracker.is_cached(d.kind()) {
                    DirectiveStatus::Cached
                } else {
                    DirectiveStatus::Executed
                },
                duration_ms: 0,
                layer: None,
            })
            .collect();

        Ok(BuildOutcome {
            image: plan.image.clone(),
            backend: self.name().to_string(),
            config: inspected.config,
            directives,
            duration_ms: millis(start.elapsed()),
        })
    }

    async fn inspect(&self, image: &str) -> Result<Option<InspectedImage>, BuildError> {
        let docker = Self::connect()?;
        match docker.inspect_image(image).await {
            Ok(inspect) => Ok(Some(InspectedImage {
                config: config_from_inspect(image, inspect),
                rootfs: None,
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(BuildError::Docker(format!("Failed to inspect {}: {}", image, e))),
        }
    }
}
