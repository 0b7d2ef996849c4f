//! # k3d Cluster Runtime
//!
//! [`ClusterRuntime`] over the `k3d`, `kubectl` and `docker` CLIs. Every call
//! carries the configured per-command timeout so no cluster query can hang
//! the run.

use super::runtime::{ClusterRuntime, UnitPhase, UnitStatus};
use crate::config::ClusterConfig;
use crate::error::{DeployError, Result};
use crate::process::{args, run_command, CommandOutput};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub struct K3dRuntime {
    cluster: ClusterConfig,
    command_timeout: Duration,
}

impl K3dRuntime {
    pub fn new(cluster: ClusterConfig) -> Self {
        let command_timeout = Duration::from_secs(cluster.command_timeout_seconds.max(1));
        Self {
            cluster,
            command_timeout,
        }
    }

    fn server_node(&self) -> String {
        format!("k3d-{}-server-0", self.cluster.name)
    }

    async fn run(&self, program: &str, argv: Vec<String>, limit: Duration) -> Result<CommandOutput> {
        Ok(run_command(program, &argv, None, Some(limit)).await?)
    }

    /// Run and map a non-zero exit to a `Cluster` error
    async fn run_checked(&self, operation: &str, program: &str, argv: Vec<String>) -> Result<CommandOutput> {
        let output = self.run(program, argv, self.command_timeout).await?;
        if !output.success {
            return Err(DeployError::cluster(operation, output.failure_message()));
        }
        Ok(output)
    }

    fn kubectl_args<I, S>(&self, items: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = args(items);
        argv.push("-n".to_string());
        argv.push(self.cluster.namespace.clone());
        argv
    }
}

#[derive(Debug, Deserialize)]
struct K3dClusterEntry {
    name: String,
}

/// Cluster names from `k3d cluster list -o json`
pub fn parse_cluster_names(raw: &str) -> Result<Vec<String>> {
    let entries: Vec<K3dClusterEntry> = serde_json::from_str(raw)
        .map_err(|e| DeployError::cluster("k3d cluster list", format!("invalid JSON: {e}")))?;
    Ok(entries.into_iter().map(|e| e.name).collect())
}

#[derive(Debug, Deserialize)]
struct CrictlImages {
    #[serde(default)]
    images: Vec<CrictlImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrictlImage {
    #[serde(default)]
    repo_tags: Vec<String>,
}

/// Strip the registry prefixes containerd adds to locally imported images
pub fn normalize_image_ref(reference: &str) -> String {
    let trimmed = reference
        .strip_prefix("docker.io/")
        .unwrap_or(reference);
    trimmed
        .strip_prefix("library/")
        .unwrap_or(trimmed)
        .to_string()
}

/// Image references from `crictl images -o json`
pub fn parse_crictl_images(raw: &str) -> Result<HashSet<String>> {
    let listing: CrictlImages = serde_json::from_str(raw)
        .map_err(|e| DeployError::cluster("crictl images", format!("invalid JSON: {e}")))?;
    Ok(listing
        .images
        .iter()
        .flat_map(|image| image.repo_tags.iter())
        .map(|tag| normalize_image_ref(tag))
        .collect())
}

#[derive(Debug, Deserialize)]
struct KubeList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct KubeMetadata {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: KubeMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<PodCondition>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    #[serde(default)]
    restart_count: u32,
    #[serde(default)]
    state: HashMap<String, serde_json::Value>,
}

impl ContainerStatus {
    fn waiting_reason(&self) -> Option<&str> {
        self.state
            .get("waiting")
            .and_then(|w| w.get("reason"))
            .and_then(|r| r.as_str())
    }
}

/// One pod reduced to what readiness needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    pub phase: UnitPhase,
    pub ready: bool,
    pub restarts: u32,
    /// Container stuck in a crash or image-pull loop
    pub crashing: bool,
}

const CRASH_REASONS: [&str; 5] = [
    "CrashLoopBackOff",
    "Error",
    "ErrImagePull",
    "ImagePullBackOff",
    "CreateContainerConfigError",
];

fn parse_phase(raw: Option<&str>) -> UnitPhase {
    match raw {
        Some("Pending") => UnitPhase::Pending,
        Some("Running") => UnitPhase::Running,
        Some("Succeeded") => UnitPhase::Succeeded,
        Some("Failed") => UnitPhase::Failed,
        _ => UnitPhase::Unknown,
    }
}

/// Pods from `kubectl get pods -o json`, grouped by their `app` label
pub fn parse_pod_list(raw: &str) -> Result<HashMap<String, Vec<PodObservation>>> {
    let list: KubeList<Pod> = serde_json::from_str(raw)
        .map_err(|e| DeployError::cluster("kubectl get pods", format!("invalid JSON: {e}")))?;

    let mut grouped: HashMap<String, Vec<PodObservation>> = HashMap::new();
    for pod in list.items {
        let app = pod
            .metadata
            .labels
            .get("app")
            .cloned()
            .unwrap_or_else(|| pod.metadata.name.clone());
        let ready = pod
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True");
        let crashing = pod
            .status
            .container_statuses
            .iter()
            .filter_map(ContainerStatus::waiting_reason)
            .any(|reason| CRASH_REASONS.contains(&reason));
        let restarts = pod
            .status
            .container_statuses
            .iter()
            .map(|c| c.restart_count)
            .sum();

        grouped.entry(app).or_default().push(PodObservation {
            phase: parse_phase(pod.status.phase.as_deref()),
            ready,
            restarts,
            crashing,
        });
    }
    Ok(grouped)
}

#[derive(Debug, Deserialize)]
struct Workload {
    metadata: KubeMetadata,
    #[serde(default)]
    spec: WorkloadSpec,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadSpec {
    #[serde(default)]
    replicas: Option<u32>,
}

/// Desired replica counts from `kubectl get deployments,statefulsets -o json`
pub fn parse_workload_replicas(raw: &str) -> Result<HashMap<String, u32>> {
    let list: KubeList<Workload> = serde_json::from_str(raw)
        .map_err(|e| DeployError::cluster("kubectl get workloads", format!("invalid JSON: {e}")))?;
    Ok(list
        .items
        .into_iter()
        .map(|w| (w.metadata.name, w.spec.replicas.unwrap_or(1)))
        .collect())
}

/// Fold a unit's pods into one status
pub fn summarize_unit(name: &str, pods: &[PodObservation], desired: Option<u32>) -> UnitStatus {
    let desired_replicas = desired.unwrap_or(pods.len().max(1) as u32);
    let ready_replicas = pods.iter().filter(|p| p.ready).count() as u32;
    let restart_count = pods.iter().map(|p| p.restarts).sum();

    let phase = if pods.is_empty() {
        if desired.is_some() {
            UnitPhase::Pending
        } else {
            UnitPhase::Unknown
        }
    } else if pods.iter().any(|p| p.crashing || p.phase == UnitPhase::Failed) {
        UnitPhase::Failed
    } else if pods.iter().all(|p| p.phase == UnitPhase::Succeeded) {
        UnitPhase::Succeeded
    } else if pods.iter().any(|p| p.phase == UnitPhase::Running) {
        UnitPhase::Running
    } else if pods.iter().any(|p| p.phase == UnitPhase::Pending) {
        UnitPhase::Pending
    } else {
        UnitPhase::Unknown
    };

    UnitStatus {
        name: name.to_string(),
        phase,
        ready_replicas,
        desired_replicas,
        restart_count,
    }
}

#[async_trait]
impl ClusterRuntime for K3dRuntime {
    async fn cluster_exists(&self) -> Result<bool> {
        let output = self
            .run_checked("k3d cluster list", "k3d", args(["cluster", "list", "-o", "json"]))
            .await?;
        Ok(parse_cluster_names(&output.stdout)?
            .iter()
            .any(|name| name == &self.cluster.name))
    }

    async fn ensure_cluster(&self) -> Result<()> {
        if self.cluster_exists().await? {
            debug!(cluster = %self.cluster.name, "Cluster already exists");
            return Ok(());
        }

        info!(
            cluster = %self.cluster.name,
            agents = self.cluster.agents,
            port = self.cluster.load_balancer_port,
            "🚀 Creating k3d cluster"
        );
        let mut argv = args(["cluster", "create"]);
        argv.push(self.cluster.name.clone());
        argv.push("--agents".to_string());
        argv.push(self.cluster.agents.to_string());
        argv.push("-p".to_string());
        argv.push(format!("{}:80@loadbalancer", self.cluster.load_balancer_port));
        argv.push("--wait".to_string());
        self.run_checked("k3d cluster create", "k3d", argv).await?;

        if let Some(manifest) = &self.cluster.namespace_manifest {
            let mut argv = args(["apply", "-f"]);
            argv.push(manifest.display().to_string());
            self.run_checked("apply namespace", "kubectl", argv).await?;
        }
        Ok(())
    }

    async fn delete_cluster(&self) -> Result<()> {
        if !self.cluster_exists().await? {
            info!(cluster = %self.cluster.name, "Cluster not present, nothing to delete");
            return Ok(());
        }
        let mut argv = args(["cluster", "delete"]);
        argv.push(self.cluster.name.clone());
        self.run_checked("k3d cluster delete", "k3d", argv).await?;
        info!(cluster = %self.cluster.name, "🗑️ Cluster deleted");
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<HashSet<String>> {
        let mut argv = args(["exec"]);
        argv.push(self.server_node());
        argv.extend(args(["crictl", "images", "-o", "json"]));
        let output = self.run_checked("list cluster images", "docker", argv).await?;
        parse_crictl_images(&output.stdout)
    }

    async fn import(&self, artifact_refs: &[String]) -> Result<()> {
        let mut argv = args(["image", "import", "-c"]);
        argv.push(self.cluster.name.clone());
        argv.extend(artifact_refs.iter().cloned());
        // each image is streamed separately; scale the limit with the chunk
        let limit = self.command_timeout * artifact_refs.len().max(1) as u32;
        let output = self.run("k3d", argv, limit).await?;
        if !output.success {
            return Err(DeployError::cluster("k3d image import", output.failure_message()));
        }
        Ok(())
    }

    async fn apply(&self, unit: &str, manifest: &Path) -> Result<()> {
        let mut argv = self.kubectl_args(["apply"]);
        argv.push("-f".to_string());
        argv.push(manifest.display().to_string());
        self.run_checked(&format!("apply {unit}"), "kubectl", argv).await?;
        Ok(())
    }

    async fn unit_status(&self, name: &str) -> Result<UnitStatus> {
        let mut statuses = self.unit_statuses(&[name.to_string()]).await?;
        Ok(statuses
            .pop()
            .unwrap_or_else(|| UnitStatus::unknown(name)))
    }

    async fn unit_statuses(&self, names: &[String]) -> Result<Vec<UnitStatus>> {
        let pods = self
            .run_checked("get pods", "kubectl", self.kubectl_args(["get", "pods", "-o", "json"]))
            .await?;
        let workloads = self
            .run_checked(
                "get workloads",
                "kubectl",
                self.kubectl_args(["get", "deployments,statefulsets", "-o", "json"]),
            )
            .await?;

        let pods = parse_pod_list(&pods.stdout)?;
        let replicas = parse_workload_replicas(&workloads.stdout)?;
        Ok(names
            .iter()
            .map(|name| {
                summarize_unit(
                    name,
                    pods.get(name).map(Vec::as_slice).unwrap_or(&[]),
                    replicas.get(name).copied(),
                )
            })
            .collect())
    }

    async fn restart_unit(&self, name: &str) -> Result<()> {
        let mut argv = self.kubectl_args(["delete", "pods", "-l"]);
        argv.push(format!("app={name}"));
        argv.push("--wait=false".to_string());
        self.run_checked(&format!("restart {name}"), "kubectl", argv).await?;
        Ok(())
    }

    async fn rolling_restart(&self, name: &str) -> Result<()> {
        let mut argv = self.kubectl_args(["rollout", "restart"]);
        argv.push(format!("deployment/{name}"));
        self.run_checked(&format!("rollout restart {name}"), "kubectl", argv)
            .await?;
        Ok(())
    }

    async fn run_one_shot_job(&self, name: &str, manifest: &Path) -> Result<()> {
        let mut delete = self.kubectl_args(["delete", "job", "--ignore-not-found"]);
        delete.push(name.to_string());
        self.run_checked(&format!("delete job {name}"), "kubectl", delete)
            .await?;

        let mut apply = self.kubectl_args(["apply", "-f"]);
        apply.push(manifest.display().to_string());
        self.run_checked(&format!("start job {name}"), "kubectl", apply)
            .await?;
        Ok(())
    }

    async fn wait_for_job_completion(&self, name: &str, timeout: Duration) -> Result<bool> {
        let mut argv = self.kubectl_args(["wait", "--for=condition=complete"]);
        argv.push(format!("job/{name}"));
        argv.push(format!("--timeout={}s", timeout.as_secs().max(1)));
        let output = self
            .run("kubectl", argv, timeout + self.command_timeout)
            .await?;
        Ok(output.success)
    }
}
