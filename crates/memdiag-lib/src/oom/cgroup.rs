//! Best-effort container identity from a cgroup path
//!
//! Path conventions differ between cgroup drivers and runtimes. Recognized:
//! - systemd scopes: `cri-containerd-<id>.scope`, `crio-<id>.scope`,
//!   `docker-<id>.scope`, `libpod-<id>.scope`
//! - systemd pod slices: `kubepods-<qos>-pod<uid>.slice` (uid uses `_`)
//! - cgroupfs: `/kubepods/<qos>/pod<uid>/<id>` and `/docker/<id>`

use serde::{Deserialize, Serialize};

const RUNTIME_SCOPES: [(&str, &str); 4] = [
    ("cri-containerd-", "containerd"),
    ("crio-", "cri-o"),
    ("docker-", "docker"),
    ("libpod-", "podman"),
];

/// Container and pod a cgroup belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub container_id: Option<String>,
    pub pod_uid: Option<String>,
    /// guaranteed, burstable or besteffort
    pub qos_class: Option<String>,
    pub runtime: Option<String>,
}

impl ContainerIdentity {
    /// Resolve what can be resolved from `cgroup_path`; `None` when nothing matches
    pub fn from_cgroup_path(cgroup_path: &str) -> Option<Self> {
        let parts: Vec<&str> = cgroup_path.split('/').filter(|p| !p.is_empty()).collect();
        let mut identity = Self::default();

        for (idx, part) in parts.iter().enumerate() {
            if let Some(scope) = part.strip_suffix(".scope") {
                for (prefix, runtime) in RUNTIME_SCOPES {
                    if let Some(id) = scope.strip_prefix(prefix).filter(|id| is_container_id(id)) {
                        identity.container_id = Some(id.to_string());
                        identity.runtime = Some(runtime.to_string());
                    }
                }
                continue;
            }

            if let Some(slice) = part.strip_suffix(".slice") {
                if let Some((qos, uid)) = pod_slice(slice) {
                    identity.qos_class = Some(qos.to_string());
                    identity.pod_uid = Some(uid.replace('_', "-"));
                }
                continue;
            }

            let parent = idx.checked_sub(1).map(|i| parts[i]);

            // cgroupfs driver: kubepods[/qos]/pod<uid>
            if let Some(uid) = part.strip_prefix("pod").filter(|uid| is_pod_uid(uid)) {
                if parts[..idx].contains(&"kubepods") {
                    identity.pod_uid = Some(uid.to_string());
                    identity.qos_class = Some(
                        match parent {
                            Some(q @ ("burstable" | "besteffort")) => q,
                            _ => "guaranteed",
                        }
                        .to_string(),
                    );
                }
                continue;
            }

            if is_container_id(part) {
                identity.container_id = Some(part.to_string());
                if parent == Some("docker") {
                    identity.runtime = Some("docker".to_string());
                }
            }
        }

        (identity != Self::default()).then_some(identity)
    }
}

/// Split `kubepods[-qos]-pod<uid>` into (qos, uid)
fn pod_slice(slice: &str) -> Option<(&str, &str)> {
    let rest = slice.strip_prefix("kubepods")?;
    let (qos, uid) = match rest.split_once("-pod") {
        Some(("", uid)) => ("guaranteed", uid),
        Some(("-burstable", uid)) => ("burstable", uid),
        Some(("-besteffort", uid)) => ("besteffort", uid),
        _ => return None,
    };
    is_pod_uid(uid).then_some((qos, uid))
}

fn is_container_id(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_pod_uid(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-' || c == '_')
}
