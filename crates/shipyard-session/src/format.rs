//! Fixed-width text rendering of cluster objects.
//!
//! Columns are left-aligned and padded, never truncated, so a long value
//! pushes the rest of its row to the right the way kubectl's plain
//! printer does.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use shipyard_cluster::{Namespace, Node, Pod, Service, VersionInfo, Workload};
use shipyard_core::{LedgerEntry, ResourceKind, ResourceStatus};

/// Render an elapsed duration as `19h`, `5m` or `30s`.
pub fn format_duration(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Age of an object created at `created`, `<unknown>` when unset.
pub fn format_age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match created {
        Some(ts) => format_duration(now - ts),
        None => "<unknown>".to_string(),
    }
}

pub fn namespaces_table(namespaces: &[Namespace], now: DateTime<Utc>) -> String {
    let mut out = format!("{:<20}{:<10}{:<10}\n", "NAME", "STATUS", "AGE");
    for ns in namespaces {
        let _ = writeln!(
            out,
            "{:<20}{:<10}{:<10}",
            ns.metadata.name,
            ns.phase(),
            format_age(ns.metadata.creation_timestamp, now)
        );
    }
    out
}

pub fn pods_table(pods: &[Pod], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{:<20}{:<40}{:<10}{:<10}{:<10}{:<10}\n",
        "NAMESPACE", "NAME", "READY", "STATUS", "RESTARTS", "AGE"
    );
    for pod in pods {
        let _ = writeln!(
            out,
            "{:<20}{:<40}{:<10}{:<10}{:<10}{:<10}",
            pod.metadata.namespace_or_default(),
            pod.metadata.name,
            pod.ready_summary(),
            pod.phase(),
            pod.restarts(),
            format_age(pod.metadata.creation_timestamp, now)
        );
    }
    out
}

pub fn services_table(services: &[Service], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{:<20}{:<20}{:<10}{:<20}{:<10}{:<10}\n",
        "NAMESPACE", "NAME", "TYPE", "CLUSTER-IP", "PORT(S)", "AGE"
    );
    for svc in services {
        let _ = writeln!(
            out,
            "{:<20}{:<20}{:<10}{:<20}{:<10}{:<10}",
            svc.metadata.namespace_or_default(),
            svc.metadata.name,
            svc.spec.service_type.as_deref().unwrap_or(""),
            svc.spec.cluster_ip.as_deref().unwrap_or(""),
            ports(svc),
            format_age(svc.metadata.creation_timestamp, now)
        );
    }
    out
}

pub fn deployments_table(workloads: &[Workload], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{:<20}{:<20}{:<10}{:<10}{:<10}{:<10}\n",
        "NAMESPACE", "NAME", "READY", "UP-TO-DATE", "AVAILABLE", "AGE"
    );
    for workload in workloads {
        let observed = workload.observed();
        let _ = writeln!(
            out,
            "{:<20}{:<20}{:<10}{:<10}{:<10}{:<10}",
            workload.metadata.namespace_or_default(),
            workload.metadata.name,
            format!("{}/{}", observed.ready_replicas, workload.desired_replicas()),
            observed.updated_replicas,
            observed.available_replicas,
            format_age(workload.metadata.creation_timestamp, now)
        );
    }
    out
}

pub fn cluster_info(endpoint: &str, version: &VersionInfo) -> String {
    format!(
        "Kubernetes control plane is running at {endpoint}\nKubernetes version: {}\n",
        version.git_version
    )
}

pub fn nodes_table(nodes: &[Node], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{:<20}{:<10}{:<10}{:<10}{:<10}{:<10}\n",
        "NAME", "STATUS", "ROLES", "AGE", "VERSION", "INTERNAL-IP"
    );
    for node in nodes {
        let _ = writeln!(
            out,
            "{:<20}{:<10}{:<10}{:<10}{:<10}{:<10}",
            node.metadata.name,
            node.condition(),
            node.role(),
            format_age(node.metadata.creation_timestamp, now),
            node.status.node_info.kubelet_version,
            node.internal_ip()
        );
    }
    out
}

fn ports(service: &Service) -> String {
    service
        .spec
        .ports
        .iter()
        .map(|p| p.display())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Managed resources ─────────────────────────────────────────────

/// Live details of a managed resource.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveDetail {
    Replicas {
        desired: i32,
        ready: i32,
        available: i32,
    },
    Ports {
        service_type: String,
        cluster_ip: String,
        ports: String,
    },
}

impl LiveDetail {
    pub fn of_workload(workload: &Workload) -> Self {
        let observed = workload.observed();
        LiveDetail::Replicas {
            desired: workload.desired_replicas(),
            ready: observed.ready_replicas,
            available: observed.available_replicas,
        }
    }

    pub fn of_service(service: &Service) -> Self {
        LiveDetail::Ports {
            service_type: service.spec.service_type.clone().unwrap_or_default(),
            cluster_ip: service.spec.cluster_ip.clone().unwrap_or_default(),
            ports: ports(service),
        }
    }
}

/// A managed resource joined with its ledger position and live object.
#[derive(Debug, Clone)]
pub struct ResourceView<'a> {
    pub kind: ResourceKind,
    pub entry: &'a LedgerEntry,
    pub status: ResourceStatus,
    pub created: Option<DateTime<Utc>>,
    pub detail: LiveDetail,
}

/// Header plus one `NAMESPACE NAME KIND STATUS AGE` row.
pub fn resource_row(view: &ResourceView<'_>, now: DateTime<Utc>) -> String {
    format!(
        "{:<20}{:<30}{:<12}{:<12}{:<10}\n{:<20}{:<30}{:<12}{:<12}{:<10}\n",
        "NAMESPACE",
        "NAME",
        "KIND",
        "STATUS",
        "AGE",
        view.entry.namespace,
        view.entry.name,
        view.kind.as_str(),
        view.status.label(),
        format_age(view.created, now)
    )
}

/// `Key: value` description of a managed resource.
pub fn describe(view: &ResourceView<'_>) -> String {
    let labels = view
        .entry
        .label_map()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>();
    let labels = if labels.is_empty() {
        "<none>".to_string()
    } else {
        labels.join(",")
    };

    let mut out = String::new();
    let _ = writeln!(out, "{:<16}{}", "Name:", view.entry.name);
    let _ = writeln!(out, "{:<16}{}", "Namespace:", view.entry.namespace);
    let _ = writeln!(out, "{:<16}{}", "Kind:", view.kind.as_str());
    let _ = writeln!(out, "{:<16}{}", "Labels:", labels);
    match &view.detail {
        LiveDetail::Replicas {
            desired,
            ready,
            available,
        } => {
            let _ = writeln!(
                out,
                "{:<16}{desired} desired | {ready} ready | {available} available",
                "Replicas:"
            );
        }
        LiveDetail::Ports {
            service_type,
            cluster_ip,
            ports,
        } => {
            let _ = writeln!(out, "{:<16}{}", "Type:", service_type);
            let _ = writeln!(out, "{:<16}{}", "Cluster IP:", cluster_ip);
            let _ = writeln!(out, "{:<16}{}", "Ports:", ports);
        }
    }
    let _ = writeln!(out, "{:<16}{}", "Status:", view.status.label());
    let created = view
        .created
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "<unknown>".to_string());
    let _ = writeln!(out, "{:<16}{}", "Created:", created);
    let _ = writeln!(out, "{:<16}{}", "Last Operation:", view.entry.operation.as_str());
    let _ = writeln!(out, "{:<16}{}", "Last Command:", view.entry.command);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shipyard_cluster::{ObjectMeta, ServicePort, ServiceSpec};
    use shipyard_core::OperationKind;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn durations_pick_the_largest_unit() {
        assert_eq!(format_duration(Duration::hours(19)), "19h");
        assert_eq!(format_duration(Duration::minutes(5)), "5m");
        assert_eq!(format_duration(Duration::seconds(30)), "30s");
        assert_eq!(format_duration(Duration::seconds(-4)), "0s");
        // Units truncate, never round up.
        assert_eq!(format_duration(Duration::seconds(3599)), "59m");
        assert_eq!(format_duration(Duration::seconds(59)), "59s");
        assert_eq!(format_duration(Duration::milliseconds(59_900)), "59s");
        assert_eq!(format_duration(Duration::minutes(150)), "2h");
        assert_eq!(format_age(None, now()), "<unknown>");
    }

    #[test]
    fn namespace_rows_are_padded() {
        let mut ns = Namespace::new("team-x");
        ns.metadata.creation_timestamp = Some(now() - Duration::minutes(5));
        ns.status = Some(shipyard_cluster::NamespaceStatus {
            phase: Some("Active".into()),
        });
        let table = namespaces_table(&[ns], now());
        let mut lines = table.lines();
        assert_eq!(lines.next().unwrap(), format!("{:<20}{:<10}{:<10}", "NAME", "STATUS", "AGE"));
        assert_eq!(lines.next().unwrap(), format!("{:<20}{:<10}{:<10}", "team-x", "Active", "5m"));
    }

    #[test]
    fn service_ports_are_joined() {
        let svc = Service {
            metadata: ObjectMeta {
                name: "svc-a".into(),
                namespace: Some("team-x".into()),
                ..Default::default()
            },
            spec: ServiceSpec {
                service_type: Some("ClusterIP".into()),
                cluster_ip: Some("10.96.0.1".into()),
                ports: vec![
                    ServicePort {
                        port: 80,
                        ..Default::default()
                    },
                    ServicePort {
                        port: 53,
                        protocol: Some("UDP".into()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            ..Default::default()
        };
        let table = services_table(&[svc], now());
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with("team-x"));
        assert!(row.contains("80/TCP, 53/UDP"));
        assert!(row.trim_end().ends_with("<unknown>"));
    }

    #[test]
    fn node_without_conditions_is_unknown() {
        let node = Node {
            metadata: ObjectMeta::named("bare"),
            ..Default::default()
        };
        let table = nodes_table(&[node], now());
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with(&format!("{:<20}{:<10}{:<10}", "bare", "Unknown", "<none>")));
    }

    #[test]
    fn cluster_info_names_endpoint_and_version() {
        let version = VersionInfo {
            git_version: "v1.30.0".into(),
            ..Default::default()
        };
        assert_eq!(
            cluster_info("https://10.0.0.1:6443", &version),
            "Kubernetes control plane is running at https://10.0.0.1:6443\nKubernetes version: v1.30.0\n"
        );
    }

    fn entry() -> LedgerEntry {
        LedgerEntry {
            id: 3,
            resource_id: 1,
            user_id: 7,
            namespace: "team-x".into(),
            name: "api".into(),
            labels: r#"{"app":"api","tier":"web"}"#.into(),
            operation: OperationKind::Check,
            status: ResourceStatus::Running,
            command: "kubectl get deployment api -n team-x".into(),
            created_at: 0,
        }
    }

    #[test]
    fn resource_row_has_header_and_row() {
        let entry = entry();
        let view = ResourceView {
            kind: ResourceKind::Workload,
            entry: &entry,
            status: ResourceStatus::Running,
            created: Some(now() - Duration::seconds(30)),
            detail: LiveDetail::Replicas {
                desired: 2,
                ready: 2,
                available: 2,
            },
        };
        let text = resource_row(&view, now());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NAMESPACE"));
        assert!(lines[1].starts_with("team-x"));
        assert!(lines[1].contains("api"));
        assert!(lines[1].contains("deployment"));
        assert!(lines[1].contains("Running"));
        assert!(lines[1].contains("30s"));
    }

    #[test]
    fn describe_lists_labels_and_last_operation() {
        let entry = entry();
        let view = ResourceView {
            kind: ResourceKind::Workload,
            entry: &entry,
            status: ResourceStatus::Restarting,
            created: None,
            detail: LiveDetail::Replicas {
                desired: 3,
                ready: 1,
                available: 1,
            },
        };
        let text = describe(&view);
        assert!(text.contains("Labels:         app=api,tier=web\n"));
        assert!(text.contains("Replicas:       3 desired | 1 ready | 1 available\n"));
        assert!(text.contains("Status:         Restarting\n"));
        assert!(text.contains("Last Operation: check\n"));
        assert!(text.contains("Last Command:   kubectl get deployment api -n team-x\n"));
    }
}
