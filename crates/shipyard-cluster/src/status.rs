//! Status derivation shared by the reconcile loop and the deploy pipeline.

use shipyard_core::{ResourceKind, ResourceStatus};

use crate::error::ClusterResult;
use crate::gateway::ClusterGateway;
use crate::objects::{Service, Workload};

/// Derive the status of a workload from its live object.
///
/// Absent is `Stopped`. All desired replicas available is `Running`.
/// Fewer updated replicas than desired is `Restarting`. Anything else is
/// `Stopped`.
pub fn derive_workload_status(workload: Option<&Workload>) -> ResourceStatus {
    let Some(workload) = workload else {
        return ResourceStatus::Stopped;
    };
    let desired = workload.desired_replicas();
    let observed = workload.observed();
    if observed.available_replicas == desired {
        ResourceStatus::Running
    } else if observed.updated_replicas < desired {
        ResourceStatus::Restarting
    } else {
        ResourceStatus::Stopped
    }
}

/// A service is `Running` while it exists.
pub fn derive_service_status(service: Option<&Service>) -> ResourceStatus {
    match service {
        Some(_) => ResourceStatus::Running,
        None => ResourceStatus::Stopped,
    }
}

/// Read the live object at `(namespace, name)` and derive its status.
///
/// A missing object is `Stopped`; any other gateway error is returned.
pub async fn probe_status(
    gateway: &dyn ClusterGateway,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> ClusterResult<ResourceStatus> {
    match kind {
        ResourceKind::Workload => match gateway.get_workload(namespace, name).await {
            Ok(w) => Ok(derive_workload_status(Some(&w))),
            Err(e) if e.is_not_found() => Ok(derive_workload_status(None)),
            Err(e) => Err(e),
        },
        ResourceKind::Service => match gateway.get_service(namespace, name).await {
            Ok(s) => Ok(derive_service_status(Some(&s))),
            Err(e) if e.is_not_found() => Ok(derive_service_status(None)),
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{WorkloadSpec, WorkloadStatus};

    fn workload(replicas: i32, status: WorkloadStatus) -> Workload {
        Workload {
            spec: WorkloadSpec {
                replicas: Some(replicas),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn absent_workload_is_stopped() {
        assert_eq!(derive_workload_status(None), ResourceStatus::Stopped);
    }

    #[test]
    fn all_available_is_running() {
        let w = workload(3, WorkloadStatus::settled(3));
        assert_eq!(derive_workload_status(Some(&w)), ResourceStatus::Running);
    }

    #[test]
    fn rolling_update_is_restarting() {
        let w = workload(
            3,
            WorkloadStatus {
                replicas: 3,
                ready_replicas: 2,
                updated_replicas: 1,
                available_replicas: 2,
            },
        );
        assert_eq!(derive_workload_status(Some(&w)), ResourceStatus::Restarting);
    }

    #[test]
    fn updated_but_unavailable_is_stopped() {
        let w = workload(
            2,
            WorkloadStatus {
                replicas: 2,
                ready_replicas: 0,
                updated_replicas: 2,
                available_replicas: 0,
            },
        );
        assert_eq!(derive_workload_status(Some(&w)), ResourceStatus::Stopped);
    }

    #[test]
    fn service_presence() {
        assert_eq!(derive_service_status(Some(&Service::default())), ResourceStatus::Running);
        assert_eq!(derive_service_status(None), ResourceStatus::Stopped);
    }
}
