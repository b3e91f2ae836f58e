//! Equivalent kubectl command lines recorded in the ledger for auditing.

use std::path::Path;

use crate::types::ResourceKind;

pub fn apply_command(manifest: &Path, namespace: &str) -> String {
    format!("kubectl apply -f {} -n {namespace}", manifest.display())
}

pub fn get_command(kind: ResourceKind, name: &str, namespace: &str) -> String {
    format!("kubectl get {kind} {name} -n {namespace}")
}

pub fn delete_command(kind: ResourceKind, name: &str, namespace: &str) -> String {
    format!("kubectl delete {kind} {name} -n {namespace}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_name_the_kind() {
        assert_eq!(
            delete_command(ResourceKind::Workload, "api", "prod"),
            "kubectl delete deployment api -n prod"
        );
        assert_eq!(
            get_command(ResourceKind::Service, "svc-a", "team-x"),
            "kubectl get service svc-a -n team-x"
        );
        assert_eq!(
            apply_command(Path::new("k8s/4_svc.yaml"), "team-x"),
            "kubectl apply -f k8s/4_svc.yaml -n team-x"
        );
    }
}
