//! Session command vocabulary.
//!
//! Commands are dispatch keys matched exactly after trimming; they are
//! never executed as shell text.

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ListNamespaces,
    ListPods,
    ListServices,
    ListDeployments,
    ClusterInfo,
    ListNodes,
    Apply,
    Delete,
    Get,
    Describe,
}

const VOCABULARY: &[(&str, Command)] = &[
    ("kubectl get namespace", Command::ListNamespaces),
    ("get all namespaces", Command::ListNamespaces),
    ("kubectl get pod -A", Command::ListPods),
    ("get all pods", Command::ListPods),
    ("kubectl get svc -A", Command::ListServices),
    ("get all services", Command::ListServices),
    ("kubectl get deployment -A", Command::ListDeployments),
    ("get all deployments", Command::ListDeployments),
    ("kubectl cluster-info", Command::ClusterInfo),
    ("cluster info", Command::ClusterInfo),
    ("kubectl get nodes", Command::ListNodes),
    ("get nodes", Command::ListNodes),
    ("kubectl apply -f", Command::Apply),
    ("kubectl delete", Command::Delete),
    ("kubectl get", Command::Get),
    ("kubectl describe", Command::Describe),
];

impl Command {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let key = raw.trim();
        VOCABULARY
            .iter()
            .find(|(text, _)| *text == key)
            .map(|(_, command)| *command)
            .ok_or_else(|| CommandError::Unsupported(key.to_string()))
    }

    /// Commands that change cluster state.
    pub fn is_mutating(self) -> bool {
        matches!(self, Command::Apply | Command::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_spellings_dispatch_alike() {
        assert_eq!(Command::parse("get all pods").unwrap(), Command::ListPods);
        assert_eq!(Command::parse("kubectl get pod -A").unwrap(), Command::ListPods);
        assert_eq!(Command::parse("  cluster info \n").unwrap(), Command::ClusterInfo);
        assert_eq!(Command::parse("kubectl get").unwrap(), Command::Get);
        assert!(Command::parse("kubectl apply -f").unwrap().is_mutating());
    }

    #[test]
    fn anything_else_is_unsupported() {
        let err = Command::parse("kubectl exec -it api -- sh").unwrap_err();
        assert_eq!(err.to_string(), "unsupported command: kubectl exec -it api -- sh");
        assert!(Command::parse("GET NODES").is_err());
        assert!(Command::parse("").is_err());
    }
}
