//! Service relationships
//!
//! Derives the dependency edges of a service from its declared config:
//! `links`, `volumes_from`, and `container:<name>` network/IPC modes.

use crate::config::{name_alias, ServiceConfig};

/// Kind of dependency between two services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    Link,
    NetNamespace,
    IpcNamespace,
    VolumesFrom,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::NetNamespace => "netns",
            Self::IpcNamespace => "ipc",
            Self::VolumesFrom => "volumesFrom",
        }
    }
}

/// A typed edge from one service to the service it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRelationship {
    pub target: String,
    pub alias: String,
    pub rel_type: RelationshipType,
    /// Optional edges may close a dependency cycle without failing the traversal
    pub optional: bool,
}

impl ServiceRelationship {
    /// Build a relationship from `name` or `name:alias`
    pub fn new(name_and_alias: &str, rel_type: RelationshipType) -> Self {
        let (name, alias) = name_alias(name_and_alias);
        Self {
            target: name.to_string(),
            alias: alias.to_string(),
            rel_type,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Compute the relationships declared by `config`, in declaration order:
/// links, then volumes_from, then net, then ipc.
pub fn dependent_services(config: &ServiceConfig) -> Vec<ServiceRelationship> {
    let mut result: Vec<ServiceRelationship> = config
        .links
        .iter()
        .map(|link| ServiceRelationship::new(link, RelationshipType::Link))
        .collect();

    for volumes_from in &config.volumes_from {
        // "service:ro" names the access mode, not an alias
        let (name, _) = name_alias(volumes_from);
        result.push(ServiceRelationship::new(name, RelationshipType::VolumesFrom));
    }

    // Two services may join each other's namespace, so these edges are optional
    if let Some(name) = config.net_container() {
        result.push(ServiceRelationship::new(name, RelationshipType::NetNamespace).optional());
    }
    if let Some(name) = config.ipc_container() {
        result.push(ServiceRelationship::new(name, RelationshipType::IpcNamespace).optional());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_relationships() {
        assert!(dependent_services(&ServiceConfig::default()).is_empty());
    }

    #[test]
    fn test_links_with_alias() {
        let cfg = ServiceConfig {
            links: vec!["db".into(), "cache:redis".into()],
            ..Default::default()
        };
        let rels = dependent_services(&cfg);
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].target, "db");
        assert_eq!(rels[0].alias, "db");
        assert_eq!(rels[1].target, "cache");
        assert_eq!(rels[1].alias, "redis");
        assert!(rels.iter().all(|r| r.rel_type == RelationshipType::Link && !r.optional));
    }

    #[test]
    fn test_volumes_from_strips_mode() {
        let cfg = ServiceConfig {
            volumes_from: vec!["data:ro".into()],
            ..Default::default()
        };
        let rels = dependent_services(&cfg);
        assert_eq!(rels[0].target, "data");
        assert_eq!(rels[0].rel_type, RelationshipType::VolumesFrom);
        assert!(!rels[0].optional);
    }

    #[test]
    fn test_namespaces_are_optional() {
        let cfg = ServiceConfig {
            net: Some("container:vpn".into()),
            ipc: Some("container:shm".into()),
            ..Default::default()
        };
        let rels = dependent_services(&cfg);
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].target, "vpn");
        assert_eq!(rels[0].rel_type, RelationshipType::NetNamespace);
        assert_eq!(rels[1].target, "shm");
        assert_eq!(rels[1].rel_type, RelationshipType::IpcNamespace);
        assert!(rels.iter().all(|r| r.optional));
    }

    #[test]
    fn test_non_container_modes_ignored() {
        let cfg = ServiceConfig {
            net: Some("host".into()),
            ipc: Some("host".into()),
            ..Default::default()
        };
        assert!(dependent_services(&cfg).is_empty());
    }

    #[test]
    fn test_declaration_order() {
        let cfg = ServiceConfig {
            links: vec!["a".into()],
            volumes_from: vec!["b".into()],
            net: Some("container:c".into()),
            ipc: Some("container:d".into()),
            ..Default::default()
        };
        let targets: Vec<_> = dependent_services(&cfg).into_iter().map(|r| r.target).collect();
        assert_eq!(targets, vec!["a", "b", "c", "d"]);
    }
}
