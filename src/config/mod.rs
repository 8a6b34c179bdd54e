//! Typed service definitions matching compose `services:` entries
//!
//! Only the declared settings live here. Turning a [`ServiceConfig`] into
//! running infrastructure is the job of a backend [`crate::ServiceFactory`].

mod lookup;

pub use lookup::{ConfigLookup, EnvironmentLookup, FileConfigLookup, ProcessEnvLookup};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declared settings for one service
///
/// Never mutated by the engine. [`crate::Project::create_service`] works on
/// a copy so environment interpolation does not leak back into the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    // Image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    // Execution
    #[serde(skip_serializing_if = "Command::is_empty")]
    pub command: Command,
    #[serde(skip_serializing_if = "Command::is_empty")]
    pub entrypoint: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    pub privileged: bool,
    pub read_only: bool,
    pub tty: bool,
    pub stdin_open: bool,

    // Environment
    #[serde(skip_serializing_if = "Environment::is_empty")]
    pub environment: Environment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    // Relationships
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>, // "name" or "name:alias"
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_links: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<String>, // "bridge", "host", "container:<name>"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc: Option<String>, // "host", "container:<name>"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,

    // Networking and storage
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_driver: Option<String>,

    // Resource limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<i64>, // bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,

    // Logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub log_opt: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Service named by `net: container:<name>`, if any
    pub fn net_container(&self) -> Option<&str> {
        self.net.as_deref().and_then(container_ref)
    }

    /// Service named by `ipc: container:<name>`, if any
    pub fn ipc_container(&self) -> Option<&str> {
        self.ipc.as_deref().and_then(container_ref)
    }
}

/// Extract `<name>` from a `container:<name>` namespace mode
pub fn container_ref(mode: &str) -> Option<&str> {
    mode.strip_prefix("container:").filter(|name| !name.is_empty())
}

/// Split `name:alias` into its parts. Without a colon the alias is the name.
pub fn name_alias(entry: &str) -> (&str, &str) {
    match entry.split_once(':') {
        Some((name, alias)) => (name, alias),
        None => (entry, entry),
    }
}

/// Either a list or a shell string in the source document
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

/// `command` / `entrypoint`: an argv list
///
/// A plain string is split with shell quoting rules, so
/// `sh -c "echo hi"` becomes `["sh", "-c", "echo hi"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StringOrList", into = "Vec<String>")]
pub struct Command(Vec<String>);

impl Command {
    pub fn new(args: Vec<String>) -> Self {
        Self(args)
    }

    /// Split a shell-style command line
    pub fn parse(line: &str) -> Option<Self> {
        shlex::split(line).map(Self)
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<StringOrList> for Command {
    type Error = String;

    fn try_from(value: StringOrList) -> Result<Self, Self::Error> {
        match value {
            StringOrList::List(args) => Ok(Self(args)),
            StringOrList::String(line) => {
                Self::parse(&line).ok_or_else(|| format!("unbalanced quoting in command: {}", line))
            }
        }
    }
}

impl From<Command> for Vec<String> {
    fn from(cmd: Command) -> Self {
        cmd.0
    }
}

/// Either `KEY=VALUE` entries or a mapping in the source document
#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrMap {
    List(Vec<String>),
    Map(BTreeMap<String, Option<String>>),
}

/// `environment`: ordered `KEY=VALUE` (or bare `KEY`) entries
///
/// Mapping entries with a null value become bare keys, which an
/// [`EnvironmentLookup`] fills in at service creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ListOrMap", into = "Vec<String>")]
pub struct Environment(Vec<String>);

impl Environment {
    pub fn new(entries: Vec<String>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries that still need a value (`KEY` or `KEY=`)
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .map(|entry| split_entry(entry))
            .filter(|(_, value)| value.map_or(true, str::is_empty))
            .map(|(key, _)| key)
    }

    /// Get the value set for `key`, if any
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .map(|entry| split_entry(entry))
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v)
    }
}

impl From<ListOrMap> for Environment {
    fn from(value: ListOrMap) -> Self {
        match value {
            ListOrMap::List(entries) => Self(entries),
            ListOrMap::Map(map) => Self(
                map.into_iter()
                    .map(|(k, v)| match v {
                        Some(v) => format!("{}={}", k, v),
                        None => k,
                    })
                    .collect(),
            ),
        }
    }
}

impl From<Environment> for Vec<String> {
    fn from(env: Environment) -> Self {
        env.0
    }
}

/// Split `KEY=VALUE` into key and optional value
pub fn split_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (entry, None),
    }
}
