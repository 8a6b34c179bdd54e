//! Resource and environment lookups used while populating a project

use std::path::{Path, PathBuf};

use super::ServiceConfig;

/// Loads a referenced file (compose file, env file, ...)
pub trait ConfigLookup: Send + Sync {
    /// Read `file`, resolved against the file that referenced it.
    /// Returns the content and the path actually read.
    fn lookup(&self, file: &str, relative_to: &str) -> std::io::Result<(Vec<u8>, PathBuf)>;
}

/// Supplies values for environment entries declared without one
pub trait EnvironmentLookup: Send + Sync {
    /// Returns zero or more `KEY=VALUE` entries for `key`
    fn lookup(&self, key: &str, service_name: &str, config: &ServiceConfig) -> Vec<String>;
}

/// Reads files from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FileConfigLookup;

impl ConfigLookup for FileConfigLookup {
    fn lookup(&self, file: &str, relative_to: &str) -> std::io::Result<(Vec<u8>, PathBuf)> {
        let path = if Path::new(file).is_absolute() {
            PathBuf::from(file)
        } else {
            let base = Path::new(relative_to).parent().unwrap_or_else(|| Path::new(""));
            base.join(file)
        };

        log::debug!("Reading file {} (relative to {})", path.display(), relative_to);
        let bytes = std::fs::read(&path)?;
        Ok((bytes, path))
    }
}

/// Resolves keys from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvLookup;

impl EnvironmentLookup for ProcessEnvLookup {
    fn lookup(&self, key: &str, _service_name: &str, _config: &ServiceConfig) -> Vec<String> {
        match std::env::var(key) {
            Ok(value) => vec![format!("{}={}", key, value)],
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("muster-lookup-{}-{}", std::process::id(), tag));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_relative_lookup() {
        let dir = test_dir("relative");
        fs::write(dir.join("common.env"), "A=1\n").unwrap();
        let compose = dir.join("docker-compose.yml");

        let (bytes, path) = FileConfigLookup
            .lookup("common.env", compose.to_str().unwrap())
            .unwrap();
        assert_eq!(bytes, b"A=1\n");
        assert_eq!(path, dir.join("common.env"));
    }

    #[test]
    fn test_absolute_lookup_ignores_base() {
        let dir = test_dir("absolute");
        let file = dir.join("abs.yml");
        fs::write(&file, "x").unwrap();

        let (_, path) = FileConfigLookup
            .lookup(file.to_str().unwrap(), "/nonexistent/base.yml")
            .unwrap();
        assert_eq!(path, file);
    }

    #[test]
    fn test_missing_file() {
        assert!(FileConfigLookup.lookup("nope.yml", "/nonexistent/x.yml").is_err());
    }

    #[test]
    fn test_process_env_lookup() {
        std::env::set_var("MUSTER_LOOKUP_TEST", "42");
        let cfg = ServiceConfig::default();
        assert_eq!(
            ProcessEnvLookup.lookup("MUSTER_LOOKUP_TEST", "web", &cfg),
            vec!["MUSTER_LOOKUP_TEST=42".to_string()]
        );
        assert!(ProcessEnvLookup
            .lookup("MUSTER_LOOKUP_UNSET_VAR", "web", &cfg)
            .is_empty());
    }
}
