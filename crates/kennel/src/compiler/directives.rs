//! Backend configuration directives.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use kennel_common::{KennelError, KennelResult};

/// Ordered `key = value` directives for the backend.
///
/// Built in memory and written exactly once: [`CompiledConfig::persist`]
/// takes the value by move, so nothing can change it after the monitor has
/// read it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledConfig {
    directives: Vec<(String, String)>,
}

impl CompiledConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directive. Keys may repeat, the backend treats repeated keys
    /// like `lxc.mount.entry` as lists.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for keys outside the `lxc.` namespace
    /// and for values that would break the line based file format.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> KennelResult<()> {
        let key = key.into();
        let value = value.into();

        if !key.starts_with("lxc.") || key.len() == 4 || key.contains(char::is_whitespace) {
            return Err(KennelError::config(format!("invalid directive key {key:?}")));
        }
        if value.contains(['\n', '\r', '\0']) {
            return Err(KennelError::config(format!(
                "invalid value for {key}: line breaks and NUL are not allowed"
            )));
        }

        tracing::trace!(key = %key, value = %value, "Set directive");
        self.directives.push((key, value));
        Ok(())
    }

    /// Last value set for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values set for `key`, in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.directives
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The directives in emission order.
    #[must_use]
    pub fn directives(&self) -> &[(String, String)] {
        &self.directives
    }

    /// Render the configuration file contents.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.directives {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Write the configuration to `path`, which must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or can't be written.
    pub fn persist(self, path: &Path) -> KennelResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o640)
            .open(path)
            .map_err(|e| KennelError::config(format!("failed to create {}: {e}", path.display())))?;
        file.write_all(self.render().as_bytes())?;
        file.sync_all()?;

        tracing::debug!(
            path = %path.display(),
            directives = self.directives.len(),
            "Persisted container config"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut config = CompiledConfig::new();
        config.set("lxc.uts.name", "web").unwrap();
        config.set("lxc.mount.entry", "a b none bind 0 0").unwrap();
        config.set("lxc.mount.entry", "c d none bind 0 0").unwrap();

        assert_eq!(config.get("lxc.uts.name"), Some("web"));
        assert_eq!(config.get("lxc.mount.entry"), Some("c d none bind 0 0"));
        assert_eq!(config.get_all("lxc.mount.entry").count(), 2);
        assert_eq!(config.get("lxc.rootfs.path"), None);
    }

    #[test]
    fn rejects_malformed_directives() {
        let mut config = CompiledConfig::new();
        assert!(config.set("uts.name", "web").is_err());
        assert!(config.set("lxc.", "x").is_err());
        assert!(config.set("lxc.uts name", "x").is_err());
        assert!(config.set("lxc.uts.name", "a\nlxc.cap.keep = all").is_err());
        assert!(config.directives().is_empty());
    }

    #[test]
    fn persist_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");

        let mut config = CompiledConfig::new();
        config.set("lxc.rootfs.path", "/bundle/rootfs").unwrap();
        config.set("lxc.ephemeral", "0").unwrap();
        config.clone().persist(&path).unwrap();

        insta::assert_snapshot!(std::fs::read_to_string(&path).unwrap(), @r"
        lxc.rootfs.path = /bundle/rootfs
        lxc.ephemeral = 0
        ");

        let err = config.persist(&path).unwrap_err();
        assert!(matches!(err, KennelError::Config { .. }));
    }
}
