use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tracing::warn;

/// A parsed `env.config` file: plain KEY=VALUE lines, `#` comments.
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }
}

/// Read an `env.config` file. A missing file yields an empty set.
pub fn read_env_file(path: impl AsRef<Path>) -> EnvFile {
    let mut entries = BTreeMap::new();
    let content = match std::fs::read_to_string(path.as_ref()) {
        Ok(c) => c,
        Err(_) => return EnvFile { entries },
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    EnvFile { entries }
}

/// Write the file back, keys sorted.
pub fn write_env_file(path: impl AsRef<Path>, env_file: &EnvFile) -> std::io::Result<()> {
    let mut f = std::fs::File::create(path)?;
    for (k, v) in env_file.iter() {
        writeln!(f, "{k}={v}")?;
    }
    Ok(())
}

/// Copy the listed environment variables into the file when they differ,
/// persisting only if something changed. Used at boot so the next start sees
/// the same values even without the environment.
pub fn sync_env_to_file(path: impl AsRef<Path>, keys: &[&str]) -> EnvFile {
    let mut env_file = read_env_file(path.as_ref());
    let mut changed = false;
    for key in keys {
        if let Ok(v) = std::env::var(key) {
            if !v.is_empty() && env_file.get(key) != Some(&v) {
                env_file.set(*key, v);
                changed = true;
            }
        }
    }
    if changed {
        if let Err(e) = write_env_file(path.as_ref(), &env_file) {
            warn!(error = %e, path = %path.as_ref().display(), "failed to persist env.config");
        }
    }
    env_file
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.config");
        std::fs::write(
            &path,
            "# comment\nOPENCLAW_MODEL = gpt-4o-mini\n\nbroken line\nOPENCLAW_PORT=55003\n",
        )
        .unwrap();

        let env_file = read_env_file(&path);
        assert_eq!(env_file.get("OPENCLAW_MODEL").unwrap(), "gpt-4o-mini");
        assert_eq!(env_file.get("OPENCLAW_PORT").unwrap(), "55003");
        assert!(env_file.get("broken line").is_none());
    }

    #[test]
    fn missing_file_is_empty() {
        let env_file = read_env_file("/nonexistent/env.config");
        assert!(env_file.is_empty());
    }

    #[test]
    fn write_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.config");
        let mut env_file = EnvFile::default();
        env_file.set("B_KEY", "2");
        env_file.set("A_KEY", "1");
        write_env_file(&path, &env_file).unwrap();

        let back = read_env_file(&path);
        assert_eq!(back.get("A_KEY").unwrap(), "1");
        assert_eq!(back.get("B_KEY").unwrap(), "2");
        // Sorted output
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.find("A_KEY").unwrap() < text.find("B_KEY").unwrap());
    }
}
