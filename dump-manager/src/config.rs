// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files for the dump manager

use crate::mp_reboot::DEFAULT_MP_REBOOT_MARKER;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use thiserror::Error;

/// Configuration for the dump manager
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Directory holding one subdirectory per dump entry, named by entry id.
    pub dump_dir: Utf8PathBuf,
    /// File whose existence means the host is in a memory-preserving reboot.
    #[serde(default = "default_mp_reboot_marker")]
    pub mp_reboot_marker: Utf8PathBuf,
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
}

fn default_mp_reboot_marker() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_MP_REBOOT_MARKER)
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }

    /// Build the root logger described by `self.log`.
    pub fn to_logger(&self, name: &str) -> Result<Logger, LoadError> {
        self.log.to_logger(name).map_err(LoadError::Logger)
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("initializing logger")]
    Logger(#[source] std::io::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use dropshot::ConfigLoggingLevel;

    #[test]
    fn parses_full_config() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            dump_dir = "/var/lib/phosphor-debug-collector/system-dumps"
            mp_reboot_marker = "/run/test/mpreboot"

            [log]
            mode = "stderr-terminal"
            level = "info"
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(
            config.dump_dir,
            "/var/lib/phosphor-debug-collector/system-dumps"
        );
        assert_eq!(config.mp_reboot_marker, "/run/test/mpreboot");
        assert_eq!(
            config.log,
            ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info }
        );
        config.to_logger("dump-manager-test").unwrap();
    }

    #[test]
    fn example_config_is_valid() {
        let path = Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("configs")
            .join("config.toml");
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.mp_reboot_marker, DEFAULT_MP_REBOOT_MARKER);
        assert!(matches!(config.log, ConfigLogging::File { .. }));
    }

    #[test]
    fn marker_defaults_and_errors_name_the_file() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            dump_dir = "/tmp/dumps"

            [log]
            mode = "stderr-terminal"
            level = "debug"
            "#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.mp_reboot_marker, DEFAULT_MP_REBOOT_MARKER);

        std::fs::write(&path, "dump_dir = 7").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
        assert!(err.to_string().contains(path.as_str()));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::from_file(&missing).unwrap_err(),
            LoadError::Io { .. }
        ));
    }
}
