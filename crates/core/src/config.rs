//! Runtime configuration (C10), loaded entirely from the process environment
//! as laid out in §6.2. There is no config file: every knob this tool has
//! is an environment variable, which keeps it trivial to drive from cron
//! or a container entrypoint.

use std::path::PathBuf;

use crate::{Error, Result};

/// Resolved, validated configuration for one invocation.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub account: String,
    pub key: String,
    pub container: String,
    pub write_prefix: PathBuf,
    pub no_write: bool,
    pub verbose: u8,
    pub log_stdout: bool,
    pub log_syslog: bool,
}

impl SyncConfig {
    /// Read and validate configuration from the environment. Fails closed:
    /// a missing account, key, or container is a configuration error, not a
    /// warning, since every code path needs all three to talk to the store.
    pub fn from_env() -> Result<Self> {
        let account = require_var("AZURE_STORAGE_ACCOUNT")?;
        let key = require_var("AZURE_STORAGE_KEY")?;
        let container = require_var("AZURE_SYNC_CONTAINER")?;

        let write_prefix = std::env::var("AZURE_SYNC_WRITE_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/azure-sync-writes"));

        let no_write = std::env::var("AZURE_SYNC_NOWRITE")
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let verbose = match std::env::var("AZURE_SYNC_VERBOSE") {
            Ok(v) => v.parse::<u8>().map(|n| n.min(2)).map_err(|_| Error::InvalidConfig {
                message: format!("AZURE_SYNC_VERBOSE must be an integer 0-2, got {v:?}"),
            })?,
            Err(_) => 0,
        };

        let log_stdout = bool_var("AZURE_SYNC_STDOUT", true)?;
        let log_syslog = bool_var("AZURE_SYNC_SYSLOG", false)?;

        Ok(Self {
            account,
            key,
            container,
            write_prefix,
            no_write,
            verbose,
            log_stdout,
            log_syslog,
        })
    }
}

fn require_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::InvalidConfig {
        message: format!("missing required environment variable {name}"),
    })
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::InvalidConfig {
                message: format!("{name} must be a boolean, got {other:?}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "AZURE_STORAGE_ACCOUNT",
            "AZURE_STORAGE_KEY",
            "AZURE_SYNC_CONTAINER",
            "AZURE_SYNC_WRITE_PREFIX",
            "AZURE_SYNC_NOWRITE",
            "AZURE_SYNC_VERBOSE",
            "AZURE_SYNC_STDOUT",
            "AZURE_SYNC_SYSLOG",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_container_is_invalid_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("AZURE_STORAGE_ACCOUNT", "acct");
            std::env::set_var("AZURE_STORAGE_KEY", "key");
        }
        let err = SyncConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        clear_all();
    }

    #[test]
    fn defaults_are_applied() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("AZURE_STORAGE_ACCOUNT", "acct");
            std::env::set_var("AZURE_STORAGE_KEY", "key");
            std::env::set_var("AZURE_SYNC_CONTAINER", "container");
        }
        let cfg = SyncConfig::from_env().unwrap();
        assert_eq!(cfg.write_prefix, PathBuf::from("/tmp/azure-sync-writes"));
        assert!(!cfg.no_write);
        assert_eq!(cfg.verbose, 0);
        assert!(cfg.log_stdout);
        assert!(!cfg.log_syslog);
        clear_all();
    }

    #[test]
    fn nowrite_is_true_for_any_nonempty_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("AZURE_STORAGE_ACCOUNT", "acct");
            std::env::set_var("AZURE_STORAGE_KEY", "key");
            std::env::set_var("AZURE_SYNC_CONTAINER", "container");
            std::env::set_var("AZURE_SYNC_NOWRITE", "1");
        }
        let cfg = SyncConfig::from_env().unwrap();
        assert!(cfg.no_write);
        clear_all();
    }
}
