//! Keyserver Config

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};

use crate::commands::resolve_datadir_path;
use crate::error::{Error, ErrorKind};

/// Keyserver Configuration
///
/// Every field is `Option<T>` to enable distinguishing between an operator relying on a
/// default value (which may change over time), and an operator explicitly configuring an
/// option with the current default value (which should be preserved).
#[derive(Clone, Debug, Default, Deserialize, Serialize, DocumentedFields)]
#[serde(default, deny_unknown_fields)]
pub struct KeyServerConfig {
    /// The keyserver's data directory.
    ///
    /// This cannot be set in a config file; it must be provided on the command line, and
    /// is set to `None` until `EntryPoint::process_config` is called.
    #[serde(skip)]
    pub(crate) datadir: Option<PathBuf>,

    /// Settings for how the keyserver stores its data.
    pub database: DatabaseSection,

    /// Settings for diagnosis key retention.
    pub diagnosis_keys: DiagnosisKeysSection,

    /// Settings for server encryption keys and one-time codes.
    pub keys: KeysSection,

    /// Settings for the background maintenance task.
    pub maintenance: MaintenanceSection,
}

impl KeyServerConfig {
    /// Loads a configuration from the given TOML file, or the defaults if `path` is
    /// `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(path).map_err(|e| {
            ErrorKind::Init.context(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            ErrorKind::Init
                .context(format!("invalid config file {}: {e}", path.display()))
                .into()
        })
    }

    /// Returns the path to the keyserver database.
    pub(crate) fn database_path(&self) -> PathBuf {
        match &self.datadir {
            Some(datadir) => resolve_datadir_path(datadir, self.database.path()),
            None => self.database.path().to_path_buf(),
        }
    }
}

/// Settings for how the keyserver stores its data.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Documented, DocumentedFields)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Path to the database file.
    ///
    /// This can be either an absolute path, or a path relative to the data directory.
    /// Note that on Windows, you must either use single quotes for this field's value, or
    /// replace all backslashes `\` with forward slashes `/`.
    pub path: Option<PathBuf>,

    /// How long (in seconds) a request waits for another transaction's write lock before
    /// giving up with a database error.
    pub lock_timeout: Option<u64>,

    /// The maximum number of open database connections.
    pub pool_size: Option<usize>,
}

impl DatabaseSection {
    /// Path to the database file.
    ///
    /// Default is `keyserver.db`.
    fn path(&self) -> &Path {
        self.path
            .as_deref()
            .unwrap_or_else(|| Path::new("keyserver.db"))
    }

    /// How long a request waits for another transaction's write lock.
    ///
    /// Default is 5 seconds.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout.unwrap_or(5))
    }

    /// The maximum number of open database connections.
    ///
    /// Default is 16.
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(16).max(1)
    }
}

/// Settings for diagnosis key retention.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Documented, DocumentedFields)]
#[serde(deny_unknown_fields)]
pub struct DiagnosisKeysSection {
    /// The number of days for which uploaded diagnosis keys are retained, counted in
    /// whole UTC dates back from today.
    pub max_retention_days: Option<u32>,
}

impl DiagnosisKeysSection {
    /// The number of days for which uploaded diagnosis keys are retained.
    ///
    /// Default is 14.
    pub fn max_retention_days(&self) -> u32 {
        self.max_retention_days.unwrap_or(14)
    }
}

/// Settings for server encryption keys and one-time codes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Documented, DocumentedFields)]
#[serde(deny_unknown_fields)]
pub struct KeysSection {
    /// The number of days a server encryption key can be used to decrypt uploads.
    ///
    /// Once claimed, a key's validity is counted from midnight UTC of the day its
    /// one-time code was issued.
    pub encryption_key_validity_days: Option<u32>,

    /// The number of minutes after issuance during which a one-time code can be claimed.
    pub one_time_code_expiry_minutes: Option<u32>,

    /// The number of diagnosis keys a device may upload under one claimed key pair.
    pub initial_remaining_keys: Option<u32>,
}

impl KeysSection {
    /// The number of days a server encryption key can be used to decrypt uploads.
    ///
    /// Default is 15.
    pub fn encryption_key_validity_days(&self) -> u32 {
        self.encryption_key_validity_days.unwrap_or(15)
    }

    /// The number of minutes after issuance during which a one-time code can be claimed.
    ///
    /// Default is 1440 (one day).
    pub fn one_time_code_expiry_minutes(&self) -> u32 {
        self.one_time_code_expiry_minutes.unwrap_or(1440)
    }

    /// The number of diagnosis keys a device may upload under one claimed key pair.
    ///
    /// Default is 28.
    pub fn initial_remaining_keys(&self) -> u32 {
        self.initial_remaining_keys.unwrap_or(28)
    }
}

/// Settings for the background maintenance task.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Documented, DocumentedFields)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceSection {
    /// Seconds between sweeps that delete expired encryption keys and diagnosis keys.
    pub interval: Option<u64>,
}

impl MaintenanceSection {
    /// Time between retention sweeps.
    ///
    /// Default is 3600 seconds (one hour).
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.unwrap_or(3600).max(1))
    }
}

impl KeyServerConfig {
    /// Generates an example config file, with all default values included as comments.
    pub fn generate_example() -> String {
        // Remember to update this as we make changes to the config structure.
        let conf = KeyServerConfig::default();
        let field_defaults = [
            database("path", conf.database.path()),
            database("lock_timeout", conf.database.lock_timeout().as_secs()),
            database("pool_size", conf.database.pool_size() as u64),
            diagnosis_keys(
                "max_retention_days",
                conf.diagnosis_keys.max_retention_days(),
            ),
            keys(
                "encryption_key_validity_days",
                conf.keys.encryption_key_validity_days(),
            ),
            keys(
                "one_time_code_expiry_minutes",
                conf.keys.one_time_code_expiry_minutes(),
            ),
            keys("initial_remaining_keys", conf.keys.initial_remaining_keys()),
            maintenance("interval", conf.maintenance.interval().as_secs()),
        ]
        .into_iter()
        .collect::<HashMap<_, _>>();

        const DATABASE: &str = "database";
        const DIAGNOSIS_KEYS: &str = "diagnosis_keys";
        const KEYS: &str = "keys";
        const MAINTENANCE: &str = "maintenance";
        fn database<T: Serialize>(
            f: &'static str,
            d: T,
        ) -> ((&'static str, &'static str), Option<toml::Value>) {
            field(DATABASE, f, d)
        }
        fn diagnosis_keys<T: Serialize>(
            f: &'static str,
            d: T,
        ) -> ((&'static str, &'static str), Option<toml::Value>) {
            field(DIAGNOSIS_KEYS, f, d)
        }
        fn keys<T: Serialize>(
            f: &'static str,
            d: T,
        ) -> ((&'static str, &'static str), Option<toml::Value>) {
            field(KEYS, f, d)
        }
        fn maintenance<T: Serialize>(
            f: &'static str,
            d: T,
        ) -> ((&'static str, &'static str), Option<toml::Value>) {
            field(MAINTENANCE, f, d)
        }
        fn field<T: Serialize>(
            s: &'static str,
            f: &'static str,
            d: T,
        ) -> ((&'static str, &'static str), Option<toml::Value>) {
            ((s, f), toml::Value::try_from(d).ok())
        }

        let sec_def = |section_name, field_name| {
            field_defaults
                .get(&(section_name, field_name))
                .and_then(|v| v.as_ref())
        };

        let mut config = r"# Default configuration for the keyserver.
#
# This file is generated as an example using the keyserver's current defaults.
# It can be used as a skeleton for custom configs.
#
# Every field is commented out, and set to the current default value that the
# keyserver will use for it (or `UNSET` if the field has no default).
#
# Leaving a field commented out means that the keyserver will always use the
# latest default value, even if it changes in future. Uncommenting a field but
# keeping it set to the current default value means that the keyserver will
# treat it as an operator-configured value going forward.
"
        .to_owned();

        fn write_section<'a, T: Documented + DocumentedFields>(
            config: &mut String,
            section_name: &'static str,
            sec_def: &impl Fn(&'static str, &'static str) -> Option<&'a toml::Value>,
        ) {
            config.push_str("\n#\n");
            write_comment(config, T::DOCS);
            config.push_str(&format!("#\n[{section_name}]\n\n"));

            for field_name in T::FIELD_NAMES {
                write_comment(config, T::get_field_docs(field_name).unwrap_or_default());
                let value = sec_def(section_name, *field_name)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "UNSET".into());
                config.push_str(&format!("#{field_name} = {value}\n\n"));
            }
        }

        fn write_comment(config: &mut String, docs: &str) {
            for line in docs.lines() {
                let line = line.strip_prefix(' ').unwrap_or(line);
                if line.is_empty() {
                    config.push_str("#\n");
                } else {
                    config.push_str(&format!("# {line}\n"));
                }
            }
        }

        for field_name in Self::FIELD_NAMES {
            match *field_name {
                DATABASE => write_section::<DatabaseSection>(&mut config, field_name, &sec_def),
                DIAGNOSIS_KEYS => {
                    write_section::<DiagnosisKeysSection>(&mut config, field_name, &sec_def)
                }
                KEYS => write_section::<KeysSection>(&mut config, field_name, &sec_def),
                MAINTENANCE => {
                    write_section::<MaintenanceSection>(&mut config, field_name, &sec_def)
                }
                // Top-level fields correspond to CLI settings, and cannot be configured
                // via a file.
                _ => (),
            }
        }

        config
    }
}
