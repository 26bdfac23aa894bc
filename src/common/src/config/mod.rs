use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "asset-gc.toml";

/// Prefix of environment variable overrides, e.g.
/// `ASSET_GC__COLLECTOR__DRY_RUN=true`.
pub const ENV_PREFIX: &str = "ASSET_GC__";

/// Which artifact stores a collection run covers.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Only the asset bucket.
    #[serde(alias = "s3")]
    #[value(alias = "s3")]
    Objects,
    /// Only the managed image repositories.
    #[serde(alias = "ecr")]
    #[value(alias = "ecr")]
    Images,
    /// Both stores.
    #[default]
    #[serde(alias = "all")]
    #[value(alias = "all")]
    Both,
}

impl StoreKind {
    pub fn includes_objects(self) -> bool {
        matches!(self, StoreKind::Objects | StoreKind::Both)
    }

    pub fn includes_images(self) -> bool {
        matches!(self, StoreKind::Images | StoreKind::Both)
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Objects => write!(f, "objects"),
            StoreKind::Images => write!(f, "images"),
            StoreKind::Both => write!(f, "both"),
        }
    }
}

/// The resolved environment a run operates against.
///
/// Credentials and bootstrap lookups happen outside the collector; these are
/// the already-resolved identifiers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Account identifier.
    ///
    /// Env: ASSET_GC__ENVIRONMENT__ACCOUNT
    #[serde(default)]
    pub account: Option<String>,

    /// Region name.
    ///
    /// Env: ASSET_GC__ENVIRONMENT__REGION
    #[serde(default)]
    pub region: Option<String>,

    /// Name of the asset bucket. Required when objects are collected.
    ///
    /// Env: ASSET_GC__ENVIRONMENT__BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
}

impl EnvironmentConfig {
    /// Scope string identifying this environment, used for run exclusion.
    pub fn scope(&self) -> String {
        format!(
            "{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region")
        )
    }
}

/// Collector behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Stores to collect.
    ///
    /// Env: ASSET_GC__COLLECTOR__STORE_KIND
    #[serde(default)]
    pub store_kind: StoreKind,

    /// Report what would happen without tagging or deleting anything.
    ///
    /// Env: ASSET_GC__COLLECTOR__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,

    /// Days an artifact must stay tombstoned before it is deleted.
    ///
    /// Env: ASSET_GC__COLLECTOR__IN_ISOLATION_FOR_DAYS
    #[serde(default = "default_in_isolation_for_days")]
    pub in_isolation_for_days: u32,

    /// Tag key marking an image repository as managed by this tooling.
    ///
    /// Env: ASSET_GC__COLLECTOR__MANAGED_REPOSITORY_TAG_KEY
    #[serde(default = "default_managed_repository_tag_key")]
    pub managed_repository_tag_key: String,

    /// Tag value marking an image repository as managed by this tooling.
    ///
    /// Env: ASSET_GC__COLLECTOR__MANAGED_REPOSITORY_TAG_VALUE
    #[serde(default = "default_managed_repository_tag_value")]
    pub managed_repository_tag_value: String,

    /// Repositories processed concurrently.
    ///
    /// Env: ASSET_GC__COLLECTOR__REPOSITORY_CONCURRENCY
    #[serde(default = "default_repository_concurrency")]
    pub repository_concurrency: usize,

    /// Digests per batched image delete.
    ///
    /// Env: ASSET_GC__COLLECTOR__DELETE_BATCH_SIZE
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Lock file guarding against concurrent runs. No lock when unset.
    ///
    /// Env: ASSET_GC__COLLECTOR__LOCK_FILE
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

fn default_in_isolation_for_days() -> u32 {
    7
}

fn default_managed_repository_tag_key() -> String {
    "awscdk:asset".to_string()
}

fn default_managed_repository_tag_value() -> String {
    "true".to_string()
}

fn default_repository_concurrency() -> usize {
    4
}

fn default_delete_batch_size() -> usize {
    100 // Registry batch-delete ceiling
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            store_kind: StoreKind::default(),
            dry_run: false,
            in_isolation_for_days: default_in_isolation_for_days(),
            managed_repository_tag_key: default_managed_repository_tag_key(),
            managed_repository_tag_value: default_managed_repository_tag_value(),
            repository_concurrency: default_repository_concurrency(),
            delete_batch_size: default_delete_batch_size(),
            lock_file: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Resolved target environment
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Collection behaviour
    #[serde(default)]
    pub collector: CollectorSettings,
}

impl Configuration {
    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load defaults, then `asset-gc.toml` if present, then env overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Load defaults, then the given TOML file, then env overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.collector.store_kind, StoreKind::Both);
        assert!(!config.collector.dry_run);
        assert_eq!(config.collector.in_isolation_for_days, 7);
        assert_eq!(config.collector.managed_repository_tag_key, "awscdk:asset");
        assert_eq!(config.collector.managed_repository_tag_value, "true");
        assert_eq!(config.collector.delete_batch_size, 100);
        assert!(config.environment.bucket.is_none());
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.collector.repository_concurrency, 4);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gc.toml",
                r#"
                [environment]
                account = "123456789012"
                region = "eu-west-1"
                bucket = "cdk-assets"

                [collector]
                store_kind = "s3"
                in_isolation_for_days = 30
                "#,
            )?;
            jail.set_env("ASSET_GC__COLLECTOR__DRY_RUN", "true");
            jail.set_env("ASSET_GC__COLLECTOR__IN_ISOLATION_FOR_DAYS", "14");

            let config = Configuration::load_from_path(Path::new("gc.toml")).map_err(|e| *e)?;

            assert_eq!(config.environment.bucket.as_deref(), Some("cdk-assets"));
            assert_eq!(config.environment.scope(), "123456789012/eu-west-1");
            assert_eq!(config.collector.store_kind, StoreKind::Objects);
            assert!(config.collector.dry_run);
            assert_eq!(config.collector.in_isolation_for_days, 14);
            Ok(())
        });
    }

    #[test]
    fn test_store_kind_aliases() {
        Jail::expect_with(|jail| {
            jail.set_env("ASSET_GC__COLLECTOR__STORE_KIND", "ecr");
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.collector.store_kind, StoreKind::Images);
            assert!(config.collector.store_kind.includes_images());
            assert!(!config.collector.store_kind.includes_objects());
            Ok(())
        });
    }

    #[test]
    fn test_unknown_scope_parts() {
        let env = EnvironmentConfig::default();
        assert_eq!(env.scope(), "unknown-account/unknown-region");
    }
}
