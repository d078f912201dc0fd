// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use deno_semver::package::PackageNv;
use deno_semver::package::PackageReq;
use deno_semver::Version;
use serde::Deserialize;
use thiserror::Error;

use crate::source::CacheSetting;

/// The platform modules are being resolved for. This influences which
/// package.json conditions and fields participate in resolution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
  #[default]
  Deno,
  Node,
  Browser,
}

impl Platform {
  pub fn is_browser(&self) -> bool {
    *self == Platform::Browser
  }
}

#[derive(Debug, Error)]
#[error("Unknown platform '{0}'")]
pub struct UnknownPlatformError(pub String);

impl std::str::FromStr for Platform {
  type Err = UnknownPlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "deno" => Ok(Platform::Deno),
      "node" => Ok(Platform::Node),
      "browser" => Ok(Platform::Browser),
      value => Err(UnknownPlatformError(value.to_string())),
    }
  }
}

/// Options for creating a workspace.
///
/// All fields are optional so that embedders forwarding loosely typed
/// option bags do not need to fill in defaults themselves.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceOptions {
  /// Do not do config file discovery.
  #[serde(default)]
  pub no_config: Option<bool>,
  /// Do not respect the lockfile.
  #[serde(default)]
  pub no_lock: Option<bool>,
  /// Path to the config file if you do not want to do config file discovery.
  #[serde(default)]
  pub config_path: Option<String>,
  /// Node resolution conditions to use for resolving package.json exports.
  #[serde(default)]
  pub node_conditions: Option<Vec<String>>,
  #[serde(default)]
  pub platform: Option<Platform>,
  /// Whether to force only using locally cached data, turning any
  /// would-be network fetch into an error.
  #[serde(default)]
  pub cached_only: Option<bool>,
  /// Keep JSX syntax rather than lowering it to factory calls.
  #[serde(default)]
  pub preserve_jsx: Option<bool>,
  /// Return source code as-is without transpiling.
  #[serde(default)]
  pub no_transpile: Option<bool>,
  /// Enable debug logs.
  #[serde(default)]
  pub debug: Option<bool>,
}

/// Where configuration should be loaded from. The workspace resolves this
/// from its options and hands it to the [`ConfigLoader`] collaborator.
#[derive(Debug, Clone)]
pub enum ConfigDiscovery {
  Disabled,
  Path(PathBuf),
  DiscoverCwd,
}

#[derive(Debug, Error)]
#[error("Failed loading configuration{}", .path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
pub struct ConfigLoadError {
  pub path: Option<PathBuf>,
  #[source]
  pub source: std::io::Error,
}

/// Collaborator that discovers and parses on-disk configuration. The
/// engine only ever consumes the already resolved [`ConfigData`]; the file
/// formats involved are the embedder's concern.
pub trait ConfigLoader: std::fmt::Debug {
  fn load(
    &self,
    discovery: &ConfigDiscovery,
    cwd: &Path,
  ) -> Result<ConfigData, ConfigLoadError>;
}

/// Default config loader that provides no configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConfigLoader;

impl ConfigLoader for NoConfigLoader {
  fn load(
    &self,
    _discovery: &ConfigDiscovery,
    _cwd: &Path,
  ) -> Result<ConfigData, ConfigLoadError> {
    Ok(ConfigData::default())
  }
}

/// Already-resolved configuration values produced by a [`ConfigLoader`].
#[derive(Debug, Default, Clone)]
pub struct ConfigData {
  pub node_conditions: Option<Vec<String>>,
  pub lockfile: Option<LockfileData>,
}

/// Lockfile-derived data: concrete version pins for registry package
/// requirements and integrity checksums for remote specifiers.
#[derive(Debug, Default, Clone)]
pub struct LockfileData {
  pub packages: BTreeMap<PackageReq, Version>,
  /// Lower-cased hex sha-256 checksums keyed by remote specifier.
  pub remote_checksums: HashMap<String, String>,
}

/// Immutable, resolved configuration for a workspace. Created once per
/// workspace and shared by every loader it creates.
#[derive(Debug, Default, Clone)]
pub struct ConfigContext {
  /// User supplied resolution conditions, in priority order.
  pub conditions: Vec<String>,
  pub platform: Platform,
  pub cached_only: bool,
  pub preserve_jsx: bool,
  pub no_transpile: bool,
  pub debug: bool,
  pub lockfile: LockfileData,
}

impl ConfigContext {
  pub fn from_options_and_data(
    options: &WorkspaceOptions,
    data: ConfigData,
  ) -> Self {
    let no_lock = options.no_lock.unwrap_or_default();
    Self {
      conditions: options
        .node_conditions
        .clone()
        .or(data.node_conditions)
        .unwrap_or_default(),
      platform: options.platform.unwrap_or_default(),
      cached_only: options.cached_only.unwrap_or_default(),
      preserve_jsx: options.preserve_jsx.unwrap_or_default(),
      no_transpile: options.no_transpile.unwrap_or_default(),
      debug: options.debug.unwrap_or_default(),
      lockfile: if no_lock {
        LockfileData::default()
      } else {
        data.lockfile.unwrap_or_default()
      },
    }
  }

  pub fn cache_setting(&self) -> CacheSetting {
    if self.cached_only {
      CacheSetting::Only
    } else {
      CacheSetting::Use
    }
  }

  /// A version pin for the package requirement, when the lockfile has one.
  pub fn locked_version(&self, req: &PackageReq) -> Option<PackageNv> {
    let version = self.lockfile.packages.get(req)?;
    Some(PackageNv {
      name: req.name.clone(),
      version: version.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_context_from_options() {
    let options = WorkspaceOptions {
      node_conditions: Some(vec!["development".to_string()]),
      cached_only: Some(true),
      ..Default::default()
    };
    let config =
      ConfigContext::from_options_and_data(&options, ConfigData::default());
    assert_eq!(config.conditions, vec!["development".to_string()]);
    assert!(config.cached_only);
    assert_eq!(config.cache_setting(), CacheSetting::Only);
    assert!(!config.preserve_jsx);
  }

  #[test]
  fn test_no_lock_discards_lockfile() {
    let mut packages = BTreeMap::new();
    packages.insert(
      PackageReq::from_str("foo@1").unwrap(),
      Version::parse_standard("1.0.0").unwrap(),
    );
    let data = ConfigData {
      node_conditions: None,
      lockfile: Some(LockfileData {
        packages,
        remote_checksums: Default::default(),
      }),
    };
    let options = WorkspaceOptions {
      no_lock: Some(true),
      ..Default::default()
    };
    let config = ConfigContext::from_options_and_data(&options, data.clone());
    assert!(config.lockfile.packages.is_empty());

    let options = WorkspaceOptions::default();
    let config = ConfigContext::from_options_and_data(&options, data);
    assert_eq!(
      config
        .locked_version(&PackageReq::from_str("foo@1").unwrap())
        .unwrap()
        .version,
      Version::parse_standard("1.0.0").unwrap()
    );
  }

  #[test]
  fn test_platform_from_str() {
    assert_eq!("browser".parse::<Platform>().unwrap(), Platform::Browser);
    assert_eq!("node".parse::<Platform>().unwrap(), Platform::Node);
    assert!("electron".parse::<Platform>().is_err());
  }
}
