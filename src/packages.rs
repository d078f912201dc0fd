// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use deno_semver::package::PackageNv;
use deno_semver::package::PackageReq;
use deno_semver::Version;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::source::CacheSetting;

pub static DEFAULT_JSR_URL: Lazy<Url> =
  Lazy::new(|| Url::parse("https://jsr.io").unwrap());

/// Metadata about the published versions of a registry package.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct JsrPackageInfo {
  pub versions: HashMap<Version, JsrPackageInfoVersion>,
}

fn is_false(v: &bool) -> bool {
  !v
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct JsrPackageInfoVersion {
  #[serde(default, skip_serializing_if = "is_false")]
  pub yanked: bool,
}

/// Metadata about a concrete version of a registry package.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct JsrPackageVersionInfo {
  // ensure the fields on here are resilient to change
  #[serde(default)]
  pub exports: serde_json::Value,
}

impl JsrPackageVersionInfo {
  /// Resolves the provided export key.
  ///
  /// Note: This assumes the provided export name is normalized
  /// (`"."` or `"./sub/path"`).
  pub fn export(&self, export_name: &str) -> Option<&str> {
    match &self.exports {
      serde_json::Value::String(value) => {
        if export_name == "." {
          Some(value.as_str())
        } else {
          None
        }
      }
      serde_json::Value::Object(map) => match map.get(export_name) {
        Some(serde_json::Value::String(value)) => Some(value.as_str()),
        _ => None,
      },
      _ => None,
    }
  }

  /// Gets the keys and values of the exports map.
  pub fn exports(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
    match &self.exports {
      serde_json::Value::String(value) => {
        Box::new(std::iter::once((".", value.as_str())))
      }
      serde_json::Value::Object(map) => {
        Box::new(map.iter().filter_map(|(key, value)| match value {
          serde_json::Value::String(value) => {
            Some((key.as_str(), value.as_str()))
          }
          _ => None,
        }))
      }
      _ => Box::new(std::iter::empty()),
    }
  }
}

/// A locally materialized npm package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpmPackageFolder {
  pub nv: PackageNv,
  /// Root folder of the extracted package (the directory containing its
  /// package.json).
  pub folder: PathBuf,
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
  #[error("Package '{0}' not found in the registry")]
  PackageNotFound(String),
  #[error("Could not find a version matching '{0}'")]
  VersionNotFound(PackageReq),
  #[error(
    "Package '{0}' is not cached and only cached data is allowed. Run with network access to populate the cache."
  )]
  NotCached(String),
  #[error(
    "Registry resolution is not supported by this workspace. Provide a registry loader when creating the workspace."
  )]
  NotSupported,
  #[error("Failed loading registry data for '{name}': {message}")]
  LoadFailed { name: String, message: String },
  #[error(transparent)]
  Other(Arc<dyn std::error::Error + Send + Sync>),
}

/// Capability that materializes registry packages on request. The actual
/// network and installation mechanics live behind this trait; the engine
/// only consumes the results.
#[async_trait(?Send)]
pub trait RegistryLoader: std::fmt::Debug {
  /// Loads version metadata for a jsr package.
  async fn load_jsr_package_info(
    &self,
    name: &str,
    cache_setting: CacheSetting,
  ) -> Result<Arc<JsrPackageInfo>, RegistryError>;

  /// Loads the exports manifest for a concrete jsr package version.
  async fn load_jsr_version_info(
    &self,
    nv: &PackageNv,
    cache_setting: CacheSetting,
  ) -> Result<Arc<JsrPackageVersionInfo>, RegistryError>;

  /// Makes an npm package available on the local file system, returning
  /// the folder it was materialized into. Version selection follows the
  /// registry's own rules unless a concrete version is requested.
  async fn ensure_npm_package(
    &self,
    req: &PackageReq,
    maybe_locked: Option<&PackageNv>,
    cache_setting: CacheSetting,
  ) -> Result<NpmPackageFolder, RegistryError>;
}

/// Default registry loader for workspaces without registry support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRegistryLoader;

#[async_trait(?Send)]
impl RegistryLoader for NullRegistryLoader {
  async fn load_jsr_package_info(
    &self,
    _name: &str,
    _cache_setting: CacheSetting,
  ) -> Result<Arc<JsrPackageInfo>, RegistryError> {
    Err(RegistryError::NotSupported)
  }

  async fn load_jsr_version_info(
    &self,
    _nv: &PackageNv,
    _cache_setting: CacheSetting,
  ) -> Result<Arc<JsrPackageVersionInfo>, RegistryError> {
    Err(RegistryError::NotSupported)
  }

  async fn ensure_npm_package(
    &self,
    _req: &PackageReq,
    _maybe_locked: Option<&PackageNv>,
    _cache_setting: CacheSetting,
  ) -> Result<NpmPackageFolder, RegistryError> {
    Err(RegistryError::NotSupported)
  }
}

/// An in-memory registry loader where packages are provided ahead of
/// time. Useful for testing; "materialized" npm folders are whatever
/// paths were registered.
#[derive(Debug, Default)]
pub struct MemoryRegistryLoader {
  jsr_packages: HashMap<String, Arc<JsrPackageInfo>>,
  jsr_version_infos: HashMap<PackageNv, Arc<JsrPackageVersionInfo>>,
  npm_packages: HashMap<String, BTreeMap<Version, PathBuf>>,
}

impl MemoryRegistryLoader {
  pub fn add_jsr_package(
    &mut self,
    name: impl AsRef<str>,
    versions: impl IntoIterator<Item = Version>,
  ) {
    self.jsr_packages.insert(
      name.as_ref().to_string(),
      Arc::new(JsrPackageInfo {
        versions: versions
          .into_iter()
          .map(|v| (v, JsrPackageInfoVersion::default()))
          .collect(),
      }),
    );
  }

  pub fn add_jsr_version_info(
    &mut self,
    nv: PackageNv,
    exports: serde_json::Value,
  ) {
    self
      .jsr_version_infos
      .insert(nv, Arc::new(JsrPackageVersionInfo { exports }));
  }

  pub fn add_npm_package(&mut self, nv: PackageNv, folder: PathBuf) {
    self
      .npm_packages
      .entry(nv.name.to_string())
      .or_default()
      .insert(nv.version, folder);
  }
}

#[async_trait(?Send)]
impl RegistryLoader for MemoryRegistryLoader {
  async fn load_jsr_package_info(
    &self,
    name: &str,
    _cache_setting: CacheSetting,
  ) -> Result<Arc<JsrPackageInfo>, RegistryError> {
    self
      .jsr_packages
      .get(name)
      .cloned()
      .ok_or_else(|| RegistryError::PackageNotFound(name.to_string()))
  }

  async fn load_jsr_version_info(
    &self,
    nv: &PackageNv,
    _cache_setting: CacheSetting,
  ) -> Result<Arc<JsrPackageVersionInfo>, RegistryError> {
    self
      .jsr_version_infos
      .get(nv)
      .cloned()
      .ok_or_else(|| RegistryError::PackageNotFound(nv.to_string()))
  }

  async fn ensure_npm_package(
    &self,
    req: &PackageReq,
    maybe_locked: Option<&PackageNv>,
    _cache_setting: CacheSetting,
  ) -> Result<NpmPackageFolder, RegistryError> {
    let versions = self
      .npm_packages
      .get(req.name.as_str())
      .ok_or_else(|| RegistryError::PackageNotFound(req.name.to_string()))?;
    let version = match maybe_locked {
      Some(locked) => versions
        .keys()
        .find(|v| **v == locked.version)
        .ok_or_else(|| RegistryError::VersionNotFound(req.clone()))?,
      None => resolve_version(req, versions.keys())
        .ok_or_else(|| RegistryError::VersionNotFound(req.clone()))?,
    };
    Ok(NpmPackageFolder {
      nv: PackageNv {
        name: req.name.clone(),
        version: version.clone(),
      },
      folder: versions.get(version).unwrap().clone(),
    })
  }
}

/// Selects the highest version matching the requirement.
pub fn resolve_version<'a>(
  req: &PackageReq,
  versions: impl Iterator<Item = &'a Version>,
) -> Option<&'a Version> {
  versions
    .filter(|v| req.version_req.matches(v))
    .max()
}

/// Registry package state recorded in a module graph: which requirements
/// have been resolved to which concrete versions, and where the content
/// of those versions lives.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackageSpecifiers {
  #[serde(flatten)]
  package_reqs: BTreeMap<PackageReq, PackageNv>,
  #[serde(skip_serializing)]
  jsr_version_infos: BTreeMap<PackageNv, Arc<JsrPackageVersionInfo>>,
  #[serde(skip_serializing)]
  npm_folders: BTreeMap<PackageNv, PathBuf>,
}

impl PackageSpecifiers {
  pub fn is_empty(&self) -> bool {
    self.package_reqs.is_empty()
  }

  pub fn add_nv(&mut self, package_req: PackageReq, nv: PackageNv) {
    self.package_reqs.insert(package_req, nv);
  }

  /// Gets the concrete version a requirement was resolved to, if any
  /// prior resolution recorded one.
  pub fn mapping(&self, package_req: &PackageReq) -> Option<&PackageNv> {
    self.package_reqs.get(package_req)
  }

  pub fn mappings(
    &self,
  ) -> impl Iterator<Item = (&PackageReq, &PackageNv)> {
    self.package_reqs.iter()
  }

  pub fn add_jsr_version_info(
    &mut self,
    nv: PackageNv,
    info: Arc<JsrPackageVersionInfo>,
  ) {
    self.jsr_version_infos.insert(nv, info);
  }

  pub fn jsr_version_info(
    &self,
    nv: &PackageNv,
  ) -> Option<&Arc<JsrPackageVersionInfo>> {
    self.jsr_version_infos.get(nv)
  }

  pub fn add_npm_folder(&mut self, nv: PackageNv, folder: PathBuf) {
    self.npm_folders.insert(nv, folder);
  }

  pub fn npm_folder(&self, nv: &PackageNv) -> Option<&PathBuf> {
    self.npm_folders.get(nv)
  }
}
