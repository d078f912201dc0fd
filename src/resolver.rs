// Copyright 2018-2025 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use deno_semver::jsr::JsrPackageReqReference;
use deno_semver::npm::NpmPackageReqReference;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::Serialize;
use sys_traits::FsMetadata;
use sys_traits::FsRead;
use thiserror::Error;

use crate::config::ConfigContext;
use crate::graph::ModuleGraph;
use crate::module_specifier::is_relative_specifier;
use crate::module_specifier::resolve_import;
use crate::module_specifier::ModuleSpecifier;
use crate::module_specifier::SpecifierError;
use crate::packages::RegistryError;
use crate::packages::DEFAULT_JSR_URL;

/// Kind of resolution being done.
///
/// The ordinals are part of the public interface and must never change.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ResolutionMode {
  /// Resolving from an ES module.
  Import = 0,
  /// Resolving from a CJS module.
  Require = 1,
}

impl ResolutionMode {
  pub fn as_u8(&self) -> u8 {
    *self as u8
  }

  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(ResolutionMode::Import),
      1 => Some(ResolutionMode::Require),
      _ => None,
    }
  }

  fn condition(&self) -> &'static str {
    match self {
      ResolutionMode::Import => "import",
      ResolutionMode::Require => "require",
    }
  }
}

/// Extensions probed for a path specifier resolved in `Import` mode when
/// the exact path does not exist. The order is part of the resolution
/// contract.
const IMPORT_EXTENSIONS: &[&str] =
  &[".ts", ".tsx", ".mts", ".js", ".jsx", ".mjs", ".json"];
/// Extensions probed in `Require` mode, CommonJS style. The order is part
/// of the resolution contract.
const REQUIRE_EXTENSIONS: &[&str] = &[".js", ".cjs", ".json", ".ts", ".cts"];
/// Index files probed for a directory in `Require` mode.
const REQUIRE_INDEX_FILES: &[&str] =
  &["index.js", "index.cjs", "index.json", "index.ts", "index.cts"];

static NODE_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from([
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "dns/promises",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "readline/promises",
    "repl",
    "stream",
    "stream/consumers",
    "stream/promises",
    "stream/web",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "util/types",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
  ])
});

/// Whether the name is a Node runtime built-in module name (without a
/// `node:` prefix).
pub fn is_builtin_node_module(name: &str) -> bool {
  NODE_BUILTINS.contains(name)
}

/// The closed set of resolution error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveErrorCode {
  ModuleNotFound,
  PackagePathNotExported,
  PackageImportNotDefined,
  UnsupportedScheme,
  InvalidSpecifier,
  NotCached,
}

impl ResolveErrorCode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ModuleNotFound => "ERR_MODULE_NOT_FOUND",
      Self::PackagePathNotExported => "ERR_PACKAGE_PATH_NOT_EXPORTED",
      Self::PackageImportNotDefined => "ERR_PACKAGE_IMPORT_NOT_DEFINED",
      Self::UnsupportedScheme => "ERR_UNSUPPORTED_SCHEME",
      Self::InvalidSpecifier => "ERR_INVALID_SPECIFIER",
      Self::NotCached => "ERR_NOT_CACHED",
    }
  }
}

impl std::fmt::Display for ResolveErrorCode {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A fatal resolution failure.
///
/// Always carries the specifier as it was originally requested, not an
/// intermediate candidate produced during the search.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct ResolveError {
  /// The originally requested specifier.
  pub specifier: String,
  pub maybe_referrer: Option<ModuleSpecifier>,
  /// True when the failing specifier is reachable only through a
  /// dependency edge marked optional by its declaring package.
  pub is_optional_dependency: bool,
  pub kind: ResolveErrorKind,
}

impl ResolveError {
  pub fn code(&self) -> ResolveErrorCode {
    self.kind.code()
  }
}

#[derive(Debug, Clone, Error)]
pub enum ResolveErrorKind {
  #[error("Module not found \"{0}\".")]
  ModuleNotFound(String),
  #[error(
    "Package subpath '{subpath}' is not defined by \"exports\" in {}",
    .package_json_path.display()
  )]
  PackagePathNotExported {
    subpath: String,
    package_json_path: PathBuf,
  },
  #[error(
    "Package import specifier \"{specifier}\" is not defined{}",
    .maybe_package_json_path.as_ref().map(|p| format!(" in package {}", p.display())).unwrap_or_default()
  )]
  PackageImportNotDefined {
    specifier: String,
    maybe_package_json_path: Option<PathBuf>,
  },
  #[error("Unsupported scheme '{0}:'")]
  UnsupportedScheme(String),
  #[error(transparent)]
  InvalidSpecifier(Arc<SpecifierError>),
  #[error(
    "Specifier not found in cache: \"{0}\", --cached-only is specified."
  )]
  NotCached(String),
  #[error("Invalid package specifier '{specifier}': {message}")]
  InvalidPackageSpecifier { specifier: String, message: String },
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error("Failed converting path to specifier: {0}")]
  PathToUrl(String),
}

impl ResolveErrorKind {
  pub fn code(&self) -> ResolveErrorCode {
    match self {
      Self::ModuleNotFound(_) => ResolveErrorCode::ModuleNotFound,
      Self::PackagePathNotExported { .. } => {
        ResolveErrorCode::PackagePathNotExported
      }
      Self::PackageImportNotDefined { .. } => {
        ResolveErrorCode::PackageImportNotDefined
      }
      Self::UnsupportedScheme(_) => ResolveErrorCode::UnsupportedScheme,
      Self::InvalidSpecifier(_)
      | Self::InvalidPackageSpecifier { .. }
      | Self::PathToUrl(_) => ResolveErrorCode::InvalidSpecifier,
      Self::NotCached(_) => ResolveErrorCode::NotCached,
      Self::Registry(err) => match err {
        RegistryError::NotCached(_) => ResolveErrorCode::NotCached,
        _ => ResolveErrorCode::ModuleNotFound,
      },
    }
  }
}

/// A package.json, reduced to the fields resolution consumes.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
  pub name: Option<String>,
  pub main: Option<String>,
  /// The `browser` field. Only a string form (an alternative main) is
  /// honored; the object remapping form is ignored.
  pub browser: Option<serde_json::Value>,
  pub exports: Option<serde_json::Value>,
  pub imports: Option<serde_json::Value>,
  pub dependencies: Option<HashMap<String, String>>,
  pub peer_dependencies: Option<HashMap<String, String>>,
  pub optional_dependencies: Option<HashMap<String, String>>,
  pub peer_dependencies_meta: Option<serde_json::Value>,
}

/// Maps `(raw specifier, referrer, mode)` to a canonical specifier.
///
/// All lookups are computed from the file system and the provided module
/// graph state. This type never performs network or registry work; the
/// asynchronous on-demand path in the loader materializes registry
/// packages before re-entering this resolver.
#[derive(Debug)]
pub struct SpecifierResolver<TSys: FsRead + FsMetadata + Clone> {
  sys: TSys,
  config: Rc<ConfigContext>,
  pkg_json_cache: RefCell<HashMap<PathBuf, Option<Rc<PackageJson>>>>,
}

impl<TSys: FsRead + FsMetadata + Clone> SpecifierResolver<TSys> {
  pub fn new(sys: TSys, config: Rc<ConfigContext>) -> Self {
    Self {
      sys,
      config,
      pkg_json_cache: Default::default(),
    }
  }

  /// Resolves a specifier against a referrer, consulting the module graph
  /// for registry package state.
  pub fn resolve(
    &self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveError> {
    log::debug!(
      "Resolving '{}' from '{}' ({})",
      specifier_text,
      referrer,
      mode.condition()
    );
    self
      .resolve_inner(specifier_text, referrer, mode, graph)
      .map_err(|kind| self.create_error(kind, specifier_text, referrer))
  }

  fn create_error(
    &self,
    kind: ResolveErrorKind,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
  ) -> ResolveError {
    let is_optional_dependency = match &kind {
      ResolveErrorKind::ModuleNotFound(_)
      | ResolveErrorKind::Registry(_)
      | ResolveErrorKind::NotCached(_) => {
        self.is_optional_dep(specifier_text, referrer)
      }
      _ => false,
    };
    ResolveError {
      specifier: specifier_text.to_string(),
      maybe_referrer: Some(referrer.clone()),
      is_optional_dependency,
      kind,
    }
  }

  fn resolve_inner(
    &self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    if is_relative_specifier(specifier_text) {
      return self.resolve_path(specifier_text, referrer, mode);
    }
    if let Some(import_specifier) = specifier_text.strip_prefix('#') {
      return self.resolve_package_import(
        import_specifier,
        specifier_text,
        referrer,
        mode,
        graph,
      );
    }
    if let Ok(url) = ModuleSpecifier::parse(specifier_text) {
      return self.resolve_url(url, specifier_text, mode, graph);
    }
    self.resolve_bare(specifier_text, referrer, mode, graph)
  }

  fn resolve_url(
    &self,
    url: ModuleSpecifier,
    specifier_text: &str,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    match url.scheme() {
      "file" => self.probe_fs(url, mode),
      "http" | "https" | "data" => Ok(url),
      // runtime built-ins always resolve to themselves
      "node" => Ok(url),
      "npm" => {
        let req_ref =
          NpmPackageReqReference::from_specifier(&url).map_err(|err| {
            ResolveErrorKind::InvalidPackageSpecifier {
              specifier: specifier_text.to_string(),
              message: err.to_string(),
            }
          })?;
        self.resolve_npm_graph_bound(&req_ref, specifier_text, mode, graph)
      }
      "jsr" => {
        let req_ref =
          JsrPackageReqReference::from_specifier(&url).map_err(|err| {
            ResolveErrorKind::InvalidPackageSpecifier {
              specifier: specifier_text.to_string(),
              message: err.to_string(),
            }
          })?;
        self.resolve_jsr_graph_bound(&req_ref, specifier_text, graph)
      }
      scheme => Err(ResolveErrorKind::UnsupportedScheme(scheme.to_string())),
    }
  }

  fn resolve_path(
    &self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
    mode: ResolutionMode,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    let url = resolve_import(specifier_text, referrer)
      .map_err(|err| ResolveErrorKind::InvalidSpecifier(Arc::new(err)))?;
    if url.scheme() == "file" {
      self.probe_fs(url, mode)
    } else {
      // remote relative imports are plain url joins
      Ok(url)
    }
  }

  /// Resolves a file url against the file system: an exact match is
  /// preferred, then a mode dependent list of extensions is probed, and in
  /// `Require` mode a directory falls back to its main/index module.
  fn probe_fs(
    &self,
    url: ModuleSpecifier,
    mode: ResolutionMode,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    let path = url_to_file_path(&url)?;
    if self.sys.fs_is_file_no_err(&path) {
      return Ok(url);
    }
    let extensions = match mode {
      ResolutionMode::Import => IMPORT_EXTENSIONS,
      ResolutionMode::Require => REQUIRE_EXTENSIONS,
    };
    for ext in extensions {
      let candidate = append_extension(&path, ext);
      if self.sys.fs_is_file_no_err(&candidate) {
        return file_path_to_url(&candidate);
      }
    }
    if mode == ResolutionMode::Require && self.sys.fs_is_dir_no_err(&path) {
      if let Some(found) = self.resolve_directory(&path)? {
        return Ok(found);
      }
    }
    Err(ResolveErrorKind::ModuleNotFound(url.to_string()))
  }

  /// CommonJS style directory resolution: the package.json `main`, then
  /// index files.
  fn resolve_directory(
    &self,
    dir: &Path,
  ) -> Result<Option<ModuleSpecifier>, ResolveErrorKind> {
    if let Some(pkg_json) = self.package_json(dir) {
      if let Some(main) = self.package_main(&pkg_json) {
        let main_path = dir.join(main);
        if self.sys.fs_is_file_no_err(&main_path) {
          return file_path_to_url(&main_path).map(Some);
        }
        for ext in REQUIRE_EXTENSIONS {
          let candidate = append_extension(&main_path, ext);
          if self.sys.fs_is_file_no_err(&candidate) {
            return file_path_to_url(&candidate).map(Some);
          }
        }
      }
    }
    for index in REQUIRE_INDEX_FILES {
      let candidate = dir.join(index);
      if self.sys.fs_is_file_no_err(&candidate) {
        return file_path_to_url(&candidate).map(Some);
      }
    }
    Ok(None)
  }

  fn package_main<'a>(&self, pkg_json: &'a PackageJson) -> Option<&'a str> {
    if self.config.platform.is_browser() {
      if let Some(serde_json::Value::String(browser)) = &pkg_json.browser {
        return Some(browser.as_str());
      }
    }
    pkg_json.main.as_deref()
  }

  fn resolve_bare(
    &self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    if is_builtin_node_module(specifier_text) {
      let url = ModuleSpecifier::parse(&format!("node:{}", specifier_text))
        .map_err(|err| {
          ResolveErrorKind::InvalidSpecifier(Arc::new(
            SpecifierError::InvalidUrl(err),
          ))
        })?;
      return Ok(url);
    }
    if referrer.scheme() != "file" {
      // a bare specifier from a remote module has nothing to search;
      // surface the standard prefix-missing error
      return match resolve_import(specifier_text, referrer) {
        Ok(url) => Ok(url),
        Err(err) => Err(ResolveErrorKind::InvalidSpecifier(Arc::new(err))),
      };
    }
    let (package_name, subpath) = parse_package_specifier(specifier_text);
    let referrer_path = url_to_file_path(referrer)?;
    let mut current = referrer_path.parent();
    while let Some(dir) = current {
      let package_dir = dir.join("node_modules").join(package_name);
      if self.sys.fs_is_dir_no_err(&package_dir) {
        return self.resolve_package_dir_subpath(
          &package_dir,
          subpath,
          mode,
          graph,
        );
      }
      current = dir.parent();
    }
    Err(ResolveErrorKind::ModuleNotFound(specifier_text.to_string()))
  }

  /// Resolves a subpath within a located package directory. When the
  /// package manifest carries an `exports` map that map is authoritative;
  /// otherwise direct path resolution against the package root applies.
  fn resolve_package_dir_subpath(
    &self,
    package_dir: &Path,
    subpath: &str,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    let maybe_pkg_json = self.package_json(package_dir);
    if let Some(pkg_json) = &maybe_pkg_json {
      if let Some(exports) = &pkg_json.exports {
        let normalized = normalize_subpath(subpath);
        let target = self.resolve_exports(
          package_dir,
          exports,
          &normalized,
          mode,
          graph,
        )?;
        return self.finish_export_target(package_dir, target, mode, graph);
      }
    }
    if subpath.is_empty() {
      if let Some(found) = self.resolve_directory(package_dir)? {
        return Ok(found);
      }
      return Err(ResolveErrorKind::ModuleNotFound(
        package_dir.display().to_string(),
      ));
    }
    let target_path = package_dir.join(subpath);
    let url = file_path_to_url(&target_path)?;
    self.probe_fs(url, mode)
  }

  fn finish_export_target(
    &self,
    package_dir: &Path,
    target: ExportTarget,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    match target {
      ExportTarget::PackagePath(relative) => {
        let path = package_dir.join(relative.trim_start_matches("./"));
        // exports targets are exact; no extension probing
        if self.sys.fs_is_file_no_err(&path) {
          file_path_to_url(&path)
        } else {
          Err(ResolveErrorKind::ModuleNotFound(path.display().to_string()))
        }
      }
      ExportTarget::Specifier(text) => {
        // an exports/imports target can point at another package
        let referrer = file_path_to_url(&package_dir.join("package.json"))?;
        self.resolve_inner(&text, &referrer, mode, graph)
      }
    }
  }

  /// Resolves an `exports` map value for a normalized subpath (`"."` or
  /// `"./sub/path"`). Keys are matched exactly first, then by the longest
  /// matching `*` pattern.
  fn resolve_exports(
    &self,
    package_dir: &Path,
    exports: &serde_json::Value,
    subpath: &str,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ExportTarget, ResolveErrorKind> {
    let package_json_path = package_dir.join("package.json");
    let not_exported = || ResolveErrorKind::PackagePathNotExported {
      subpath: subpath.to_string(),
      package_json_path: package_json_path.clone(),
    };

    // a string, array, or conditions-only object is sugar for { ".": .. }
    let is_conditions_sugar = match exports {
      serde_json::Value::Object(map) => {
        !map.keys().any(|k| k.starts_with('.'))
      }
      _ => true,
    };
    if is_conditions_sugar {
      if subpath != "." {
        return Err(not_exported());
      }
      return self
        .resolve_export_value(exports, "", mode)
        .ok_or_else(not_exported);
    }

    let map = match exports {
      serde_json::Value::Object(map) => map,
      _ => return Err(not_exported()),
    };
    if let Some(value) = map.get(subpath) {
      return self
        .resolve_export_value(value, "", mode)
        .ok_or_else(not_exported);
    }
    match find_pattern_match(map, subpath) {
      Some((value, matched)) => self
        .resolve_export_value(value, &matched, mode)
        .ok_or_else(not_exported),
      None => Err(not_exported()),
    }
  }

  /// Resolves a single exports target value: strings are paths or
  /// specifiers, objects are condition maps scanned in their own key
  /// order, arrays are alternatives, and `null` means not exported.
  fn resolve_export_value(
    &self,
    value: &serde_json::Value,
    pattern_match: &str,
    mode: ResolutionMode,
  ) -> Option<ExportTarget> {
    match value {
      serde_json::Value::String(target) => {
        let target = if pattern_match.is_empty() {
          target.clone()
        } else {
          target.replace('*', pattern_match)
        };
        if target.starts_with("./") {
          if has_parent_traversal(&target) {
            None
          } else {
            Some(ExportTarget::PackagePath(target))
          }
        } else {
          Some(ExportTarget::Specifier(target))
        }
      }
      serde_json::Value::Object(conditions) => {
        for (condition, value) in conditions {
          if self.condition_matches(condition, mode) {
            if let Some(target) =
              self.resolve_export_value(value, pattern_match, mode)
            {
              return Some(target);
            }
          }
        }
        None
      }
      serde_json::Value::Array(alternatives) => alternatives
        .iter()
        .find_map(|v| self.resolve_export_value(v, pattern_match, mode)),
      _ => None,
    }
  }

  /// Whether a condition key participates in resolution. The scanning
  /// order is the condition object's own key order; this only decides
  /// membership: `default`, the mode condition, the configured user
  /// conditions, `deno`/`node`, and `browser` on the browser platform.
  fn condition_matches(&self, condition: &str, mode: ResolutionMode) -> bool {
    if condition == "default" || condition == mode.condition() {
      return true;
    }
    if self.config.conditions.iter().any(|c| c == condition) {
      return true;
    }
    match condition {
      "deno" | "node" => true,
      "browser" => self.config.platform.is_browser(),
      _ => false,
    }
  }

  /// Resolves a `#`-prefixed specifier through the closest package.json
  /// `imports` map.
  fn resolve_package_import(
    &self,
    _import_name: &str,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    let not_defined =
      |maybe_path: Option<PathBuf>| ResolveErrorKind::PackageImportNotDefined {
        specifier: specifier_text.to_string(),
        maybe_package_json_path: maybe_path,
      };
    if referrer.scheme() != "file" {
      return Err(not_defined(None));
    }
    let referrer_path = url_to_file_path(referrer)?;
    let Some((package_dir, pkg_json)) =
      self.closest_package_json(&referrer_path)
    else {
      return Err(not_defined(None));
    };
    let package_json_path = package_dir.join("package.json");
    let Some(imports) = &pkg_json.imports else {
      return Err(not_defined(Some(package_json_path)));
    };
    let map = match imports {
      serde_json::Value::Object(map) => map,
      _ => return Err(not_defined(Some(package_json_path))),
    };
    let value_and_match = match map.get(specifier_text) {
      Some(value) => Some((value, String::new())),
      None => find_pattern_match(map, specifier_text),
    };
    let Some((value, pattern_match)) = value_and_match else {
      return Err(not_defined(Some(package_json_path)));
    };
    let target = self
      .resolve_export_value(value, &pattern_match, mode)
      .ok_or_else(|| not_defined(Some(package_json_path)))?;
    self.finish_export_target(&package_dir, target, mode, graph)
  }

  /// Graph-bound (synchronous) registry resolution for `npm:` specifiers.
  /// Succeeds only when prior entrypoint processing or on-demand
  /// resolution materialized the package; never performs I/O beyond the
  /// local file system.
  fn resolve_npm_graph_bound(
    &self,
    req_ref: &NpmPackageReqReference,
    specifier_text: &str,
    mode: ResolutionMode,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    let req = req_ref.req();
    let Some(folder) = graph
      .packages()
      .mapping(req)
      .and_then(|nv| graph.packages().npm_folder(nv))
    else {
      if self.config.cached_only {
        return Err(ResolveErrorKind::NotCached(specifier_text.to_string()));
      }
      return Err(ResolveErrorKind::ModuleNotFound(
        specifier_text.to_string(),
      ));
    };
    self.resolve_package_dir_subpath(
      folder,
      req_ref.sub_path().unwrap_or(""),
      mode,
      graph,
    )
  }

  /// Graph-bound (synchronous) registry resolution for `jsr:` specifiers.
  fn resolve_jsr_graph_bound(
    &self,
    req_ref: &JsrPackageReqReference,
    specifier_text: &str,
    graph: &ModuleGraph,
  ) -> Result<ModuleSpecifier, ResolveErrorKind> {
    let req = req_ref.req();
    let Some(nv) = graph.packages().mapping(req) else {
      if self.config.cached_only {
        return Err(ResolveErrorKind::NotCached(specifier_text.to_string()));
      }
      return Err(ResolveErrorKind::ModuleNotFound(
        specifier_text.to_string(),
      ));
    };
    let Some(version_info) = graph.packages().jsr_version_info(nv) else {
      return Err(ResolveErrorKind::ModuleNotFound(
        specifier_text.to_string(),
      ));
    };
    let export_name = normalize_subpath(req_ref.sub_path().unwrap_or(""));
    let Some(export_path) = version_info.export(&export_name) else {
      return Err(ResolveErrorKind::PackagePathNotExported {
        subpath: export_name,
        package_json_path: PathBuf::from(format!(
          "{}/{}/{}/deno.json",
          DEFAULT_JSR_URL.as_str().trim_end_matches('/'),
          nv.name,
          nv.version,
        )),
      });
    };
    jsr_module_url(nv, export_path)
  }

  /// Walks the package.jsons from the referrer's directory upward and
  /// reports whether the dependency on `specifier_text` is declared
  /// optional (an optional dependency or an optional peer dependency).
  /// The walk inspects the edge that produced the failure, so directory
  /// level package descriptors are taken into account.
  fn is_optional_dep(
    &self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
  ) -> bool {
    let package_name = if specifier_text.starts_with("npm:") {
      match NpmPackageReqReference::from_str(specifier_text) {
        Ok(req_ref) => req_ref.req().name.to_string(),
        Err(_) => return false,
      }
    } else {
      parse_package_specifier(specifier_text).0.to_string()
    };
    if package_name.is_empty() {
      return false;
    }
    let Ok(referrer_path) = deno_path_util::url_to_file_path(referrer) else {
      return false;
    };
    let mut current = referrer_path.parent();
    while let Some(dir) = current {
      if let Some(pkg_json) = self.package_json(dir) {
        if let Some(optional_deps) = &pkg_json.optional_dependencies {
          if optional_deps.contains_key(&package_name) {
            return true;
          }
        }
        if let Some(serde_json::Value::Object(meta)) =
          &pkg_json.peer_dependencies_meta
        {
          if let Some(obj) = meta.get(&package_name) {
            if obj.get("optional").and_then(|v| v.as_bool())
              == Some(true)
            {
              return true;
            }
          }
        }
        if let Some(deps) = &pkg_json.dependencies {
          if deps.contains_key(&package_name) {
            return false;
          }
        }
        if let Some(deps) = &pkg_json.peer_dependencies {
          if deps.contains_key(&package_name) {
            return false;
          }
        }
      }
      current = dir.parent();
    }
    false
  }

  /// Reads and caches the package.json directly inside `dir`, if any.
  fn package_json(&self, dir: &Path) -> Option<Rc<PackageJson>> {
    let path = dir.join("package.json");
    if let Some(cached) = self.pkg_json_cache.borrow().get(&path) {
      return cached.clone();
    }
    let loaded = match self.sys.fs_read_to_string(&path) {
      Ok(text) => match serde_json::from_str::<PackageJson>(&text) {
        Ok(pkg_json) => Some(Rc::new(pkg_json)),
        Err(err) => {
          log::debug!(
            "Ignoring malformed package.json at '{}': {}",
            path.display(),
            err
          );
          None
        }
      },
      Err(_) => None,
    };
    self
      .pkg_json_cache
      .borrow_mut()
      .insert(path, loaded.clone());
    loaded
  }

  /// Finds the closest directory at or above `path` containing a
  /// package.json.
  fn closest_package_json(
    &self,
    path: &Path,
  ) -> Option<(PathBuf, Rc<PackageJson>)> {
    let mut current = path.parent();
    while let Some(dir) = current {
      if let Some(pkg_json) = self.package_json(dir) {
        return Some((dir.to_path_buf(), pkg_json));
      }
      current = dir.parent();
    }
    None
  }
}

/// The result of resolving an exports/imports map value.
enum ExportTarget {
  /// A `./` prefixed path within the declaring package.
  PackagePath(String),
  /// Any other specifier (another package, a url, a builtin).
  Specifier(String),
}

/// Builds the canonical remote url of a module within a registry package
/// version (ex. `https://jsr.io/@scope/name/1.0.0/mod.ts`).
pub(crate) fn jsr_module_url(
  nv: &deno_semver::package::PackageNv,
  export_path: &str,
) -> Result<ModuleSpecifier, ResolveErrorKind> {
  let base = DEFAULT_JSR_URL
    .join(&format!("{}/{}/", nv.name, nv.version))
    .map_err(|err| {
      ResolveErrorKind::InvalidSpecifier(Arc::new(
        SpecifierError::InvalidUrl(err),
      ))
    })?;
  base
    .join(export_path.trim_start_matches("./"))
    .map_err(|err| {
      ResolveErrorKind::InvalidSpecifier(Arc::new(
        SpecifierError::InvalidUrl(err),
      ))
    })
}

/// Finds the longest-prefix `*` pattern key matching the subpath,
/// returning its value and the matched middle segment.
fn find_pattern_match<'a>(
  map: &'a serde_json::Map<String, serde_json::Value>,
  subpath: &str,
) -> Option<(&'a serde_json::Value, String)> {
  let mut best: Option<(usize, &'a serde_json::Value, String)> = None;
  for (key, value) in map {
    let Some(star_index) = key.find('*') else {
      continue;
    };
    let (prefix, suffix) = (&key[..star_index], &key[star_index + 1..]);
    if subpath.len() >= prefix.len() + suffix.len()
      && subpath.starts_with(prefix)
      && subpath.ends_with(suffix)
    {
      let matched =
        subpath[prefix.len()..subpath.len() - suffix.len()].to_string();
      if best
        .as_ref()
        .map(|(best_len, _, _)| prefix.len() > *best_len)
        .unwrap_or(true)
      {
        best = Some((prefix.len(), value, matched));
      }
    }
  }
  best.map(|(_, value, matched)| (value, matched))
}

/// Splits a bare specifier into its package name and subpath.
fn parse_package_specifier(specifier: &str) -> (&str, &str) {
  let name_end = if specifier.starts_with('@') {
    // scoped package: @scope/name[/subpath]
    match specifier.find('/') {
      Some(scope_slash) => specifier[scope_slash + 1..]
        .find('/')
        .map(|i| scope_slash + 1 + i),
      None => None,
    }
  } else {
    specifier.find('/')
  };
  match name_end {
    Some(index) => (&specifier[..index], &specifier[index + 1..]),
    None => (specifier, ""),
  }
}

/// Normalizes a package subpath to an exports map key (`"."` or
/// `"./sub/path"`).
fn normalize_subpath(subpath: &str) -> String {
  if subpath.is_empty() {
    ".".to_string()
  } else {
    format!("./{}", subpath)
  }
}

fn has_parent_traversal(target: &str) -> bool {
  target.split('/').any(|part| part == "..")
}

/// Appends an extension to the full file name (`mod.data` + `.ts` is
/// `mod.data.ts`, never `mod.ts`).
fn append_extension(path: &Path, ext: &str) -> PathBuf {
  let mut s = path.as_os_str().to_os_string();
  s.push(ext);
  PathBuf::from(s)
}

fn url_to_file_path(
  url: &ModuleSpecifier,
) -> Result<PathBuf, ResolveErrorKind> {
  deno_path_util::url_to_file_path(url)
    .map_err(|err| ResolveErrorKind::PathToUrl(err.to_string()))
}

fn file_path_to_url(path: &Path) -> Result<ModuleSpecifier, ResolveErrorKind> {
  deno_path_util::url_from_file_path(path)
    .map_err(|err| ResolveErrorKind::PathToUrl(err.to_string()))
}

#[cfg(test)]
mod tests {
  use std::fs;

  use pretty_assertions::assert_eq;
  use sys_traits::impls::RealSys;

  use super::*;
  use crate::config::Platform;

  fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
  }

  fn resolver(config: ConfigContext) -> SpecifierResolver<RealSys> {
    SpecifierResolver::new(RealSys, Rc::new(config))
  }

  fn resolve_from(
    resolver: &SpecifierResolver<RealSys>,
    specifier: &str,
    referrer_path: &Path,
    mode: ResolutionMode,
  ) -> Result<ModuleSpecifier, ResolveError> {
    let referrer =
      deno_path_util::url_from_file_path(referrer_path).unwrap();
    resolver.resolve(specifier, &referrer, mode, &ModuleGraph::new())
  }

  fn assert_resolves_to(
    result: Result<ModuleSpecifier, ResolveError>,
    root: &Path,
    expected: &str,
  ) {
    let expected =
      deno_path_util::url_from_file_path(&root.join(expected)).unwrap();
    assert_eq!(result.unwrap(), expected);
  }

  #[test]
  fn test_parse_package_specifier() {
    let cases = [
      ("lodash", ("lodash", "")),
      ("lodash/get", ("lodash", "get")),
      ("@types/node", ("@types/node", "")),
      ("@babel/core/lib/index", ("@babel/core", "lib/index")),
    ];
    for (specifier, expected) in cases {
      assert_eq!(parse_package_specifier(specifier), expected);
    }
  }

  #[test]
  fn test_relative_extension_probing() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.ts", "");
    write(root, "b.ts", "");
    write(root, "c.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.ts");

    // exact match wins
    assert_resolves_to(
      resolve_from(&resolver, "./b.ts", &main, ResolutionMode::Import),
      root,
      "b.ts",
    );
    // extensionless probes the import list
    assert_resolves_to(
      resolve_from(&resolver, "./b", &main, ResolutionMode::Import),
      root,
      "b.ts",
    );
    assert_resolves_to(
      resolve_from(&resolver, "./c", &main, ResolutionMode::Import),
      root,
      "c.js",
    );
    let err = resolve_from(&resolver, "./missing", &main, ResolutionMode::Import)
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
    assert_eq!(err.specifier, "./missing");
    assert!(!err.is_optional_dependency);
  }

  #[test]
  fn test_require_directory_fallback() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(root, "lib/index.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.js");

    assert_resolves_to(
      resolve_from(&resolver, "./lib", &main, ResolutionMode::Require),
      root,
      "lib/index.js",
    );
    // import mode has no directory fallback
    let err = resolve_from(&resolver, "./lib", &main, ResolutionMode::Import)
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
  }

  #[test]
  fn test_bare_specifier_exports_conditions() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(
      root,
      "node_modules/pkg/package.json",
      r#"{
        "name": "pkg",
        "exports": {
          ".": { "import": "./esm.js", "require": "./cjs.js" },
          "./feature": "./feature.js"
        }
      }"#,
    );
    write(root, "node_modules/pkg/esm.js", "");
    write(root, "node_modules/pkg/cjs.js", "");
    write(root, "node_modules/pkg/feature.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.js");

    assert_resolves_to(
      resolve_from(&resolver, "pkg", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/esm.js",
    );
    assert_resolves_to(
      resolve_from(&resolver, "pkg", &main, ResolutionMode::Require),
      root,
      "node_modules/pkg/cjs.js",
    );
    assert_resolves_to(
      resolve_from(&resolver, "pkg/feature", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/feature.js",
    );

    let err =
      resolve_from(&resolver, "pkg/other", &main, ResolutionMode::Import)
        .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::PackagePathNotExported);
    assert_eq!(err.specifier, "pkg/other");
    assert!(!err.is_optional_dependency);
  }

  #[test]
  fn test_exports_wildcard_longest_prefix() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(
      root,
      "node_modules/pkg/package.json",
      r#"{
        "exports": {
          "./lib/*": "./src/*.js",
          "./lib/deep/*": "./deep/*.js"
        }
      }"#,
    );
    write(root, "node_modules/pkg/src/util.js", "");
    write(root, "node_modules/pkg/deep/util.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.js");

    assert_resolves_to(
      resolve_from(&resolver, "pkg/lib/util", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/src/util.js",
    );
    // the longer pattern prefix wins
    assert_resolves_to(
      resolve_from(
        &resolver,
        "pkg/lib/deep/util",
        &main,
        ResolutionMode::Import,
      ),
      root,
      "node_modules/pkg/deep/util.js",
    );
  }

  #[test]
  fn test_package_without_exports_falls_back_to_paths() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(
      root,
      "node_modules/open-package/package.json",
      r#"{ "main": "entry.js" }"#,
    );
    write(root, "node_modules/open-package/entry.js", "");
    write(root, "node_modules/open-package/extra.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.js");

    assert_resolves_to(
      resolve_from(&resolver, "open-package", &main, ResolutionMode::Import),
      root,
      "node_modules/open-package/entry.js",
    );
    assert_resolves_to(
      resolve_from(
        &resolver,
        "open-package/extra.js",
        &main,
        ResolutionMode::Import,
      ),
      root,
      "node_modules/open-package/extra.js",
    );
    let err = resolve_from(
      &resolver,
      "open-package/non-existent.js",
      &main,
      ResolutionMode::Import,
    )
    .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
    assert_eq!(err.specifier, "open-package/non-existent.js");
  }

  #[test]
  fn test_node_modules_walk_goes_up() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "nested/deep/main.js", "");
    write(
      root,
      "node_modules/pkg/package.json",
      r#"{ "main": "index.js" }"#,
    );
    write(root, "node_modules/pkg/index.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("nested/deep/main.js");

    assert_resolves_to(
      resolve_from(&resolver, "pkg", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/index.js",
    );
  }

  #[test]
  fn test_optional_dependency_classification() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(
      root,
      "node_modules/optional-dep/package.json",
      r#"{ "optionalDependencies": { "missing-pkg": "*" } }"#,
    );
    write(root, "node_modules/optional-dep/index.js", "");
    write(root, "node_modules/optional-dep/sub/index.js", "");
    write(
      root,
      "node_modules/optional-peer/package.json",
      r#"{
        "peerDependencies": { "missing-pkg": "*" },
        "peerDependenciesMeta": { "missing-pkg": { "optional": true } }
      }"#,
    );
    write(root, "node_modules/optional-peer/index.js", "");
    write(
      root,
      "node_modules/required-dep/package.json",
      r#"{ "dependencies": { "missing-pkg": "*" } }"#,
    );
    write(root, "node_modules/required-dep/index.js", "");
    let resolver = resolver(ConfigContext::default());

    let err = resolve_from(
      &resolver,
      "missing-pkg",
      &root.join("node_modules/optional-dep/index.js"),
      ResolutionMode::Import,
    )
    .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
    assert!(err.is_optional_dependency);

    // found through a directory level package descriptor as well
    let err = resolve_from(
      &resolver,
      "missing-pkg",
      &root.join("node_modules/optional-dep/sub/index.js"),
      ResolutionMode::Import,
    )
    .unwrap_err();
    assert!(err.is_optional_dependency);

    let err = resolve_from(
      &resolver,
      "missing-pkg",
      &root.join("node_modules/optional-peer/index.js"),
      ResolutionMode::Import,
    )
    .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
    assert!(err.is_optional_dependency);

    let err = resolve_from(
      &resolver,
      "missing-pkg",
      &root.join("node_modules/required-dep/index.js"),
      ResolutionMode::Import,
    )
    .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
    assert!(!err.is_optional_dependency);
  }

  #[test]
  fn test_imports_map() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(
      root,
      "package.json",
      r##"{ "imports": { "#utils": "./src/utils.js" } }"##,
    );
    write(root, "main.js", "");
    write(root, "src/utils.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.js");

    assert_resolves_to(
      resolve_from(&resolver, "#utils", &main, ResolutionMode::Import),
      root,
      "src/utils.js",
    );
    let err = resolve_from(&resolver, "#missing", &main, ResolutionMode::Import)
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::PackageImportNotDefined);
  }

  #[test]
  fn test_browser_platform_conditions() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(
      root,
      "node_modules/pkg/package.json",
      r#"{
        "exports": { ".": { "browser": "./browser.js", "default": "./main.js" } }
      }"#,
    );
    write(root, "node_modules/pkg/browser.js", "");
    write(root, "node_modules/pkg/main.js", "");
    write(
      root,
      "node_modules/browser-main/package.json",
      r#"{ "main": "./main.js", "browser": "./browser.js" }"#,
    );
    write(root, "node_modules/browser-main/browser.js", "");
    write(root, "node_modules/browser-main/main.js", "");
    let main = root.join("main.js");

    let browser_resolver = resolver(ConfigContext {
      platform: Platform::Browser,
      ..Default::default()
    });
    assert_resolves_to(
      resolve_from(&browser_resolver, "pkg", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/browser.js",
    );
    assert_resolves_to(
      resolve_from(
        &browser_resolver,
        "browser-main",
        &main,
        ResolutionMode::Import,
      ),
      root,
      "node_modules/browser-main/browser.js",
    );

    let default_resolver = resolver(ConfigContext::default());
    assert_resolves_to(
      resolve_from(&default_resolver, "pkg", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/main.js",
    );
  }

  #[test]
  fn test_user_conditions() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(
      root,
      "node_modules/pkg/package.json",
      r#"{
        "exports": {
          ".": { "development": "./dev.js", "default": "./prod.js" }
        }
      }"#,
    );
    write(root, "node_modules/pkg/dev.js", "");
    write(root, "node_modules/pkg/prod.js", "");
    let main = root.join("main.js");

    let dev_resolver = resolver(ConfigContext {
      conditions: vec!["development".to_string()],
      ..Default::default()
    });
    assert_resolves_to(
      resolve_from(&dev_resolver, "pkg", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/dev.js",
    );
    let prod_resolver = resolver(ConfigContext::default());
    assert_resolves_to(
      resolve_from(&prod_resolver, "pkg", &main, ResolutionMode::Import),
      root,
      "node_modules/pkg/prod.js",
    );
  }

  #[test]
  fn test_exports_not_exported_null_target() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    write(root, "main.js", "");
    write(
      root,
      "node_modules/pkg/package.json",
      r#"{ "exports": { ".": "./index.js", "./internal": null } }"#,
    );
    write(root, "node_modules/pkg/index.js", "");
    write(root, "node_modules/pkg/internal.js", "");
    let resolver = resolver(ConfigContext::default());
    let main = root.join("main.js");

    let err =
      resolve_from(&resolver, "pkg/internal", &main, ResolutionMode::Import)
        .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::PackagePathNotExported);
  }

  #[test]
  fn test_unsupported_scheme() {
    let resolver = resolver(ConfigContext::default());
    let referrer = ModuleSpecifier::parse("file:///main.js").unwrap();
    let err = resolver
      .resolve(
        "git://example.com/repo",
        &referrer,
        ResolutionMode::Import,
        &ModuleGraph::new(),
      )
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::UnsupportedScheme);
  }
}
