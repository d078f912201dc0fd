// Copyright 2018-2025 the Deno authors. MIT license.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use deno_semver::jsr::JsrPackageReqReference;
use deno_semver::npm::NpmPackageReqReference;
use deno_semver::package::PackageNv;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;
use futures::Future;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::ser::SerializeStruct;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use sys_traits::FsMetadata;
use sys_traits::FsRead;
use thiserror::Error;

use crate::analyzer::ModuleAnalyzer;
use crate::analyzer::PositionRange;
use crate::config::ConfigContext;
use crate::media_type::MediaType;
use crate::module_specifier::ModuleSpecifier;
use crate::packages::resolve_version;
use crate::packages::PackageSpecifiers;
use crate::packages::RegistryError;
use crate::packages::RegistryLoader;
use crate::resolver::jsr_module_url;
use crate::resolver::ResolutionMode;
use crate::resolver::ResolveError;
use crate::resolver::ResolveErrorKind;
use crate::resolver::SpecifierResolver;
use crate::source::LoadError;
use crate::source::LoadOptions;
use crate::source::LoadResponse;
use crate::source::LoadResult;
use crate::source::Loader;
use crate::source::LoaderChecksum;
use crate::text_encoding::bytes_to_text;

#[derive(
  Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Position {
  /// The 0-indexed line index.
  pub line: usize,
  /// The 0-indexed character index.
  pub character: usize,
}

impl Position {
  pub fn zeroed() -> Self {
    Self {
      line: 0,
      character: 0,
    }
  }

  pub fn from_source_pos(
    pos: deno_ast::SourcePos,
    text_info: &deno_ast::SourceTextInfo,
  ) -> Self {
    let line_and_column_index = text_info.line_and_column_index(pos);
    Self {
      line: line_and_column_index.line_index,
      character: line_and_column_index.column_index,
    }
  }
}

impl PartialOrd for Position {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Position {
  fn cmp(&self, other: &Self) -> Ordering {
    match self.line.cmp(&other.line) {
      Ordering::Equal => self.character.cmp(&other.character),
      ordering => ordering,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
  #[serde(skip_serializing)]
  pub specifier: ModuleSpecifier,
  #[serde(default = "Position::zeroed")]
  pub start: Position,
  #[serde(default = "Position::zeroed")]
  pub end: Position,
}

impl fmt::Display for Range {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}:{}",
      self.specifier,
      self.start.line + 1,
      self.start.character + 1
    )
  }
}

impl Range {
  pub(crate) fn from_position_range(
    specifier: &ModuleSpecifier,
    range: &PositionRange,
  ) -> Range {
    Range {
      specifier: specifier.clone(),
      start: range.start.clone(),
      end: range.end.clone(),
    }
  }
}

/// A non-fatal problem encountered while statically building a module
/// graph. Diagnostics are collected and surfaced as a list; they never
/// interrupt graph construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDiagnostic {
  pub message: String,
  pub maybe_range: Option<Range>,
}

impl fmt::Display for GraphDiagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.maybe_range {
      Some(range) => write!(f, "{}\n    at {}", self.message, range),
      None => write!(f, "{}", self.message),
    }
  }
}

/// A fatal problem with an individual module in the graph.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
  #[error("Module not found \"{0}\".")]
  Missing(ModuleSpecifier),
  #[error("The module's source code could not be parsed: {1}")]
  ParseErr(ModuleSpecifier, Arc<deno_ast::ParseDiagnostic>),
  #[error("Failed loading \"{0}\": {1}")]
  LoadingErr(ModuleSpecifier, LoadError),
  #[error("Too many redirects while loading \"{0}\".")]
  TooManyRedirects(ModuleSpecifier),
}

impl ModuleError {
  pub fn specifier(&self) -> &ModuleSpecifier {
    match self {
      Self::Missing(s)
      | Self::ParseErr(s, _)
      | Self::LoadingErr(s, _)
      | Self::TooManyRedirects(s) => s,
    }
  }
}

/// The result of resolving one dependency edge.
#[derive(Debug, Default, Clone)]
pub enum Resolution {
  #[default]
  None,
  Ok {
    specifier: ModuleSpecifier,
    range: Box<Range>,
  },
  Err {
    error: Arc<ResolveError>,
    range: Box<Range>,
  },
}

impl Resolution {
  pub fn is_none(&self) -> bool {
    matches!(self, Self::None)
  }

  pub fn maybe_specifier(&self) -> Option<&ModuleSpecifier> {
    match self {
      Self::Ok { specifier, .. } => Some(specifier),
      _ => None,
    }
  }
}

fn serialize_resolution<S>(
  resolution: &Resolution,
  serializer: S,
) -> Result<S::Ok, S::Error>
where
  S: Serializer,
{
  match resolution {
    Resolution::Ok { specifier, range } => {
      let mut state = serializer.serialize_struct("ResolvedSpecifier", 2)?;
      state.serialize_field("specifier", specifier)?;
      state.serialize_field("span", range)?;
      state.end()
    }
    Resolution::Err { error, range } => {
      let mut state = serializer.serialize_struct("ResolvedError", 2)?;
      state.serialize_field("error", &error.to_string())?;
      state.serialize_field("span", range)?;
      state.end()
    }
    Resolution::None => serializer.serialize_none(),
  }
}

fn is_false(v: &bool) -> bool {
  !v
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
  #[serde(
    rename = "code",
    skip_serializing_if = "Resolution::is_none",
    serialize_with = "serialize_resolution"
  )]
  pub resolution: Resolution,
  #[serde(skip_serializing_if = "is_false")]
  pub is_dynamic: bool,
}

impl Dependency {
  /// Optionally return the module specifier in the module graph that
  /// points to the dependency in the graph.
  pub fn maybe_specifier(&self) -> Option<&ModuleSpecifier> {
    self.resolution.maybe_specifier()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleKind {
  /// A module whose content participates in loading.
  Module,
  /// A module that is never fetched as source and is provided by the
  /// runtime (`node:` built-ins) or materialized outside the graph
  /// (`npm:` packages).
  External,
}

/// A node in the module graph: a resolved specifier, its media type, and
/// its statically discovered outgoing dependency edges.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleNode {
  pub specifier: ModuleSpecifier,
  pub kind: ModuleKind,
  pub media_type: MediaType,
  #[serde(skip_serializing_if = "IndexMap::is_empty")]
  pub dependencies: IndexMap<String, Dependency>,
}

impl ModuleNode {
  fn new(
    specifier: ModuleSpecifier,
    kind: ModuleKind,
    media_type: MediaType,
  ) -> Self {
    Self {
      specifier,
      kind,
      media_type,
      dependencies: Default::default(),
    }
  }
}

#[derive(Debug, Clone)]
pub(crate) enum ModuleSlot {
  /// A module in the graph.
  Module(ModuleNode),
  /// When trying to load or parse the module, an error occurred.
  Err(ModuleError),
  /// An internal state set when loading a module asynchronously.
  Pending,
}

/// The structure which represents a module graph, which can be serialized
/// as well as "printed". The roots of the graph represent the "starting"
/// point which can be located in the module "slots" in the graph. The
/// graph also contains any redirects where the requested module specifier
/// was redirected to another module specifier when being loaded.
///
/// The graph is append-only: once a specifier is recorded its resolution
/// never changes for the lifetime of the owning loader.
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
  pub roots: Vec<ModuleSpecifier>,
  pub(crate) module_slots: BTreeMap<ModuleSpecifier, ModuleSlot>,
  pub(crate) redirects: BTreeMap<ModuleSpecifier, ModuleSpecifier>,
  pub(crate) packages: PackageSpecifiers,
}

impl ModuleGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn packages(&self) -> &PackageSpecifiers {
    &self.packages
  }

  /// Returns `true` if the specifier resolves to a module within the
  /// graph, otherwise returns `false`.
  pub fn contains(&self, specifier: &ModuleSpecifier) -> bool {
    let specifier = self.resolve(specifier);
    self
      .module_slots
      .get(&specifier)
      .map(|ms| matches!(ms, ModuleSlot::Module(_)))
      .unwrap_or(false)
  }

  /// Resolve a specifier from the module graph following any possible
  /// redirects returning the "final" module specifier.
  pub fn resolve(&self, specifier: &ModuleSpecifier) -> ModuleSpecifier {
    let mut redirected_specifier = specifier;
    let mut seen = HashSet::new();
    seen.insert(redirected_specifier);
    while let Some(specifier) = self.redirects.get(redirected_specifier) {
      if !seen.insert(specifier) {
        log::warn!(
          "An infinite loop of redirections detected.\n  Original specifier: {}",
          specifier
        );
        break;
      }
      redirected_specifier = specifier;
      if seen.len() > 10 {
        log::warn!(
          "An excessive number of redirections detected.\n  Original specifier: {}",
          specifier
        );
        break;
      }
    }
    redirected_specifier.clone()
  }

  /// Get a module from the module graph, returning `None` if the module
  /// is not part of the graph, or if when loading the module an error
  /// occurred.
  pub fn get(&self, specifier: &ModuleSpecifier) -> Option<&ModuleNode> {
    let specifier = self.resolve(specifier);
    match self.module_slots.get(&specifier) {
      Some(ModuleSlot::Module(module)) => Some(module),
      _ => None,
    }
  }

  /// Retrieve a module from the module graph. If loading the module
  /// resulted in an error, the error is returned.
  pub fn try_get(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Result<Option<&ModuleNode>, ModuleError> {
    let specifier = self.resolve(specifier);
    match self.module_slots.get(&specifier) {
      Some(ModuleSlot::Module(module)) => Ok(Some(module)),
      Some(ModuleSlot::Err(err)) => Err(err.clone()),
      _ => Ok(None),
    }
  }

  /// An iterator over the module nodes in the graph.
  pub fn modules(&self) -> impl Iterator<Item = &ModuleNode> {
    self.module_slots.values().filter_map(|ms| match ms {
      ModuleSlot::Module(m) => Some(m),
      _ => None,
    })
  }

  /// Looks up the previously recorded resolution of a dependency of a
  /// referring module. Returns `None` when the (specifier, referrer)
  /// pair is not in the graph, which is distinct from a resolution
  /// failure.
  pub fn resolve_dependency(
    &self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
  ) -> Option<&ModuleSpecifier> {
    let referrer = self.resolve(referrer);
    let referring_module = match self.module_slots.get(&referrer) {
      Some(ModuleSlot::Module(module)) => module,
      _ => return None,
    };
    let dependency = referring_module.dependencies.get(specifier_text)?;
    let specifier = dependency.maybe_specifier()?;
    match self.module_slots.get(&self.resolve(specifier)) {
      Some(ModuleSlot::Module(m)) => Some(&m.specifier),
      _ => None,
    }
  }

  /// Walks the graph from its roots collecting the non-fatal problems
  /// found while building it: dependency edges that failed to resolve and
  /// modules that failed to load or parse. Dynamic branches are not
  /// followed.
  pub fn diagnostics(&self) -> Vec<GraphDiagnostic> {
    self.diagnostics_for_roots(&self.roots)
  }

  /// Like [`Self::diagnostics`], but walking only from the provided
  /// roots.
  pub fn diagnostics_for_roots(
    &self,
    roots: &[ModuleSpecifier],
  ) -> Vec<GraphDiagnostic> {
    let mut diagnostics = Vec::new();
    let mut seen = HashSet::new();
    let mut pending = roots.to_vec();
    while let Some(specifier) = pending.pop() {
      let specifier = self.resolve(&specifier);
      if !seen.insert(specifier.clone()) {
        continue;
      }
      match self.module_slots.get(&specifier) {
        Some(ModuleSlot::Module(module)) => {
          for dep in module.dependencies.values() {
            if dep.is_dynamic {
              continue;
            }
            match &dep.resolution {
              Resolution::Ok { specifier, .. } => {
                pending.push(specifier.clone());
              }
              Resolution::Err { error, range } => {
                diagnostics.push(GraphDiagnostic {
                  message: error.to_string(),
                  maybe_range: Some(*range.clone()),
                });
              }
              Resolution::None => {}
            }
          }
        }
        Some(ModuleSlot::Err(err)) => {
          diagnostics.push(GraphDiagnostic {
            message: err.to_string(),
            maybe_range: None,
          });
        }
        Some(ModuleSlot::Pending) | None => {
          diagnostics.push(GraphDiagnostic {
            message: format!("Module not found \"{}\".", specifier),
            maybe_range: None,
          });
        }
      }
    }
    diagnostics
  }
}

impl Serialize for ModuleGraph {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let modules = self
      .module_slots
      .iter()
      .filter_map(|(specifier, slot)| match slot {
        ModuleSlot::Module(module) => Some(SerializableModule::Module(module)),
        ModuleSlot::Err(err) => Some(SerializableModule::Err {
          specifier,
          error: err.to_string(),
        }),
        ModuleSlot::Pending => None,
      })
      .collect::<Vec<_>>();
    let mut graph = serializer.serialize_struct("ModuleGraph", 4)?;
    graph.serialize_field("roots", &self.roots)?;
    graph.serialize_field("modules", &modules)?;
    graph.serialize_field("redirects", &self.redirects)?;
    if self.packages.is_empty() {
      graph.skip_field("packages")?;
    } else {
      graph.serialize_field("packages", &self.packages)?;
    }
    graph.end()
  }
}

#[derive(Serialize)]
#[serde(untagged)]
enum SerializableModule<'a> {
  Module(&'a ModuleNode),
  Err {
    specifier: &'a ModuleSpecifier,
    error: String,
  },
}

type LoadWithSpecifierFuture =
  Pin<Box<dyn Future<Output = (ModuleSpecifier, usize, LoadResult)> + 'static>>;

/// Everything a graph build borrows from the owning loader.
pub(crate) struct BuildServices<'a, TSys: FsRead + FsMetadata + Clone> {
  pub loader: &'a dyn Loader,
  pub resolver: &'a SpecifierResolver<TSys>,
  pub analyzer: &'a dyn ModuleAnalyzer,
  pub registry: &'a dyn RegistryLoader,
  pub config: &'a ConfigContext,
}

impl ModuleGraph {
  /// Builds or extends the graph from the provided roots, following
  /// transitive static imports. Failures beneath a root become
  /// diagnostics retrievable via [`Self::diagnostics`]; a failure to
  /// resolve a registry root is returned as fatal.
  pub(crate) async fn build<TSys: FsRead + FsMetadata + Clone>(
    &mut self,
    roots: Vec<ModuleSpecifier>,
    services: BuildServices<'_, TSys>,
  ) -> Result<(), ResolveError> {
    Builder {
      graph: self,
      loader: services.loader,
      resolver: services.resolver,
      analyzer: services.analyzer,
      registry: services.registry,
      config: services.config,
      pending: FuturesUnordered::new(),
    }
    .fill(roots)
    .await
  }
}

struct Builder<'a, 'graph, TSys: FsRead + FsMetadata + Clone> {
  graph: &'graph mut ModuleGraph,
  loader: &'a dyn Loader,
  resolver: &'a SpecifierResolver<TSys>,
  analyzer: &'a dyn ModuleAnalyzer,
  registry: &'a dyn RegistryLoader,
  config: &'a ConfigContext,
  pending: FuturesUnordered<LoadWithSpecifierFuture>,
}

impl<TSys: FsRead + FsMetadata + Clone> Builder<'_, '_, TSys> {
  async fn fill(
    &mut self,
    roots: Vec<ModuleSpecifier>,
  ) -> Result<(), ResolveError> {
    let roots = roots
      .into_iter()
      .filter(|r| !self.graph.roots.contains(r))
      .collect::<Vec<_>>();
    self.graph.roots.extend(roots.clone());
    for root in roots {
      if matches!(root.scheme(), "npm" | "jsr") {
        // a registry root failing to resolve is a fatal error rather
        // than a diagnostic
        self.visit_registry_specifier(&root).await.map_err(|kind| {
          ResolveError {
            specifier: root.to_string(),
            maybe_referrer: None,
            is_optional_dependency: false,
            kind,
          }
        })?;
      } else {
        self.load(&root, 0);
      }
    }

    while let Some((specifier, redirect_depth, result)) =
      self.pending.next().await
    {
      match result {
        Ok(Some(response)) => {
          self.visit(&specifier, redirect_depth, response).await;
        }
        Ok(None) => {
          self.graph.module_slots.insert(
            specifier.clone(),
            ModuleSlot::Err(ModuleError::Missing(specifier)),
          );
        }
        Err(err) => {
          self.graph.module_slots.insert(
            specifier.clone(),
            ModuleSlot::Err(ModuleError::LoadingErr(specifier, err)),
          );
        }
      }
    }
    Ok(())
  }

  /// Enqueue a request to load the specifier via the loader.
  fn load(&mut self, specifier: &ModuleSpecifier, redirect_depth: usize) {
    let specifier = self
      .graph
      .redirects
      .get(specifier)
      .unwrap_or(specifier)
      .clone();
    if self.graph.module_slots.contains_key(&specifier) {
      return;
    }
    if specifier.scheme() == "node" {
      // runtime built-ins are external and never fetched
      self.graph.module_slots.insert(
        specifier.clone(),
        ModuleSlot::Module(ModuleNode::new(
          specifier.clone(),
          ModuleKind::External,
          MediaType::Unknown,
        )),
      );
      return;
    }
    self
      .graph
      .module_slots
      .insert(specifier.clone(), ModuleSlot::Pending);
    let options = LoadOptions {
      cache_setting: self.config.cache_setting(),
      maybe_checksum: self.remote_checksum(&specifier),
    };
    let fut = self
      .loader
      .load(&specifier, options)
      .map(move |res| (specifier, redirect_depth, res));
    self.pending.push(Box::pin(fut));
  }

  fn remote_checksum(
    &self,
    specifier: &ModuleSpecifier,
  ) -> Option<LoaderChecksum> {
    if !matches!(specifier.scheme(), "http" | "https") {
      return None;
    }
    self
      .config
      .lockfile
      .remote_checksums
      .get(specifier.as_str())
      .map(|checksum| LoaderChecksum::new(checksum.clone()))
  }

  async fn visit(
    &mut self,
    requested_specifier: &ModuleSpecifier,
    redirect_depth: usize,
    response: LoadResponse,
  ) {
    match response {
      LoadResponse::Redirect { specifier } => {
        // remove the pending slot for the requested specifier and track
        // the redirect so the final specifier is the module's identity
        self.graph.module_slots.remove(requested_specifier);
        if redirect_depth >= self.loader.max_redirects() {
          self.graph.module_slots.insert(
            requested_specifier.clone(),
            ModuleSlot::Err(ModuleError::TooManyRedirects(
              requested_specifier.clone(),
            )),
          );
          return;
        }
        self
          .graph
          .redirects
          .insert(requested_specifier.clone(), specifier.clone());
        self.load(&specifier, redirect_depth + 1);
      }
      LoadResponse::External { specifier } => {
        self.check_specifier(requested_specifier, &specifier);
        self.graph.module_slots.insert(
          specifier.clone(),
          ModuleSlot::Module(ModuleNode::new(
            specifier,
            ModuleKind::External,
            MediaType::Unknown,
          )),
        );
      }
      LoadResponse::Module {
        content,
        specifier,
        maybe_headers,
      } => {
        self.check_specifier(requested_specifier, &specifier);
        let module_slot = self
          .visit_module(&specifier, content, maybe_headers.as_ref())
          .await;
        self.graph.module_slots.insert(specifier, module_slot);
      }
    }
  }

  /// Checks if the specifier is redirected or not and updates any
  /// redirects in the graph.
  fn check_specifier(
    &mut self,
    requested_specifier: &ModuleSpecifier,
    specifier: &ModuleSpecifier,
  ) {
    if requested_specifier != specifier {
      // remove a potentially pending slot that will never resolve
      if let Some(ModuleSlot::Pending) =
        self.graph.module_slots.get(requested_specifier)
      {
        self.graph.module_slots.remove(requested_specifier);
      }
      self
        .graph
        .redirects
        .insert(requested_specifier.clone(), specifier.clone());
    }
  }

  /// Parses a loaded module and resolves its static dependencies,
  /// enqueuing further loads.
  async fn visit_module(
    &mut self,
    specifier: &ModuleSpecifier,
    content: Arc<[u8]>,
    maybe_headers: Option<&std::collections::HashMap<String, String>>,
  ) -> ModuleSlot {
    let media_type =
      MediaType::from_specifier_and_headers(specifier, maybe_headers);
    let mut module =
      ModuleNode::new(specifier.clone(), ModuleKind::Module, media_type);
    // content inside node_modules is resolved through the package
    // requirements recorded in the graph, not analyzed statically
    if !media_type.is_analyzable() || in_node_modules(specifier) {
      return ModuleSlot::Module(module);
    }
    let source: Arc<str> = bytes_to_text(&content).into();
    let module_info = match self
      .analyzer
      .analyze(specifier, source, media_type)
      .await
    {
      Ok(info) => info,
      Err(diagnostic) => {
        return ModuleSlot::Err(ModuleError::ParseErr(
          specifier.clone(),
          Arc::new(diagnostic),
        ));
      }
    };
    for desc in module_info.dependencies {
      if let Some(existing) = module.dependencies.get(&desc.specifier) {
        // the first occurrence wins, except a static import upgrades a
        // previously seen dynamic one
        if !(existing.is_dynamic && !desc.is_dynamic) {
          continue;
        }
      }
      let range =
        Range::from_position_range(specifier, &desc.specifier_range);
      let resolution = self
        .resolve_dependency(&desc.specifier, specifier)
        .await;
      let dep = module
        .dependencies
        .entry(desc.specifier.clone())
        .or_default();
      dep.is_dynamic = desc.is_dynamic;
      dep.resolution = match resolution {
        Ok(resolved) => {
          // static dependencies extend the graph; dynamic ones are
          // recorded only
          if !desc.is_dynamic {
            self.load(&resolved, 0);
          }
          Resolution::Ok {
            specifier: resolved,
            range: Box::new(range),
          }
        }
        Err(error) => Resolution::Err {
          error: Arc::new(error),
          range: Box::new(range),
        },
      };
    }
    ModuleSlot::Module(module)
  }

  async fn resolve_dependency(
    &mut self,
    specifier_text: &str,
    referrer: &ModuleSpecifier,
  ) -> Result<ModuleSpecifier, ResolveError> {
    if let Some(url) = parse_registry_url(specifier_text) {
      return match self.visit_registry_specifier(&url).await {
        Ok(()) => Ok(url),
        Err(kind) => Err(ResolveError {
          specifier: specifier_text.to_string(),
          maybe_referrer: Some(referrer.clone()),
          is_optional_dependency: false,
          kind,
        }),
      };
    }
    let resolved = self.resolver.resolve(
      specifier_text,
      referrer,
      ResolutionMode::Import,
      self.graph,
    )?;
    Ok(resolved)
  }

  /// Materializes the registry package behind an `npm:` or `jsr:`
  /// specifier, recording the package state in the graph so graph-bound
  /// resolution of the specifier succeeds afterwards.
  async fn visit_registry_specifier(
    &mut self,
    url: &ModuleSpecifier,
  ) -> Result<(), ResolveErrorKind> {
    match url.scheme() {
      "npm" => {
        let req_ref =
          NpmPackageReqReference::from_specifier(url).map_err(|err| {
            ResolveErrorKind::InvalidPackageSpecifier {
              specifier: url.to_string(),
              message: err.to_string(),
            }
          })?;
        let req = req_ref.req();
        if self
          .graph
          .packages
          .mapping(req)
          .and_then(|nv| self.graph.packages.npm_folder(nv))
          .is_none()
        {
          let maybe_locked = self.config.locked_version(req);
          let folder = self
            .registry
            .ensure_npm_package(
              req,
              maybe_locked.as_ref(),
              self.config.cache_setting(),
            )
            .await?;
          log::debug!(
            "Materialized npm package '{}' at '{}'",
            folder.nv,
            folder.folder.display()
          );
          self.graph.packages.add_nv(req.clone(), folder.nv.clone());
          self
            .graph
            .packages
            .add_npm_folder(folder.nv, folder.folder);
        }
        // the npm specifier itself is external to the graph; its
        // contents resolve through the node_modules directory
        self.graph.module_slots.insert(
          url.clone(),
          ModuleSlot::Module(ModuleNode::new(
            url.clone(),
            ModuleKind::External,
            MediaType::Unknown,
          )),
        );
        Ok(())
      }
      "jsr" => {
        let req_ref =
          JsrPackageReqReference::from_specifier(url).map_err(|err| {
            ResolveErrorKind::InvalidPackageSpecifier {
              specifier: url.to_string(),
              message: err.to_string(),
            }
          })?;
        let req = req_ref.req();
        let nv = match self.graph.packages.mapping(req) {
          Some(nv) => nv.clone(),
          None => {
            let nv = match self.config.locked_version(req) {
              Some(nv) => nv,
              None => self.resolve_jsr_version(req).await?,
            };
            self.graph.packages.add_nv(req.clone(), nv.clone());
            nv
          }
        };
        if self.graph.packages.jsr_version_info(&nv).is_none() {
          let info = self
            .registry
            .load_jsr_version_info(&nv, self.config.cache_setting())
            .await?;
          self.graph.packages.add_jsr_version_info(nv.clone(), info);
        }
        let version_info =
          self.graph.packages.jsr_version_info(&nv).unwrap().clone();
        let export_name = normalize_export_name(req_ref.sub_path());
        let Some(export_path) = version_info.export(&export_name) else {
          return Err(ResolveErrorKind::ModuleNotFound(url.to_string()));
        };
        let module_url = jsr_module_url(&nv, export_path)?;
        log::debug!("Resolved '{}' to '{}'", url, module_url);
        self
          .graph
          .redirects
          .insert(url.clone(), module_url.clone());
        self.load(&module_url, 0);
        Ok(())
      }
      _ => unreachable!(),
    }
  }

  async fn resolve_jsr_version(
    &self,
    req: &deno_semver::package::PackageReq,
  ) -> Result<PackageNv, ResolveErrorKind> {
    let package_info = self
      .registry
      .load_jsr_package_info(req.name.as_str(), self.config.cache_setting())
      .await?;
    let version = resolve_version(
      req,
      package_info
        .versions
        .iter()
        .filter(|(_, info)| !info.yanked)
        .map(|(version, _)| version),
    )
    .ok_or_else(|| {
      ResolveErrorKind::Registry(RegistryError::VersionNotFound(req.clone()))
    })?;
    Ok(PackageNv {
      name: req.name.clone(),
      version: version.clone(),
    })
  }
}

pub(crate) fn in_node_modules(specifier: &ModuleSpecifier) -> bool {
  specifier.scheme() == "file"
    && specifier.path().contains("/node_modules/")
}

fn parse_registry_url(specifier_text: &str) -> Option<ModuleSpecifier> {
  if specifier_text.starts_with("npm:") || specifier_text.starts_with("jsr:")
  {
    ModuleSpecifier::parse(specifier_text).ok()
  } else {
    None
  }
}

fn normalize_export_name(sub_path: Option<&str>) -> String {
  match sub_path {
    None | Some("") => ".".to_string(),
    Some(sub_path) => format!("./{}", sub_path),
  }
}
