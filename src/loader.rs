// Copyright 2018-2025 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use deno_unsync::future::LocalFutureExt;
use deno_unsync::future::SharedLocal;
use deno_unsync::TaskQueue;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use sys_traits::FsMetadata;
use sys_traits::FsRead;
use thiserror::Error;

use crate::analyzer::DefaultModuleAnalyzer;
use crate::config::ConfigContext;
use crate::emit::maybe_transpile;
use crate::emit::EmitError;
use crate::graph::BuildServices;
use crate::graph::GraphDiagnostic;
use crate::graph::ModuleGraph;
use crate::media_type::MediaType;
use crate::module_specifier::ModuleSpecifier;
use crate::packages::RegistryLoader;
use crate::resolver::ResolutionMode;
use crate::resolver::ResolveError;
use crate::resolver::ResolveErrorKind;
use crate::resolver::SpecifierResolver;
use crate::source::LoadError;
use crate::source::LoadOptions;
use crate::source::LoadResponse;
use crate::source::Loader;
use crate::source::LoaderChecksum;
use crate::text_encoding::bytes_to_text;

/// How loaded bytes should be interpreted.
///
/// The ordinals are part of the public interface and must never change.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum RequestedModuleType {
  /// Return executable code, transpiling typed/JSX source per the
  /// workspace transpile policy.
  Default = 0,
  Json = 1,
  /// UTF-8 text with a leading byte order mark stripped.
  Text = 2,
  /// The raw bytes, verbatim.
  Bytes = 3,
}

impl RequestedModuleType {
  pub fn as_u8(&self) -> u8 {
    *self as u8
  }

  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(RequestedModuleType::Default),
      1 => Some(RequestedModuleType::Json),
      2 => Some(RequestedModuleType::Text),
      3 => Some(RequestedModuleType::Bytes),
      _ => None,
    }
  }
}

/// A loaded module, normalized for consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ModuleLoadResponse {
  /// A loaded module.
  Module {
    /// The final specifier of the module. This may differ from the
    /// requested specifier when redirects were encountered.
    specifier: ModuleSpecifier,
    media_type: MediaType,
    code: Arc<[u8]>,
  },
  /// A runtime provided module that is never fetched as source.
  External { specifier: ModuleSpecifier },
}

impl ModuleLoadResponse {
  pub fn specifier(&self) -> &ModuleSpecifier {
    match self {
      Self::Module { specifier, .. } | Self::External { specifier } => {
        specifier
      }
    }
  }
}

#[derive(Debug, Clone, Error)]
pub enum ModuleLoadError {
  #[error("Invalid specifier '{specifier}': {message}")]
  InvalidUrl { specifier: String, message: String },
  #[error("Module not found \"{0}\".")]
  Missing(ModuleSpecifier),
  #[error(
    "Failed loading '{0}'. jsr: specifiers must be resolved to an https: specifier before being loaded."
  )]
  UnresolvedJsr(ModuleSpecifier),
  #[error(
    "Failed loading '{0}'. npm: specifiers must be resolved to a file: specifier before being loaded."
  )]
  UnresolvedNpm(ModuleSpecifier),
  #[error(
    "Expected a JSON module, but identified a {media_type} module for '{specifier}'."
  )]
  NotJson {
    specifier: ModuleSpecifier,
    media_type: MediaType,
  },
  #[error("Too many redirects while loading \"{0}\".")]
  TooManyRedirects(ModuleSpecifier),
  #[error(transparent)]
  Source(#[from] LoadError),
  #[error(transparent)]
  Emit(#[from] EmitError),
}

type LoadCacheKey = (ModuleSpecifier, RequestedModuleType);
type PendingLoad = SharedLocal<
  LocalBoxFuture<'static, Result<ModuleLoadResponse, ModuleLoadError>>,
>;

/// Shared, swappable graph state. Mutating operations clone the current
/// graph, extend the clone, then publish it; readers always observe a
/// consistent snapshot.
#[derive(Debug, Default)]
struct GraphCell {
  graph: RwLock<Arc<ModuleGraph>>,
}

impl GraphCell {
  fn get(&self) -> Arc<ModuleGraph> {
    self.graph.read().clone()
  }

  fn deep_clone(&self) -> ModuleGraph {
    self.graph.read().as_ref().clone()
  }

  fn set(&self, graph: Arc<ModuleGraph>) {
    *self.graph.write() = graph;
  }
}

/// A loader for resolving and loading modules.
///
/// Owns a module graph that is only ever extended: by
/// [`Self::add_entrypoints`] and by on-demand registry resolution through
/// [`Self::resolve_async`]. Loaded content is cached per canonical
/// specifier and requested type for the lifetime of the loader.
///
/// Dropping the loader (or calling [`Self::close`]) releases the graph
/// and content caches.
pub struct ModuleLoader<
  TSys: FsRead + FsMetadata + Clone + 'static = sys_traits::impls::RealSys,
> {
  inner: Rc<LoaderInner<TSys>>,
}

pub(crate) struct LoaderInner<
  TSys: FsRead + FsMetadata + Clone + 'static,
> {
  pub config: Rc<ConfigContext>,
  pub cwd: PathBuf,
  pub source_loader: Rc<dyn Loader>,
  pub registry: Rc<dyn RegistryLoader>,
  pub resolver: SpecifierResolver<TSys>,
  pub analyzer: DefaultModuleAnalyzer,
  graph: GraphCell,
  /// Serializes all graph mutating operations; synchronous resolution
  /// reads published snapshots and never contends with this queue.
  task_queue: TaskQueue,
  load_cache: RefCell<HashMap<LoadCacheKey, ModuleLoadResponse>>,
  pending_loads: RefCell<HashMap<LoadCacheKey, PendingLoad>>,
}

impl<TSys: FsRead + FsMetadata + Clone + 'static> ModuleLoader<TSys> {
  pub(crate) fn new(
    config: Rc<ConfigContext>,
    cwd: PathBuf,
    sys: TSys,
    source_loader: Rc<dyn Loader>,
    registry: Rc<dyn RegistryLoader>,
  ) -> Self {
    Self {
      inner: Rc::new(LoaderInner {
        resolver: SpecifierResolver::new(sys, config.clone()),
        config,
        cwd,
        source_loader,
        registry,
        analyzer: DefaultModuleAnalyzer,
        graph: GraphCell::default(),
        task_queue: TaskQueue::default(),
        load_cache: Default::default(),
        pending_loads: Default::default(),
      }),
    }
  }

  /// Extends the module graph with the provided entrypoints and their
  /// transitive static imports, returning the diagnostics encountered
  /// beneath them. Failing to resolve an entrypoint itself is a fatal
  /// error.
  pub async fn add_entrypoints(
    &self,
    entrypoints: Vec<String>,
  ) -> Result<Vec<GraphDiagnostic>, ResolveError> {
    let roots = entrypoints
      .iter()
      .map(|e| self.inner.resolve_entrypoint(e))
      .collect::<Result<Vec<_>, _>>()?;
    self.add_root_urls(roots.clone()).await?;
    Ok(self.inner.graph.get().diagnostics_for_roots(&roots))
  }

  async fn add_root_urls(
    &self,
    roots: Vec<ModuleSpecifier>,
  ) -> Result<(), ResolveError> {
    let inner = &self.inner;
    // only allow one task to modify the graph at a time
    inner
      .task_queue
      .run(async {
        let mut graph = inner.graph.deep_clone();
        graph
          .build(
            roots,
            BuildServices {
              loader: &*inner.source_loader,
              resolver: &inner.resolver,
              analyzer: &inner.analyzer,
              registry: &*inner.registry,
              config: &inner.config,
            },
          )
          .await?;
        inner.graph.set(Arc::new(graph));
        Ok(())
      })
      .await
  }

  /// Resolves a specifier using the given referrer and resolution mode
  /// against the already built graph state. This never performs network
  /// or registry work: a registry specifier that was not reached from an
  /// entrypoint (or a prior [`Self::resolve_async`]) fails.
  pub fn resolve(
    &self,
    specifier: &str,
    referrer: Option<&str>,
    mode: ResolutionMode,
  ) -> Result<ModuleSpecifier, ResolveError> {
    let maybe_referrer = self.inner.resolve_provided_referrer(referrer)?;
    match maybe_referrer {
      Some(referrer) => {
        self.inner.resolve_with_graph(specifier, &referrer, mode)
      }
      None => {
        let url = self.inner.resolve_entrypoint(specifier)?;
        if matches!(url.scheme(), "npm" | "jsr") {
          // registry entrypoints still go through graph-bound
          // resolution so the caller receives a loadable target
          let referrer = self.inner.cwd_referrer(specifier)?;
          self.inner.resolve_with_graph(url.as_str(), &referrer, mode)
        } else {
          Ok(url)
        }
      }
    }
  }

  /// Resolves a specifier, materializing registry (`npm:`/`jsr:`)
  /// packages on demand when graph-bound resolution misses.
  ///
  /// On-demand resolution is not informed by the full entrypoint set, so
  /// the version it picks may diverge from what a whole-graph build
  /// would have computed. Prefer providing registry dependencies as
  /// entrypoints when consistency matters.
  pub async fn resolve_async(
    &self,
    specifier: &str,
    referrer: Option<&str>,
    mode: ResolutionMode,
  ) -> Result<ModuleSpecifier, ResolveError> {
    match self.resolve(specifier, referrer, mode) {
      Ok(resolved) => Ok(resolved),
      Err(err) => {
        let is_registry =
          specifier.starts_with("npm:") || specifier.starts_with("jsr:");
        if !is_registry
          || matches!(err.kind, ResolveErrorKind::NotCached(_))
        {
          return Err(err);
        }
        let url = ModuleSpecifier::parse(specifier).map_err(|_| err)?;
        self.add_root_urls(vec![url]).await?;
        self.resolve(specifier, referrer, mode)
      }
    }
  }

  /// Loads a resolved specifier, producing a normalized response.
  ///
  /// Repeated loads of the same specifier and requested type return
  /// byte-identical output from the loader's content cache; concurrent
  /// loads of the same specifier coalesce into one fetch.
  pub async fn load(
    &self,
    specifier: &str,
    requested_module_type: RequestedModuleType,
  ) -> Result<ModuleLoadResponse, ModuleLoadError> {
    let specifier = ModuleSpecifier::parse(specifier).map_err(|err| {
      ModuleLoadError::InvalidUrl {
        specifier: specifier.to_string(),
        message: err.to_string(),
      }
    })?;
    log::debug!("Loading '{}'", specifier);

    match specifier.scheme() {
      "node" => {
        return Ok(ModuleLoadResponse::External { specifier });
      }
      "jsr" => return Err(ModuleLoadError::UnresolvedJsr(specifier)),
      "npm" => return Err(ModuleLoadError::UnresolvedNpm(specifier)),
      _ => {}
    }

    let key = (specifier, requested_module_type);
    if let Some(cached) = self.inner.load_cache.borrow().get(&key) {
      return Ok(cached.clone());
    }
    let pending = {
      let mut pending_loads = self.inner.pending_loads.borrow_mut();
      match pending_loads.get(&key) {
        Some(pending) => pending.clone(),
        None => {
          // hold the inner state weakly so pending entries never keep
          // the loader alive through a reference cycle
          let inner = Rc::downgrade(&self.inner);
          let task_key = key.clone();
          let pending = async move {
            match inner.upgrade() {
              Some(inner) => {
                inner.load_uncached(&task_key.0, task_key.1).await
              }
              // the loader was dropped; nothing can observe this result
              None => Err(ModuleLoadError::Missing(task_key.0.clone())),
            }
          }
          .boxed_local()
          .shared_local();
          pending_loads.insert(key.clone(), pending.clone());
          pending
        }
      }
    };
    let result = pending.await;
    self.inner.pending_loads.borrow_mut().remove(&key);
    if let Ok(response) = &result {
      self
        .inner
        .load_cache
        .borrow_mut()
        .insert(key, response.clone());
    }
    result
  }

  /// A snapshot of the current module graph (roots, nodes, redirects and
  /// registry package mappings), serializable with serde.
  ///
  /// The snapshot format is unstable and may change between releases.
  pub fn graph(&self) -> Arc<ModuleGraph> {
    self.inner.graph.get()
  }

  /// Releases the loader's graph and content caches. Dropping the loader
  /// has the same effect; this method makes the release point explicit
  /// and, by consuming the loader, makes use-after-release impossible.
  pub fn close(self) {}
}

impl<TSys: FsRead + FsMetadata + Clone + 'static> LoaderInner<TSys> {
  fn resolve_with_graph(
    &self,
    specifier: &str,
    referrer: &ModuleSpecifier,
    mode: ResolutionMode,
  ) -> Result<ModuleSpecifier, ResolveError> {
    let graph = self.graph.get();
    // a recorded resolution from building the graph wins so repeated
    // lookups stay deterministic
    if let Some(found) = graph.resolve_dependency(specifier, referrer) {
      let found = found.clone();
      // an npm specifier recorded in the graph still resolves through
      // the materialized node_modules directory to a loadable target
      if found.scheme() == "npm" {
        return self.resolver.resolve(found.as_str(), referrer, mode, &graph);
      }
      return Ok(found);
    }
    self.resolver.resolve(specifier, referrer, mode, &graph)
  }

  /// Resolves an entrypoint-style specifier: a full URL, or a path
  /// (absolute or relative) joined against the workspace's current
  /// directory.
  fn resolve_entrypoint(
    &self,
    specifier: &str,
  ) -> Result<ModuleSpecifier, ResolveError> {
    if let Ok(url) = ModuleSpecifier::parse(specifier) {
      return match url.scheme() {
        "file" | "http" | "https" | "data" | "node" | "npm" | "jsr" => {
          Ok(url)
        }
        scheme => Err(ResolveError {
          specifier: specifier.to_string(),
          maybe_referrer: None,
          is_optional_dependency: false,
          kind: ResolveErrorKind::UnsupportedScheme(scheme.to_string()),
        }),
      };
    }
    let path = self.cwd.join(specifier);
    deno_path_util::url_from_file_path(&path).map_err(|err| ResolveError {
      specifier: specifier.to_string(),
      maybe_referrer: None,
      is_optional_dependency: false,
      kind: ResolveErrorKind::PathToUrl(err.to_string()),
    })
  }

  fn cwd_referrer(
    &self,
    specifier: &str,
  ) -> Result<ModuleSpecifier, ResolveError> {
    deno_path_util::url_from_directory_path(&self.cwd).map_err(|err| {
      ResolveError {
        specifier: specifier.to_string(),
        maybe_referrer: None,
        is_optional_dependency: false,
        kind: ResolveErrorKind::PathToUrl(err.to_string()),
      }
    })
  }

  fn resolve_provided_referrer(
    &self,
    referrer: Option<&str>,
  ) -> Result<Option<ModuleSpecifier>, ResolveError> {
    let referrer = referrer.filter(|v| !v.is_empty());
    match referrer {
      Some(referrer)
        if referrer.starts_with("http:")
          || referrer.starts_with("https:")
          || referrer.starts_with("file:") =>
      {
        ModuleSpecifier::parse(referrer)
          .map(Some)
          .map_err(|err| ResolveError {
            specifier: referrer.to_string(),
            maybe_referrer: None,
            is_optional_dependency: false,
            kind: ResolveErrorKind::InvalidSpecifier(Arc::new(
              crate::module_specifier::SpecifierError::InvalidUrl(err),
            )),
          })
      }
      Some(referrer) => {
        let path = PathBuf::from(referrer);
        deno_path_util::url_from_file_path(&path)
          .map(Some)
          .map_err(|err| ResolveError {
            specifier: referrer.to_string(),
            maybe_referrer: None,
            is_optional_dependency: false,
            kind: ResolveErrorKind::PathToUrl(err.to_string()),
          })
      }
      None => Ok(None),
    }
  }

  /// The uncached load pipeline: fetch bytes (chasing redirects),
  /// classify, then shape the content per the requested type.
  async fn load_uncached(
    &self,
    specifier: &ModuleSpecifier,
    requested_module_type: RequestedModuleType,
  ) -> Result<ModuleLoadResponse, ModuleLoadError> {
    // follow any redirect already recorded in the graph
    let mut current = self.graph.get().resolve(specifier);
    let max_redirects = self.source_loader.max_redirects();
    let mut redirects = 0;
    let response = loop {
      let options = LoadOptions {
        cache_setting: self.config.cache_setting(),
        maybe_checksum: self.remote_checksum(&current),
      };
      match self.source_loader.load(&current, options).await? {
        Some(LoadResponse::Redirect { specifier }) => {
          redirects += 1;
          if redirects > max_redirects {
            return Err(ModuleLoadError::TooManyRedirects(current));
          }
          current = specifier;
        }
        Some(response) => break response,
        None => return Err(ModuleLoadError::Missing(current)),
      }
    };

    match response {
      LoadResponse::External { specifier } => {
        Ok(ModuleLoadResponse::External { specifier })
      }
      LoadResponse::Module {
        content,
        specifier,
        maybe_headers,
      } => {
        let media_type = MediaType::from_specifier_and_headers(
          &specifier,
          maybe_headers.as_ref(),
        );
        let code = self.shape_content(
          &specifier,
          media_type,
          content,
          requested_module_type,
        )?;
        Ok(ModuleLoadResponse::Module {
          specifier,
          media_type,
          code,
        })
      }
      LoadResponse::Redirect { .. } => unreachable!(),
    }
  }

  fn shape_content(
    &self,
    specifier: &ModuleSpecifier,
    media_type: MediaType,
    content: Arc<[u8]>,
    requested_module_type: RequestedModuleType,
  ) -> Result<Arc<[u8]>, ModuleLoadError> {
    match requested_module_type {
      RequestedModuleType::Bytes => Ok(content),
      RequestedModuleType::Text => {
        match bytes_to_text(&content) {
          // valid utf-8 with no byte order mark to strip
          std::borrow::Cow::Borrowed(text) if text.len() == content.len() => {
          }
          text => return Ok(Arc::from(text.into_owned().into_bytes())),
        }
        Ok(content)
      }
      RequestedModuleType::Json => {
        if media_type != MediaType::Json {
          return Err(ModuleLoadError::NotJson {
            specifier: specifier.clone(),
            media_type,
          });
        }
        Ok(content)
      }
      RequestedModuleType::Default => {
        if !media_type.is_emittable() || self.config.no_transpile {
          return Ok(content);
        }
        let maybe_transpiled = {
          let source = bytes_to_text(&content);
          maybe_transpile(specifier, media_type, &source, &self.config)?
        };
        match maybe_transpiled {
          Some(transpiled) => Ok(Arc::from(transpiled.into_bytes())),
          None => Ok(content),
        }
      }
    }
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
}
