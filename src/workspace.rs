// Copyright 2018-2025 the Deno authors. MIT license.

use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use sys_traits::EnvCurrentDir;
use sys_traits::FsMetadata;
use sys_traits::FsRead;
use thiserror::Error;

use crate::config::ConfigContext;
use crate::config::ConfigDiscovery;
use crate::config::ConfigLoadError;
use crate::config::ConfigLoader;
use crate::config::NoConfigLoader;
use crate::config::WorkspaceOptions;
use crate::graph::GraphDiagnostic;
use crate::loader::ModuleLoader;
use crate::packages::NullRegistryLoader;
use crate::packages::RegistryLoader;
use crate::resolver::ResolveError;
use crate::source::FsLoader;
use crate::source::Loader;

#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("Failed resolving the current working directory")]
  Cwd(#[source] std::io::Error),
  #[error(transparent)]
  Config(#[from] ConfigLoadError),
}

/// Collaborators a workspace consumes. Every field has a default:
/// a file-system [`FsLoader`], a [`NullRegistryLoader`] that rejects
/// registry specifiers, and a [`NoConfigLoader`] that provides no
/// configuration.
#[derive(Default)]
pub struct WorkspaceServices {
  pub source_loader: Option<Rc<dyn Loader>>,
  pub registry: Option<Rc<dyn RegistryLoader>>,
  pub config_loader: Option<Box<dyn ConfigLoader>>,
}

/// Owns the resolved configuration and the collaborators used to create
/// loaders. A workspace's configuration is immutable once created; every
/// loader it creates shares it.
pub struct Workspace<
  TSys: FsRead + FsMetadata + EnvCurrentDir + Clone + 'static =
    sys_traits::impls::RealSys,
> {
  config: Rc<ConfigContext>,
  cwd: PathBuf,
  sys: TSys,
  source_loader: Rc<dyn Loader>,
  registry: Rc<dyn RegistryLoader>,
}

impl Workspace<sys_traits::impls::RealSys> {
  /// Creates a `Workspace` with the provided options and default
  /// collaborators against the real file system.
  pub fn new(options: WorkspaceOptions) -> Result<Self, WorkspaceError> {
    Self::with_sys_and_services(
      options,
      sys_traits::impls::RealSys,
      WorkspaceServices::default(),
    )
  }
}

impl<TSys: FsRead + FsMetadata + EnvCurrentDir + Clone + 'static>
  Workspace<TSys>
{
  pub fn with_sys_and_services(
    options: WorkspaceOptions,
    sys: TSys,
    services: WorkspaceServices,
  ) -> Result<Self, WorkspaceError> {
    let cwd = sys.env_current_dir().map_err(WorkspaceError::Cwd)?;
    let discovery = if options.no_config.unwrap_or_default() {
      ConfigDiscovery::Disabled
    } else if let Some(config_path) = &options.config_path {
      ConfigDiscovery::Path(resolve_absolute_path(config_path, &cwd))
    } else {
      ConfigDiscovery::DiscoverCwd
    };
    let config_loader = services
      .config_loader
      .unwrap_or_else(|| Box::new(NoConfigLoader));
    let data = config_loader.load(&discovery, &cwd)?;
    let config =
      Rc::new(ConfigContext::from_options_and_data(&options, data));
    log::debug!(
      "Created workspace at '{}' (cached_only: {}, conditions: {:?})",
      cwd.display(),
      config.cached_only,
      config.conditions
    );
    Ok(Self {
      source_loader: services
        .source_loader
        .unwrap_or_else(|| Rc::new(FsLoader::new(sys.clone()))),
      registry: services
        .registry
        .unwrap_or_else(|| Rc::new(NullRegistryLoader)),
      config,
      cwd,
      sys,
    })
  }

  pub fn config(&self) -> &ConfigContext {
    &self.config
  }

  /// Creates a loader that uses this workspace, building the module
  /// graph for the provided entrypoints. Non-fatal problems found while
  /// building the graph are returned alongside the loader.
  pub async fn create_loader(
    &self,
    entrypoints: Vec<String>,
  ) -> Result<(ModuleLoader<TSys>, Vec<GraphDiagnostic>), ResolveError> {
    if self.config.debug {
      log::debug!(
        "Creating loader for entrypoints:\n  {}",
        entrypoints.join("\n  ")
      );
    }
    let loader = ModuleLoader::new(
      self.config.clone(),
      self.cwd.clone(),
      self.sys.clone(),
      self.source_loader.clone(),
      self.registry.clone(),
    );
    let diagnostics = loader.add_entrypoints(entrypoints).await?;
    Ok((loader, diagnostics))
  }
}

fn resolve_absolute_path(path: &str, cwd: &Path) -> PathBuf {
  if let Some(url) = path
    .starts_with("file:///")
    .then(|| url::Url::parse(path).ok())
    .flatten()
  {
    if let Ok(path) = deno_path_util::url_to_file_path(&url) {
      return path;
    }
  }
  cwd.join(path)
}
