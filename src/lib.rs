// Copyright 2018-2025 the Deno authors. MIT license.

//! Resolver and loader for Deno-style code.
//!
//! Builds a graph of module identities from a set of entrypoints,
//! resolves specifier strings (relative paths, bare package names,
//! runtime built-ins, registry references, remote urls) to canonical
//! specifiers, and loads the content behind a resolved specifier into a
//! normalized response, optionally transpiling typed/JSX source into
//! executable code with inline source maps.
//!
//! ```rust
//! use deno_loader::RequestedModuleType;
//! use deno_loader::ResolutionMode;
//! use deno_loader::Workspace;
//! use deno_loader::WorkspaceOptions;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = Workspace::new(WorkspaceOptions::default())?;
//! let (loader, diagnostics) = workspace
//!   .create_loader(vec!["./mod.ts".to_string()])
//!   .await?;
//! assert!(diagnostics.is_empty());
//! let resolved = loader.resolve(
//!   "./mod.test.ts",
//!   Some("file:///project/mod.ts"),
//!   ResolutionMode::Import,
//! )?;
//! let response = loader
//!   .load(resolved.as_str(), RequestedModuleType::Default)
//!   .await?;
//! println!("{}", response.specifier());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

mod analyzer;
mod config;
mod emit;
mod graph;
mod loader;
mod media_type;
mod module_specifier;
pub mod packages;
mod resolver;
pub mod source;
mod text_encoding;
mod workspace;

pub use analyzer::DefaultModuleAnalyzer;
pub use analyzer::DependencyDescriptor;
pub use analyzer::ModuleAnalyzer;
pub use analyzer::ModuleInfo;
pub use analyzer::PositionRange;
pub use config::ConfigContext;
pub use config::ConfigData;
pub use config::ConfigDiscovery;
pub use config::ConfigLoadError;
pub use config::ConfigLoader;
pub use config::LockfileData;
pub use config::NoConfigLoader;
pub use config::Platform;
pub use config::WorkspaceOptions;
pub use emit::EmitError;
pub use graph::Dependency;
pub use graph::GraphDiagnostic;
pub use graph::ModuleError;
pub use graph::ModuleGraph;
pub use graph::ModuleKind;
pub use graph::ModuleNode;
pub use graph::Position;
pub use graph::Range;
pub use graph::Resolution;
pub use loader::ModuleLoadError;
pub use loader::ModuleLoadResponse;
pub use loader::ModuleLoader;
pub use loader::RequestedModuleType;
pub use media_type::MediaType;
pub use module_specifier::resolve_import;
pub use module_specifier::ModuleSpecifier;
pub use module_specifier::SpecifierError;
pub use resolver::is_builtin_node_module;
pub use resolver::ResolutionMode;
pub use resolver::ResolveError;
pub use resolver::ResolveErrorCode;
pub use resolver::ResolveErrorKind;
pub use resolver::SpecifierResolver;
pub use workspace::Workspace;
pub use workspace::WorkspaceError;
pub use workspace::WorkspaceServices;

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::collections::HashMap;
  use std::rc::Rc;

  use deno_semver::package::PackageNv;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::packages::MemoryRegistryLoader;
  use crate::source::LoadFuture;
  use crate::source::LoadOptions;
  use crate::source::Loader;
  use crate::source::MemoryLoader;
  use crate::source::Source;

  type Sources<'a> = Vec<(&'a str, Source<&'a str>)>;

  fn setup(sources: Sources) -> WorkspaceServices {
    WorkspaceServices {
      source_loader: Some(Rc::new(MemoryLoader::new(sources))),
      ..Default::default()
    }
  }

  fn workspace_with(
    options: WorkspaceOptions,
    services: WorkspaceServices,
  ) -> Workspace {
    Workspace::with_sys_and_services(
      options,
      sys_traits::impls::RealSys,
      services,
    )
    .unwrap()
  }

  /// Wraps a memory loader counting the loads per specifier.
  struct CountingLoader {
    inner: MemoryLoader,
    counts: RefCell<HashMap<ModuleSpecifier, usize>>,
  }

  impl CountingLoader {
    fn new(inner: MemoryLoader) -> Self {
      Self {
        inner,
        counts: Default::default(),
      }
    }

    fn count(&self, specifier: &str) -> usize {
      let specifier = ModuleSpecifier::parse(specifier).unwrap();
      self.counts.borrow().get(&specifier).copied().unwrap_or(0)
    }
  }

  impl Loader for CountingLoader {
    fn load(
      &self,
      specifier: &ModuleSpecifier,
      options: LoadOptions,
    ) -> LoadFuture {
      *self.counts.borrow_mut().entry(specifier.clone()).or_default() += 1;
      self.inner.load(specifier, options)
    }
  }

  #[tokio::test]
  async fn test_build_graph_and_resolve() {
    let services = setup(vec![
      (
        "https://deno.land/x/a/mod.ts",
        Source::Module {
          specifier: "https://deno.land/x/a/mod.ts",
          maybe_headers: None,
          content: r#"import { b } from "./b.ts";"#,
        },
      ),
      (
        "https://deno.land/x/a/b.ts",
        Source::Module {
          specifier: "https://deno.land/x/a/b.ts",
          maybe_headers: None,
          content: r#"export const b = "b";"#,
        },
      ),
    ]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, diagnostics) = workspace
      .create_loader(vec!["https://deno.land/x/a/mod.ts".to_string()])
      .await
      .unwrap();
    assert_eq!(diagnostics, Vec::new());

    let graph = loader.graph();
    assert!(graph
      .contains(&ModuleSpecifier::parse("https://deno.land/x/a/mod.ts").unwrap()));
    assert!(graph
      .contains(&ModuleSpecifier::parse("https://deno.land/x/a/b.ts").unwrap()));

    // graph-bound resolution of a recorded dependency
    let resolved = loader
      .resolve(
        "./b.ts",
        Some("https://deno.land/x/a/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap();
    assert_eq!(resolved.as_str(), "https://deno.land/x/a/b.ts");
    // repeated resolution is deterministic
    let resolved2 = loader
      .resolve(
        "./b.ts",
        Some("https://deno.land/x/a/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap();
    assert_eq!(resolved, resolved2);
  }

  #[tokio::test]
  async fn test_round_trip_resolve_then_load() {
    let services = setup(vec![(
      "https://deno.land/mod.js",
      Source::Module {
        specifier: "https://deno.land/mod.js",
        maybe_headers: None,
        content: "console.log(1);",
      },
    )]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let resolved = loader
      .resolve(
        "./mod.js",
        Some("https://deno.land/main.js"),
        ResolutionMode::Import,
      )
      .unwrap();
    let response = loader
      .load(resolved.as_str(), RequestedModuleType::Default)
      .await
      .unwrap();
    match response {
      ModuleLoadResponse::Module {
        specifier,
        media_type,
        code,
      } => {
        assert_eq!(specifier, resolved);
        assert_eq!(media_type, MediaType::JavaScript);
        assert_eq!(&*code, b"console.log(1);");
      }
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn test_malformed_relative_import_diagnostic() {
    let services = setup(vec![
      (
        "https://deno.land/mod.ts",
        Source::Module {
          specifier: "https://deno.land/mod.ts",
          maybe_headers: None,
          content: r#"
          import "unknown";
          import { b } from "./b.ts";
          "#,
        },
      ),
      (
        "https://deno.land/b.ts",
        Source::Module {
          specifier: "https://deno.land/b.ts",
          maybe_headers: None,
          content: r#"export const b = 1;"#,
        },
      ),
    ]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, diagnostics) = workspace
      .create_loader(vec!["https://deno.land/mod.ts".to_string()])
      .await
      .unwrap();
    assert_eq!(diagnostics.len(), 1);
    let expected = "Relative import path \"unknown\" not prefixed with";
    assert_eq!(
      &diagnostics[0].message[..expected.len()],
      expected,
      "full message: {}",
      diagnostics[0]
    );
    // the rest of the graph still built
    assert!(loader
      .graph()
      .contains(&ModuleSpecifier::parse("https://deno.land/b.ts").unwrap()));
  }

  #[tokio::test]
  async fn test_node_builtin_resolution_and_load() {
    let workspace = workspace_with(Default::default(), setup(vec![]));
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let resolved = loader
      .resolve(
        "node:path",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap();
    assert_eq!(resolved.as_str(), "node:path");
    // bare builtin names also resolve
    let resolved = loader
      .resolve(
        "path",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap();
    assert_eq!(resolved.as_str(), "node:path");
    let response = loader
      .load("node:path", RequestedModuleType::Default)
      .await
      .unwrap();
    assert_eq!(
      response,
      ModuleLoadResponse::External {
        specifier: ModuleSpecifier::parse("node:path").unwrap()
      }
    );
  }

  #[tokio::test]
  async fn test_load_idempotent_and_coalesced() {
    let mut memory = MemoryLoader::default();
    memory.add_source_with_text("https://deno.land/mod.js", "console.log(1);");
    let counting = Rc::new(CountingLoader::new(memory));
    let workspace = workspace_with(
      Default::default(),
      WorkspaceServices {
        source_loader: Some(counting.clone()),
        ..Default::default()
      },
    );
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let (first, second) = futures::join!(
      loader.load("https://deno.land/mod.js", RequestedModuleType::Default),
      loader.load("https://deno.land/mod.js", RequestedModuleType::Default),
    );
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(counting.count("https://deno.land/mod.js"), 1);
    // a later load comes from the cache
    let third = loader
      .load("https://deno.land/mod.js", RequestedModuleType::Default)
      .await
      .unwrap();
    assert_eq!(counting.count("https://deno.land/mod.js"), 1);
    match third {
      ModuleLoadResponse::Module { code, .. } => {
        assert_eq!(&*code, b"console.log(1);");
      }
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn test_text_strips_bom_bytes_do_not() {
    let mut memory = MemoryLoader::default();
    memory.add_bytes_source(
      "https://deno.land/data.txt",
      b"\xEF\xBB\xBFHello there!".to_vec(),
    );
    let workspace = workspace_with(
      Default::default(),
      WorkspaceServices {
        source_loader: Some(Rc::new(memory)),
        ..Default::default()
      },
    );
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let text = loader
      .load("https://deno.land/data.txt", RequestedModuleType::Text)
      .await
      .unwrap();
    match text {
      ModuleLoadResponse::Module { code, .. } => {
        assert_eq!(&*code, b"Hello there!");
      }
      _ => unreachable!(),
    }
    let bytes = loader
      .load("https://deno.land/data.txt", RequestedModuleType::Bytes)
      .await
      .unwrap();
    match bytes {
      ModuleLoadResponse::Module { code, .. } => {
        assert_eq!(&*code, b"\xEF\xBB\xBFHello there!");
      }
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn test_json_requested_type() {
    let services = setup(vec![
      (
        "https://deno.land/data.json",
        Source::Module {
          specifier: "https://deno.land/data.json",
          maybe_headers: None,
          content: r#"{ "a": 1 }"#,
        },
      ),
      (
        "https://deno.land/mod.ts",
        Source::Module {
          specifier: "https://deno.land/mod.ts",
          maybe_headers: None,
          content: "export {};",
        },
      ),
    ]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let response = loader
      .load("https://deno.land/data.json", RequestedModuleType::Json)
      .await
      .unwrap();
    match response {
      ModuleLoadResponse::Module {
        media_type, code, ..
      } => {
        assert_eq!(media_type, MediaType::Json);
        assert_eq!(&*code, br#"{ "a": 1 }"#);
      }
      _ => unreachable!(),
    }
    let err = loader
      .load("https://deno.land/mod.ts", RequestedModuleType::Json)
      .await
      .unwrap_err();
    assert!(matches!(err, ModuleLoadError::NotJson { .. }));
  }

  #[tokio::test]
  async fn test_redirect_records_final_specifier() {
    let services = setup(vec![
      (
        "https://deno.land/redirect.js",
        Source::Redirect("https://deno.land/final.js"),
      ),
      (
        "https://deno.land/final.js",
        Source::Module {
          specifier: "https://deno.land/final.js",
          maybe_headers: None,
          content: "console.log(1);",
        },
      ),
    ]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, diagnostics) = workspace
      .create_loader(vec!["https://deno.land/redirect.js".to_string()])
      .await
      .unwrap();
    assert_eq!(diagnostics, Vec::new());
    let response = loader
      .load("https://deno.land/redirect.js", RequestedModuleType::Default)
      .await
      .unwrap();
    assert_eq!(
      response.specifier().as_str(),
      "https://deno.land/final.js"
    );
  }

  #[tokio::test]
  async fn test_remote_content_type_classification() {
    let services = setup(vec![(
      "https://deno.land/no-extension",
      Source::Module {
        specifier: "https://deno.land/no-extension",
        maybe_headers: Some(vec![(
          "content-type",
          "application/javascript",
        )]),
        content: "console.log(1);",
      },
    )]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let response = loader
      .load("https://deno.land/no-extension", RequestedModuleType::Default)
      .await
      .unwrap();
    match response {
      ModuleLoadResponse::Module {
        media_type, code, ..
      } => {
        assert_eq!(media_type, MediaType::JavaScript);
        assert_eq!(&*code, b"console.log(1);");
      }
      _ => unreachable!(),
    }
  }

  fn jsr_registry() -> MemoryRegistryLoader {
    let mut registry = MemoryRegistryLoader::default();
    let nv = PackageNv::from_str("@std/path@1.0.8").unwrap();
    registry.add_jsr_package(
      "@std/path",
      [deno_semver::Version::parse_standard("1.0.8").unwrap()],
    );
    registry.add_jsr_version_info(
      nv,
      serde_json::json!({ ".": "./mod.ts", "./join": "./join.ts" }),
    );
    registry
  }

  fn jsr_sources() -> Sources<'static> {
    vec![
      (
        "https://jsr.io/@std/path/1.0.8/mod.ts",
        Source::Module {
          specifier: "https://jsr.io/@std/path/1.0.8/mod.ts",
          maybe_headers: None,
          content: "export function join() {}",
        },
      ),
      (
        "https://jsr.io/@std/path/1.0.8/join.ts",
        Source::Module {
          specifier: "https://jsr.io/@std/path/1.0.8/join.ts",
          maybe_headers: None,
          content: "export function join() {}",
        },
      ),
    ]
  }

  #[tokio::test]
  async fn test_jsr_on_demand_then_graph_bound() {
    let workspace = workspace_with(
      Default::default(),
      WorkspaceServices {
        source_loader: Some(Rc::new(MemoryLoader::new(jsr_sources()))),
        registry: Some(Rc::new(jsr_registry())),
        ..Default::default()
      },
    );
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();

    // graph-bound resolution misses before any materialization
    let err = loader
      .resolve(
        "jsr:@std/path@1",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
    assert_eq!(err.specifier, "jsr:@std/path@1");

    // the asynchronous on-demand path materializes the package
    let resolved = loader
      .resolve_async(
        "jsr:@std/path@1",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .await
      .unwrap();
    assert_eq!(
      resolved.as_str(),
      "https://jsr.io/@std/path/1.0.8/mod.ts"
    );

    // and afterwards the synchronous graph-bound path succeeds
    let resolved_sync = loader
      .resolve(
        "jsr:@std/path@1",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap();
    assert_eq!(resolved_sync, resolved);

    // subpath exports resolve too
    let joined = loader
      .resolve(
        "jsr:@std/path@1/join",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .unwrap();
    assert_eq!(
      joined.as_str(),
      "https://jsr.io/@std/path/1.0.8/join.ts"
    );
  }

  #[tokio::test]
  async fn test_jsr_entrypoint() {
    let workspace = workspace_with(
      Default::default(),
      WorkspaceServices {
        source_loader: Some(Rc::new(MemoryLoader::new(jsr_sources()))),
        registry: Some(Rc::new(jsr_registry())),
        ..Default::default()
      },
    );
    let (loader, diagnostics) = workspace
      .create_loader(vec!["jsr:@std/path@1".to_string()])
      .await
      .unwrap();
    assert_eq!(diagnostics, Vec::new());
    let resolved = loader
      .resolve("jsr:@std/path@1", None, ResolutionMode::Import)
      .unwrap();
    assert_eq!(
      resolved.as_str(),
      "https://jsr.io/@std/path/1.0.8/mod.ts"
    );
    let response = loader
      .load(resolved.as_str(), RequestedModuleType::Default)
      .await
      .unwrap();
    assert_eq!(response.specifier(), &resolved);
  }

  #[tokio::test]
  async fn test_jsr_entrypoint_not_found_is_fatal() {
    let workspace = workspace_with(
      Default::default(),
      WorkspaceServices {
        registry: Some(Rc::new(MemoryRegistryLoader::default())),
        ..Default::default()
      },
    );
    let err = workspace
      .create_loader(vec!["jsr:@std/path@1".to_string()])
      .await
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::ModuleNotFound);
  }

  #[tokio::test]
  async fn test_cached_only_rejects_on_demand_resolution() {
    let workspace = workspace_with(
      WorkspaceOptions {
        cached_only: Some(true),
        ..Default::default()
      },
      WorkspaceServices {
        registry: Some(Rc::new(jsr_registry())),
        ..Default::default()
      },
    );
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let err = loader
      .resolve_async(
        "jsr:@std/path@1",
        Some("https://deno.land/mod.ts"),
        ResolutionMode::Import,
      )
      .await
      .unwrap_err();
    assert_eq!(err.code(), ResolveErrorCode::NotCached);
  }

  #[tokio::test]
  async fn test_unresolved_registry_specifier_load_fails() {
    let workspace = workspace_with(Default::default(), setup(vec![]));
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let err = loader
      .load("jsr:@std/path@1", RequestedModuleType::Default)
      .await
      .unwrap_err();
    assert!(matches!(err, ModuleLoadError::UnresolvedJsr(_)));
    let err = loader
      .load("npm:chalk@5", RequestedModuleType::Default)
      .await
      .unwrap_err();
    assert!(matches!(err, ModuleLoadError::UnresolvedNpm(_)));
  }

  #[tokio::test]
  async fn test_graph_snapshot_serializes() {
    let services = setup(vec![(
      "https://deno.land/mod.ts",
      Source::Module {
        specifier: "https://deno.land/mod.ts",
        maybe_headers: None,
        content: "export {};",
      },
    )]);
    let workspace = workspace_with(Default::default(), services);
    let (loader, _) = workspace
      .create_loader(vec!["https://deno.land/mod.ts".to_string()])
      .await
      .unwrap();
    let value = serde_json::to_value(&*loader.graph()).unwrap();
    assert_eq!(
      value.get("roots").unwrap(),
      &serde_json::json!(["https://deno.land/mod.ts"])
    );
    assert!(value.get("modules").unwrap().is_array());
  }

  #[tokio::test]
  async fn test_data_url_load() {
    let workspace = workspace_with(Default::default(), setup(vec![]));
    let (loader, _) = workspace.create_loader(vec![]).await.unwrap();
    let response = loader
      .load(
        "data:application/javascript;base64,Y29uc29sZS5sb2coMSk7",
        RequestedModuleType::Default,
      )
      .await
      .unwrap();
    match response {
      ModuleLoadResponse::Module {
        media_type, code, ..
      } => {
        assert_eq!(media_type, MediaType::JavaScript);
        assert_eq!(&*code, b"console.log(1);");
      }
      _ => unreachable!(),
    }
  }
}
