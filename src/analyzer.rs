// Copyright 2018-2025 the Deno authors. MIT license.

use std::sync::Arc;

use async_trait::async_trait;
use deno_ast::ParseDiagnostic;
use deno_ast::ParsedSource;
use serde::Deserialize;
use serde::Serialize;

use crate::graph::Position;
use crate::media_type::MediaType;
use crate::module_specifier::ModuleSpecifier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
  pub start: Position,
  pub end: Position,
}

impl PositionRange {
  pub fn zeroed() -> Self {
    Self {
      start: Position::zeroed(),
      end: Position::zeroed(),
    }
  }
}

/// A statically discovered dependency of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDescriptor {
  /// The text specifier associated with the import/export statement.
  pub specifier: String,
  /// The range of the specifier.
  pub specifier_range: PositionRange,
  /// A flag indicating if the import is dynamic or not. Dynamic imports
  /// with statically analyzable string arguments are recorded, but not
  /// followed when building a graph.
  pub is_dynamic: bool,
}

/// Information about a module discovered from its source text.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub dependencies: Vec<DependencyDescriptor>,
}

/// Analyzes a module's source, producing the set of specifiers it
/// references. The default implementation parses with `deno_ast`; an
/// embedder can substitute a cached or alternative analyzer.
#[async_trait(?Send)]
pub trait ModuleAnalyzer {
  async fn analyze(
    &self,
    specifier: &ModuleSpecifier,
    source: Arc<str>,
    media_type: MediaType,
  ) -> Result<ModuleInfo, ParseDiagnostic>;
}

#[derive(Default)]
pub struct DefaultModuleAnalyzer;

#[async_trait(?Send)]
impl ModuleAnalyzer for DefaultModuleAnalyzer {
  async fn analyze(
    &self,
    specifier: &ModuleSpecifier,
    source: Arc<str>,
    media_type: MediaType,
  ) -> Result<ModuleInfo, ParseDiagnostic> {
    let parsed_source = parse_program(specifier, source, media_type)?;
    Ok(module_info(&parsed_source))
  }
}

pub(crate) fn parse_program(
  specifier: &ModuleSpecifier,
  source: Arc<str>,
  media_type: MediaType,
) -> Result<ParsedSource, ParseDiagnostic> {
  deno_ast::parse_program(deno_ast::ParseParams {
    specifier: specifier.clone(),
    text: source,
    media_type: ast_media_type(media_type),
    capture_tokens: false,
    scope_analysis: false,
    maybe_syntax: None,
  })
}

/// Gets the module info from a parsed source.
pub fn module_info(parsed_source: &ParsedSource) -> ModuleInfo {
  let text_info = parsed_source.text_info_lazy();
  let deps = deno_ast::dep::analyze_program_dependencies(
    parsed_source.program_ref(),
    parsed_source.comments(),
  );
  let mut dependencies = Vec::with_capacity(deps.len());
  for dep in deps {
    match dep {
      deno_ast::dep::DependencyDescriptor::Static(dep) => {
        // type only imports/exports do not participate in loading
        if matches!(
          dep.kind,
          deno_ast::dep::DependencyKind::ImportType
            | deno_ast::dep::DependencyKind::ExportType
        ) {
          continue;
        }
        dependencies.push(DependencyDescriptor {
          specifier: dep.specifier.to_string(),
          specifier_range: PositionRange {
            start: Position::from_source_pos(
              dep.specifier_range.start,
              text_info,
            ),
            end: Position::from_source_pos(dep.specifier_range.end, text_info),
          },
          is_dynamic: false,
        });
      }
      deno_ast::dep::DependencyDescriptor::Dynamic(dep) => {
        // only dynamic imports with a statically known argument
        if let deno_ast::dep::DynamicArgument::String(specifier) =
          &dep.argument
        {
          dependencies.push(DependencyDescriptor {
            specifier: specifier.to_string(),
            specifier_range: PositionRange {
              start: Position::from_source_pos(
                dep.argument_range.start,
                text_info,
              ),
              end: Position::from_source_pos(
                dep.argument_range.end,
                text_info,
              ),
            },
            is_dynamic: true,
          });
        }
      }
    }
  }
  ModuleInfo { dependencies }
}

pub(crate) fn ast_media_type(media_type: MediaType) -> deno_ast::MediaType {
  match media_type {
    MediaType::JavaScript => deno_ast::MediaType::JavaScript,
    MediaType::Jsx => deno_ast::MediaType::Jsx,
    MediaType::Mjs => deno_ast::MediaType::Mjs,
    MediaType::Cjs => deno_ast::MediaType::Cjs,
    MediaType::TypeScript => deno_ast::MediaType::TypeScript,
    MediaType::Mts => deno_ast::MediaType::Mts,
    MediaType::Cts => deno_ast::MediaType::Cts,
    MediaType::Dts => deno_ast::MediaType::Dts,
    MediaType::Dmts => deno_ast::MediaType::Dmts,
    MediaType::Dcts => deno_ast::MediaType::Dcts,
    MediaType::Tsx => deno_ast::MediaType::Tsx,
    MediaType::Json => deno_ast::MediaType::Json,
    MediaType::Css => deno_ast::MediaType::Css,
    MediaType::Html => deno_ast::MediaType::Html,
    MediaType::Sql => deno_ast::MediaType::Sql,
    MediaType::Wasm => deno_ast::MediaType::Wasm,
    MediaType::SourceMap => deno_ast::MediaType::SourceMap,
    MediaType::Unknown => deno_ast::MediaType::Unknown,
  }
}
