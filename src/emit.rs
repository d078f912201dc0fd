// Copyright 2018-2025 the Deno authors. MIT license.

use std::sync::Arc;

use thiserror::Error;

use crate::analyzer::parse_program;
use crate::config::ConfigContext;
use crate::media_type::MediaType;
use crate::module_specifier::ModuleSpecifier;

#[derive(Debug, Clone, Error)]
pub enum EmitError {
  #[error("The module's source code could not be parsed: {0}")]
  Parse(Arc<deno_ast::ParseDiagnostic>),
  #[error("Failed transpiling '{specifier}': {message}")]
  Transpile {
    specifier: ModuleSpecifier,
    message: String,
  },
}

/// Transpiles typed/JSX source into plain executable JavaScript per the
/// workspace transpile policy, attaching an inline source map comment.
/// Returns `None` when the source is already executable as-is or
/// transpiling is disabled.
pub(crate) fn maybe_transpile(
  specifier: &ModuleSpecifier,
  media_type: MediaType,
  source: &str,
  config: &ConfigContext,
) -> Result<Option<String>, EmitError> {
  if config.no_transpile || !media_type.is_emittable() {
    return Ok(None);
  }
  if config.preserve_jsx && media_type == MediaType::Jsx {
    // no type annotations to strip and the jsx stays, so the source is
    // already in its final form
    return Ok(None);
  }
  let parsed_source = parse_program(specifier, source.into(), media_type)
    .map_err(|diagnostic| EmitError::Parse(Arc::new(diagnostic)))?;
  let transpile_options = deno_ast::TranspileOptions {
    transform_jsx: !config.preserve_jsx,
    ..Default::default()
  };
  let emit_options = deno_ast::EmitOptions {
    source_map: deno_ast::SourceMapOption::Inline,
    ..Default::default()
  };
  let emitted = parsed_source
    .transpile(
      &transpile_options,
      &deno_ast::TranspileModuleOptions::default(),
      &emit_options,
    )
    .map_err(|err| EmitError::Transpile {
      specifier: specifier.clone(),
      message: err.to_string(),
    })?
    .into_source();
  Ok(Some(emitted.text))
}
