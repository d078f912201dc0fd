// Copyright 2018-2025 the Deno authors. MIT license.

pub type ModuleSpecifier = url::Url;

pub use import_map::specifier::resolve_import;
pub use import_map::specifier::SpecifierError;

/// Returns whether the specifier text must be joined against a referrer
/// (`./`, `../`, or `/` prefixed) rather than resolved as a bare package
/// name or parsed as a URL.
pub fn is_relative_specifier(text: &str) -> bool {
  text.starts_with("./") || text.starts_with("../") || text.starts_with('/')
}

/// Returns whether the specifier is a local specifier that supports
/// probing the file system during resolution.
pub fn is_fs_specifier(specifier: &ModuleSpecifier) -> bool {
  specifier.scheme() == "file"
}
