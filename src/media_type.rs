// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::Serializer;

use crate::module_specifier::ModuleSpecifier;

/// The classified content type of a module.
///
/// The ordinal of each variant is part of the public interface (embedders
/// exchange these values across the API boundary) and must never change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MediaType {
  JavaScript = 0,
  Jsx = 1,
  Mjs = 2,
  Cjs = 3,
  TypeScript = 4,
  Mts = 5,
  Cts = 6,
  Dts = 7,
  Dmts = 8,
  Dcts = 9,
  Tsx = 10,
  Css = 11,
  Json = 12,
  Html = 13,
  Sql = 14,
  Wasm = 15,
  SourceMap = 16,
  #[default]
  Unknown = 17,
}

impl MediaType {
  /// Classifies a specifier by its path extension alone.
  pub fn from_specifier(specifier: &ModuleSpecifier) -> Self {
    let path = specifier.path();
    let file_name = path.rsplit('/').next().unwrap_or(path);
    Self::from_file_name(file_name)
  }

  /// Classifies a specifier, where a `content-type` header takes over for
  /// specifiers whose extension yields no classification (common for
  /// remote modules served from extensionless URLs).
  pub fn from_specifier_and_headers(
    specifier: &ModuleSpecifier,
    maybe_headers: Option<&HashMap<String, String>>,
  ) -> Self {
    let media_type = Self::from_specifier(specifier);
    if media_type != MediaType::Unknown {
      return media_type;
    }
    match maybe_headers.and_then(|h| h.get("content-type")) {
      Some(content_type) => Self::from_content_type(specifier, content_type),
      None => MediaType::Unknown,
    }
  }

  /// Classifies based on a `content-type` header value. The specifier is
  /// consulted to disambiguate JavaScript-like and TypeScript-like mime
  /// types into their variant extensions.
  pub fn from_content_type(
    specifier: &ModuleSpecifier,
    content_type: &str,
  ) -> Self {
    let mime = content_type
      .split(';')
      .next()
      .unwrap_or("")
      .trim()
      .to_lowercase();
    match mime.as_str() {
      "application/typescript"
      | "text/typescript"
      | "video/vnd.dlna.mpeg-tts"
      | "video/mp2t"
      | "application/x-typescript" => {
        map_js_like_extension(specifier, MediaType::TypeScript)
      }
      "application/javascript"
      | "text/javascript"
      | "application/ecmascript"
      | "text/ecmascript"
      | "application/x-javascript"
      | "application/node" => {
        map_js_like_extension(specifier, MediaType::JavaScript)
      }
      "text/jsx" => MediaType::Jsx,
      "text/tsx" => MediaType::Tsx,
      "application/json" | "text/json" => MediaType::Json,
      "text/css" => MediaType::Css,
      "text/html" => MediaType::Html,
      "application/sql" => MediaType::Sql,
      "application/wasm" => MediaType::Wasm,
      "text/plain" | "application/octet-stream" => {
        Self::from_specifier(specifier)
      }
      _ => MediaType::Unknown,
    }
  }

  fn from_file_name(file_name: &str) -> Self {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".d.ts") {
      return MediaType::Dts;
    }
    if lower.ends_with(".d.mts") {
      return MediaType::Dmts;
    }
    if lower.ends_with(".d.cts") {
      return MediaType::Dcts;
    }
    let Some((_, extension)) = lower.rsplit_once('.') else {
      return MediaType::Unknown;
    };
    match extension {
      "js" => MediaType::JavaScript,
      "jsx" => MediaType::Jsx,
      "mjs" => MediaType::Mjs,
      "cjs" => MediaType::Cjs,
      "ts" => MediaType::TypeScript,
      "mts" => MediaType::Mts,
      "cts" => MediaType::Cts,
      "tsx" => MediaType::Tsx,
      "css" => MediaType::Css,
      "json" => MediaType::Json,
      "html" | "htm" => MediaType::Html,
      "sql" => MediaType::Sql,
      "wasm" => MediaType::Wasm,
      "map" => MediaType::SourceMap,
      _ => MediaType::Unknown,
    }
  }

  /// Whether the content is JavaScript or TypeScript source that can be
  /// statically analyzed for dependencies.
  pub fn is_analyzable(&self) -> bool {
    matches!(
      self,
      MediaType::JavaScript
        | MediaType::Jsx
        | MediaType::Mjs
        | MediaType::Cjs
        | MediaType::TypeScript
        | MediaType::Mts
        | MediaType::Cts
        | MediaType::Tsx
        | MediaType::Dts
        | MediaType::Dmts
        | MediaType::Dcts
    )
  }

  /// Whether the content requires transpiling before it is plain
  /// executable JavaScript.
  pub fn is_emittable(&self) -> bool {
    matches!(
      self,
      MediaType::TypeScript
        | MediaType::Mts
        | MediaType::Cts
        | MediaType::Jsx
        | MediaType::Tsx
    )
  }

  pub fn is_declaration(&self) -> bool {
    matches!(self, MediaType::Dts | MediaType::Dmts | MediaType::Dcts)
  }

  /// The stable ordinal of this media type.
  pub fn as_u8(&self) -> u8 {
    *self as u8
  }

  pub fn from_u8(value: u8) -> Option<Self> {
    const ALL: [MediaType; 18] = [
      MediaType::JavaScript,
      MediaType::Jsx,
      MediaType::Mjs,
      MediaType::Cjs,
      MediaType::TypeScript,
      MediaType::Mts,
      MediaType::Cts,
      MediaType::Dts,
      MediaType::Dmts,
      MediaType::Dcts,
      MediaType::Tsx,
      MediaType::Css,
      MediaType::Json,
      MediaType::Html,
      MediaType::Sql,
      MediaType::Wasm,
      MediaType::SourceMap,
      MediaType::Unknown,
    ];
    ALL.get(value as usize).copied()
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      MediaType::JavaScript => "JavaScript",
      MediaType::Jsx => "JSX",
      MediaType::Mjs => "Mjs",
      MediaType::Cjs => "Cjs",
      MediaType::TypeScript => "TypeScript",
      MediaType::Mts => "Mts",
      MediaType::Cts => "Cts",
      MediaType::Dts => "Dts",
      MediaType::Dmts => "Dmts",
      MediaType::Dcts => "Dcts",
      MediaType::Tsx => "TSX",
      MediaType::Css => "Css",
      MediaType::Json => "Json",
      MediaType::Html => "Html",
      MediaType::Sql => "Sql",
      MediaType::Wasm => "Wasm",
      MediaType::SourceMap => "SourceMap",
      MediaType::Unknown => "Unknown",
    }
  }
}

/// For JavaScript-like and TypeScript-like mime types the extension still
/// decides the specific variant (ex. a `.d.ts` file served as
/// `application/typescript` is still a declaration file).
fn map_js_like_extension(
  specifier: &ModuleSpecifier,
  default: MediaType,
) -> MediaType {
  match MediaType::from_specifier(specifier) {
    MediaType::Unknown => default,
    media_type => media_type,
  }
}

impl Serialize for MediaType {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.as_str())
  }
}

impl fmt::Display for MediaType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
