// Copyright 2018-2025 the Deno authors. MIT license.

use std::borrow::Cow;

pub const BOM_CHAR: char = '\u{FEFF}';

/// Strips the byte order mark if it exists from the provided text.
pub fn strip_bom(text: &str) -> &str {
  if text.starts_with(BOM_CHAR) {
    &text[BOM_CHAR.len_utf8()..]
  } else {
    text
  }
}

/// Decodes content as UTF-8 text, stripping a leading byte order mark.
/// Invalid sequences are replaced rather than erroring because module
/// sources on disk are not guaranteed to be well formed.
pub fn bytes_to_text(bytes: &[u8]) -> Cow<str> {
  match String::from_utf8_lossy(bytes) {
    Cow::Borrowed(text) => Cow::Borrowed(strip_bom(text)),
    Cow::Owned(text) => match strip_bom(&text) {
      stripped if stripped.len() == text.len() => Cow::Owned(text),
      stripped => Cow::Owned(stripped.to_string()),
    },
  }
}
