// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use futures::future;
use futures::future::LocalBoxFuture;
use sys_traits::FsRead;
use thiserror::Error;

use crate::module_specifier::ModuleSpecifier;

/// How the loader should interact with its cache when fetching content.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheSetting {
  /// Only loads from the cache, never hitting the network. A specifier
  /// that is not cached must be reported as an error, not silently
  /// fetched.
  Only,
  /// The implementation should prefer using the cache.
  Use,
  /// The implementation should not load from an internal cache.
  Reload,
}

#[derive(Debug, Clone, Error)]
#[error("Integrity check failed.\n\nActual: {actual}\nExpected: {expected}")]
pub struct ChecksumIntegrityError {
  pub actual: String,
  pub expected: String,
}

/// A SHA-256 checksum to verify the contents of a module with while
/// loading.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoaderChecksum(String);

impl LoaderChecksum {
  pub fn new(checksum: String) -> Self {
    Self(checksum)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn check_source(
    &self,
    source: &[u8],
  ) -> Result<(), ChecksumIntegrityError> {
    let actual_checksum = Self::gen(source);
    if self.0 == actual_checksum {
      Ok(())
    } else {
      Err(ChecksumIntegrityError {
        actual: actual_checksum,
        expected: self.0.to_string(),
      })
    }
  }

  pub fn gen(source: &[u8]) -> String {
    use sha2::Digest;
    use sha2::Sha256;
    let mut hasher = Sha256::new();
    hasher.update(source);
    format!("{:x}", hasher.finalize())
  }
}

impl fmt::Display for LoaderChecksum {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The response that is expected from a loader's `.load()` method.
///
/// The returned specifier is the final specifier. This can differ from the
/// requested specifier (e.g. if a redirect was encountered when loading).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResponse {
  /// A module where the content is not available when building the graph,
  /// but will be provided by the runtime. No dependency analysis or
  /// loading is performed for it.
  External { specifier: ModuleSpecifier },
  /// Specifier redirected to another specifier. Redirects are chased by
  /// the caller up to [`Loader::max_redirects`] and recorded so the final
  /// specifier is used for the module's identity.
  Redirect { specifier: ModuleSpecifier },
  /// A loaded module.
  Module {
    /// The content of the module.
    content: Arc<[u8]>,
    /// The final specifier of the module.
    specifier: ModuleSpecifier,
    /// If the module is a remote module, the headers should be returned
    /// as a hashmap of lower-cased string values.
    maybe_headers: Option<HashMap<String, String>>,
  },
}

#[derive(Debug, Clone, Error)]
pub enum LoadError {
  #[error(transparent)]
  ChecksumIntegrity(#[from] ChecksumIntegrityError),
  #[error("Failed reading '{specifier}'")]
  Io {
    specifier: ModuleSpecifier,
    #[source]
    source: Arc<std::io::Error>,
  },
  #[error("Failed decoding data url '{specifier}': {message}")]
  DataUrl {
    specifier: ModuleSpecifier,
    message: String,
  },
  #[error(
    "Loading '{specifier}' requires network access, but only cached data is allowed"
  )]
  NotCached { specifier: ModuleSpecifier },
  #[error("The loader does not support loading '{specifier}' ({scheme}:)")]
  UnsupportedScheme {
    specifier: ModuleSpecifier,
    scheme: String,
  },
  #[error(transparent)]
  Other(Arc<dyn std::error::Error + Send + Sync>),
}

pub type LoadResult = Result<Option<LoadResponse>, LoadError>;
pub type LoadFuture = LocalBoxFuture<'static, LoadResult>;

#[derive(Debug, Clone)]
pub struct LoadOptions {
  pub cache_setting: CacheSetting,
  /// It is the loader's responsibility to verify the provided checksum if
  /// it exists because only the loader knows whether its copy came from a
  /// trusted location. The source may be verified by running
  /// `checksum.check_source(content)?`.
  pub maybe_checksum: Option<LoaderChecksum>,
}

/// A trait which allows asynchronous loading of the raw bytes behind a
/// specifier. Implementations own all transport mechanics (file system,
/// http caches, etc.); resolving `Ok(None)` means the specifier does not
/// exist.
pub trait Loader {
  /// The maximum number of redirects allowed.
  fn max_redirects(&self) -> usize {
    10
  }

  /// A method that given a specifier asynchronously returns the content
  /// of the file.
  fn load(
    &self,
    specifier: &ModuleSpecifier,
    options: LoadOptions,
  ) -> LoadFuture;
}

/// Loads the content of a `data:` specifier.
pub fn load_data_url(
  specifier: &ModuleSpecifier,
) -> Result<LoadResponse, LoadError> {
  let data_url = data_url::DataUrl::process(specifier.as_str()).map_err(
    |err| LoadError::DataUrl {
      specifier: specifier.clone(),
      message: format!("{:?}", err),
    },
  )?;
  let mime_type = data_url.mime_type().to_string();
  let (bytes, _) =
    data_url
      .decode_to_vec()
      .map_err(|err| LoadError::DataUrl {
        specifier: specifier.clone(),
        message: format!("{:?}", err),
      })?;
  let headers = HashMap::from([("content-type".to_string(), mime_type)]);
  Ok(LoadResponse::Module {
    specifier: specifier.clone(),
    maybe_headers: Some(headers),
    content: Arc::from(bytes),
  })
}

/// The default loader: reads `file:` specifiers from the file system and
/// decodes `data:` specifiers in place. Remote (`http:`/`https:`)
/// specifiers error because transport is the embedder's concern; provide a
/// remote-capable [`Loader`] to the workspace to support them.
#[derive(Debug, Clone)]
pub struct FsLoader<TSys: FsRead> {
  sys: TSys,
}

impl<TSys: FsRead> FsLoader<TSys> {
  pub fn new(sys: TSys) -> Self {
    Self { sys }
  }
}

impl<TSys: FsRead> Loader for FsLoader<TSys> {
  fn load(
    &self,
    specifier: &ModuleSpecifier,
    options: LoadOptions,
  ) -> LoadFuture {
    let result = match specifier.scheme() {
      "file" => match deno_path_util::url_to_file_path(specifier) {
        Ok(path) => match self.sys.fs_read(&path) {
          Ok(content) => {
            let content: Arc<[u8]> = Arc::from(content.into_owned());
            match &options.maybe_checksum {
              Some(checksum) => checksum
                .check_source(&content)
                .map(|()| {
                  Some(LoadResponse::Module {
                    content,
                    specifier: specifier.clone(),
                    maybe_headers: None,
                  })
                })
                .map_err(Into::into),
              None => Ok(Some(LoadResponse::Module {
                content,
                specifier: specifier.clone(),
                maybe_headers: None,
              })),
            }
          }
          Err(err)
            if matches!(
              err.kind(),
              ErrorKind::NotFound | ErrorKind::NotADirectory
            ) =>
          {
            Ok(None)
          }
          Err(err) => Err(LoadError::Io {
            specifier: specifier.clone(),
            source: Arc::new(err),
          }),
        },
        Err(_) => Ok(None),
      },
      "data" => load_data_url(specifier).map(Some),
      scheme @ ("http" | "https") => {
        if options.cache_setting == CacheSetting::Only {
          Err(LoadError::NotCached {
            specifier: specifier.clone(),
          })
        } else {
          Err(LoadError::UnsupportedScheme {
            specifier: specifier.clone(),
            scheme: scheme.to_string(),
          })
        }
      }
      scheme => Err(LoadError::UnsupportedScheme {
        specifier: specifier.clone(),
        scheme: scheme.to_string(),
      }),
    };
    Box::pin(future::ready(result))
  }
}

/// An implementation of the loader where the responses are provided ahead
/// of time. This is useful for testing.
#[derive(Default)]
pub struct MemoryLoader {
  sources: HashMap<ModuleSpecifier, Result<LoadResponse, LoadError>>,
}

pub enum Source<S> {
  Module {
    specifier: S,
    maybe_headers: Option<Vec<(S, S)>>,
    content: S,
  },
  Redirect(S),
  External(S),
  Err(LoadError),
}

impl<S: AsRef<str>> Source<S> {
  fn into_result(self) -> Result<LoadResponse, LoadError> {
    match self {
      Source::Module {
        specifier,
        maybe_headers,
        content,
      } => Ok(LoadResponse::Module {
        specifier: ModuleSpecifier::parse(specifier.as_ref()).unwrap(),
        maybe_headers: maybe_headers.map(|h| {
          h.into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect()
        }),
        content: Arc::from(content.as_ref().to_string().into_bytes()),
      }),
      Source::Redirect(specifier) => Ok(LoadResponse::Redirect {
        specifier: ModuleSpecifier::parse(specifier.as_ref()).unwrap(),
      }),
      Source::External(specifier) => Ok(LoadResponse::External {
        specifier: ModuleSpecifier::parse(specifier.as_ref()).unwrap(),
      }),
      Source::Err(error) => Err(error),
    }
  }
}

pub type MemoryLoaderSources<S> = Vec<(S, Source<S>)>;

impl MemoryLoader {
  pub fn new<S: AsRef<str>>(sources: MemoryLoaderSources<S>) -> Self {
    Self {
      sources: sources
        .into_iter()
        .map(|(s, r)| {
          let specifier = ModuleSpecifier::parse(s.as_ref()).unwrap();
          (specifier, r.into_result())
        })
        .collect(),
    }
  }

  pub fn add_source<S: AsRef<str>>(
    &mut self,
    specifier: impl AsRef<str>,
    source: Source<S>,
  ) {
    let specifier = ModuleSpecifier::parse(specifier.as_ref()).unwrap();
    self.sources.insert(specifier, source.into_result());
  }

  pub fn add_source_with_text(
    &mut self,
    specifier: impl AsRef<str>,
    source: impl AsRef<str>,
  ) {
    self.add_source(
      specifier.as_ref(),
      Source::Module {
        specifier: specifier.as_ref().to_string(),
        maybe_headers: None,
        content: source.as_ref().to_string(),
      },
    );
  }

  pub fn add_bytes_source(
    &mut self,
    specifier: impl AsRef<str>,
    content: Vec<u8>,
  ) {
    self.sources.insert(
      ModuleSpecifier::parse(specifier.as_ref()).unwrap(),
      Ok(LoadResponse::Module {
        specifier: ModuleSpecifier::parse(specifier.as_ref()).unwrap(),
        maybe_headers: None,
        content: Arc::from(content),
      }),
    );
  }

  pub fn add_external_source(&mut self, specifier: impl AsRef<str>) {
    self.add_source(
      specifier.as_ref(),
      Source::External(specifier.as_ref().to_string()),
    );
  }
}

impl Loader for MemoryLoader {
  fn load(
    &self,
    specifier: &ModuleSpecifier,
    _options: LoadOptions,
  ) -> LoadFuture {
    let response = match self.sources.get(specifier) {
      Some(Ok(response)) => Ok(Some(response.clone())),
      Some(Err(err)) => Err(err.clone()),
      None if specifier.scheme() == "data" => load_data_url(specifier).map(Some),
      _ => Ok(None),
    };
    Box::pin(future::ready(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_memory_loader() {
    let loader = MemoryLoader::new(vec![
      (
        "https://deno.land/mod.ts",
        Source::Module {
          specifier: "https://deno.land/mod.ts",
          maybe_headers: None,
          content: "export {}",
        },
      ),
      (
        "https://deno.land/redirect.ts",
        Source::Redirect("https://deno.land/mod.ts"),
      ),
    ]);
    let specifier =
      ModuleSpecifier::parse("https://deno.land/redirect.ts").unwrap();
    let response = loader
      .load(
        &specifier,
        LoadOptions {
          cache_setting: CacheSetting::Use,
          maybe_checksum: None,
        },
      )
      .await
      .unwrap()
      .unwrap();
    assert_eq!(
      response,
      LoadResponse::Redirect {
        specifier: ModuleSpecifier::parse("https://deno.land/mod.ts").unwrap(),
      }
    );
  }

  #[tokio::test]
  async fn test_load_data_url() {
    let specifier = ModuleSpecifier::parse(
      "data:application/javascript;base64,Y29uc29sZS5sb2coMSk7",
    )
    .unwrap();
    let response = load_data_url(&specifier).unwrap();
    match response {
      LoadResponse::Module {
        content,
        maybe_headers,
        ..
      } => {
        assert_eq!(&*content, b"console.log(1);");
        assert_eq!(
          maybe_headers.unwrap().get("content-type").unwrap(),
          "application/javascript"
        );
      }
      _ => unreachable!(),
    }
  }

  #[test]
  fn test_checksum() {
    let checksum = LoaderChecksum::new(LoaderChecksum::gen(b"text"));
    assert!(checksum.check_source(b"text").is_ok());
    let err = checksum.check_source(b"other").unwrap_err();
    assert_eq!(err.expected, checksum.as_str());
  }
}
