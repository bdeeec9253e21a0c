//! Source locator parsing shared by the manifest resolver and code fetcher.
//!
//! Supported forms: `http(s)://`, local paths (`C:\...`, `/...`, `file:`,
//! `extension:`), and the `gh:` / `npm:` pseudo-schemes which are served
//! from a public module CDN.

use std::path::PathBuf;

use crate::error::ExtensionError;

/// Default CDN for `gh:` and `npm:` locators.
pub const DEFAULT_CDN_BASE: &str = "https://esm.sh";

/// File name of a manifest inside a directory-like source.
pub const MANIFEST_FILE: &str = "index.json";

/// Suffix of extension module binaries.
pub const MODULE_SUFFIX: &str = ".wasm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdnScheme {
    Gh,
    Npm,
}

impl CdnScheme {
    fn prefix(self) -> &'static str {
        match self {
            Self::Gh => "/gh",
            Self::Npm => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Http(String),
    /// Local path in any accepted spelling; normalize with [`local_file_url`].
    Local(String),
    Cdn { scheme: CdnScheme, path: String },
}

fn has_drive_letter(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Matches `\.json(\?|$)`, case-insensitively.
pub fn names_json_file(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    lower.ends_with(".json") || lower.contains(".json?")
}

impl Locator {
    /// Parse a locator. `kind` names what is being located in errors.
    pub fn parse(input: &str, kind: &'static str) -> Result<Self, ExtensionError> {
        if input.starts_with("http") {
            return Ok(Self::Http(input.to_string()));
        }
        if has_drive_letter(input)
            || input.starts_with('/')
            || input.starts_with("file:")
            || input.starts_with("extension:")
        {
            return Ok(Self::Local(input.to_string()));
        }

        let url =
            url::Url::parse(input).map_err(|_| ExtensionError::InvalidLocator(input.to_string()))?;
        let scheme = match url.scheme() {
            "gh" => CdnScheme::Gh,
            "npm" => CdnScheme::Npm,
            _ => return Err(ExtensionError::UnknownProtocol(kind)),
        };
        let path = match url.host_str() {
            Some(host) => format!("{host}{}", url.path()),
            None => url.path().to_string(),
        };
        Ok(Self::Cdn {
            scheme,
            path: path.trim_start_matches('/').to_string(),
        })
    }
}

// ─── Local sources ──────────────────────────────────────────────────────

/// Normalize a local locator to a `file:///`-rooted URL.
pub fn local_file_url(input: &str) -> String {
    let url = if let Some(rest) = input.strip_prefix("extension:") {
        format!("file:{rest}")
    } else if input.starts_with("file:") {
        input.to_string()
    } else {
        format!("file:///{input}")
    };
    let rest = url["file:".len()..].replace('\\', "/");
    format!("file:///{}", rest.trim_start_matches('/'))
}

/// URL of the manifest for a local source.
pub fn local_manifest_url(input: &str) -> String {
    let base = local_file_url(input);
    if names_json_file(&base) {
        base
    } else if base.ends_with('/') {
        format!("{base}{MANIFEST_FILE}")
    } else {
        format!("{base}/{MANIFEST_FILE}")
    }
}

/// `extension://` base directory that descriptors of a local source resolve against.
pub fn local_locale(input: &str) -> String {
    let base = input.strip_prefix("extension:").unwrap_or(input);
    let base = base.strip_prefix("file:").unwrap_or(base);
    let mut base = base.replace('\\', "/").trim_start_matches('/').to_string();
    if base.ends_with(".json") {
        let cut = base.rfind('/').map_or(0, |i| i + 1);
        base.truncate(cut);
    }
    if base.ends_with('/') {
        format!("extension://{base}")
    } else {
        format!("extension://{base}/")
    }
}

/// Filesystem path of a `file:///` URL.
pub fn file_url_path(file_url: &str) -> Result<PathBuf, ExtensionError> {
    url::Url::parse(file_url)?
        .to_file_path()
        .map_err(|_| ExtensionError::InvalidLocator(file_url.to_string()))
}

/// Filesystem path behind an `extension://` module reference.
pub fn extension_path(reference: &str) -> Result<PathBuf, ExtensionError> {
    let rest = reference
        .strip_prefix("extension:")
        .ok_or_else(|| ExtensionError::InvalidLocator(reference.to_string()))?
        .trim_start_matches('/');
    if has_drive_letter(rest) {
        Ok(PathBuf::from(rest))
    } else {
        Ok(PathBuf::from(format!("/{rest}")))
    }
}

/// Append the module suffix unless it is already present.
pub fn with_module_suffix(locator: &str) -> String {
    if locator.ends_with(MODULE_SUFFIX) {
        locator.to_string()
    } else {
        format!("{locator}{MODULE_SUFFIX}")
    }
}

// ─── CDN sources ────────────────────────────────────────────────────────

/// Manifest URL for a `gh:` / `npm:` source.
pub fn cdn_manifest_url(cdn_base: &str, scheme: CdnScheme, path: &str) -> String {
    let base = format!("{cdn_base}{}/{path}", scheme.prefix());
    if names_json_file(&base) {
        base
    } else {
        format!("{base}/{MANIFEST_FILE}")
    }
}

/// Module URL for a `gh:` / `npm:` entry point.
///
/// `gh:` keeps `<owner>/<repo>` as the package root, `npm:` the first
/// segment; the remainder is the module path inside the package.
pub fn cdn_module_url(cdn_base: &str, scheme: CdnScheme, path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    let root_len = match scheme {
        CdnScheme::Gh => 2,
        CdnScheme::Npm => 1,
    };
    let root = parts
        .iter()
        .take(root_len)
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    let rest = parts
        .iter()
        .skip(root_len)
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    with_module_suffix(&format!("{cdn_base}{}/{root}/{rest}", scheme.prefix()))
}
