use thiserror::Error;
use url::Url;

/// Errors from catalog endpoint validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Catalog URL has no host")]
    MissingHost,
    #[error("Catalog URL must not embed credentials")]
    EmbeddedCredentials,
}

/// Validate the configured catalog base URL.
///
/// Only http(s) with a host is accepted. Private and loopback addresses are
/// allowed because catalog providers are commonly self-hosted on the LAN.
/// Credentials belong in `api_token`, never in the URL, since the URL is
/// logged. The returned URL always ends with `/` so that content-type paths
/// join below it instead of replacing the last segment.
pub fn validate_catalog_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
