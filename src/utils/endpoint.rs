use url::{ParseError, Url};

/// Join a relative API path onto a configured base URL.
///
/// The base is treated as a directory, so a path prefix such as
/// `https://host/es` survives the join.
pub fn endpoint_url(base: &str, path: &str) -> Result<Url, ParseError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path.trim_start_matches('/'))
}
