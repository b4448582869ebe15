use crate::UrlError;
use url::Url;

/// Query parameters that never change page content
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "mc_eid", "mc_cid", "msclkid", "ref", "ref_src",
];

/// Normalizes a URL into its deduplication form
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase scheme and host, drop the default port
/// 3. Normalize path:
///    - Remove dot segments (. and ..) and duplicate slashes
///    - Remove trailing slash (except for root /)
/// 4. Remove fragment
/// 5. Remove tracking query parameters (utm_* and friends)
/// 6. Sort remaining query parameters, drop an empty query string
///
/// # Examples
///
/// ```
/// use sumi_distill::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/docs/?b=2&a=1#intro").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/docs?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    // The url crate lowercases the scheme and drops default ports while parsing
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Computes the key a redirect target is recorded under
///
/// Redirect targets are normalized exactly like inputs, so a page reached
/// through a redirect and the same page requested directly share a key.
pub fn redirect_key(final_url: &Url) -> String {
    normalize_url(final_url.as_str())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| final_url.to_string())
}

/// Removes dot segments, duplicate slashes and the trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_host_lowercased() {
        let result = normalize_url("HTTPS://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_http_is_kept() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_default_port_dropped() {
        let result = normalize_url("https://example.com:443/a").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a");
    }

    #[test]
    fn test_custom_port_kept() {
        let result = normalize_url("http://127.0.0.1:8080/a/").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/a");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize_url("https://example.com/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_keep_root_slash() {
        assert_eq!(
            normalize_url("https://example.com").unwrap().as_str(),
            "https://example.com/"
        );
        assert_eq!(
            normalize_url("https://example.com/").unwrap().as_str(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_tracking_params_removed_and_sorted() {
        let result = normalize_url(
            "https://example.com/page?keep=yes&utm_medium=email&another=value&fbclid=123",
        )
        .unwrap();
        assert_eq!(
            result.as_str(),
            "https://example.com/page?another=value&keep=yes"
        );
    }

    #[test]
    fn test_only_tracking_params_drops_query() {
        let result = normalize_url("https://example.com/page?utm_source=a&gclid=c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_dot_segments_and_slashes() {
        let result = normalize_url("https://example.com///a/../b/./c//").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_equivalent_spellings_share_key() {
        let a = normalize_url("https://Example.com/docs/?b=2&a=1#top").unwrap();
        let b = normalize_url("https://example.com:443/docs?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(matches!(
            normalize_url("ftp://example.com/page"),
            Err(UrlError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_redirect_key_matches_normalized_input() {
        let final_url = Url::parse("https://EXAMPLE.com/landing/?utm_source=x").unwrap();
        assert_eq!(redirect_key(&final_url), "https://example.com/landing");
    }
}
