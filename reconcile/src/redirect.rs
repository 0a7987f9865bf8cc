//! Redirect target construction.

/// Append `param=token` to a caller-supplied redirect URL.
///
/// Uses `?` when the URL has no query string and `&` otherwise. A `#fragment`
/// stays at the end. The token is percent-encoded.
///
/// # Examples
///
/// ```
/// use identity_reconcile::redirect::append_token;
///
/// assert_eq!(append_token("https://x/y", "token", "t"), "https://x/y?token=t");
/// assert_eq!(append_token("https://x/y?z=1", "token", "t"), "https://x/y?z=1&token=t");
/// assert_eq!(append_token("https://x/y#top", "token", "t"), "https://x/y?token=t#top");
/// ```
#[must_use]
pub fn append_token(redirect: &str, param: &str, token: &str) -> String {
    let (base, fragment) = match redirect.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (redirect, None),
    };

    let separator = match base.find('?') {
        None => "?",
        Some(_) if base.ends_with('?') || base.ends_with('&') => "",
        Some(_) => "&",
    };

    let mut url = format!(
        "{base}{separator}{}={}",
        urlencoding::encode(param),
        urlencoding::encode(token)
    );
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Normalize an optional redirect: blank targets count as absent.
#[must_use]
pub fn non_empty(redirect: Option<&str>) -> Option<&str> {
    redirect.map(str::trim).filter(|r| !r.is_empty())
}
