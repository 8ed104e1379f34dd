//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// URL of the given 1-based listing page.
///
/// The first page is the listing URL itself; later pages add `page=N`.
pub fn page_url(base: &Url, page: usize) -> Url {
    if page <= 1 {
        return base.clone();
    }

    let mut url = base.clone();
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("page", &page.to_string());
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://deshimula.com/").unwrap();
        assert_eq!(
            resolve_url(&base, "/review/123/acme"),
            "https://deshimula.com/review/123/acme"
        );
        assert_eq!(
            resolve_url(&base, "review/5"),
            "https://deshimula.com/review/5"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_page_url() {
        let base = Url::parse("https://deshimula.com/").unwrap();
        assert_eq!(page_url(&base, 1).as_str(), "https://deshimula.com/");
        assert_eq!(page_url(&base, 3).as_str(), "https://deshimula.com/?page=3");

        let filtered = Url::parse("https://deshimula.com/?sort=new&page=2").unwrap();
        assert_eq!(
            page_url(&filtered, 4).as_str(),
            "https://deshimula.com/?sort=new&page=4"
        );
    }
}
