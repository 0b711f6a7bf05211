use std::collections::HashMap;
use url::form_urlencoded;

/// Loosely parsed URL used to decide whether a host event belongs to an updater.
///
/// Parsing never fails. Parts that cannot be recognised are left as `None`,
/// and callers treat a missing part as "does not match". No case or
/// trailing-slash normalisation is applied, so the pieces compare exactly as
/// they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUrl {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub file_name: Option<String>,
    pub params: HashMap<String, String>,
}

impl ParsedUrl {
    pub fn parse(input: &str) -> Self {
        let mut parsed = ParsedUrl::default();

        let without_fragment = input.split('#').next().unwrap_or_default();
        let (location, query) = match without_fragment.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (without_fragment, None),
        };

        if let Some(query) = query {
            // Later duplicates overwrite earlier ones.
            parsed.params = form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
        }

        let Some((protocol, rest)) = location.split_once("://") else {
            return parsed;
        };
        if protocol.is_empty() {
            return parsed;
        }
        parsed.protocol = Some(protocol.to_string());

        let (host, path) = match rest.split_once('/') {
            Some((host, path)) => (host, Some(path)),
            None => (rest, None),
        };
        if host.is_empty() {
            return parsed;
        }
        parsed.host = Some(host.to_string());

        if let Some(path) = path {
            parsed.path = Some(format!("/{path}"));
            parsed.file_name = path
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string);
        }

        parsed
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Decoded value of a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
