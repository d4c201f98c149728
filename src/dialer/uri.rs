//! Identifier parsing shared by the built-in dialers.

use url::Url;

use crate::error::DialError;

pub(crate) fn parse(uri: &str) -> Result<Url, DialError> {
    Url::parse(uri).map_err(|_| DialError::invalid_uri(uri, "unparseable"))
}

/// Host of `uri` with IPv6 brackets removed.
pub(crate) fn host(uri: &Url) -> Option<&str> {
    uri.host_str()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
}

/// First value of the query parameter `key`, form-decoded.
pub(crate) fn query_value(uri: &Url, key: &str) -> Option<String> {
    uri.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}
