use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::errors::ConfigError;

/// Characters left untouched by `application/x-www-form-urlencoded`.
const FORM_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// Immutable description of the request a persistent stream keeps open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub base_url: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// Query parameters in insertion order. `None` values are omitted from
    /// the serialized query.
    pub params: Vec<(String, Option<String>)>,
    /// Bound on the time to receive response headers. The body itself is
    /// never subject to it.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param<V: Into<String>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.params.push((key.into(), value.map(Into::into)));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parse request options from a JSON record such as
    /// `{"baseURL": "...", "url": "/stream", "params": {"a": 1, "b": null}}`.
    ///
    /// Anything other than an object is rejected with `InvalidArgument`.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::InvalidArgument(
                "persistent stream expects a request options object".into(),
            ));
        };

        let mut opts = Self::get(String::new());
        for (key, val) in map {
            match key.as_str() {
                "baseURL" | "baseUrl" | "base_url" => opts.base_url = optional_string(&key, val)?,
                "url" => opts.url = optional_string(&key, val)?.unwrap_or_default(),
                "method" => {
                    if let Some(m) = optional_string(&key, val)? {
                        opts.method = m.to_uppercase();
                    }
                }
                "headers" => {
                    for (name, v) in expect_object(&key, val)? {
                        if let Some(v) = param_value(v) {
                            let _ = opts.headers.insert(name, v);
                        }
                    }
                }
                "params" => {
                    for (name, v) in expect_object(&key, val)? {
                        opts.params.push((name, param_value(v)));
                    }
                }
                "timeout" => {
                    opts.timeout = match val {
                        Value::Null => None,
                        Value::Number(n) => n.as_u64().filter(|ms| *ms > 0).map(Duration::from_millis),
                        other => {
                            return Err(ConfigError::InvalidArgument(format!(
                                "timeout must be a number of milliseconds, got {other}"
                            )))
                        }
                    };
                }
                _ => {}
            }
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Reject options that can never produce a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() && self.base_url.as_deref().unwrap_or_default().is_empty() {
            return Err(ConfigError::InvalidArgument("request options name no url".into()));
        }
        if self.method.is_empty() {
            return Err(ConfigError::InvalidArgument("request method is empty".into()));
        }
        Ok(())
    }

    /// Target URI: base url, url, then the form-encoded query with `None`
    /// entries left out.
    pub fn uri(&self) -> String {
        let mut uri = format!("{}{}", self.base_url.as_deref().unwrap_or_default(), self.url);
        let search = self.query_string();
        if !search.is_empty() {
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&search);
        }
        uri
    }

    fn query_string(&self) -> String {
        self.params
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| format!("{}={}", form_encode(k), form_encode(v))))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn form_encode(s: &str) -> String {
    utf8_percent_encode(s, FORM_ENCODE).to_string().replace("%20", "+")
}

fn optional_string(key: &str, val: Value) -> Result<Option<String>, ConfigError> {
    match val {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(ConfigError::InvalidArgument(format!("{key} must be a string, got {other}"))),
    }
}

fn expect_object(key: &str, val: Value) -> Result<serde_json::Map<String, Value>, ConfigError> {
    match val {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(serde_json::Map::new()),
        other => Err(ConfigError::InvalidArgument(format!("{key} must be an object, got {other}"))),
    }
}

/// Stringify a JSON value the way a query serializer would. `null` means
/// "leave this parameter out".
fn param_value(val: Value) -> Option<String> {
    match val {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Array(items) => Some(
            items
                .into_iter()
                .map(|v| param_value(v).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uri_joins_base_and_path() {
        let opts = RequestOptions::get("/stream").with_base_url("http://localhost:8080");
        assert_eq!(opts.uri(), "http://localhost:8080/stream");
    }

    #[test]
    fn uri_omits_null_params() {
        let opts = RequestOptions::get("http://h/s")
            .with_param("a", Some("1"))
            .with_param::<String>("b", None)
            .with_param("c", Some("x y"));
        assert_eq!(opts.uri(), "http://h/s?a=1&c=x+y");
    }

    #[test]
    fn uri_without_params_has_no_question_mark() {
        let opts = RequestOptions::get("http://h/s").with_param::<String>("gone", None);
        assert_eq!(opts.uri(), "http://h/s");
    }

    #[test]
    fn uri_appends_to_existing_query() {
        let opts = RequestOptions::get("http://h/s?x=1").with_param("y", Some("2"));
        assert_eq!(opts.uri(), "http://h/s?x=1&y=2");
    }

    #[test]
    fn params_are_form_encoded() {
        let opts = RequestOptions::get("http://h/s").with_param("q", Some("a&b=c/é"));
        assert_eq!(opts.uri(), "http://h/s?q=a%26b%3Dc%2F%C3%A9");
    }

    #[test]
    fn from_value_rejects_non_objects() {
        for value in [json!("http://h/s"), json!(42), json!(null), json!([1, 2])] {
            let err = RequestOptions::from_value(value).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidArgument(_)), "got {err:?}");
        }
    }

    #[test]
    fn from_value_reads_record() {
        let opts = RequestOptions::from_value(json!({
            "baseURL": "http://localhost:8080",
            "url": "/stream",
            "method": "post",
            "headers": { "Accept": "text/event-stream" },
            "params": { "since": 10, "live": true, "cursor": null },
            "timeout": 200,
        }))
        .unwrap();
        assert_eq!(opts.method, "POST");
        assert_eq!(opts.headers.get("Accept").map(String::as_str), Some("text/event-stream"));
        assert_eq!(opts.timeout, Some(Duration::from_millis(200)));
        let uri = opts.uri();
        let (base, query) = uri.split_once('?').unwrap();
        assert_eq!(base, "http://localhost:8080/stream");
        let mut pairs: Vec<&str> = query.split('&').collect();
        pairs.sort_unstable();
        assert_eq!(pairs, ["live=true", "since=10"]);
    }

    #[test]
    fn from_value_defaults_to_get() {
        let opts = RequestOptions::from_value(json!({ "url": "http://h/s" })).unwrap();
        assert_eq!(opts.method, "GET");
        assert!(opts.timeout.is_none());
    }

    #[test]
    fn from_value_requires_a_url() {
        let err = RequestOptions::from_value(json!({ "method": "GET" })).unwrap_err();
        assert!(err.to_string().contains("no url"));
    }

    #[test]
    fn from_value_rejects_wrong_field_types() {
        let err = RequestOptions::from_value(json!({ "url": 5 })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument(_)));
        let err = RequestOptions::from_value(json!({ "url": "/s", "params": "a=1" })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument(_)));
    }

    #[test]
    fn array_params_are_comma_joined() {
        let opts = RequestOptions::from_value(json!({ "url": "http://h/s", "params": { "ids": [1, 2, 3] } }))
            .unwrap();
        assert_eq!(opts.uri(), "http://h/s?ids=1%2C2%2C3");
    }
}
