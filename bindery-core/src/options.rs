use crate::{ExecutionError, Result};
use std::{any, str::FromStr, time::Duration};
use url::form_urlencoded;
use urlencoding::decode;

/// Connection level tunables, read from the query string of the connection URL.
///
/// ```text
/// sqlite://data.sqlite?mode=rwc&pipe_capacity=32&chunk_size=65536
/// ```
/// Recognized keys are removed before the rest of the parameters reach the
/// native link.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Chunks queued in a pipe before writes block.
    pub pipe_capacity: usize,
    /// Largest chunk a single pipe write enqueues.
    pub chunk_size: usize,
    pub worker_threads: usize,
    /// Threads of the blocking pool, transforms beyond it get a thread of their own.
    pub max_blocking_threads: usize,
    /// How long closing the connection waits for outstanding transforms.
    pub shutdown_timeout: Duration,
    /// Outputs auto bound by a row cursor when none were declared.
    pub max_generic_outputs: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pipe_capacity: 16,
            chunk_size: 8 * 1024,
            worker_threads: 1,
            max_blocking_threads: 64,
            shutdown_timeout: Duration::from_secs(5),
            max_generic_outputs: 32,
        }
    }
}

/// What the native link receives to open a link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    /// Everything between `scheme://` and `?`, percent decoded.
    pub location: String,
    /// Query parameters not consumed by [`Options`].
    pub params: Vec<(String, String)>,
}

impl Credentials {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }
}

fn parse_param<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        let error = ExecutionError::Config(format!(
            "Parameter `{}` expects a {}, got `{}`",
            key,
            any::type_name::<T>(),
            value
        ));
        log::error!("{}", error);
        error.into()
    })
}

impl Options {
    /// Splits a connection URL of the form `scheme://location?key=value&...`.
    pub fn parse_url(scheme: &str, url: &str) -> Result<(Options, Credentials)> {
        let prefix = format!("{}://", scheme);
        let Some(rest) = url.strip_prefix(&prefix) else {
            let error = ExecutionError::Config(format!(
                "Expected the connection url to start with `{}`",
                prefix
            ));
            log::error!("{}", error);
            return Err(error.into());
        };
        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
        let location = decode(location)
            .map_err(|e| ExecutionError::Config(format!("Invalid location `{}`: {}", location, e)))?
            .into_owned();
        let mut options = Options::default();
        let mut params = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "pipe_capacity" => options.pipe_capacity = parse_param(&key, &value)?,
                "chunk_size" => options.chunk_size = parse_param(&key, &value)?,
                "worker_threads" => options.worker_threads = parse_param(&key, &value)?,
                "max_blocking_threads" => {
                    options.max_blocking_threads = parse_param(&key, &value)?
                }
                "shutdown_timeout_ms" => {
                    options.shutdown_timeout =
                        Duration::from_millis(parse_param::<u64>(&key, &value)?)
                }
                "max_generic_outputs" => {
                    options.max_generic_outputs = parse_param(&key, &value)?
                }
                _ => params.push((key.into_owned(), value.into_owned())),
            }
        }
        if options.pipe_capacity == 0 || options.chunk_size == 0 {
            let error =
                ExecutionError::Config("Pipe capacity and chunk size must be positive".into());
            log::error!("{}", error);
            return Err(error.into());
        }
        Ok((options, Credentials { location, params }))
    }
}

#[cfg(test)]
mod tests {
    use super::Options;
    use std::time::Duration;

    #[test]
    fn splits_options_from_native_params() {
        let (options, credentials) = Options::parse_url(
            "sqlite",
            "sqlite://data%20dir/db.sqlite?mode=rwc&pipe_capacity=4&shutdown_timeout_ms=250&cache=shared",
        )
        .unwrap();
        assert_eq!(options.pipe_capacity, 4);
        assert_eq!(options.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(options.chunk_size, Options::default().chunk_size);
        assert_eq!(credentials.location, "data dir/db.sqlite");
        assert_eq!(credentials.param("mode"), Some("rwc"));
        assert_eq!(credentials.param("cache"), Some("shared"));
        assert_eq!(credentials.param("pipe_capacity"), None);
    }

    #[test]
    fn rejects_foreign_scheme() {
        assert!(Options::parse_url("sqlite", "postgres://localhost").is_err());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(Options::parse_url("sqlite", "sqlite://:memory:?chunk_size=big").is_err());
        assert!(Options::parse_url("sqlite", "sqlite://:memory:?pipe_capacity=0").is_err());
    }
}
