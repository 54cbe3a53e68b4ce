//! Connection configuration from the process environment.
//!
//! | variable                | field             | default     |
//! |-------------------------|-------------------|-------------|
//! | `SQS_CONNECTION`        | `connection_name` | `sqs`       |
//! | `SQS_QUEUE`             | `queue`           |             |
//! | `SQS_PREFIX`            | `prefix`          |             |
//! | `SQS_QUEUE_URL`         | `url`             |             |
//! | `AWS_DEFAULT_REGION`    | `region`          | `sa-east-1` |
//! | `SQS_ENDPOINT`          | `endpoint`        |             |
//! | `AWS_ACCESS_KEY_ID`     | credentials key   |             |
//! | `AWS_SECRET_ACCESS_KEY` | credentials secret|             |
//! | `SQS_AMBIENT_CREDENTIALS` | opt-in flag     | `false`     |
//!
//! Empty values count as unset. Credentials are required unless
//! `SQS_AMBIENT_CREDENTIALS` is `true`/`1`, in which case the transport is
//! expected to find them on its own.

use tracing::{info, warn};

use leaseq_core::{Credentials, QueueConfig, QueueError, QueueResult};

pub const ENV_CONNECTION: &str = "SQS_CONNECTION";
pub const ENV_QUEUE: &str = "SQS_QUEUE";
pub const ENV_PREFIX: &str = "SQS_PREFIX";
pub const ENV_QUEUE_URL: &str = "SQS_QUEUE_URL";
pub const ENV_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_ENDPOINT: &str = "SQS_ENDPOINT";
pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_AMBIENT_CREDENTIALS: &str = "SQS_AMBIENT_CREDENTIALS";

/// Load a validated [`QueueConfig`] from the process environment.
pub fn load_config() -> QueueResult<QueueConfig> {
    load_config_from(|name| std::env::var(name).ok())
}

/// Load a validated [`QueueConfig`] through `lookup`.
pub fn load_config_from<F>(lookup: F) -> QueueResult<QueueConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let mut config = QueueConfig::new();
    if let Some(name) = get(ENV_CONNECTION) {
        config = config.with_connection_name(name);
    }
    if let Some(region) = get(ENV_REGION) {
        config = config.with_region(region);
    }
    if let Some(queue) = get(ENV_QUEUE) {
        config = config.with_queue(queue);
    }
    if let Some(prefix) = get(ENV_PREFIX) {
        config = config.with_prefix(prefix);
    }
    if let Some(url) = get(ENV_QUEUE_URL) {
        config = config.with_url(url);
    }
    if let Some(endpoint) = get(ENV_ENDPOINT) {
        config = config.with_endpoint(endpoint);
    }

    match (get(ENV_ACCESS_KEY_ID), get(ENV_SECRET_ACCESS_KEY)) {
        (Some(key), Some(secret)) => config = config.with_credentials(Credentials::new(key, secret)),
        (None, None) if get(ENV_AMBIENT_CREDENTIALS).is_some_and(|v| is_truthy(&v)) => {
            warn!("no static credentials configured; relying on the ambient provider chain")
        }
        (None, None) => {
            return Err(QueueError::configuration(format!(
                "missing credentials: set {ENV_ACCESS_KEY_ID} and {ENV_SECRET_ACCESS_KEY}, or {ENV_AMBIENT_CREDENTIALS}=true"
            )));
        }
        (Some(_), None) => {
            return Err(QueueError::configuration(format!(
                "{ENV_ACCESS_KEY_ID} is set but {ENV_SECRET_ACCESS_KEY} is not"
            )));
        }
        (None, Some(_)) => {
            return Err(QueueError::configuration(format!(
                "{ENV_SECRET_ACCESS_KEY} is set but {ENV_ACCESS_KEY_ID} is not"
            )));
        }
    }

    config.validate()?;
    info!(
        connection = %config.connection_name,
        region = %config.region,
        queue = ?config.queue,
        prefix = ?config.prefix,
        "queue configuration loaded"
    );
    Ok(config)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const CREDENTIALS: [(&str, &str); 2] = [(ENV_ACCESS_KEY_ID, "AKIA"), (ENV_SECRET_ACCESS_KEY, "shh")];

    #[test]
    fn defaults_when_only_credentials_are_set() {
        let config = load_config_from(env(&CREDENTIALS)).unwrap();
        assert_eq!(config.connection_name, "sqs");
        assert_eq!(config.region, "sa-east-1");
        assert_eq!(config.queue, None);
        assert_eq!(config.credentials, Some(Credentials::new("AKIA", "shh")));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = load_config_from(env(&[])).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));

        let err = load_config_from(env(&[(ENV_AMBIENT_CREDENTIALS, "no")])).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
    }

    #[test]
    fn ambient_credentials_must_be_opted_into() {
        let config = load_config_from(env(&[(ENV_AMBIENT_CREDENTIALS, "true")])).unwrap();
        assert_eq!(config.credentials, None);

        let config = load_config_from(env(&[(ENV_AMBIENT_CREDENTIALS, "1")])).unwrap();
        assert_eq!(config.credentials, None);
    }

    #[test]
    fn reads_every_variable() {
        let config = load_config_from(env(&[
            (ENV_CONNECTION, "billing"),
            (ENV_QUEUE, "invoices"),
            (ENV_PREFIX, "https://sqs.us-east-1.amazonaws.com/123"),
            (ENV_QUEUE_URL, "https://sqs.us-east-1.amazonaws.com/123/invoices"),
            (ENV_REGION, "us-east-1"),
            (ENV_ENDPOINT, "http://localhost:4566"),
            (ENV_ACCESS_KEY_ID, "AKIA"),
            (ENV_SECRET_ACCESS_KEY, "shh"),
        ]))
        .unwrap();

        assert_eq!(config.connection_name, "billing");
        assert_eq!(config.default_queue(), Some("invoices"));
        assert_eq!(config.prefix(), Some("https://sqs.us-east-1.amazonaws.com/123"));
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.credentials, Some(Credentials::new("AKIA", "shh")));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = load_config_from(env(&[
            (ENV_REGION, "  "),
            (ENV_PREFIX, ""),
            (ENV_ACCESS_KEY_ID, "AKIA"),
            (ENV_SECRET_ACCESS_KEY, "shh"),
        ]))
        .unwrap();
        assert_eq!(config.region, "sa-east-1");
        assert_eq!(config.prefix(), None);
    }

    #[test]
    fn half_credentials_are_rejected() {
        let err = load_config_from(env(&[(ENV_ACCESS_KEY_ID, "AKIA")])).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));

        let err = load_config_from(env(&[(ENV_SECRET_ACCESS_KEY, "shh")])).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
    }
}
