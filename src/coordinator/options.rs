use std::time::Duration;

const DEFAULT_COLLECTIONS_ROOT: &str = "/collections";
const DEFAULT_REMOVE_MAX_ATTEMPTS: u32 = 60;

pub struct ShardTermsConfig {
    pub collection: String,
    pub shard: String,
    pub logger: slog::Logger,
    pub options: ShardTermsOptions,
}

#[derive(Clone, Default)]
pub struct ShardTermsOptions {
    /// Parent of every collection's node. Defaults to `/collections`.
    pub collections_root: Option<String>,
    /// Upper bound of a single wait for the store to reconnect while re-arming the watch.
    /// Defaults to the store's own client timeout.
    pub reconnect_timeout: Option<Duration>,
    /// Attempts `remove_term()` makes before giving up. Defaults to 60.
    pub remove_max_attempts: Option<u32>,
}

pub(super) struct ShardTermsOptionsValidated {
    pub znode_path: String,
    pub reconnect_timeout: Duration,
    pub remove_max_attempts: u32,
}

impl ShardTermsOptionsValidated {
    pub(super) fn try_new(
        collection: &str,
        shard: &str,
        options: ShardTermsOptions,
        store_client_timeout: Duration,
    ) -> Result<Self, String> {
        validate_path_segment("collection", collection)?;
        validate_path_segment("shard", shard)?;

        let collections_root = options
            .collections_root
            .unwrap_or_else(|| DEFAULT_COLLECTIONS_ROOT.to_string());
        if !collections_root.starts_with('/') || collections_root.ends_with('/') {
            return Err(format!(
                "Collections root must start with '/' and must not end with '/', got '{}'",
                collections_root
            ));
        }

        let values = ShardTermsOptionsValidated {
            znode_path: format!("{}/{}/terms/{}", collections_root, collection, shard),
            reconnect_timeout: options.reconnect_timeout.unwrap_or(store_client_timeout),
            remove_max_attempts: options.remove_max_attempts.unwrap_or(DEFAULT_REMOVE_MAX_ATTEMPTS),
        };

        values.validate()?;
        Ok(values)
    }

    fn validate(&self) -> Result<(), String> {
        if self.reconnect_timeout == Duration::from_secs(0) {
            return Err("Reconnect timeout must be greater than zero".to_string());
        }
        if self.remove_max_attempts == 0 {
            return Err("Remove must be allowed at least one attempt".to_string());
        }

        Ok(())
    }
}

fn validate_path_segment(name: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || value.contains('/') {
        return Err(format!("Illegal {} name '{}'", name, value));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(collection: &str, shard: &str, options: ShardTermsOptions) -> Result<ShardTermsOptionsValidated, String> {
        ShardTermsOptionsValidated::try_new(collection, shard, options, Duration::from_secs(30))
    }

    #[test]
    fn defaults() {
        let validated = validate("c1", "shard1", ShardTermsOptions::default()).unwrap();
        assert_eq!(validated.znode_path, "/collections/c1/terms/shard1");
        assert_eq!(validated.remove_max_attempts, 60);
        assert_eq!(validated.reconnect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides() {
        let options = ShardTermsOptions {
            collections_root: Some("/cloud/collections".to_string()),
            reconnect_timeout: Some(Duration::from_millis(250)),
            remove_max_attempts: Some(3),
        };
        let validated = ShardTermsOptionsValidated::try_new("c1", "shard1", options, Duration::from_secs(1)).unwrap();
        assert_eq!(validated.znode_path, "/cloud/collections/c1/terms/shard1");
        assert_eq!(validated.reconnect_timeout, Duration::from_millis(250));
        assert_eq!(validated.remove_max_attempts, 3);
    }

    #[test]
    fn rejects_illegal_values() {
        let bad_root = ShardTermsOptions {
            collections_root: Some("collections/".to_string()),
            ..ShardTermsOptions::default()
        };
        assert!(validate("c1", "shard1", bad_root).is_err());
        assert!(validate("c/1", "shard1", ShardTermsOptions::default()).is_err());
        assert!(validate("c1", "", ShardTermsOptions::default()).is_err());

        let zero_attempts = ShardTermsOptions {
            remove_max_attempts: Some(0),
            ..ShardTermsOptions::default()
        };
        assert!(validate("c1", "shard1", zero_attempts).is_err());
    }
}
