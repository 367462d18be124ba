use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("site {0} needs either a token or a user/password pair")]
    MissingCredentials(&'static str),

    #[error("filter id for {0} is empty")]
    EmptyFilterId(&'static str),

    #[error("page size cannot be 0")]
    ZeroPageSize,
}

/// One tracker deployment and its credentials. A bearer token takes
/// precedence over basic auth when both are configured.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SiteConfig {
    /// Base URL of the tracker
    ///
    /// Note: Uses the `url::Url` type for compile-time URL validation.
    /// Invalid URLs will be rejected during config deserialization.
    pub base_url: Url,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl SiteConfig {
    fn has_credentials(&self) -> bool {
        let token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        let basic = self.user.is_some() && self.password.is_some();
        token || basic
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SitesConfig {
    pub internal: SiteConfig,
    pub vendor: SiteConfig,
}

/// The internal and vendor filter ids backing one logical set.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FilterPair {
    pub internal: String,
    pub vendor: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FiltersConfig {
    /// Numerator set: issues tagged as quality regressions.
    pub degrade: FilterPair,
    /// Denominator set: all resolved issues.
    pub resolved: FilterPair,
}

fn default_page_size() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Optional hard cap on records drained per source; unlimited when unset.
    #[serde(default)]
    pub max_records: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_records: None,
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Pipeline configuration: the two tracker sites, the four filter ids, and
/// fetch/cache tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub sites: SitesConfig,
    pub filters: FiltersConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.sites.internal.has_credentials() {
            return Err(ValidationError::MissingCredentials("internal"));
        }
        if !self.sites.vendor.has_credentials() {
            return Err(ValidationError::MissingCredentials("vendor"));
        }

        let filters = [
            ("degrade/internal", &self.filters.degrade.internal),
            ("degrade/vendor", &self.filters.degrade.vendor),
            ("resolved/internal", &self.filters.resolved.internal),
            ("resolved/vendor", &self.filters.resolved.vendor),
        ];
        for (label, id) in filters {
            if id.is_empty() {
                return Err(ValidationError::EmptyFilterId(label));
            }
        }

        if self.fetch.page_size == 0 {
            return Err(ValidationError::ZeroPageSize);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    const VALID_YAML: &str = r#"
sites:
    internal:
        base_url: "https://tracker.internal.example.com"
        token: "internal-token"
    vendor:
        base_url: "https://tracker.vendor.example.com"
        user: "reporting"
        password: "hunter2"
filters:
    degrade:
        internal: "64959"
        vendor: "22062"
    resolved:
        internal: "64958"
        vendor: "23916"
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = parse(VALID_YAML);
        assert!(config.validate().is_ok());

        assert_eq!(config.filters.degrade.internal, "64959");
        assert_eq!(config.filters.resolved.vendor, "23916");
        assert_eq!(
            config.sites.internal.base_url.as_str(),
            "https://tracker.internal.example.com/"
        );

        // Defaults apply when the tuning sections are omitted
        assert_eq!(config.fetch.page_size, 500);
        assert_eq!(config.fetch.request_timeout_secs, 30);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.retry_base_delay_ms, 1000);
        assert_eq!(config.fetch.max_records, None);
        assert_eq!(config.cache.ttl_secs, 3600);
    }

    #[test]
    fn test_tuning_overrides() {
        let yaml = format!(
            "{VALID_YAML}\nfetch:\n    page_size: 100\n    max_records: 1000\ncache:\n    ttl_secs: 60\n"
        );
        let config = parse(&yaml);
        assert_eq!(config.fetch.page_size, 100);
        assert_eq!(config.fetch.max_records, Some(1000));
        // Unspecified fetch fields still default
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.cache.ttl_secs, 60);
    }

    #[test]
    fn test_validation_errors() {
        let base = parse(VALID_YAML);

        // Missing credentials
        let mut config = base.clone();
        config.sites.internal.token = None;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingCredentials("internal")
        ));

        // Token present but empty counts as missing
        let mut config = base.clone();
        config.sites.internal.token = Some(String::new());
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingCredentials("internal")
        ));

        // Basic auth needs both halves
        let mut config = base.clone();
        config.sites.vendor.password = None;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingCredentials("vendor")
        ));

        // Empty filter id
        let mut config = base.clone();
        config.filters.resolved.vendor = String::new();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::EmptyFilterId("resolved/vendor")
        ));

        // Zero page size
        let mut config = base;
        config.fetch.page_size = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::ZeroPageSize
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
sites:
    internal: {base_url: "not-a-url", token: t}
    vendor: {base_url: "https://v.example.com", token: t}
filters:
    degrade: {internal: "1", vendor: "2"}
    resolved: {internal: "3", vendor: "4"}
"#
            )
            .is_err()
        );

        // Missing required section
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
sites:
    internal: {base_url: "https://i.example.com", token: t}
    vendor: {base_url: "https://v.example.com", token: t}
"#
            )
            .is_err()
        );
    }
}
