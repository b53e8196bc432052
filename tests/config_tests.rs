//! Tests for configuration loading and validation.

use std::fs;
use std::time::Duration;

use linforge::config::ConfigError;
use linforge::test_support::EnvGuard;
use linforge::{DialPolicy, LinodeConfig};
use rstest::rstest;
use tempfile::TempDir;

fn valid_config() -> LinodeConfig {
    LinodeConfig {
        personal_access_token: String::from("token-123"),
        ..LinodeConfig::default()
    }
}

#[test]
fn default_config_with_a_token_is_valid() {
    assert_eq!(valid_config().validate(), Ok(()));
}

#[rstest]
#[case::token(
    LinodeConfig { personal_access_token: String::new(), ..valid_config() },
    "LINODE_PERSONAL_ACCESS_TOKEN",
    "personal_access_token"
)]
#[case::api_url(
    LinodeConfig { api_url: String::from(" "), ..valid_config() },
    "LINODE_API_URL",
    "api_url"
)]
#[case::region(
    LinodeConfig { default_region: String::new(), ..valid_config() },
    "LINODE_DEFAULT_REGION",
    "default_region"
)]
#[case::plan(
    LinodeConfig { default_type: String::new(), ..valid_config() },
    "LINODE_DEFAULT_TYPE",
    "default_type"
)]
#[case::image(
    LinodeConfig { default_image: String::new(), ..valid_config() },
    "LINODE_DEFAULT_IMAGE",
    "default_image"
)]
#[case::login(
    LinodeConfig { default_login: String::new(), ..valid_config() },
    "LINODE_DEFAULT_LOGIN",
    "default_login"
)]
fn missing_fields_produce_actionable_errors(
    #[case] config: LinodeConfig,
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let error = config.validate().expect_err("field is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected a missing field error, got {error:?}");
    };
    assert!(message.contains(env_var), "error should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention {toml_key}: {message}");
    assert!(message.contains("linforge.toml"), "error should mention the file: {message}");
}

#[rstest]
#[case::poll(LinodeConfig { poll_interval_secs: 0, ..valid_config() }, "LINODE_POLL_INTERVAL_SECS")]
#[case::wait(LinodeConfig { wait_timeout_secs: 0, ..valid_config() }, "LINODE_WAIT_TIMEOUT_SECS")]
#[case::attempts(LinodeConfig { ssh_max_attempts: 0, ..valid_config() }, "LINODE_SSH_MAX_ATTEMPTS")]
#[case::script(
    LinodeConfig { ssh_script_timeout_secs: 0, ..valid_config() },
    "LINODE_SSH_SCRIPT_TIMEOUT_SECS"
)]
fn zero_timings_are_rejected(#[case] config: LinodeConfig, #[case] env_var: &str) {
    let error = config.validate().expect_err("zero is out of range");
    assert!(
        matches!(error, ConfigError::InvalidValue(ref message) if message.contains(env_var)),
        "unexpected error: {error:?}"
    );
}

#[test]
fn timing_accessors_convert_units() {
    let config = LinodeConfig {
        poll_interval_secs: 2,
        wait_timeout_secs: 90,
        ssh_max_attempts: 4,
        ssh_base_delay_ms: 250,
        ssh_max_delay_ms: 2000,
        ssh_script_timeout_secs: 120,
        ..valid_config()
    };

    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.script_timeout(), Duration::from_secs(120));
    assert_eq!(config.wait_timeout(), Duration::from_secs(90));
    assert_eq!(
        config.dial_policy(),
        DialPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(2000),
        }
    );
}

#[tokio::test]
async fn load_merges_file_and_environment() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("linforge.toml");
    fs::write(
        &path,
        "personal_access_token = \"from-file\"\n\
         default_region = \"ap-south\"\n\
         default_login = \"ops\"\n",
    )
    .expect("write config");
    let config_path = path.to_string_lossy().into_owned();

    let _guard = EnvGuard::apply(
        &[
            ("LINFORGE_CONFIG_PATH", config_path.as_str()),
            ("LINODE_DEFAULT_REGION", "eu-central"),
        ],
        &["LINODE_PERSONAL_ACCESS_TOKEN", "LINODE_DEFAULT_LOGIN"],
    )
    .await;

    let config = LinodeConfig::load_without_cli_args().expect("load config");

    assert_eq!(config.personal_access_token, "from-file");
    assert_eq!(config.default_login, "ops");
    assert_eq!(config.default_region, "eu-central");
    assert_eq!(config.default_type, "g6-nanode-1");
    assert_eq!(config.validate(), Ok(()));
}

#[tokio::test]
async fn explicit_path_replaces_discovery() {
    let discovered = TempDir::new().expect("temp dir");
    let discovered_path = discovered.path().join("linforge.toml");
    fs::write(&discovered_path, "personal_access_token = \"discovered\"\n")
        .expect("write discovered config");
    let explicit = TempDir::new().expect("temp dir");
    let explicit_path = explicit.path().join("team.toml");
    fs::write(
        &explicit_path,
        "personal_access_token = \"explicit\"\n\
         ssh_script_timeout_secs = 60\n",
    )
    .expect("write explicit config");
    let discovered_env = discovered_path.to_string_lossy().into_owned();

    let _guard = EnvGuard::apply(
        &[("LINFORGE_CONFIG_PATH", discovered_env.as_str())],
        &["LINODE_PERSONAL_ACCESS_TOKEN", "LINODE_SSH_SCRIPT_TIMEOUT_SECS"],
    )
    .await;

    let config = LinodeConfig::load_with_path(Some(&explicit_path.to_string_lossy()))
        .expect("load config");

    assert_eq!(config.personal_access_token, "explicit");
    assert_eq!(config.script_timeout(), Duration::from_secs(60));
}

#[tokio::test]
async fn missing_explicit_path_is_an_error() {
    let dir = TempDir::new().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    let _guard = EnvGuard::apply(&[], &["LINFORGE_CONFIG_PATH"]).await;

    let error = LinodeConfig::load_with_path(Some(&missing.to_string_lossy()))
        .expect_err("missing file");

    assert!(matches!(error, ConfigError::Parse(_)), "unexpected error: {error:?}");
}
