//! Unit tests for the `linforge` CLI binary implementation.

use super::*;
use linforge::test_support::SAMPLE_KEY;
use rstest::rstest;

fn create_args(label: &str) -> CreateCommand {
    CreateCommand {
        label: label.to_owned(),
        region: None,
        instance_type: None,
        image: None,
        login: None,
        authorized_keys: vec![SAMPLE_KEY.to_owned()],
        authorized_keys_file: None,
        tags: Vec::new(),
        bootstrap: BootstrapArg::Remote,
        delete_on_bootstrap_failure: false,
        pin_host_key: None,
    }
}

#[test]
fn provision_spec_falls_back_to_configured_defaults() {
    let config = LinodeConfig {
        default_region: String::from("eu-west"),
        default_login: String::from("deploy"),
        ..LinodeConfig::default()
    };

    let spec = provision_spec(&create_args("web-1"), &config).expect("valid spec");

    assert_eq!(spec.label, "web-1");
    assert_eq!(spec.region, "eu-west");
    assert_eq!(spec.instance_type, config.default_type);
    assert_eq!(spec.image, config.default_image);
    assert_eq!(spec.login, "deploy");
    assert_eq!(spec.bootstrap, BootstrapMode::Remote);
    assert_eq!(spec.on_bootstrap_failure, BootstrapFailurePolicy::KeepInstance);
}

#[test]
fn provision_spec_prefers_explicit_arguments() {
    let args = CreateCommand {
        region: Some(String::from("us-east")),
        instance_type: Some(String::from("g6-standard-2")),
        image: Some(String::from("linode/debian12")),
        login: Some(String::from("ops")),
        tags: vec![String::from("ansible"), String::from("prod")],
        delete_on_bootstrap_failure: true,
        ..create_args("db-1")
    };

    let spec = provision_spec(&args, &LinodeConfig::default()).expect("valid spec");

    assert_eq!(spec.region, "us-east");
    assert_eq!(spec.instance_type, "g6-standard-2");
    assert_eq!(spec.image, "linode/debian12");
    assert_eq!(spec.login, "ops");
    assert_eq!(spec.tags, vec![String::from("ansible"), String::from("prod")]);
    assert_eq!(
        spec.on_bootstrap_failure,
        BootstrapFailurePolicy::DeleteInstance
    );
}

#[rstest]
#[case::remote(BootstrapArg::Remote, BootstrapMode::Remote)]
#[case::payload(BootstrapArg::Payload, BootstrapMode::Payload)]
#[case::none(BootstrapArg::None, BootstrapMode::None)]
fn bootstrap_argument_maps_to_mode(#[case] arg: BootstrapArg, #[case] expected: BootstrapMode) {
    assert_eq!(bootstrap_mode(arg), expected);
}

#[test]
fn provision_spec_appends_keys_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "# team keys\n\n{SAMPLE_KEY}").expect("write keys");
    let path = file.path().to_string_lossy().into_owned();
    let args = CreateCommand {
        authorized_keys_file: Some(path),
        ..create_args("web-1")
    };

    let spec = provision_spec(&args, &LinodeConfig::default()).expect("valid spec");

    assert_eq!(spec.authorized_keys.len(), 2);
}

#[test]
fn provision_spec_requires_a_key() {
    let args = CreateCommand {
        authorized_keys: Vec::new(),
        ..create_args("web-1")
    };

    let err = provision_spec(&args, &LinodeConfig::default()).expect_err("no keys");

    assert!(matches!(err, CliError::Spec(SpecError::NoKeys)), "unexpected error: {err}");
}

#[test]
fn provision_spec_reports_unreadable_key_files() {
    let args = CreateCommand {
        authorized_keys_file: Some(String::from("/nonexistent/linforge/keys")),
        ..create_args("web-1")
    };

    let err = provision_spec(&args, &LinodeConfig::default()).expect_err("missing file");

    assert!(
        matches!(err, CliError::Keys(AuthorizedKeysError::Read { .. })),
        "unexpected error: {err}"
    );
}

#[test]
fn write_error_prefixes_the_message() {
    let mut buffer = Vec::new();
    let err = CliError::Format(FormatError::UnknownOption {
        option: String::from("bogus"),
    });

    write_error(&mut buffer, &err);

    let rendered = String::from_utf8(buffer).expect("utf8 output");
    assert!(rendered.starts_with("error: invalid --format: "));
    assert!(rendered.contains("bogus"));
    assert!(rendered.ends_with('\n'));
}

#[rstest]
#[case::before_subcommand(&["linforge", "--config", "/etc/linforge/team.toml", "list"])]
#[case::after_subcommand(&["linforge", "list", "--config", "/etc/linforge/team.toml"])]
fn config_flag_is_accepted_anywhere(#[case] argv: &[&str]) {
    let cli = Cli::try_parse_from(argv).expect("valid arguments");

    assert_eq!(cli.config.as_deref(), Some("/etc/linforge/team.toml"));
    assert!(matches!(cli.command, Command::List(_)));
}

#[test]
fn load_config_reports_a_missing_explicit_file() {
    let err = load_config(Some("/nonexistent/linforge/team.toml")).expect_err("missing file");

    assert!(
        matches!(err, CliError::Config(ConfigError::Parse(_))),
        "unexpected error: {err}"
    );
}
