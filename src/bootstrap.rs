//! Guest bootstrap script rendering.
//!
//! The script hardens a freshly booted instance: it sets the hostname,
//! disables swap and SSH password authentication, creates the login user,
//! installs its public keys, and grants password-less sudo. Labels, logins,
//! and keys are user supplied, so each is validated against a strict grammar
//! when the [`BootstrapSpec`] is built, and every interpolated value is
//! shell-quoted again while rendering.

use std::borrow::Cow;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use shell_escape::unix::escape;
use thiserror::Error;

/// Maximum length of an instance label.
pub const MAX_LABEL_LEN: usize = 64;

/// Maximum length of a POSIX login name.
pub const MAX_LOGIN_LEN: usize = 32;

/// Public key algorithms accepted in `authorized_keys`.
pub const KEY_TYPES: [&str; 8] = [
    "ssh-ed25519",
    "ssh-rsa",
    "ssh-dss",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// Errors raised while validating bootstrap inputs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// The hostname label is empty, too long, or contains invalid characters.
    #[error("invalid label `{label}`: {reason}")]
    InvalidLabel {
        /// Offending label.
        label: String,
        /// Rule that was violated.
        reason: &'static str,
    },
    /// The login is not a portable user name.
    #[error("invalid login `{login}`: {reason}")]
    InvalidLogin {
        /// Offending login.
        login: String,
        /// Rule that was violated.
        reason: &'static str,
    },
    /// A public key does not follow the OpenSSH public key format.
    #[error("authorized key #{index} is invalid: {reason}")]
    InvalidKey {
        /// Zero-based position of the key in the input.
        index: usize,
        /// Rule that was violated.
        reason: String,
    },
}

/// Validated inputs for the bootstrap script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapSpec {
    label: String,
    login: String,
    authorized_keys: Vec<String>,
}

impl BootstrapSpec {
    /// Validates and captures the bootstrap inputs.
    ///
    /// Keys are trimmed; the order of `authorized_keys` is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when the label, login, or any key fails
    /// validation.
    pub fn new(
        label: &str,
        login: &str,
        authorized_keys: &[String],
    ) -> Result<Self, BootstrapError> {
        validate_label(label)?;
        validate_login(login)?;
        let keys = authorized_keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let trimmed = key.trim();
                validate_public_key(trimmed)
                    .map(|()| trimmed.to_owned())
                    .map_err(|reason| BootstrapError::InvalidKey { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            label: label.to_owned(),
            login: login.to_owned(),
            authorized_keys: keys,
        })
    }

    /// Hostname label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Login user name.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Authorised public keys, in input order.
    #[must_use]
    pub fn authorized_keys(&self) -> &[String] {
        &self.authorized_keys
    }
}

/// Validates and renders the bootstrap script in one step.
///
/// # Errors
///
/// Returns [`BootstrapError`] when any input fails validation.
pub fn render_bootstrap_script(
    label: &str,
    login: &str,
    authorized_keys: &[String],
) -> Result<String, BootstrapError> {
    BootstrapSpec::new(label, login, authorized_keys).map(|spec| BootstrapScript::render(&spec))
}

/// Renderer for the guest bootstrap script.
#[derive(Clone, Copy, Debug, Default)]
pub struct BootstrapScript;

impl BootstrapScript {
    /// Renders the script. Identical inputs always produce identical output.
    #[must_use]
    pub fn render(spec: &BootstrapSpec) -> String {
        render_script(spec)
    }
}

fn render_script(spec: &BootstrapSpec) -> String {
    let label = quote(&spec.label);
    let login = quote(&spec.login);
    let home = quote(&format!("/home/{}", spec.login));
    let ssh_dir = quote(&format!("/home/{}/.ssh", spec.login));
    let authorized_keys = quote(&format!("/home/{}/.ssh/authorized_keys", spec.login));
    let owner = quote(&format!("{0}:{0}", spec.login));
    let sudoers_file = quote(&format!("/etc/sudoers.d/{}", spec.login));
    let sudoers_rule = quote(&format!("{} ALL=(ALL) NOPASSWD:ALL", spec.login));

    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str("set -eu\n");
    push_line(&mut script, &format!("printf '%s\\n' {label} > /etc/hostname"));
    push_line(&mut script, &format!("hostname {label}"));
    script.push_str("sed -i '/^[^#].*[[:space:]]swap[[:space:]]/ s/^/#/' /etc/fstab\n");
    script.push_str("swapoff -a\n");
    script.push_str(
        "sed -i 's/^#\\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config\n",
    );
    push_line(&mut script, &format!("useradd -d {home} -m -s /bin/bash {login}"));
    push_line(&mut script, &format!("mkdir -p {ssh_dir}"));
    push_line(&mut script, &format!("chmod 0700 {ssh_dir}"));
    if !spec.authorized_keys.is_empty() {
        for key in &spec.authorized_keys {
            let quoted_key = quote(key);
            push_line(
                &mut script,
                &format!("printf '%s\\n' {quoted_key} >> {authorized_keys}"),
            );
        }
        push_line(&mut script, &format!("chmod 0600 {authorized_keys}"));
    }
    push_line(&mut script, &format!("chown -R {owner} {ssh_dir}"));
    push_line(
        &mut script,
        &format!("printf '%s\\n' {sudoers_rule} > {sudoers_file}"),
    );
    push_line(&mut script, &format!("chmod 0440 {sudoers_file}"));
    script.push_str(
        "(systemctl reload ssh || systemctl reload sshd || service ssh reload) >/dev/null 2>&1 || true\n",
    );
    script.push_str("exit 0\n");
    script
}

fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

fn push_line(script: &mut String, line: &str) {
    script.push_str(line);
    script.push('\n');
}

/// Checks a hostname label: 1–64 characters from `[A-Za-z0-9._-]`, starting
/// and ending with an alphanumeric character.
///
/// # Errors
///
/// Returns [`BootstrapError::InvalidLabel`] when the label is rejected.
pub fn validate_label(label: &str) -> Result<(), BootstrapError> {
    let fail = |reason| {
        Err(BootstrapError::InvalidLabel {
            label: label.to_owned(),
            reason,
        })
    };
    if label.is_empty() {
        return fail("must not be empty");
    }
    if label.len() > MAX_LABEL_LEN {
        return fail("must be at most 64 characters");
    }
    if !label
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
    {
        return fail("may only contain letters, digits, '.', '_' and '-'");
    }
    let edges_ok = label.chars().next().is_some_and(|ch| ch.is_ascii_alphanumeric())
        && label
            .chars()
            .next_back()
            .is_some_and(|ch| ch.is_ascii_alphanumeric());
    if !edges_ok {
        return fail("must start and end with a letter or digit");
    }
    Ok(())
}

/// Checks a login against the portable user name grammar
/// `[a-z_][a-z0-9_-]{0,31}`. `root` is refused.
///
/// # Errors
///
/// Returns [`BootstrapError::InvalidLogin`] when the login is rejected.
pub fn validate_login(login: &str) -> Result<(), BootstrapError> {
    let fail = |reason| {
        Err(BootstrapError::InvalidLogin {
            login: login.to_owned(),
            reason,
        })
    };
    let mut chars = login.chars();
    let Some(first) = chars.next() else {
        return fail("must not be empty");
    };
    if login.len() > MAX_LOGIN_LEN {
        return fail("must be at most 32 characters");
    }
    if !(first.is_ascii_lowercase() || first == '_') {
        return fail("must start with a lowercase letter or '_'");
    }
    if !chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '_' | '-'))
    {
        return fail("may only contain lowercase letters, digits, '_' and '-'");
    }
    if login == "root" {
        return fail("must not be root");
    }
    Ok(())
}

/// Checks an OpenSSH public key line: `<type> <base64 blob> [comment]`.
///
/// The blob must decode and must embed the same algorithm name as the
/// leading type field. Control characters are rejected anywhere in the line.
///
/// # Errors
///
/// Returns a human readable reason when the key is rejected.
pub fn validate_public_key(key: &str) -> Result<(), String> {
    if key.chars().any(char::is_control) {
        return Err(String::from("contains control characters"));
    }
    let mut fields = key.splitn(3, ' ');
    let key_type = fields.next().unwrap_or_default();
    if !KEY_TYPES.contains(&key_type) {
        return Err(format!("unsupported key type `{key_type}`"));
    }
    let Some(blob) = fields.next().filter(|blob| !blob.is_empty()) else {
        return Err(String::from("missing key data"));
    };
    let decoded = STANDARD
        .decode(blob)
        .map_err(|err| format!("key data is not base64: {err}"))?;
    let embedded = decoded
        .get(..4)
        .and_then(|prefix| <[u8; 4]>::try_from(prefix).ok())
        .and_then(|prefix| usize::try_from(u32::from_be_bytes(prefix)).ok())
        .and_then(|len| 4_usize.checked_add(len))
        .and_then(|end| decoded.get(4..end));
    if embedded != Some(key_type.as_bytes()) {
        return Err(String::from("key data does not match the key type"));
    }
    Ok(())
}
