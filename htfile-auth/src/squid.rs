//! What Squid needs to run the auth helper against the vault: the helper
//! program path and the `auth_param` lines carrying the published state.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::AuthenticationScheme;
use crate::state::PublishedState;

/// Directories Squid packages install their helpers into, in lookup order.
pub const SQUID_TOOLS_DIRS: [&str; 2] = ["/usr/lib/squid", "/usr/lib/squid3"];

pub const DIGEST_AUTH_PROGRAM: &str = "digest_file_auth";
pub const BASIC_AUTH_PROGRAM: &str = "basic_ncsa_auth";

#[derive(Debug, Error)]
pub enum SquidError {
    #[error("Squid tools path can't be found (searched {searched})")]
    ToolsNotFound { searched: String },
}

/// First existing directory among `candidates`.
pub fn locate_tools_dir<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf, SquidError> {
    candidates
        .iter()
        .map(|dir| dir.as_ref())
        .find(|dir| dir.is_dir())
        .map(Path::to_path_buf)
        .ok_or_else(|| SquidError::ToolsNotFound {
            searched: candidates
                .iter()
                .map(|dir| dir.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Command line of the helper program for the published scheme.
pub fn helper_program(state: &PublishedState, tools_dir: &Path) -> String {
    match state.scheme {
        AuthenticationScheme::Digest => format!(
            "{} -c {}",
            tools_dir.join(DIGEST_AUTH_PROGRAM).display(),
            state.vault_path.display()
        ),
        AuthenticationScheme::Basic => format!(
            "{} {}",
            tools_dir.join(BASIC_AUTH_PROGRAM).display(),
            state.vault_path.display()
        ),
    }
}

/// `auth_param` directives for `squid.conf`. Nonce settings only exist for
/// the digest scheme.
pub fn render_auth_params(state: &PublishedState, tools_dir: &Path) -> Vec<String> {
    let scheme = state.scheme.as_str();
    let mut lines = vec![
        format!("auth_param {scheme} program {}", helper_program(state, tools_dir)),
        format!(
            "auth_param {scheme} children {} startup={} idle={}",
            state.workers_max, state.workers_startup, state.workers_idle
        ),
        format!("auth_param {scheme} realm {}", state.realm),
    ];
    if state.scheme == AuthenticationScheme::Digest {
        lines.push(format!(
            "auth_param {scheme} nonce_garbage_interval {} minutes",
            state.nonce_garbage_interval
        ));
        lines.push(format!(
            "auth_param {scheme} nonce_max_duration {} minutes",
            state.nonce_max_duration
        ));
        lines.push(format!(
            "auth_param {scheme} nonce_max_count {}",
            state.nonce_max_count
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(scheme: AuthenticationScheme) -> PublishedState {
        PublishedState {
            scheme,
            realm: "proxy".to_string(),
            vault_path: PathBuf::from("/etc/squid/passwords"),
            vault_exists: true,
            workers_max: 20,
            workers_startup: 1,
            workers_idle: 2,
            nonce_garbage_interval: 5,
            nonce_max_duration: 30,
            nonce_max_count: 50,
        }
    }

    #[test]
    fn renders_digest_params() {
        let tools_dir = Path::new("/usr/lib/squid");
        let lines = render_auth_params(&state(AuthenticationScheme::Digest), tools_dir);
        assert_eq!(
            lines,
            vec![
                "auth_param digest program /usr/lib/squid/digest_file_auth -c /etc/squid/passwords",
                "auth_param digest children 20 startup=1 idle=2",
                "auth_param digest realm proxy",
                "auth_param digest nonce_garbage_interval 5 minutes",
                "auth_param digest nonce_max_duration 30 minutes",
                "auth_param digest nonce_max_count 50",
            ]
        );
    }

    #[test]
    fn renders_basic_params_without_nonces() {
        let tools_dir = Path::new("/usr/lib/squid3");
        let lines = render_auth_params(&state(AuthenticationScheme::Basic), tools_dir);
        assert_eq!(
            lines[0],
            "auth_param basic program /usr/lib/squid3/basic_ncsa_auth /etc/squid/passwords"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| !line.contains("nonce")));
    }

    #[test]
    fn locates_first_existing_tools_dir() {
        let dir = tempdir().expect("temp dir");
        let squid3 = dir.path().join("squid3");
        std::fs::create_dir(&squid3).unwrap();
        let candidates = [dir.path().join("squid"), squid3.clone()];
        assert_eq!(locate_tools_dir(&candidates).unwrap(), squid3);

        let err = locate_tools_dir(&[dir.path().join("missing")]).unwrap_err();
        assert!(err.to_string().contains("can't be found"));
    }
}
