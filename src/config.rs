use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_ROLE: &str = "student";
pub const DEFAULT_GENDER: &str = "Male";
pub const PLACEHOLDER_PASSWORD: &str = "$setpassword";

/// Runtime options for the daemon. Built once in `main` and owned by `AppState`.
#[derive(Debug, Clone, Parser)]
#[command(name = "portald", version, about = "Department student-records sidecar")]
pub struct Config {
    /// Workspace directory holding portal.sqlite3. Can also be chosen later with `workspace.select`.
    #[arg(long, env = "PORTAL_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Role assigned to students created by `students.import`.
    #[arg(long, env = "PORTAL_DEFAULT_ROLE", default_value = DEFAULT_ROLE)]
    pub default_role: String,

    /// Gender stored when an intake row leaves it blank.
    #[arg(long, env = "PORTAL_DEFAULT_GENDER", default_value = DEFAULT_GENDER)]
    pub default_gender: String,

    /// Password sentinel for imported accounts; the holder must reset it before logging in.
    #[arg(long, env = "PORTAL_PLACEHOLDER_PASSWORD", default_value = PLACEHOLDER_PASSWORD)]
    pub placeholder_password: String,

    /// tracing filter directive, written to stderr.
    #[arg(long = "log", env = "PORTAL_LOG", default_value = "portald=info")]
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            default_role: DEFAULT_ROLE.to_string(),
            default_gender: DEFAULT_GENDER.to_string(),
            placeholder_password: PLACEHOLDER_PASSWORD.to_string(),
            log_filter: "portald=info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults_without_flags() {
        let cfg = Config::try_parse_from(["portald"]).expect("parse");
        assert_eq!(cfg.default_role, DEFAULT_ROLE);
        assert_eq!(cfg.default_gender, DEFAULT_GENDER);
        assert_eq!(cfg.placeholder_password, PLACEHOLDER_PASSWORD);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "portald",
            "--default-role",
            "alumni",
            "--workspace",
            "/tmp/ws",
        ])
        .expect("parse");
        assert_eq!(cfg.default_role, "alumni");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
    }
}
