//! Installed-state queries and command-line installs through `mas`.

use serde::{Deserialize, Serialize};
use std::process::{Command, Output};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Could not find '{0}' in the Mac App Store. Is the name correct and do you own the app?")]
    InvalidAppName(String),
}

/// Answers whether an app is present on the system, without touching the UI.
pub trait InstalledState: Send + Sync {
    fn installed(&self, app_name: &str) -> Result<bool, RegistryError>;
    fn upgradable(&self, app_name: &str) -> Result<bool, RegistryError>;
}

/// One line of `mas list`, `mas search` or `mas outdated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasEntry {
    pub id: u64,
    pub name: String,
    /// For `outdated`, the "current -> latest" text as printed.
    pub version: Option<String>,
}

/// Parses `  409183694  Keynote  (12.2)` style lines. Lines that do not start
/// with a numeric id (headers, warnings) are skipped.
pub fn parse_entries(output: &str) -> Vec<MasEntry> {
    output.lines().filter_map(parse_entry).collect()
}

fn parse_entry(line: &str) -> Option<MasEntry> {
    let line = line.trim();
    let (id, rest) = line.split_once(char::is_whitespace)?;
    let id = id.parse::<u64>().ok()?;
    let rest = rest.trim();

    let (name, version) = match rest.rfind(" (") {
        Some(pos) if rest.ends_with(')') => (
            rest[..pos].trim(),
            Some(rest[pos + 2..rest.len() - 1].trim().to_string()),
        ),
        _ => (rest, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(MasEntry {
        id,
        name: name.to_string(),
        version,
    })
}

const NO_RESULTS: &str = "no results found";

fn reports_no_results(output: &Output) -> bool {
    [&output.stdout, &output.stderr]
        .iter()
        .any(|stream| String::from_utf8_lossy(stream).to_lowercase().contains(NO_RESULTS))
}

fn command_failed(command: String, output: &Output) -> RegistryError {
    RegistryError::CommandFailed {
        command,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn find_named<'a>(entries: &'a [MasEntry], app_name: &str) -> Option<&'a MasEntry> {
    entries.iter().find(|e| e.name == app_name)
}

/// How to invoke `mas`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasConfig {
    pub program: String,
    /// Run every command as this user through `sudo -u`.
    pub system_user: Option<String>,
    /// Wrap commands in `reattach-to-user-namespace`, needed from tmux and
    /// some daemons to reach the user's login session.
    pub use_rtun: bool,
}

impl Default for MasConfig {
    fn default() -> Self {
        Self {
            program: "mas".to_string(),
            system_user: None,
            use_rtun: false,
        }
    }
}

impl MasConfig {
    /// Full argv for a `mas` subcommand with the configured wrappers applied.
    pub fn argv<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(user) = &self.system_user {
            argv.extend(["sudo".to_string(), "-u".to_string(), user.clone()]);
        }
        if self.use_rtun {
            argv.push("reattach-to-user-namespace".to_string());
        }
        argv.push(self.program.clone());
        argv.extend(args.iter().map(|a| a.as_ref().to_string()));
        argv
    }
}

/// [`InstalledState`] backed by the `mas` command-line tool.
#[derive(Debug, Clone, Default)]
pub struct MasRegistry {
    config: MasConfig,
}

impl MasRegistry {
    pub fn new(config: MasConfig) -> Self {
        Self { config }
    }

    fn output(&self, args: &[&str]) -> Result<(String, Output), RegistryError> {
        let argv = self.config.argv(args);
        let command_line = argv.join(" ");
        debug!(command = %command_line, "running mas");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|source| RegistryError::Spawn {
                program: argv[0].clone(),
                source,
            })?;
        Ok((command_line, output))
    }

    fn run(&self, args: &[&str]) -> Result<String, RegistryError> {
        let (command_line, output) = self.output(args)?;
        if !output.status.success() {
            return Err(command_failed(command_line, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn list(&self) -> Result<Vec<MasEntry>, RegistryError> {
        Ok(parse_entries(&self.run(&["list"])?))
    }

    pub fn outdated(&self) -> Result<Vec<MasEntry>, RegistryError> {
        Ok(parse_entries(&self.run(&["outdated"])?))
    }

    /// Store search. An empty result only when mas says nothing matched;
    /// any other failure (offline, not signed in) is returned as is.
    pub fn search(&self, app_name: &str) -> Result<Vec<MasEntry>, RegistryError> {
        let (command_line, output) = self.output(&["search", app_name])?;
        if output.status.success() {
            return Ok(parse_entries(&String::from_utf8_lossy(&output.stdout)));
        }
        if reports_no_results(&output) {
            debug!(app_name, "no search results");
            return Ok(Vec::new());
        }
        Err(command_failed(command_line, &output))
    }

    /// Store id for an app name, checking installed apps before searching the store.
    pub fn app_id_for(&self, app_name: &str) -> Result<Option<u64>, RegistryError> {
        if let Some(entry) = find_named(&self.list()?, app_name) {
            return Ok(Some(entry.id));
        }
        Ok(find_named(&self.search(app_name)?, app_name).map(|e| e.id))
    }

    /// Installs the app unless it is already there. Returns whether anything changed.
    #[instrument(skip(self))]
    pub fn install(&self, app_name: &str) -> Result<bool, RegistryError> {
        if self.installed(app_name)? {
            debug!("already installed");
            return Ok(false);
        }
        self.install_by_name(app_name)?;
        Ok(true)
    }

    /// Installs if missing, otherwise reinstalls when `mas outdated` lists it.
    #[instrument(skip(self))]
    pub fn upgrade(&self, app_name: &str) -> Result<bool, RegistryError> {
        if self.installed(app_name)? && !self.upgradable(app_name)? {
            debug!("installed and up to date");
            return Ok(false);
        }
        self.install_by_name(app_name)?;
        Ok(true)
    }

    fn install_by_name(&self, app_name: &str) -> Result<(), RegistryError> {
        let id = self
            .app_id_for(app_name)?
            .ok_or_else(|| RegistryError::InvalidAppName(app_name.to_string()))?;
        info!(app_name, id, "Installing with mas");
        self.run(&["install", &id.to_string()])?;
        Ok(())
    }
}

impl InstalledState for MasRegistry {
    fn installed(&self, app_name: &str) -> Result<bool, RegistryError> {
        Ok(find_named(&self.list()?, app_name).is_some())
    }

    fn upgradable(&self, app_name: &str) -> Result<bool, RegistryError> {
        Ok(find_named(&self.outdated()?, app_name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_output_with_padding_and_versions() {
        let out = "\
 409183694  Keynote                (12.2)
 497799835  Xcode                  (15.0.1)
1295203466  Microsoft Remote Desktop  (10.9.4)
";
        let entries = parse_entries(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, 409183694);
        assert_eq!(entries[0].name, "Keynote");
        assert_eq!(entries[0].version.as_deref(), Some("12.2"));
        assert_eq!(entries[2].name, "Microsoft Remote Desktop");
    }

    #[test]
    fn parses_outdated_arrows_and_skips_noise() {
        let out = "Warning: no new versions\n497799835 Xcode (15.0 -> 15.1)\n\n";
        let entries = parse_entries(out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version.as_deref(), Some("15.0 -> 15.1"));
    }

    #[test]
    fn names_with_parentheses_keep_their_text() {
        let entry = parse_entry("123  Tool (Pro) Edition  (1.0)").unwrap();
        assert_eq!(entry.name, "Tool (Pro) Edition");
        let entry = parse_entry("123  Plain Name").unwrap();
        assert_eq!(entry.name, "Plain Name");
        assert_eq!(entry.version, None);
    }

    #[test]
    fn exact_name_match_only() {
        let entries = parse_entries("1 Keynote (12.2)\n2 Keynote Themes (1.0)\n");
        assert_eq!(find_named(&entries, "Keynote").map(|e| e.id), Some(1));
        assert!(find_named(&entries, "keynote").is_none());
    }

    #[test]
    fn argv_applies_user_and_namespace_wrappers() {
        let plain = MasConfig::default();
        assert_eq!(plain.argv(&["list"]), vec!["mas", "list"]);

        let wrapped = MasConfig {
            program: "/usr/local/bin/mas".to_string(),
            system_user: Some("builder".to_string()),
            use_rtun: true,
        };
        assert_eq!(
            wrapped.argv(&["install", "409183694"]),
            vec![
                "sudo",
                "-u",
                "builder",
                "reattach-to-user-namespace",
                "/usr/local/bin/mas",
                "install",
                "409183694"
            ]
        );
    }

    #[test]
    fn invalid_app_name_message() {
        let err = RegistryError::InvalidAppName("Nope".to_string());
        assert_eq!(
            err.to_string(),
            "Could not find 'Nope' in the Mac App Store. Is the name correct and do you own the app?"
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let registry = MasRegistry::new(MasConfig {
            program: "definitely-not-a-real-mas-binary".to_string(),
            ..MasConfig::default()
        });
        assert!(matches!(registry.list(), Err(RegistryError::Spawn { .. })));
    }

    #[cfg(unix)]
    mod with_fake_mas {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use tempfile::TempDir;

        /// A shell script standing in for `mas`. Every invocation is appended
        /// to a log so tests can assert on the commands that ran.
        struct FakeMas {
            dir: TempDir,
            log: PathBuf,
        }

        impl FakeMas {
            /// `search` is a shell snippet run for `mas search`.
            fn new(list: &str, outdated: &str, search: &str) -> Self {
                let dir = tempfile::tempdir().unwrap();
                let log = dir.path().join("calls.log");
                let script = format!(
                    "#!/bin/sh\n\
                     echo \"$*\" >> '{log}'\n\
                     case \"$1\" in\n\
                     list) printf '%s' '{list}' ;;\n\
                     outdated) printf '%s' '{outdated}' ;;\n\
                     search) {search} ;;\n\
                     install) echo \"==> Installed $2\" ;;\n\
                     *) exit 64 ;;\n\
                     esac\n",
                    log = log.display(),
                );
                let program = dir.path().join("mas");
                std::fs::write(&program, script).unwrap();
                std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
                Self { dir, log }
            }

            fn registry(&self) -> MasRegistry {
                MasRegistry::new(MasConfig {
                    program: self.dir.path().join("mas").display().to_string(),
                    ..MasConfig::default()
                })
            }

            fn calls(&self) -> Vec<String> {
                std::fs::read_to_string(&self.log)
                    .unwrap_or_default()
                    .lines()
                    .map(str::to_string)
                    .collect()
            }
        }

        const FOUND: &str = "printf '  409183694  Keynote  (12.2)\\n  361285480  Keynote Themes  (1.0)\\n'";
        const NOTHING: &str = "echo 'No results found' >&2; exit 1";
        const OFFLINE: &str = "echo 'Error: The Internet connection appears to be offline.' >&2; exit 1";

        #[test]
        fn search_failure_other_than_no_results_is_propagated() {
            let mas = FakeMas::new("", "", OFFLINE);
            let err = mas.registry().install("Keynote").unwrap_err();
            match err {
                RegistryError::CommandFailed { command, stderr, .. } => {
                    assert!(command.ends_with("search Keynote"));
                    assert!(stderr.contains("offline"));
                }
                other => panic!("expected CommandFailed, got {other:?}"),
            }
            assert_eq!(mas.calls(), vec!["list", "list", "search Keynote"]);
        }

        #[test]
        fn no_results_is_an_invalid_app_name() {
            let mas = FakeMas::new("", "", NOTHING);
            assert!(mas.registry().search("Keynote").unwrap().is_empty());
            let err = mas.registry().install("Keynote").unwrap_err();
            assert!(matches!(err, RegistryError::InvalidAppName(name) if name == "Keynote"));
            assert!(!mas.calls().iter().any(|c| c.starts_with("install")));
        }

        #[test]
        fn install_skips_listed_apps() {
            let mas = FakeMas::new("409183694  Keynote  (12.2)\n", "", FOUND);
            assert!(!mas.registry().install("Keynote").unwrap());
            assert_eq!(mas.calls(), vec!["list"]);
        }

        #[test]
        fn install_resolves_the_id_through_search() {
            let mas = FakeMas::new("497799835  Xcode  (15.0)\n", "", FOUND);
            assert!(mas.registry().install("Keynote").unwrap());
            assert_eq!(
                mas.calls(),
                vec!["list", "list", "search Keynote", "install 409183694"]
            );
        }

        #[test]
        fn upgrade_reinstalls_only_outdated_apps() {
            let listed = "409183694  Keynote  (12.1)\n";

            let current = FakeMas::new(listed, "", FOUND);
            assert!(!current.registry().upgrade("Keynote").unwrap());
            assert_eq!(current.calls(), vec!["list", "outdated"]);

            let stale = FakeMas::new(listed, "409183694 Keynote (12.1 -> 12.2)\n", FOUND);
            assert!(stale.registry().upgrade("Keynote").unwrap());
            assert_eq!(
                stale.calls(),
                vec!["list", "outdated", "list", "install 409183694"]
            );
        }

        #[test]
        fn failed_install_surfaces_mas_stderr() {
            let mas = FakeMas::new("", "", FOUND);
            let program = mas.dir.path().join("mas");
            let script = std::fs::read_to_string(&program)
                .unwrap()
                .replace(
                    "install) echo \"==> Installed $2\" ;;",
                    "install) echo 'Error: Not signed in' >&2; exit 1 ;;",
                );
            std::fs::write(&program, script).unwrap();

            let err = mas.registry().install("Keynote").unwrap_err();
            assert!(matches!(
                err,
                RegistryError::CommandFailed { ref stderr, .. } if stderr == "Error: Not signed in"
            ));
        }
    }
}
