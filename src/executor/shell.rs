// ABOUTME: Shell quoting and privilege elevation for every dispatched command
// All escaping lives here so local and remote transports wrap commands identically

/// Quote a value as a single-quoted shell word.
///
/// Embedded single quotes are closed, escaped and reopened (`'\''`), so the
/// shell hands the original bytes back unchanged.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a command argument only when the shell would otherwise interpret it.
pub fn escape_arg(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        quote(value)
    }
}

/// Join already-split arguments into one shell command line.
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| escape_arg(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Privilege elevation policy applied to every command before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Elevation {
    #[default]
    None,
    Sudo { password: Option<String> },
}

impl Elevation {
    pub fn new(use_sudo: bool, password: Option<String>) -> Self {
        if use_sudo {
            Elevation::Sudo {
                password: password.filter(|p| !p.is_empty()),
            }
        } else {
            Elevation::None
        }
    }

    /// Wrap a command so it runs through an elevated `bash -c`.
    pub fn wrap(&self, command: &str) -> String {
        match self {
            Elevation::None => command.to_string(),
            Elevation::Sudo { password: None } => {
                format!("sudo bash -c {}", quote(command))
            }
            // `-p ''` keeps the password prompt out of the captured output
            Elevation::Sudo {
                password: Some(password),
            } => format!(
                "printf '%s\\n' {} | sudo -S -p '' bash -c {}",
                quote(password),
                quote(command)
            ),
        }
    }
}
