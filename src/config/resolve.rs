// ABOUTME: Pure merge of the parsed config into one RuntimeConfig for the chosen entries
// Precedence is component over host over [defaults] over built-in values

use super::file::{ComponentEntry, Config, Defaults, HostEntry, HostKind, ProjectEntry};
use super::runtime::{
    expand_home, ComponentRuntime, DebuggerSettings, HostKeyPolicy, HostMode, HostRuntime,
    RuntimeConfig, SshTarget, TargetMode, DEFAULT_COMPOSE_COMMAND, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DEBOUNCE, DEFAULT_DEBUGGER_PORT, DEFAULT_DOCKER_COMMAND, DEFAULT_LOG_TAIL,
    DEFAULT_RECONNECT_DELAY, DEFAULT_SSH_PORT, DEFAULT_WORKING_DIR,
};
use super::ConfigError;
use crate::executor::Elevation;
use std::collections::BTreeMap;
use std::time::Duration;

/// Name of the host used when the file declares no `[hosts]` table.
pub const IMPLICIT_LOCAL_HOST: &str = "local";

/// Entries picked on the command line. `None` means "the only one configured".
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub component: Option<String>,
    pub host: Option<String>,
    pub project: Option<String>,
    /// Overrides the component's `target_service`.
    pub service: Option<String>,
}

impl Config {
    pub fn resolve(&self, selection: &Selection) -> Result<RuntimeConfig, ConfigError> {
        let hosts = self.effective_hosts();

        let (host_name, host, project_name, project) =
            self.select_host_and_project(&hosts, selection)?;
        let (component_name, component) = pick(
            "component",
            selection.component.as_deref(),
            &self.components,
            ConfigError::UnknownComponent,
        )?;

        let host_runtime = resolve_host(host_name, host, &self.defaults)?;
        let component_runtime = resolve_component(
            component_name,
            component,
            &self.defaults,
            selection.service.as_deref(),
        )?;

        let target = if project.adopt_existing {
            TargetMode::Adopt
        } else {
            let compose_dir = non_empty(project.compose_dir.as_deref()).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "project {project_name} needs compose_dir unless adopt_existing is set"
                ))
            })?;
            TargetMode::Compose {
                compose_dir: compose_dir.to_string(),
            }
        };

        Ok(RuntimeConfig {
            component: component_runtime,
            host: host_runtime,
            target,
        })
    }

    fn effective_hosts(&self) -> BTreeMap<String, HostEntry> {
        if self.hosts.is_empty() {
            BTreeMap::from([(IMPLICIT_LOCAL_HOST.to_string(), HostEntry::local())])
        } else {
            self.hosts.clone()
        }
    }

    fn select_host_and_project<'a>(
        &'a self,
        hosts: &'a BTreeMap<String, HostEntry>,
        selection: &Selection,
    ) -> Result<(&'a str, &'a HostEntry, &'a str, &'a ProjectEntry), ConfigError> {
        if let Some(requested) = selection.project.as_deref() {
            let (project_name, project) = self
                .projects
                .get_key_value(requested)
                .ok_or_else(|| ConfigError::UnknownProject(requested.to_string()))?;

            // An explicit project implies its host when none was requested
            let host_request = selection.host.as_deref().or(project.host.as_deref());
            let (host_name, host) = pick("host", host_request, hosts, ConfigError::UnknownHost)?;
            if !belongs_to(project, host_name, host) {
                return Err(ConfigError::Invalid(format!(
                    "project {project_name} does not belong to host {host_name}"
                )));
            }
            return Ok((host_name, host, project_name, project));
        }

        let (host_name, host) = pick(
            "host",
            selection.host.as_deref(),
            hosts,
            ConfigError::UnknownHost,
        )?;
        let candidates: BTreeMap<&String, &ProjectEntry> = self
            .projects
            .iter()
            .filter(|(_, project)| belongs_to(project, host_name, host))
            .collect();

        match candidates.len() {
            0 => Err(ConfigError::Invalid(format!(
                "no project is configured for host {host_name}"
            ))),
            1 => {
                let (name, project) = candidates.into_iter().next().ok_or_else(|| {
                    ConfigError::Invalid(format!("no project is configured for host {host_name}"))
                })?;
                Ok((host_name, host, name.as_str(), project))
            }
            _ => Err(ConfigError::Ambiguous {
                kind: "project",
                choices: candidates.keys().map(|k| (*k).clone()).collect(),
            }),
        }
    }
}

fn belongs_to(project: &ProjectEntry, host_name: &str, host: &HostEntry) -> bool {
    match project.host.as_deref() {
        Some(owner) => owner == host_name,
        None => host.mode == HostKind::Local,
    }
}

/// The requested entry, or the only entry when nothing was requested.
fn pick<'a, T>(
    kind: &'static str,
    requested: Option<&str>,
    entries: &'a BTreeMap<String, T>,
    unknown: fn(String) -> ConfigError,
) -> Result<(&'a str, &'a T), ConfigError> {
    if let Some(name) = requested {
        return entries
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| unknown(name.to_string()));
    }

    let mut iter = entries.iter();
    match (iter.next(), iter.next()) {
        (Some((name, entry)), None) => Ok((name.as_str(), entry)),
        (None, _) => Err(ConfigError::Invalid(format!("no {kind} is configured"))),
        _ => Err(ConfigError::Ambiguous {
            kind,
            choices: entries.keys().cloned().collect(),
        }),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn layered(first: Option<&String>, second: Option<&String>, fallback: &str) -> String {
    non_empty(first.map(String::as_str))
        .or_else(|| non_empty(second.map(String::as_str)))
        .unwrap_or(fallback)
        .to_string()
}

fn resolve_host(
    name: &str,
    host: &HostEntry,
    defaults: &Defaults,
) -> Result<HostRuntime, ConfigError> {
    let use_sudo = host.use_sudo.or(defaults.use_sudo).unwrap_or(false);
    let sudo_password = host
        .sudo_password
        .clone()
        .or_else(|| defaults.sudo_password.clone());

    let mode = match host.mode {
        HostKind::Local => HostMode::Local,
        HostKind::Remote => HostMode::Remote(resolve_ssh_target(name, host)?),
    };

    Ok(HostRuntime {
        name: name.to_string(),
        mode,
        working_dir: layered(
            host.working_dir.as_ref(),
            defaults.working_dir.as_ref(),
            DEFAULT_WORKING_DIR,
        ),
        elevation: Elevation::new(use_sudo, sudo_password),
        docker_command: layered(
            host.docker_command.as_ref(),
            defaults.docker_command.as_ref(),
            DEFAULT_DOCKER_COMMAND,
        ),
        compose_command: layered(
            host.compose_command.as_ref(),
            defaults.compose_command.as_ref(),
            DEFAULT_COMPOSE_COMMAND,
        ),
    })
}

fn resolve_ssh_target(name: &str, host: &HostEntry) -> Result<SshTarget, ConfigError> {
    let address = non_empty(host.host.as_deref())
        .ok_or_else(|| ConfigError::Invalid(format!("host {name} needs an address")))?;
    let user = non_empty(host.user.as_deref())
        .ok_or_else(|| ConfigError::Invalid(format!("host {name} needs a user")))?;

    let password = host.password.clone().filter(|p| !p.is_empty());
    let key_file = non_empty(host.key_file.as_deref()).map(expand_home);
    if password.is_none() && key_file.is_none() {
        return Err(ConfigError::Invalid(format!(
            "host {name} needs a password or key_file"
        )));
    }

    let host_key = match non_empty(host.host_key_fingerprint.as_deref()) {
        Some(fingerprint) => HostKeyPolicy::Fingerprint(fingerprint.to_string()),
        None => HostKeyPolicy::AcceptAny,
    };

    Ok(SshTarget {
        host: address.to_string(),
        port: host.port.unwrap_or(DEFAULT_SSH_PORT),
        user: user.to_string(),
        password,
        key_file,
        key_passphrase: host.key_passphrase.clone().filter(|p| !p.is_empty()),
        host_key,
        connect_timeout: host
            .connect_timeout_secs
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs),
    })
}

fn resolve_component(
    name: &str,
    component: &ComponentEntry,
    defaults: &Defaults,
    service_override: Option<&str>,
) -> Result<ComponentRuntime, ConfigError> {
    let local_binary = non_empty(component.local_binary.as_deref())
        .ok_or_else(|| ConfigError::Invalid(format!("component {name} needs local_binary")))?;
    let target_service = non_empty(service_override)
        .or_else(|| non_empty(component.target_service.as_deref()))
        .ok_or_else(|| ConfigError::Invalid(format!("component {name} needs target_service")))?;
    let container_binary_path = non_empty(component.container_binary_path.as_deref())
        .ok_or_else(|| {
            ConfigError::Invalid(format!("component {name} needs container_binary_path"))
        })?;

    let debugger = DebuggerSettings {
        enabled: component.debugger.enabled,
        port: component
            .debugger
            .port
            .or(defaults.debugger_port)
            .unwrap_or(DEFAULT_DEBUGGER_PORT),
        args: component
            .debugger
            .args
            .as_deref()
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        local_path: non_empty(component.debugger.local_path.as_deref()).map(expand_home),
    };

    let log_file = non_empty(component.log_file.as_deref())
        .or_else(|| non_empty(defaults.log_file.as_deref()))
        .map(expand_home);

    Ok(ComponentRuntime {
        name: name.to_string(),
        local_binary: expand_home(local_binary),
        target_service: target_service.to_string(),
        container_binary_path: container_binary_path.to_string(),
        debugger,
        extra_ports: component.extra_ports.clone(),
        initial_scripts: component.initial_scripts.clone().unwrap_or_default(),
        log_file,
        log_tail: component
            .log_tail
            .or(defaults.log_tail)
            .unwrap_or(DEFAULT_LOG_TAIL),
        debounce: defaults
            .debounce_ms
            .map_or(DEFAULT_DEBOUNCE, Duration::from_millis),
        reconnect_delay: defaults
            .reconnect_delay_ms
            .map_or(DEFAULT_RECONNECT_DELAY, Duration::from_millis),
    })
}
