// ABOUTME: Loads complete config files from disk and checks the resolved runtime values

use dev_swap::config::{
    Config, ConfigError, HostKeyPolicy, HostMode, Selection, TargetMode,
};
use dev_swap::executor::Elevation;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

const TEAM_CONFIG: &str = r#"
[defaults]
use_sudo = true
debugger_port = 40000
log_tail = 200

[hosts.staging]
host = "10.0.0.12"
user = "deploy"
key_file = "/home/dev/.ssh/id_ed25519"
host_key_fingerprint = "SHA256:3y3u1hZcFqf1bV2Z0Gm7kC9yRQ0hW3jD6m8tqvP9uXk"
working_dir = "/opt/dev-swap/"

[hosts.laptop]
mode = "local"
use_sudo = false
compose_command = "docker-compose"

[components.orders]
local_binary = "/work/orders/bin/orders"
target_service = "orders"
container_binary_path = "/usr/local/bin/orders"
extra_ports = [8081, 9090]
initial_scripts = "apk add --no-cache curl"

[components.orders.debugger]
enabled = true
args = "--config /etc/orders.yaml  --verbose"

[projects.shop-staging]
host = "staging"
compose_dir = "/srv/shop"

[projects.shop-local]
compose_dir = "/home/dev/shop"

[projects.legacy]
host = "staging"
adopt_existing = true
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_remote_project_resolves_full_runtime() {
    let file = write_config(TEAM_CONFIG);
    let config = Config::load(file.path()).unwrap();
    let runtime = config
        .resolve(&Selection {
            project: Some("shop-staging".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(runtime.host.name, "staging");
    let HostMode::Remote(target) = &runtime.host.mode else {
        panic!("staging is a remote host");
    };
    assert_eq!(target.host, "10.0.0.12");
    assert_eq!(target.port, 22);
    assert_eq!(target.user, "deploy");
    assert_eq!(target.key_file, Some(PathBuf::from("/home/dev/.ssh/id_ed25519")));
    assert_eq!(target.connect_timeout, Duration::from_secs(10));
    assert_eq!(
        target.host_key,
        HostKeyPolicy::Fingerprint("SHA256:3y3u1hZcFqf1bV2Z0Gm7kC9yRQ0hW3jD6m8tqvP9uXk".to_string())
    );
    assert_eq!(runtime.host.elevation, Elevation::Sudo { password: None });
    assert_eq!(runtime.host.compose_command, "docker compose");

    assert_eq!(
        runtime.target,
        TargetMode::Compose {
            compose_dir: "/srv/shop".to_string()
        }
    );
    assert_eq!(runtime.remote_binary_path(), "/opt/dev-swap/orders");
    assert_eq!(runtime.remote_entry_script_path(), "/opt/dev-swap/entry.sh");
    assert_eq!(runtime.dev_container_name(), "orders-dev");

    let component = &runtime.component;
    assert_eq!(component.extra_ports, vec![8081, 9090]);
    assert_eq!(component.log_tail, 200);
    assert_eq!(component.debounce, Duration::from_millis(500));
    assert!(component.debugger.enabled);
    assert_eq!(component.debugger.port, 40000);
    assert_eq!(
        component.debugger.args,
        vec!["--config", "/etc/orders.yaml", "--verbose"]
    );
}

#[test]
fn test_local_host_picks_unowned_project() {
    let file = write_config(TEAM_CONFIG);
    let runtime = Config::load(file.path())
        .unwrap()
        .resolve(&Selection {
            host: Some("laptop".to_string()),
            service: Some("orders-canary".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert!(matches!(runtime.host.mode, HostMode::Local));
    assert_eq!(runtime.host.elevation, Elevation::None);
    assert_eq!(runtime.host.compose_command, "docker-compose");
    assert_eq!(
        runtime.target,
        TargetMode::Compose {
            compose_dir: "/home/dev/shop".to_string()
        }
    );
    assert_eq!(runtime.component.target_service, "orders-canary");
    assert_eq!(runtime.dev_container_name(), "orders-canary-dev");
}

#[test]
fn test_remote_host_with_two_projects_needs_a_choice() {
    let file = write_config(TEAM_CONFIG);
    let config = Config::load(file.path()).unwrap();

    let err = config
        .resolve(&Selection {
            host: Some("staging".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Several project entries are configured, choose one of: legacy, shop-staging"
    );

    let runtime = config
        .resolve(&Selection {
            project: Some("legacy".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(runtime.target, TargetMode::Adopt);
}

#[test]
fn test_project_on_wrong_host_is_rejected() {
    let file = write_config(TEAM_CONFIG);
    let err = Config::load(file.path())
        .unwrap()
        .resolve(&Selection {
            host: Some("laptop".to_string()),
            project: Some("legacy".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid(ref msg) if msg.contains("does not belong to host laptop")
    ));
}

#[test]
fn test_load_errors_name_the_file() {
    let missing = PathBuf::from("/nonexistent/dev-swap/config.toml");
    let err = Config::load(&missing).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/dev-swap/config.toml"));

    let file = write_config("[components.api\nlocal_binary = 1");
    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}
