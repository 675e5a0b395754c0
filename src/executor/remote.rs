// ABOUTME: Remote execution surface over one authenticated SSH connection
// Commands run on exec channels, files move over SFTP and tunnels use direct-tcpip channels

use super::shell::Elevation;
use super::tunnel::{BoxedRelayStream, Dialer, Tunnel};
use super::{ExecError, Executor, OutputStream, StreamSession, TunnelCloser};
use crate::config::{HostKeyPolicy, SshTarget};
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// russh client callbacks. Only host key verification is customised.
pub struct ClientHandler {
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::Fingerprint(expected) => {
                let actual = server_public_key.fingerprint();
                let matches = fingerprint_matches(expected, &actual);
                if !matches {
                    warn!(
                        "Host key fingerprint mismatch: expected {}, got SHA256:{}",
                        expected, actual
                    );
                }
                Ok(matches)
            }
        }
    }
}

fn fingerprint_matches(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
    expected.trim_end_matches('=') == actual.trim_end_matches('=')
}

pub struct RemoteExecutor {
    handle: Arc<Handle<ClientHandler>>,
    elevation: Elevation,
    address: String,
}

impl RemoteExecutor {
    pub async fn connect(target: &SshTarget, elevation: Elevation) -> Result<Self, ExecError> {
        let address = format!("{}:{}", target.host, target.port);
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            policy: target.host_key.clone(),
        };

        let connecting = client::connect(config, (target.host.as_str(), target.port), handler);
        let mut handle = tokio::time::timeout(target.connect_timeout, connecting)
            .await
            .map_err(|_| {
                ExecError::Connect(format!(
                    "timed out after {}s connecting to {}",
                    target.connect_timeout.as_secs(),
                    address
                ))
            })?
            .map_err(|e| match e {
                russh::Error::UnknownKey => {
                    ExecError::HostKey(format!("{address} did not match the pinned fingerprint"))
                }
                other => ExecError::Connect(format!("{address}: {other}")),
            })?;

        authenticate(&mut handle, target).await?;
        info!("SSH session established with {}", address);

        Ok(Self {
            handle: Arc::new(handle),
            elevation,
            address,
        })
    }

    async fn open_sftp(&self) -> Result<SftpSession, ExecError> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(SftpSession::new(channel.into_stream()).await?)
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    target: &SshTarget,
) -> Result<(), ExecError> {
    if let Some(password) = &target.password {
        if handle.authenticate_password(&target.user, password).await? {
            return Ok(());
        }
        debug!("Password authentication rejected for {}", target.user);
    }

    if let Some(key_file) = &target.key_file {
        let key_pair = russh_keys::load_secret_key(key_file, target.key_passphrase.as_deref())?;
        if handle
            .authenticate_publickey(&target.user, Arc::new(key_pair))
            .await?
        {
            return Ok(());
        }
        debug!("Public key authentication rejected for {}", target.user);
    }

    Err(ExecError::Auth {
        user: target.user.clone(),
        host: target.host.clone(),
    })
}

/// Create every missing directory on the way to `dir`.
async fn sftp_mkdir_all(sftp: &SftpSession, dir: &str) -> Result<(), ExecError> {
    for current in dir_prefixes(dir) {
        if !sftp.try_exists(current.as_str()).await? {
            sftp.create_dir(current.as_str()).await?;
        }
    }
    Ok(())
}

/// Each ancestor of `dir` and `dir` itself, shallowest first. A relative
/// `dir` yields relative paths, resolved against the login directory.
fn dir_prefixes(dir: &str) -> Vec<String> {
    let mut current = String::new();
    let mut prefixes = Vec::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() || dir.starts_with('/') {
            current.push('/');
        }
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

fn remote_parent(path: &str) -> Option<&str> {
    path.rsplit_once('/')
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

fn executable_attributes() -> FileAttributes {
    FileAttributes {
        permissions: Some(0o755),
        ..Default::default()
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    async fn execute(&self, command: &str) -> Result<String, ExecError> {
        let wrapped = self.elevation.wrap(command);
        debug!(command = %command, host = %self.address, "Executing remote command");

        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, wrapped).await?;

        let mut output = Vec::new();
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                    output.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();
        match status {
            Some(0) => Ok(output),
            other => Err(ExecError::CommandFailed {
                command: command.to_string(),
                status: other.and_then(|s| i32::try_from(s).ok()),
                output,
            }),
        }
    }

    async fn create_session(&self) -> Result<Box<dyn StreamSession>, ExecError> {
        Ok(Box::new(RemoteSession {
            handle: self.handle.clone(),
            elevation: self.elevation.clone(),
            output: None,
            pump: None,
            close_tx: None,
        }))
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;
        if let Some(parent) = remote_parent(remote_path) {
            sftp_mkdir_all(&sftp, parent).await?;
        }

        // Delete first so the final file holds only the new content
        if sftp.try_exists(remote_path).await? {
            sftp.remove_file(remote_path).await?;
        }

        let mut source = tokio::fs::File::open(local_path).await?;
        let mut target = sftp.create(remote_path).await?;
        let bytes = tokio::io::copy(&mut source, &mut target).await?;
        target.shutdown().await?;
        drop(target);

        sftp.set_metadata(remote_path, executable_attributes()).await?;
        let _ = sftp.close().await;

        debug!(
            "Uploaded {} ({} bytes) to {}:{}",
            local_path.display(),
            bytes,
            self.address,
            remote_path
        );
        Ok(())
    }

    async fn create_script(&self, content: &str, path: &str) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;
        let dir = remote_parent(path).unwrap_or("/");
        sftp_mkdir_all(&sftp, dir).await?;

        let staging = format!("{}/.dev-swap-{}.tmp", dir.trim_end_matches('/'), Uuid::new_v4());
        let mut file = sftp.create(staging.as_str()).await?;
        file.write_all(content.as_bytes()).await?;
        file.shutdown().await?;
        drop(file);
        sftp.set_metadata(staging.as_str(), executable_attributes()).await?;

        // SFTP v3 rename refuses to overwrite
        if sftp.try_exists(path).await? {
            sftp.remove_file(path).await?;
        }
        if let Err(e) = sftp.rename(staging.as_str(), path).await {
            let _ = sftp.remove_file(staging.as_str()).await;
            return Err(ExecError::Transfer {
                path: path.to_string(),
                reason: e.to_string(),
            });
        }
        let _ = sftp.close().await;

        debug!("Wrote script {}:{}", self.address, path);
        Ok(())
    }

    async fn create_tunnel(
        &self,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelCloser>, ExecError> {
        let dialer = SshDialer {
            handle: self.handle.clone(),
            remote_port,
        };
        let tunnel = Tunnel::open(local_port, dialer).await?;
        Ok(Box::new(tunnel))
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}

/// Opens a direct-tcpip channel to `localhost:<remote_port>` on the far host.
struct SshDialer {
    handle: Arc<Handle<ClientHandler>>,
    remote_port: u16,
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, peer: SocketAddr) -> Result<BoxedRelayStream, ExecError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                "localhost",
                u32::from(self.remote_port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// Streaming command on its own exec channel.
pub struct RemoteSession {
    handle: Arc<Handle<ClientHandler>>,
    elevation: Elevation,
    output: Option<DuplexStream>,
    pump: Option<JoinHandle<Option<u32>>>,
    close_tx: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl StreamSession for RemoteSession {
    async fn start(&mut self, command: &str) -> Result<(), ExecError> {
        let wrapped = self.elevation.wrap(command);
        let channel = self.handle.channel_open_session().await?;
        channel.exec(true, wrapped).await?;

        // The reader exists before any data arrives, so callers may read right away
        let (reader, writer) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        let (close_tx, close_rx) = oneshot::channel();

        self.output = Some(reader);
        self.close_tx = Some(close_tx);
        self.pump = Some(tokio::spawn(pump_channel(channel, writer, close_rx)));
        Ok(())
    }

    fn take_output(&mut self) -> Result<OutputStream, ExecError> {
        self.output
            .take()
            .map(|reader| Box::new(reader) as OutputStream)
            .ok_or(ExecError::SessionNotStarted)
    }

    async fn wait(&mut self) -> Result<(), ExecError> {
        let Some(pump) = self.pump.take() else {
            return Ok(());
        };
        let status = pump
            .await
            .map_err(|e| ExecError::Connect(format!("stream task failed: {e}")))?;
        match status {
            Some(0) => Ok(()),
            other => Err(ExecError::CommandFailed {
                command: "streaming session".to_string(),
                status: other.and_then(|s| i32::try_from(s).ok()),
                output: String::new(),
            }),
        }
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        self.output = None;
        Ok(())
    }
}

/// Forward channel output into the session's stream until the command ends or close is requested.
async fn pump_channel(
    mut channel: Channel<Msg>,
    mut writer: DuplexStream,
    mut close_rx: oneshot::Receiver<()>,
) -> Option<u32> {
    let mut status = None;
    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = channel.close().await;
                break;
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. }) => {
                    if writer.write_all(data).await.is_err() {
                        // Reader dropped
                        let _ = channel.close().await;
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => status = Some(exit_status),
                Some(_) => {}
                None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_matching_ignores_prefix_and_padding() {
        assert!(fingerprint_matches("SHA256:abcDEF123", "abcDEF123"));
        assert!(fingerprint_matches("abcDEF123=", "abcDEF123"));
        assert!(!fingerprint_matches("SHA256:abcDEF123", "zzz"));
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/tmp/dev-binaries/app"), Some("/tmp/dev-binaries"));
        assert_eq!(remote_parent("/app"), None);
        assert_eq!(remote_parent("app"), None);
    }

    #[test]
    fn test_dir_prefixes_keep_relative_paths_relative() {
        assert_eq!(dir_prefixes("/tmp/a/b"), vec!["/tmp", "/tmp/a", "/tmp/a/b"]);
        assert_eq!(dir_prefixes("/opt//dev-swap/"), vec!["/opt", "/opt/dev-swap"]);
        assert_eq!(dir_prefixes("work/bin"), vec!["work", "work/bin"]);
        assert!(dir_prefixes("/").is_empty());
    }
}
