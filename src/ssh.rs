use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::{keys, Channel, Disconnect, MethodKind};
use tracing::{debug, info, warn};

use crate::error::{Result, SshError};
use crate::model::HostProfile;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
const MAX_KEYBOARD_INTERACTIVE_ROUNDS: usize = 4;

pub type SessionHandle = client::Handle<AcceptAllClient>;

pub struct AcceptAllClient;

impl client::Handler for AcceptAllClient {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        async { Ok(true) }
    }
}

/// One authenticated connection to one host. At most one operation should
/// be in flight per session; concurrent callers need their own instance.
pub struct Session {
    profile: HostProfile,
    handle: Option<SessionHandle>,
}

impl Session {
    pub fn new(profile: HostProfile) -> Self {
        Self {
            profile,
            handle: None,
        }
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Dials and authenticates within [`CONNECT_TIMEOUT`]. On failure the
    /// session stays unconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            debug!("{} is already connected", self.profile.name);
            return Ok(());
        }
        let handle = dial(&self.profile, CONNECT_TIMEOUT).await?;
        info!("connected to {} ({})", self.profile.name, self.profile.address());
        self.handle = Some(handle);
        Ok(())
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        if let Err(err) = self.close().await {
            warn!("ignoring close error during reconnect: {err}");
        }
        self.connect().await
    }

    /// Idempotent; a no-op on an unconnected session.
    pub async fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        debug!("disconnecting from {}", self.profile.name);
        handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|err| SshError::connection(self.profile.address(), err))
    }

    pub async fn ensure_connected(&mut self) -> Result<()> {
        if !self.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }

    pub fn handle(&self) -> Result<&SessionHandle> {
        self.handle.as_ref().ok_or(SshError::NotConnected)
    }

    pub async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        self.handle()?
            .channel_open_session()
            .await
            .map_err(|err| SshError::Channel(format!("failed to open channel: {err}")))
    }
}

pub async fn test_connection(profile: &HostProfile) -> Result<()> {
    let handle = dial(profile, PROBE_TIMEOUT).await?;
    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await;
    Ok(())
}

async fn dial(profile: &HostProfile, timeout: Duration) -> Result<SessionHandle> {
    let address = profile.address();
    match tokio::time::timeout(timeout, handshake(profile, &address)).await {
        Ok(result) => result,
        Err(_) => Err(SshError::connection(
            address,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}

fn client_config() -> client::Config {
    let mut config = client::Config::default();
    config.inactivity_timeout = None;
    config.keepalive_interval = Some(KEEPALIVE_INTERVAL);
    // 0 means "do not auto-close after missed keepalive replies".
    config.keepalive_max = 0;
    config
}

async fn handshake(profile: &HostProfile, address: &str) -> Result<SessionHandle> {
    debug!("connecting TCP to {address}");
    let tcp = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|err| SshError::connection(address, err))?;
    let _ = tcp.set_nodelay(true);

    let mut handle = client::connect_stream(Arc::new(client_config()), tcp, AcceptAllClient)
        .await
        .map_err(|err| SshError::connection(address, format!("SSH handshake failed: {err}")))?;

    let username = profile.username.trim();
    let accepted = authenticate(&mut handle, username, &profile.credential)
        .await
        .map_err(|err| SshError::connection(address, format!("authentication failed: {err}")))?;
    if !accepted {
        return Err(SshError::connection(
            address,
            format!("authentication rejected for user {username:?}"),
        ));
    }
    Ok(handle)
}

/// Password first. Servers that only allow keyboard-interactive get the same
/// password for every hidden prompt.
async fn authenticate(
    handle: &mut SessionHandle,
    username: &str,
    password: &str,
) -> Result<bool, russh::Error> {
    let remaining = match handle.authenticate_password(username, password).await? {
        AuthResult::Success => return Ok(true),
        AuthResult::Failure {
            remaining_methods, ..
        } => remaining_methods,
    };
    if password.is_empty() || !remaining.iter().any(|m| *m == MethodKind::KeyboardInteractive) {
        return Ok(false);
    }

    debug!("password rejected; trying keyboard-interactive");
    let mut reply = handle
        .authenticate_keyboard_interactive_start(username, None::<String>)
        .await?;
    for _ in 0..MAX_KEYBOARD_INTERACTIVE_ROUNDS {
        match reply {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let responses = prompts
                    .iter()
                    .map(|p| if p.echo { String::new() } else { password.to_string() })
                    .collect();
                reply = handle
                    .authenticate_keyboard_interactive_respond(responses)
                    .await?;
            }
        }
    }
    Ok(matches!(reply, KeyboardInteractiveAuthResponse::Success))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, TestServer};

    #[test]
    fn new_session_is_unconnected() {
        let session = Session::new(HostProfile::new("db1", "10.0.0.5", 22, "ops", "x"));
        assert!(!session.is_connected());
        assert!(matches!(session.handle(), Err(SshError::NotConnected)));
    }

    #[tokio::test]
    async fn close_on_unconnected_session_is_a_no_op() {
        let mut session = Session::new(HostProfile::new("db1", "10.0.0.5", 22, "ops", "x"));
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn open_channel_requires_connection() {
        let session = Session::new(HostProfile::new("db1", "10.0.0.5", 22, "ops", "x"));
        assert!(matches!(
            session.open_channel().await,
            Err(SshError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn refused_dial_leaves_session_unconnected() {
        // Bind then drop a listener to get a local port nobody is serving.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = Session::new(HostProfile::new("dead", "127.0.0.1", port, "ops", "x"));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SshError::Connection { .. }));
        assert!(!session.is_connected());

        let err = session.reconnect().await.unwrap_err();
        assert!(matches!(err, SshError::Connection { .. }));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn silent_server_times_out_as_connection_error() {
        // Accepts TCP but never speaks SSH.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let profile = HostProfile::new("mute", "127.0.0.1", port, "ops", "x");
        let Err(err) = dial(&profile, Duration::from_millis(200)).await else {
            panic!("handshake against a mute server should not succeed");
        };
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn connect_then_close() {
        let server = TestServer::start().await;
        let mut session = Session::new(server.profile(testing::PASSWORD));
        session.connect().await.unwrap();
        assert!(session.is_connected());
        session.open_channel().await.unwrap();

        session.close().await.unwrap();
        assert!(!session.is_connected());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_dials_a_fresh_connection() {
        let server = TestServer::start().await;
        let mut session = Session::new(server.profile(testing::PASSWORD));
        session.connect().await.unwrap();
        // Already connected: no second dial.
        session.connect().await.unwrap();
        assert_eq!(server.connections(), 1);

        session.reconnect().await.unwrap();
        assert!(session.is_connected());
        assert_eq!(server.connections(), 2);
        session.open_channel().await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_is_a_connection_error() {
        let server = TestServer::start().await;
        let mut session = Session::new(server.profile("wrong"));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SshError::Connection { .. }));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connection_checks_credentials() {
        let server = TestServer::start().await;
        test_connection(&server.profile(testing::PASSWORD)).await.unwrap();
        assert!(test_connection(&server.profile("wrong")).await.is_err());
    }
}
