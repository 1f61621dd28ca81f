use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vanish::config_models::session_config::SessionConfig;
use vanish::models::session_code::FixedCodes;
use vanish::models::session_code::SessionCode;
use vanish::relay::client::RelayTransport;
use vanish::relay::frame::DEFAULT_MAX_FRAME_LENGTH;
use vanish::relay::server::serve;
use vanish::relay::server::Relay;
use vanish::session::PeerSession;
use vanish::session::SessionSnapshot;
use vanish::session_loop::SessionDriver;
use vanish::session_loop::SessionHandle;

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(5);

pub struct RelayNode {
    pub address: SocketAddr,
    pub relay: Arc<Relay>,
    _server: JoinHandle<Result<()>>,
}

impl RelayNode {
    /// Start a relay on an ephemeral local port.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let relay = Arc::new(Relay::default());
        let server = tokio::spawn(serve(listener, relay.clone(), DEFAULT_MAX_FRAME_LENGTH));

        Ok(Self {
            address,
            relay,
            _server: server,
        })
    }

    /// Start a session that will use `codes`, in order, as its local code.
    pub async fn session(&self, codes: &[&str], config: SessionConfig) -> Result<SessionHandle> {
        let codes = codes
            .iter()
            .map(|code| code.parse::<SessionCode>())
            .collect::<Result<Vec<_>, _>>()?;
        let (transport, events) =
            RelayTransport::connect(self.address, DEFAULT_MAX_FRAME_LENGTH).await?;
        let session = PeerSession::new(transport, FixedCodes::new(codes));
        let (handle, _join_handle) = SessionDriver::spawn(session, events, &config);
        Ok(handle)
    }

    /// Start a session and wait until its code is registered.
    pub async fn ready_session(&self, code: &str) -> Result<SessionHandle> {
        let handle = self.session(&[code], SessionConfig::default()).await?;
        handle.register().await?;
        wait_until(&handle, |s| s.ready).await?;
        Ok(handle)
    }
}

/// Wait until the session's state satisfies `condition`.
pub async fn wait_until(
    handle: &SessionHandle,
    condition: impl FnMut(&SessionSnapshot) -> bool,
) -> Result<SessionSnapshot> {
    let mut snapshots = handle.subscribe();
    let snapshot = tokio::time::timeout(PATIENCE, snapshots.wait_for(condition))
        .await
        .context("timed out waiting for session state")??
        .clone();
    Ok(snapshot)
}
