//! Out-of-band credential exchange: a QR code or text the user carries from
//! one screen to the other.

use airhop_core::{Credentials, OobPayload, Platform, capability};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    EventSender, SessionError, SessionEvent, emit,
    network::{self, NetworkLease, WifiProvider},
};

/// What the joining user handed over.
#[derive(Clone, PartialEq, Eq)]
pub enum OobInput {
    /// Raw text decoded from a QR code: `ssid;password` or a bare password.
    Scanned(String),
    Typed {
        ssid: Option<String>,
        password: String,
    },
}

impl std::fmt::Debug for OobInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OobInput::Scanned(_) => f.write_str("Scanned(<redacted>)"),
            OobInput::Typed { ssid, .. } => f
                .debug_struct("Typed")
                .field("ssid", ssid)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl OobInput {
    pub fn into_credentials(self) -> Result<Credentials, SessionError> {
        let credentials = match self {
            OobInput::Scanned(text) => OobPayload::parse(&text)?.into_credentials()?,
            OobInput::Typed { ssid, password } => {
                Credentials::from_manual(ssid.as_deref(), &password)?
            }
        };
        Ok(credentials)
    }
}

/// Where the joining side gets credentials from: a camera, a prompt, a flag.
pub trait CredentialSource: Send + Sync {
    fn next_input(&self) -> impl Future<Output = Result<OobInput, SessionError>> + Send;
}

/// Hosting side: bring the hotspot up, then show its credentials. A mobile
/// peer gets a QR code; anything else gets text to type.
pub async fn host<W: WifiProvider>(
    wifi: &W,
    peer: Platform,
    lease: &NetworkLease,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<Credentials, SessionError> {
    let credentials = network::start_hosting(wifi, lease, cancel).await?;
    let as_qr = capability(peer).scans_qr;
    info!(%peer, as_qr, "showing credentials for out-of-band exchange");
    emit(
        events,
        SessionEvent::ShowCredentials {
            payload: credentials.to_payload().encode(),
            as_qr,
        },
    );
    Ok(credentials)
}

/// Joining side: wait for the user to scan or type the host's credentials.
pub async fn receive<C: CredentialSource>(
    source: &C,
    cancel: &CancellationToken,
) -> Result<Credentials, SessionError> {
    let input = tokio::select! {
        input = source.next_input() => input?,
        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
    };
    let credentials = input.into_credentials()?;
    info!(ssid = %credentials.ssid(), "credentials entered");
    Ok(credentials)
}
