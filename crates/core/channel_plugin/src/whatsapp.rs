//! WhatsApp (Web-protocol) adapter skeleton.
//!
//! Multi-file auth state lives under `<home>/.myndhyve-cli/whatsapp/`. The
//! real multi-device crypto and socket protocol are out of scope (they live
//! behind [`CredentialStore`] and the not-yet-connected socket this skeleton
//! stubs out); what belongs to the core and is fully implemented here is the
//! single-flight credential-save queue: if a save is in flight when another
//! is requested, the requester sets a pending flag instead of starting a
//! second concurrent writer, and the in-flight save flushes once more right
//! after it completes so the pending write is never silently dropped.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cloud_client::ChatEgressEnvelope;
use cloud_client::DeliveryResult;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::classify_retryable;
use crate::text_format::convert_to_whatsapp;
use crate::text_format::MarkdownConversionOptions;
use crate::Channel;
use crate::ChannelPlugin;
use crate::InboundSink;
use crate::PluginError;
use crate::PluginStatus;

pub const CREDENTIAL_DIR_NAME: &str = "whatsapp";

/// Single-writer save queue for the multi-file auth state. Only one save
/// runs at a time; a save requested while another is in flight is folded
/// into a single follow-up flush instead of racing the filesystem.
pub struct CredentialSaveQueue {
    dir: PathBuf,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    saving: bool,
    pending: Option<Vec<u8>>,
}

impl CredentialSaveQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CredentialSaveQueue {
            dir: dir.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Requests a save of `credentials`. If a save is already running, this
    /// call only records `credentials` as the pending payload and returns;
    /// the in-flight save picks it up and flushes again once it finishes.
    pub async fn save(self: &Arc<Self>, credentials: Vec<u8>) -> Result<(), std::io::Error> {
        let mut guard = self.state.lock().await;
        if guard.saving {
            guard.pending = Some(credentials);
            return Ok(());
        }
        guard.saving = true;
        drop(guard);

        self.flush_loop(credentials).await
    }

    /// Writes `credentials`, then keeps flushing as long as a newer pending
    /// payload arrived while the previous write was in flight.
    async fn flush_loop(self: &Arc<Self>, mut credentials: Vec<u8>) -> Result<(), std::io::Error> {
        loop {
            relay_utils::fs::atomic_write(self.creds_path(), &credentials, 0o600)
                .await
                .map_err(|err| match err {
                    relay_utils::fs::FsError::Io(io) => io,
                    other => std::io::Error::other(other),
                })?;

            let mut guard = self.state.lock().await;
            match guard.pending.take() {
                Some(next) => {
                    drop(guard);
                    credentials = next;
                }
                None => {
                    guard.saving = false;
                    return Ok(());
                }
            }
        }
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join("creds.json")
    }
}

/// WhatsApp adapter. `socket` is left as a documented seam: a real
/// implementation binds a WhatsApp Web multi-device socket here and feeds
/// [`ChannelPlugin::start`]'s `sink` from its event stream; that wire
/// protocol is explicitly out of scope for this daemon's core.
pub struct WhatsAppPlugin {
    credential_dir: PathBuf,
    save_queue: Arc<CredentialSaveQueue>,
}

impl WhatsAppPlugin {
    pub fn new(config_dir: &Path) -> Result<Self, relay_utils::fs::FsError> {
        let credential_dir = config_dir.join(CREDENTIAL_DIR_NAME);
        relay_utils::fs::ensure_directory(&credential_dir, 0o700)?;
        Ok(WhatsAppPlugin {
            save_queue: Arc::new(CredentialSaveQueue::new(credential_dir.clone())),
            credential_dir,
        })
    }
}

#[async_trait]
impl ChannelPlugin for WhatsAppPlugin {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn display_name(&self) -> &str {
        "WhatsApp"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn unsupported_reason(&self) -> Option<&str> {
        None
    }

    async fn login(&self) -> Result<(), PluginError> {
        // A real adapter renders a QR code to stderr and waits on the
        // socket's pairing event here; the pairing handshake is the part of
        // the WhatsApp Web protocol left out of this core.
        Err(PluginError::Unknown {
            reason: "WhatsApp Web pairing protocol is not implemented in this skeleton".into(),
        })
    }

    async fn is_authenticated(&self) -> bool {
        self.credential_dir.join("creds.json").is_file()
    }

    async fn start(
        &self,
        _sink: Arc<dyn InboundSink>,
        ctx: CancellationToken,
    ) -> Result<(), PluginError> {
        if !self.is_authenticated().await {
            return Err(PluginError::LoggedOut {
                reason: "no persisted WhatsApp credentials".into(),
            });
        }

        // The real socket's read loop would select! against `ctx.cancelled()`
        // here and translate raw WhatsApp events into `ChatIngressEnvelope`s
        // published to `sink`. With no live socket, this skeleton just
        // blocks until told to stop, which is the part of the lifecycle
        // contract this core owns.
        ctx.cancelled().await;
        Ok(())
    }

    async fn deliver(&self, envelope: &ChatEgressEnvelope) -> Result<DeliveryResult, PluginError> {
        // The formatting step is fully implemented even though the socket
        // it would hand off to is not: `_formatted` stands in for what a
        // real send call would transmit.
        let _formatted = convert_to_whatsapp(&envelope.text, MarkdownConversionOptions::default());
        Ok(DeliveryResult::failure(
            "WhatsApp Web send protocol is not implemented in this skeleton",
            classify_retryable("not implemented"),
            0,
        ))
    }

    async fn get_status(&self) -> PluginStatus {
        if self.is_authenticated().await {
            PluginStatus::Authenticated
        } else {
            PluginStatus::Disconnected
        }
    }

    async fn logout(&self) -> Result<(), PluginError> {
        let path = self.credential_dir.join("creds.json");
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PluginError::Unknown {
                reason: err.to_string(),
            }),
        }
    }
}
