use async_trait::async_trait;
use blobport::{
    OverlayEndpoint, PeerId, TransferConfig, TransferError, TransferListener, TransferPayload,
    TransferProgress, TransferProtocol,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Two protocol instances in one process, wired back-to-back through a
///  channel standing in for the overlay: sends one blob from "alice" to
///  "bob" and logs the lifecycle events.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let alice = PeerId::from_bytes(*b"alice");
    let bob = PeerId::from_bytes(*b"bob..");

    let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<(PeerId, PeerId, TransferPayload)>();

    let config = Arc::new(TransferConfig {
        block_size: 16,
        ..TransferConfig::default()
    });

    let mut endpoint_of_alice = TransferProtocol::new(
        alice.clone(),
        Arc::new(ChannelOverlay {
            self_peer: alice.clone(),
            other_peer: bob.clone(),
            wire_tx: wire_tx.clone(),
        }),
        Arc::new(LoggingListener),
        config.clone(),
    )?;
    let mut endpoint_of_bob = TransferProtocol::new(
        bob.clone(),
        Arc::new(ChannelOverlay {
            self_peer: bob.clone(),
            other_peer: alice.clone(),
            wire_tx,
        }),
        Arc::new(LoggingListener),
        config,
    )?;
    endpoint_of_alice.spawn_active_loop();
    endpoint_of_bob.spawn_active_loop();

    let endpoint_of_alice = Arc::new(endpoint_of_alice);
    let endpoint_of_bob = Arc::new(endpoint_of_bob);

    {
        let endpoint_of_alice = endpoint_of_alice.clone();
        let endpoint_of_bob = endpoint_of_bob.clone();
        let bob = bob.clone();
        tokio::spawn(async move {
            while let Some((from, to, payload)) = wire_rx.recv().await {
                let target = if to == bob { &endpoint_of_bob } else { &endpoint_of_alice };
                target.on_payload(&from, payload).await;
            }
        });
    }

    let blob: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    endpoint_of_alice
        .send_binary(bob, b"demo".to_vec(), "the-blob".to_string(), blob, None)
        .await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}

struct ChannelOverlay {
    self_peer: PeerId,
    other_peer: PeerId,
    wire_tx: mpsc::UnboundedSender<(PeerId, PeerId, TransferPayload)>,
}

#[async_trait]
impl OverlayEndpoint for ChannelOverlay {
    async fn send_payload(&self, to: &PeerId, payload: TransferPayload) {
        self.wire_tx.send((self.self_peer.clone(), to.clone(), payload)).ok();
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        vec![self.other_peer.clone()]
    }
}

struct LoggingListener;

#[async_trait]
impl TransferListener for LoggingListener {
    async fn on_receive_progress(&self, peer: &PeerId, _info: &[u8], progress: TransferProgress) {
        info!("progress of '{}' from {}: {:?} {:.0}%", progress.id, peer, progress.state, progress.progress);
    }

    async fn on_receive_complete(&self, peer: &PeerId, _info: &[u8], id: &str, data: &[u8]) {
        info!("received '{}' from {}: {} bytes", id, peer, data.len());
    }

    async fn on_send_complete(&self, peer: &PeerId, _info: &[u8], data: &[u8], nonce: u64) {
        info!("sent {} bytes to {} (nonce {})", data.len(), peer, nonce);
    }

    async fn on_error(&self, peer: &PeerId, error: TransferError) {
        info!("transfer with {} failed: {}", peer, error);
    }
}
