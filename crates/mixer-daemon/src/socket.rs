use crate::core::MixerEvent;
use crate::BroadcastMessage;
use mixer_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use mixer_proto::state::StateManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<MixerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP control socket listening at {}", addr);

        let connected = Arc::new(AtomicUsize::new(0));
        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    let count = connected.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("Client {} connected from {} ({} connected)", id, peer, count);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let connected = connected.clone();

                    tokio::spawn(async move {
                        handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                        let count = connected.fetch_sub(1, Ordering::Relaxed) - 1;
                        info!("Client {} disconnected ({} connected)", id, count);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<MixerEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(MixerEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("MixerEvent channel closed");
                                        return;
                                    }

                                    if let Ok(encoded) = encode_state(&state_manager).await {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let frame = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::Display(updates)) => {
                        Message::Broadcast(Broadcast::Display { updates }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = frame {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixer_proto::protocol::{Command, MixerSnapshot};

    #[tokio::test]
    async fn test_hello_carries_current_revision() {
        let manager = StateManager::default();
        manager
            .publish(MixerSnapshot {
                active: 2,
                ..Default::default()
            })
            .await;

        let encoded = encode_hello(&manager).await.unwrap();
        let (msg, consumed) = Message::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        match msg {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 1);
                assert_eq!(state.active, 2);
            }
            other => panic!("expected Hello, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_command_reaches_mixer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (bcast_tx, _) = broadcast::channel(8);
        let manager = Arc::new(StateManager::default());

        let server_rx = bcast_tx.subscribe();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_client(stream, manager, 1, event_tx, server_rx).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let tap = Message::Command(Command::Tap { channel_idx: 3 })
            .encode()
            .unwrap();
        client.write_all(&tap).await.unwrap();

        match event_rx.recv().await {
            Some(MixerEvent::ClientCommand(Command::Tap { channel_idx })) => {
                assert_eq!(channel_idx, 3)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
