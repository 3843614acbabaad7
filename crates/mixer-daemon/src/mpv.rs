/// mpv IPC driver, one process per mixer channel.
///
/// ```text
///   MpvChannel::spawn(index)
///         │
///         ├── MpvDriver::spawn_and_connect()
///         │       ├── writer_task  ← MpvRequest via mpsc, serialised → socket
///         │       └── reader_task  ← JSON lines from socket
///         │                             ├── response (request_id) → matched oneshot
///         │                             └── event / property-change → observer
///         └── observer_task ← folds events into `Observed` (watch channel)
/// ```
///
/// Every process runs `--idle --loop-file=inf --pause --volume=0`, so a channel
/// is a silent, paused loop until the mixer starts it.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use mixer_core::AudioChannel;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_DURATION: u64 = 2;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_file(&self, source: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", source, "replace"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, gain: f32) -> anyhow::Result<()> {
        self.send(json!(["set_property", "volume", volume_percent(gain)])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [(OBS_CORE_IDLE, "core-idle"), (OBS_DURATION, "duration")];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns one mpv child process.
pub struct MpvDriver {
    channel: usize,
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(channel: usize) -> Self {
        Self {
            channel,
            socket_name: mixer_proto::platform::mpv_socket_name(channel),
            process: None,
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            info!("mpv[{}]: stopping process", self.channel);
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        if let Some(mut p) = self.process.take() {
            let _ = p.start_kill();
        }

        info!("mpv[{}]: spawning new process", self.channel);
        let mpv_binary = mixer_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--loop-file=inf")
            .arg("--pause")
            .arg("--volume=0")
            .arg(mixer_proto::platform::mpv_socket_arg(self.channel))
            .arg("--quiet")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv[{}]: IPC socket did not appear", self.channel);
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv[{}]: connected to IPC socket", self.channel);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            match ClientOptions::new().open(&pipe_path) {
                Ok(client) => {
                    info!("mpv[{}]: connected to named pipe", self.channel);
                    let (read_half, write_half) = tokio::io::split(client);
                    return Ok(start_io_tasks(read_half, write_half, event_tx));
                }
                Err(_) => continue,
            }
        }
        anyhow::bail!("mpv[{}]: named pipe did not appear", self.channel)
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── observed properties ───────────────────────────────────────────────────────

/// What mpv has pushed about one channel so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observed {
    pub duration: Option<f64>,
    /// `Some(false)` once audio is actually flowing.
    pub core_idle: Option<bool>,
    pub load_failed: bool,
}

impl Observed {
    /// Fold one event in.  Returns `true` if anything changed.
    pub fn apply(&mut self, evt: &MpvEvent) -> bool {
        let before = *self;
        if let Some((id, data)) = evt.as_property_change() {
            match id {
                OBS_CORE_IDLE => self.core_idle = data.as_bool(),
                OBS_DURATION => {
                    self.duration = data.as_f64().filter(|d| d.is_finite() && *d > 0.0)
                }
                _ => {}
            }
        } else {
            match evt.event_name() {
                Some("end-file") => {
                    let reason = evt.raw.get("reason").and_then(|v| v.as_str());
                    if reason == Some("error") {
                        self.load_failed = true;
                    }
                }
                Some("start-file") => self.load_failed = false,
                _ => {}
            }
        }
        *self != before
    }
}

async fn observer_task(
    channel: usize,
    mut events: mpsc::Receiver<MpvEvent>,
    observed: watch::Sender<Observed>,
) {
    while let Some(evt) = events.recv().await {
        observed.send_if_modified(|o| {
            let changed = o.apply(&evt);
            if changed {
                debug!("mpv[{}]: {:?}", channel, o);
            }
            changed
        });
    }
    warn!("mpv[{}]: IPC connection lost", channel);
}

// ── AudioChannel ──────────────────────────────────────────────────────────────

/// A mixer channel backed by its own mpv process.
pub struct MpvChannel {
    index: usize,
    handle: MpvHandle,
    observed: watch::Receiver<Observed>,
    driver: Arc<Mutex<MpvDriver>>,
}

impl MpvChannel {
    pub async fn spawn(index: usize) -> anyhow::Result<Self> {
        let mut driver = MpvDriver::new(index);
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = driver.spawn_and_connect(event_tx).await?;

        let (observed_tx, observed) = watch::channel(Observed::default());
        tokio::spawn(observer_task(index, event_rx, observed_tx));
        handle.observe_properties().await;

        Ok(Self {
            index,
            handle,
            observed,
            driver: Arc::new(Mutex::new(driver)),
        })
    }

    /// Shared with `main` so the process can be killed after the mixer stops.
    pub fn driver(&self) -> Arc<Mutex<MpvDriver>> {
        Arc::clone(&self.driver)
    }
}

#[async_trait]
impl AudioChannel for MpvChannel {
    async fn set_source(&self, source: &str) -> anyhow::Result<()> {
        self.handle.set_pause(true).await?;
        self.handle.load_file(source).await
    }

    async fn duration(&self) -> anyhow::Result<Option<f64>> {
        let mut rx = self.observed.clone();
        let observed = rx
            .wait_for(|o| o.duration.is_some() || o.load_failed)
            .await
            .map_err(|_| anyhow::anyhow!("mpv[{}]: observer gone", self.index))?;
        Ok(observed.duration)
    }

    async fn seek(&self, secs: f64) -> anyhow::Result<()> {
        self.handle.seek_to(secs).await
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.handle.set_pause(false).await?;
        let mut rx = self.observed.clone();
        let failed = rx
            .wait_for(|o| o.core_idle == Some(false) || o.load_failed)
            .await
            .map_err(|_| anyhow::anyhow!("mpv[{}]: observer gone", self.index))?
            .load_failed;
        if failed {
            anyhow::bail!("mpv[{}]: source failed to load", self.index);
        }
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.handle.set_pause(true).await
    }

    async fn set_gain(&self, gain: f32) -> anyhow::Result<()> {
        self.handle.set_volume(gain).await
    }
}

/// mpv's `volume` is cubic (amplitude = (volume/100)^3); invert it so the
/// linear gain reaches the output unchanged.
fn volume_percent(gain: f32) -> f32 {
    gain.max(0.0).min(1.0).cbrt() * 100.0
}
