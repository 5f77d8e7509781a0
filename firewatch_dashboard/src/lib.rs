// THEORY:
// The dashboard is the human-facing side of a monitor. It serves three things:
// - `/video_feed`: the annotated camera frames as an MJPEG stream
//   (`multipart/x-mixed-replace`), which any browser renders in an `<img>` tag.
// - `/api/status`: the alarm flag plus the full event log as JSON.
// - `/`: a small page that shows both and polls the status every two seconds.
//
// Frames reach the server through `FrameBus`, a broadcast channel. The frame loop
// publishes without ever waiting; a viewer that falls behind skips frames instead of
// slowing detection down.

use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::{BufMut, Bytes, BytesMut};
use firewatch::pipeline::StreamOutlet;
use firewatch::status::{StatusQuery, StatusReport};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const MJPEG_BOUNDARY: &str = "frame";

#[derive(Debug, Clone)]
pub struct FramePacket {
    pub ts_millis: u64,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        Self { frames_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FramePacket> {
        self.frames_tx.subscribe()
    }
}

impl StreamOutlet for FrameBus {
    fn publish(&self, jpeg: Vec<u8>) {
        let ts_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        // No viewers is not an error.
        let _ = self.frames_tx.send(FramePacket {
            ts_millis,
            data: Bytes::from(jpeg),
        });
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Clone)]
pub struct AppState {
    pub bus: FrameBus,
    pub status: StatusQuery,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/api/status", get(api_status))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Binds `cfg.bind_addr` and serves the dashboard on a background task. Bind
/// failures are returned, not deferred to the task.
pub async fn start_server(state: AppState, cfg: ServerConfig) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("could not bind dashboard to {}", cfg.bind_addr))?;
    let local = listener.local_addr()?;
    let app = router(state);

    let server = tokio::spawn(async move {
        info!(addr = %local, "dashboard listening on http://{local}");
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "dashboard server stopped");
        }
    });
    Ok(server)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn api_status(State(state): State<AppState>) -> Result<Json<StatusReport>, StatusCode> {
    let query = state.status.clone();
    let report = tokio::task::spawn_blocking(move || query.status())
        .await
        .map_err(|err| {
            error!(error = %err, "status task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(report))
}

async fn video_feed(State(state): State<AppState>) -> Response {
    let mut rx = state.bus.subscribe();
    debug!("viewer connected to video feed");

    let parts = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(packet) => yield Ok::<Bytes, Infallible>(multipart_part(&packet.data)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "viewer fell behind; frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    (
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let head = format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>Firewatch</title>
  <style>
    body { font-family: sans-serif; background: #111; color: #eee; margin: 24px; }
    #banner { padding: 10px 16px; font-weight: bold; border-radius: 4px; display: inline-block; }
    .idle { background: #1d5e2b; }
    .alarm { background: #b3161b; }
    table { border-collapse: collapse; margin-top: 16px; }
    td, th { padding: 4px 12px; border-bottom: 1px solid #333; text-align: left; font-family: monospace; }
  </style>
</head>
<body>
  <h2>Firewatch</h2>
  <div id="banner" class="idle">loading</div>
  <div style="margin-top:16px"><img src="/video_feed" width="640" alt="live feed"></div>
  <table>
    <thead><tr><th>Time</th><th>Status</th><th>Confidence</th><th>Location</th></tr></thead>
    <tbody id="log"></tbody>
  </table>
  <script>
    async function refresh() {
      try {
        const res = await fetch('/api/status');
        const data = await res.json();
        const banner = document.getElementById('banner');
        banner.textContent = data.alarm_active ? 'FIRE ALARM ACTIVE' : 'No fire detected';
        banner.className = data.alarm_active ? 'alarm' : 'idle';
        const rows = data.full_log.map(e => {
          const tr = document.createElement('tr');
          for (const text of [e.time, e.status, `${e.confidence}%`, e.gps]) {
            const td = document.createElement('td');
            td.textContent = text;
            tr.appendChild(td);
          }
          return tr;
        });
        document.getElementById('log').replaceChildren(...rows);
      } catch (e) {
        document.getElementById('banner').textContent = 'status unavailable';
      }
    }
    refresh();
    setInterval(refresh, 2000);
  </script>
</body>
</html>
"#;
