// Websocket adapter for the hosted change feed (Phoenix channel protocol).
//
// One socket carries every subscription; each subscription joins its own topic
// and incoming `postgres_changes` frames are routed back by topic. When the
// socket drops it is reopened with backoff and every retained topic is joined again.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use super::{
    ChangeFeed, FeedEvent, FeedFilter, FeedSink, HandleAllocator, StoreError, StoreResult,
    SubscriptionHandle, MESSAGES_TABLE,
};
use crate::config::BackendConfig;
use crate::models::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// A joined topic. The filter is kept so the topic can be joined again on a new socket.
struct Route {
    handle: SubscriptionHandle,
    filter: FeedFilter,
    sink: FeedSink,
}

struct FeedInner {
    socket_url: String,
    access_token: Option<String>,
    writer: TokioMutex<Option<WsWriter>>,
    routes: TokioMutex<HashMap<String, Route>>,
    topics: TokioMutex<HashMap<SubscriptionHandle, String>>,
    tasks: TokioMutex<Vec<JoinHandle<()>>>,
    handles: HandleAllocator,
    next_ref: AtomicU64,
    closed: AtomicBool,
}

pub struct RealtimeFeed {
    inner: Arc<FeedInner>,
}

impl RealtimeFeed {
    pub fn new(config: &BackendConfig, access_token: Option<String>) -> Self {
        RealtimeFeed {
            inner: Arc::new(FeedInner {
                socket_url: socket_url(&config.project_url, &config.anon_key),
                access_token,
                writer: TokioMutex::new(None),
                routes: TokioMutex::new(HashMap::new()),
                topics: TokioMutex::new(HashMap::new()),
                tasks: TokioMutex::new(Vec::new()),
                handles: HandleAllocator::default(),
                next_ref: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Close the socket and stop background tasks. No reconnect follows.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        if let Some(mut writer) = inner.writer.lock().await.take() {
            let _ = writer.send(WsMessage::Close(None)).await;
        }
        for task in inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        inner.routes.lock().await.clear();
        inner.topics.lock().await.clear();
    }
}

impl FeedInner {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Open the socket if there is none. A fresh socket re-joins every retained
    /// topic before anyone else may write to it.
    async fn ensure_connected(self: &Arc<Self>) -> StoreResult<()> {
        let mut guard = self.writer.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::NotConnected);
        }

        info!("Connecting to realtime feed");
        let (stream, _response) = connect_async(self.socket_url.as_str())
            .await
            .map_err(|e| StoreError::WebSocket(e.to_string()))?;
        let (mut writer, mut reader) = stream.split();

        let rejoins = {
            let routes = self.routes.lock().await;
            rejoin_frames(&routes, self.access_token.as_deref(), || self.next_ref())
        };
        for frame in &rejoins {
            send_frame(&mut writer, frame).await?;
            info!("Re-joined {}", frame.topic);
        }
        *guard = Some(writer);
        drop(guard);

        let inner = Arc::clone(self);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match parse_insert(&text) {
                        Ok(Some((topic, record))) => {
                            let routes = inner.routes.lock().await;
                            match routes.get(&topic) {
                                Some(route) => {
                                    let event = FeedEvent { handle: route.handle, record };
                                    if route.sink.send(event).is_err() {
                                        debug!("Sink for {} is closed", topic);
                                    }
                                }
                                None => debug!("Insert for unknown topic {}", topic),
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Unparseable realtime frame: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        error!("Realtime socket read error: {}", e);
                        break;
                    }
                }
            }
            warn!("Realtime feed disconnected");
            *inner.writer.lock().await = None;
            if inner.closed.load(Ordering::SeqCst) || inner.routes.lock().await.is_empty() {
                return;
            }
            let reconnect = tokio::spawn(Arc::clone(&inner).reconnect());
            inner.tasks.lock().await.push(reconnect);
        });

        let heartbeat = Arc::clone(self);
        let heartbeat_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut counter: u64 = 0;
            loop {
                interval.tick().await;
                counter += 1;
                let frame = PhoenixFrame {
                    topic: PHOENIX_TOPIC.to_string(),
                    event: "heartbeat".to_string(),
                    payload: json!({}),
                    reference: Some(format!("hb-{}", counter)),
                };
                let mut guard = heartbeat.writer.lock().await;
                let Some(writer) = guard.as_mut() else { break };
                if let Err(e) = send_frame(writer, &frame).await {
                    warn!("Heartbeat failed: {}", e);
                    break;
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(reader_task);
        tasks.push(heartbeat_task);
        Ok(())
    }

    // Boxed because the reader task spawned by `ensure_connected` ends up calling this.
    fn reconnect(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut delay = RECONNECT_INITIAL_DELAY;
            loop {
                tokio::time::sleep(delay).await;
                if self.closed.load(Ordering::SeqCst) || self.routes.lock().await.is_empty() {
                    return;
                }
                match self.ensure_connected().await {
                    Ok(()) => {
                        info!("Realtime feed reconnected");
                        return;
                    }
                    Err(e) => {
                        warn!("Realtime reconnect failed, retrying in {:?}: {}", delay, e);
                        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                    }
                }
            }
        })
    }

    async fn send(&self, frame: &PhoenixFrame) -> StoreResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(StoreError::NotConnected)?;
        send_frame(writer, frame).await
    }
}

async fn send_frame(writer: &mut WsWriter, frame: &PhoenixFrame) -> StoreResult<()> {
    let text = serde_json::to_string(frame)?;
    writer
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| StoreError::WebSocket(e.to_string()))
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, filter: FeedFilter, sink: FeedSink) -> StoreResult<SubscriptionHandle> {
        let inner = &self.inner;
        inner.ensure_connected().await?;

        let handle = inner.handles.allocate();
        let topic = format!("realtime:{}-{}", MESSAGES_TABLE, handle);
        let join = join_frame(&topic, &filter, inner.access_token.as_deref(), inner.next_ref());
        inner
            .routes
            .lock()
            .await
            .insert(topic.clone(), Route { handle, filter: filter.clone(), sink });
        inner.topics.lock().await.insert(handle, topic.clone());

        if let Err(e) = inner.send(&join).await {
            inner.routes.lock().await.remove(&topic);
            inner.topics.lock().await.remove(&handle);
            return Err(e);
        }
        info!("Joined {} with filter {}", topic, filter);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()> {
        let inner = &self.inner;
        let Some(topic) = inner.topics.lock().await.remove(&handle) else {
            return Ok(());
        };
        inner.routes.lock().await.remove(&topic);

        let leave = PhoenixFrame {
            topic: topic.clone(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(inner.next_ref()),
        };
        match inner.send(&leave).await {
            // Socket already gone, nothing left to leave.
            Err(StoreError::NotConnected) => Ok(()),
            other => {
                info!("Left {}", topic);
                other
            }
        }
    }
}

/// `https://x.example.co` → `wss://x.example.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn socket_url(project_url: &str, anon_key: &str) -> String {
    let base = project_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", base, anon_key)
}

pub fn join_frame(topic: &str, filter: &FeedFilter, access_token: Option<&str>, reference: String) -> PhoenixFrame {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": "INSERT",
                "schema": "public",
                "table": MESSAGES_TABLE,
                "filter": filter.to_string(),
            }]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    PhoenixFrame {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload,
        reference: Some(reference),
    }
}

/// `phx_join` frames for every retained topic, oldest subscription first.
fn rejoin_frames(
    routes: &HashMap<String, Route>,
    access_token: Option<&str>,
    mut next_ref: impl FnMut() -> String,
) -> Vec<PhoenixFrame> {
    let mut retained: Vec<(&String, &Route)> = routes.iter().collect();
    retained.sort_by_key(|(_, route)| route.handle);
    retained
        .into_iter()
        .map(|(topic, route)| join_frame(topic, &route.filter, access_token, next_ref()))
        .collect()
}

/// Extract `(topic, record)` from a `postgres_changes` insert frame.
///
/// Replies, heartbeats and non-insert changes yield `Ok(None)`.
pub fn parse_insert(text: &str) -> StoreResult<Option<(String, Message)>> {
    let frame: PhoenixFrame = serde_json::from_str(text)?;
    if frame.event != "postgres_changes" {
        return Ok(None);
    }
    let data = &frame.payload["data"];
    if data["type"].as_str() != Some("INSERT") {
        return Ok(None);
    }
    let record: Message = serde_json::from_value(data["record"].clone())?;
    Ok(Some((frame.topic, record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_switches_scheme() {
        assert_eq!(
            socket_url("https://abc.supabase.co/", "key"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert!(socket_url("http://localhost:54321", "k").starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn join_frame_carries_filter_and_token() {
        let frame = join_frame("realtime:messages-sub-1", &FeedFilter::sender("p"), Some("tok"), "3".into());
        assert_eq!(frame.event, "phx_join");
        let change = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(change["filter"], "sender_id=eq.p");
        assert_eq!(change["event"], "INSERT");
        assert_eq!(frame.payload["access_token"], "tok");

        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["ref"], "3");
    }

    #[test]
    fn reconnect_rejoins_every_retained_topic() {
        let (sink, _events) = tokio::sync::mpsc::unbounded_channel();
        let handles = HandleAllocator::default();
        let inbox = handles.allocate();
        let chat = handles.allocate();
        let mut routes = HashMap::new();
        routes.insert(
            format!("realtime:messages-{}", chat),
            Route { handle: chat, filter: FeedFilter::sender("p"), sink: sink.clone() },
        );
        routes.insert(
            format!("realtime:messages-{}", inbox),
            Route { handle: inbox, filter: FeedFilter::recipient("me"), sink },
        );

        let mut counter = 10;
        let frames = rejoin_frames(&routes, Some("tok"), || {
            counter += 1;
            counter.to_string()
        });

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.event == "phx_join" && f.payload["access_token"] == "tok"));
        assert_eq!(frames[0].topic, format!("realtime:messages-{}", inbox));
        assert_eq!(frames[0].payload["config"]["postgres_changes"][0]["filter"], "recipient_id=eq.me");
        assert_eq!(frames[1].topic, format!("realtime:messages-{}", chat));
        assert_eq!(frames[1].payload["config"]["postgres_changes"][0]["filter"], "sender_id=eq.p");
        assert_eq!(frames[0].reference.as_deref(), Some("11"));
        assert_eq!(frames[1].reference.as_deref(), Some("12"));
    }

    #[test]
    fn nothing_to_rejoin_without_subscriptions() {
        let frames = rejoin_frames(&HashMap::new(), None, || "1".to_string());
        assert!(frames.is_empty());
    }

    #[test]
    fn inserts_are_extracted() {
        let text = r#"{
            "topic": "realtime:messages-sub-2",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "record": {
                        "id": 9, "sender_id": "p", "recipient_id": "me",
                        "body": "yo", "created_at": "2024-05-01T10:00:00", "is_read": false
                    }
                }
            }
        }"#;
        let (topic, record) = parse_insert(text).unwrap().unwrap();
        assert_eq!(topic, "realtime:messages-sub-2");
        assert_eq!(record.id, "9");
        assert_eq!(record.body, "yo");
    }

    #[test]
    fn replies_are_ignored() {
        let text = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert!(parse_insert(text).unwrap().is_none());
    }
}
