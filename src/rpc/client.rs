//! WebSocket RPC client
//!
//! Owns the link to the Central System: connects with the `ocpp1.6`
//! subprotocol (HTTP Basic credentials for security profiles 1-2),
//! correlates CALL frames with their CALLRESULT/CALLERROR by unique id, and
//! hands incoming CALL frames to the [`MessageDispatcher`].
//!
//! Listener callbacks (connected / disconnected / failed / error) and spy
//! callbacks (raw TX / RX text) are delivered on the network task; they must
//! not block. Dispatcher handlers also run on the network task and must
//! spawn any work that needs to wait for an outgoing call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use base64::Engine as _;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatcher::MessageDispatcher;
use crate::support::errors::RpcError;
use crate::support::ocpp_frame::OcppFrame;

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Connection events delivered by the client.
pub trait RpcListener: Send + Sync {
    /// The link is up and frames can be exchanged.
    fn on_connected(&self);
    /// An established link went down.
    fn on_disconnected(&self);
    /// A connection attempt did not succeed.
    fn on_failed(&self);
    /// A transport error occurred on an established link.
    fn on_error(&self) {}
}

/// Observer of every raw frame exchanged on the link.
pub trait RpcSpy: Send + Sync {
    fn on_message_sent(&self, message: &str);
    fn on_message_received(&self, message: &str);
}

/// HTTP Basic credentials for the WebSocket handshake.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

type PendingCalls = DashMap<String, oneshot::Sender<Result<Value, RpcError>>>;

struct Shared {
    dispatcher: Arc<MessageDispatcher>,
    pending: PendingCalls,
    writer: RwLock<Option<mpsc::UnboundedSender<String>>>,
    connected: AtomicBool,
    listener: RwLock<Option<Arc<dyn RpcListener>>>,
    spies: RwLock<Vec<Arc<dyn RpcSpy>>>,
}

impl Shared {
    fn send_raw(&self, text: String) -> bool {
        let writer = self.writer.read().unwrap();
        match writer.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(RpcError::Disconnected));
            }
        }
    }

    fn notify_listener(&self, f: impl Fn(&dyn RpcListener)) {
        if let Some(listener) = self.listener.read().unwrap().as_ref() {
            f(listener.as_ref());
        }
    }

    fn notify_spies_sent(&self, text: &str) {
        for spy in self.spies.read().unwrap().iter() {
            spy.on_message_sent(text);
        }
    }

    fn notify_spies_received(&self, text: &str) {
        for spy in self.spies.read().unwrap().iter() {
            spy.on_message_received(text);
        }
    }
}

/// OCPP RPC client.
pub struct RpcClient {
    shared: Arc<Shared>,
    call_timeout: Duration,
    retry_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    pub fn new(
        dispatcher: Arc<MessageDispatcher>,
        call_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                pending: DashMap::new(),
                writer: RwLock::new(None),
                connected: AtomicBool::new(false),
                listener: RwLock::new(None),
                spies: RwLock::new(Vec::new()),
            }),
            call_timeout,
            retry_interval,
            task: Mutex::new(None),
        }
    }

    /// Register the single connection-event listener.
    pub fn register_listener(&self, listener: Arc<dyn RpcListener>) {
        *self.shared.listener.write().unwrap() = Some(listener);
    }

    /// Register a frame spy. Spies are invoked in registration order.
    pub fn register_spy(&self, spy: Arc<dyn RpcSpy>) {
        self.shared.spies.write().unwrap().push(spy);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Start (or restart) the connection process. The client keeps retrying
    /// until [`stop`](Self::stop) is called.
    pub fn start(&self, url: String, credentials: Credentials) {
        self.stop();
        let shared = Arc::clone(&self.shared);
        let retry_interval = self.retry_interval;
        let handle = tokio::spawn(async move {
            run_connection(shared, url, credentials, retry_interval).await;
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Close the link and stop reconnecting. Pending calls fail with
    /// [`RpcError::Disconnected`].
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.writer.write().unwrap() = None;
        self.shared.fail_pending();
    }

    /// Send a CALL frame and wait for the matching response, a CALLERROR,
    /// the call timeout or a disconnection. Safe to invoke concurrently;
    /// each in-flight call is correlated by its unique message id.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::Disconnected);
        }

        let unique_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(unique_id.clone(), tx);

        let frame = OcppFrame::call(unique_id.clone(), action, payload);
        if !self.shared.send_raw(frame.serialize()) {
            self.shared.pending.remove(&unique_id);
            return Err(RpcError::Disconnected);
        }
        debug!(action, unique_id = unique_id.as_str(), "Call sent");

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Completion side dropped without answering: link went down
            Ok(Err(_)) => Err(RpcError::Disconnected),
            Err(_) => {
                self.shared.pending.remove(&unique_id);
                warn!(action, unique_id = unique_id.as_str(), "Call timed out");
                Err(RpcError::Timeout)
            }
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn build_request(
    url: &str,
    credentials: &Credentials,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, String> {
    let mut request = url
        .into_client_request()
        .map_err(|e| format!("Invalid connection URL: {e}"))?;

    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(OCPP_SUBPROTOCOL),
    );

    if let (Some(user), Some(password)) = (&credentials.user, &credentials.password) {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        let value = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| format!("Invalid credentials: {e}"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(request)
}

async fn run_connection(
    shared: Arc<Shared>,
    url: String,
    credentials: Credentials,
    retry_interval: Duration,
) {
    loop {
        let request = match build_request(&url, &credentials) {
            Ok(request) => request,
            Err(e) => {
                error!(url = url.as_str(), "{e}");
                shared.notify_listener(|l| l.on_failed());
                return;
            }
        };

        match connect_async(request).await {
            Ok((stream, _)) => {
                info!(url = url.as_str(), "Connected to Central System");
                let (tx, rx) = mpsc::unbounded_channel::<String>();
                *shared.writer.write().unwrap() = Some(tx);
                shared.connected.store(true, Ordering::SeqCst);
                shared.notify_listener(|l| l.on_connected());

                run_link(&shared, stream, rx).await;

                shared.connected.store(false, Ordering::SeqCst);
                *shared.writer.write().unwrap() = None;
                shared.fail_pending();
                warn!(url = url.as_str(), "Connection lost");
                shared.notify_listener(|l| l.on_disconnected());
            }
            Err(e) => {
                warn!(url = url.as_str(), "Connection failed: {e}");
                shared.notify_listener(|l| l.on_failed());
            }
        }

        tokio::time::sleep(retry_interval).await;
    }
}

async fn run_link(
    shared: &Arc<Shared>,
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            text = outgoing.recv() => {
                let Some(text) = text else { break };
                shared.notify_spies_sent(&text);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!("Send error: {e}");
                    break;
                }
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        shared.notify_spies_received(&text);
                        handle_frame(shared, &text).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!("Close frame received: {frame:?}");
                        break;
                    }
                    Some(Ok(_)) => {
                        warn!("Non-text message received, ignoring");
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {e}");
                        shared.notify_listener(|l| l.on_error());
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn handle_frame(shared: &Arc<Shared>, text: &str) {
    let frame = match OcppFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping invalid frame: {e}");
            return;
        }
    };

    match frame {
        OcppFrame::CallResult { unique_id, payload } => {
            match shared.pending.remove(&unique_id) {
                Some((_, tx)) => {
                    let _ = tx.send(Ok(payload));
                }
                None => warn!(unique_id = unique_id.as_str(), "Response for unknown call"),
            }
        }
        OcppFrame::CallError {
            unique_id,
            error_code,
            error_description,
            ..
        } => match shared.pending.remove(&unique_id) {
            Some((_, tx)) => {
                let _ = tx.send(Err(RpcError::CallError {
                    code: error_code,
                    description: error_description,
                }));
            }
            None => warn!(unique_id = unique_id.as_str(), "Error for unknown call"),
        },
        OcppFrame::Call {
            unique_id,
            action,
            payload,
        } => {
            let reply = match shared.dispatcher.dispatch(&action, payload).await {
                Ok(response) => OcppFrame::call_result(unique_id, response),
                Err(e) => {
                    warn!(
                        action = action.as_str(),
                        code = e.code.as_str(),
                        "Call rejected: {}",
                        e.description
                    );
                    OcppFrame::call_error(unique_id, e.code.as_str(), e.description)
                }
            };
            if !shared.send_raw(reply.serialize()) {
                warn!(action = action.as_str(), "Could not send response, link is down");
            }
        }
    }
}
