use crate::agent::Assistant;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::server::{ chunk_text, ConversationLocks };

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{ TcpListener, TcpStream };

use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response, ErrorResponse };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use chrono::Utc;
use url::form_urlencoded;

use log::{ info, warn, error, debug };
use futures::{ Sink, SinkExt, StreamExt };
use uuid::Uuid;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;
const PROCESSING_INTERVAL: Duration = Duration::from_secs(3);
const CLEARED_MESSAGE: &str = "Conversation has been cleared!";
const CONNECTIONS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(rate) => rate,
    None => panic!("connection rate must be non-zero"),
};

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(CONNECTIONS_PER_SECOND));
}

type FrameResult = Result<(), Box<dyn Error + Send + Sync>>;

pub async fn start_ws_server(
    addr: &str,
    assistant: Arc<Assistant>,
    locks: ConversationLocks,
    api_key: Option<String>,
    chunk_size: usize
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let assistant = Arc::clone(&assistant);
        let locks = locks.clone();
        let required_api_key = api_key.clone();

        tokio::spawn(async move {
            if let Err(e) = process_connection(peer, stream, assistant, locks, required_api_key, chunk_size).await {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn query_params(req: &Request) -> HashMap<String, String> {
    let qs = req.uri().query().unwrap_or("");
    form_urlencoded::parse(qs.as_bytes()).into_owned().collect()
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(reason.to_string()));
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res
}

fn check_api_key(req: &Request, params: &HashMap<String, String>, required: Option<&str>) -> Result<(), ErrorResponse> {
    let Some(secret) = required else {
        return Ok(());
    };
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| params.get("api_key").map(String::as_str));
    match provided {
        Some(key) if key == secret => Ok(()),
        Some(_) => Err(unauthorized("invalid api key")),
        None => Err(unauthorized("missing api key")),
    }
}

async fn process_connection(
    peer: SocketAddr,
    stream: TcpStream,
    assistant: Arc<Assistant>,
    locks: ConversationLocks,
    required_api_key: Option<String>,
    chunk_size: usize
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut conversation_id = None;
    let handshake = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let params = query_params(req);
        if let Err(res) = check_api_key(req, &params, required_api_key.as_deref()) {
            warn!("Rejected handshake from {}", peer);
            return Err(res);
        }
        conversation_id = params.get("conversation_id").filter(|id| !id.trim().is_empty()).cloned();
        Ok(response)
    };

    let ws = match accept_hdr_async(stream, handshake).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            return Err(e.into());
        }
    };

    let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("Assigned conversation ID {} to {}", conversation_id, peer);

    let (mut tx, mut rx) = ws.split();
    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                match e {
                    | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
                    | tokio_tungstenite::tungstenite::Error::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!("Message from {} exceeds size limit ({} > {})", peer, message.len(), MAX_MESSAGE_SIZE);
            let frame = ServerMessage::Error { message: "Message too large".to_string() };
            if let Err(e) = send_frame(&mut tx, &frame).await {
                error!("Failed to send size limit error to {}: {}", peer, e);
            }
            break;
        }

        let result = match message {
            Message::Text(text) =>
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(command) => {
                        handle_command(command, &conversation_id, &assistant, &locks, chunk_size, &mut tx).await
                    }
                    Err(e) => {
                        warn!("Failed to parse message from {}: {}", peer, e);
                        let frame = ServerMessage::Error { message: format!("Failed to parse message: {}", e) };
                        send_frame(&mut tx, &frame).await
                    }
                }
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Ping(ping_data) => tx.send(Message::Pong(ping_data)).await.map_err(Into::into),
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
                Ok(())
            }
            Message::Pong(_) | Message::Frame(_) => Ok(()),
        };

        if let Err(e) = result {
            error!("Error sending to {}: {}", peer, e);
            break;
        }
    }

    info!("WebSocket connection closed for {} (Conv ID: {})", peer, conversation_id);
    Ok(())
}

async fn handle_command<S>(
    command: ClientMessage,
    conversation_id: &str,
    assistant: &Assistant,
    locks: &ConversationLocks,
    chunk_size: usize,
    tx: &mut S
) -> FrameResult
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    match command {
        ClientMessage::Chat { content } => {
            let reply = run_turn(conversation_id, &content, assistant, locks, tx).await;
            match reply {
                Ok(text) => send_chunks(tx, &text, chunk_size).await,
                Err(e) => {
                    error!("Agent error for conversation {}: {}", conversation_id, e);
                    send_frame(tx, &ServerMessage::Error { message: e }).await
                }
            }
        }
        ClientMessage::Start => {
            let welcome = assistant.welcome_message().await;
            send_chunks(tx, &welcome, chunk_size).await
        }
        ClientMessage::Clear => {
            let _turn = locks.acquire(conversation_id).await;
            match assistant.clear_history(conversation_id).await {
                Ok(()) => send_frame(tx, &ServerMessage::Cleared { message: CLEARED_MESSAGE.to_string() }).await,
                Err(e) => send_frame(tx, &ServerMessage::Error { message: e.to_string() }).await,
            }
        }
        ClientMessage::Context => {
            match assistant.format_context(conversation_id).await {
                Ok(text) => send_chunks(tx, &text, chunk_size).await,
                Err(e) => send_frame(tx, &ServerMessage::Error { message: e.to_string() }).await,
            }
        }
        ClientMessage::Models => {
            match assistant.list_models().await {
                Ok(models) => send_chunks(tx, &models.join("\n"), chunk_size).await,
                Err(e) => send_frame(tx, &ServerMessage::Error { message: format!("An error occurred: {}", e) }).await,
            }
        }
    }
}

async fn run_turn<S>(
    conversation_id: &str,
    content: &str,
    assistant: &Assistant,
    locks: &ConversationLocks,
    tx: &mut S
) -> Result<String, String>
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    let turn = async {
        let _turn = locks.acquire(conversation_id).await;
        assistant.process_message(conversation_id, content).await
    };
    tokio::pin!(turn);

    let mut ticker = tokio::time::interval(PROCESSING_INTERVAL);
    let mut typing = true;
    loop {
        tokio::select! {
            result = &mut turn => {
                return result.map_err(|e| e.to_string());
            }
            _ = ticker.tick(), if typing => {
                if let Err(e) = send_frame(tx, &ServerMessage::Processing).await {
                    debug!("Stopped processing updates for {}: {}", conversation_id, e);
                    typing = false;
                }
            }
        }
    }
}

async fn send_chunks<S>(tx: &mut S, text: &str, chunk_size: usize) -> FrameResult
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    let mut chunks = chunk_text(text, chunk_size);
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    for content in chunks {
        let frame = ServerMessage::Response { content, timestamp: Utc::now().timestamp() };
        send_frame(tx, &frame).await?;
    }
    Ok(())
}

async fn send_frame<S>(tx: &mut S, frame: &ServerMessage) -> FrameResult
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    let json = serde_json::to_string(frame)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}
