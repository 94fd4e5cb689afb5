//! WebSocket 传输层
//!
//! 只负责字节与事件之间的翻译：入站帧解析为 `ClientEvent` 交给连接处理器
//! 串行处理，出站 `ServerEvent` 经发送队列由独立任务刷回 socket。
//! 认证（包括 token 校验）在协议内完成，不在升级握手阶段做。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use domain::{ClientEvent, ErrorCode, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use application::{ConnectionHandler, EventOutcome};

use crate::state::AppState;

/// WebSocket 升级入口。
pub async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("new websocket connection");
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let outbound = tx.clone();
    let mut handler = ConnectionHandler::new(state.deps.clone(), tx);

    // 发送任务：把发送队列里的事件序列化后刷到 socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to serialize outbound event");
                }
            }
        }
        let _ = sender.send(WsMessage::Close(None)).await;
    });

    // 接收循环：认证前用握手超时，认证后用空闲超时
    loop {
        let timeout = if handler.session_id().is_none() {
            state.handshake_timeout
        } else {
            state.idle_timeout
        };
        let frame = match tokio::time::timeout(timeout, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "websocket read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!("closing idle connection");
                break;
            }
        };

        match frame {
            WsMessage::Text(text) => {
                let event: ClientEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed client event");
                        let _ = outbound.send(ServerEvent::error(
                            ErrorCode::MessageError,
                            format!("malformed event: {e}"),
                        ));
                        continue;
                    }
                };
                if handler.handle_event(event).await == EventOutcome::Close {
                    break;
                }
            }
            WsMessage::Binary(_) => {
                debug!("binary frames are not supported");
            }
            // ping/pong 由底层协议栈应答
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            WsMessage::Close(_) => {
                debug!("client closed connection");
                break;
            }
        }
    }

    handler.handle_close().await;
    // 处理器和本地句柄释放后发送队列关闭，发送任务把剩余事件刷完再退出
    drop(handler);
    drop(outbound);
    let _ = send_task.await;
    info!("websocket connection torn down");
}
