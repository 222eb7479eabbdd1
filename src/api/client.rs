use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{
    ApiError, CapabilityListPayload, ChatRequest, ChatResponse, MessageListPayload,
    SessionListPayload,
};
use crate::core::message::Message;
use crate::core::providers::CapabilityMap;
use crate::core::sessions::ChatSession;
use crate::utils::url::normalize_base_url;

/// The REST surface the client core consumes.
///
/// Every method is a single await point. Implementations must not retry on
/// their own beyond the documented endpoint fallbacks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /chat`
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError>;

    /// `GET /chat/sessions`
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, ApiError>;

    /// `GET /chat/sessions/{id}/messages`, falling back to `/chat/history/{id}`.
    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>, ApiError>;

    /// `DELETE /chat/sessions/{id}`
    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError>;

    /// `GET /chat/providers`, falling back to `/agents`.
    async fn provider_capabilities(&self) -> Result<CapabilityMap, ApiError>;
}

/// [`Backend`] over HTTP with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a backend with its own client; `timeout` bounds every request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "GET");
        let response = self.client.get(url.clone()).send().await?;
        decode_json(url.path(), response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::status(status, body))
}

async fn decode_json<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ApiError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
        endpoint: path.to_string(),
        source,
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let url = self.endpoint(&["chat"])?;
        debug!(
            provider = %request.provider,
            model = ?request.model,
            session_id = ?request.session_id,
            history_len = request.messages.len(),
            "POST /chat"
        );
        let response = self.client.post(url.clone()).json(request).send().await?;
        decode_json(url.path(), response).await
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>, ApiError> {
        let payload: SessionListPayload = self.get_json(&["chat", "sessions"]).await?;
        Ok(payload.into_sessions(Utc::now()))
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>, ApiError> {
        let payload: MessageListPayload = match self
            .get_json(&["chat", "sessions", session_id, "messages"])
            .await
        {
            Err(err) if err.is_not_found() => {
                debug!(session_id, "Session messages endpoint missing, trying history");
                self.get_json(&["chat", "history", session_id]).await?
            }
            other => other?,
        };
        Ok(payload.into_messages(Utc::now()))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["chat", "sessions", session_id])?;
        debug!(url = %url, "DELETE");
        let response = self.client.delete(url).send().await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn provider_capabilities(&self) -> Result<CapabilityMap, ApiError> {
        let payload: CapabilityListPayload = match self.get_json(&["chat", "providers"]).await {
            Err(err) if err.is_not_found() => {
                debug!("Provider endpoint missing, trying /agents");
                self.get_json(&["agents"]).await?
            }
            other => other?,
        };
        Ok(payload.into_capabilities())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatMessage;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex;

    type CapturedRequests = Arc<Mutex<Vec<(String, String)>>>;

    async fn read_http_request(stream: &mut TcpStream) -> Result<(String, String), String> {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        let header_end = loop {
            let read = stream
                .read(&mut chunk)
                .await
                .map_err(|err| err.to_string())?;
            if read == 0 {
                return Err("Unexpected EOF while reading HTTP headers".to_string());
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let request_line = head.lines().next().unwrap_or_default().to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end..].to_vec();
        while body.len() < content_length {
            let read = stream
                .read(&mut chunk)
                .await
                .map_err(|err| err.to_string())?;
            if read == 0 {
                return Err("Unexpected EOF while reading HTTP body".to_string());
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(content_length);

        Ok((request_line, String::from_utf8_lossy(&body).to_string()))
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn route(request_line: &str) -> String {
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        match (method, path) {
            ("POST", "/api/chat") => http_response(
                "200 OK",
                r#"{"response":"Hello back","provider":"openai","model":"gpt-4o-mini","session_id":"s-1","usage":{"prompt_tokens":2,"completion_tokens":3,"total_tokens":5}}"#,
            ),
            ("GET", "/api/chat/sessions") => http_response(
                "200 OK",
                r#"[{"id":"s-1","title":"Greeting","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:05:00Z","message_count":2}]"#,
            ),
            ("GET", "/api/chat/sessions/s-1/messages") => {
                http_response("404 Not Found", r#"{"detail":"Not Found"}"#)
            }
            ("GET", "/api/chat/history/s-1") => http_response(
                "200 OK",
                r#"{"messages":[{"role":"user","content":"Hello"},{"role":"assistant","content":"Hello back"}]}"#,
            ),
            ("DELETE", "/api/chat/sessions/s-1") => http_response("200 OK", r#"{"ok":true}"#),
            ("GET", "/api/chat/providers") => http_response("404 Not Found", ""),
            ("GET", "/api/agents") => http_response(
                "200 OK",
                r#"{"openai":{"available":true,"models":["gpt-4o-mini"]},"anthropic":{"available":false,"models":[]}}"#,
            ),
            _ => http_response("500 Internal Server Error", r#"{"detail":"unexpected route"}"#),
        }
    }

    #[tokio::test]
    async fn http_backend_end_to_end_follows_fallbacks() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let captured: CapturedRequests = Arc::new(Mutex::new(Vec::new()));
        let captured_for_server = Arc::clone(&captured);

        let server_task = tokio::spawn(async move {
            for _ in 0..8 {
                let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
                let (request_line, body) = read_http_request(&mut stream).await?;
                let response = route(&request_line);
                captured_for_server
                    .lock()
                    .await
                    .push((request_line, body));
                stream
                    .write_all(response.as_bytes())
                    .await
                    .map_err(|err| err.to_string())?;
                let _ = stream.shutdown().await;
            }
            Ok::<(), String>(())
        });

        let client = Client::builder()
            .no_proxy()
            .build()
            .expect("client should build");
        let backend = HttpBackend::with_client(client, &format!("http://{addr}/api/"));
        assert_eq!(backend.base_url(), format!("http://{addr}/api"));

        let request = ChatRequest {
            message: "Hello".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "Hello".into(),
            }],
            provider: "openai".into(),
            model: Some("gpt-4o-mini".into()),
            session_id: None,
            api_keys: BTreeMap::from([("openai".to_string(), "sk-test".to_string())]),
        };
        let reply = backend.send_chat(&request).await.expect("chat succeeds");
        assert_eq!(reply.text(), "Hello back");
        assert_eq!(reply.session_id.as_deref(), Some("s-1"));
        assert_eq!(reply.usage.and_then(|u| u.total_tokens), Some(5));

        let sessions = backend.list_sessions().await.expect("sessions load");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "Greeting");

        let history = backend
            .session_messages("s-1")
            .await
            .expect("history falls back");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello back");

        backend.delete_session("s-1").await.expect("delete succeeds");

        let capabilities = backend
            .provider_capabilities()
            .await
            .expect("capabilities fall back to /agents");
        assert!(capabilities["openai"].available);
        assert!(!capabilities["anthropic"].available);

        let err = backend
            .list_sessions_at_unknown_route()
            .await
            .expect_err("unknown route fails");
        assert_eq!(err.detail(), "unexpected route");

        server_task
            .await
            .expect("server task joins")
            .expect("server handled all requests");

        let captured = captured.lock().await;
        let lines: Vec<&str> = captured.iter().map(|(line, _)| line.as_str()).collect();
        assert_eq!(
            lines,
            vec![
                "POST /api/chat HTTP/1.1",
                "GET /api/chat/sessions HTTP/1.1",
                "GET /api/chat/sessions/s-1/messages HTTP/1.1",
                "GET /api/chat/history/s-1 HTTP/1.1",
                "DELETE /api/chat/sessions/s-1 HTTP/1.1",
                "GET /api/chat/providers HTTP/1.1",
                "GET /api/agents HTTP/1.1",
                "GET /api/unknown HTTP/1.1",
            ]
        );
        let chat_body: serde_json::Value =
            serde_json::from_str(&captured[0].1).expect("chat body is JSON");
        assert_eq!(chat_body["message"], "Hello");
        assert_eq!(chat_body["api_keys"]["openai"], "sk-test");
        assert!(chat_body.get("session_id").is_none());
    }

    impl HttpBackend {
        async fn list_sessions_at_unknown_route(&self) -> Result<serde_json::Value, ApiError> {
            self.get_json(&["unknown"]).await
        }
    }

    #[test]
    fn endpoint_escapes_session_ids() {
        let backend = HttpBackend::with_client(Client::new(), "http://localhost:8000");
        let url = backend
            .endpoint(&["chat", "sessions", "a b/c", "messages"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/chat/sessions/a%20b%2Fc/messages"
        );
    }

    #[test]
    fn endpoint_rejects_non_urls() {
        let backend = HttpBackend::with_client(Client::new(), "not a url");
        assert!(matches!(
            backend.endpoint(&["chat"]),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
