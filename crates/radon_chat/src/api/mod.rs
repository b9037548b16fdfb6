mod auth;
mod error;
mod handler;
mod request;
mod response;
mod wrapper;

use std::path::Path;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use auth::AUTH_HEADER;
pub use handler::ApiDoc;

use crate::chat::ConversationPipeline;
use crate::radon::RadonClient;

/// 上传的图片与音频上限
const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

fn api_routes() -> Router {
    Router::new()
        .route("/api/profile", put(handler::update_profile))
        .route("/api/chats", get(handler::list_chats).post(handler::create_chat))
        .route("/api/chats/{chat_id}", get(handler::get_chat).delete(handler::delete_chat))
        .route("/api/chats/{chat_id}/messages", post(handler::send_message))
        .route(
            "/api/chats/{chat_id}/messages/{message_id}",
            put(handler::edit_message).delete(handler::delete_message),
        )
        .route("/api/chats/{chat_id}/stream", post(handler::stream_message))
        .route("/api/messages/regenerate", post(handler::regenerate_message))
        .route("/api/messages/{message_id}/history", get(handler::get_message_history))
        .route("/api/radon/health", get(handler::radon_health))
        .route("/api/radon/functions", get(handler::radon_functions))
        .route("/api/radon/personalities", get(handler::radon_personalities))
        .route("/api/radon/conversations", post(handler::radon_create_conversation))
}

/// 组装完整的 HTTP 应用
pub fn router(pipeline: Arc<ConversationPipeline>, radon: Arc<RadonClient>, upload_dir: &Path) -> Router {
    api_routes()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(Extension(pipeline))
        .layer(Extension(radon))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use radon_chat_entity::message::MessageRole;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::chat::{store, LocalBlobStore};
    use crate::database::setup_test_database;
    use crate::radon::{ChatOptions, ChunkStream, InboundResult, InferenceGateway, RadonError, RetryPolicy, StreamChunk};

    struct EchoGateway;

    #[async_trait]
    impl InferenceGateway for EchoGateway {
        async fn chat(&self, prompt: &str, _options: &ChatOptions) -> Result<InboundResult, RadonError> {
            let last = prompt.lines().last().unwrap_or_default();
            Ok(InboundResult {
                response: format!("echo -> {}", last),
                ..Default::default()
            })
        }

        async fn stream_chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<ChunkStream, RadonError> {
            let chunks = vec![
                StreamChunk {
                    content: "Hel".to_string(),
                    ..Default::default()
                },
                StreamChunk {
                    content: "lo".to_string(),
                    ..Default::default()
                },
                StreamChunk::finished(),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct DownGateway;

    #[async_trait]
    impl InferenceGateway for DownGateway {
        async fn chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<InboundResult, RadonError> {
            Err(RadonError::Connection("connection refused".to_string()))
        }

        async fn stream_chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<ChunkStream, RadonError> {
            Err(RadonError::Connection("connection refused".to_string()))
        }
    }

    struct TestApp {
        app: Router,
        pipeline: Arc<ConversationPipeline>,
        chat_id: i32,
        upload_dir: PathBuf,
    }

    impl Drop for TestApp {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.upload_dir);
        }
    }

    async fn test_app() -> TestApp {
        test_app_with(Arc::new(EchoGateway), RetryPolicy::default()).await
    }

    async fn test_app_with(gateway: Arc<dyn InferenceGateway>, retry: RetryPolicy) -> TestApp {
        let db = Arc::new(setup_test_database().await);
        let owner = store::upsert_user(db.as_ref(), "owner", None, None).await.unwrap();
        store::upsert_user(db.as_ref(), "stranger", None, None).await.unwrap();
        let chat = store::create_chat(db.as_ref(), owner.id, "api".to_string(), None)
            .await
            .unwrap();
        let upload_dir = std::env::temp_dir().join(format!("radon-chat-api-{}", Uuid::new_v4()));
        let pipeline = Arc::new(ConversationPipeline::new(
            db,
            gateway,
            Arc::new(LocalBlobStore::new(&upload_dir)),
            retry,
            10,
        ));
        let radon = Arc::new(
            RadonClient::new(
                "http://127.0.0.1:1",
                Duration::from_secs(10),
                Duration::from_secs(1),
                None,
            )
            .unwrap(),
        );
        TestApp {
            app: router(pipeline.clone(), radon, &upload_dir),
            pipeline,
            chat_id: chat.id,
            upload_dir,
        }
    }

    fn json_request(method: &str, uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(AUTH_HEADER, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_send_json_message() {
        let t = test_app().await;
        let uri = format!("/api/chats/{}/messages", t.chat_id);
        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, Some("owner"), json!({"content": "hello"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["role"], "assistant");
        assert_eq!(body["content"], "echo -> User: hello");
        assert_eq!(body["isEdited"], false);
        assert!(body["createdAt"].as_str().unwrap().ends_with('Z'));
        assert!(body.get("imageUrl").is_none());

        let stored = store::chat_messages(t.pipeline.db(), t.chat_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_unavailable_inference_returns_fallback_reply() {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };
        let t = test_app_with(Arc::new(DownGateway), retry).await;
        let uri = format!("/api/chats/{}/messages", t.chat_id);
        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, Some("owner"), json!({"content": "are you there?"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["role"], "assistant");
        assert!(body["content"].as_str().unwrap().contains("\"are you there?\""));
        assert_eq!(store::chat_messages(t.pipeline.db(), t.chat_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_send_multipart_with_audio() {
        let t = test_app().await;
        let boundary = "radon-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"content\"\r\n\r\nvoice note\r\n").as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"clip.webm\"\r\nContent-Type: audio/webm\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend(std::iter::repeat(9u8).take(64_000));
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/chats/{}/messages", t.chat_id))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .header(AUTH_HEADER, "owner")
            .body(Body::from(body))
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let user_turn = store::chat_messages(t.pipeline.db(), t.chat_id).await.unwrap().remove(0);
        assert_eq!(user_turn.content, "voice note");
        assert_eq!(user_turn.audio_duration, Some(2));

        // 上传的文件可以通过 /uploads 访问
        let audio_url = user_turn.audio_url.unwrap();
        let response = t
            .app
            .clone()
            .oneshot(Request::builder().uri(&audio_url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 64_000);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let t = test_app().await;
        let uri = format!("/api/chats/{}/messages", t.chat_id);

        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, None, json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({"error": "Unauthorized"}));

        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, Some("ghost"), json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, Some("stranger"), json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, Some("owner"), json!({"content": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri(&uri)
            .header(header::CONTENT_TYPE, "text/plain")
            .header(AUTH_HEADER, "owner")
            .body(Body::from("hi"))
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        assert!(store::chat_messages(t.pipeline.db(), t.chat_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_endpoint_emits_sse() {
        let t = test_app().await;
        let uri = format!("/api/chats/{}/stream", t.chat_id);
        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", &uri, Some("owner"), json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let events: Vec<Value> = String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["content"], "");
        assert_eq!(events[0]["done"], false);
        assert_eq!(events[1]["content"], "Hel");
        assert_eq!(events[3]["done"], true);
        assert_eq!(events[3]["fullResponse"], "Hello");

        let stored = store::chat_messages(t.pipeline.db(), t.chat_id).await.unwrap();
        assert_eq!(stored[1].content, "Hello");
        assert_eq!(events[3]["messageId"], stored[1].id);
    }

    #[tokio::test]
    async fn test_chat_management_and_history() {
        let t = test_app().await;

        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", "/api/chats", Some("owner"), json!({"title": "second"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;

        let response = t
            .app
            .clone()
            .oneshot(json_request("GET", "/api/chats", Some("owner"), json!({})))
            .await
            .unwrap();
        let chats = json_body(response).await;
        assert_eq!(chats.as_array().unwrap().len(), 2);

        let uri = format!("/api/chats/{}/messages", t.chat_id);
        t.app
            .clone()
            .oneshot(json_request("POST", &uri, Some("owner"), json!({"content": "draft"})))
            .await
            .unwrap();
        let question = store::chat_messages(t.pipeline.db(), t.chat_id).await.unwrap().remove(0);

        let edit_uri = format!("/api/chats/{}/messages/{}", t.chat_id, question.id);
        let response = t
            .app
            .clone()
            .oneshot(json_request("PUT", &edit_uri, Some("owner"), json!({"content": "final"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["isEdited"], true);

        let history_uri = format!("/api/messages/{}/history", question.id);
        let response = t
            .app
            .clone()
            .oneshot(json_request("GET", &history_uri, Some("owner"), json!({})))
            .await
            .unwrap();
        let history = json_body(response).await;
        assert_eq!(history["currentContent"], "final");
        assert_eq!(history["editHistory"][0]["previousContent"], "draft");

        let delete_uri = format!("/api/chats/{}", created["id"]);
        let response = t
            .app
            .clone()
            .oneshot(json_request("DELETE", &delete_uri, Some("stranger"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = t
            .app
            .clone()
            .oneshot(json_request("DELETE", &delete_uri, Some("owner"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_radon_health_reports_unreachable_service() {
        let t = test_app().await;
        let response = t
            .app
            .clone()
            .oneshot(Request::builder().uri("/api/radon/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"healthy": false}));
    }
}
