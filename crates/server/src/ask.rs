use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stayql_agent::AnalystService;
use stayql_core::domain::response::{AnalystResponse, ErrorKind};
use stayql_core::errors::InterfaceError;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AskState {
    analyst: Arc<AnalystService>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub session_id: String,
}

/// Body returned when no turn response exists, e.g. during a provider outage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub correlation_id: String,
}

pub fn router(analyst: Arc<AnalystService>) -> Router {
    Router::new().route("/api/ask", post(ask)).with_state(AskState { analyst })
}

pub async fn ask(State(state): State<AskState>, Json(request): Json<AskRequest>) -> Response {
    match state.analyst.ask(&request.question, &request.session_id).await {
        Ok(response) => (status_for(&response), Json(response)).into_response(),
        Err(error) => {
            let interface = error.into_interface(Uuid::new_v4().to_string());
            warn!(
                event_name = "http.ask.failed",
                correlation_id = %interface.correlation_id(),
                error = %interface,
                "ask request failed"
            );
            let status = match &interface {
                InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
                InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = ErrorBody {
                message: interface.user_message().to_owned(),
                correlation_id: interface.correlation_id().to_owned(),
            };
            (status, Json(body)).into_response()
        }
    }
}

fn status_for(response: &AnalystResponse) -> StatusCode {
    match response.error_kind {
        Some(ErrorKind::InvalidQuestion) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::SessionBusy) => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use stayql_agent::{
        AnalystService, GenerationOptions, GenerationPurpose, LlmProvider, ProviderError,
        ServiceOptions,
    };
    use stayql_core::audit::InMemoryAuditSink;
    use stayql_core::domain::execution::{ExecutionResult, Row};
    use stayql_core::ports::{AccessMode, ExecutionError, ExecutionProvider};
    use tower::ServiceExt;

    use super::router;

    struct FixedLlm {
        outage: bool,
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        async fn generate(
            &self,
            _prompt: &str,
            options: &GenerationOptions,
        ) -> Result<String, ProviderError> {
            if self.outage {
                return Err(ProviderError::Outage("connection refused by 10.0.0.7".to_owned()));
            }
            Ok(match options.purpose {
                GenerationPurpose::SqlGeneration => {
                    "SELECT COUNT(*) AS total FROM reservations".to_owned()
                }
                GenerationPurpose::AnswerFormatting => "There are 96 reservations.".to_owned(),
            })
        }
    }

    struct FixedDataset;

    #[async_trait]
    impl ExecutionProvider for FixedDataset {
        async fn execute_readonly(
            &self,
            _sql: &str,
            _row_limit: u32,
        ) -> Result<ExecutionResult, ExecutionError> {
            Ok(ExecutionResult::new(
                vec!["total".to_owned()],
                vec![Row::from([("total".to_owned(), json!(96))])],
                false,
            ))
        }

        fn access_mode(&self) -> AccessMode {
            AccessMode::ReadOnly
        }
    }

    fn app(outage: bool) -> Router {
        let analyst = AnalystService::new(
            Arc::new(FixedLlm { outage }),
            Arc::new(FixedDataset),
            Arc::new(InMemoryAuditSink::default()),
            ServiceOptions::default(),
        )
        .expect("service");
        router(Arc::new(analyst))
    }

    async fn post(app: Router, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, payload)
    }

    #[tokio::test]
    async fn answered_question_returns_sql_and_raw_data() {
        let (status, payload) = post(
            app(false),
            json!({ "question": "How many reservations are there?", "session_id": "web-1" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["text_answer"], "There are 96 reservations.");
        assert_eq!(payload["sql_query"], "SELECT COUNT(*) AS total FROM reservations");
        assert_eq!(payload["raw_data"][0]["total"], 96);
    }

    #[tokio::test]
    async fn blank_question_is_a_bad_request_with_guidance() {
        let (status, payload) =
            post(app(false), json!({ "question": "   ", "session_id": "web-1" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_kind"], "invalid_question");
        assert!(payload.get("sql_query").is_none());
    }

    #[tokio::test]
    async fn provider_outage_maps_to_service_unavailable_without_internals() {
        let (status, payload) = post(
            app(true),
            json!({ "question": "How many reservations are there?", "session_id": "web-2" }),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            payload["message"],
            "The analytics service is temporarily unavailable. Please retry shortly."
        );
        assert!(!payload["correlation_id"].as_str().unwrap_or_default().is_empty());
        assert!(!payload.to_string().contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn missing_session_id_is_rejected_by_the_extractor() {
        let (status, _) = post(app(false), json!({ "question": "How many reservations?" })).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
