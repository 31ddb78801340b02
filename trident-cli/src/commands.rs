//! The run/stream/health subcommands.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncReadExt;

use keel::{Request, Response, SessionId};
use trident_dispatch::{AgentDispatcher, StreamEvent};

/// `agent run`: one request in, one Response JSON out.
pub async fn run(
    dispatcher: &Arc<AgentDispatcher>,
    input: Option<String>,
    session: SessionId,
) -> i32 {
    let input = match resolve_input(input).await {
        Ok(input) => input,
        Err(code) => return code,
    };
    let mut request = Request::new(input, session);
    request.context.source = "cli".to_string();
    let response = dispatcher.process(request).await;
    print_json(&serde_json::to_value(&response).unwrap_or_default());
    response_exit_code(&response)
}

/// `agent stream`: one JSON object per stream event.
pub async fn stream(
    dispatcher: &Arc<AgentDispatcher>,
    input: Option<String>,
    session: SessionId,
) -> i32 {
    let input = match resolve_input(input).await {
        Ok(input) => input,
        Err(code) => return code,
    };
    let mut request = Request::new(input, session);
    request.context.source = "cli".to_string();

    let mut events = dispatcher.stream(request);
    let mut code = 0;
    while let Some(event) = events.next().await {
        let (json, event_code) = render_event(&event);
        print_json(&json);
        if let Some(event_code) = event_code {
            code = event_code;
        }
    }
    code
}

/// `agent health`: component health JSON.
pub async fn health(dispatcher: &Arc<AgentDispatcher>) -> i32 {
    print_json(&dispatcher.health().await);
    0
}

fn render_event(event: &StreamEvent) -> (serde_json::Value, Option<i32>) {
    match event {
        StreamEvent::ClassificationStart => {
            (serde_json::json!({ "event": "classification_start" }), None)
        }
        StreamEvent::ClassificationEnd(classification) => (
            serde_json::json!({
                "event": "classification_end",
                "classification": classification,
            }),
            None,
        ),
        StreamEvent::ProcessingStart { kind } => (
            serde_json::json!({ "event": "processing_start", "kind": kind }),
            None,
        ),
        StreamEvent::Chunk { content, metadata } => (
            serde_json::json!({
                "event": "chunk",
                "content": content,
                "metadata": metadata,
            }),
            None,
        ),
        StreamEvent::Completed(response) => (
            serde_json::json!({ "event": "completed", "response": response }),
            Some(response_exit_code(response)),
        ),
        StreamEvent::Error(error) => (
            serde_json::json!({ "event": "error", "error": error }),
            Some(error.exit_code()),
        ),
        // Handle non_exhaustive
        other => (
            serde_json::json!({ "event": "unknown", "detail": format!("{other:?}") }),
            None,
        ),
    }
}

fn response_exit_code(response: &Response) -> i32 {
    if response.success {
        return 0;
    }
    let code = response
        .metadata
        .get("error_code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let category = response
        .metadata
        .get("error_category")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(keel::ErrorCategory::System);
    keel::AgentError::new(code, "", category).exit_code()
}

async fn resolve_input(input: Option<String>) -> Result<String, i32> {
    if let Some(input) = input {
        return Ok(input);
    }
    let mut buffer = String::new();
    match tokio::io::stdin().read_to_string(&mut buffer).await {
        Ok(_) => Ok(buffer),
        Err(e) => {
            eprintln!("error: reading stdin failed: {e}");
            Err(1)
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("error: serialisation failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::{AgentError, ErrorCategory, InputKind};

    fn error_response(code: &str, category: ErrorCategory) -> Response {
        Response::from_error(InputKind::Prompt, &AgentError::new(code, "failed", category))
    }

    #[test]
    fn exit_codes_map_to_the_cli_contract() {
        let ok = Response::ok(InputKind::Prompt, "fine");
        assert_eq!(response_exit_code(&ok), 0);
        assert_eq!(
            response_exit_code(&error_response("EMPTY_INPUT", ErrorCategory::Validation)),
            2
        );
        assert_eq!(
            response_exit_code(&error_response("MISSING", ErrorCategory::Configuration)),
            3
        );
        assert_eq!(
            response_exit_code(&error_response("OPERATION_TIMEOUT", ErrorCategory::System)),
            4
        );
        assert_eq!(
            response_exit_code(&error_response("CANCELLED", ErrorCategory::System)),
            4
        );
        assert_eq!(
            response_exit_code(&error_response("INPUT_BLOCKED", ErrorCategory::Business)),
            5
        );
        assert_eq!(
            response_exit_code(&error_response("INTERNAL", ErrorCategory::System)),
            1
        );
    }
}
