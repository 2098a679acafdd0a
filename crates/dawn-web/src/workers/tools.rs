//! Command execution: parse embedded tool invocations, publish them on the
//! command bus, and await the replies.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use dawn_core::services::{CancelToken, Session};
use dawn_core::settings::ToolSettings;

use crate::state::AppState;

/// Topic the device-control plane listens on.
const COMMAND_TOPIC: &str = "dawn/commands";

/// Execute a batch of extracted command payloads, returning the
/// concatenated results. Each command gets a pending-reply slot keyed by a
/// fresh request id before it is published; the reply wait is bounded by
/// the configured timeout.
pub async fn execute_commands(
    state: &AppState,
    session: &Arc<Session>,
    cancel: &CancelToken,
    commands: &[String],
    settings: &ToolSettings,
) -> String {
    let timeout = Duration::from_secs(settings.command_timeout_secs);
    let mut results = Vec::with_capacity(commands.len());

    for raw in commands {
        if cancel.is_cancelled() {
            break;
        }

        let mut payload: Value = match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) | Err(_) => {
                debug!(session_id = session.id(), "unparseable command payload");
                results.push("{\"error\":\"invalid command JSON\"}".to_string());
                continue;
            }
        };

        let name = payload["name"]
            .as_str()
            .or_else(|| payload["device"].as_str())
            .unwrap_or("command")
            .to_string();

        if !settings.allowed.is_empty() && !settings.allowed.contains(&name) {
            warn!(tool = %name, "command refused by tool policy");
            results.push(format!("{{\"error\":\"tool {name} not allowed\"}}"));
            continue;
        }

        let request_id = state.next_request_id();
        payload["request_id"] = Value::from(request_id);

        // register before publishing so a fast reply cannot race the slot
        let pending = state.command_bus.register(request_id);
        if let Err(e) = state.command_bus.publish(COMMAND_TOPIC, payload).await {
            warn!(error = %e, tool = %name, "command publish failed");
            results.push(format!("{{\"error\":\"publish failed: {e}\"}}"));
            continue;
        }

        session.tool_started(&name);
        let outcome = pending.wait(timeout).await;
        session.tool_finished(&name);

        match outcome {
            Ok(reply) => results.push(reply.to_string()),
            Err(e) => {
                warn!(error = %e, tool = %name, "command reply wait failed");
                results.push(format!("{{\"error\":\"{e}\"}}"));
            }
        }
    }

    results.join("\n")
}
