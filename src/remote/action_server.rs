//! RemoteAction exchange: fetch pending cloud-initiated actions, execute
//! them, and report status back (design §4.5).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RemoteServerStatus;
use crate::persistence::HubIdentity;
use crate::remote::rest::RestClient;

/// Consecutive fetch failures before the backoff ladder engages (design
/// §4.5: "5 consecutive errors -> 5-minute retry").
const CONSECUTIVE_ERROR_THRESHOLD: u32 = 5;
const BACKOFF_RETRY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionKind {
    ActivateScene { scene_id: u16 },
    ActivateMultiScene { scene_ids: Vec<u16> },
    EnableSchedules,
    DisableSchedules,
    ClearNest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub action: ActionKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingActionsResponse {
    #[serde(default)]
    pub actions: Vec<PendingAction>,
    pub next_update_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
}

#[derive(Serialize)]
struct ActionStatusBody {
    action: ActionStatusInner,
}

#[derive(Serialize)]
struct ActionStatusInner {
    status: &'static str,
    #[serde(rename = "messageId")]
    message_id: String,
}

/// Result of reporting status back, distinguishing the 401 case the
/// coordinator uses to invalidate registration (design §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Ok,
    Unauthorized,
    Failed,
}

pub struct ActionServer {
    rest: RestClient,
    consecutive_errors: u32,
}

impl ActionServer {
    pub fn new(rest: RestClient) -> Self {
        ActionServer { rest, consecutive_errors: 0 }
    }

    /// `GET /api/v2/hubActions`. On success, resets the error counter; on
    /// failure, increments it and reports via `should_back_off`.
    pub fn fetch_pending(&mut self, identity: &HubIdentity) -> Result<PendingActionsResponse, RemoteServerStatus> {
        let result = self.rest.get_json("/api/v2/hubActions", Some(identity));
        match &result {
            Ok(_) => self.consecutive_errors = 0,
            Err(_) => self.consecutive_errors += 1,
        }
        result
    }

    /// `PUT /api/v2/actions/{id}`.
    pub fn report_status(&self, identity: &HubIdentity, action_id: &str, outcome: ExecutionOutcome, message_id: String) -> ReportOutcome {
        let status = match outcome {
            ExecutionOutcome::Completed => "completed",
            ExecutionOutcome::Failed => "failed",
        };
        let body = ActionStatusBody { action: ActionStatusInner { status, message_id } };
        let path = format!("/api/v2/actions/{action_id}");
        let (code, result): (Option<u16>, Result<(), RemoteServerStatus>) = self.rest.put_json_with_status(&path, Some(identity), &body);
        if code == Some(401) {
            return ReportOutcome::Unauthorized;
        }
        match result {
            Ok(()) => ReportOutcome::Ok,
            Err(_) => ReportOutcome::Failed,
        }
    }

    pub fn should_back_off(&self) -> bool {
        self.consecutive_errors >= CONSECUTIVE_ERROR_THRESHOLD
    }

    pub fn backoff_duration(&self) -> Duration {
        BACKOFF_RETRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_engages_after_five_consecutive_errors() {
        let mut server = ActionServer::new(RestClient::new("http://localhost".to_string()).unwrap());
        for _ in 0..(CONSECUTIVE_ERROR_THRESHOLD - 1) {
            server.consecutive_errors += 1;
            assert!(!server.should_back_off());
        }
        server.consecutive_errors += 1;
        assert!(server.should_back_off());
    }

    #[test]
    fn pending_actions_response_parses_empty_action_list() {
        let json = r#"{"next_update_minutes": 10}"#;
        let response: PendingActionsResponse = serde_json::from_str(json).unwrap();
        assert!(response.actions.is_empty());
        assert_eq!(response.next_update_minutes, 10);
    }
}
