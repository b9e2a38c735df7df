//! GitLab deliveries.
//!
//! GitLab authenticates with a shared secret echoed in `X-Gitlab-Token`. The
//! event name comes from the payload's `object_kind`, which is stable across
//! GitLab versions where the `X-Gitlab-Event` header text is not.

use super::signature::verify_token;
use super::{Hook, HookError, HookEvent, HookPayload, require_header};
use crate::event::parser::IncomingRequest;

const HEADER_TOKEN: &str = "x-gitlab-token";
const HEADER_DELIVERY: &str = "x-gitlab-event-uuid";

const EVENTS: &[HookEvent] = &[
    HookEvent {
        name: "push",
        title: "Push",
        description: "Your commits were pushed to a project",
    },
    HookEvent {
        name: "merge_request",
        title: "Merge request assigned",
        description: "A merge request assigned to you changed",
    },
];

/// Verifies GitLab's shared secret token.
pub struct GitLabHook {
    token: String,
}

impl GitLabHook {
    /// Accepts deliveries carrying this secret `token`.
    pub fn new(token: impl Into<String>) -> Self {
        GitLabHook {
            token: token.into(),
        }
    }
}

impl Hook for GitLabHook {
    fn name(&self) -> &str {
        "gitlab"
    }

    fn events(&self) -> &[HookEvent] {
        EVENTS
    }

    fn parse(&self, request: &IncomingRequest, allowlist: &[String]) -> Result<HookPayload, HookError> {
        let token = require_header(request, HEADER_TOKEN)?;
        if !verify_token(token, &self.token) {
            return Err(HookError::InvalidToken);
        }

        let body: serde_json::Value = serde_json::from_slice(&request.body)?;
        let event = body["object_kind"]
            .as_str()
            .ok_or(HookError::MissingField("object_kind"))?
            .to_string();
        if !allowlist.contains(&event) {
            return Err(HookError::EventNotAllowed(event));
        }

        let subject = body["project"]["path_with_namespace"]
            .as_str()
            .map(str::to_string);
        Ok(HookPayload {
            hook: self.name().to_string(),
            event,
            delivery: request.header(HEADER_DELIVERY).map(str::to_string),
            subject,
            body,
        })
    }

    fn check(&self) -> Result<(), String> {
        if self.token.is_empty() {
            return Err("webhook token is empty".to_string());
        }
        Ok(())
    }
}
