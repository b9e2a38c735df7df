//! Notifications for forge events.
//!
//! | Event | Who is notified |
//! |---|---|
//! | GitHub `pull_request` / `review_requested` | the requested reviewer |
//! | GitHub `issue_comment` / `created` | the issue author, unless they wrote the comment |
//! | GitLab `push` | the pusher |
//! | GitLab `merge_request` | every assignee except the actor |

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::{Event, EventData};
use crate::identifier::{EMAIL, Identifier, InvalidIdentifier, Set, USERNAME};
use crate::notification::Notification;
use crate::processor::{ProcessError, Processor};
use crate::transport::slack::SLACK_KEY;
use crate::webhooks::HookPayload;

/// Namespace of identifiers learned from GitHub.
pub const GITHUB_NAMESPACE: &str = "github.com";
/// Namespace of identifiers learned from GitLab.
pub const GITLAB_NAMESPACE: &str = "gitlab.com";

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    title: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequest,
    repository: Repository,
    sender: Account,
    /// Absent when a team, not a person, was requested.
    requested_reviewer: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    user: Account,
}

#[derive(Debug, Deserialize)]
struct Comment {
    html_url: String,
    user: Account,
}

#[derive(Debug, Deserialize)]
struct IssueCommentEvent {
    action: String,
    issue: Issue,
    comment: Comment,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Project {
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    user_username: String,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    total_commits_count: u64,
    project: Project,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestAttributes {
    iid: u64,
    title: String,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestEvent {
    user: GitLabUser,
    project: Project,
    object_attributes: MergeRequestAttributes,
    #[serde(default)]
    assignees: Vec<GitLabUser>,
}

/// Generates notifications from GitHub and GitLab webhook events.
#[derive(Debug, Default)]
pub struct ForgeGenerator;

impl ForgeGenerator {
    fn decode<T: DeserializeOwned>(&self, payload: &HookPayload) -> Result<T, ProcessError> {
        serde_json::from_value(payload.body.clone()).map_err(|e| {
            ProcessError::new(
                self.name(),
                format!("malformed {} {} payload", payload.hook, payload.event),
            )
            .with_source(e)
        })
    }

    fn generate(&self, event: &Event, payload: &HookPayload) -> Result<Vec<Notification>, ProcessError> {
        let context = event.context();
        let out = match (payload.hook.as_str(), payload.event.as_str()) {
            ("github", "pull_request") => {
                let pr: PullRequestEvent = self.decode(payload)?;
                let Some(reviewer) = pr.requested_reviewer.filter(|_| pr.action == "review_requested")
                else {
                    return Ok(Vec::new());
                };
                let text = format!(
                    "{} requested your review on {}#{}: {}",
                    pr.sender.login, pr.repository.full_name, pr.pull_request.number, pr.pull_request.title
                );
                let slack = format!(
                    "{} requested your review on <{}|{}#{}>: {}",
                    pr.sender.login,
                    pr.pull_request.html_url,
                    pr.repository.full_name,
                    pr.pull_request.number,
                    pr.pull_request.title
                );
                vec![
                    Notification::builder(context.clone())
                        .recipient(username(GITHUB_NAMESPACE, &reviewer.login)?)
                        .message(text)
                        .message_for(SLACK_KEY.into(), slack)
                        .build(),
                ]
            }
            ("github", "issue_comment") => {
                let ic: IssueCommentEvent = self.decode(payload)?;
                if ic.action != "created" || ic.comment.user.login == ic.issue.user.login {
                    return Ok(Vec::new());
                }
                let text = format!(
                    "{} commented on {}#{}: {}",
                    ic.comment.user.login, ic.repository.full_name, ic.issue.number, ic.issue.title
                );
                let slack = format!(
                    "{} <{}|commented> on {}#{}: {}",
                    ic.comment.user.login,
                    ic.comment.html_url,
                    ic.repository.full_name,
                    ic.issue.number,
                    ic.issue.title
                );
                vec![
                    Notification::builder(context.clone())
                        .recipient(username(GITHUB_NAMESPACE, &ic.issue.user.login)?)
                        .message(text)
                        .message_for(SLACK_KEY.into(), slack)
                        .build(),
                ]
            }
            ("gitlab", "push") => {
                let push: PushEvent = self.decode(payload)?;
                let recipient = username(GITLAB_NAMESPACE, &push.user_username)?;
                if let Some(email) = push.user_email.filter(|e| !e.is_empty()) {
                    recipient.add(gitlab_id(EMAIL, &email)?);
                }
                let branch = push.git_ref.trim_start_matches("refs/heads/");
                vec![
                    Notification::builder(context.clone())
                        .recipient(recipient)
                        .message(format!(
                            "You pushed {} commit(s) to {} ({})",
                            push.total_commits_count, push.project.path_with_namespace, branch
                        ))
                        .build(),
                ]
            }
            ("gitlab", "merge_request") => {
                let mr: MergeRequestEvent = self.decode(payload)?;
                let action = mr.object_attributes.action.as_deref().unwrap_or("updated");
                let text = format!(
                    "{} {} merge request !{} in {}: {}",
                    mr.user.username,
                    past_tense(action),
                    mr.object_attributes.iid,
                    mr.project.path_with_namespace,
                    mr.object_attributes.title
                );
                let mut out = Vec::new();
                for assignee in mr.assignees.iter().filter(|a| a.username != mr.user.username) {
                    out.push(
                        Notification::builder(context.clone())
                            .recipient(username(GITLAB_NAMESPACE, &assignee.username)?)
                            .message(text.clone())
                            .build(),
                    );
                }
                out
            }
            _ => Vec::new(),
        };
        Ok(out)
    }
}

fn past_tense(action: &str) -> &str {
    match action {
        "open" => "opened",
        "close" => "closed",
        "reopen" => "reopened",
        "update" => "updated",
        "merge" => "merged",
        other => other,
    }
}

fn gitlab_id(kind: &str, value: &str) -> Result<Identifier, ProcessError> {
    Identifier::new(Some(GITLAB_NAMESPACE), kind, value).map_err(invalid)
}

fn username(namespace: &str, login: &str) -> Result<Set, ProcessError> {
    Identifier::new(Some(namespace), USERNAME, login)
        .map(Set::from)
        .map_err(invalid)
}

fn invalid(e: InvalidIdentifier) -> ProcessError {
    ProcessError::new("forge", "payload names an invalid account").with_source(e)
}

#[async_trait]
impl Processor for ForgeGenerator {
    fn name(&self) -> &str {
        "forge"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        event: &Event,
        mut notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, ProcessError> {
        let EventData::Hook(payload) = event.data() else {
            return Ok(notifications);
        };
        let generated = self.generate(event, payload)?;
        debug!(
            event_id = event.context().id(),
            event_type = event.context().event_type(),
            generated = generated.len(),
            "Generated forge notifications"
        );
        notifications.extend(generated);
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Context;
    use crate::transport::TransportKey;
    use serde_json::json;

    fn hook_event(hook: &str, event: &str, body: serde_json::Value) -> Event {
        let context = Context::new("e1", format!("/webhooks/{hook}"), format!("com.{hook}.{event}")).unwrap();
        Event::new(
            context,
            EventData::Hook(HookPayload {
                hook: hook.into(),
                event: event.into(),
                delivery: None,
                subject: None,
                body,
            }),
        )
    }

    async fn run(event: &Event) -> Result<Vec<Notification>, ProcessError> {
        ForgeGenerator
            .process(&CancellationToken::new(), event, Vec::new())
            .await
    }

    #[tokio::test]
    async fn review_request_notifies_reviewer() {
        let event = hook_event(
            "github",
            "pull_request",
            json!({
                "action": "review_requested",
                "pull_request": {"number": 7, "title": "Fix it", "html_url": "https://github.com/o/r/pull/7"},
                "repository": {"full_name": "o/r"},
                "sender": {"login": "alice"},
                "requested_reviewer": {"login": "bob"}
            }),
        );
        let out = run(&event).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient().to_string(), "[github.com/username:bob]");
        assert_eq!(
            out[0].render(&TransportKey::new("writer")),
            "alice requested your review on o/r#7: Fix it"
        );
        assert!(out[0].render(&TransportKey::new(SLACK_KEY)).contains("<https://github.com/o/r/pull/7|o/r#7>"));
    }

    #[tokio::test]
    async fn other_pull_request_actions_are_quiet() {
        let event = hook_event(
            "github",
            "pull_request",
            json!({
                "action": "opened",
                "pull_request": {"number": 7, "title": "Fix it", "html_url": "u"},
                "repository": {"full_name": "o/r"},
                "sender": {"login": "alice"}
            }),
        );
        assert!(run(&event).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn comment_notifies_author_but_not_self() {
        let body = |commenter: &str| {
            json!({
                "action": "created",
                "issue": {"number": 3, "title": "Crash", "user": {"login": "carol"}},
                "comment": {"html_url": "u", "user": {"login": commenter}},
                "repository": {"full_name": "o/r"}
            })
        };
        let out = run(&hook_event("github", "issue_comment", body("dave"))).await.unwrap();
        assert_eq!(out[0].recipient().to_string(), "[github.com/username:carol]");

        let out = run(&hook_event("github", "issue_comment", body("carol"))).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn push_notifies_pusher_with_email() {
        let event = hook_event(
            "gitlab",
            "push",
            json!({
                "object_kind": "push",
                "ref": "refs/heads/main",
                "user_username": "jsmith",
                "user_email": "jsmith@example.com",
                "total_commits_count": 2,
                "project": {"path_with_namespace": "group/app"}
            }),
        );
        let out = run(&event).await.unwrap();
        assert_eq!(
            out[0].recipient().to_string(),
            "[gitlab.com/email:jsmith@example.com gitlab.com/username:jsmith]"
        );
        assert_eq!(
            out[0].render(&TransportKey::new("writer")),
            "You pushed 2 commit(s) to group/app (main)"
        );
    }

    #[tokio::test]
    async fn merge_request_notifies_other_assignees() {
        let event = hook_event(
            "gitlab",
            "merge_request",
            json!({
                "object_kind": "merge_request",
                "user": {"username": "ann"},
                "project": {"path_with_namespace": "group/app"},
                "object_attributes": {"iid": 12, "title": "Refactor", "action": "open"},
                "assignees": [{"username": "ann"}, {"username": "ben"}, {"username": "cat"}]
            }),
        );
        let out = run(&event).await.unwrap();
        let recipients: Vec<String> = out.iter().map(|n| n.recipient().to_string()).collect();
        assert_eq!(recipients, vec!["[gitlab.com/username:ben]", "[gitlab.com/username:cat]"]);
        assert_eq!(
            out[0].render(&TransportKey::new("writer")),
            "ann opened merge request !12 in group/app: Refactor"
        );
    }

    #[tokio::test]
    async fn malformed_payload_fails() {
        let event = hook_event("gitlab", "push", json!({"object_kind": "push"}));
        let err = run(&event).await.unwrap_err();
        assert!(err.to_string().contains("malformed gitlab push payload"));
    }
}
