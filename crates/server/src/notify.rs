//! Outbound notices: rendered from embedded Tera templates, then posted to a webhook
//! (mail relay, chat bridge) or written to the log when no webhook is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ladder_core::errors::SideEffectError;
use ladder_core::ports::{
    AdvanceNotice, ApprovalRequestNotice, FinalizedNotice, Notifier, RejectedNotice,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::{info, warn};

const TEMPLATES: &[(&str, &str)] = &[
    ("approval_request.subject", "Approval needed: {{ title }} ({{ total_amount }})"),
    (
        "approval_request.body",
        "{{ submitted_by }} submitted \"{{ title }}\" for {{ total_amount }}.\n\
         You are approver for level {{ level }} of {{ max_level }} ({{ level_name }}).\n\n\
         Approve: {{ approve_url }}\n\
         Reject: {{ reject_url }}\n",
    ),
    (
        "advance.subject",
        "Approval needed: {{ request.title }} ({{ request.total_amount }})",
    ),
    (
        "advance.body",
        "{{ request.submitted_by }} submitted \"{{ request.title }}\" for {{ request.total_amount }}.\n\
         You are approver for level {{ request.level }} of {{ request.max_level }} ({{ request.level_name }}).\n\n\
         Already approved:\n\
         {% for step in previous_approvals %}- level {{ step.level }}{% if step.level_name %} {{ step.level_name }}{% endif %}: {{ step.approver_email }}{% if step.comment %} ({{ step.comment }}){% endif %}\n{% endfor %}\n\
         Approve: {{ request.approve_url }}\n\
         Reject: {{ request.reject_url }}\n",
    ),
    ("progress.subject", "In progress: {{ request.title }}"),
    (
        "progress.body",
        "\"{{ request.title }}\" passed level {{ previous_level }} and is now with \
         {{ request.approver_email }} (level {{ request.level }} of {{ request.max_level }}).\n",
    ),
    ("finalized.subject", "Approved: {{ title }}"),
    (
        "finalized.body",
        "\"{{ title }}\" ({{ total_amount }}) is approved.\n\
         {% if comment %}Comment: {{ comment }}\n{% endif %}\
         {% for step in timeline %}- level {{ step.level }}: {{ step.approver_email }} {{ step.status }}\n{% endfor %}\
         {% if artifacts_relocated %}Attached documents were moved to the approved location.\n{% endif %}",
    ),
    ("rejected.subject", "Rejected: {{ title }}"),
    (
        "rejected.body",
        "\"{{ title }}\" ({{ total_amount }}) was rejected\
         {% if rejected_by %} by {{ rejected_by }}{% endif %}\
         {% if level %} at level {{ level }}{% if level_name %} ({{ level_name }}){% endif %}{% endif %}.\n\
         {% if reason %}Reason: {{ reason }}\n{% endif %}",
    ),
];

/// One rendered message, as posted to the webhook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: String,
    pub request_id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
enum Transport {
    Webhook { client: Client, url: String },
    Log,
}

#[derive(Clone)]
pub struct MessageNotifier {
    templates: Arc<Tera>,
    transport: Transport,
}

pub fn init_templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TEMPLATES.iter().copied())?;
    Ok(tera)
}

impl MessageNotifier {
    pub fn webhook(
        url: impl Into<String>,
        timeout_secs: u64,
        templates: Tera,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self {
            templates: Arc::new(templates),
            transport: Transport::Webhook { client, url: url.into() },
        })
    }

    pub fn log_only(templates: Tera) -> Self {
        Self { templates: Arc::new(templates), transport: Transport::Log }
    }

    pub fn transport_name(&self) -> &'static str {
        match self.transport {
            Transport::Webhook { .. } => "webhook",
            Transport::Log => "log",
        }
    }

    fn compose(
        &self,
        kind: &str,
        request_id: &str,
        to: &str,
        context: &Context,
    ) -> Result<OutboundMessage, SideEffectError> {
        let render = |part: &str| {
            self.templates.render(&format!("{kind}.{part}"), context).map_err(|error| {
                SideEffectError::NotificationDeliveryFailure(format!(
                    "template `{kind}.{part}` failed: {error}"
                ))
            })
        };
        Ok(OutboundMessage {
            kind: kind.to_string(),
            request_id: request_id.to_string(),
            to: to.to_string(),
            subject: render("subject")?,
            body: render("body")?,
        })
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<(), SideEffectError> {
        match &self.transport {
            Transport::Log => {
                info!(
                    event_name = "notify.message.logged",
                    kind = %message.kind,
                    request_id = %message.request_id,
                    to = %message.to,
                    subject = %message.subject,
                    "no webhook configured; notice written to log"
                );
                Ok(())
            }
            Transport::Webhook { client, url } => {
                let response = client.post(url).json(message).send().await.map_err(|error| {
                    warn!(
                        event_name = "notify.webhook.request_failed",
                        request_id = %message.request_id,
                        error = %error,
                        "notification webhook request failed"
                    );
                    SideEffectError::NotificationDeliveryFailure(error.to_string())
                })?;

                if !response.status().is_success() {
                    return Err(SideEffectError::NotificationDeliveryFailure(format!(
                        "webhook returned {}",
                        response.status()
                    )));
                }
                Ok(())
            }
        }
    }
}

fn context_of<T: Serialize>(notice: &T) -> Result<Context, SideEffectError> {
    Context::from_serialize(notice).map_err(|error| {
        SideEffectError::NotificationDeliveryFailure(format!("notice context: {error}"))
    })
}

#[async_trait]
impl Notifier for MessageNotifier {
    async fn send_approval_request(
        &self,
        notice: &ApprovalRequestNotice,
    ) -> Result<(), SideEffectError> {
        let context = context_of(notice)?;
        let message =
            self.compose("approval_request", &notice.request_id.0, &notice.approver_email, &context)?;
        self.deliver(&message).await
    }

    async fn send_advance_notice(&self, notice: &AdvanceNotice) -> Result<(), SideEffectError> {
        let mut context = context_of(notice)?;
        context.insert("previous_level", &notice.request.level.saturating_sub(1));
        let request = &notice.request;

        let to_approver =
            self.compose("advance", &request.request_id.0, &request.approver_email, &context)?;
        let to_submitter =
            self.compose("progress", &request.request_id.0, &request.submitted_by, &context)?;

        self.deliver(&to_approver).await?;
        self.deliver(&to_submitter).await
    }

    async fn send_finalized_notice(&self, notice: &FinalizedNotice) -> Result<(), SideEffectError> {
        let context = context_of(notice)?;
        let message =
            self.compose("finalized", &notice.request_id.0, &notice.submitted_by, &context)?;
        self.deliver(&message).await
    }

    async fn send_rejected_notice(&self, notice: &RejectedNotice) -> Result<(), SideEffectError> {
        let context = context_of(notice)?;
        let message =
            self.compose("rejected", &notice.request_id.0, &notice.submitted_by, &context)?;
        self.deliver(&message).await
    }
}
