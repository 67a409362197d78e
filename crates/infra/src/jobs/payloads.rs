//! Typed job payloads.

use serde::{Deserialize, Serialize};

use pantry_core::{ClientId, UserId};

use crate::external::EmailMessage;

/// Transactional email templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum EmailTemplate {
    PasswordReset { reset_url: String },
    EmailVerification { verify_url: String },
    Welcome { display_name: String },
    NewFollower { follower_name: String },
}

impl EmailTemplate {
    /// Subject line and plain-text body.
    pub fn render(&self) -> (String, String) {
        match self {
            EmailTemplate::PasswordReset { reset_url } => (
                "Reset your password".to_string(),
                format!(
                    "Someone asked to reset the password on your account.\n\n\
                     Follow this link to choose a new one: {reset_url}\n\n\
                     If it wasn't you, you can ignore this email."
                ),
            ),
            EmailTemplate::EmailVerification { verify_url } => (
                "Confirm your email address".to_string(),
                format!("Confirm your address to start saving recipes: {verify_url}"),
            ),
            EmailTemplate::Welcome { display_name } => (
                "Welcome to Pantry".to_string(),
                format!("Hi {display_name}, your kitchen is ready. Start by saving a recipe you love."),
            ),
            EmailTemplate::NewFollower { follower_name } => (
                format!("{follower_name} started following you"),
                format!("{follower_name} will now see the recipes you share."),
            ),
        }
    }
}

/// Payload of a `send-email` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    /// Recipient account, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(flatten)]
    pub template: EmailTemplate,
}

impl EmailJob {
    pub fn to_message(&self) -> EmailMessage {
        let (subject, body) = self.template.render();
        EmailMessage {
            to: self.to.clone(),
            subject,
            body,
        }
    }
}

/// Payload of a `generate-recipes` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeGenerationJob {
    pub user_id: UserId,
    /// SSE registration the result is pushed to
    pub client_id: ClientId,
    pub image_base64: String,
    pub mime_type: String,
}
