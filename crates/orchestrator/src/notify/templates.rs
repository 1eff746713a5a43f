//! Reminder and escalation email templates.

use chrono::{DateTime, Utc};

use dirsubmit_core::NotificationType;

use super::{OutboundEmail, Urgency};

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub to: String,
    pub recipient_name: Option<String>,
    pub directory_name: String,
    pub deadline: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub instructions: Option<String>,
    pub action_url: Option<String>,
}

pub fn urgency_for(notification_type: NotificationType) -> Urgency {
    match notification_type {
        NotificationType::Day2 => Urgency::Normal,
        NotificationType::Day5 => Urgency::High,
        NotificationType::FinalWarning | NotificationType::SubmissionBlocked => Urgency::Urgent,
    }
}

pub fn render(notification_type: NotificationType, ctx: &TemplateContext) -> OutboundEmail {
    let directory = &ctx.directory_name;
    let days = ctx.days_remaining.unwrap_or_default();

    let subject = match notification_type {
        NotificationType::Day2 => format!("Action needed: finish your {directory} listing"),
        NotificationType::Day5 => {
            format!("Reminder: {days} days left to finish your {directory} listing")
        }
        NotificationType::FinalWarning => {
            format!("Final warning: your {directory} listing expires in {days} days")
        }
        NotificationType::SubmissionBlocked => {
            format!("Your {directory} submission was blocked")
        }
    };

    let greeting = match &ctx.recipient_name {
        Some(name) => format!("Hi {name},"),
        None => "Hi,".to_string(),
    };

    let mut body = vec![greeting, String::new()];
    match notification_type {
        NotificationType::SubmissionBlocked => {
            body.push(format!(
                "The deadline to complete your {directory} submission has passed, so it has been blocked."
            ));
            body.push("Contact support if you still want to be listed.".to_string());
        }
        _ => {
            body.push(format!(
                "Your {directory} submission is waiting on you. {days} days remain."
            ));
            if let Some(deadline) = ctx.deadline {
                body.push(format!("Deadline: {}", deadline.format("%Y-%m-%d %H:%M UTC")));
            }
            if let Some(instructions) = &ctx.instructions {
                body.push(String::new());
                body.push(instructions.clone());
            }
            if let Some(url) = &ctx.action_url {
                body.push(format!("Start here: {url}"));
            }
        }
    }

    OutboundEmail {
        to: ctx.to.clone(),
        subject,
        body: body.join("\n"),
        urgency: urgency_for(notification_type),
    }
}
