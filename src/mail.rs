use anyhow::Context;
use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::MailConfig;

/// Transactional email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct OutgoingMail<'a> {
    from: String,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Posts mail as JSON to an HTTP mail API.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(url: String, api_key: Option<String>, from: &str, from_name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            from: format!("{from_name} <{from}>"),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let mut req = self.client.post(&self.url).json(&OutgoingMail {
            from: self.from.clone(),
            to,
            subject,
            html,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .context("mail api request")?
            .error_for_status()
            .context("mail api response")?;
        debug!(to, subject, "mail sent");
        Ok(())
    }
}

/// Used when no mail API is configured; writes the envelope to the log only.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> anyhow::Result<()> {
        info!(to, subject, "mail api not configured; message dropped");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> Box<dyn Mailer> {
    match &cfg.api_url {
        Some(url) => Box::new(HttpMailer::new(
            url.clone(),
            cfg.api_key.clone(),
            &cfg.from,
            &cfg.from_name,
        )),
        None => Box::new(LogMailer),
    }
}

const OTP_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; background: #f5f8ff; padding: 20px;">
  <div style="max-width: 600px; margin: 0 auto; background: #fff; border-radius: 12px; padding: 30px;">
    <h2 style="color: #0062cc;">{{brand}} login verification code</h2>
    <p>Use the following code to complete your login:</p>
    <div style="font-size: 36px; font-weight: bold; letter-spacing: 8px; text-align: center; padding: 20px; border: 2px dashed #1e88e5;">{{otp}}</div>
    <p>This code expires in 5 minutes.</p>
    <p style="color: #856404;">If you did not try to log in, ignore this email.</p>
  </div>
</body>
</html>"#;

const RESET_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; background: #f5f8ff; padding: 20px;">
  <div style="max-width: 600px; margin: 0 auto; background: #fff; border-radius: 12px; padding: 30px;">
    <h2 style="color: #0062cc;">{{brand}} password reset</h2>
    <p>Hello {{user_name}},</p>
    <p>Follow the link below to choose a new password. The link is valid for one hour.</p>
    <p style="text-align: center;"><a href="{{reset_url}}" style="background: #0062cc; color: #fff; padding: 12px 24px; border-radius: 8px; text-decoration: none;">Reset password</a></p>
    <p style="color: #856404;">If you did not ask for a reset, ignore this email.</p>
  </div>
</body>
</html>"#;

const OTP: &str = "otp";
const RESET: &str = "reset";

/// Registry of the HTML mail bodies. `{{var}}` output is HTML-escaped.
pub struct MailTemplates {
    registry: Handlebars<'static>,
}

impl MailTemplates {
    pub fn new() -> anyhow::Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(OTP, OTP_TEMPLATE)
            .context("register otp mail template")?;
        registry
            .register_template_string(RESET, RESET_TEMPLATE)
            .context("register reset mail template")?;
        Ok(Self { registry })
    }

    pub fn otp_email(&self, brand: &str, otp: &str) -> anyhow::Result<String> {
        self.registry
            .render(OTP, &json!({ "brand": brand, "otp": otp }))
            .context("render otp mail")
    }

    pub fn reset_email(&self, brand: &str, reset_url: &str, user_name: &str) -> anyhow::Result<String> {
        let user_name = if user_name.trim().is_empty() { "User" } else { user_name };
        self.registry
            .render(
                RESET,
                &json!({ "brand": brand, "user_name": user_name, "reset_url": reset_url }),
            )
            .context("render reset mail")
    }
}
