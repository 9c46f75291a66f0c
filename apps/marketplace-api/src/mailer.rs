//! Outbound mail collaborator
//!
//! Delivery is outside this service; only the interface and a logging
//! implementation live here. Message bodies carry live secrets and are never
//! logged.

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn email_verification(to: &str, link: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Confirm your email address".to_string(),
            body: format!(
                "Welcome! Confirm your email address by opening this link:\n\n{}\n",
                link
            ),
        }
    }

    pub fn password_reset(to: &str, link: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body: format!(
                "A password reset was requested for your account. \
                 If it was you, open this link:\n\n{}\n\n\
                 Otherwise you can ignore this message.\n",
                link
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> anyhow::Result<()>;
}

/// Records that a message would have been sent
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, "Mail queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_are_in_bodies() {
        let mail = Mail::password_reset("a@x.com", "https://m.example/reset-password?token=t");
        assert_eq!(mail.to, "a@x.com");
        assert!(mail.body.contains("reset-password?token=t"));

        let mail = Mail::email_verification("a@x.com", "https://m.example/verify-email?token=v");
        assert!(mail.body.contains("verify-email?token=v"));
    }

    #[test]
    fn test_log_mailer_accepts_everything() {
        let mail = Mail::email_verification("a@x.com", "link");
        assert!(tokio_test::block_on(LogMailer.send(mail)).is_ok());
    }
}
