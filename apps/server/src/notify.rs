use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

const RESEND_URL: &str = "https://api.resend.com/emails";

/// Name used when a customer never told us theirs.
pub const DEFAULT_CUSTOMER_NAME: &str = "Valued Customer";

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub to: String,
    pub customer_name: String,
    pub booking_id: i64,
    pub service_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub amount_paid: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancellationNotice {
    pub to: String,
    pub customer_name: String,
    pub service_name: String,
    pub date: NaiveDate,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl From<&PaymentReceipt> for OutgoingEmail {
    fn from(r: &PaymentReceipt) -> Self {
        Self {
            to: r.to.clone(),
            subject: format!("Booking confirmed: {} on {}", r.service_name, r.date),
            text: format!(
                "Hi {},\n\n\
                 Thank you for your payment. Your appointment is confirmed.\n\n\
                 Service: {}\n\
                 Date: {}\n\
                 Time: {}\n\
                 Amount paid: ${:.2}\n\
                 Booking reference: #{}\n\n\
                 We look forward to seeing you.",
                r.customer_name, r.service_name, r.date, r.time, r.amount_paid, r.booking_id
            ),
        }
    }
}

impl From<&CancellationNotice> for OutgoingEmail {
    fn from(n: &CancellationNotice) -> Self {
        Self {
            to: n.to.clone(),
            subject: format!("Booking cancelled: {} on {}", n.service_name, n.date),
            text: format!(
                "Hi {},\n\n\
                 Your appointment for {} on {} at {} has been cancelled.\n\n\
                 If this was a mistake, you are welcome to book again any time.",
                n.customer_name, n.service_name, n.date, n.time
            ),
        }
    }
}

/// Outbound customer and staff e-mail.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_payment_receipt(&self, receipt: &PaymentReceipt) -> anyhow::Result<()> {
        self.send_message(&OutgoingEmail::from(receipt)).await
    }

    async fn send_cancellation_notice(&self, notice: &CancellationNotice) -> anyhow::Result<()> {
        self.send_message(&OutgoingEmail::from(notice)).await
    }

    async fn send_message(&self, email: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Plain-text e-mail through the Resend HTTP API.
///
/// Failures are returned, never logged here: the error-alert layer sends
/// through this client and must not feed back into itself.
#[derive(Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, api_key, from })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl Notifier for ResendMailer {
    async fn send_message(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        if !self.is_configured() {
            anyhow::bail!("e-mail is not configured");
        }

        let resp = self
            .http
            .post(RESEND_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [email.to],
                "subject": email.subject,
                "text": email.text,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Resend API error: {} - {}", status, text);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_email_text() {
        let email = OutgoingEmail::from(&PaymentReceipt {
            to: "ana@example.com".into(),
            customer_name: DEFAULT_CUSTOMER_NAME.into(),
            booking_id: 12,
            service_name: "Classic Fill".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            time: "9:00 AM".into(),
            amount_paid: 65.0,
        });
        assert_eq!(email.subject, "Booking confirmed: Classic Fill on 2026-03-02");
        assert!(email.text.starts_with("Hi Valued Customer,"));
        assert!(email.text.contains("Amount paid: $65.00"));
        assert!(email.text.contains("#12"));
    }

    #[test]
    fn test_cancellation_email_text() {
        let email = OutgoingEmail::from(&CancellationNotice {
            to: "ana@example.com".into(),
            customer_name: "Ana".into(),
            service_name: "Brow Lamination".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            time: "1:00 PM".into(),
        });
        assert!(email.text.contains("Brow Lamination on 2026-03-02 at 1:00 PM"));
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_refuses() {
        let mailer = ResendMailer::new(String::new(), "studio@example.com".into()).unwrap();
        let err = mailer
            .send_message(&OutgoingEmail {
                to: "a@b.c".into(),
                subject: "s".into(),
                text: "t".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
