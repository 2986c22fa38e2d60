use anyhow::Context;

use crate::hours::{BusinessHours, DayConfig};

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub session_secret: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// Public storefront origin, used for checkout redirects and CORS.
    pub site_url: Option<url::Url>,
    pub currency: String,
    pub resend_api_key: String,
    pub email_from: String,
    pub admin_email: Option<String>,
    pub business_hours: BusinessHours,
}

const DEFAULT_SITE_URL: &str = "http://localhost:3000/";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let session_secret = var("SESSION_SECRET").context("SESSION_SECRET must be set")?;

        let port = match var("PORT") {
            Some(p) => p.parse().with_context(|| format!("PORT must be a number, got {p:?}"))?,
            None => 3000,
        };

        let site_url = var("SITE_URL")
            .map(|raw| {
                // A trailing slash keeps Url::join relative to the whole path.
                let raw = if raw.ends_with('/') { raw } else { format!("{raw}/") };
                url::Url::parse(&raw).with_context(|| format!("SITE_URL is not a valid URL: {raw}"))
            })
            .transpose()?;

        let business_hours = match var("BUSINESS_HOURS") {
            Some(json) => {
                let days: [DayConfig; 7] = serde_json::from_str(&json)
                    .context("BUSINESS_HOURS must be a JSON array of seven days, Sunday first")?;
                BusinessHours::from_config(&days).context("BUSINESS_HOURS has an invalid time")?
            }
            None => BusinessHours::default(),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:studio.db?mode=rwc".into()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            session_secret,
            stripe_secret_key: var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            site_url,
            currency: var("CURRENCY")
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or_else(|| "usd".into()),
            resend_api_key: var("RESEND_API_KEY").unwrap_or_default(),
            email_from: var("EMAIL_FROM").unwrap_or_else(|| "Studio <bookings@example.com>".into()),
            admin_email: var("ADMIN_EMAIL"),
            business_hours,
        })
    }

    /// Checkout redirect base; falls back to a local storefront.
    pub fn storefront_url(&self) -> anyhow::Result<url::Url> {
        match &self.site_url {
            Some(url) => Ok(url.clone()),
            None => Ok(url::Url::parse(DEFAULT_SITE_URL)?),
        }
    }

    /// Warn about optional integrations that are switched off.
    pub fn log_missing_integrations(&self) {
        if self.stripe_secret_key.is_empty() {
            tracing::warn!("STRIPE_SECRET_KEY not set, checkout will fail");
        }
        if self.stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, payment webhooks will be rejected");
        }
        if self.resend_api_key.is_empty() {
            tracing::warn!("RESEND_API_KEY not set, e-mails will not be sent");
        }
        if self.site_url.is_none() {
            tracing::warn!("SITE_URL not set, using {} and allowing any CORS origin", DEFAULT_SITE_URL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("SESSION_SECRET", "s")]).unwrap();
        assert_eq!(c.database_url, "sqlite:studio.db?mode=rwc");
        assert_eq!(c.port, 3000);
        assert_eq!(c.currency, "usd");
        assert!(c.site_url.is_none());
        assert!(c.admin_email.is_none());
        assert_eq!(c.storefront_url().unwrap().as_str(), DEFAULT_SITE_URL);
    }

    #[test]
    fn test_session_secret_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("SESSION_SECRET", "  ")]).is_err());
    }

    #[test]
    fn test_bad_port_rejected() {
        assert!(config(&[("SESSION_SECRET", "s"), ("PORT", "eighty")]).is_err());
    }

    #[test]
    fn test_site_url_gets_trailing_slash() {
        let c = config(&[("SESSION_SECRET", "s"), ("SITE_URL", "https://studio.example.com/app")])
            .unwrap();
        assert_eq!(
            c.site_url.unwrap().join("booking/success").unwrap().as_str(),
            "https://studio.example.com/app/booking/success"
        );
    }

    #[test]
    fn test_business_hours_override() {
        let week = r#"[
            {"is_open": true,  "open_time": "10:00", "close_time": "14:00"},
            {"is_open": false, "open_time": "", "close_time": ""},
            {"is_open": false, "open_time": "", "close_time": ""},
            {"is_open": false, "open_time": "", "close_time": ""},
            {"is_open": false, "open_time": "", "close_time": ""},
            {"is_open": false, "open_time": "", "close_time": ""},
            {"is_open": false, "open_time": "", "close_time": ""}
        ]"#;
        let c = config(&[("SESSION_SECRET", "s"), ("BUSINESS_HOURS", week)]).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(c.business_hours.is_open_on(sunday));
        assert!(!c.business_hours.is_open_on(sunday.succ_opt().unwrap()));
    }

    #[test]
    fn test_business_hours_must_have_seven_days() {
        let short = r#"[{"is_open": true, "open_time": "10:00", "close_time": "14:00"}]"#;
        assert!(config(&[("SESSION_SECRET", "s"), ("BUSINESS_HOURS", short)]).is_err());
    }
}
