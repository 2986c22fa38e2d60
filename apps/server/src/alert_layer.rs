//! Tracing layer that e-mails ERROR events to the studio admin.
//!
//! - at most one message per `MIN_INTERVAL` (10 s)
//! - identical messages are suppressed for `DEDUP_WINDOW` (60 s)
//! - sends are spawned onto the Tokio runtime, never awaited inline

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::notify::{Notifier, OutgoingEmail, ResendMailer};

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Rate limit plus dedup bookkeeping.
struct Throttle {
    last_sent: Option<Instant>,
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    /// Record and allow `hash` at `now` unless it is a duplicate or too soon.
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, ts)| now.saturating_duration_since(*ts) < DEDUP_WINDOW);

        let is_dup = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.saturating_duration_since(last) < MIN_INTERVAL);
        if is_dup || too_soon {
            return false;
        }

        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

pub struct EmailAlertLayer {
    mailer: Arc<ResendMailer>,
    to: String,
    throttle: Mutex<Throttle>,
}

impl EmailAlertLayer {
    pub fn new(mailer: ResendMailer, to: String) -> Self {
        Self {
            mailer: Arc::new(mailer),
            to,
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

fn message_hash(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

impl<S: Subscriber> Layer<S> for EmailAlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }
        // Spawning needs a runtime; errors logged outside one are console-only.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let mut text = ErrorText::default();
        event.record(&mut text);
        let message = text.into_string();

        let admitted = match self.throttle.lock() {
            Ok(mut throttle) => throttle.admit(message_hash(&message), Instant::now()),
            Err(_) => false,
        };
        if !admitted {
            return;
        }

        let meta = event.metadata();
        let location = format!(
            "{} ({}:{})",
            meta.target(),
            meta.file().unwrap_or("?"),
            meta.line().map(|l| l.to_string()).unwrap_or_else(|| "?".into())
        );
        let email = OutgoingEmail {
            to: self.to.clone(),
            subject: format!("[studio] Server error: {}", truncate(&message, 80)),
            text: format!(
                "{message}\n\nat {location}\n{}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ),
        };

        let mailer = Arc::clone(&self.mailer);
        runtime.spawn(async move {
            let _ = mailer.send_message(&email).await;
        });
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Renders an event as `message key=value key=value`.
#[derive(Default)]
struct ErrorText {
    message: String,
    context: String,
}

impl ErrorText {
    fn push(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        use std::fmt::Write;
        if name == "message" {
            let _ = self.message.write_fmt(value);
        } else {
            let _ = write!(self.context, " {name}={value}");
        }
    }

    fn into_string(self) -> String {
        let mut text = self.message;
        text.push_str(&self.context);
        text.trim_start().to_string()
    }
}

impl Visit for ErrorText {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field.name(), format_args!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field.name(), format_args!("{value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_allowed() {
        let mut t = Throttle::new();
        assert!(t.admit(111, Instant::now()));
    }

    #[test]
    fn test_rate_limit_suppresses_second() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(111, now));
        assert!(!t.admit(222, now + Duration::from_secs(3)));
    }

    #[test]
    fn test_dedup_same_message_after_interval() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(111, now));
        assert!(!t.admit(111, now + MIN_INTERVAL));
        assert!(t.admit(222, now + MIN_INTERVAL));
    }

    #[test]
    fn test_dedup_expires_after_window() {
        let mut t = Throttle::new();
        let now = Instant::now();
        assert!(t.admit(111, now));
        assert!(t.admit(111, now + DEDUP_WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn test_error_text_appends_fields() {
        let mut text = ErrorText::default();
        text.push("message", format_args!("Checkout failed"));
        text.push("booking_id", format_args!("{}", 42));
        assert_eq!(text.into_string(), "Checkout failed booking_id=42");

        let mut bare = ErrorText::default();
        bare.push("error", format_args!("timeout"));
        assert_eq!(bare.into_string(), "error=timeout");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("short", 80), "short");
        assert_eq!(truncate("ééééé", 3), "ééé...");
    }

    #[test]
    fn test_events_outside_runtime_are_ignored() {
        use tracing_subscriber::layer::SubscriberExt;

        let mailer = ResendMailer::new(String::new(), "studio@example.com".into()).unwrap();
        let layer = EmailAlertLayer::new(mailer, "admin@example.com".into());
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("no runtime here");
        });
    }
}
