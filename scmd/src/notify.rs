//! Analysis completion notifications.

use scm_common::config::NotifySection;
use scm_common::types::AnalysisOutcome;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives the final outcome of every analysis job.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, key: &str, outcome: AnalysisOutcome);
}

/// Writes outcomes to the daemon log.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, key: &str, outcome: AnalysisOutcome) {
        info!(key, %outcome, "Analysis finished");
    }
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    key: &'a str,
    outcome: AnalysisOutcome,
}

/// POSTs `{"key": ..., "outcome": ...}` to a webhook. Delivery failures
/// are logged and dropped.
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url: url.into(),
            agent,
        }
    }

    fn deliver(&self, key: &str, outcome: AnalysisOutcome) -> anyhow::Result<()> {
        let body = serde_json::to_string(&Notification { key, outcome })?;
        self.agent
            .post(&self.url)
            .header("Content-Type", "application/json")
            .send(body)?;
        Ok(())
    }
}

impl NotificationSink for WebhookNotifier {
    fn notify(&self, key: &str, outcome: AnalysisOutcome) {
        match self.deliver(key, outcome) {
            Ok(()) => debug!(key, %outcome, url = %self.url, "Delivered analysis notification"),
            Err(e) => warn!(key, %outcome, url = %self.url, error = %e, "Analysis notification failed"),
        }
        LogNotifier.notify(key, outcome);
    }
}

/// Webhook sink when a URL is configured, otherwise the log.
pub fn build_notifier(config: &NotifySection) -> Arc<dyn NotificationSink> {
    match config.webhook_url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => {
            info!(url, timeout_secs = config.timeout_secs, "Analysis notifications go to webhook");
            Arc::new(WebhookNotifier::new(
                url,
                Duration::from_secs(config.timeout_secs.max(1)),
            ))
        }
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    /// Collects notifications for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        seen: Mutex<Vec<(String, AnalysisOutcome)>>,
    }

    impl RecordingNotifier {
        pub fn seen(&self) -> Vec<(String, AnalysisOutcome)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl NotificationSink for RecordingNotifier {
        fn notify(&self, key: &str, outcome: AnalysisOutcome) {
            self.seen.lock().unwrap().push((key.to_string(), outcome));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    #[test]
    fn test_notification_body() {
        let body = serde_json::to_string(&Notification {
            key: "job-1",
            outcome: AnalysisOutcome::Cancelled,
        })
        .unwrap();
        assert_eq!(body, r#"{"key":"job-1","outcome":"cancelled"}"#);
    }

    #[test]
    fn test_webhook_posts_outcome() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hooks/analysis", listener.local_addr().unwrap());

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();

            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header.trim().is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            let mut stream = stream;
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
            (request_line, String::from_utf8(body).unwrap())
        });

        let notifier = WebhookNotifier::new(url, Duration::from_secs(5));
        notifier.deliver("job-7", AnalysisOutcome::Completed).unwrap();

        let (request_line, body) = server.join().unwrap();
        assert!(request_line.starts_with("POST /hooks/analysis"));
        assert_eq!(body, r#"{"key":"job-7","outcome":"completed"}"#);
    }

    #[test]
    fn test_unreachable_webhook_is_not_fatal() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/unreachable", Duration::from_secs(1));
        notifier.notify("job-1", AnalysisOutcome::Error);
        assert!(notifier.deliver("job-1", AnalysisOutcome::Error).is_err());
    }

    #[test]
    fn test_build_notifier_defaults_to_log() {
        let section = NotifySection::default();
        let sink = build_notifier(&section);
        sink.notify("job-1", AnalysisOutcome::Completed);
    }
}
