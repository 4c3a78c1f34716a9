// src/notify/manager.rs
//
// Routes incident payloads to channels. Console always receives; other
// channels only when the rule lists them. A per-rule cooldown (video time)
// suppresses repeated Confirmed notifications, and a Resolved payload goes
// out only if its Confirmed payload did.

use super::channels::{Channel, JsonlChannel, Notification, WebhookChannel};
use crate::incidents::{IncidentPayload, IncidentState};
use crate::recording::encode_jpeg;
use crate::rules::{Rule, RuleId};
use crate::types::Frame;
use anyhow::Result;
use base64::Engine;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, info, warn};

pub const WEBHOOK_URL_ENV: &str = "WATCHDOG_WEBHOOK_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Minimum video time between two Confirmed notifications of one rule
    pub cooldown_seconds: f64,
    /// Enables the `jsonl` channel
    pub jsonl_path: Option<String>,
    /// Enables the `webhook` channel; `WATCHDOG_WEBHOOK_URL` overrides it
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    pub attach_snapshot: bool,
    pub snapshot_quality: u8,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 60.0,
            jsonl_path: Some("output/notifications.jsonl".into()),
            webhook_url: None,
            webhook_timeout_secs: 10,
            attach_snapshot: true,
            snapshot_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: u32,
    pub failed: u32,
    pub suppressed: bool,
}

pub struct NotificationManager {
    config: NotifyConfig,
    channels: BTreeMap<&'static str, Channel>,
    routes: HashMap<RuleId, Vec<String>>,
    last_confirmed_ms: HashMap<RuleId, f64>,
    confirmed_sent: HashSet<String>,
}

impl NotificationManager {
    pub fn new(config: NotifyConfig, rules: &[Rule]) -> Result<Self> {
        let mut channels = BTreeMap::new();
        channels.insert("console", Channel::Console);
        if let Some(path) = &config.jsonl_path {
            channels.insert("jsonl", Channel::Jsonl(JsonlChannel::new(path)));
        }
        let webhook_url = std::env::var(WEBHOOK_URL_ENV)
            .ok()
            .or_else(|| config.webhook_url.clone());
        if let Some(url) = webhook_url {
            info!("Webhook notifications enabled: {}", url);
            channels.insert(
                "webhook",
                Channel::Webhook(WebhookChannel::new(url, config.webhook_timeout_secs)?),
            );
        }

        let mut routes = HashMap::new();
        for rule in rules {
            for name in &rule.notify_channels {
                if !channels.contains_key(name.as_str()) {
                    warn!(
                        "Rule {} routes to channel '{}' which is not configured",
                        rule.rule_id, name
                    );
                }
            }
            routes.insert(rule.rule_id.clone(), rule.notify_channels.clone());
        }

        Ok(Self {
            config,
            channels,
            routes,
            last_confirmed_ms: HashMap::new(),
            confirmed_sent: HashSet::new(),
        })
    }

    /// Cooldowns and Confirmed/Resolved pairing are per stream: video time
    /// and event ids both restart with each stream.
    pub fn begin_stream(&mut self, stream: &str) {
        debug!(
            "Notification state reset for stream {} ({} cooldown(s), {} unpaired)",
            stream,
            self.last_confirmed_ms.len(),
            self.confirmed_sent.len()
        );
        self.last_confirmed_ms.clear();
        self.confirmed_sent.clear();
    }

    /// Channel names this payload goes to, or `None` when it is suppressed.
    pub fn route(&mut self, payload: &IncidentPayload) -> Option<Vec<&'static str>> {
        match payload.state {
            IncidentState::Confirmed => {
                let now = payload.confirmed_ms.unwrap_or(payload.tentative_ms);
                let cooldown_ms = self.config.cooldown_seconds * 1000.0;
                if let Some(&last) = self.last_confirmed_ms.get(&payload.rule_id) {
                    if now >= last && now - last < cooldown_ms {
                        debug!(
                            "Notification for {} suppressed, rule {} notified {:.1}s ago",
                            payload.event_id,
                            payload.rule_id,
                            (now - last) / 1000.0
                        );
                        return None;
                    }
                }
                self.last_confirmed_ms.insert(payload.rule_id.clone(), now);
                self.confirmed_sent.insert(payload.event_id.clone());
            }
            IncidentState::Resolved => {
                if !self.confirmed_sent.remove(&payload.event_id) {
                    return None;
                }
            }
            IncidentState::Tentative => return None,
        }

        let wanted = self.routes.get(&payload.rule_id);
        Some(
            self.channels
                .keys()
                .copied()
                .filter(|name| {
                    *name == "console"
                        || wanted.is_some_and(|w| w.iter().any(|c| c.as_str() == *name))
                })
                .collect(),
        )
    }

    pub async fn dispatch(&mut self, payload: &IncidentPayload, snapshot: Option<&Frame>) -> DispatchReport {
        let Some(targets) = self.route(payload) else {
            return DispatchReport {
                suppressed: true,
                ..DispatchReport::default()
            };
        };

        let wants_snapshot = self.config.attach_snapshot
            && targets
                .iter()
                .any(|t| self.channels.get(t).is_some_and(Channel::wants_snapshot));
        let snapshot_base64 = match snapshot.filter(|f| wants_snapshot && f.has_pixels()) {
            Some(frame) => match encode_jpeg(frame, self.config.snapshot_quality) {
                Ok(jpeg) => Some(base64::engine::general_purpose::STANDARD.encode(jpeg)),
                Err(e) => {
                    warn!("Snapshot for {} not attached: {}", payload.event_id, e);
                    None
                }
            },
            None => None,
        };
        let notification = Notification::new(payload.clone(), snapshot_base64);

        let mut report = DispatchReport::default();
        for name in targets {
            let Some(channel) = self.channels.get(name) else {
                continue;
            };
            match channel.send(&notification).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    error!(
                        "Notification {} via {} failed: {:#}",
                        notification.delivery_id,
                        channel.name(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidents::model::ResolutionReason;
    use crate::rules::{RuleSet, Severity};

    fn rules() -> Vec<Rule> {
        RuleSet::from_yaml_str(
            r#"
rules:
  - rule_id: loud
    predicate: { type: class, labels: [person] }
    notify_channels: [jsonl, webhook]
  - rule_id: quiet
    predicate: { type: class, labels: [forklift] }
"#,
        )
        .unwrap()
        .into_rules()
    }

    fn payload(rule: &str, event: &str, state: IncidentState, at_ms: f64) -> IncidentPayload {
        IncidentPayload {
            event_id: event.into(),
            rule_id: rule.into(),
            description: "test".into(),
            severity: Severity::High,
            area: Some("dock".into()),
            track_ids: vec![1],
            state,
            snapshot_frame: None,
            tentative_ms: at_ms,
            confirmed_ms: Some(at_ms),
            resolved_ms: (state == IncidentState::Resolved).then_some(at_ms),
            resolution: (state == IncidentState::Resolved).then_some(ResolutionReason::Cooldown),
            peak_persistence: 15,
        }
    }

    fn manager(jsonl: Option<String>) -> NotificationManager {
        let cfg = NotifyConfig {
            cooldown_seconds: 10.0,
            jsonl_path: jsonl,
            ..NotifyConfig::default()
        };
        NotificationManager::new(cfg, &rules()).unwrap()
    }

    #[test]
    fn test_console_always_and_rule_routes() {
        let mut mgr = manager(Some("unused.jsonl".into()));
        assert_eq!(
            mgr.route(&payload("loud", "e1", IncidentState::Confirmed, 0.0)),
            Some(vec!["console", "jsonl"]),
            "webhook is listed but not configured"
        );
        assert_eq!(
            mgr.route(&payload("quiet", "e2", IncidentState::Confirmed, 0.0)),
            Some(vec!["console"])
        );
    }

    #[test]
    fn test_per_rule_cooldown_and_resolved_pairing() {
        let mut mgr = manager(None);
        assert!(mgr.route(&payload("loud", "e1", IncidentState::Confirmed, 1_000.0)).is_some());
        assert!(
            mgr.route(&payload("loud", "e2", IncidentState::Confirmed, 5_000.0)).is_none(),
            "within 10s of the previous confirmation"
        );
        assert!(mgr.route(&payload("quiet", "e3", IncidentState::Confirmed, 5_000.0)).is_some());
        assert!(mgr.route(&payload("loud", "e4", IncidentState::Confirmed, 12_000.0)).is_some());

        assert!(mgr.route(&payload("loud", "e2", IncidentState::Resolved, 13_000.0)).is_none());
        assert!(mgr.route(&payload("loud", "e1", IncidentState::Resolved, 13_000.0)).is_some());
        assert!(
            mgr.route(&payload("loud", "e1", IncidentState::Resolved, 14_000.0)).is_none(),
            "resolved goes out once"
        );
    }

    #[test]
    fn test_each_stream_starts_with_fresh_cooldowns() {
        let mut mgr = manager(None);
        assert!(mgr.route(&payload("loud", "evt-000001-loud-t1", IncidentState::Confirmed, 300_000.0)).is_some());

        mgr.begin_stream("second");
        assert_eq!(
            mgr.route(&payload("loud", "evt-000001-loud-t1", IncidentState::Resolved, 2_000.0)),
            None,
            "a reused event id from the previous stream is not paired"
        );
        assert!(
            mgr.route(&payload("loud", "evt-000001-loud-t1", IncidentState::Confirmed, 5_000.0)).is_some(),
            "video time restarted, nothing to cool down from"
        );
        assert!(mgr.route(&payload("loud", "evt-000002-loud-t4", IncidentState::Confirmed, 250_000.0)).is_some());
    }

    #[test]
    fn test_clock_going_backwards_is_not_suppressed() {
        let mut mgr = manager(None);
        assert!(mgr.route(&payload("loud", "e1", IncidentState::Confirmed, 300_000.0)).is_some());
        assert!(mgr.route(&payload("loud", "e2", IncidentState::Confirmed, 5_000.0)).is_some());
        assert!(
            mgr.route(&payload("loud", "e3", IncidentState::Confirmed, 8_000.0)).is_none(),
            "cooldown restarts from the new clock"
        );
    }

    #[tokio::test]
    async fn test_jsonl_channel_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.jsonl");
        let mut mgr = manager(Some(path.display().to_string()));

        let report = mgr
            .dispatch(&payload("loud", "e1", IncidentState::Confirmed, 0.0), None)
            .await;
        assert_eq!(report, DispatchReport { sent: 2, failed: 0, suppressed: false });
        mgr.dispatch(&payload("loud", "e1", IncidentState::Resolved, 500.0), None)
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["state"], "confirmed");
        assert_eq!(lines[1]["state"], "resolved");
        assert_eq!(lines[1]["resolution"], "cooldown");
        assert_ne!(lines[0]["delivery_id"], lines[1]["delivery_id"]);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_counted_not_raised() {
        let cfg = NotifyConfig {
            jsonl_path: None,
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            webhook_timeout_secs: 2,
            ..NotifyConfig::default()
        };
        let mut mgr = NotificationManager::new(cfg, &rules()).unwrap();
        if !mgr.channel_names().contains(&"webhook") || std::env::var(WEBHOOK_URL_ENV).is_ok() {
            return;
        }
        let frame = Frame::rgb(3, 0.0, 2, 2, vec![200; 12]);
        let report = mgr
            .dispatch(&payload("loud", "e1", IncidentState::Confirmed, 0.0), Some(&frame))
            .await;
        assert_eq!(report.sent, 1, "console still delivered");
        assert_eq!(report.failed, 1);
    }
}
