// src/main.rs

mod config;
mod detection;
mod error;
mod geometry;
mod incidents;
mod notify;
mod pipeline;
mod recording;
mod rules;
mod tracking;
mod types;

use anyhow::{Context, Result};
use detection::replay::{find_streams, ReplayReader};
use detection::latest_slot;
use notify::NotificationManager;
use pipeline::{Pipeline, PipelineEvent, PipelineMetrics};
use recording::{FsClipSink, ShutdownMode};
use rules::RuleSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};
use types::{Config, Frame};

#[derive(Debug, Default)]
struct StreamStats {
    frames: u64,
    detection_cycles: u64,
    confirmed: usize,
    resolved: usize,
    clips_written: usize,
    recording_failures: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::path_from_env();
    let (config, config_note) = if Path::new(&config_path).exists() {
        (Config::load(&config_path)?, format!("loaded from {}", config_path))
    } else {
        (Config::default(), format!("{} not found, using defaults", config_path))
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("site_watchdog={}", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🦺 Site watchdog starting");
    info!("✓ Configuration {}", config_note);

    let rule_set = RuleSet::load(&config.io.rules_path)
        .with_context(|| format!("Rule document {} rejected", config.io.rules_path))?;
    info!("✓ {} rule(s) active", rule_set.len());
    for rule in rule_set.rules() {
        info!(
            "  rule {} [{}] tentative={} confirm={} cooldown={} record={}",
            rule.rule_id,
            rule.severity.as_str(),
            rule.thresholds.tentative_frames,
            rule.thresholds.confirm_frames,
            rule.thresholds.resolve_cooldown_frames,
            rule.record
        );
    }

    let streams = find_streams(&config.io.input_dir)?;
    if streams.is_empty() {
        error!("No detection streams found in {}", config.io.input_dir);
        return Ok(());
    }

    let mut notifier = NotificationManager::new(config.notify.clone(), rule_set.rules())?;
    info!("✓ Notification channels: {:?}", notifier.channel_names());

    let mut incident_log = open_incident_log(&config.io.incident_log)?;
    let metrics = PipelineMetrics::new();

    for (idx, path) in streams.iter().enumerate() {
        info!("========================================");
        info!("Stream {}/{}: {}", idx + 1, streams.len(), path.display());
        info!("========================================");

        let stats = process_stream(
            path,
            &config,
            &rule_set,
            &mut notifier,
            &metrics,
            &mut incident_log,
        )
        .await
        .with_context(|| format!("Stream {} aborted", path.display()))?;

        info!("✓ Stream finished");
        info!("  Frames: {} ({} detection cycles)", stats.frames, stats.detection_cycles);
        info!("  Incidents confirmed: {}, resolved: {}", stats.confirmed, stats.resolved);
        info!(
            "  Clips written: {}, recording failures: {}",
            stats.clips_written, stats.recording_failures
        );
    }

    incident_log.flush()?;
    let summary = metrics.summary();
    info!(
        "📊 Run summary: {}",
        serde_json::to_string_pretty(&summary).unwrap_or_default()
    );
    Ok(())
}

async fn process_stream(
    path: &Path,
    config: &Config,
    rule_set: &RuleSet,
    notifier: &mut NotificationManager,
    metrics: &PipelineMetrics,
    incident_log: &mut BufWriter<File>,
) -> Result<StreamStats> {
    let stream_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("stream")
        .to_string();
    notifier.begin_stream(&stream_name);
    let (publisher, reader) = latest_slot(config.detection.max_staleness_frames);
    let sink = FsClipSink::new(
        Path::new(&config.recorder.output_dir).join(&stream_name),
        config.recorder.jpeg_quality,
    );
    let mut pipeline = Pipeline::new(
        config,
        rule_set.rules().to_vec(),
        reader,
        Some(Box::new(sink)),
        metrics.clone(),
    )?;

    let every_n = config.detection.detect_every_n_frames.max(1);
    let mut stats = StreamStats::default();

    for record in ReplayReader::open(path)? {
        let record = record?;
        let frame = Frame::metadata_only(record.frame_index, record.timestamp_ms);
        if record.frame_index % every_n == 0 {
            if let Some(batch) = record.into_batch() {
                stats.detection_cycles += 1;
                publisher.publish(batch);
            }
        }

        let summary = pipeline.process_frame(frame)?;
        stats.frames += 1;
        stats.confirmed += summary.confirmed;
        stats.resolved += summary.resolved;

        let events = pipeline.drain_events();
        dispatch_events(events, notifier, metrics).await;
    }

    let mode = if config.pipeline.flush_on_shutdown {
        ShutdownMode::Flush
    } else {
        ShutdownMode::Discard
    };
    pipeline.shutdown(mode);
    let events = pipeline.drain_events();
    dispatch_events(events, notifier, metrics).await;

    for entry in pipeline.lifecycle().evidence() {
        match entry.evidence {
            incidents::Evidence::ClipWritten { .. } => stats.clips_written += 1,
            incidents::Evidence::RecordingFailed { .. } => stats.recording_failures += 1,
            incidents::Evidence::RecordingDiscarded => {}
        }
    }
    write_incident_log(incident_log, &stream_name, &pipeline)?;
    Ok(stats)
}

async fn dispatch_events(
    events: Vec<PipelineEvent>,
    notifier: &mut NotificationManager,
    metrics: &PipelineMetrics,
) {
    for event in events {
        debug!("Bus event: {}", event.kind());
        let report = match &event {
            PipelineEvent::IncidentConfirmed {
                payload,
                snapshot,
                clip_start,
                truncated,
            } => {
                if let Some(start) = clip_start {
                    debug!(
                        "Incident {} recording from frame {}{}",
                        payload.event_id,
                        start,
                        if *truncated { " (truncated)" } else { "" }
                    );
                }
                Some(notifier.dispatch(payload, snapshot.as_deref()).await)
            }
            PipelineEvent::IncidentResolved { payload } => {
                Some(notifier.dispatch(payload, None).await)
            }
            PipelineEvent::ClipWritten {
                event_id,
                location,
                frames,
                truncated,
            } => {
                info!(
                    "🎞️ Clip for {}: {} frames at {}{}",
                    event_id,
                    frames,
                    location,
                    if *truncated { " (truncated)" } else { "" }
                );
                None
            }
            PipelineEvent::RecordingFailed {
                event_id,
                attempts,
                reason,
            } => {
                warn!(
                    "Recording for {} failed after {} attempt(s): {}",
                    event_id, attempts, reason
                );
                None
            }
            PipelineEvent::RecordingDiscarded { event_id } => {
                info!("Recording for {} discarded", event_id);
                None
            }
            PipelineEvent::StaleDetections {
                batch_frame,
                frame_index,
                staleness,
            } => {
                warn!(
                    "Frame {}: detection batch from frame {} dropped, {} frames stale",
                    frame_index, batch_frame, staleness
                );
                None
            }
        };

        if let Some(report) = report {
            metrics.add(&metrics.notifications_sent, report.sent as u64);
            metrics.add(&metrics.notifications_failed, report.failed as u64);
            if report.suppressed {
                metrics.inc(&metrics.notifications_suppressed);
            }
        }
    }
}

fn open_incident_log(path: &str) -> Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open incident log {}", path))?;
    info!("✓ Incident log: {}", path);
    Ok(BufWriter::new(file))
}

/// One JSON line per transition, evidence fact and incident of the stream.
fn write_incident_log(out: &mut BufWriter<File>, stream: &str, pipeline: &Pipeline) -> Result<()> {
    let lifecycle = pipeline.lifecycle();
    for t in lifecycle.transitions() {
        let line = serde_json::json!({ "stream": stream, "record": "transition", "transition": t });
        writeln!(out, "{}", line)?;
    }
    for e in lifecycle.evidence() {
        let line = serde_json::json!({ "stream": stream, "record": "evidence", "evidence": e });
        writeln!(out, "{}", line)?;
    }
    for incident in lifecycle
        .closed_incidents()
        .iter()
        .chain(lifecycle.open_incidents())
    {
        let line = serde_json::json!({ "stream": stream, "record": "incident", "incident": incident });
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}
