//! Orchestrator walkthrough with in-memory collaborators.
//!
//! Plays a few tracks in two groups, simulates the voice backend finishing
//! a track and prints every reply plus the final health report.
//!
//! Run with:
//! ```bash
//! cargo run -p core-service --example orchestrator_demo
//!
//! # JSON logs with session spans
//! cargo run -p core-service --example orchestrator_demo -- json
//! ```

use anyhow::Context;
use async_trait::async_trait;
use bridge_traits::{
    BackendEvent, ExtractError, Extractor, GroupId, JoinError, ResolvedMetadata, StreamHandle,
    VoiceBackend,
};
use core_playback::Requester;
use core_runtime::config::OrchestratorConfig;
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use core_service::Dispatcher;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

struct DemoExtractor;

#[async_trait]
impl Extractor for DemoExtractor {
    async fn extract(&self, source: &str) -> Result<ResolvedMetadata, ExtractError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        if source.contains("missing") {
            return Err(ExtractError::NotFound(source.to_string()));
        }
        let title = source.rsplit('/').next().unwrap_or(source).replace('-', " ");
        Ok(
            ResolvedMetadata::new(title, Duration::from_secs(200), StreamHandle::new(source))
                .with_uploader("Demo Uploader"),
        )
    }
}

struct DemoBackend;

#[async_trait]
impl VoiceBackend for DemoBackend {
    async fn join_and_stream(&self, group: GroupId, stream: &StreamHandle) -> Result<(), JoinError> {
        info!(group_id = %group, %stream, "Streaming");
        Ok(())
    }

    async fn pause(&self, group: GroupId) -> bridge_traits::error::Result<()> {
        info!(group_id = %group, "Paused stream");
        Ok(())
    }

    async fn resume(&self, group: GroupId) -> bridge_traits::error::Result<()> {
        info!(group_id = %group, "Resumed stream");
        Ok(())
    }

    async fn leave(&self, group: GroupId) -> bridge_traits::error::Result<()> {
        info!(group_id = %group, "Left voice chat");
        Ok(())
    }
}

fn print_reply(label: &str, reply: core_playback::Result<core_playback::Reply>) {
    match reply {
        Ok(reply) => println!("[{}] {}\n", label, reply),
        Err(err) => println!("[{}] error: {}\n", label, err),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = match env::args().nth(1).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };
    init_logging(
        LoggingConfig::default()
            .with_format(format)
            .with_level(LogLevel::Debug)
            .with_spans(true),
    )
    .context("failed to initialize logging")?;

    let config = OrchestratorConfig::builder()
        .max_queue_length(5)
        .command_cooldown(Duration::ZERO)
        .per_user_limit(3, Duration::from_secs(60))
        .build()
        .context("invalid orchestrator config")?;
    let dispatcher = Dispatcher::new(config, Arc::new(DemoExtractor), Arc::new(DemoBackend))?;

    let (backend_tx, backend_rx) = mpsc::channel(16);
    dispatcher.listen_backend(backend_rx);

    let lounge = GroupId::new(-1001);
    let study = GroupId::new(-1002);
    let alice = Requester::user(1);
    let bob = Requester::user(2);

    print_reply(
        "alice play",
        dispatcher
            .play(lounge, "https://video.example/first-song", alice)
            .await,
    );
    print_reply(
        "bob play",
        dispatcher
            .play(lounge, "https://video.example/second-song", bob)
            .await,
    );
    print_reply(
        "bob play",
        dispatcher
            .play(lounge, "https://video.example/missing-song", bob)
            .await,
    );
    print_reply(
        "study play",
        dispatcher
            .play(study, "https://video.example/focus-mix", alice)
            .await,
    );
    println!("[lounge queue]\n{}\n", dispatcher.queue(lounge).await);

    print_reply("alice pause", dispatcher.pause(lounge, alice).await);
    print_reply("alice resume", dispatcher.resume(lounge, alice).await);
    print_reply("alice pause (rate limited)", dispatcher.pause(lounge, alice).await);

    backend_tx
        .send(BackendEvent::TrackEnded { group_id: lounge })
        .await
        .context("backend pump stopped")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("[lounge queue after track end]\n{}\n", dispatcher.queue(lounge).await);

    print_reply("bob stop", dispatcher.stop(lounge, bob).await);

    let report = dispatcher.run_maintenance().await;
    println!("[maintenance] {:?}\n", report);
    println!(
        "[health]\n{}",
        serde_json::to_string_pretty(&dispatcher.health())?
    );

    dispatcher.shutdown().await;
    Ok(())
}
