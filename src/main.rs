//! shmvo: publish a test-pattern video stream into shared memory
//!
//! Usage: `shmvo [config.toml]`

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shmvo::capture::{Frame, TestPattern, VideoParams};
use shmvo::{Config, ShmOutput};

/// What the source task hands to the output, in order
enum SourceEvent {
    Reconfig(VideoParams),
    Frame(Frame),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("shmvo launching...");

    let mut source = TestPattern::new(config.source.clone())?;
    let mut output = ShmOutput::preinit(&config.output);

    let params = source.params();
    if !output.query_support(params.format) {
        return Err(eyre!("output cannot carry {:?} frames", params.format));
    }

    // Set up tx/rx
    let (tx, rx) = flume::bounded::<SourceEvent>(4);
    let limit = config.source.frames;

    // Spawn source task
    let producer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(source.interval());
        if tx.send_async(SourceEvent::Reconfig(params)).await.is_err() {
            return;
        }

        let mut produced = 0u64;
        while limit.map_or(true, |n| produced < n) {
            ticker.tick().await;
            match source.next_frame() {
                Ok(frame) => {
                    if let Err(e) = tx.send_async(SourceEvent::Frame(frame)).await {
                        error!("Failed to send frame: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    error!("Source error: {}", e);
                    break;
                }
            }
            produced += 1;
        }
        info!("Source finished after {} frames", produced);
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = rx.recv_async() => match event {
                Ok(SourceEvent::Reconfig(params)) => output.reconfig(params)?,
                Ok(SourceEvent::Frame(mut frame)) => {
                    output.draw_frame(Some(&mut frame));
                    output.flip_page();
                }
                // Source task is done and the channel is drained
                Err(_) => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    producer.abort();
    output.uninit();

    info!("shmvo shutting down");
    Ok(())
}
