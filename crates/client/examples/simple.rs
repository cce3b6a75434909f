//! Minimal conversation: connect, stream a raw PCM file, print segments.
//!
//! Usage: SPEECHMATICS_API_KEY=... cargo run --example simple -- audio.raw
//! where audio.raw is mono 16 kHz 16-bit little-endian PCM.

use std::time::Duration;

use colloquy_client::{AgentEvent, TextInputFlags, VoiceAgentClient, VoiceAgentConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let api_key = std::env::var("SPEECHMATICS_API_KEY")?;
    let url = std::env::var("SPEECHMATICS_RT_URL")
        .unwrap_or_else(|_| "wss://eu2.rt.speechmatics.com/v2".to_string());
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: simple <audio.raw>"))?;

    let client = VoiceAgentClient::new(url, api_key, VoiceAgentConfig::adaptive())?;

    client.on(AgentEvent::AddInterimSegment, |payload| {
        for segment in payload["segments"].as_array().into_iter().flatten() {
            println!("~ {}: {}", segment["speaker_id"], segment["text"]);
        }
    });
    client.on(AgentEvent::AddSegment, |payload| {
        for segment in payload["segments"].as_array().into_iter().flatten() {
            println!("= {}: {}", segment["speaker_id"], segment["text"]);
        }
    });
    client.on(AgentEvent::EndOfTurn, |payload| {
        println!("-- end of turn {}", payload["turn_id"]);
    });

    client.connect().await?;

    // 100 ms chunks, paced at realtime.
    let audio = std::fs::read(&path)?;
    for chunk in audio.chunks(3200) {
        client.send_audio(chunk).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Let the tail of the transcript settle before hanging up.
    tokio::time::sleep(Duration::from_secs(2)).await;
    client.send_text_input("goodbye", TextInputFlags::default());
    client.disconnect().await?;
    Ok(())
}
