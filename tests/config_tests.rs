use anyhow::Result;
use pushtalk::Config;
use std::fs;
use tempfile::TempDir;

const SAMPLE: &str = r#"
[service]
name = "pushtalk"

[audio]
sample_rate = 16000
channels = 1
chunk_ms = 100

[recognition]
streaming_endpoint = "wss://api.deepgram.com/v1/listen"
http_endpoint = "https://api.deepgram.com/v1/listen"
api_key = "dg-test-key"
interim_results = true
"#;

#[test]
fn loads_config_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("pushtalk.toml");
    fs::write(&path, SAMPLE)?;

    let cfg = Config::load(dir.path().join("pushtalk").to_str().unwrap())?;

    assert_eq!(cfg.service.name, "pushtalk");
    assert_eq!(cfg.audio.sample_rate, 16000);
    assert_eq!(cfg.audio.channels, 1);
    assert_eq!(cfg.audio.chunk_ms, 100);
    assert_eq!(cfg.recognition.api_key.as_deref(), Some("dg-test-key"));
    assert!(cfg.recognition.interim_results);

    Ok(())
}

#[test]
fn missing_api_key_is_allowed() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("pushtalk.toml");
    fs::write(&path, SAMPLE.replace("api_key = \"dg-test-key\"\n", ""))?;

    let cfg = Config::load(dir.path().join("pushtalk").to_str().unwrap())?;
    assert_eq!(cfg.recognition.api_key, None);

    Ok(())
}

#[test]
fn session_config_carries_file_settings() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("pushtalk.toml"), SAMPLE)?;

    let cfg = Config::load(dir.path().join("pushtalk").to_str().unwrap())?;
    let session = cfg.session_config();

    assert!(session.session_id.starts_with("session-"));
    assert_eq!(session.sample_rate, 16000);
    assert_eq!(session.chunk_ms, 100);
    assert_eq!(session.api_key.as_deref(), Some("dg-test-key"));
    assert_eq!(
        session.streaming_endpoint,
        "wss://api.deepgram.com/v1/listen"
    );

    Ok(())
}
