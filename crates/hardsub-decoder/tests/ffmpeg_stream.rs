#![cfg(feature = "backend-ffmpeg")]

use std::env;
use std::path::PathBuf;

use hardsub_decoder::{Backend, Configuration};
use tokio_stream::StreamExt;

#[tokio::test(flavor = "multi_thread")]
async fn ffmpeg_backend_decodes_asset() {
    let asset = match env::var("HARDSUB_TEST_ASSET") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            eprintln!("skipping ffmpeg backend test - HARDSUB_TEST_ASSET not set");
            return;
        }
    };

    let config = Configuration {
        backend: Backend::Ffmpeg,
        input: Some(asset),
        ..Configuration::default()
    };
    let provider = match config.create_provider() {
        Ok(provider) => provider,
        Err(err) => {
            panic!("failed to initialize ffmpeg backend: {err:?}");
        }
    };

    let metadata = provider.metadata();
    let mut stream = provider.into_stream();
    let frame = stream
        .next()
        .await
        .expect("ffmpeg backend should produce at least one frame");
    let frame = frame.expect("frame decoding should succeed");
    assert!(frame.width() > 0);
    assert!(frame.height() > 0);
    assert_eq!(metadata.width, Some(frame.width()));
    if let Some(total) = metadata.total_frames {
        assert!(total > 0, "ffmpeg backend should report positive frame count");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ffmpeg_backend_seeks_to_start_frame() {
    let Ok(asset) = env::var("HARDSUB_TEST_ASSET") else {
        eprintln!("skipping ffmpeg seek test - HARDSUB_TEST_ASSET not set");
        return;
    };

    let config = Configuration {
        backend: Backend::Ffmpeg,
        input: Some(PathBuf::from(asset)),
        start_frame: Some(12),
        ..Configuration::default()
    };
    let provider = config.create_provider().expect("ffmpeg backend");
    let mut stream = provider.into_stream();
    let frame = stream.next().await.expect("frame").expect("decoded frame");
    assert!(frame.frame_index().unwrap_or_default() >= 12);
}
