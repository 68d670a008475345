//! Coordinator sequencing against a recording host, and the full upload /
//! playback / document flow over a real socket.

use std::net::TcpStream;
use std::path::PathBuf;

use serde_json::{json, Value};

use vidsched_daemon::http::UploadResponse;
use vidsched_daemon::{load_config, Coordinator, Endpoint, Host, Phase, StartupError};
use vidsched_store::config::Config;

#[derive(Default)]
struct RecordingHost {
    app_data: Option<PathBuf>,
    fail_present: bool,
    presented: Vec<Endpoint>,
    /// Whether the endpoint accepted a connection at the moment of `present`.
    listening_at_present: Vec<bool>,
    escalations: Vec<(String, String)>,
}

impl RecordingHost {
    fn with_app_data(dir: PathBuf) -> Self {
        Self {
            app_data: Some(dir),
            ..Default::default()
        }
    }
}

impl Host for RecordingHost {
    fn app_data_dir(&self) -> Option<PathBuf> {
        self.app_data.clone()
    }

    fn present(&mut self, endpoint: &Endpoint) -> anyhow::Result<()> {
        self.listening_at_present
            .push(TcpStream::connect(endpoint.addr).is_ok());
        self.presented.push(endpoint.clone());
        if self.fail_present {
            anyhow::bail!("window could not be created");
        }
        Ok(())
    }

    fn escalate(&mut self, title: &str, message: &str) {
        self.escalations.push((title.to_string(), message.to_string()));
    }
}

fn config_on_port(port: u16) -> Config {
    let mut config = Config::default();
    config.server.port = port;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_presents_only_after_listening() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = Coordinator::new(
        config_on_port(0),
        RecordingHost::with_app_data(tmp.path().to_path_buf()),
    );
    assert_eq!(coordinator.phase(), Phase::Idle);

    let endpoint = coordinator.start().await.unwrap();

    assert_eq!(coordinator.phase(), Phase::Ready);
    assert_eq!(coordinator.endpoint(), Some(&endpoint));
    assert_eq!(endpoint.data_root, tmp.path());
    assert!(endpoint.addr.ip().is_loopback());
    assert_eq!(endpoint.base_url, format!("http://{}", endpoint.addr));

    let host = coordinator.host();
    assert_eq!(host.presented, vec![endpoint.clone()]);
    assert_eq!(host.listening_at_present, vec![true]);
    assert!(host.escalations.is_empty());

    // Stores were initialised before the service came up.
    assert!(tmp.path().join("videos").is_dir());
    assert!(tmp.path().join("schedules.json").is_file());
    assert!(tmp.path().join("playlist.json").is_file());

    assert_eq!(coordinator.shutdown().await, Phase::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn port_in_use_fails_and_escalates_once() {
    let tmp = tempfile::tempdir().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut coordinator = Coordinator::new(
        config_on_port(port),
        RecordingHost::with_app_data(tmp.path().to_path_buf()),
    );

    let err = coordinator.start().await.unwrap_err();
    match &err {
        StartupError::Listen(e) => assert!(e.is_port_in_use()),
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(coordinator.phase(), Phase::Failed);
    assert!(coordinator.endpoint().is_none());
    let host = coordinator.host();
    assert!(host.presented.is_empty());
    assert_eq!(host.escalations.len(), 1);
    assert_eq!(host.escalations[0].0, "Backend Error");
    assert!(host.escalations[0].1.contains(&port.to_string()));

    // Shutdown in a terminal phase does nothing.
    assert_eq!(coordinator.shutdown().await, Phase::Failed);
}

#[test]
fn unreadable_config_is_escalated() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();

    let mut host = RecordingHost::default();
    assert!(load_config(&path, &mut host).is_none());
    assert_eq!(host.escalations.len(), 1);
    assert_eq!(host.escalations[0].0, "Configuration Error");
    assert!(host.escalations[0].1.contains("config.toml"));

    // A valid file loads without bothering the host.
    std::fs::write(&path, "[server]\nport = 4100\n").unwrap();
    let config = load_config(&path, &mut host).unwrap();
    assert_eq!(config.server.port, 4100);
    assert_eq!(host.escalations.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_presentation_releases_the_port() {
    let tmp = tempfile::tempdir().unwrap();
    let mut host = RecordingHost::with_app_data(tmp.path().to_path_buf());
    host.fail_present = true;
    let mut coordinator = Coordinator::new(config_on_port(0), host);

    let err = coordinator.start().await.unwrap_err();
    assert!(matches!(err, StartupError::Present(_)));
    assert_eq!(coordinator.phase(), Phase::Failed);

    let host = coordinator.host();
    assert_eq!(host.escalations.len(), 1);
    let addr = host.presented[0].addr;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn start_is_only_valid_from_idle() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = Coordinator::new(
        config_on_port(0),
        RecordingHost::with_app_data(tmp.path().to_path_buf()),
    );
    coordinator.start().await.unwrap();

    let err = coordinator.start().await.unwrap_err();
    assert!(matches!(err, StartupError::InvalidTransition(Phase::Ready)));
    // A refused transition is not a startup failure.
    assert_eq!(coordinator.phase(), Phase::Ready);
    assert!(coordinator.host().escalations.is_empty());

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_the_listener() {
    let tmp = tempfile::tempdir().unwrap();
    let mut coordinator = Coordinator::new(
        config_on_port(0),
        RecordingHost::with_app_data(tmp.path().to_path_buf()),
    );
    let endpoint = coordinator.start().await.unwrap();
    assert!(tokio::net::TcpStream::connect(endpoint.addr).await.is_ok());

    assert_eq!(coordinator.shutdown().await, Phase::Stopped);
    assert!(coordinator.endpoint().is_none());
    assert!(tokio::net::TcpStream::connect(endpoint.addr).await.is_err());

    // Idempotent once stopped.
    assert_eq!(coordinator.shutdown().await, Phase::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_play_and_persist_across_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let clip = b"0123456789".to_vec();

    let mut coordinator = Coordinator::new(
        config_on_port(0),
        RecordingHost::with_app_data(tmp.path().to_path_buf()),
    );
    let endpoint = coordinator.start().await.unwrap();
    let base = endpoint.base_url.clone();

    let filename = {
        let client = reqwest::Client::new();

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(clip.clone()).file_name("clip.mp4"),
        );
        let uploaded: UploadResponse = client
            .post(format!("{}/upload", base))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(uploaded.name, "clip.mp4");
        assert!(uploaded.filename.ends_with("clip.mp4"));
        assert!(uploaded.url.starts_with(&base));

        let body = client
            .get(&uploaded.url)
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body.as_ref(), clip.as_slice());

        let resp = client
            .get(&uploaded.url)
            .header(reqwest::header::RANGE, "bytes=4-7")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"4567");

        let playlist = json!([{"song": "A"}]);
        let written: Value = client
            .post(format!("{}/playlist", base))
            .json(&playlist)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(written, json!({"success": true}));

        let read_back: Value = client
            .get(format!("{}/playlist", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(read_back, playlist);

        uploaded.filename
    };

    coordinator.shutdown().await;

    // A fresh process over the same data root sees the same data.
    let mut coordinator = Coordinator::new(
        config_on_port(0),
        RecordingHost::with_app_data(tmp.path().to_path_buf()),
    );
    let endpoint = coordinator.start().await.unwrap();

    let playlist: Value = reqwest::get(format!("{}/playlist", endpoint.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(playlist, json!([{"song": "A"}]));

    let body = reqwest::get(format!("{}/videos/{}", endpoint.base_url, filename))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), clip.as_slice());

    let schedules: Value = reqwest::get(format!("{}/schedules", endpoint.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(schedules, json!([]));

    coordinator.shutdown().await;
}
