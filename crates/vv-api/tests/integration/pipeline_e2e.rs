//! End-to-end pipeline test against a running server
//!
//! Exercises the full flow with the `noop` providers: upload → transcribe →
//! poll completed+primary → cleanup → poll completed → user edit → erase →
//! reads answer 410.
//!
//! Requires:
//! - A running vv-api server with a database, `VV_TRANSCRIPTION_PROVIDER=noop`,
//!   `VV_LLM_PROVIDER=noop`, and `VV_AUTH_SKIP_VALIDATION=1`
//! - `VV_E2E_BASE_URL` pointing at it (e.g. http://localhost:8000)
//!
//! Tests skip silently when `VV_E2E_BASE_URL` is unset.

use std::time::{Duration, Instant};

use reqwest::multipart;

const TEST_USER: &str = "00000000-0000-0000-0000-00000000e2e1";

struct TestClient {
    http: reqwest::Client,
    base_url: String,
}

impl TestClient {
    fn from_env() -> Option<Self> {
        let base_url = std::env::var("VV_E2E_BASE_URL").ok()?;
        Some(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .header("x-user-id", TEST_USER)
            .send()
            .await
            .expect("request failed")
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .header("x-user-id", TEST_USER)
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> serde_json::Value {
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(bytes).file_name(filename.to_string()),
        );
        let response = self
            .http
            .post(self.url("/api/v1/upload"))
            .header("x-user-id", TEST_USER)
            .multipart(form)
            .send()
            .await
            .expect("upload failed");
        assert_eq!(response.status(), 201, "{}", response.text().await.unwrap());
        response.json().await.expect("upload body")
    }
}

/// A minimal CBR MP3: one valid 128 kbit/s frame header plus padding.
fn fake_mp3(size: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFB, 0x90, 0x00];
    bytes.resize(size, 0u8);
    bytes
}

async fn poll_until(
    client: &TestClient,
    path: &str,
    deadline: Duration,
    done: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let start = Instant::now();
    loop {
        let response = client.get(path).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.expect("poll body");
        if done(&body) {
            return body;
        }
        assert!(
            start.elapsed() < deadline,
            "timed out polling {path}: {body}"
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[tokio::test]
async fn full_pipeline_with_noop_providers() {
    let Some(client) = TestClient::from_env() else {
        eprintln!("VV_E2E_BASE_URL not set; skipping");
        return;
    };

    // Health
    let health = client.get("/health").await;
    assert_eq!(health.status(), 200);
    let health: serde_json::Value = health.json().await.unwrap();
    assert_eq!(health["database"], "connected");

    // Upload
    let suffix = std::process::id();
    let upload = client
        .upload(&format!("dream-{suffix}.mp3"), fake_mp3(50_000))
        .await;
    let entry_id = upload["id"].as_str().unwrap().to_string();
    assert_eq!(upload["message"], "File uploaded successfully");
    assert!(upload["saved_filename"].as_str().unwrap().ends_with(".mp3"));

    // Transcribe with the noop provider
    let response = client
        .post_json(
            &format!("/api/v1/entries/{entry_id}/transcribe"),
            serde_json::json!({ "language": "en", "transcription_provider": "noop" }),
        )
        .await;
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    let transcription_id = body["transcription_id"].as_str().unwrap().to_string();

    let transcription = poll_until(
        &client,
        &format!("/api/v1/transcriptions/{transcription_id}"),
        Duration::from_secs(5),
        |body| body["status"] == "completed" || body["status"] == "failed",
    )
    .await;
    assert_eq!(transcription["status"], "completed");
    assert_eq!(transcription["is_primary"], true);
    assert!(!transcription["transcribed_text"]
        .as_str()
        .unwrap()
        .is_empty());

    // Cleanup with the active journal template
    let response = client
        .post_json(
            &format!("/api/v1/entries/{entry_id}/cleanup"),
            serde_json::json!({ "entry_type": "journal" }),
        )
        .await;
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    let cleanup_id = body["cleanup_id"].as_str().unwrap().to_string();

    let cleaned = poll_until(
        &client,
        &format!("/api/v1/cleaned-entries/{cleanup_id}"),
        Duration::from_secs(10),
        |body| body["status"] == "completed" || body["status"] == "failed",
    )
    .await;
    assert_eq!(cleaned["status"], "completed");
    assert!(!cleaned["cleaned_text"].as_str().unwrap().is_empty());
    assert!(!cleaned["llm_raw_response"].as_str().unwrap().is_empty());

    // User edit is a side channel; readers prefer it
    let response = client
        .http
        .patch(client.url(&format!("/api/v1/cleaned-entries/{cleanup_id}")))
        .header("x-user-id", TEST_USER)
        .json(&serde_json::json!({ "user_edited_text": "My own words." }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(&format!("/api/v1/cleaned-entries/{cleanup_id}"))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["text"], "My own words.");
    assert_eq!(body["user_edited_text"], "My own words.");
    assert_ne!(body["cleaned_text"], "My own words.");

    // Rotate the DEK onto the active KEK; content stays readable after
    let response = client
        .post_json(
            "/api/v1/encryption/rotate",
            serde_json::json!({ "voice_entry_id": entry_id }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let rotated: serde_json::Value = response.json().await.unwrap();
    assert_eq!(rotated["key_version"], 2);
    assert!(rotated["encryption_version"].is_string());

    let response = client
        .get(&format!("/api/v1/transcriptions/{transcription_id}"))
        .await;
    assert_eq!(response.status(), 200);

    // A rotation target outside the configured ring is rejected
    let response = client
        .post_json(
            "/api/v1/encryption/rotate",
            serde_json::json!({ "voice_entry_id": entry_id, "new_kek_id": "not-a-kek" }),
        )
        .await;
    assert_eq!(response.status(), 400);

    // Erase: the DEK dies, ciphertext stays, reads answer 410
    let response = client
        .post_json(
            "/api/v1/encryption/erase",
            serde_json::json!({ "voice_entry_id": entry_id, "confirm": true }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let erased: serde_json::Value = response.json().await.unwrap();
    assert!(erased["dek_id"].is_string());
    assert!(erased["destroyed_at"].is_string());

    let response = client
        .get(&format!("/api/v1/transcriptions/{transcription_id}"))
        .await;
    assert_eq!(response.status(), 410);
    let gone_body = response.text().await.unwrap();
    assert!(!gone_body.contains("noop transcription"));

    let response = client
        .get(&format!("/api/v1/cleaned-entries/{cleanup_id}"))
        .await;
    assert_eq!(response.status(), 410);

    // Erase is idempotent
    let response = client
        .post_json(
            "/api/v1/encryption/erase",
            serde_json::json!({ "voice_entry_id": entry_id, "confirm": true }),
        )
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn concurrent_transcriptions_elect_one_primary() {
    let Some(client) = TestClient::from_env() else {
        eprintln!("VV_E2E_BASE_URL not set; skipping");
        return;
    };

    let suffix = format!("{}-race", std::process::id());
    let upload = client
        .upload(&format!("dream-{suffix}.mp3"), fake_mp3(30_000))
        .await;
    let entry_id = upload["id"].as_str().unwrap().to_string();

    // Two concurrent transcriptions of the same entry
    let mut ids = Vec::new();
    let transcribe_path = format!("/api/v1/entries/{entry_id}/transcribe");
    let (a, b) = tokio::join!(
        client.post_json(
            &transcribe_path,
            serde_json::json!({ "language": "en", "transcription_provider": "noop" }),
        ),
        client.post_json(
            &transcribe_path,
            serde_json::json!({ "language": "en", "transcription_provider": "noop" }),
        )
    );
    for response in [a, b] {
        assert_eq!(response.status(), 202);
        let body: serde_json::Value = response.json().await.unwrap();
        ids.push(body["transcription_id"].as_str().unwrap().to_string());
    }

    let mut primaries = 0;
    for id in &ids {
        let body = poll_until(
            &client,
            &format!("/api/v1/transcriptions/{id}"),
            Duration::from_secs(5),
            |body| body["status"] == "completed",
        )
        .await;
        if body["is_primary"] == true {
            primaries += 1;
        }
    }
    assert_eq!(primaries, 1, "exactly one primary expected");
}

#[tokio::test]
async fn cleanup_before_any_transcription_is_a_conflict() {
    let Some(client) = TestClient::from_env() else {
        eprintln!("VV_E2E_BASE_URL not set; skipping");
        return;
    };

    let suffix = format!("{}-conflict", std::process::id());
    let upload = client
        .upload(&format!("dream-{suffix}.mp3"), fake_mp3(20_000))
        .await;
    let entry_id = upload["id"].as_str().unwrap().to_string();

    let response = client
        .post_json(
            &format!("/api/v1/entries/{entry_id}/cleanup"),
            serde_json::json!({ "entry_type": "journal" }),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn out_of_schema_parameters_are_rejected_before_dispatch() {
    let Some(client) = TestClient::from_env() else {
        eprintln!("VV_E2E_BASE_URL not set; skipping");
        return;
    };

    let suffix = format!("{}-params", std::process::id());
    let upload = client
        .upload(&format!("dream-{suffix}.mp3"), fake_mp3(20_000))
        .await;
    let entry_id = upload["id"].as_str().unwrap().to_string();

    // Out-of-range temperature
    let response = client
        .post_json(
            &format!("/api/v1/entries/{entry_id}/transcribe"),
            serde_json::json!({
                "language": "en",
                "transcription_provider": "noop",
                "temperature": 3.5
            }),
        )
        .await;
    assert_eq!(response.status(), 422);

    // Unsupported language code
    let response = client
        .post_json(
            &format!("/api/v1/entries/{entry_id}/transcribe"),
            serde_json::json!({ "language": "klingon", "transcription_provider": "noop" }),
        )
        .await;
    assert_eq!(response.status(), 422);
}
