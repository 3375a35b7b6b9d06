use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use ag2_core::credential::{CredentialRecord, CredentialStore, Group};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_dir() -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("ag2api-credential-pool-test-{}-{n}", std::process::id()));
    dir
}

fn record(email: &str) -> CredentialRecord {
    CredentialRecord {
        access_token: "at".into(),
        refresh_token: "rt".into(),
        expiry_ms: 0,
        token_type: Some("Bearer".into()),
        scope: None,
        email: Some(email.to_string()),
        project_id: None,
    }
}

#[tokio::test]
async fn rotate_advances_round_robin_and_wraps() {
    let dir = scratch_dir();
    let store = CredentialStore::new(dir.clone());
    store.load().await.unwrap();

    store.add(record("a@x.com")).await.unwrap();
    store.add(record("b@x.com")).await.unwrap();
    store.add(record("c@x.com")).await.unwrap();

    assert_eq!(store.current_index(&Group::Claude).await, Some(0));
    store.rotate(&Group::Claude).await;
    assert_eq!(store.current_index(&Group::Claude).await, Some(1));
    store.rotate(&Group::Claude).await;
    assert_eq!(store.current_index(&Group::Claude).await, Some(2));
    store.rotate(&Group::Claude).await;
    assert_eq!(store.current_index(&Group::Claude).await, Some(0));

    // The Gemini cursor is independent of Claude's.
    assert_eq!(store.current_index(&Group::Gemini).await, Some(0));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn load_skips_unloadable_files_and_resets_cursor() {
    let dir = scratch_dir();
    tokio::fs::create_dir_all(&dir).await.unwrap();

    let valid = serde_json::to_string(&record("valid@x.com")).unwrap();
    tokio::fs::write(dir.join("valid@x.com.json"), valid).await.unwrap();

    // Missing both tokenType and scope: I1 says this is not loadable.
    let mut unloadable = record("unloadable@x.com");
    unloadable.token_type = None;
    unloadable.scope = None;
    tokio::fs::write(dir.join("unloadable@x.com.json"), serde_json::to_string(&unloadable).unwrap())
        .await
        .unwrap();

    // Non-credential JSON files must be ignored outright.
    tokio::fs::write(dir.join("package.json"), "{}").await.unwrap();
    tokio::fs::write(dir.join("tsconfig.json"), "{}").await.unwrap();

    let store = CredentialStore::new(dir.clone());
    store.load().await.unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(store.current_index(&Group::Claude).await, Some(0));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn rotate_is_a_no_op_for_a_single_account_pool() {
    let dir = scratch_dir();
    let store = CredentialStore::new(dir.clone());
    store.load().await.unwrap();
    store.add(record("solo@x.com")).await.unwrap();

    store.rotate(&Group::Claude).await;
    assert_eq!(store.current_index(&Group::Claude).await, Some(0));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
