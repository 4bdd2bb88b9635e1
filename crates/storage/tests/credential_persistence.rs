use storage::{KeyValueStore, Storage};

#[tokio::test]
async fn credential_survives_reopening_the_database() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("dashboard.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let storage = Storage::new(&database_url).await.expect("open");
        storage.set("token", "persisted-token").await.expect("set");
        storage.pool().close().await;
    }

    let reopened = Storage::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.get("token").await.expect("get").as_deref(),
        Some("persisted-token")
    );

    reopened.remove("token").await.expect("remove");
    reopened.pool().close().await;

    let reopened_again = Storage::new(&database_url).await.expect("reopen again");
    assert_eq!(reopened_again.get("token").await.expect("get"), None);
}
