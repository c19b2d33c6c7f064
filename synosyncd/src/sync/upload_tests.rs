use super::*;
use crate::sync::fakes::FakeRemote;
use tempfile::{TempDir, tempdir};

fn settings(local_root: &Path) -> UploadSettings {
    UploadSettings {
        local_root: local_root.to_path_buf(),
        source_root: "/photo".to_string(),
        destination_root: "/backup".to_string(),
        spare_space: 0,
        delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        retry_count: 3,
    }
}

fn orchestrator(store: &MetadataStore, settings: UploadSettings) -> UploadOrchestrator {
    UploadOrchestrator::new(store.clone(), AdmissionController::new(1), settings)
}

async fn mirrored(
    dir: &TempDir,
    store: &MetadataStore,
    relative: &str,
    contents: &[u8],
    status: TransferStatus,
) -> PathBuf {
    let path = dir.path().join("photo").join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    store
        .write(&path, contents.len() as u64, TransferStatus::Init)
        .await
        .unwrap();
    if status != TransferStatus::Init {
        store.write(&path, 0, status).await.unwrap();
    }
    path
}

async fn status_of(store: &MetadataStore, path: &Path) -> TransferStatus {
    store.get(path).await.unwrap().unwrap().status
}

#[tokio::test]
async fn not_sent_file_is_relayed_and_marked_sent() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "2024/a.jpg", b"hello", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let report = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.bytes, 5);
    assert_eq!(remote.file_size("/backup/photo/2024/a.jpg"), Some(5));
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
    let record = store.get(&file).await.unwrap().unwrap();
    assert_eq!(record.size, 5);
}

#[tokio::test]
async fn other_states_are_skipped_without_attempts() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    mirrored(&dir, &store, "init.jpg", b"1", TransferStatus::Init).await;
    mirrored(&dir, &store, "sent.jpg", b"2", TransferStatus::Sent).await;
    mirrored(&dir, &store, "failed.jpg", b"3", TransferStatus::Failed).await;
    let odd = mirrored(
        &dir,
        &store,
        "odd.jpg",
        b"4",
        TransferStatus::parse("PENDING"),
    )
    .await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let report = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.skipped, 4);
    assert_eq!(report.sent, 0);
    assert_eq!(remote.sends(), 0);
    assert_eq!(status_of(&store, &odd).await, TransferStatus::parse("PENDING"));
}

#[tokio::test]
async fn file_without_record_aborts_the_walk() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let stray = dir.path().join("photo/stray.jpg");
    std::fs::create_dir_all(stray.parent().unwrap()).unwrap();
    std::fs::write(&stray, b"?").unwrap();
    let remote = FakeRemote::with_free_space(u64::MAX);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let err = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::MissingMetadata(ref p) if p == &stray));
    assert_eq!(
        err.to_string(),
        format!("fail to find {} in metadata", stray.display())
    );
}

#[tokio::test]
async fn refuses_upload_that_would_eat_the_spare_margin() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "big.bin", &[0u8; 600], TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(1000);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();
    let mut settings = settings(dir.path());
    settings.spare_space = 500;
    settings.retry_count = 2;

    let report = orchestrator(&store, settings)
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(remote.sends(), 0);
    assert!(remote.removes().is_empty());
    assert_eq!(remote.file_size("/backup/photo/big.bin"), None);
    assert_eq!(status_of(&store, &file).await, TransferStatus::Failed);
}

#[tokio::test]
async fn upload_fits_when_margin_is_respected() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "big.bin", &[0u8; 600], TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(1100);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();
    let mut settings = settings(dir.path());
    settings.spare_space = 500;

    orchestrator(&store, settings)
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn same_size_destination_counts_as_delivered() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "a.jpg", b"12345", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    remote.put("/backup/photo/a.jpg", 5);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let report = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.bytes, 0);
    assert_eq!(remote.sends(), 0);
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn different_size_destination_fails_the_attempt() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "a.jpg", b"12345", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    remote.put("/backup/photo/a.jpg", 9);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();
    let mut settings = settings(dir.path());
    settings.retry_count = 1;

    let report = orchestrator(&store, settings)
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(remote.sends(), 0);
    assert_eq!(status_of(&store, &file).await, TransferStatus::Failed);
}

#[tokio::test]
async fn conflicting_destination_is_replaced_on_retry() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "a.jpg", b"12345", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    remote.put("/backup/photo/a.jpg", 9);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(remote.removes(), vec!["/backup/photo/a.jpg".to_string()]);
    assert_eq!(remote.file_size("/backup/photo/a.jpg"), Some(5));
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn lost_connection_is_reestablished_before_retrying() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "a.jpg", b"12345", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    remote.fail_next_send(SinkError::ConnectionLost("connection lost".into()));
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(remote.connects(), 2);
    assert_eq!(session.reconnects(), 1);
    assert!(remote.removes().is_empty());
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn half_written_leftover_is_removed_before_retrying() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "a.jpg", b"12345", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    remote.fail_next_send(SinkError::AlreadyExists("/backup/photo/a.jpg".into()));
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(remote.removes(), vec!["/backup/photo/a.jpg".to_string()]);
    assert_eq!(remote.connects(), 1);
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn sidecars_and_partials_are_not_uploaded() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "a.jpg", b"1", TransferStatus::NotSent).await;
    std::fs::write(dir.path().join("photo/b.jpg.download"), b"partial").unwrap();
    let remote = FakeRemote::with_free_space(u64::MAX);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let report = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(remote.sends(), 1);
    assert_eq!(remote.file_size("/backup/photo/metadata.json"), None);
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn recorded_file_with_partial_extension_is_still_uploaded() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let file = mirrored(&dir, &store, "setup.download", b"12", TransferStatus::NotSent).await;
    let remote = FakeRemote::with_free_space(u64::MAX);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let report = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(remote.file_size("/backup/photo/setup.download"), Some(2));
    assert_eq!(status_of(&store, &file).await, TransferStatus::Sent);
}

#[tokio::test]
async fn missing_mirror_uploads_nothing() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::new();
    let remote = FakeRemote::with_free_space(u64::MAX);
    let mut session = UploadSession::connect(remote.connector()).await.unwrap();

    let report = orchestrator(&store, settings(dir.path()))
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(report, UploadReport::default());
}
