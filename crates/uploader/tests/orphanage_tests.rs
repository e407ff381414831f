// Orphanage staging, promotion and sweeping.

mod common;

use bytes::Bytes;
use common::{PickyDestination, backdate, payload, session, stores};
use std::sync::Arc;
use stitch_core::OrphanageConfig;
use stitch_storage::{BlobStore, MemoryBackend};
use stitch_uploader::{
    BlobStorage, ChunkStorage, DestinationStorage, OrphanageStorage, StaticSession, StoredFile,
    UploaderError, WebSession,
};
use time::Duration;

struct Harness {
    chunks: ChunkStorage,
    destination: Arc<dyn BlobStore>,
    session: Arc<StaticSession>,
    orphanage: OrphanageStorage,
}

fn harness(store: Arc<dyn BlobStore>, refused: &[&str]) -> Harness {
    let chunks = ChunkStorage::new(store, "chunks").unwrap();
    let destination: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
    let target: Arc<dyn DestinationStorage> = if refused.is_empty() {
        Arc::new(
            BlobStorage::new(destination.clone())
                .unwrap()
                .with_directory("uploads")
                .unwrap(),
        )
    } else {
        Arc::new(PickyDestination::new(destination.clone(), refused))
    };
    let session = Arc::new(StaticSession::active("web-1"));
    let orphanage = OrphanageStorage::new(
        target,
        session.clone(),
        &chunks,
        &OrphanageConfig::default(),
        "gallery",
    )
    .unwrap();
    Harness {
        chunks,
        destination,
        session,
        orphanage,
    }
}

/// Assemble a single-chunk upload and return the finished file.
async fn finished_upload(chunks: &ChunkStorage, upload: &str, name: &str) -> StoredFile {
    let id = session(upload);
    let chunk = chunks
        .add_chunk(id, 0, payload(Bytes::from(name.to_string()), 3), name)
        .unwrap();
    chunks
        .assemble_chunks::<&str>(chunk, &[], true, true)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_finished_uploads_are_promoted() {
    let (_dir, stores) = stores().await;
    for store in stores {
        let h = harness(store.clone(), &[]);
        for (upload, name) in [("u1", "cat.png"), ("u2", "dog.png")] {
            let file = finished_upload(&h.chunks, upload, name).await;
            let orphan = h.orphanage.upload(file, name).await.unwrap();
            assert_eq!(orphan.path(), format!("orphanage/web-1/gallery/{name}"));
        }
        assert!(!store.exists("chunks/u1/cat.png").await.unwrap());

        let files = h.orphanage.get_files().await.unwrap();
        assert_eq!(
            files.keys().collect::<Vec<_>>(),
            vec!["orphanage/web-1/gallery/cat.png", "orphanage/web-1/gallery/dog.png"]
        );

        let report = h.orphanage.upload_files(None).await;
        assert!(report.is_complete());
        let promoted: Vec<_> = report
            .into_promoted()
            .iter()
            .map(|f| f.path().to_string())
            .collect();
        assert_eq!(promoted, vec!["uploads/cat.png", "uploads/dog.png"]);
        assert_eq!(
            h.destination.get("uploads/dog.png").await.unwrap(),
            Bytes::from_static(b"dog.png")
        );
        assert!(h.orphanage.get_files().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_refused_file_stays_in_orphanage() {
    let (_dir, stores) = stores().await;
    for store in stores {
        let h = harness(store, &["b"]);
        for name in ["a", "b", "c"] {
            let file = finished_upload(&h.chunks, &format!("up-{name}"), name).await;
            h.orphanage.upload(file, name).await.unwrap();
        }

        let report = h.orphanage.upload_files(None).await;

        assert!(!report.is_complete());
        assert!(report.listing_error.is_none());
        assert_eq!(report.promoted.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, "orphanage/web-1/gallery/b");
        assert!(matches!(
            report.skipped[0].error,
            UploaderError::Destination { .. }
        ));
        assert!(h.destination.exists("a").await.unwrap());
        assert!(h.destination.exists("c").await.unwrap());
        let left: Vec<_> = h.orphanage.get_files().await.unwrap().into_keys().collect();
        assert_eq!(left, vec!["orphanage/web-1/gallery/b"]);
    }
}

#[tokio::test]
async fn test_explicit_selection_is_promoted() {
    let h = harness(Arc::new(MemoryBackend::new()), &[]);
    for name in ["keep", "send"] {
        let file = finished_upload(&h.chunks, name, name).await;
        h.orphanage.upload(file, name).await.unwrap();
    }

    let mut files = h.orphanage.get_files().await.unwrap();
    files.remove("orphanage/web-1/gallery/keep");
    let report = h.orphanage.upload_files(Some(files)).await;

    assert_eq!(report.promoted.len(), 1);
    assert!(h.destination.exists("uploads/send").await.unwrap());
    assert!(!h.destination.exists("uploads/keep").await.unwrap());
}

#[tokio::test]
async fn test_inactive_session_is_refused() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
    let h = harness(store.clone(), &[]);
    let file = finished_upload(&h.chunks, "u", "x.txt").await;
    h.session.close();
    assert!(!h.session.is_active());

    let err = h.orphanage.upload(file.clone(), "x.txt").await.unwrap_err();
    assert!(matches!(err, UploaderError::SessionNotAvailable));
    assert!(store.exists("chunks/u/x.txt").await.unwrap());
    assert!(store.list_files("orphanage", true).await.unwrap().is_empty());

    assert!(matches!(
        h.orphanage.get_files().await,
        Err(UploaderError::SessionNotAvailable)
    ));
    let report = h.orphanage.upload_files(None).await;
    assert!(report.promoted.is_empty());
    assert!(matches!(
        report.listing_error,
        Some(UploaderError::SessionNotAvailable)
    ));

    h.session.start();
    h.orphanage.upload(file, "x.txt").await.unwrap();
    assert_eq!(h.orphanage.get_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
    store
        .put("orphanage/web-2/gallery/theirs", Bytes::from_static(b"-"))
        .await
        .unwrap();
    store
        .put("orphanage/web-1/avatar/other-type", Bytes::from_static(b"-"))
        .await
        .unwrap();
    let h = harness(store, &[]);

    assert!(h.orphanage.get_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_sweeps_orphanage_only() {
    let backend = MemoryBackend::new();
    for key in [
        "orphanage/web-1/gallery/old",
        "orphanage/web-9/gallery/fresh",
        "chunks/s/0_old",
    ] {
        backend.put(key, Bytes::from_static(b"-")).await.unwrap();
    }
    backdate(&backend, "orphanage/web-1/gallery/old", Duration::days(8)).await;
    backdate(&backend, "chunks/s/0_old", Duration::days(8)).await;
    let h = harness(Arc::new(backend.clone()), &[]);

    let report = h.orphanage.clear(Duration::days(7)).await.unwrap();

    assert_eq!(report.prefix, "orphanage");
    assert_eq!(report.files_deleted, 1);
    assert!(!backend.exists("orphanage/web-1/gallery/old").await.unwrap());
    assert!(backend.exists("orphanage/web-9/gallery/fresh").await.unwrap());
    assert!(backend.exists("chunks/s/0_old").await.unwrap());
}

#[tokio::test]
async fn test_invalid_upload_type_is_rejected() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
    let chunks = ChunkStorage::new(store.clone(), "chunks").unwrap();
    let err = OrphanageStorage::new(
        Arc::new(BlobStorage::new(store).unwrap()),
        Arc::new(StaticSession::active("web-1")),
        &chunks,
        &OrphanageConfig::default(),
        "../gallery",
    )
    .unwrap_err();
    assert!(matches!(err, UploaderError::Config(_)));
}
