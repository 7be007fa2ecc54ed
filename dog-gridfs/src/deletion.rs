use tracing::info;

use crate::{CatalogRepository, FileCriteria, FileId, FileRecord, GridResult};

/// Remove a visible file and every chunk behind it.
///
/// Chunks go first, then the record, so an interrupted delete leaves a
/// record pointing at missing chunks rather than chunks nobody can find.
/// Returns the record as it was before removal.
pub async fn delete_file<C>(catalog: &C, id: &FileId) -> GridResult<FileRecord>
where
    C: CatalogRepository + ?Sized,
{
    let file = catalog.find_one(&FileCriteria::Id(id.clone())).await?;

    catalog.delete_chunks(&file.id).await?;
    catalog.delete_file(&file.id).await?;

    info!(
        "Removed file {} ({:?}, {} chunks)",
        file.id,
        file.filename,
        file.chunk_count()
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CatalogRepositoryExt, GridError, MemoryCatalog};
    use bytes::Bytes;

    async fn visible(catalog: &MemoryCatalog) -> FileRecord {
        let id = catalog.allocate_file_id().await.unwrap();
        catalog.put_chunk(&id, 0, Bytes::from_static(b"abc")).await.unwrap();
        catalog.put_chunk(&id, 1, Bytes::from_static(b"de")).await.unwrap();
        catalog
            .finalize_file(FileRecord {
                id,
                filename: "gone.txt".to_string(),
                length: 5,
                chunk_size: 3,
                upload_date: chrono::Utc::now(),
                content_hash: None,
                content_type: None,
                aliases: Vec::new(),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_chunks() {
        let catalog = MemoryCatalog::new();
        let file = visible(&catalog).await;

        let removed = delete_file(&catalog, &file.id).await.unwrap();
        assert_eq!(removed.id, file.id);
        assert_eq!(removed.filename, "gone.txt");

        assert!(catalog.find_by_id(&file.id).await.unwrap_err().is_not_found());
        assert_eq!(catalog.stored_chunk_count(&file.id), 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_not_found() {
        let catalog = MemoryCatalog::new();
        let err = delete_file(&catalog, &FileId::from("missing")).await.unwrap_err();
        assert!(matches!(err, GridError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_second_delete_is_not_found() {
        let catalog = MemoryCatalog::new();
        let file = visible(&catalog).await;

        delete_file(&catalog, &file.id).await.unwrap();
        assert!(delete_file(&catalog, &file.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_with_store_offline_keeps_file() {
        let catalog = MemoryCatalog::new();
        let file = visible(&catalog).await;

        catalog.set_offline(true);
        let err = delete_file(&catalog, &file.id).await.unwrap_err();
        assert!(matches!(err, GridError::StorageUnavailable { .. }));

        catalog.set_offline(false);
        assert!(catalog.find_by_id(&file.id).await.is_ok());
    }
}
