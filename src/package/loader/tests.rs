use std::sync::Arc;

use super::*;
use crate::cache::CachingLoader;
use crate::url::FILE_SCHEME;

#[tokio::test]
async fn test_file_put_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let loader = FileLoader::new(tmp.path().join("blobs"));

    let first = loader.put(b"{\"a\":1}".to_vec()).await.unwrap();
    let second = loader.put(b"{\"a\":1}".to_vec()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.scheme(), FILE_SCHEME);
    assert!(first.as_str().ends_with(".json"));

    let files = std::fs::read_dir(tmp.path().join("blobs")).unwrap().count();
    assert_eq!(files, 1, "identical content must be stored once");

    let other = loader.put(b"{\"a\":2}".to_vec()).await.unwrap();
    assert_ne!(first, other);
}

#[tokio::test]
async fn test_file_read_list_remove() {
    let tmp = tempfile::tempdir().unwrap();
    let loader = FileLoader::new(tmp.path());

    let a = loader.put(b"one".to_vec()).await.unwrap();
    let b = loader.put(b"two".to_vec()).await.unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

    assert_eq!(loader.read(&a).await.unwrap(), b"one");
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(loader.list().await.unwrap(), expected);

    loader.remove(&a).await.unwrap();
    assert!(loader.read(&a).await.unwrap_err().is_not_found());
    // Removing twice is fine.
    loader.remove(&a).await.unwrap();
    assert_eq!(loader.list().await.unwrap(), vec![b]);
}

#[tokio::test]
async fn test_file_list_of_missing_dir_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let loader = FileLoader::new(tmp.path().join("never-created"));
    assert!(loader.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_put_writes_once() {
    let loader = MemoryLoader::new("ipfs");
    let first = loader.put(b"same".to_vec()).await.unwrap();
    let second = loader.put(b"same".to_vec()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(loader.writes(), 1);
}

#[tokio::test]
async fn test_memory_without_remove_is_unsupported() {
    let loader = MemoryLoader::new("ipfs").without_remove();
    let url = loader.put(b"x".to_vec()).await.unwrap();
    let err = loader.remove(&url).await.unwrap_err();
    assert!(matches!(err, crate::Error::Unsupported(_)));
    assert!(loader.contains(&url));
}

#[tokio::test]
async fn test_caching_loader_populates_cache_on_miss() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryLoader::new("ipfs"));
    let url = remote.insert(b"remote blob".to_vec()).unwrap();

    let cached = CachingLoader::new(remote.clone(), None, tmp.path().to_path_buf());
    assert!(!cached.cache_path(&url).exists());

    assert_eq!(cached.read(&url).await.unwrap(), b"remote blob");
    assert!(cached.cache_path(&url).exists());

    // Served from the cache once the remote object is gone.
    remote.remove(&url).await.unwrap();
    assert_eq!(cached.read(&url).await.unwrap(), b"remote blob");

    let stats = cached.cache_stats().await.unwrap();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.total_bytes, b"remote blob".len() as u64);
}

#[tokio::test]
async fn test_caching_loader_cache_key_is_not_the_url() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryLoader::new("ipfs"));
    let cached = CachingLoader::new(remote, None, tmp.path().to_path_buf());
    let url = crate::ContentUrl::ipfs("QmCaseSensitive").unwrap();
    let name = cached
        .cache_path(&url)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert!(!name.contains("QmCaseSensitive"));
    assert_eq!(name.len(), 64 + ".json".len());
}

#[tokio::test]
async fn test_caching_loader_without_writer_caches_locally() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryLoader::new("ipfs"));
    let cached = CachingLoader::new(remote.clone(), None, tmp.path().to_path_buf());

    let url = cached.put(b"{\"a\":1}".to_vec()).await.unwrap();
    assert_eq!(url, remote.content_url(b"{\"a\":1}").await.unwrap());
    assert!(cached.cache_path(&url).exists());
    assert!(!remote.contains(&url));
    assert_eq!(remote.writes(), 0);
    assert_eq!(cached.read(&url).await.unwrap(), b"{\"a\":1}");
}

#[tokio::test]
async fn test_caching_loader_put_caches_and_forwards() {
    let tmp = tempfile::tempdir().unwrap();
    let reader = Arc::new(MemoryLoader::new("ipfs"));
    let writer = Arc::new(MemoryLoader::new("ipfs"));
    let cached = CachingLoader::new(reader, Some(writer.clone()), tmp.path().to_path_buf());

    let url = cached.put(b"published".to_vec()).await.unwrap();
    assert!(writer.contains(&url));
    assert!(cached.cache_path(&url).exists());

    // A cached blob is not forwarded again.
    writer.remove(&url).await.unwrap();
    let again = cached.put(b"published".to_vec()).await.unwrap();
    assert_eq!(url, again);
    assert!(!writer.contains(&url));
    assert_eq!(writer.writes(), 1);
}

#[tokio::test]
async fn test_content_url_matches_put() {
    let tmp = tempfile::tempdir().unwrap();
    let file = FileLoader::new(tmp.path());
    let computed = file.content_url(b"same bytes").await.unwrap();
    assert!(file.list().await.unwrap().is_empty());
    assert_eq!(file.put(b"same bytes".to_vec()).await.unwrap(), computed);

    let memory = MemoryLoader::new("ipfs");
    let computed = memory.content_url(b"same bytes").await.unwrap();
    assert_eq!(memory.writes(), 0);
    assert_eq!(memory.put(b"same bytes".to_vec()).await.unwrap(), computed);
}
