//! Most recent alarm images, optionally mirrored to a directory.

use alarm_server::{AlarmEvent, AlarmObserver, AttachedResource};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Number of images kept when nothing else is configured.
pub const DEFAULT_MAX_IMAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub received_at: DateTime<Local>,
    pub resource: AttachedResource,
    /// Where the image was written, if a snapshot directory is configured
    pub path: Option<PathBuf>,
}

/// Ring of the newest `capacity` images; the oldest is evicted first.
pub struct SnapshotStore {
    capacity: usize,
    directory: Option<PathBuf>,
    images: Mutex<VecDeque<StoredImage>>,
    /// Numbers written files so equal names never collide
    written: AtomicU64,
}

impl SnapshotStore {
    pub fn new(capacity: usize, directory: Option<PathBuf>) -> Self {
        Self {
            capacity: capacity.max(1),
            directory,
            images: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            written: AtomicU64::new(0),
        }
    }

    /// Oldest first.
    pub async fn recent(&self) -> Vec<StoredImage> {
        self.images.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.images.lock().await.len()
    }

    async fn store(&self, resource: &AttachedResource) {
        let received_at = Local::now();
        let path = match &self.directory {
            Some(directory) => {
                let sequence = self.written.fetch_add(1, Ordering::Relaxed);
                write_image(directory, received_at, sequence, resource).await
            }
            None => None,
        };

        let mut images = self.images.lock().await;
        while images.len() >= self.capacity {
            images.pop_front();
        }
        images.push_back(StoredImage {
            received_at,
            resource: resource.clone(),
            path,
        });
        debug!(kept = images.len(), "Stored alarm image");
    }
}

async fn write_image(
    directory: &Path,
    received_at: DateTime<Local>,
    sequence: u64,
    resource: &AttachedResource,
) -> Option<PathBuf> {
    let path = directory.join(snapshot_file_name(received_at, sequence, &resource.file_name));

    if let Err(e) = tokio::fs::create_dir_all(directory).await {
        warn!(directory = %directory.display(), error = %e, "Cannot create snapshot directory");
        return None;
    }
    match tokio::fs::write(&path, &resource.data).await {
        Ok(()) => {
            info!(path = %path.display(), size = resource.len(), "Saved alarm image");
            Some(path)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to save alarm image");
            None
        }
    }
}

/// Timestamped file name that cannot escape the snapshot directory.
fn snapshot_file_name(received_at: DateTime<Local>, sequence: u64, original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("image.jpg");
    format!("{}-{sequence:04}_{base}", received_at.format("%Y%m%d-%H%M%S%.3f"))
}

#[async_trait]
impl AlarmObserver for SnapshotStore {
    async fn on_alarm(&self, _event: &AlarmEvent) {}

    async fn on_resource(&self, resource: &AttachedResource) {
        if !resource.is_image() {
            debug!(file_name = %resource.file_name, "Ignoring non-image attachment");
            return;
        }
        self.store(resource).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;

    fn image(name: &str) -> AttachedResource {
        AttachedResource {
            file_name: name.to_string(),
            content_type: Some("image/jpeg".to_string()),
            data: Bytes::from(name.as_bytes().to_vec()),
        }
    }

    #[tokio::test]
    async fn test_keeps_most_recent_images() {
        let store = SnapshotStore::new(DEFAULT_MAX_IMAGES, None);
        for i in 0..15 {
            store.on_resource(&image(&format!("img{i}.jpg"))).await;
        }

        let recent = store.recent().await;
        assert_eq!(recent.len(), DEFAULT_MAX_IMAGES);
        assert_eq!(recent[0].resource.file_name, "img5.jpg");
        assert_eq!(recent[9].resource.file_name, "img14.jpg");
        assert!(recent.iter().all(|stored| stored.path.is_none()));
    }

    #[tokio::test]
    async fn test_ignores_non_images() {
        let store = SnapshotStore::new(2, None);
        store
            .on_resource(&AttachedResource {
                file_name: "notes.txt".to_string(),
                content_type: Some("text/plain".to_string()),
                data: Bytes::from_static(b"text"),
            })
            .await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_writes_to_directory() {
        let directory = std::env::temp_dir().join(format!("hk-snapshots-{}", std::process::id()));
        let store = SnapshotStore::new(2, Some(directory.clone()));

        store.on_resource(&image("thermal.jpg")).await;

        let recent = store.recent().await;
        let path = recent[0].path.clone().expect("image should have been written");
        assert!(path.starts_with(&directory));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"thermal.jpg");

        tokio::fs::remove_dir_all(&directory).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_name_images_are_not_overwritten() {
        let directory = std::env::temp_dir().join(format!("hk-snapshots-dup-{}", std::process::id()));
        let store = SnapshotStore::new(4, Some(directory.clone()));

        let first = AttachedResource {
            data: Bytes::from_static(b"first"),
            ..image("picture.jpg")
        };
        let second = AttachedResource {
            data: Bytes::from_static(b"second"),
            ..image("picture.jpg")
        };
        store.on_resource(&first).await;
        store.on_resource(&second).await;

        let paths: Vec<PathBuf> = store
            .recent()
            .await
            .into_iter()
            .map(|stored| stored.path.expect("image should have been written"))
            .collect();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
        assert_eq!(tokio::fs::read(&paths[0]).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&paths[1]).await.unwrap(), b"second");

        tokio::fs::remove_dir_all(&directory).await.unwrap();
    }

    #[test]
    fn test_snapshot_file_name_strips_directories() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap();
        assert_eq!(
            snapshot_file_name(at, 3, "../../etc/thermal.jpg"),
            "20240301-101530.000-0003_thermal.jpg"
        );
        assert_eq!(snapshot_file_name(at, 0, ""), "20240301-101530.000-0000_image.jpg");
    }
}
