use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{info, warn};
use uuid::Uuid;

use super::{content_disposition, LocalStorage, ObjectStorage, StorageError};

const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Column width shared by `original_name` and `stored_name`.
pub const MAX_FILENAME_CHARS: usize = 255;
const LOCAL_PREFIX_CHARS: usize = 33;
const KEY_PREFIX_CHARS: usize = 13;
const MAX_EXTENSION_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Database,
    Local,
    Remote,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Database => "database",
            StorageKind::Local => "local",
            StorageKind::Remote => "s3",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "database" => Ok(StorageKind::Database),
            "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::Remote),
            other => Err(StorageError::Inconsistent(format!(
                "unknown storage kind {other}"
            ))),
        }
    }
}

/// Inline up to the threshold; above it prefer the remote store, else local disk.
pub fn choose_placement(size: u64, inline_max: u64, remote_available: bool) -> StorageKind {
    if size <= inline_max {
        StorageKind::Database
    } else if remote_available {
        StorageKind::Remote
    } else {
        StorageKind::Local
    }
}

pub fn safe_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|ch| match ch {
            ' ' => Some('_'),
            '(' | ')' | '#' | '"' | '?' | '%' | '*' | ':' | '<' | '>' | '|' => None,
            ch if ch.is_control() => None,
            ch => Some(ch),
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Shortens the stem so the name fits in `max_chars`, keeping a short extension.
pub fn fit_filename(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }
    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.chars().count() < MAX_EXTENSION_CHARS =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    };
    match extension {
        Some(ext) => {
            let budget = max_chars.saturating_sub(ext.chars().count() + 1);
            let stem: String = stem.chars().take(budget).collect();
            format!("{stem}.{ext}")
        }
        None => stem.chars().take(max_chars).collect(),
    }
}

/// `{folders/<id>|projects/<id>|uploads}/YYYY/MM/DD/<12 hex>_<safe name>`
pub fn object_key(
    folder_id: Option<Uuid>,
    project_id: Option<Uuid>,
    original_name: &str,
    now: DateTime<Utc>,
    unique: Uuid,
) -> String {
    let scope = match (folder_id, project_id) {
        (Some(folder_id), _) => format!("folders/{folder_id}"),
        (None, Some(project_id)) => format!("projects/{project_id}"),
        (None, None) => "uploads".to_string(),
    };
    let simple = unique.simple().to_string();
    format!(
        "{scope}/{}/{}_{}",
        now.format("%Y/%m/%d"),
        &simple[..12],
        fit_filename(
            &safe_filename(original_name),
            MAX_FILENAME_CHARS - KEY_PREFIX_CHARS
        )
    )
}

fn local_name(original_name: &str) -> String {
    format!(
        "{}_{}",
        Uuid::new_v4().simple(),
        fit_filename(
            &safe_filename(original_name),
            MAX_FILENAME_CHARS - LOCAL_PREFIX_CHARS
        )
    )
}

pub struct RemoteTarget {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    public_base: String,
}

impl RemoteTarget {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        region: &str,
        endpoint: Option<&str>,
    ) -> Self {
        let bucket = bucket.into();
        let public_base = match endpoint {
            Some(endpoint) => format!("{}/{bucket}", endpoint.trim_end_matches('/')),
            None => format!("https://{bucket}.s3.{region}.amazonaws.com"),
        };
        Self {
            storage,
            bucket,
            public_base,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn public_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.public_base, encoded.join("/"))
    }
}

pub struct UploadRequest {
    pub bytes: Bytes,
    pub original_name: String,
    pub content_type: Option<String>,
    pub folder_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

/// Where a newly stored file lives; exactly one payload per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredLocation {
    Inline(Vec<u8>),
    Local {
        path: String,
    },
    Remote {
        key: String,
        url: String,
        bucket: String,
    },
}

impl StoredLocation {
    pub fn kind(&self) -> StorageKind {
        match self {
            StoredLocation::Inline(_) => StorageKind::Database,
            StoredLocation::Local { .. } => StorageKind::Local,
            StoredLocation::Remote { .. } => StorageKind::Remote,
        }
    }

    pub fn artifact(&self) -> Artifact {
        match self {
            StoredLocation::Inline(_) => Artifact::Inline,
            StoredLocation::Local { path } => Artifact::Local(path.clone()),
            StoredLocation::Remote { key, .. } => Artifact::Remote(key.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    PersistedWithWarning(String),
}

impl PersistOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PersistOutcome::Persisted => "stored",
            PersistOutcome::PersistedWithWarning(_) => "stored_with_warning",
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            PersistOutcome::Persisted => None,
            PersistOutcome::PersistedWithWarning(message) => Some(message.as_str()),
        }
    }
}

#[derive(Debug)]
pub struct Placement {
    pub stored_name: String,
    pub location: StoredLocation,
    pub outcome: PersistOutcome,
}

/// Handle to the bytes of an existing file record, without the inline payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Inline,
    Local(String),
    Remote(String),
}

impl Artifact {
    pub fn from_record(
        storage_kind: &str,
        local_path: Option<&str>,
        s3_key: Option<&str>,
    ) -> Result<Self, StorageError> {
        match (storage_kind.parse::<StorageKind>()?, local_path, s3_key) {
            (StorageKind::Database, _, _) => Ok(Artifact::Inline),
            (StorageKind::Local, Some(path), _) => Ok(Artifact::Local(path.to_string())),
            (StorageKind::Remote, _, Some(key)) => Ok(Artifact::Remote(key.to_string())),
            (kind, _, _) => Err(StorageError::Inconsistent(format!(
                "{kind} record is missing its storage location"
            ))),
        }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            Artifact::Inline => StorageKind::Database,
            Artifact::Local(_) => StorageKind::Local,
            Artifact::Remote(_) => StorageKind::Remote,
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            Artifact::Inline => "inline",
            Artifact::Local(path) => path.as_str(),
            Artifact::Remote(key) => key.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Remote files are handed out as presigned URLs.
    Download,
    /// Remote files are proxied so they can render inline.
    Preview,
}

#[derive(Debug)]
pub enum Retrieved {
    /// Bytes live in the file row itself.
    InlineColumn,
    Bytes(Vec<u8>),
    Redirect(String),
}

/// Places, fetches and removes file bytes across the inline, local and remote backends.
pub struct FileStore {
    inline_max: u64,
    local: LocalStorage,
    remote: Option<RemoteTarget>,
    presign_expiry: Duration,
}

impl FileStore {
    pub fn new(
        inline_max: u64,
        local: LocalStorage,
        remote: Option<RemoteTarget>,
        presign_expiry: Duration,
    ) -> Self {
        Self {
            inline_max,
            local,
            remote,
            presign_expiry,
        }
    }

    pub fn inline_max(&self) -> u64 {
        self.inline_max
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    pub fn remote(&self) -> Option<&RemoteTarget> {
        self.remote.as_ref()
    }

    pub async fn store(&self, upload: UploadRequest) -> Result<Placement, StorageError> {
        let size = upload.bytes.len() as u64;
        let kind = choose_placement(size, self.inline_max, self.remote.is_some());

        match (kind, self.remote.as_ref()) {
            (StorageKind::Database, _) => Ok(Placement {
                stored_name: local_name(&upload.original_name),
                location: StoredLocation::Inline(upload.bytes.to_vec()),
                outcome: PersistOutcome::Persisted,
            }),
            (StorageKind::Remote, Some(remote)) => self.store_remote(remote, upload).await,
            _ => self.store_local(&upload).await,
        }
    }

    async fn store_remote(
        &self,
        remote: &RemoteTarget,
        upload: UploadRequest,
    ) -> Result<Placement, StorageError> {
        let key = object_key(
            upload.folder_id,
            upload.project_id,
            &upload.original_name,
            Utc::now(),
            Uuid::new_v4(),
        );
        let disposition = content_disposition("inline", &upload.original_name);

        match remote
            .storage
            .put_object(
                &key,
                upload.bytes.clone(),
                upload.content_type.clone(),
                disposition,
            )
            .await
        {
            Ok(()) => {
                info!(key = %key, bucket = %remote.bucket, size = upload.bytes.len(), "stored file in remote storage");
                let stored_name = key.rsplit('/').next().unwrap_or(&key).to_string();
                Ok(Placement {
                    stored_name,
                    location: StoredLocation::Remote {
                        url: remote.public_url(&key),
                        bucket: remote.bucket.clone(),
                        key,
                    },
                    outcome: PersistOutcome::Persisted,
                })
            }
            Err(err) => {
                warn!(key = %key, error = %err, "remote upload failed, falling back to local storage");
                let mut placement = self.store_local(&upload).await?;
                placement.outcome = PersistOutcome::PersistedWithWarning(format!(
                    "remote storage unavailable, file kept on local disk: {err}"
                ));
                Ok(placement)
            }
        }
    }

    async fn store_local(&self, upload: &UploadRequest) -> Result<Placement, StorageError> {
        let name = local_name(&upload.original_name);
        self.local.write(&name, &upload.bytes).await?;
        Ok(Placement {
            stored_name: name.clone(),
            location: StoredLocation::Local { path: name },
            outcome: PersistOutcome::Persisted,
        })
    }

    pub async fn open(
        &self,
        artifact: &Artifact,
        delivery: Delivery,
    ) -> Result<Retrieved, StorageError> {
        match artifact {
            Artifact::Inline => Ok(Retrieved::InlineColumn),
            Artifact::Local(path) => Ok(Retrieved::Bytes(self.local.read(path).await?)),
            Artifact::Remote(key) => {
                let remote = self.require_remote()?;
                match delivery {
                    Delivery::Download => remote
                        .storage
                        .presign_get_object(key, self.presign_expiry)
                        .await
                        .map(Retrieved::Redirect)
                        .map_err(|err| StorageError::Remote(err.to_string())),
                    Delivery::Preview => remote
                        .storage
                        .get_object(key)
                        .await
                        .map(Retrieved::Bytes)
                        .map_err(|err| StorageError::Remote(err.to_string())),
                }
            }
        }
    }

    pub async fn remove(&self, artifact: &Artifact) -> Result<(), StorageError> {
        match artifact {
            Artifact::Inline => Ok(()),
            Artifact::Local(path) => self.local.delete(path).await,
            Artifact::Remote(key) => self
                .require_remote()?
                .storage
                .delete_object(key)
                .await
                .map_err(|err| StorageError::Remote(err.to_string())),
        }
    }

    pub async fn exists(&self, artifact: &Artifact) -> Result<bool, StorageError> {
        match artifact {
            Artifact::Inline => Ok(true),
            Artifact::Local(path) => self.local.exists(path).await,
            Artifact::Remote(key) => self
                .require_remote()?
                .storage
                .object_exists(key)
                .await
                .map_err(|err| StorageError::Remote(err.to_string())),
        }
    }

    fn require_remote(&self) -> Result<&RemoteTarget, StorageError> {
        self.remote
            .as_ref()
            .ok_or_else(|| StorageError::Remote("remote storage is not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::{anyhow, bail};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Mutex;

    use super::*;

    const THRESHOLD: u64 = 16;

    #[derive(Default)]
    struct MemoryObjects {
        objects: Mutex<HashMap<String, Bytes>>,
        unreachable: bool,
    }

    impl MemoryObjects {
        fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Self::default()
            }
        }

        async fn len(&self) -> usize {
            self.objects.lock().await.len()
        }
    }

    #[async_trait]
    impl ObjectStorage for MemoryObjects {
        async fn put_object(
            &self,
            key: &str,
            bytes: Bytes,
            _content_type: Option<String>,
            _content_disposition: Option<String>,
        ) -> anyhow::Result<()> {
            if self.unreachable {
                bail!("connection refused");
            }
            self.objects.lock().await.insert(key.to_string(), bytes);
            Ok(())
        }

        async fn presign_get_object(
            &self,
            key: &str,
            expires_in: Duration,
        ) -> anyhow::Result<String> {
            Ok(format!("https://signed/{key}?ttl={}", expires_in.as_secs()))
        }

        async fn get_object(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            self.objects
                .lock()
                .await
                .get(key)
                .map(|bytes| bytes.to_vec())
                .ok_or_else(|| anyhow!("missing {key}"))
        }

        async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
            if self.unreachable {
                bail!("connection refused");
            }
            self.objects.lock().await.remove(key);
            Ok(())
        }

        async fn object_exists(&self, key: &str) -> anyhow::Result<bool> {
            Ok(self.objects.lock().await.contains_key(key))
        }

        async fn probe(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn upload(size: usize) -> UploadRequest {
        UploadRequest {
            bytes: Bytes::from(vec![7u8; size]),
            original_name: "site plan (v2).pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            folder_id: None,
            project_id: None,
        }
    }

    fn store_with(
        dir: &tempfile::TempDir,
        remote: Option<Arc<MemoryObjects>>,
    ) -> FileStore {
        let remote = remote.map(|objects| {
            let storage: Arc<dyn ObjectStorage> = objects;
            RemoteTarget::new(storage, "hvac-files", "sa-east-1", None)
        });
        FileStore::new(
            THRESHOLD,
            LocalStorage::new(dir.path()),
            remote,
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn placement_threshold_is_inclusive() {
        assert_eq!(choose_placement(0, THRESHOLD, true), StorageKind::Database);
        assert_eq!(choose_placement(16, THRESHOLD, true), StorageKind::Database);
        assert_eq!(choose_placement(17, THRESHOLD, true), StorageKind::Remote);
        assert_eq!(choose_placement(17, THRESHOLD, false), StorageKind::Local);
    }

    #[test]
    fn object_keys_are_scoped_by_parent_and_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let unique = Uuid::parse_str("0123456789ab4def8123456789abcdef").unwrap();
        let folder = Uuid::new_v4();
        let project = Uuid::new_v4();

        assert_eq!(
            object_key(None, None, "a b.pdf", now, unique),
            "uploads/2024/03/09/0123456789ab_a_b.pdf"
        );
        assert_eq!(
            object_key(Some(folder), Some(project), "x.png", now, unique),
            format!("folders/{folder}/2024/03/09/0123456789ab_x.png")
        );
        assert_eq!(
            object_key(None, Some(project), "x.png", now, unique),
            format!("projects/{project}/2024/03/09/0123456789ab_x.png")
        );
    }

    #[test]
    fn safe_filename_strips_unsafe_characters() {
        assert_eq!(safe_filename("site plan (v2) #3.pdf"), "site_plan_v2_3.pdf");
        assert_eq!(safe_filename("../../etc/passwd"), "passwd");
        assert_eq!(safe_filename("C:\\docs\\orçamento.xlsx"), "orçamento.xlsx");
        assert_eq!(safe_filename("..."), "file");
    }

    #[test]
    fn long_names_are_shortened_to_fit_the_column() {
        let long = format!("{}.pdf", "a".repeat(300));
        let fitted = fit_filename(&long, 222);
        assert_eq!(fitted.chars().count(), 222);
        assert!(fitted.ends_with("a.pdf"));
        assert_eq!(fit_filename("short.pdf", 222), "short.pdf");
        assert_eq!(fit_filename(&"ç".repeat(40), 10), "ç".repeat(10));

        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let key = object_key(None, None, &long, now, Uuid::new_v4());
        let basename = key.rsplit('/').next().unwrap();
        assert_eq!(basename.chars().count(), MAX_FILENAME_CHARS);
        assert!(basename.ends_with(".pdf"));
        assert_eq!(local_name(&long).chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn public_url_uses_virtual_host_or_endpoint() {
        let objects: Arc<dyn ObjectStorage> = Arc::new(MemoryObjects::default());
        let aws = RemoteTarget::new(objects.clone(), "bucket", "us-east-1", None);
        assert_eq!(
            aws.public_url("uploads/2024/01/01/abc_relatório.pdf"),
            "https://bucket.s3.us-east-1.amazonaws.com/uploads/2024/01/01/abc_relat%C3%B3rio.pdf"
        );
        let minio = RemoteTarget::new(objects, "bucket", "us-east-1", Some("http://minio:9000/"));
        assert_eq!(minio.public_url("k/a.txt"), "http://minio:9000/bucket/k/a.txt");
    }

    #[tokio::test]
    async fn small_files_stay_inline_without_side_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(MemoryObjects::default());
        let store = store_with(&dir, Some(objects.clone()));

        let placement = store.store(upload(THRESHOLD as usize)).await.unwrap();

        assert_eq!(placement.location.kind(), StorageKind::Database);
        assert_eq!(placement.outcome, PersistOutcome::Persisted);
        assert!(matches!(&placement.location, StoredLocation::Inline(bytes) if bytes.len() == 16));
        assert_eq!(objects.len().await, 0);
        assert!(store.local().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_files_go_remote_when_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(MemoryObjects::default());
        let store = store_with(&dir, Some(objects.clone()));

        let placement = store.store(upload(64)).await.unwrap();

        let StoredLocation::Remote { key, url, bucket } = &placement.location else {
            panic!("expected remote placement, got {:?}", placement.location.kind());
        };
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with("_site_plan_v2.pdf"));
        assert_eq!(bucket, "hvac-files");
        assert!(url.starts_with("https://hvac-files.s3.sa-east-1.amazonaws.com/uploads/"));
        assert_eq!(placement.outcome, PersistOutcome::Persisted);
        assert_eq!(objects.len().await, 1);
        assert!(store.local().list().await.unwrap().is_empty());

        let artifact = placement.location.artifact();
        assert!(store.exists(&artifact).await.unwrap());
        assert!(matches!(
            store.open(&artifact, Delivery::Download).await.unwrap(),
            Retrieved::Redirect(url) if url.contains("ttl=3600")
        ));
        assert!(matches!(
            store.open(&artifact, Delivery::Preview).await.unwrap(),
            Retrieved::Bytes(bytes) if bytes.len() == 64
        ));
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_to_local_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(MemoryObjects::unreachable());
        let store = store_with(&dir, Some(objects.clone()));

        let placement = store.store(upload(64)).await.unwrap();

        assert_eq!(placement.location.kind(), StorageKind::Local);
        assert_eq!(placement.outcome.label(), "stored_with_warning");
        assert!(placement
            .outcome
            .warning()
            .is_some_and(|w| w.contains("connection refused")));
        assert_eq!(objects.len().await, 0);
        assert_eq!(store.local().list().await.unwrap(), vec![placement.stored_name]);
    }

    #[tokio::test]
    async fn large_files_go_local_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, None);

        let placement = store.store(upload(64)).await.unwrap();
        let artifact = placement.location.artifact();

        assert_eq!(artifact.kind(), StorageKind::Local);
        assert_eq!(placement.outcome, PersistOutcome::Persisted);
        assert!(matches!(
            store.open(&artifact, Delivery::Download).await.unwrap(),
            Retrieved::Bytes(bytes) if bytes == vec![7u8; 64]
        ));

        store.remove(&artifact).await.unwrap();
        assert!(!store.exists(&artifact).await.unwrap());
    }

    #[tokio::test]
    async fn remote_removal_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, Some(Arc::new(MemoryObjects::unreachable())));

        let result = store.remove(&Artifact::Remote("uploads/x".to_string())).await;
        assert!(matches!(result, Err(StorageError::Remote(_))));

        let without_remote = store_with(&dir, None);
        assert!(without_remote
            .remove(&Artifact::Remote("uploads/x".to_string()))
            .await
            .is_err());
        assert!(without_remote.remove(&Artifact::Inline).await.is_ok());
    }

    #[test]
    fn artifacts_require_their_location() {
        assert_eq!(
            Artifact::from_record("local", Some("a.pdf"), None).unwrap(),
            Artifact::Local("a.pdf".to_string())
        );
        assert_eq!(
            Artifact::from_record("database", None, None).unwrap(),
            Artifact::Inline
        );
        assert!(Artifact::from_record("s3", None, None).is_err());
        assert!(Artifact::from_record("ftp", None, None).is_err());
    }
}
