//! src/services/image_service.rs
//!
//! ImageService — image metadata in SQLite, image bytes on local disk as
//! `storage_root/{unique_name}{extension}`. The `images` table is the source
//! of truth for existence; the storage root only ever holds blobs for rows
//! that were committed (plus short-lived `.tmp-*` files while writing).

use super::{identifier::generate_identifier, validation};
use crate::models::image::{
    ImageLookup, ImageQuery, ImageRecord, ImageView, InsertedImage, NewImage, PageRequest,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut, stream};
use sqlx::{SqliteConnection, SqlitePool};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image name: must not be empty")]
    InvalidName,
    #[error("invalid image extension `{0}`")]
    InvalidExtension(String),
    #[error("the limit has to be between 1 and 100, got {0}")]
    InvalidLimit(i64),
    #[error("the offset has to be greater than or equal to 0, got {0}")]
    InvalidOffset(i64),
    #[error("unexpected argument {0}")]
    UnexpectedArgument(String),
    #[error("invalid image url `{0}`")]
    InvalidUrl(String),
    #[error("cannot find image with id {0}")]
    ImageNotFound(i64),
    #[error("cannot find image at url `{0}`")]
    BlobNotFound(String),
    #[error("image {id} has no blob at `{}`", .path.display())]
    MissingBlob { id: i64, path: PathBuf },
    #[error("{0}")]
    Inconsistent(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Coarse classification of `ImageError`, used by callers that only care
/// about which class of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageErrorKind {
    /// Malformed or out-of-range input. Nothing was touched.
    Validation,
    /// The referenced image does not exist.
    NotFound,
    /// A row and its blob disagree, or a mutation hit an unexpected row count.
    Consistency,
    /// The database or filesystem failed.
    Io,
}

impl ImageError {
    pub fn kind(&self) -> ImageErrorKind {
        match self {
            ImageError::InvalidName
            | ImageError::InvalidExtension(_)
            | ImageError::InvalidLimit(_)
            | ImageError::InvalidOffset(_)
            | ImageError::UnexpectedArgument(_)
            | ImageError::InvalidUrl(_) => ImageErrorKind::Validation,
            ImageError::ImageNotFound(_) | ImageError::BlobNotFound(_) => {
                ImageErrorKind::NotFound
            }
            ImageError::MissingBlob { .. } | ImageError::Inconsistent(_) => {
                ImageErrorKind::Consistency
            }
            ImageError::Sqlx(_) | ImageError::Io(_) => ImageErrorKind::Io,
        }
    }
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Produces storage identifiers. Swappable so collision handling can be tested.
pub type IdentifierGenerator = fn() -> String;

/// ImageService provides the image operations:
/// - Insert an image (writes the blob, inserts the row, publishes the blob)
/// - Get one image by id or list a page of images
/// - Replace the content of an existing image
/// - Remove an image (row first, then blob)
/// - Create / drop the `images` table
#[derive(Clone)]
pub struct ImageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Directory holding one file per image.
    pub storage_root: PathBuf,

    generate_id: IdentifierGenerator,
}

const MAX_IDENTIFIER_ATTEMPTS: usize = 3;

const SELECT_IMAGE: &str = "SELECT id, name, unique_name, extension FROM images";

impl ImageService {
    /// Create a new ImageService backed by the provided SQLite pool and
    /// using `storage_root` as the directory for image blobs.
    pub fn new(db: Arc<SqlitePool>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            db,
            storage_root: storage_root.into(),
            generate_id: generate_identifier,
        }
    }

    #[cfg(test)]
    fn with_identifier_generator(mut self, generate_id: IdentifierGenerator) -> Self {
        self.generate_id = generate_id;
        self
    }

    fn blob_path(&self, file_name: &str) -> PathBuf {
        self.storage_root.join(file_name)
    }

    fn temp_path(&self) -> PathBuf {
        self.storage_root.join(format!(".tmp-{}", Uuid::new_v4()))
    }

    /// Create the `images` table if it does not exist yet.
    pub async fn create_table(&self) -> ImageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS images (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL,
                 unique_name TEXT NOT NULL UNIQUE,
                 extension TEXT NOT NULL
             )",
        )
        .execute(&*self.db)
        .await?;
        debug!("ensured table `images` exists");
        Ok(())
    }

    /// Drop the `images` table. Fails if the table is absent.
    ///
    /// Blobs under the storage root are left untouched.
    pub async fn delete_table(&self) -> ImageResult<()> {
        sqlx::query("DROP TABLE images").execute(&*self.db).await?;
        info!("dropped table `images`");
        Ok(())
    }

    /// Fetch an image row by id. Returns ImageNotFound if missing.
    async fn fetch_image(&self, id: i64) -> ImageResult<ImageRecord> {
        sqlx::query_as::<_, ImageRecord>(&format!("{SELECT_IMAGE} WHERE id = ?"))
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ImageError::ImageNotFound(id),
                other => ImageError::Sqlx(other),
            })
    }

    /// Return the blob path of `record`, or MissingBlob if it is not on disk.
    async fn ensure_blob_present(&self, record: &ImageRecord) -> ImageResult<PathBuf> {
        let path = self.blob_path(&record.blob_file_name());
        if fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(ImageError::MissingBlob {
                id: record.id,
                path,
            })
        }
    }

    /// Dispatch on the query shape: one view by id, or a page of views.
    pub async fn get(&self, query: ImageQuery) -> ImageResult<ImageLookup> {
        match query {
            ImageQuery::ById(id) => self.get_by_id(id).await.map(ImageLookup::Single),
            ImageQuery::Page(page) => self.list_page(page).await.map(ImageLookup::Page),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> ImageResult<ImageView> {
        let record = self.fetch_image(id).await?;
        self.ensure_blob_present(&record).await?;
        Ok(record.view())
    }

    /// List at most `page.limit` images after skipping `page.offset`, by
    /// ascending id.
    pub async fn list_page(&self, page: PageRequest) -> ImageResult<Vec<ImageView>> {
        validation::ensure_page_valid(&page)?;

        let rows = sqlx::query_as::<_, ImageRecord>(&format!(
            "{SELECT_IMAGE} ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&*self.db)
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for record in &rows {
            self.ensure_blob_present(record).await?;
            views.push(record.view());
        }
        Ok(views)
    }

    /// Stream-insert a new image.
    ///
    /// - Writes the bytes to a temporary file and fsyncs it.
    /// - Inserts the row inside a transaction, regenerating the storage
    ///   identifier on collision.
    /// - Renames the temporary file to `{unique_name}{extension}`.
    /// - Commits, so the row only becomes visible once its blob is in place.
    ///
    /// Validation happens before anything is written. A failed rename rolls
    /// the row back; a failed commit removes the published blob again.
    pub async fn insert<S>(&self, metadata: NewImage, content: S) -> ImageResult<InsertedImage>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        validation::ensure_metadata_valid(&metadata)?;

        fs::create_dir_all(&self.storage_root).await?;
        let tmp_path = self.temp_path();
        let size_bytes = match write_temp_blob(&tmp_path, content).await {
            Ok(size) => size,
            Err(err) => {
                discard_temp(&tmp_path).await;
                return Err(ImageError::Io(err));
            }
        };

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                discard_temp(&tmp_path).await;
                return Err(ImageError::Sqlx(err));
            }
        };

        let record = match self.insert_row(&mut *tx, &metadata).await {
            Ok(record) => record,
            Err(err) => {
                discard_temp(&tmp_path).await;
                return Err(err);
            }
        };

        let blob_path = self.blob_path(&record.blob_file_name());
        if let Err(err) = fs::rename(&tmp_path, &blob_path).await {
            discard_temp(&tmp_path).await;
            if let Err(db_err) = tx.rollback().await {
                warn!("rollback of image {} failed: {}", record.id, db_err);
            }
            return Err(ImageError::Io(err));
        }

        if let Err(err) = tx.commit().await {
            if let Err(fs_err) = fs::remove_file(&blob_path).await {
                warn!(
                    "blob {} left without row after failed commit: {}",
                    blob_path.display(),
                    fs_err
                );
            }
            return Err(ImageError::Sqlx(err));
        }

        info!(
            id = record.id,
            url = %record.blob_file_name(),
            size_bytes,
            "stored image"
        );
        Ok(InsertedImage { id: record.id })
    }

    /// Insert an image with no content, producing a zero-length blob.
    pub async fn insert_empty(&self, metadata: NewImage) -> ImageResult<InsertedImage> {
        self.insert(metadata, stream::empty::<io::Result<Bytes>>()).await
    }

    async fn insert_row(
        &self,
        conn: &mut SqliteConnection,
        metadata: &NewImage,
    ) -> ImageResult<ImageRecord> {
        for attempt in 1..=MAX_IDENTIFIER_ATTEMPTS {
            let unique_name = (self.generate_id)();
            let inserted = sqlx::query_scalar::<_, i64>(
                "INSERT INTO images (name, unique_name, extension)
                 VALUES (?, ?, ?)
                 RETURNING id",
            )
            .bind(&metadata.name)
            .bind(&unique_name)
            .bind(&metadata.extension)
            .fetch_optional(&mut *conn)
            .await;

            match inserted {
                Ok(Some(id)) => {
                    return Ok(ImageRecord {
                        id,
                        name: metadata.name.clone(),
                        unique_name,
                        extension: metadata.extension.clone(),
                    });
                }
                Ok(None) => {
                    return Err(ImageError::Inconsistent(
                        "unable to insert entry into table `images`".into(),
                    ));
                }
                Err(err) if is_unique_violation(&err) => {
                    debug!(attempt, "storage identifier {} already taken", unique_name);
                }
                Err(err) => return Err(ImageError::Sqlx(err)),
            }
        }

        Err(ImageError::Inconsistent(format!(
            "no free storage identifier after {MAX_IDENTIFIER_ATTEMPTS} attempts"
        )))
    }

    async fn delete_row(&self, id: i64) -> ImageResult<u64> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Replace the content of an existing image.
    ///
    /// Metadata is untouched. The new bytes go to a temporary file that is
    /// renamed over the old blob once fully synced.
    pub async fn update<S>(&self, id: i64, content: S) -> ImageResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let record = self.fetch_image(id).await?;
        let blob_path = self.ensure_blob_present(&record).await?;

        let tmp_path = self.temp_path();
        let size_bytes = match write_temp_blob(&tmp_path, content).await {
            Ok(size) => size,
            Err(err) => {
                discard_temp(&tmp_path).await;
                return Err(ImageError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &blob_path).await {
            discard_temp(&tmp_path).await;
            return Err(ImageError::Io(err));
        }

        info!(id, size_bytes, "replaced image content");
        Ok(())
    }

    /// Remove an image: the row first, then the blob.
    ///
    /// A blob that is already gone is reported as MissingBlob; the row stays
    /// deleted either way.
    pub async fn remove(&self, id: i64) -> ImageResult<ImageView> {
        let record = self.fetch_image(id).await?;

        if self.delete_row(id).await? != 1 {
            return Err(ImageError::Inconsistent(format!(
                "unable to delete image with id {id}"
            )));
        }

        let blob_path = self.blob_path(&record.blob_file_name());
        match fs::remove_file(&blob_path).await {
            Ok(()) => debug!("removed blob {}", blob_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ImageError::MissingBlob {
                    id,
                    path: blob_path,
                });
            }
            Err(err) => return Err(ImageError::Io(err)),
        }

        info!(id, "removed image");
        Ok(record.view())
    }

    /// Open the blob behind a public url (`unique_name + extension`).
    ///
    /// Only blobs that belong to a row are served.
    pub async fn open_blob(&self, url: &str) -> ImageResult<(ImageRecord, File)> {
        validation::ensure_url_safe(url)?;

        let record = sqlx::query_as::<_, ImageRecord>(&format!(
            "{SELECT_IMAGE} WHERE unique_name || extension = ?"
        ))
        .bind(url)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ImageError::BlobNotFound(url.to_string()))?;

        let path = self.blob_path(&record.blob_file_name());
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ImageError::MissingBlob {
                    id: record.id,
                    path: path.clone(),
                }
            } else {
                ImageError::Io(err)
            }
        })?;

        Ok((record, file))
    }
}

/// Drain `content` into a fresh file at `path`, flushed and fsynced.
/// Returns the number of bytes written.
async fn write_temp_blob<S>(path: &Path, content: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;
    pin_mut!(content);
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(size_bytes)
}

async fn discard_temp(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!("failed to remove temporary blob {}: {}", path.display(), err);
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
