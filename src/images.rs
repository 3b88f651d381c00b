//! Image generation, favorites and collections
//!
//! `ImageStore` is the SQL side. `ImageService` wraps it with the daily
//! quota, the generator backend and local downloads.

use crate::db::{now_ts, start_of_day_ts, Database};
use crate::error::{BotError, BotResult};
use crate::llm::ImageGenerator;
use crate::users::html_escape;
use reqwest::Client;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MAX_BATCH: u32 = 4;
pub const DEFAULT_SIZE: &str = "1024x1024";

/// Outcome of one `/image` request. A failure after the first image keeps
/// what was already generated; only recorded images count toward the quota.
#[derive(Debug)]
pub struct ImageBatch {
    pub images: Vec<GeneratedImage>,
    pub requested: u32,
    pub error: Option<BotError>,
}

impl ImageBatch {
    /// Note for the user when the batch stopped early
    pub fn warning(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        Some(format!(
            "⚠️ Generated {} of {} images. The rest failed: {}\n\
             Only the generated images count toward your daily limit.",
            self.images.len(),
            self.requested,
            error.user_message()
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub prompt: String,
    pub image_url: String,
    pub local_path: Option<String>,
    pub model: String,
    pub size: String,
    pub is_favorite: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub image_count: i64,
}

/// Who a collection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOwner {
    User(i64),
    Chat(i64),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageStats {
    pub total: i64,
    pub today: i64,
    pub favorites: i64,
    pub daily_limit: u32,
    pub remaining_today: u32,
}

pub struct ImageStore {
    db: Arc<Database>,
}

const IMAGE_COLUMNS: &str =
    "id, user_id, chat_id, prompt, image_url, local_path, model, size, is_favorite, created_at";

impl ImageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        user_id: i64,
        chat_id: i64,
        prompt: &str,
        image_url: &str,
        local_path: Option<&str>,
        model: &str,
        size: &str,
    ) -> BotResult<i64> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO generated_images
                (user_id, chat_id, prompt, image_url, local_path, model, size, is_favorite, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![user_id, chat_id, prompt, image_url, local_path, model, size, now_ts()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, image_id: i64) -> BotResult<Option<GeneratedImage>> {
        let image = self
            .db
            .conn()
            .query_row(
                &format!("SELECT {} FROM generated_images WHERE id = ?1", IMAGE_COLUMNS),
                params![image_id],
                row_to_image,
            )
            .optional()?;
        Ok(image)
    }

    pub fn count_since(&self, user_id: i64, since: i64) -> BotResult<i64> {
        let count = self.db.conn().query_row(
            "SELECT COUNT(*) FROM generated_images WHERE user_id = ?1 AND created_at >= ?2",
            params![user_id, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn user_images(&self, user_id: i64, favorites_only: bool, limit: usize) -> BotResult<Vec<GeneratedImage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM generated_images
             WHERE user_id = ?1 AND (?2 = 0 OR is_favorite = 1)
             ORDER BY created_at DESC, id DESC LIMIT ?3",
            IMAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, favorites_only, limit as i64], row_to_image)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn chat_images(&self, chat_id: i64, limit: usize) -> BotResult<Vec<GeneratedImage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM generated_images WHERE chat_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            IMAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![chat_id, limit as i64], row_to_image)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Flip the favorite flag on the caller's own image, returning the new state
    pub fn toggle_favorite(&self, image_id: i64, user_id: i64) -> BotResult<bool> {
        let conn = self.db.conn();
        let current: Option<bool> = conn
            .query_row(
                "SELECT is_favorite FROM generated_images WHERE id = ?1 AND user_id = ?2",
                params![image_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| BotError::not_found(format!("image {}", image_id)))?;
        conn.execute(
            "UPDATE generated_images SET is_favorite = ?2 WHERE id = ?1",
            params![image_id, !current],
        )?;
        Ok(!current)
    }

    pub fn favorites(&self, user_id: i64) -> BotResult<Vec<GeneratedImage>> {
        self.user_images(user_id, true, 50)
    }

    pub fn create_collection(&self, name: &str, owner: CollectionOwner) -> BotResult<Collection> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::validation("Collection name cannot be empty"));
        }
        let (user_id, chat_id) = match owner {
            CollectionOwner::User(id) => (Some(id), None),
            CollectionOwner::Chat(id) => (None, Some(id)),
        };
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO image_collections (name, user_id, chat_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, user_id, chat_id, now_ts()],
        )?;
        Ok(Collection {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            user_id,
            chat_id,
            image_count: 0,
        })
    }

    pub fn collections(&self, owner: CollectionOwner) -> BotResult<Vec<Collection>> {
        let (column, id) = match owner {
            CollectionOwner::User(id) => ("user_id", id),
            CollectionOwner::Chat(id) => ("chat_id", id),
        };
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT c.id, c.name, c.user_id, c.chat_id,
                    (SELECT COUNT(*) FROM collection_images ci WHERE ci.collection_id = c.id)
             FROM image_collections c WHERE c.{} = ?1 ORDER BY c.created_at, c.id",
            column
        ))?;
        let rows = stmt.query_map(params![id], row_to_collection)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_collection(&self, collection_id: i64) -> BotResult<Option<Collection>> {
        let collection = self
            .db
            .conn()
            .query_row(
                "SELECT c.id, c.name, c.user_id, c.chat_id,
                        (SELECT COUNT(*) FROM collection_images ci WHERE ci.collection_id = c.id)
                 FROM image_collections c WHERE c.id = ?1",
                params![collection_id],
                row_to_collection,
            )
            .optional()?;
        Ok(collection)
    }

    /// Add an image. Personal collections take only the owner's images;
    /// group collections take images generated in that chat.
    /// Returns false when the image was already there.
    pub fn add_to_collection(&self, collection_id: i64, image_id: i64, user_id: i64) -> BotResult<bool> {
        let collection = self
            .get_collection(collection_id)?
            .ok_or_else(|| BotError::not_found(format!("collection {}", collection_id)))?;
        let image = self
            .get(image_id)?
            .ok_or_else(|| BotError::not_found(format!("image {}", image_id)))?;

        let allowed = match (collection.user_id, collection.chat_id) {
            (Some(owner), _) => owner == user_id && image.user_id == user_id,
            (None, Some(chat)) => image.chat_id == chat,
            (None, None) => false,
        };
        if !allowed {
            return Err(BotError::validation("You can't add that image to this collection"));
        }

        let inserted = self.db.conn().execute(
            "INSERT OR IGNORE INTO collection_images (collection_id, image_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![collection_id, image_id, now_ts()],
        )?;
        Ok(inserted > 0)
    }

    pub fn collection_images(&self, collection_id: i64) -> BotResult<Vec<GeneratedImage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT i.id, i.user_id, i.chat_id, i.prompt, i.image_url, i.local_path, i.model,
                    i.size, i.is_favorite, i.created_at
             FROM collection_images ci JOIN generated_images i ON i.id = ci.image_id
             WHERE ci.collection_id = ?1 ORDER BY ci.added_at DESC, i.id DESC",
        )?;
        let rows = stmt.query_map(params![collection_id], row_to_image)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self, user_id: i64, daily_limit: u32) -> BotResult<ImageStats> {
        let (total, favorites): (i64, i64) = self.db.conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_favorite), 0) FROM generated_images WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let today = self.count_since(user_id, start_of_day_ts())?;
        Ok(ImageStats {
            total,
            today,
            favorites,
            daily_limit,
            remaining_today: (daily_limit as i64 - today).max(0) as u32,
        })
    }

    /// Total generated images across users
    pub fn count_all(&self) -> BotResult<i64> {
        let count = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM generated_images", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeneratedImage> {
    Ok(GeneratedImage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chat_id: row.get(2)?,
        prompt: row.get(3)?,
        image_url: row.get(4)?,
        local_path: row.get(5)?,
        model: row.get(6)?,
        size: row.get(7)?,
        is_favorite: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
        chat_id: row.get(3)?,
        image_count: row.get(4)?,
    })
}

/// Quota-checked generation on top of `ImageStore`
pub struct ImageService {
    store: ImageStore,
    generator: Arc<dyn ImageGenerator>,
    model: String,
    daily_limit: u32,
    /// Where to keep local copies; `None` skips downloads
    images_dir: Option<PathBuf>,
    http: Client,
}

impl ImageService {
    pub fn new(
        db: Arc<Database>,
        generator: Arc<dyn ImageGenerator>,
        model: &str,
        daily_limit: u32,
        images_dir: Option<PathBuf>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            store: ImageStore::new(db),
            generator,
            model: model.to_string(),
            daily_limit,
            images_dir,
            http,
        }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub fn stats(&self, user_id: i64) -> BotResult<ImageStats> {
        self.store.stats(user_id, self.daily_limit)
    }

    /// Generate `count` images for one prompt, all or nothing on quota
    pub async fn generate(
        &self,
        user_id: i64,
        chat_id: i64,
        prompt: &str,
        count: u32,
    ) -> BotResult<ImageBatch> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BotError::validation("Please provide a prompt for image generation."));
        }
        if count == 0 || count > MAX_BATCH {
            return Err(BotError::validation(format!(
                "You can generate between 1 and {} images at once.",
                MAX_BATCH
            )));
        }
        let stats = self.stats(user_id)?;
        if stats.remaining_today < count {
            return Err(BotError::validation(format!(
                "Daily image limit reached. Remaining today: {}/{}. Try again tomorrow! ⏰",
                stats.remaining_today, self.daily_limit
            )));
        }

        let mut images = Vec::with_capacity(count as usize);
        let mut error = None;
        for n in 0..count {
            let url = match self.generator.generate_image(prompt, DEFAULT_SIZE).await {
                Ok(url) => url,
                Err(e) if images.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Image {} of {} failed for user {}: {}", n + 1, count, user_id, e);
                    error = Some(e);
                    break;
                }
            };
            let local_path = self.download(&url, user_id, n).await;
            let id = self.store.record(
                user_id,
                chat_id,
                prompt,
                &url,
                local_path.as_deref(),
                &self.model,
                DEFAULT_SIZE,
            )?;
            if let Some(image) = self.store.get(id)? {
                images.push(image);
            }
        }
        info!("Generated {} image(s) for user {}", images.len(), user_id);
        Ok(ImageBatch {
            images,
            requested: count,
            error,
        })
    }

    /// Save a local copy as `{user}_{timestamp}_{n}.png`. Failures are logged only.
    async fn download(&self, url: &str, user_id: i64, n: u32) -> Option<String> {
        let dir = self.images_dir.as_ref()?;
        let path = dir.join(format!("{}_{}_{}.png", user_id, now_ts(), n));

        let result: anyhow::Result<()> = async {
            tokio::fs::create_dir_all(dir).await?;
            let bytes = self.http.get(url).send().await?.error_for_status()?.bytes().await?;
            tokio::fs::write(&path, &bytes).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("Failed to download image {}: {}", url, e);
                None
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Caption under a generated image
pub fn image_caption(image: &GeneratedImage, stats: &ImageStats) -> String {
    format!(
        "🎨 <b>{}</b>\n\n🆔 #{} · Remaining today: {}/{}",
        html_escape(&truncate(&image.prompt, 200)),
        image.id,
        stats.remaining_today,
        stats.daily_limit
    )
}

/// Listing for /gallery and /favorites
pub fn format_gallery(title: &str, images: &[GeneratedImage], stats: Option<&ImageStats>) -> String {
    if images.is_empty() {
        return format!(
            "📁 <b>{}</b>\n\nNothing here yet. Generate some images with <code>/image &lt;prompt&gt;</code>!",
            title
        );
    }
    let mut out = format!("🖼️ <b>{}</b>\n\n", title);
    if let Some(stats) = stats {
        out.push_str(&format!(
            "📊 Total: {} · Favorites: {} · Today: {}/{}\n\n",
            stats.total, stats.favorites, stats.today, stats.daily_limit
        ));
    }
    for image in images.iter().take(10) {
        let icon = if image.is_favorite { "⭐" } else { "🖼️" };
        out.push_str(&format!(
            "{} <b>#{}</b> {}\n",
            icon,
            image.id,
            html_escape(&truncate(&image.prompt, 50))
        ));
    }
    if images.len() > 10 {
        out.push_str(&format!("\n... and {} more", images.len() - 10));
    }
    out
}

pub fn format_stats(stats: &ImageStats) -> String {
    format!(
        "📊 <b>Image Statistics</b>\n\n\
         🖼️ Total images: <b>{}</b>\n\
         ⭐ Favorites: <b>{}</b>\n\
         📅 Generated today: <b>{}/{}</b>\n\
         ⏳ Remaining today: <b>{}</b>",
        stats.total, stats.favorites, stats.today, stats.daily_limit, stats.remaining_today
    )
}

pub fn format_collections(collections: &[Collection]) -> String {
    if collections.is_empty() {
        return "📚 No collections yet. Create one with <code>/collection new &lt;name&gt;</code>.".to_string();
    }
    let mut out = String::from("📚 <b>Collections</b>\n\n");
    for c in collections {
        let scope = if c.chat_id.is_some() { "👥" } else { "👤" };
        out.push_str(&format!(
            "{} <b>#{}</b> {} ({} images)\n",
            scope,
            c.id,
            html_escape(&c.name),
            c.image_count
        ));
    }
    out
}

pub fn usage() -> &'static str {
    "🎨 <b>Images</b>\n\n\
     • <code>/image &lt;prompt&gt;</code> - generate one image\n\
     • <code>/images &lt;2-4&gt; &lt;prompt&gt;</code> - generate several\n\
     • <code>/gallery</code> · <code>/groupgallery</code> · <code>/favorites</code> · <code>/imgstats</code>\n\
     • <code>/collection new &lt;name&gt;</code> · <code>/collection newgroup &lt;name&gt;</code>\n\
     • <code>/collection add &lt;collection&gt; &lt;image&gt;</code> · <code>/collection show &lt;id&gt;</code>"
}
