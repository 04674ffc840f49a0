use std::sync::Arc;

use base64::Engine;
use tracing::debug;
use uuid::Uuid;

use super::HandlerContext;
use crate::{
  domain::work_item::WorkItem,
  ipc::{HandlerError, HandlerRegistry, Method},
};

/// Library file mutations and lookups.
///
/// Paths are checked locally before anything is relayed; thumbnails must
/// decode to a non-empty image.
pub struct LibraryFileHandler {
  ctx: HandlerContext,
}

impl LibraryFileHandler {
  pub fn new(ctx: HandlerContext) -> Self {
    Self { ctx }
  }

  pub fn register(self: Arc<Self>, registry: &mut HandlerRegistry) {
    let this = Arc::clone(&self);
    registry.register(Method::UpdateLibraryFile, move |(item,): (WorkItem,)| {
      let this = Arc::clone(&this);
      async move { this.update_library_file(item).await }
    });

    let this = Arc::clone(&self);
    registry.register(
      Method::ExistsOnServer,
      move |(path, is_directory): (String, bool)| {
        let this = Arc::clone(&this);
        async move { this.exists_on_server(path, is_directory).await }
      },
    );

    let this = Arc::clone(&self);
    registry.register(Method::LibraryIgnorePath, move |(path,): (String,)| {
      let this = Arc::clone(&this);
      async move { this.library_ignore_path(path).await }
    });

    let this = self;
    registry.register(Method::UploadThumbnail, move |(uid, data): (Uuid, String)| {
      let this = Arc::clone(&this);
      async move { this.upload_thumbnail(uid, data).await }
    });
  }

  /// Keeps the node's copy in step before relaying.
  pub async fn update_library_file(&self, item: WorkItem) -> Result<(), HandlerError> {
    self.ctx.session.update_file(item.clone()).await?;
    Ok(self.ctx.upstream.call(Method::UpdateLibraryFile, (item,)).await?)
  }

  pub async fn exists_on_server(&self, path: String, is_directory: bool) -> Result<bool, HandlerError> {
    validate_path(&path)?;
    Ok(
      self
        .ctx
        .upstream
        .call(Method::ExistsOnServer, (path, is_directory))
        .await?,
    )
  }

  pub async fn library_ignore_path(&self, path: String) -> Result<(), HandlerError> {
    validate_path(&path)?;
    Ok(self.ctx.upstream.call(Method::LibraryIgnorePath, (path,)).await?)
  }

  /// Relays the encoded image unchanged once it is known to decode.
  pub async fn upload_thumbnail(&self, uid: Uuid, data: String) -> Result<(), HandlerError> {
    let bytes = base64::engine::general_purpose::STANDARD
      .decode(data.trim())
      .map_err(|e| HandlerError::validation(format!("Thumbnail is not valid base64: {e}")))?;
    if bytes.is_empty() {
      return Err(HandlerError::validation("Thumbnail is empty"));
    }

    debug!(runner = %self.ctx.session.uid(), file = %uid, bytes = bytes.len(), "Relaying thumbnail");
    Ok(self.ctx.upstream.call(Method::UploadThumbnail, (uid, data)).await?)
  }
}

fn validate_path(path: &str) -> Result<(), HandlerError> {
  if path.trim().is_empty() {
    return Err(HandlerError::validation("Path is empty"));
  }
  if path.contains('\0') {
    return Err(HandlerError::validation("Path contains a NUL byte"));
  }
  Ok(())
}
