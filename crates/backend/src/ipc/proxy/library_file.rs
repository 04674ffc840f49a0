use base64::Engine;
use uuid::Uuid;

use crate::{
  domain::work_item::WorkItem,
  ipc::{IpcError, Method, RpcChannel},
};

#[derive(Debug, Clone)]
pub struct LibraryFileProxy {
  channel: RpcChannel,
}

impl LibraryFileProxy {
  pub fn new(channel: RpcChannel) -> Self {
    Self { channel }
  }

  pub async fn update_library_file(&self, item: &WorkItem) -> Result<(), IpcError> {
    self.channel.call(Method::UpdateLibraryFile, (item,)).await
  }

  pub async fn exists_on_server(&self, path: &str, is_directory: bool) -> Result<bool, IpcError> {
    self.channel.call(Method::ExistsOnServer, (path, is_directory)).await
  }

  /// Tell the server to stop picking up `path`.
  pub async fn library_ignore_path(&self, path: &str) -> Result<(), IpcError> {
    self.channel.call(Method::LibraryIgnorePath, (path,)).await
  }

  /// Upload raw image bytes as the thumbnail of file `uid`.
  pub async fn upload_thumbnail(&self, uid: Uuid, image: &[u8]) -> Result<(), IpcError> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image);
    self.channel.call(Method::UploadThumbnail, (uid, encoded)).await
  }
}
