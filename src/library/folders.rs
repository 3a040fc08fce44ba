use serde_json::json;
use tracing::{info, warn};

use crate::database::blobs::sanitize_file_name;
use crate::database::{Backend, Collection, Direction, Query};
use crate::error::{Error, Result};
use crate::library::galleries::required_name;
use crate::model::{now, Document, Folder, PinState, TagId};

/// Folders and the documents filed in them.
pub struct FolderService {
    backend: Backend,
}

impl FolderService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn create_folder(
        &self,
        owner_id: &str,
        name: &str,
        description: &str,
        tag_ids: Vec<TagId>,
    ) -> Result<Folder> {
        let name = required_name(name, "Folder")?;
        let at = now();
        let mut folder = Folder {
            id: String::new(),
            name,
            description: description.trim().to_string(),
            owner_id: owner_id.to_string(),
            documents: Vec::new(),
            tag_ids,
            pins: PinState::default(),
            created_at: at,
            updated_at: at,
        };
        folder.id = self.backend.insert(Collection::Folders, &folder)?;
        info!("Created folder {} for {}", folder.id, owner_id);
        Ok(folder)
    }

    pub fn get_folder(&self, folder_id: &str) -> Result<Folder> {
        self.backend.fetch_required(Collection::Folders, folder_id)
    }

    pub fn user_folders(&self, owner_id: &str) -> Result<Vec<Folder>> {
        let query = Query::new()
            .eq("ownerId", owner_id)
            .order_by("updatedAt", Direction::Descending);
        self.backend.query_as(Collection::Folders, &query)
    }

    pub fn pinned_folders(&self, owner_id: &str) -> Result<Vec<Folder>> {
        let query = Query::new()
            .eq("ownerId", owner_id)
            .eq("pinned", true)
            .order_by("pinnedOrder", Direction::Ascending);
        self.backend.query_as(Collection::Folders, &query)
    }

    pub fn rename_folder(&self, folder_id: &str, name: &str) -> Result<()> {
        let name = required_name(name, "Folder")?;
        self.backend.patch(
            Collection::Folders,
            folder_id,
            json!({ "name": name, "updatedAt": now().timestamp_millis() }),
        )
    }

    /// Deletes the folder together with every document filed in it.
    pub fn delete_folder(&self, folder_id: &str) -> Result<Folder> {
        let folder = self.get_folder(folder_id)?;
        for document in self.folder_documents(folder_id)? {
            self.discard_document(&document)?;
        }
        self.backend.remove(Collection::Folders, folder_id)?;
        info!("Deleted folder {}", folder_id);
        Ok(folder)
    }

    pub fn upload_document(
        &self,
        owner_id: &str,
        file_name: &str,
        bytes: &[u8],
        folder_id: Option<&str>,
        tag_ids: Vec<TagId>,
    ) -> Result<Document> {
        let folder = match folder_id {
            Some(id) => Some(self.owned_folder(owner_id, id)?),
            None => None,
        };

        let at = now();
        let path = format!(
            "documents/{}/{}_{}",
            owner_id,
            at.timestamp_millis(),
            sanitize_file_name(file_name)
        );
        let blob = self
            .backend
            .blobs()
            .upload(&path, bytes)
            .map_err(|e| Error::persistence(format!("upload of {file_name}"), e))?;

        let mut document = Document {
            id: String::new(),
            name: file_name.to_string(),
            url: blob.url,
            storage_path: blob.path,
            size: blob.size,
            content_type: blob.content_type,
            folder_id: folder.as_ref().map(|f| f.id.clone()),
            owner_id: owner_id.to_string(),
            tag_ids,
            uploaded_at: at,
        };
        document.id = self.backend.insert(Collection::Documents, &document)?;

        if let Some(folder) = folder {
            let mut ids = folder.documents;
            ids.push(document.id.clone());
            self.write_document_ids(&folder.id, &ids)?;
        }

        info!("Uploaded document {} ({})", document.name, document.id);
        Ok(document)
    }

    pub fn get_document(&self, document_id: &str) -> Result<Document> {
        self.backend.fetch_required(Collection::Documents, document_id)
    }

    /// Newest uploads first.
    pub fn user_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let query = Query::new()
            .eq("ownerId", owner_id)
            .order_by("uploadedAt", Direction::Descending);
        self.backend.query_as(Collection::Documents, &query)
    }

    pub fn folder_documents(&self, folder_id: &str) -> Result<Vec<Document>> {
        let query = Query::new()
            .eq("folderId", folder_id)
            .order_by("uploadedAt", Direction::Descending);
        self.backend.query_as(Collection::Documents, &query)
    }

    pub fn delete_document(&self, document_id: &str) -> Result<Document> {
        let document = self.get_document(document_id)?;
        self.discard_document(&document)?;

        if let Some(folder_id) = &document.folder_id {
            self.unlink(folder_id, document_id)?;
        }
        Ok(document)
    }

    /// Refiles a document; `None` takes it out of any folder.
    pub fn move_document(&self, document_id: &str, folder_id: Option<&str>) -> Result<()> {
        let document = self.get_document(document_id)?;
        if document.folder_id.as_deref() == folder_id {
            return Ok(());
        }

        let target = match folder_id {
            Some(id) => Some(self.owned_folder(&document.owner_id, id)?),
            None => None,
        };

        if let Some(old) = &document.folder_id {
            self.unlink(old, document_id)?;
        }
        if let Some(folder) = &target {
            let mut ids = folder.documents.clone();
            ids.push(document_id.to_string());
            self.write_document_ids(&folder.id, &ids)?;
        }

        self.backend.patch(
            Collection::Documents,
            document_id,
            json!({ "folderId": folder_id }),
        )
    }

    fn owned_folder(&self, owner_id: &str, folder_id: &str) -> Result<Folder> {
        let folder = self.get_folder(folder_id)?;
        if folder.owner_id != owner_id {
            return Err(Error::not_found("folder", folder_id));
        }
        Ok(folder)
    }

    fn discard_document(&self, document: &Document) -> Result<()> {
        if let Err(e) = self.backend.blobs().delete(&document.storage_path) {
            warn!("Failed to delete blob {}: {}", document.storage_path, e);
        }
        self.backend.remove(Collection::Documents, &document.id)
    }

    fn unlink(&self, folder_id: &str, document_id: &str) -> Result<()> {
        // the folder may already be gone
        let Some(folder) = self.backend.fetch::<Folder>(Collection::Folders, folder_id)? else {
            return Ok(());
        };
        let ids: Vec<String> = folder
            .documents
            .into_iter()
            .filter(|id| id != document_id)
            .collect();
        self.write_document_ids(folder_id, &ids)
    }

    fn write_document_ids(&self, folder_id: &str, ids: &[String]) -> Result<()> {
        self.backend.patch(
            Collection::Folders,
            folder_id,
            json!({ "documents": ids, "updatedAt": now().timestamp_millis() }),
        )
    }
}
