// Documents service: client files in blob storage with a metadata row.

use std::time::Duration;

use chrono::Utc;

use crate::capabilities::{Capabilities, Capability};
use crate::error::{self, DashboardError};
use crate::gateway::{self, tables, Filter, RemoteGateway, DOCUMENTS_BUCKET};
use crate::types::{Document, Principal};
use crate::util::storage_file_name;
use crate::visibility;

#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub client_id: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Upload the file, then record it. If the row cannot be written the blob
/// is removed again.
pub async fn upload_document(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    upload: DocumentUpload,
) -> Result<Document, DashboardError> {
    error::require("client", &upload.client_id)?;
    error::require("file name", &upload.file_name)?;
    if upload.bytes.is_empty() {
        return Err(DashboardError::InvalidField {
            field: "file".to_string(),
            reason: "file is empty".to_string(),
        });
    }
    visibility::require_client_access(gw, principal, &upload.client_id).await?;

    let id = crate::util::new_id();
    let storage_path = format!(
        "clients/{}/{}-{}",
        upload.client_id,
        id,
        storage_file_name(&upload.file_name)
    );
    let content_type = if upload.content_type.trim().is_empty() {
        "application/octet-stream".to_string()
    } else {
        upload.content_type.trim().to_string()
    };
    let size = upload.bytes.len();

    gw.upload(DOCUMENTS_BUCKET, &storage_path, upload.bytes, &content_type)
        .await?;

    let document = Document {
        id,
        client_id: upload.client_id,
        uploaded_by: principal.id.clone(),
        file_name: upload.file_name.trim().to_string(),
        bucket: DOCUMENTS_BUCKET.to_string(),
        storage_path,
        content_type,
        created_at: Utc::now(),
    };
    if let Err(e) = gateway::insert_as(gw, tables::DOCUMENTS, std::slice::from_ref(&document)).await {
        if let Err(cleanup) = gw
            .remove(DOCUMENTS_BUCKET, std::slice::from_ref(&document.storage_path))
            .await
        {
            log::warn!(
                "Documents: failed to remove orphaned blob {}: {}",
                document.storage_path,
                cleanup
            );
        }
        return Err(e.into());
    }

    log::info!(
        "Documents: {} uploaded {} ({} bytes) for client {}",
        principal.id,
        document.storage_path,
        size,
        document.client_id
    );
    Ok(document)
}

/// Time-limited download link.
pub async fn document_url(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    document_id: &str,
    expires_in: Duration,
) -> Result<String, DashboardError> {
    let document = load_readable(gw, principal, document_id).await?;
    Ok(gw
        .signed_url(&document.bucket, &document.storage_path, expires_in)
        .await?)
}

pub async fn download_document(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    document_id: &str,
) -> Result<Vec<u8>, DashboardError> {
    let document = load_readable(gw, principal, document_id).await?;
    Ok(gw.download(&document.bucket, &document.storage_path).await?)
}

/// Remove the blob and its row. Allowed for the uploader and for holders of
/// the all-documents capability.
pub async fn delete_document(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    document_id: &str,
) -> Result<Document, DashboardError> {
    let document = load(gw, document_id).await?;
    if document.uploaded_by != principal.id {
        Capabilities::for_principal(principal).require(Capability::ViewAllDocuments)?;
    }

    gw.remove(&document.bucket, std::slice::from_ref(&document.storage_path))
        .await?;
    gw.delete(tables::DOCUMENTS, &Filter::eq("id", document_id))
        .await?;
    log::info!("Documents: {} deleted {}", principal.id, document.storage_path);
    Ok(document)
}

async fn load(gw: &dyn RemoteGateway, id: &str) -> Result<Document, DashboardError> {
    gateway::select_one(gw, tables::DOCUMENTS, id)
        .await?
        .ok_or_else(|| DashboardError::not_found("document", id))
}

async fn load_readable(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    id: &str,
) -> Result<Document, DashboardError> {
    let document = load(gw, id).await?;
    let readable = document.uploaded_by == principal.id
        || Capabilities::for_principal(principal).has(Capability::ViewAllDocuments)
        || visibility::can_access_client(gw, principal, &document.client_id).await?;
    if !readable {
        return Err(DashboardError::PermissionDenied(format!(
            "{} cannot read document {}",
            principal.id, id
        )));
    }
    Ok(document)
}
