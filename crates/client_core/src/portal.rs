use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use shared::domain::{ConversationId, Participant, UserId};
use shared::protocol::{Message, UploadedFile};

/// One file picked in the composer, pending upload.
#[derive(Debug, Clone)]
pub struct UploadDraft {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// HTTP collaborators of the synchronization engine: contact list,
/// message history and the multipart file-upload endpoint. Visual
/// rendering and credential management live elsewhere.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn fetch_contacts(&self, user_id: &UserId) -> Result<Vec<Participant>>;
    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>>;
    async fn upload_files(&self, files: Vec<UploadDraft>) -> Result<Vec<UploadedFile>>;
}

/// Placeholder collaborator for engine construction without a portal
/// backend (tests, dry wiring).
pub struct MissingPortalApi;

#[async_trait]
impl PortalApi for MissingPortalApi {
    async fn fetch_contacts(&self, user_id: &UserId) -> Result<Vec<Participant>> {
        Err(anyhow!("portal API unavailable for user {user_id}"))
    }

    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        Err(anyhow!(
            "portal API unavailable for conversation {conversation_id}"
        ))
    }

    async fn upload_files(&self, _files: Vec<UploadDraft>) -> Result<Vec<UploadedFile>> {
        Err(anyhow!("portal API unavailable for uploads"))
    }
}

pub struct HttpPortalApi {
    http: Client,
    base_url: String,
}

impl HttpPortalApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn fetch_contacts(&self, user_id: &UserId) -> Result<Vec<Participant>> {
        let contacts = self
            .http
            .get(format!("{}/contacts", self.base_url))
            .query(&[("userId", user_id.0.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(contacts)
    }

    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let history = self
            .http
            .get(format!("{}/messages/{conversation_id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(history)
    }

    async fn upload_files(&self, files: Vec<UploadDraft>) -> Result<Vec<UploadedFile>> {
        let mut form = Form::new();
        for file in files {
            let mut part = Part::bytes(file.bytes).file_name(file.file_name);
            if let Some(mime) = &file.mime_type {
                part = part.mime_str(mime)?;
            }
            form = form.part("files", part);
        }
        let uploaded = self
            .http
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(uploaded)
    }
}
