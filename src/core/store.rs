//! Document collection and the active editing session

use std::time::{Duration, Instant};

use super::document::{now_millis, Document};
use super::storage::Storage;

/// Storage key holding the serialized document collection
pub const STORAGE_KEY: &str = "textpad-files";

/// Quiet period after the last edit before the draft is saved
pub const AUTOSAVE_DELAY: Duration = Duration::from_millis(1000);

/// Owns the documents, the selected document and its draft
pub struct DocumentStore {
    /// Persistence backend; `None` when storage is unavailable
    storage: Option<Box<dyn Storage>>,
    /// All documents, in insertion order
    files: Vec<Document>,
    /// Currently selected document
    current_file_id: Option<String>,
    /// Draft being edited
    current_content: String,
    /// Pending debounced save
    autosave_deadline: Option<Instant>,
    autosave_delay: Duration,
}

impl DocumentStore {
    /// Create a store over a storage backend
    pub fn new(storage: Option<Box<dyn Storage>>) -> Self {
        Self {
            storage,
            files: Vec::new(),
            current_file_id: None,
            current_content: String::new(),
            autosave_deadline: None,
            autosave_delay: AUTOSAVE_DELAY,
        }
    }

    /// Override the debounce window
    pub fn with_autosave_delay(mut self, delay: Duration) -> Self {
        self.autosave_delay = delay;
        self
    }

    /// All documents, in the order they were created
    pub fn files(&self) -> &[Document] {
        &self.files
    }

    /// Id of the selected document, if any
    pub fn current_file_id(&self) -> Option<&str> {
        self.current_file_id.as_deref()
    }

    /// The draft, which may be ahead of what is stored
    pub fn current_content(&self) -> &str {
        &self.current_content
    }

    /// The selected document as last saved
    pub fn current_file(&self) -> Option<&Document> {
        let id = self.current_file_id.as_deref()?;
        self.files.iter().find(|f| f.id == id)
    }

    /// When the pending autosave fires, if one is scheduled
    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.autosave_deadline
    }

    /// Whether an autosave is scheduled
    pub fn has_pending_save(&self) -> bool {
        self.autosave_deadline.is_some()
    }

    /// Load the collection and select the most recently updated document
    pub fn initialize(&mut self) {
        self.files = self.load_files();
        tracing::info!("Loaded {} documents", self.files.len());

        if let Some(latest) = latest_file(&self.files) {
            self.current_file_id = Some(latest.id.clone());
            self.current_content = latest.content.clone();
        }
    }

    /// Persist the draft now
    pub fn save_current_file(&mut self) {
        self.autosave_deadline = None;
        let now = now_millis();

        match self.current_file_id.as_deref() {
            None => {
                if self.current_content.trim().is_empty() {
                    return;
                }
                let file = Document::new(&self.current_content, now);
                tracing::info!("Created document {} ({})", file.id, file.title);
                self.current_file_id = Some(file.id.clone());
                self.files.push(file);
            }
            Some(id) => {
                if let Some(file) = self.files.iter_mut().find(|f| f.id == id) {
                    file.set_content(&self.current_content, now);
                }
            }
        }

        self.save_files();
    }

    /// Replace the draft and schedule a debounced save
    pub fn update_content(&mut self, content: impl Into<String>) {
        self.update_content_at(content, Instant::now());
    }

    /// Replace the draft and schedule a debounced save relative to `now`
    pub fn update_content_at(&mut self, content: impl Into<String>, now: Instant) {
        self.current_content = content.into();
        let deadline = now + self.autosave_delay;
        if self.autosave_deadline.replace(deadline).is_some() {
            tracing::debug!("Rescheduled autosave");
        }
    }

    /// Run the debounced save if its deadline has passed
    pub fn poll_autosave(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.autosave_deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }

        tracing::debug!("Autosave deadline reached");
        self.save_current_file();
        true
    }

    /// Replace the draft and save immediately
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.current_content = content.into();
        self.save_current_file();
    }

    /// Flush the draft and start a blank one
    pub fn create_new_file(&mut self) {
        self.save_current_file();
        self.current_file_id = None;
        self.current_content.clear();
    }

    /// Flush the draft and select the document with `id`, if it exists
    pub fn open_file(&mut self, id: &str) {
        self.save_current_file();

        if let Some(file) = self.files.iter().find(|f| f.id == id) {
            self.current_file_id = Some(file.id.clone());
            self.current_content = file.content.clone();
        } else {
            tracing::debug!("No document with id {}", id);
        }
    }

    /// Remove the document with `id`
    pub fn delete_file(&mut self, id: &str) {
        let before = self.files.len();
        self.files.retain(|f| f.id != id);
        if self.files.len() == before {
            tracing::debug!("No document with id {}", id);
            return;
        }

        tracing::info!("Deleted document {}", id);
        self.save_files();

        if self.current_file_id.as_deref() == Some(id) {
            self.autosave_deadline = None;
            match latest_file(&self.files) {
                Some(latest) => {
                    self.current_file_id = Some(latest.id.clone());
                    self.current_content = latest.content.clone();
                }
                None => {
                    self.current_file_id = None;
                    self.current_content.clear();
                }
            }
        }
    }

    fn load_files(&self) -> Vec<Document> {
        let Some(storage) = self.storage.as_deref() else {
            return Vec::new();
        };

        let data = match storage.get(STORAGE_KEY) {
            Ok(Some(data)) => data,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read documents: {}", e);
                return Vec::new();
            }
        };

        serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed document data: {}", e);
            Vec::new()
        })
    }

    fn save_files(&mut self) {
        let Some(storage) = self.storage.as_deref_mut() else {
            return;
        };

        let data = match serde_json::to_string(&self.files) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to serialize documents: {}", e);
                return;
            }
        };

        if let Err(e) = storage.set(STORAGE_KEY, &data) {
            tracing::warn!("Failed to write documents: {}", e);
        }
    }
}

/// Most recently updated document; ties go to the later one in the list
fn latest_file(files: &[Document]) -> Option<&Document> {
    files.iter().max_by_key(|f| f.updated_at)
}
