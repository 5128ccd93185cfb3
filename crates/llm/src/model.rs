use serde::Deserialize;

pub const DEFAULT_OLLAMA_MODEL: &str = "gemma3:270m";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Path of the listing endpoint shared by the catalog fetch and the probes.
pub const TAGS_PATH: &str = "/api/tags";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub size: Option<u64>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Models reported by one `GET /api/tags` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelCatalog {
    pub models: Vec<Model>,
}

impl ModelCatalog {
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    /// Parses the tags payload. Entries without a name are kept with an empty
    /// name so they can never match a real model id.
    pub fn from_tags_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let response: TagsResponse = serde_json::from_slice(payload)?;
        let models = response
            .models
            .into_iter()
            .map(|entry| {
                let model = Model::new(entry.name);
                match entry.size {
                    Some(size) => model.with_size(size),
                    None => model,
                }
            })
            .collect();

        Ok(Self { models })
    }

    /// Exact name match, no tag normalization (`gemma3` does not match `gemma3:270m`).
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|model| model.name == model_id)
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|model| model.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: Option<u64>,
}
