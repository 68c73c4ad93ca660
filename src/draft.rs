//! Project drafts — the configuration a user builds up before provisioning,
//! persisted so it survives the OAuth redirect round-trip.

use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    None,
    Supabase,
    Prisma,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Email {
    None,
    Resend,
    Sendgrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analytics {
    None,
    Posthog,
    Plausible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Styling {
    Tailwind,
    Css,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Testing {
    None,
    Jest,
    Vitest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integrations {
    pub supabase_auth: bool,
    pub auth_providers: Vec<String>,
    pub stripe: bool,
    pub database: Database,
    pub email: Email,
    pub analytics: Analytics,
}

impl Default for Integrations {
    fn default() -> Self {
        Self {
            supabase_auth: false,
            auth_providers: Vec::new(),
            stripe: false,
            database: Database::None,
            email: Email::None,
            analytics: Analytics::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechStack {
    pub frontend: String,
    pub styling: Styling,
    pub typescript: bool,
    pub testing: Testing,
    pub docker: bool,
}

impl Default for TechStack {
    fn default() -> Self {
        Self {
            frontend: "nextjs".to_string(),
            styling: Styling::Tailwind,
            typescript: true,
            testing: Testing::None,
            docker: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub auto_init: bool,
    pub integrations: Integrations,
    pub tech_stack: TechStack,
    /// Set when provisioning was interrupted by a re-consent redirect, so the
    /// run resumes unprompted after the user returns.
    pub auto_create: bool,
}

impl Default for ProjectDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            private: false,
            auto_init: true,
            integrations: Integrations::default(),
            tech_stack: TechStack::default(),
            auto_create: false,
        }
    }
}

impl ProjectDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("please enter a project name".to_string());
        }
        if !NAME_RE.is_match(&self.name) {
            return Err(
                "project name can only contain letters, numbers, hyphens, and underscores"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Initial README content seeded into the new repository.
    pub fn readme(&self) -> String {
        let mut out = format!("# {}\n\n", self.name);
        if !self.description.trim().is_empty() {
            out.push_str(&format!("{}\n\n", self.description.trim()));
        }
        out.push_str("## Stack\n\n");
        out.push_str(&format!("- Frontend: {}\n", self.tech_stack.frontend));
        if self.tech_stack.typescript {
            out.push_str("- TypeScript\n");
        }
        if self.tech_stack.docker {
            out.push_str("- Docker\n");
        }
        let mut features = Vec::new();
        if self.integrations.supabase_auth {
            features.push("Authentication".to_string());
        }
        if self.integrations.stripe {
            features.push("Payments (Stripe)".to_string());
        }
        if self.integrations.database != Database::None {
            features.push("Database".to_string());
        }
        if self.integrations.email != Email::None {
            features.push("Transactional email".to_string());
        }
        if self.integrations.analytics != Analytics::None {
            features.push("Analytics".to_string());
        }
        if !features.is_empty() {
            out.push_str("\n## Features\n\n");
            for f in &features {
                out.push_str(&format!("- {}\n", f));
            }
        }
        out
    }
}

/// Where the serialized draft lives between page loads / redirects.
pub trait DraftSlot: Send + Sync {
    fn read(&self) -> anyhow::Result<Option<String>>;
    fn write(&self, value: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DraftSlot for MemorySlot {
    fn read(&self) -> anyhow::Result<Option<String>> {
        Ok(self.value.lock().map_err(|_| anyhow::anyhow!("slot poisoned"))?.clone())
    }

    fn write(&self, value: &str) -> anyhow::Result<()> {
        *self.value.lock().map_err(|_| anyhow::anyhow!("slot poisoned"))? =
            Some(value.to_string());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.value.lock().map_err(|_| anyhow::anyhow!("slot poisoned"))? = None;
        Ok(())
    }
}

/// File-backed slot; survives process restarts the way browser storage
/// survives navigation.
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DraftSlot for FileSlot {
    fn read(&self) -> anyhow::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, value: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, value)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct DraftStore {
    slot: Box<dyn DraftSlot>,
}

impl DraftStore {
    pub fn new(slot: Box<dyn DraftSlot>) -> Self {
        Self { slot }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemorySlot::new()))
    }

    pub fn load(&self) -> anyhow::Result<Option<ProjectDraft>> {
        match self.slot.read()? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(draft) => Ok(Some(draft)),
                Err(e) => {
                    // A corrupt draft is discarded rather than wedging resume.
                    tracing::warn!(error = %e, "discarding unreadable draft");
                    self.slot.clear()?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub fn save(&self, draft: &ProjectDraft) -> anyhow::Result<()> {
        self.slot.write(&serde_json::to_string(draft)?)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.slot.clear()
    }

    /// Restore the draft after a redirect landing. When the landing came from
    /// an auth redirect and the user is signed in, a named draft is marked
    /// `auto_create` so the interrupted run restarts on its own.
    pub fn resume(
        &self,
        arrived_from_redirect: bool,
        signed_in: bool,
    ) -> anyhow::Result<Option<ProjectDraft>> {
        let Some(mut draft) = self.load()? else {
            return Ok(None);
        };
        if arrived_from_redirect && signed_in && !draft.name.trim().is_empty() {
            draft.auto_create = true;
            self.save(&draft)?;
        }
        Ok(Some(draft))
    }
}
