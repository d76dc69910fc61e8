//! # Persona Catalog
//!
//! Agent, voice and first-message pools, loaded once at startup and shared
//! read-only by every call.
//!
//! ## Sources:
//! - **agents.json**: `{"agents": [{"name", "env_var"}]}`; each entry names the
//!   environment variable holding the actual agent id
//! - **voices.json**: `{"english": [...], "spanish": [...]}` voice entries
//! - **first_messages.json**: `era → language → [messages]`
//!
//! A configured file that is missing or invalid falls back to the bundled
//! copy under `data/` with a warning.
//!
//! ## Environment:
//! Agent and voice ids are resolved through an injectable [`EnvLookup`] so
//! tests can supply their own variables.

use super::era::{self, Era};
use super::{PersonaSelection, VoiceChoice};
use crate::config::CatalogConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BUNDLED_AGENTS: &str = include_str!("../../data/agents.json");
const BUNDLED_VOICES: &str = include_str!("../../data/voices.json");
const BUNDLED_FIRST_MESSAGES: &str = include_str!("../../data/first_messages.json");

/// Environment variable lookup.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the process environment.
pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    pub env_var: String,
}

#[derive(Debug, Default, Deserialize)]
struct AgentFile {
    #[serde(default)]
    agents: Vec<AgentEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoiceEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age_range: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VoiceFile {
    #[serde(default)]
    english: Vec<VoiceEntry>,
    #[serde(default)]
    spanish: Vec<VoiceEntry>,
}

type FirstMessages = HashMap<String, HashMap<String, Vec<String>>>;

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub agents: usize,
    pub english_voices: usize,
    pub spanish_voices: usize,
    pub eras_with_first_messages: usize,
}

pub struct PersonaCatalog {
    agents: Vec<AgentEntry>,
    voices: VoiceFile,
    first_messages: FirstMessages,
    base_agent_id: String,
    env: EnvLookup,
}

impl PersonaCatalog {
    /// Load the pools from the configured files, falling back to the bundled
    /// data.
    pub fn load(config: &CatalogConfig, base_agent_id: impl Into<String>, env: EnvLookup) -> Self {
        let agents: AgentFile = load_json(config.agents_file.as_deref(), BUNDLED_AGENTS, "agents");
        let voices: VoiceFile = load_json(config.voices_file.as_deref(), BUNDLED_VOICES, "voices");
        let first_messages: FirstMessages = load_json(
            config.first_messages_file.as_deref(),
            BUNDLED_FIRST_MESSAGES,
            "first messages",
        );

        let catalog = Self {
            agents: agents.agents,
            voices,
            first_messages,
            base_agent_id: base_agent_id.into(),
            env,
        };

        let stats = catalog.stats();
        info!(
            agents = stats.agents,
            english_voices = stats.english_voices,
            spanish_voices = stats.spanish_voices,
            eras = stats.eras_with_first_messages,
            "Persona catalog loaded"
        );
        catalog
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            agents: self.agents.len(),
            english_voices: self.voices.english.len(),
            spanish_voices: self.voices.spanish.len(),
            eras_with_first_messages: self.first_messages.len(),
        }
    }

    /// Pick agent, voice and greeting for a call.
    pub fn select(&self, year: i32, language: &str) -> PersonaSelection {
        self.select_with(year, language, &mut rand::thread_rng())
    }

    pub fn select_with<R: Rng + ?Sized>(&self, year: i32, language: &str, rng: &mut R) -> PersonaSelection {
        let era = era::era_for_year(year);
        let selection = PersonaSelection {
            agent_id: self.resolve_agent(era, rng),
            variables: era::session_variables(year, language),
            voice_settings: era.voice_settings,
            voice: self.choose_voice(language, rng),
            first_message: self.choose_first_message(era.name, language, rng),
        };

        info!(
            era = era.name,
            era_description = era.description,
            year,
            language,
            agent_id = %selection.agent_id,
            voice = selection.voice.as_ref().map(|v| v.name.as_str()).unwrap_or("agent default"),
            has_first_message = selection.first_message.is_some(),
            "Persona selected"
        );
        selection
    }

    /// Era-specific agent, then a random pool agent, then the base agent.
    fn resolve_agent<R: Rng + ?Sized>(&self, era: &Era, rng: &mut R) -> String {
        let era_var = format!("ELEVENLABS_AGENT_ID_{}", era.name.to_uppercase());
        if let Some(agent_id) = (self.env)(&era_var) {
            debug!(env_var = %era_var, "Using era-specific agent");
            return agent_id;
        }

        let mut pool: Vec<String> = self
            .agents
            .iter()
            .filter_map(|entry| {
                let resolved = (self.env)(&entry.env_var);
                if resolved.is_none() {
                    debug!(agent = %entry.name, env_var = %entry.env_var, "Agent pool entry has no id");
                }
                resolved
            })
            .collect();
        if !self.base_agent_id.is_empty() {
            pool.push(self.base_agent_id.clone());
        }

        pool.choose(rng)
            .cloned()
            .unwrap_or_else(|| self.base_agent_id.clone())
    }

    fn choose_voice<R: Rng + ?Sized>(&self, language: &str, rng: &mut R) -> Option<VoiceChoice> {
        let pool = match language.to_lowercase().as_str() {
            "es" | "spanish" => &self.voices.spanish,
            _ => &self.voices.english,
        };

        if let Some(voice) = pool.choose(rng) {
            debug!(
                voice = %voice.name,
                gender = voice.gender.as_deref().unwrap_or("unknown"),
                age_range = voice.age_range.as_deref().unwrap_or("unknown"),
                "Voice selected from catalog"
            );
            return Some(VoiceChoice {
                id: voice.id.clone(),
                name: voice.name.clone(),
            });
        }

        let env_var = format!("ELEVENLABS_VOICES_{}", language.to_uppercase());
        let listed = (self.env)(&env_var)?;
        let ids: Vec<&str> = listed.split(',').map(str::trim).filter(|id| !id.is_empty()).collect();
        ids.choose(rng).map(|id| VoiceChoice {
            id: id.to_string(),
            name: env_var.clone(),
        })
    }

    fn choose_first_message<R: Rng + ?Sized>(&self, era_name: &str, language: &str, rng: &mut R) -> Option<String> {
        let message = self
            .first_messages
            .get(era_name)
            .and_then(|languages| languages.get(language))
            .and_then(|messages| messages.choose(rng))
            .cloned();

        if message.is_none() {
            warn!(era = era_name, language, "No first message available");
        }
        message
    }
}

fn load_json<T: DeserializeOwned + Default>(path: Option<&str>, bundled: &str, what: &str) -> T {
    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(parsed) => return parsed,
                Err(e) => warn!(path, error = %e, "Invalid {} file, using bundled data", what),
            },
            Err(e) => warn!(path, error = %e, "Cannot read {} file, using bundled data", what),
        }
    }

    serde_json::from_str(bundled).unwrap_or_else(|e| {
        warn!(error = %e, "Bundled {} data is invalid", what);
        T::default()
    })
}
