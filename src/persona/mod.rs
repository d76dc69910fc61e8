//! # Persona Module
//!
//! Everything that decides who picks up the phone: the era table, and the
//! agent/voice/greeting pools layered on top of it.
//!
//! All of it is immutable after startup. The catalog lives in an `Arc` in
//! application state and each call receives a [`PersonaSelection`] by value.

pub mod catalog;   // Agent, voice and first-message pools
pub mod era;       // Year → era table and session variables

pub use catalog::{EnvLookup, PersonaCatalog};
pub use era::{SessionVariables, VoiceSettings};

/// A voice picked for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceChoice {
    pub id: String,
    pub name: String,
}

/// Everything the session plan needs to know about the persona of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaSelection {
    pub agent_id: String,
    pub variables: SessionVariables,
    pub voice_settings: VoiceSettings,
    pub voice: Option<VoiceChoice>,
    pub first_message: Option<String>,
}
