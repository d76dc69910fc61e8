//! Ordered session configuration attempts.
//!
//! Opening a session walks a [`SessionPlan`] from the richest configuration to
//! the plainest one and stops at the first the engine accepts:
//!
//! 1. **Full**: persona variables plus voice, synthesis and greeting overrides
//! 2. **VariablesOnly**: persona variables, agent defaults for everything else
//! 3. **Basic**: just the agent id
//!
//! A plan always holds at least one attempt.

use super::{
    AgentOverride, AudioInterface, ConversationEngine, ConversationError, ConversationOverride,
    ConversationSession, SessionConfig, TtsOverride,
};
use crate::persona::PersonaSelection;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Full,
    VariablesOnly,
    Basic,
}

impl AttemptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptKind::Full => "full",
            AttemptKind::VariablesOnly => "variables_only",
            AttemptKind::Basic => "basic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionAttempt {
    pub kind: AttemptKind,
    pub config: SessionConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    attempts: Vec<SessionAttempt>,
}

impl SessionPlan {
    /// The standard three-step plan for a selected persona.
    pub fn for_persona(persona: &PersonaSelection) -> Self {
        let variables = persona.variables.to_dynamic_variables();
        let settings = &persona.voice_settings;

        let overrides = ConversationOverride {
            agent: Some(AgentOverride {
                first_message: persona.first_message.clone(),
                language: Some(persona.variables.language.clone()),
            }),
            tts: Some(TtsOverride {
                voice_id: persona.voice.as_ref().map(|voice| voice.id.clone()),
                stability: Some(settings.stability),
                similarity_boost: Some(settings.similarity_boost),
                style: Some(settings.style),
                speed: Some(settings.speed),
            }),
        };

        let agent_id = persona.agent_id.clone();
        Self {
            attempts: vec![
                SessionAttempt {
                    kind: AttemptKind::Full,
                    config: SessionConfig {
                        agent_id: agent_id.clone(),
                        dynamic_variables: Some(variables.clone()),
                        overrides: Some(overrides),
                    },
                },
                SessionAttempt {
                    kind: AttemptKind::VariablesOnly,
                    config: SessionConfig {
                        agent_id: agent_id.clone(),
                        dynamic_variables: Some(variables),
                        overrides: None,
                    },
                },
                SessionAttempt {
                    kind: AttemptKind::Basic,
                    config: SessionConfig::basic(agent_id),
                },
            ],
        }
    }

    pub fn attempts(&self) -> &[SessionAttempt] {
        &self.attempts
    }
}

/// A session together with the attempt that produced it.
pub struct EstablishedSession {
    pub kind: AttemptKind,
    pub session: Box<dyn ConversationSession>,
}

/// Every attempt in the plan failed.
#[derive(Debug)]
pub struct AttemptsExhausted {
    pub failures: Vec<(AttemptKind, ConversationError)>,
}

impl fmt::Display for AttemptsExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} session attempts failed", self.failures.len())?;
        for (kind, err) in &self.failures {
            write!(f, "; {}: {}", kind.as_str(), err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AttemptsExhausted {}

/// Try each attempt in order until the engine accepts one.
pub async fn establish_session(
    engine: &dyn ConversationEngine,
    plan: &SessionPlan,
    audio: Arc<dyn AudioInterface>,
) -> Result<EstablishedSession, AttemptsExhausted> {
    let mut failures = Vec::new();

    for attempt in plan.attempts() {
        match engine.start_session(attempt.config.clone(), audio.clone()).await {
            Ok(session) => {
                info!(
                    attempt = attempt.kind.as_str(),
                    agent_id = %attempt.config.agent_id,
                    conversation_id = session.conversation_id().unwrap_or("unknown"),
                    "Conversation session started"
                );
                return Ok(EstablishedSession {
                    kind: attempt.kind,
                    session,
                });
            }
            Err(err) => {
                warn!(attempt = attempt.kind.as_str(), error = %err, "Session attempt failed");
                failures.push((attempt.kind, err));
            }
        }
    }

    Err(AttemptsExhausted { failures })
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedEngine;
    use super::*;
    use crate::conversation::InputCallback;
    use crate::persona::{era, PersonaSelection, VoiceChoice};

    struct NullAudio;

    impl AudioInterface for NullAudio {
        fn start(&self, _input_callback: InputCallback) {}
        fn stop(&self) {}
        fn output(&self, _audio: Vec<u8>) {}
        fn interrupt(&self) {}
    }

    fn persona() -> PersonaSelection {
        let variables = era::session_variables(1850, "es");
        PersonaSelection {
            voice_settings: era::era_for_year(1850).voice_settings,
            variables,
            agent_id: "agent-industrial".to_string(),
            voice: Some(VoiceChoice {
                id: "voice-es".to_string(),
                name: "Voz".to_string(),
            }),
            first_message: Some("¿Hola?".to_string()),
        }
    }

    #[test]
    fn test_plan_order_and_contents() {
        let plan = SessionPlan::for_persona(&persona());
        let kinds: Vec<_> = plan.attempts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AttemptKind::Full, AttemptKind::VariablesOnly, AttemptKind::Basic]);

        let full = &plan.attempts()[0].config;
        let overrides = full.overrides.as_ref().unwrap();
        let tts = overrides.tts.as_ref().unwrap();
        assert_eq!(tts.voice_id.as_deref(), Some("voice-es"));
        assert_eq!(tts.speed, Some(1.15));
        assert_eq!(
            overrides.agent.as_ref().unwrap().first_message.as_deref(),
            Some("¿Hola?")
        );
        assert_eq!(full.dynamic_variables.as_ref().unwrap()["era_name"], "industrial");

        let reduced = &plan.attempts()[1].config;
        assert!(reduced.overrides.is_none());
        assert!(reduced.dynamic_variables.is_some());

        assert_eq!(plan.attempts()[2].config, SessionConfig::basic("agent-industrial"));
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let engine = ScriptedEngine::failing(0);
        let plan = SessionPlan::for_persona(&persona());

        let established = establish_session(&engine, &plan, Arc::new(NullAudio)).await.unwrap();
        assert_eq!(established.kind, AttemptKind::Full);
        assert_eq!(engine.attempts_made(), 1);
    }

    #[tokio::test]
    async fn test_rich_failure_falls_back_to_reduced() {
        let engine = ScriptedEngine::failing(1);
        let plan = SessionPlan::for_persona(&persona());

        let established = establish_session(&engine, &plan, Arc::new(NullAudio)).await.unwrap();
        assert_eq!(established.kind, AttemptKind::VariablesOnly);
        assert_eq!(engine.attempts_made(), 2);
        assert!(engine.calls.lock().unwrap()[1].overrides.is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_failure() {
        let engine = ScriptedEngine::failing(3);
        let plan = SessionPlan::for_persona(&persona());

        let exhausted = match establish_session(&engine, &plan, Arc::new(NullAudio)).await {
            Ok(_) => panic!("expected every attempt to fail"),
            Err(err) => err,
        };
        assert_eq!(engine.attempts_made(), 3);
        let kinds: Vec<_> = exhausted.failures.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec![AttemptKind::Full, AttemptKind::VariablesOnly, AttemptKind::Basic]);
        assert!(exhausted.to_string().contains("basic"));
    }
}
