use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::CommandError;
use crate::memory::MemoryStore;
use crate::persona::Persona;
use crate::relationship::Relationship;
use crate::social::SocialGraph;

/// Two-character sentinel distinguishing directives from ordinary chat.
pub const DIRECTIVE_PREFIX: &str = "//";

const AUDIT_CAP: usize = 100;
const AUDIT_RAW_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct Directive {
    pub verb: String,
    pub args: Vec<String>,
    pub raw: String,
}

/// Recognize a directive only if the text starts with the sentinel.
/// Everything else is ordinary chat.
pub fn parse_directive(text: &str) -> Option<Directive> {
    let rest = text.strip_prefix(DIRECTIVE_PREFIX)?;
    let mut parts = rest.split_whitespace();
    let verb = parts.next()?.to_lowercase();

    Some(Directive {
        verb,
        args: parts.map(|s| s.to_string()).collect(),
        raw: text.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub time: DateTime<Utc>,
    pub caller: String,
    pub verb: String,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct DirectiveReply {
    pub ok: bool,
    pub text: String,
}

impl DirectiveReply {
    fn ok(text: impl Into<String>) -> Self {
        DirectiveReply {
            ok: true,
            text: text.into(),
        }
    }

    fn failure(error: &CommandError) -> Self {
        DirectiveReply {
            ok: false,
            text: format!("❌ {}", error),
        }
    }
}

/// Stateless-per-invocation directive dispatcher with a bounded audit
/// trail. Privilege is checked at the transport boundary; the audit log
/// records every attempt regardless of the outcome.
#[derive(Debug)]
pub struct CommandEngine {
    admins: Vec<String>,
    audit_log: Vec<AuditEntry>,
}

impl CommandEngine {
    pub fn new(admins: &[String]) -> Self {
        CommandEngine {
            admins: admins.to_vec(),
            audit_log: Vec::new(),
        }
    }

    pub fn is_privileged(&self, caller_id: &str) -> bool {
        self.admins.iter().any(|admin| admin == caller_id)
    }

    /// Record the attempt and answer whether the caller may proceed.
    /// Unauthorized attempts are recorded too.
    pub fn authorize(&mut self, caller_id: &str, directive: &Directive) -> bool {
        self.audit_log.push(AuditEntry {
            time: Utc::now(),
            caller: caller_id.to_string(),
            verb: directive.verb.clone(),
            raw: directive.raw.chars().take(AUDIT_RAW_CHARS).collect(),
        });
        if self.audit_log.len() > AUDIT_CAP {
            let excess = self.audit_log.len() - AUDIT_CAP;
            self.audit_log.drain(..excess);
        }

        self.is_privileged(caller_id)
    }

    /// Read-only view of the most recent audit entries.
    pub fn recent_history(&self, limit: usize) -> &[AuditEntry] {
        let skip = self.audit_log.len().saturating_sub(limit);
        &self.audit_log[skip..]
    }

    /// Route an authorized directive to its mutator. Any mutator error
    /// becomes a failure reply here; nothing propagates to the caller.
    pub fn dispatch(
        &mut self,
        directive: &Directive,
        caller_id: &str,
        persona: &mut Persona,
        memory: &mut MemoryStore,
        social: &mut SocialGraph,
        config: &Config,
    ) -> DirectiveReply {
        let result = self.execute(directive, caller_id, persona, memory, social, config);
        match result {
            Ok(text) => {
                tracing::info!(caller = caller_id, verb = %directive.verb, "directive ok");
                DirectiveReply::ok(text)
            }
            Err(e) => {
                tracing::info!(caller = caller_id, verb = %directive.verb, error = %e, "directive failed");
                DirectiveReply::failure(&e)
            }
        }
    }

    fn execute(
        &mut self,
        directive: &Directive,
        caller_id: &str,
        persona: &mut Persona,
        memory: &mut MemoryStore,
        social: &mut SocialGraph,
        config: &Config,
    ) -> Result<String, CommandError> {
        let args = &directive.args;

        match directive.verb.as_str() {
            "info" => Ok(persona.info_report()),
            "role" => {
                let updated = persona.update_role(args)?;
                Ok(format!("Role updated: {}", updated.join(", ")))
            }
            "online" | "active" | "multi" => {
                let value = args.first().ok_or_else(|| {
                    CommandError::Validation(format!("Usage: {} on|off", directive.verb))
                })?;
                persona.set_toggle(&directive.verb, value)
            }
            "emotion" => {
                let token = args.first().ok_or_else(|| {
                    CommandError::Validation("Usage: emotion <name>".to_string())
                })?;
                persona.set_emotion(token)
            }
            "relation" => {
                let token = args.first().ok_or_else(|| {
                    CommandError::Validation(format!(
                        "Usage: relation <type> | valid: {}",
                        Relationship::valid_tokens()
                    ))
                })?;
                let relationship: Relationship = token.parse().map_err(|_| {
                    CommandError::Validation(format!(
                        "Invalid relationship, valid: {}",
                        Relationship::valid_tokens()
                    ))
                })?;
                assign_relationship(memory, social, caller_id, relationship)?;
                Ok(format!("Relationship set to: {}", relationship))
            }
            "personality" => {
                let (name, value) = match (args.first(), args.get(1)) {
                    (Some(name), Some(value)) => (name, value),
                    _ => {
                        return Err(CommandError::Validation(
                            "Usage: personality <trait> <0..1>".to_string(),
                        ))
                    }
                };
                persona.set_personality_trait(name, value)
            }
            "traits" => {
                let csv = args.first().ok_or_else(|| {
                    CommandError::Validation("Usage: traits a,b,c".to_string())
                })?;
                persona.set_traits(csv)
            }
            "clean" => clean_artifacts(config),
            verb => Err(CommandError::UnknownVerb(verb.to_string())),
        }
    }
}

/// Apply a relationship to the store and the graph together. A holder
/// displaced from an exclusive label is demoted to Stranger in both
/// views; locked records keep their label.
pub fn assign_relationship(
    memory: &mut MemoryStore,
    social: &mut SocialGraph,
    user_id: &str,
    relationship: Relationship,
) -> Result<(), CommandError> {
    memory.set_relationship(user_id, relationship)?;

    if let Some(displaced) = social.assign(user_id, relationship) {
        let locked = memory.get(&displaced).map_or(false, |r| r.locked);
        if !locked {
            memory.set_relationship(&displaced, Relationship::Stranger)?;
        }
    }

    Ok(())
}

/// Remove exported transcript artifacts from the data directory.
fn clean_artifacts(config: &Config) -> Result<String, CommandError> {
    let mut removed = 0;
    let entries = std::fs::read_dir(&config.data_dir)
        .map_err(|e| CommandError::Store(e.into()))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("export_") && name.ends_with(".txt") {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }

    Ok(format!("Cleaned {} exported file(s)", removed))
}
