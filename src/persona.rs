use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{CommandError, StoreError};

const MOOD_HISTORY_CAP: usize = 100;

/// Glyphs that nudge the energy score. Counted per character, not per
/// word, so repeated emphasis weighs more.
const POSITIVE_GLYPHS: &str = "好开心快乐棒❤✨🥰😊";
const NEGATIVE_GLYPHS: &str = "难过伤心生气烦累😢😠";
const POSITIVE_WEIGHT: f32 = 2.0;
const NEGATIVE_WEIGHT: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Excited,
    Calm,
    Romantic,
    Lonely,
    Nervous,
}

impl Emotion {
    pub fn valid_tokens() -> &'static str {
        "happy, sad, angry, excited, calm, romantic, lonely, nervous"
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Excited => "excited",
            Emotion::Calm => "calm",
            Emotion::Romantic => "romantic",
            Emotion::Lonely => "lonely",
            Emotion::Nervous => "nervous",
        };
        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "happy" => Ok(Emotion::Happy),
            "sad" => Ok(Emotion::Sad),
            "angry" => Ok(Emotion::Angry),
            "excited" => Ok(Emotion::Excited),
            "calm" => Ok(Emotion::Calm),
            "romantic" => Ok(Emotion::Romantic),
            "lonely" => Ok(Emotion::Lonely),
            "nervous" => Ok(Emotion::Nervous),
            other => Err(format!("unknown emotion: {}", other)),
        }
    }
}

/// The persona's role attribute sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSheet {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub job: String,
    pub city: String,
    pub mood: String,
    pub traits: Vec<String>,
    pub likes: Vec<String>,
    pub status: String,
}

impl Default for RoleSheet {
    fn default() -> Self {
        RoleSheet {
            name: "Ling".to_string(),
            age: 20,
            gender: "female".to_string(),
            job: "student".to_string(),
            city: "Hangzhou".to_string(),
            mood: "happy".to_string(),
            traits: vec![
                "attentive".to_string(),
                "gentle".to_string(),
                "a little playful".to_string(),
            ],
            likes: vec![
                "music".to_string(),
                "movies".to_string(),
                "coffee".to_string(),
                "cats".to_string(),
            ],
            status: "just got home, a bit tired but in a good mood".to_string(),
        }
    }
}

/// Feature toggles. `emotion` mirrors the current emotion token so the
/// persisted settings document stays self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub online: bool,
    pub active: bool,
    pub multi_reply: bool,
    pub auto_clean: bool,
    pub emotion: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            online: true,
            active: true,
            multi_reply: true,
            auto_clean: true,
            emotion: "happy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodSnapshot {
    pub time: DateTime<Utc>,
    pub energy: f32,
    pub emotion: Emotion,
}

fn default_energy() -> f32 {
    80.0
}

fn default_personality() -> HashMap<String, f64> {
    let mut personality = HashMap::new();
    personality.insert("openness".to_string(), 0.7);
    personality.insert("extraversion".to_string(), 0.6);
    personality.insert("agreeableness".to_string(), 0.8);
    personality.insert("neuroticism".to_string(), 0.3);
    personality.insert("conscientiousness".to_string(), 0.7);
    personality
}

fn default_emotion() -> Emotion {
    Emotion::Happy
}

/// Process-wide persona state: role sheet, emotion, energy, personality
/// sliders, feature toggles, mood history. Created once at startup and
/// persisted after every mutating command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub role: RoleSheet,
    #[serde(default = "default_emotion")]
    pub emotion: Emotion,
    #[serde(default = "default_energy")]
    pub energy: f32,
    #[serde(default = "default_personality")]
    pub personality: HashMap<String, f64>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub mood_history: Vec<MoodSnapshot>,
    #[serde(skip)]
    state_file: PathBuf,
}

impl Persona {
    /// Merge persisted state over compiled-in defaults. Missing fields
    /// fall back individually; a malformed document falls back whole.
    pub fn load_or_default(config: &Config) -> Self {
        let state_file = config.state_file();

        let mut persona = if state_file.exists() {
            match std::fs::read_to_string(&state_file) {
                Ok(content) => match serde_json::from_str::<Persona>(&content) {
                    Ok(persona) => persona,
                    Err(e) => {
                        tracing::warn!("Failed to parse state file, using defaults: {}", e);
                        Persona::defaults()
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read state file, using defaults: {}", e);
                    Persona::defaults()
                }
            }
        } else {
            Persona::defaults()
        };

        persona.state_file = state_file;
        persona.settings.emotion = persona.emotion.to_string();
        persona
    }

    fn defaults() -> Self {
        Persona {
            role: RoleSheet::default(),
            emotion: default_emotion(),
            energy: default_energy(),
            personality: default_personality(),
            settings: Settings::default(),
            mood_history: Vec::new(),
            state_file: PathBuf::new(),
        }
    }

    fn save(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.state_file, content).map_err(|e| {
            tracing::error!("Failed to persist persona state: {}", e);
            StoreError::Io(e)
        })?;
        Ok(())
    }

    pub fn set_emotion(&mut self, token: &str) -> Result<String, CommandError> {
        let emotion: Emotion = token.parse().map_err(|_| {
            CommandError::Validation(format!(
                "Unknown emotion, valid: {}",
                Emotion::valid_tokens()
            ))
        })?;

        self.emotion = emotion;
        self.settings.emotion = emotion.to_string();
        self.save()?;
        Ok(format!("Emotion set to: {}", emotion))
    }

    pub fn set_toggle(&mut self, name: &str, value: &str) -> Result<String, CommandError> {
        let on = match value.to_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => {
                return Err(CommandError::Validation(
                    "Expected on or off".to_string(),
                ))
            }
        };

        let label = match name {
            "online" => {
                self.settings.online = on;
                "Online mode"
            }
            "active" => {
                self.settings.active = on;
                "Active messaging"
            }
            "multi" | "multi_reply" => {
                self.settings.multi_reply = on;
                "Multi reply"
            }
            "auto_clean" => {
                self.settings.auto_clean = on;
                "Auto clean"
            }
            other => {
                return Err(CommandError::Validation(format!(
                    "Unknown toggle: {}",
                    other
                )))
            }
        };

        self.save()?;
        Ok(format!(
            "{} {}",
            label,
            if on { "enabled" } else { "disabled" }
        ))
    }

    /// Apply `key=value` assignments to the role sheet. Unknown keys are
    /// skipped; a value that fails coercion rejects the whole batch so a
    /// partial update never persists.
    pub fn update_role(&mut self, args: &[String]) -> Result<Vec<String>, CommandError> {
        if args.is_empty() {
            return Err(CommandError::Validation(
                "Usage: role key=value [key=value ...]".to_string(),
            ));
        }

        enum RoleValue {
            Text(String),
            Age(u32),
            List(Vec<String>),
        }

        // Validate everything before touching the sheet
        let mut updates: Vec<(String, RoleValue)> = Vec::new();
        for arg in args {
            let Some((key, value)) = arg.split_once('=') else {
                continue;
            };
            let parsed = match key {
                "age" => RoleValue::Age(value.parse().map_err(|_| {
                    CommandError::Validation(format!("age must be an integer, got: {}", value))
                })?),
                "traits" | "likes" => {
                    RoleValue::List(value.split(',').map(|s| s.to_string()).collect())
                }
                "name" | "gender" | "job" | "city" | "mood" | "status" => {
                    RoleValue::Text(value.to_string())
                }
                _ => continue,
            };
            updates.push((key.to_string(), parsed));
        }

        let mut updated = Vec::new();
        for (key, value) in updates {
            match (key.as_str(), value) {
                ("name", RoleValue::Text(v)) => self.role.name = v,
                ("gender", RoleValue::Text(v)) => self.role.gender = v,
                ("job", RoleValue::Text(v)) => self.role.job = v,
                ("city", RoleValue::Text(v)) => self.role.city = v,
                ("mood", RoleValue::Text(v)) => self.role.mood = v,
                ("status", RoleValue::Text(v)) => self.role.status = v,
                ("age", RoleValue::Age(v)) => self.role.age = v,
                ("traits", RoleValue::List(v)) => self.role.traits = v,
                ("likes", RoleValue::List(v)) => self.role.likes = v,
                _ => {}
            }
            updated.push(key);
        }

        // One persistence write for the whole batch
        self.save()?;
        Ok(updated)
    }

    pub fn set_personality_trait(
        &mut self,
        name: &str,
        raw_value: &str,
    ) -> Result<String, CommandError> {
        let value: f64 = raw_value
            .parse()
            .map_err(|_| CommandError::Validation("Value must be a number".to_string()))?;
        let value = value.clamp(0.0, 1.0);

        let name = name.to_lowercase();
        if !self.personality.contains_key(&name) {
            return Err(CommandError::Validation(format!(
                "Unknown trait: {}",
                name
            )));
        }

        self.personality.insert(name.clone(), value);
        self.save()?;
        Ok(format!("{} set to {:.2}", name, value))
    }

    pub fn set_traits(&mut self, csv: &str) -> Result<String, CommandError> {
        let traits: Vec<String> = csv.split(',').map(|s| s.to_string()).collect();
        self.role.traits = traits.clone();
        self.save()?;
        Ok(format!("Traits updated: {}", traits.join(", ")))
    }

    /// Heuristic energy adjustment from the glyph content of one
    /// message, followed by a mood-history snapshot.
    pub fn update_energy(&mut self, message: &str) -> Result<(), StoreError> {
        let positive = message
            .chars()
            .filter(|c| POSITIVE_GLYPHS.contains(*c))
            .count() as f32;
        let negative = message
            .chars()
            .filter(|c| NEGATIVE_GLYPHS.contains(*c))
            .count() as f32;

        self.energy += positive * POSITIVE_WEIGHT;
        self.energy -= negative * NEGATIVE_WEIGHT;
        self.energy = self.energy.clamp(0.0, 100.0);

        self.mood_history.push(MoodSnapshot {
            time: Utc::now(),
            energy: self.energy,
            emotion: self.emotion,
        });
        if self.mood_history.len() > MOOD_HISTORY_CAP {
            let excess = self.mood_history.len() - MOOD_HISTORY_CAP;
            self.mood_history.drain(..excess);
        }

        self.save()
    }

    /// Random filler keyed by the current emotion; emotions without a
    /// dedicated pool fall back to generic fillers.
    pub fn response_template(&self) -> String {
        let pool: &[&str] = match self.emotion {
            Emotion::Happy => &[
                "Feeling really good today!",
                "Haha, I'm in such a good mood~",
                "I have a feeling something nice is coming 😊",
            ],
            Emotion::Sad => &[
                "Hmm... feeling a bit down",
                "Not in the best mood...",
                "Just let me sit quietly for a while 😔",
            ],
            Emotion::Romantic => &[
                "❤️ Thinking of you today",
                "Feeling all warm inside~",
                "Talking with you always makes me happy 🥰",
            ],
            Emotion::Calm => &[
                "Mm... I'm listening",
                "Feeling pretty peaceful",
                "Today's been alright",
            ],
            _ => &["Mm...", "I'm listening", "And then?"],
        };

        let mut rng = rand::thread_rng();
        pool.choose(&mut rng).unwrap_or(&"Mm...").to_string()
    }

    /// The `info` directive report.
    pub fn info_report(&self) -> String {
        [
            "🤖 Status report".to_string(),
            "━━━━━━━━━━━━━━".to_string(),
            format!("Role: {} ({})", self.role.name, self.role.age),
            format!("Mood: {} (energy: {:.0}%)", self.emotion, self.energy),
            format!("Mode: {}", if self.settings.online { "online" } else { "offline" }),
            format!("Active: {}", if self.settings.active { "on" } else { "off" }),
            format!(
                "Multi reply: {}",
                if self.settings.multi_reply { "on" } else { "off" }
            ),
            "━━━━━━━━━━━━━━".to_string(),
            "Use //<command> <args> to change settings".to_string(),
        ]
        .join("\n")
    }
}
