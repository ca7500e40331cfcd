use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::store::{keys, PrefsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    #[serde(rename = "Non-Binary")]
    NonBinary,
    Other,
}

impl Gender {
    pub fn label(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::NonBinary => "Non-Binary",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Gender {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "non-binary" | "nonbinary" | "nb" => Ok(Gender::NonBinary),
            "other" => Ok(Gender::Other),
            other => bail!("unknown gender '{other}'"),
        }
    }
}

/// The sixteen four-letter personality codes plus an explicit Unknown.
///
/// Serialized as the bare code string so persisted profiles stay readable
/// and compatible with the web client's storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum PersonalityType {
    ISTJ,
    ISFJ,
    INFJ,
    INTJ,
    ISTP,
    ISFP,
    INFP,
    INTP,
    ESTP,
    ESFP,
    ENFP,
    ENTP,
    ESTJ,
    ESFJ,
    ENFJ,
    ENTJ,
    Unknown,
}

/// All sixteen concrete codes, excluding Unknown. Order matches the
/// onboarding picker.
pub const ALL_PERSONALITY_CODES: [&str; 16] = [
    "ISTJ", "ISFJ", "INFJ", "INTJ", "ISTP", "ISFP", "INFP", "INTP", "ESTP", "ESFP", "ENFP",
    "ENTP", "ESTJ", "ESFJ", "ENFJ", "ENTJ",
];

impl PersonalityType {
    pub fn code(&self) -> &'static str {
        match self {
            PersonalityType::ISTJ => "ISTJ",
            PersonalityType::ISFJ => "ISFJ",
            PersonalityType::INFJ => "INFJ",
            PersonalityType::INTJ => "INTJ",
            PersonalityType::ISTP => "ISTP",
            PersonalityType::ISFP => "ISFP",
            PersonalityType::INFP => "INFP",
            PersonalityType::INTP => "INTP",
            PersonalityType::ESTP => "ESTP",
            PersonalityType::ESFP => "ESFP",
            PersonalityType::ENFP => "ENFP",
            PersonalityType::ENTP => "ENTP",
            PersonalityType::ESTJ => "ESTJ",
            PersonalityType::ESFJ => "ESFJ",
            PersonalityType::ENFJ => "ENFJ",
            PersonalityType::ENTJ => "ENTJ",
            PersonalityType::Unknown => "Unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PersonalityType::Unknown)
    }
}

impl fmt::Display for PersonalityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PersonalityType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let parsed = match normalized.as_str() {
            "ISTJ" => PersonalityType::ISTJ,
            "ISFJ" => PersonalityType::ISFJ,
            "INFJ" => PersonalityType::INFJ,
            "INTJ" => PersonalityType::INTJ,
            "ISTP" => PersonalityType::ISTP,
            "ISFP" => PersonalityType::ISFP,
            "INFP" => PersonalityType::INFP,
            "INTP" => PersonalityType::INTP,
            "ESTP" => PersonalityType::ESTP,
            "ESFP" => PersonalityType::ESFP,
            "ENFP" => PersonalityType::ENFP,
            "ENTP" => PersonalityType::ENTP,
            "ESTJ" => PersonalityType::ESTJ,
            "ESFJ" => PersonalityType::ESFJ,
            "ENFJ" => PersonalityType::ENFJ,
            "ENTJ" => PersonalityType::ENTJ,
            "UNKNOWN" | "" => PersonalityType::Unknown,
            other => bail!("unknown personality code '{other}'"),
        };
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    En,
    #[serde(rename = "ko")]
    Ko,
    #[serde(rename = "ja")]
    Ja,
    #[serde(rename = "fr")]
    Fr,
    #[serde(rename = "es")]
    Es,
    #[serde(rename = "pt")]
    Pt,
    #[serde(rename = "zh")]
    Zh,
    #[serde(rename = "ru")]
    Ru,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ko => "ko",
            Language::Ja => "ja",
            Language::Fr => "fr",
            Language::Es => "es",
            Language::Pt => "pt",
            Language::Zh => "zh",
            Language::Ru => "ru",
        }
    }

    /// Full English name used when embedding the language in prompt text.
    pub fn english_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ko => "Korean",
            Language::Ja => "Japanese",
            Language::Fr => "French",
            Language::Es => "Spanish",
            Language::Pt => "Portuguese",
            Language::Zh => "Chinese",
            Language::Ru => "Russian",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ko" => Ok(Language::Ko),
            "ja" => Ok(Language::Ja),
            "fr" => Ok(Language::Fr),
            "es" => Ok(Language::Es),
            "pt" => Ok(Language::Pt),
            "zh" => Ok(Language::Zh),
            "ru" => Ok(Language::Ru),
            other => bail!("unsupported language code '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Politeness {
    Casual,
    Polite,
    Mixed,
}

impl Politeness {
    pub fn label(&self) -> &'static str {
        match self {
            Politeness::Casual => "Casual",
            Politeness::Polite => "Polite",
            Politeness::Mixed => "Mixed",
        }
    }
}

impl FromStr for Politeness {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "casual" => Ok(Politeness::Casual),
            "polite" => Ok(Politeness::Polite),
            "mixed" => Ok(Politeness::Mixed),
            other => bail!("unknown politeness level '{other}'"),
        }
    }
}

/// Profile of the person asking for suggestions. Created at onboarding and
/// only replaced wholesale by re-running onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub gender: Gender,
    pub age: u32,
    #[serde(rename = "mbti")]
    pub personality: PersonalityType,
}

/// Profile of the chat partner the user is texting. Multiple instances are
/// kept in an ordered, id-keyed list so a user can switch between
/// conversations without re-entering everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerProfile {
    pub id: String,
    pub name: String,
    pub gender: Gender,
    /// None means the user marked the age as unknown.
    pub age: Option<u32>,
    pub relation: String,
    #[serde(rename = "mbti")]
    pub personality: PersonalityType,
    pub goal: String,
    pub vibe: String,
    pub context: String,
    pub language: Language,
    pub politeness: Politeness,
}

impl PartnerProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            gender: Gender::Other,
            age: None,
            relation: "Friend".to_string(),
            personality: PersonalityType::Unknown,
            goal: "Casual".to_string(),
            vibe: "Witty".to_string(),
            context: String::new(),
            language: Language::En,
            politeness: Politeness::Mixed,
        }
    }
}

pub fn load_user_profile(store: &mut PrefsStore) -> Option<UserProfile> {
    store.get_json(keys::USER_PROFILE)
}

pub fn save_user_profile(store: &mut PrefsStore, profile: &UserProfile) -> Result<()> {
    store.set_json(keys::USER_PROFILE, profile)
}

/// Loads the saved partner list into an insertion-ordered map keyed by id.
/// The wire format stays a plain JSON array for compatibility with the web
/// client's `rizz_saved_partners` key.
pub fn load_partners(store: &mut PrefsStore) -> IndexMap<String, PartnerProfile> {
    let rows: Vec<PartnerProfile> = store.get_json(keys::SAVED_PARTNERS).unwrap_or_default();
    rows.into_iter()
        .map(|partner| (partner.id.clone(), partner))
        .collect()
}

/// Inserts or replaces a partner by id, preserving list order for existing
/// entries and appending new ones.
pub fn save_partner(store: &mut PrefsStore, partner: &PartnerProfile) -> Result<()> {
    let mut partners = load_partners(store);
    partners.insert(partner.id.clone(), partner.clone());
    persist_partners(store, &partners)
}

/// Removes a partner by id. Returns false when no entry matched.
pub fn remove_partner(store: &mut PrefsStore, id: &str) -> Result<bool> {
    let mut partners = load_partners(store);
    let removed = partners.shift_remove(id).is_some();
    if removed {
        persist_partners(store, &partners)?;
    }
    Ok(removed)
}

fn persist_partners(
    store: &mut PrefsStore,
    partners: &IndexMap<String, PartnerProfile>,
) -> Result<()> {
    let rows: Vec<&PartnerProfile> = partners.values().collect();
    store.set_json(keys::SAVED_PARTNERS, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PrefsStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = PrefsStore::new(temp.path().join("prefs.json"));
        (temp, store)
    }

    #[test]
    fn user_profile_round_trips_through_store() -> Result<()> {
        let (_temp, mut store) = store();
        let profile = UserProfile {
            gender: Gender::Male,
            age: 27,
            personality: PersonalityType::ENFP,
        };
        save_user_profile(&mut store, &profile)?;

        let mut reloaded = PrefsStore::new(store.path().to_path_buf());
        assert_eq!(load_user_profile(&mut reloaded), Some(profile));
        Ok(())
    }

    #[test]
    fn personality_serializes_as_bare_code() -> Result<()> {
        let raw = serde_json::to_string(&PersonalityType::INTJ)?;
        assert_eq!(raw, "\"INTJ\"");
        let parsed: PersonalityType = serde_json::from_str("\"Unknown\"")?;
        assert_eq!(parsed, PersonalityType::Unknown);
        Ok(())
    }

    #[test]
    fn partner_list_round_trips_field_for_field() -> Result<()> {
        let (_temp, mut store) = store();
        let mut first = PartnerProfile::new("Mina");
        first.gender = Gender::Female;
        first.age = Some(24);
        first.personality = PersonalityType::INFJ;
        first.language = Language::Ko;
        first.politeness = Politeness::Casual;
        first.context = "Mention her dog".to_string();
        let second = PartnerProfile::new("Alex");

        save_partner(&mut store, &first)?;
        save_partner(&mut store, &second)?;

        let mut reloaded = PrefsStore::new(store.path().to_path_buf());
        let partners = load_partners(&mut reloaded);
        assert_eq!(partners.len(), 2);
        assert_eq!(partners.get(&first.id), Some(&first));
        assert_eq!(partners.get(&second.id), Some(&second));
        let order: Vec<&str> = partners.keys().map(String::as_str).collect();
        assert_eq!(order, vec![first.id.as_str(), second.id.as_str()]);
        Ok(())
    }

    #[test]
    fn saving_existing_partner_keeps_position() -> Result<()> {
        let (_temp, mut store) = store();
        let mut first = PartnerProfile::new("Mina");
        let second = PartnerProfile::new("Alex");
        save_partner(&mut store, &first)?;
        save_partner(&mut store, &second)?;

        first.goal = "Date".to_string();
        save_partner(&mut store, &first)?;

        let partners = load_partners(&mut store);
        let order: Vec<&str> = partners.keys().map(String::as_str).collect();
        assert_eq!(order, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(partners[&first.id].goal, "Date");
        Ok(())
    }

    #[test]
    fn remove_partner_deletes_by_id() -> Result<()> {
        let (_temp, mut store) = store();
        let partner = PartnerProfile::new("Mina");
        save_partner(&mut store, &partner)?;

        assert!(remove_partner(&mut store, &partner.id)?);
        assert!(!remove_partner(&mut store, &partner.id)?);
        assert!(load_partners(&mut store).is_empty());
        Ok(())
    }

    #[test]
    fn language_parse_rejects_unsupported_codes() {
        assert!(Language::from_str("de").is_err());
        assert_eq!(Language::from_str("KO").unwrap(), Language::Ko);
    }
}
