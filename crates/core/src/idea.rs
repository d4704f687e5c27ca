//! Idea records.

use serde::{Deserialize, Serialize};

/// A single idea record.
///
/// `id` is an opaque string, unique within one user's record set. Ids are
/// compared for equality only; [`Idea::numeric_id`] exists solely to derive
/// the next locally-allocated id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Index into the client's fish asset list. Opaque to the engine.
    #[serde(default)]
    pub fish_type: u32,
    #[serde(default)]
    pub is_done: bool,
}

impl Idea {
    /// Check the record can be stored under its id.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.is_empty() {
            return Err(crate::Error::InvalidIdea("id must not be empty".to_string()));
        }
        Ok(())
    }

    /// The id parsed as a non-negative integer, if it is one.
    ///
    /// Wider than any timestamp-derived id so a `u64::MAX` id still has a
    /// successor. Digit strings beyond `u128` are treated as non-numeric.
    pub fn numeric_id(&self) -> Option<u128> {
        if !self.id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.id.parse::<u128>().ok()
    }
}

/// User-supplied fields of an idea before an id is assigned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaDraft {
    pub name: String,
    pub description: String,
    pub fish_type: u32,
    pub is_done: bool,
}

impl IdeaDraft {
    /// Attach an id, producing a full record.
    pub fn into_idea(self, id: impl Into<String>) -> Idea {
        Idea {
            id: id.into(),
            name: self.name,
            description: self.description,
            fish_type: self.fish_type,
            is_done: self.is_done,
        }
    }
}

/// Next id to allocate locally: one past the highest integer id in `ideas`.
///
/// Non-numeric ids are ignored. An empty (or all non-numeric) set yields
/// [`crate::FIRST_LOCAL_ID`]. Saturates at `u128::MAX`; callers allocating
/// ids must still check the candidate is free.
pub fn next_local_id<'a>(ideas: impl IntoIterator<Item = &'a Idea>) -> u128 {
    ideas
        .into_iter()
        .filter_map(Idea::numeric_id)
        .max()
        .map(|max| max.saturating_add(1))
        .unwrap_or(crate::FIRST_LOCAL_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idea(id: &str) -> Idea {
        IdeaDraft::default().into_idea(id)
    }

    #[test]
    fn test_idea_wire_format_is_camel_case() {
        let idea = Idea {
            id: "7".to_string(),
            name: "reef".to_string(),
            description: "coral".to_string(),
            fish_type: 3,
            is_done: true,
        };
        let json = serde_json::to_value(&idea).unwrap();
        assert_eq!(json["fishType"], 3);
        assert_eq!(json["isDone"], true);
        assert!(json.get("fish_type").is_none());
    }

    #[test]
    fn test_idea_missing_optional_fields_default() {
        let idea: Idea = serde_json::from_str(r#"{"id":"1","name":"a"}"#).unwrap();
        assert_eq!(idea.description, "");
        assert_eq!(idea.fish_type, 0);
        assert!(!idea.is_done);
    }

    #[test]
    fn test_idea_without_id_is_rejected_by_serde() {
        assert!(serde_json::from_str::<Idea>(r#"{"name":"a"}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        assert!(idea("").validate().is_err());
        assert!(idea("1").validate().is_ok());
    }

    #[test]
    fn test_next_local_id_empty() {
        assert_eq!(next_local_id(&Vec::<Idea>::new()), 1);
    }

    #[test]
    fn test_next_local_id_skips_non_numeric() {
        let ideas = vec![idea("2"), idea("abc"), idea("1")];
        assert_eq!(next_local_id(&ideas), 3);

        let only_text = vec![idea("x-1")];
        assert_eq!(next_local_id(&only_text), 1);
    }

    #[test]
    fn test_next_local_id_past_u64_range() {
        let ideas = vec![idea("18446744073709551615")];
        assert_eq!(next_local_id(&ideas), 18_446_744_073_709_551_616);

        let ideas = vec![idea("3"), idea("18446744073709551616")];
        assert_eq!(next_local_id(&ideas), 18_446_744_073_709_551_617);
    }

    #[test]
    fn test_numeric_id_rejects_signs_and_overflow() {
        assert_eq!(idea("+5").numeric_id(), None);
        assert_eq!(idea("-5").numeric_id(), None);
        assert_eq!(idea("007").numeric_id(), Some(7));
        assert_eq!(idea(&"9".repeat(40)).numeric_id(), None);
    }

    #[test]
    fn test_next_local_id_handles_timestamp_ids() {
        let ideas = vec![idea("1"), idea("1760000000000")];
        assert_eq!(next_local_id(&ideas), 1_760_000_000_001);
    }
}
