use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::element::{FieldKind, FileHandle, FormControl, FormElement};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    /// Most recently selected first.
    Files(Vec<FileHandle>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Truthiness used when a value is written into a checkbox.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Text(value) => !value.is_empty(),
            FieldValue::Bool(value) => *value,
            FieldValue::Files(files) => !files.is_empty(),
        }
    }

    pub(crate) fn query_values(&self) -> Vec<String> {
        match self {
            FieldValue::Text(value) => vec![value.clone()],
            FieldValue::Bool(value) => vec![value.to_string()],
            FieldValue::Files(files) => files.iter().map(|file| file.name.clone()).collect(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(value) => serializer.serialize_str(value),
            FieldValue::Bool(value) => serializer.serialize_bool(*value),
            FieldValue::Files(files) => {
                let mut seq = serializer.serialize_seq(Some(files.len()))?;
                for file in files {
                    seq.serialize_element(&file.name)?;
                }
                seq.end()
            }
        }
    }
}

/// Snapshot of the form's values, keyed by field name in control order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FormData {
    entries: Vec<(String, FieldValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`. A replaced entry keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattened `(name, value)` pairs for query strings and URL-encoded bodies.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .flat_map(|(key, value)| {
                value
                    .query_values()
                    .into_iter()
                    .map(move |rendered| (key.clone(), rendered))
            })
            .collect()
    }

    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query_pairs())
            .finish()
    }
}

impl Serialize for FormData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Current value of a single control, by kind.
pub fn control_value(control: &dyn FormControl) -> FieldValue {
    match control.kind() {
        FieldKind::Checkbox => FieldValue::Bool(control.checked()),
        FieldKind::File => FieldValue::Files(recent_first(control.files())),
        FieldKind::Text | FieldKind::Other => FieldValue::Text(control.value()),
    }
}

pub(crate) fn recent_first(mut files: Vec<FileHandle>) -> Vec<FileHandle> {
    files.reverse();
    files
}

/// Snapshots every named control of `form`.
///
/// Entries whose key differs from the control's own name are skipped. Controls sharing a
/// name are not aggregated: the last one wins.
pub fn collect(form: &dyn FormElement) -> FormData {
    let mut data = FormData::new();
    for (key, control) in form.entries() {
        if key != control.name() {
            continue;
        }
        data.insert(key, control_value(control.as_ref()));
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::memory::{InMemoryControl, InMemoryForm};

    fn signup_form() -> InMemoryForm {
        let avatar = InMemoryControl::file("avatar");
        avatar.select_files(vec![FileHandle::new("a.png", 10), FileHandle::new("b.png", 20)]);
        InMemoryForm::new("signup")
            .with_control(InMemoryControl::text("username", "joe"))
            .with_control(InMemoryControl::checkbox("agree", true))
            .with_control(avatar)
            .with_control(InMemoryControl::other("", "unnamed button"))
    }

    #[test]
    fn collects_values_per_field_kind() {
        let data = collect(&signup_form());

        assert_eq!(data.get("username"), Some(&FieldValue::Text("joe".into())));
        assert_eq!(data.get("agree"), Some(&FieldValue::Bool(true)));
        let files = match data.get("avatar") {
            Some(FieldValue::Files(files)) => files.clone(),
            other => panic!("expected file list, got {other:?}"),
        };
        assert_eq!(files[0].name, "b.png");
        assert_eq!(files[1].name, "a.png");
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn skips_entries_whose_key_differs_from_control_name() {
        let form = signup_form();
        form.insert_alias("alias", InMemoryControl::text("real_name", "x"));

        let data = collect(&form);
        assert!(!data.contains("alias"));
        assert!(!data.contains("real_name"));
    }

    #[test]
    fn last_control_with_same_name_wins() {
        let form = InMemoryForm::new("prefs")
            .with_control(InMemoryControl::text("color", "red"))
            .with_control(InMemoryControl::text("size", "m"))
            .with_control(InMemoryControl::text("color", "blue"));

        let data = collect(&form);
        assert_eq!(data.get("color").and_then(FieldValue::as_text), Some("blue"));
        assert_eq!(data.names().collect::<Vec<_>>(), vec!["color", "size"]);
    }

    #[test]
    fn serializes_in_control_order() {
        let json = serde_json::to_string(&collect(&signup_form())).expect("serialize form data");
        assert_eq!(
            json,
            r#"{"username":"joe","agree":true,"avatar":["b.png","a.png"]}"#
        );
    }

    #[test]
    fn query_string_encodes_every_value() {
        let mut data = FormData::new();
        data.insert("q", "rust & go".into());
        data.insert("safe", true.into());
        assert_eq!(data.to_query_string(), "q=rust+%26+go&safe=true");
    }
}
