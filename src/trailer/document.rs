//! Board metadata carried in the JSON trailer.
//!
//! The document is kept as a generic [`serde_json::Value`] tree so that keys
//! this crate does not know about survive a decode/encode cycle. The helpers
//! below only interpret the conventional shape:
//!
//! ```json
//! {
//!   "part": [{"reference": "U1", "value": "IC", "alias": "Chip1",
//!             "pad": [{"name": "1", "alias": "A1", "diode": "0"}]}],
//!   "net":  [{"name": "NET1", "alias": "Signal1"}]
//! }
//! ```

use serde_json::{json, Map, Value};

use crate::trailer::errors::DocumentError;

const PART_KEY: &str = "part";
const PAD_KEY: &str = "pad";
const NET_KEY: &str = "net";

/// Pad keys holding a diode reading, in lookup order after `diode`.
const READING_KEYS: [&str; 6] = [
    "diode_reading",
    "diodeReading",
    "voltage",
    "reading",
    "test_voltage",
    "testVoltage",
];

/// Optional field values for creating or updating a part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartFields {
    pub reference: Option<String>,
    pub value: Option<String>,
    pub alias: Option<String>,
}

/// Optional field values for creating or updating a pad.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PadFields {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub diode: Option<String>,
}

/// Optional field values for creating or updating a trailer net.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetFields {
    pub name: Option<String>,
    pub alias: Option<String>,
}

/// A trailer document: always a JSON object at the top level.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardDocument(Map<String, Value>);

impl BoardDocument {
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(DocumentError::NotAnObject),
        }
    }

    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// The document written by a fresh trailer.
    pub fn default_board() -> Self {
        let document = json!({
            "part": [{
                "reference": "U1",
                "value": "IC",
                "alias": "Chip1",
                "pad": [{"name": "1", "alias": "A1", "diode": "0"}]
            }],
            "net": [{"name": "NET1", "alias": "Signal1"}]
        });
        match document {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Mutable access to the raw top-level object.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }

    pub fn parts(&self) -> &[Value] {
        array_of(self.0.get(PART_KEY))
    }

    pub fn nets(&self) -> &[Value] {
        array_of(self.0.get(NET_KEY))
    }

    pub fn pads(&self, part: usize) -> Result<&[Value], DocumentError> {
        let parts = self.parts();
        let part = parts.get(part).ok_or(DocumentError::IndexOutOfRange {
            kind: "part",
            index: part,
            len: parts.len(),
        })?;
        Ok(array_of(part.get(PAD_KEY)))
    }

    /// Append a part, filling unset fields the way the editor always has.
    /// Returns the new part's index.
    pub fn add_part(&mut self, fields: &PartFields) -> Result<usize, DocumentError> {
        let parts = array_entry(self.as_map_mut(), PART_KEY)?;
        let reference = non_empty(&fields.reference)
            .unwrap_or_else(|| format!("U{}", parts.len() + 1));
        let alias = non_empty(&fields.alias)
            .unwrap_or_else(|| format!("{}_alias", reference.to_lowercase()));
        parts.push(json!({
            "reference": reference,
            "value": fields.value.clone().unwrap_or_default(),
            "alias": alias,
            "pad": []
        }));
        Ok(parts.len() - 1)
    }

    pub fn update_part(&mut self, index: usize, fields: &PartFields) -> Result<(), DocumentError> {
        let part = object_at(self.as_map_mut(), PART_KEY, "part", index)?;
        set_field(part, "reference", &fields.reference);
        set_field(part, "value", &fields.value);
        set_field(part, "alias", &fields.alias);
        Ok(())
    }

    pub fn remove_part(&mut self, index: usize) -> Result<Value, DocumentError> {
        remove_at(self.as_map_mut(), PART_KEY, "part", index)
    }

    pub fn add_pad(&mut self, part: usize, fields: &PadFields) -> Result<usize, DocumentError> {
        let part = object_at(self.as_map_mut(), PART_KEY, "part", part)?;
        let pads = array_entry(part, PAD_KEY)?;
        let name = non_empty(&fields.name).unwrap_or_else(|| (pads.len() + 1).to_string());
        let diode = non_empty(&fields.diode).unwrap_or_else(|| "0".to_string());
        pads.push(json!({
            "name": name,
            "alias": fields.alias.clone().unwrap_or_default(),
            "diode": diode
        }));
        Ok(pads.len() - 1)
    }

    pub fn update_pad(
        &mut self,
        part: usize,
        pad: usize,
        fields: &PadFields,
    ) -> Result<(), DocumentError> {
        let part = object_at(self.as_map_mut(), PART_KEY, "part", part)?;
        let pad = object_at(part, PAD_KEY, "pad", pad)?;
        set_field(pad, "name", &fields.name);
        set_field(pad, "alias", &fields.alias);
        set_field(pad, "diode", &fields.diode);
        Ok(())
    }

    pub fn remove_pad(&mut self, part: usize, pad: usize) -> Result<Value, DocumentError> {
        let part = object_at(self.as_map_mut(), PART_KEY, "part", part)?;
        remove_at(part, PAD_KEY, "pad", pad)
    }

    pub fn add_net(&mut self, fields: &NetFields) -> Result<usize, DocumentError> {
        let nets = array_entry(self.as_map_mut(), NET_KEY)?;
        let name = non_empty(&fields.name).unwrap_or_else(|| format!("NET{}", nets.len() + 1));
        let alias = non_empty(&fields.alias)
            .unwrap_or_else(|| format!("{}_alias", name.to_lowercase()));
        nets.push(json!({"name": name, "alias": alias}));
        Ok(nets.len() - 1)
    }

    pub fn update_net(&mut self, index: usize, fields: &NetFields) -> Result<(), DocumentError> {
        let net = object_at(self.as_map_mut(), NET_KEY, "net", index)?;
        set_field(net, "name", &fields.name);
        set_field(net, "alias", &fields.alias);
        Ok(())
    }

    pub fn remove_net(&mut self, index: usize) -> Result<Value, DocumentError> {
        remove_at(self.as_map_mut(), NET_KEY, "net", index)
    }

    /// Indices of parts whose reference, value, alias, or any pad name/alias
    /// contains `term`, case-insensitively. An empty term matches every part.
    pub fn search_parts(&self, term: &str) -> Vec<usize> {
        let term = term.trim().to_lowercase();
        self.parts()
            .iter()
            .enumerate()
            .filter(|(_, part)| {
                term.is_empty()
                    || ["reference", "value", "alias"]
                        .iter()
                        .any(|key| field_contains(part, key, &term))
                    || array_of(part.get(PAD_KEY)).iter().any(|pad| {
                        field_contains(pad, "name", &term) || field_contains(pad, "alias", &term)
                    })
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Indices of nets whose name or alias contains `term`, case-insensitively.
    pub fn search_nets(&self, term: &str) -> Vec<usize> {
        let term = term.trim().to_lowercase();
        self.nets()
            .iter()
            .enumerate()
            .filter(|(_, net)| {
                term.is_empty()
                    || field_contains(net, "name", &term)
                    || field_contains(net, "alias", &term)
            })
            .map(|(index, _)| index)
            .collect()
    }
}

/// Human-readable diode reading of a pad.
///
/// `diode` is shown verbatim; the older reading keys get a `V` suffix.
pub fn diode_reading(pad: &Value) -> Option<String> {
    if let Some(diode) = pad.get("diode") {
        return Some(scalar_text(diode));
    }
    READING_KEYS
        .iter()
        .find_map(|key| pad.get(*key))
        .map(|reading| format!("{}V", scalar_text(reading)))
}

/// Text of a field, rendering non-string scalars as JSON.
pub fn field_text(value: &Value, key: &str) -> Option<String> {
    value.get(key).map(scalar_text)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_contains(value: &Value, key: &str, lowercase_term: &str) -> bool {
    field_text(value, key).is_some_and(|text| text.to_lowercase().contains(lowercase_term))
}

fn array_of(value: Option<&Value>) -> &[Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn set_field(object: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        object.insert(key.to_string(), Value::String(value.clone()));
    }
}

/// The array under `key`, created empty when missing.
fn array_entry<'a>(
    object: &'a mut Map<String, Value>,
    key: &str,
) -> Result<&'a mut Vec<Value>, DocumentError> {
    object
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| DocumentError::NotAnArray {
            key: key.to_string(),
        })
}

/// Element `index` of the array under `key`; a missing array counts as empty.
fn element_at<'a>(
    object: &'a mut Map<String, Value>,
    key: &str,
    kind: &'static str,
    index: usize,
) -> Result<&'a mut Value, DocumentError> {
    let items = match object.get_mut(key) {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(DocumentError::NotAnArray {
                key: key.to_string(),
            })
        }
        None => return Err(DocumentError::IndexOutOfRange { kind, index, len: 0 }),
    };
    let len = items.len();
    items
        .get_mut(index)
        .ok_or(DocumentError::IndexOutOfRange { kind, index, len })
}

fn object_at<'a>(
    object: &'a mut Map<String, Value>,
    key: &str,
    kind: &'static str,
    index: usize,
) -> Result<&'a mut Map<String, Value>, DocumentError> {
    element_at(object, key, kind, index)?
        .as_object_mut()
        .ok_or(DocumentError::NotAnObject)
}

fn remove_at(
    object: &mut Map<String, Value>,
    key: &str,
    kind: &'static str,
    index: usize,
) -> Result<Value, DocumentError> {
    element_at(object, key, kind, index)?;
    match object.get_mut(key) {
        Some(Value::Array(items)) => Ok(items.remove(index)),
        _ => Err(DocumentError::NotAnArray {
            key: key.to_string(),
        }),
    }
}
