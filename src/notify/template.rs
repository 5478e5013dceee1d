//! Mail templates. Placeholders are written `[%key%]` and filled from the
//! notification's JSON data; values are HTML-escaped.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde_json::Value;

use crate::error::DeliveryError;

pub const CONFIRMATION: &str = "confirmation";
pub const STAFF_NOTICE: &str = "staff-notice";
pub const CANCELLATION: &str = "cancellation";

const BUILTIN: &[(&str, &str)] = &[
    (
        CONFIRMATION,
        "<p>Dear [%first_name%],</p>\n\
         <p>This is to confirm your reservation of [%room%] from [%start%] to [%end%].</p>\n\
         <p>Reservation number: [%reservation_id%]</p>\n",
    ),
    (
        STAFF_NOTICE,
        "<p>New reservation [%reservation_id%]</p>\n\
         <p>[%first_name%] [%last_name%] ([%email%], [%phone%]) booked [%room%] \
         from [%start%] to [%end%].</p>\n",
    ),
    (
        CANCELLATION,
        "<p>Dear [%first_name%],</p>\n\
         <p>Your reservation of [%room%] from [%start%] to [%end%] has been cancelled.</p>\n",
    ),
];

#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<String, String>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateSet {
    pub fn builtin() -> Self {
        Self {
            templates: BUILTIN
                .iter()
                .map(|(name, body)| (name.to_string(), body.to_string()))
                .collect(),
        }
    }

    /// Built-ins overridden (or extended) by every `*.html` file in `dir`,
    /// keyed by file stem.
    pub fn load_dir(dir: &Path) -> io::Result<Self> {
        let mut set = Self::builtin();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            set.insert(name, std::fs::read_to_string(&path)?);
            tracing::debug!("loaded mail template {name} from {}", path.display());
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: &str, body: String) {
        self.templates.insert(name.to_string(), body);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Fill `[%key%]` placeholders from `data`. Unknown keys render empty;
    /// an unterminated `[%` is copied through verbatim.
    pub fn render(&self, name: &str, data: &Value) -> Result<String, DeliveryError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| DeliveryError::MissingTemplate(name.to_string()))?;

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find("[%") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("%]") else {
                out.push_str(&rest[open..]);
                return Ok(out);
            };
            let key = after[..close].trim();
            match data.get(key) {
                Some(Value::String(s)) => push_escaped(&mut out, s),
                Some(Value::Null) | None => {}
                Some(other) => push_escaped(&mut out, &other.to_string()),
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_templates_present() {
        let set = TemplateSet::builtin();
        for name in [CONFIRMATION, STAFF_NOTICE, CANCELLATION] {
            assert!(set.contains(name), "missing {name}");
        }
    }

    #[test]
    fn placeholders_filled() {
        let mut set = TemplateSet::builtin();
        set.insert("t", "Hi [%name%], [% nights %] nights.[%missing%]".into());
        let out = set.render("t", &json!({ "name": "Ada", "nights": 3 })).unwrap();
        assert_eq!(out, "Hi Ada, 3 nights.");
    }

    #[test]
    fn values_are_escaped() {
        let mut set = TemplateSet::builtin();
        set.insert("t", "<b>[%name%]</b>".into());
        let out = set.render("t", &json!({ "name": "<script>&" })).unwrap();
        assert_eq!(out, "<b>&lt;script&gt;&amp;</b>");
    }

    #[test]
    fn unterminated_placeholder_copied() {
        let mut set = TemplateSet::builtin();
        set.insert("t", "a [%b".into());
        assert_eq!(set.render("t", &json!({})).unwrap(), "a [%b");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = TemplateSet::builtin().render("nope", &json!({})).unwrap_err();
        assert!(matches!(err, DeliveryError::MissingTemplate(name) if name == "nope"));
    }

    #[test]
    fn load_dir_overrides_builtin() {
        let dir = std::env::temp_dir().join("bookings_test_templates");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("confirmation.html"), "Booked [%room%]").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let set = TemplateSet::load_dir(&dir).unwrap();
        assert_eq!(
            set.render(CONFIRMATION, &json!({ "room": "Major's Suite" })).unwrap(),
            "Booked Major&#39;s Suite"
        );
        assert!(set.contains(STAFF_NOTICE));
        assert!(!set.contains("notes"));
    }
}
