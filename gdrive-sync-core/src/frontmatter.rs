//! YAML frontmatter codec: `---` delimited metadata block followed by a body.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

const DELIMITER: &str = "---";

/// A parsed artifact: ordered metadata mapping plus Markdown body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub metadata: Mapping,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("frontmatter is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("frontmatter must be a mapping, found {0}")]
    NotAMapping(&'static str),
}

/// Split `text` into metadata and body.
///
/// Text that does not open with a `---` line, or whose block is never closed,
/// has no frontmatter: the metadata is empty and the body is the whole text.
pub fn parse(text: &str) -> Result<Document, FrontmatterError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some((yaml, body)) = split(text) else {
        return Ok(Document {
            metadata: Mapping::new(),
            body: text.to_string(),
        });
    };

    let metadata = if yaml.trim().is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str::<Value>(yaml)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            other => return Err(FrontmatterError::NotAMapping(kind_of(&other))),
        }
    };

    Ok(Document {
        metadata,
        body: body.to_string(),
    })
}

/// Serialise a document as `---\n<yaml>---\n\n<body>`.
pub fn render(doc: &Document) -> Result<String, FrontmatterError> {
    let yaml = if doc.metadata.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(&doc.metadata)?
    };
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{}", doc.body))
}

/// Returns `(yaml, body)` when `text` carries a closed frontmatter block.
fn split(text: &str) -> Option<(&str, &str)> {
    let first_line_end = text.find('\n')?;
    if text[..first_line_end].trim_end() != DELIMITER {
        return None;
    }
    let rest = &text[first_line_end + 1..];

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let yaml = &rest[..offset];
            let body = rest[offset + line.len()..].trim_start_matches(['\r', '\n']);
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// String value of `key`, if present and a string.
pub fn get_str<'a>(metadata: &'a Mapping, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_and_body() {
        let doc = parse("---\ntitle: Hello\ndraft: true\n---\n\n# Body\n").unwrap();
        assert_eq!(get_str(&doc.metadata, "title"), Some("Hello"));
        assert_eq!(doc.metadata.get("draft"), Some(&Value::Bool(true)));
        assert_eq!(doc.body, "# Body\n");
    }

    #[test]
    fn text_without_block_is_all_body() {
        let doc = parse("# Just markdown\n\n---\n").unwrap();
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, "# Just markdown\n\n---\n");
    }

    #[test]
    fn unterminated_block_is_all_body() {
        let text = "---\ntitle: x\nno closing line\n";
        let doc = parse(text).unwrap();
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, text);
    }

    #[test]
    fn non_mapping_frontmatter_is_rejected() {
        let err = parse("---\n- a\n- b\n---\nbody").unwrap_err();
        assert!(matches!(err, FrontmatterError::NotAMapping("a sequence")));
    }

    #[test]
    fn broken_yaml_is_rejected() {
        assert!(matches!(
            parse("---\ntitle: [unclosed\n---\nbody"),
            Err(FrontmatterError::Yaml(_))
        ));
    }

    #[test]
    fn render_then_parse_keeps_strings_verbatim() {
        let mut metadata = Mapping::new();
        metadata.insert("title".into(), "A: tricky # title".into());
        metadata.insert("source_modified_at".into(), "2024-02-02T03:04:05.123Z".into());
        let text = render(&Document {
            metadata,
            body: "body\n".into(),
        })
        .unwrap();
        assert!(text.starts_with("---\n"));

        let doc = parse(&text).unwrap();
        assert_eq!(get_str(&doc.metadata, "title"), Some("A: tricky # title"));
        assert_eq!(
            get_str(&doc.metadata, "source_modified_at"),
            Some("2024-02-02T03:04:05.123Z")
        );
        assert_eq!(doc.body, "body\n");
    }
}
