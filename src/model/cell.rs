//! Sheet cell values, plain or rich.

use std::fmt;

/// Value of one sheet cell.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// Plain text.
    Text(String),
    /// Hyperlink with display text.
    Link { text: String, url: String },
    /// Embedded image sourced from a URL.
    Image { source_url: String, alt_title: String },
}

impl CellValue {
    /// Build a rich hyperlink. `None` if there is nothing to link to.
    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Option<Self> {
        let url = url.into();
        if url.is_empty() {
            return None;
        }
        Some(Self::Link {
            text: text.into(),
            url,
        })
    }

    /// Build an embeddable image. `None` if the source URL is empty.
    pub fn image(source_url: impl Into<String>, alt_title: impl Into<String>) -> Option<Self> {
        let source_url = source_url.into();
        if source_url.is_empty() {
            return None;
        }
        Some(Self::Image {
            source_url,
            alt_title: alt_title.into(),
        })
    }

    /// Plain-text representation, as a sheet would report the cell's value.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Link { text, .. } => text,
            Self::Image { alt_title, .. } => alt_title,
        }
    }

    pub fn is_rich(&self) -> bool {
        !matches!(self, Self::Text(_))
    }

    /// Spreadsheet formula form: `=HYPERLINK("url","text")`, `=IMAGE("url","alt")`.
    /// Plain text is returned unchanged.
    pub fn to_formula(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Link { text, url } => {
                format!("=HYPERLINK(\"{}\",\"{}\")", quote(url), quote(text))
            }
            Self::Image {
                source_url,
                alt_title,
            } => format!("=IMAGE(\"{}\",\"{}\")", quote(source_url), quote(alt_title)),
        }
    }

    /// Inverse of [`CellValue::to_formula`]. Anything unrecognised is text.
    pub fn from_formula(raw: &str) -> Self {
        if let Some(args) = formula_args(raw, "=HYPERLINK(") {
            if let [url, text] = args.as_slice() {
                return Self::Link {
                    text: text.clone(),
                    url: url.clone(),
                };
            }
        }
        if let Some(args) = formula_args(raw, "=IMAGE(") {
            if let [source_url, alt_title] = args.as_slice() {
                return Self::Image {
                    source_url: source_url.clone(),
                    alt_title: alt_title.clone(),
                };
            }
        }
        Self::Text(raw.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

fn quote(s: &str) -> String {
    s.replace('"', "\"\"")
}

/// Parse the quoted string arguments of `NAME("a","b")`.
fn formula_args(raw: &str, prefix: &str) -> Option<Vec<String>> {
    let inner = raw.strip_prefix(prefix)?.strip_suffix(')')?;
    let mut args = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        if chars.next()? != '"' {
            return None;
        }
        let mut arg = String::new();
        loop {
            match chars.next()? {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    arg.push('"');
                }
                '"' => break,
                c => arg.push(c),
            }
        }
        args.push(arg);
        match chars.next() {
            None => return Some(args),
            Some(',') => continue,
            Some(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_requires_url() {
        assert!(CellValue::link("report.pdf", "").is_none());
        let link = CellValue::link("report.pdf", "file:///tmp/report.pdf").expect("link");
        assert_eq!(link.as_text(), "report.pdf");
        assert!(link.is_rich());
    }

    #[test]
    fn test_formula_with_quotes() {
        let link = CellValue::Link {
            text: "say \"hi\".txt".into(),
            url: "https://example.com/a".into(),
        };
        let formula = link.to_formula();
        assert_eq!(
            formula,
            "=HYPERLINK(\"https://example.com/a\",\"say \"\"hi\"\".txt\")"
        );
        assert_eq!(CellValue::from_formula(&formula), link);
    }

    #[test]
    fn test_json_shape() {
        let text = serde_json::to_value(CellValue::from("m1")).unwrap();
        assert_eq!(text, serde_json::json!({"kind": "text", "value": "m1"}));
        let link = CellValue::link("a.pdf", "file:///a.pdf").unwrap();
        let json = serde_json::to_string(&link).unwrap();
        assert_eq!(serde_json::from_str::<CellValue>(&json).unwrap(), link);
    }

    #[test]
    fn test_from_formula_plain_text() {
        assert_eq!(
            CellValue::from_formula("=SUM(A1:A3)"),
            CellValue::Text("=SUM(A1:A3)".into())
        );
        assert_eq!(
            CellValue::from_formula("=IMAGE(\"u\""),
            CellValue::Text("=IMAGE(\"u\"".into())
        );
    }
}
