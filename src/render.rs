//! Token-macro expansion for issue titles and bodies.
//!
//! Templates use `$NAME`, `${NAME}` or `${NAME, key=value, ...}` tokens; `$$`
//! is a literal dollar sign.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_TITLE: &str = "$JOB_NAME $BUILD_DISPLAY_NAME failed";

pub const DEFAULT_BODY: &str = r#"Build '$JOB_NAME' is failing!

Last 50 lines of build output:

```
${BUILD_LOG, maxLines=50}
```

Changes since last successful build:
${CHANGES_SINCE_LAST_SUCCESS, format="%c", changesFormat="- [%a] %r - %m\n"}

[View full output]($BUILD_URL)"#;

const DEFAULT_LOG_LINES: usize = 50;

/// A commit included in the build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub message: String,
}

/// Everything a template can refer to.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub job_name: String,
    pub build_number: Option<u64>,
    pub display_name: String,
    pub url: String,
    /// Trailing lines of build output, oldest first.
    pub log_tail: Vec<String>,
    /// Changes since the last successful build, oldest first.
    pub changes: Vec<Change>,
}

impl BuildContext {
    /// The build's display name, `#<number>` when the runner sent none.
    pub fn display(&self) -> String {
        if !self.display_name.is_empty() {
            return self.display_name.clone();
        }
        self.build_number
            .map(|n| format!("#{n}"))
            .unwrap_or_default()
    }
}

pub trait TextRenderer: Send + Sync {
    fn render(&self, template: &str, context: &BuildContext) -> Result<String>;
}

/// Render a template, falling back to the raw text when expansion fails.
pub fn render_or_raw(renderer: &dyn TextRenderer, template: &str, context: &BuildContext) -> String {
    match renderer.render(template, context) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                job = %context.job_name,
                error = %e,
                "Unable to expand tokens, using template text as is"
            );
            template.to_string()
        }
    }
}

/// Parse changes passed on the command line: a JSON array of changes, or
/// one `author|revision|message` per line. A line without separators is
/// taken as the message alone.
pub fn parse_changes(raw: &str) -> Result<Vec<Change>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return Ok(serde_json::from_str(raw)?);
    }

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = line.splitn(3, '|').map(str::trim);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(author), Some(revision), Some(message)) => Change {
                    author: author.to_string(),
                    revision: revision.to_string(),
                    message: message.to_string(),
                },
                (Some(author), Some(message), None) => Change {
                    author: author.to_string(),
                    message: message.to_string(),
                    ..Default::default()
                },
                _ => Change {
                    message: line.to_string(),
                    ..Default::default()
                },
            }
        })
        .collect())
}

/// Split a label list on commas and spaces.
pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A `$` token: `$$`, `${NAME, key=value, ...}` or bare `$NAME`. Quoted
/// argument values may contain braces and commas.
const TOKEN_PATTERN: &str =
    r#"\$(?:(\$)|\{((?:[^}"]|"(?:\\.|[^"\\])*")*)\}|([A-Z_][A-Z0-9_]*))"#;

/// One `key=value` or `key="quoted value"` argument inside braces.
const ARG_PATTERN: &str =
    r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"((?:\\.|[^"\\])*)"|([^,"]*?))\s*(?:,|$)"#;

#[derive(Debug, Default, Clone, Copy)]
pub struct TokenRenderer;

impl TextRenderer for TokenRenderer {
    fn render(&self, template: &str, context: &BuildContext) -> Result<String> {
        let token_re = compile(TOKEN_PATTERN)?;
        let arg_re = compile(ARG_PATTERN)?;

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in token_re.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(literal(&template[last..whole.start()])?);
            last = whole.end();

            if caps.get(1).is_some() {
                out.push('$');
            } else if let Some(inner) = caps.get(2) {
                let token = Token::parse(inner.as_str(), &arg_re)?;
                out.push_str(&token.evaluate(context)?);
            } else if let Some(name) = caps.get(3) {
                let token = Token {
                    name: name.as_str(),
                    args: Vec::new(),
                };
                out.push_str(&token.evaluate(context)?);
            }
        }
        out.push_str(literal(&template[last..])?);

        Ok(out)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Render(format!("Invalid token pattern: {e}")))
}

/// Text between tokens. A `${` left here never found its closing brace.
fn literal(text: &str) -> Result<&str> {
    if text.contains("${") {
        return Err(AppError::Render("Unterminated ${...} token".to_string()));
    }
    Ok(text)
}

struct Token<'a> {
    name: &'a str,
    args: Vec<(String, String)>,
}

impl<'a> Token<'a> {
    fn parse(inner: &'a str, arg_re: &Regex) -> Result<Self> {
        let (name, mut rest) = match inner.find(',') {
            Some(i) => (inner[..i].trim(), &inner[i + 1..]),
            None => (inner.trim(), ""),
        };
        if name.is_empty() {
            return Err(AppError::Render("Empty token name".to_string()));
        }

        let mut args = Vec::new();
        while !rest.trim().is_empty() {
            let caps = arg_re
                .captures(rest)
                .ok_or_else(|| AppError::Render(format!("Malformed argument in ${{{inner}}}")))?;
            let value = match (caps.get(2), caps.get(3)) {
                (Some(quoted), _) => unescape_quotes(quoted.as_str()),
                (None, Some(bare)) => bare.as_str().to_string(),
                (None, None) => String::new(),
            };
            args.push((caps[1].to_string(), value));
            rest = &rest[caps[0].len()..];
        }

        Ok(Self { name, args })
    }

    fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn count_arg(&self, key: &str, default: usize) -> Result<usize> {
        match self.arg(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::Render(format!("{key} must be a number, got '{raw}'"))),
            None => Ok(default),
        }
    }

    fn evaluate(&self, context: &BuildContext) -> Result<String> {
        match self.name {
            "JOB_NAME" => Ok(context.job_name.clone()),
            "BUILD_DISPLAY_NAME" => Ok(context.display()),
            "BUILD_NUMBER" => Ok(context.build_number.map(|n| n.to_string()).unwrap_or_default()),
            "BUILD_URL" => Ok(context.url.clone()),
            "BUILD_LOG" => Ok(tail(&context.log_tail, self.count_arg("maxLines", DEFAULT_LOG_LINES)?)),
            "OUTPUT" => Ok(tail(&context.log_tail, self.count_arg("lines", DEFAULT_LOG_LINES)?)),
            "CHANGES_SINCE_LAST_SUCCESS" => Ok(self.changes(context)),
            other => Err(AppError::Render(format!("Unrecognized token ${other}"))),
        }
    }

    fn changes(&self, context: &BuildContext) -> String {
        let changes_format = self.arg("changesFormat").unwrap_or("- [%a] %m\\n");
        let format = self.arg("format").unwrap_or("%c");

        let listed = if context.changes.is_empty() {
            "No changes\n".to_string()
        } else {
            context
                .changes
                .iter()
                .map(|change| {
                    expand_escapes(changes_format)
                        .replace("%a", &change.author)
                        .replace("%r", &change.revision)
                        .replace("%m", &change.message)
                })
                .collect()
        };

        expand_escapes(format).replace("%c", &listed)
    }
}

fn tail(lines: &[String], count: usize) -> String {
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

// Other escapes are left for `expand_escapes`.
fn unescape_quotes(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn expand_escapes(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\t", "\t")
}
