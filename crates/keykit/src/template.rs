//! Named command templates with partial, two-phase rendering.
//!
//! Templates hold `{name}` placeholders. Rendering substitutes the names it
//! has values for and leaves every other placeholder in place, so a later
//! pass can bind values that only become known mid-run (such as a
//! fingerprint resolved from a key file) without re-binding the rest.
//!
//! Rendering never fails. Malformed placeholder syntax is kept as literal
//! text; whether a command is complete is checked when it is executed.

use std::collections::BTreeMap;

/// Values bound to placeholder names.
pub type Values = BTreeMap<String, String>;

/// Default templates for a gpg-compatible key tool.
const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    ("check", "{bin_path} {check_mode} --list-keys {key_id}"),
    ("check-public", "{bin_path} {check_mode} --list-public-keys {key_id}"),
    ("check-private", "{bin_path} {check_mode} --list-secret-keys {key_id}"),
    (
        "delete",
        "{bin_path} {check_mode} --batch --yes --delete-secret-and-public-keys {key_id}",
    ),
    ("import-key", "{bin_path} {check_mode} --batch --import {key_file}"),
    ("import-remote", "{bin_path} {check_mode} --batch --import"),
    (
        "inspect",
        "{bin_path} {check_mode} --with-colons --with-fingerprint {key_file}",
    ),
];

/// A set of named command templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    templates: BTreeMap<String, String>,
}

impl CommandTemplates {
    /// Templates from a name to template map.
    pub fn new(templates: BTreeMap<String, String>) -> Self {
        Self { templates }
    }

    /// Replace or add templates by name.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, template) in overrides {
            self.templates.insert(name.into(), template.into());
        }
        self
    }

    /// Template by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Look up a template that must exist.
    pub fn require(&self, name: &str) -> crate::Result<&str> {
        self.get(name)
            .ok_or_else(|| crate::Error::InvalidCommand(format!("no command template named '{name}'")))
    }

    /// All templates, by name.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.templates
    }

    /// Render every template with the given values.
    ///
    /// The result is itself a template set, ready for a further pass.
    pub fn render(&self, values: &Values) -> Self {
        Self {
            templates: render_all(&self.templates, values),
        }
    }
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES
                .iter()
                .map(|(name, template)| ((*name).to_string(), (*template).to_string()))
                .collect(),
        }
    }
}

/// Render a mapping of named templates.
pub fn render_all(templates: &BTreeMap<String, String>, values: &Values) -> BTreeMap<String, String> {
    templates
        .iter()
        .map(|(name, template)| (name.clone(), render(template, values)))
        .collect()
}

/// Render one template, leaving unknown placeholders intact.
pub fn render(template: &str, values: &Values) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let name = &after[..close];
                match values.get(name) {
                    Some(value) if is_placeholder_name(name) => out.push_str(value),
                    _ => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                // stray or nested brace
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Placeholder names still present in a rendered string.
pub fn unresolved(rendered: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = rendered;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let name = &after[..close];
                if is_placeholder_name(name) {
                    names.push(name.to_string());
                }
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }

    names
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Quote a value so it survives [`split_command`] as one argument.
///
/// Values without whitespace, quotes or backslashes pass through. Others
/// are single-quoted, or double-quoted with `"` and `\` escaped when the
/// value itself holds a single quote.
pub fn quote(value: &str) -> String {
    let special = |c: char| c.is_whitespace() || matches!(c, '\'' | '"' | '\\');
    if !value.chars().any(special) {
        return value.to_string();
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Split a rendered command line into arguments.
///
/// Whitespace separates arguments, so empty placeholder values disappear.
/// Single or double quotes group; inside double quotes a backslash escapes
/// `"` or `\`.
pub fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote_char: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match quote_char {
            Some(q) if c == q => quote_char = None,
            Some('"') if c == '\\' => match chars.peek() {
                Some(&next @ ('"' | '\\')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(c),
            },
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote_char = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if in_arg {
        args.push(current);
    }
    args
}
