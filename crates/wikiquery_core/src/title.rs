use serde::Serialize;

pub const NS_MAIN: i64 = 0;
pub const NS_TALK: i64 = 1;
pub const NS_USER: i64 = 2;
pub const NS_PROJECT: i64 = 4;
pub const NS_FILE: i64 = 6;
pub const NS_MEDIAWIKI: i64 = 8;
pub const NS_TEMPLATE: i64 = 10;
pub const NS_CATEGORY: i64 = 14;
pub const NS_MODULE: i64 = 828;

const CANONICAL_NAMESPACES: &[(i64, &str)] = &[
    (NS_TALK, "Talk"),
    (NS_USER, "User"),
    (3, "User talk"),
    (NS_PROJECT, "Project"),
    (NS_FILE, "File"),
    (NS_MEDIAWIKI, "MediaWiki"),
    (NS_TEMPLATE, "Template"),
    (12, "Help"),
    (NS_CATEGORY, "Category"),
    (NS_MODULE, "Module"),
];

pub fn namespace_name(namespace: i64) -> Option<&'static str> {
    if namespace == NS_MAIN {
        return Some("");
    }
    CANONICAL_NAMESPACES
        .iter()
        .find(|(id, _)| *id == namespace)
        .map(|(_, name)| *name)
}

fn namespace_id(prefix: &str) -> Option<i64> {
    let prefix = prefix.trim().replace('_', " ");
    CANONICAL_NAMESPACES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(&prefix))
        .map(|(id, _)| *id)
}

/// A namespace plus DB-key title (underscores, first letter uppercased).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Title {
    pub namespace: i64,
    pub dbkey: String,
}

impl Title {
    pub fn new(namespace: i64, text: &str) -> Option<Self> {
        let dbkey = text_to_dbkey(text);
        if dbkey.is_empty() {
            return None;
        }
        Some(Self { namespace, dbkey })
    }

    /// Parses user input such as `Category:Foo bar`; unknown prefixes stay in the main namespace.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim().trim_start_matches(':');
        if let Some((prefix, rest)) = trimmed.split_once(':')
            && let Some(namespace) = namespace_id(prefix)
        {
            return Self::new(namespace, rest);
        }
        Self::new(NS_MAIN, trimmed)
    }

    /// The prefixed display form, e.g. `Category:Foo bar`.
    pub fn full_text(&self) -> String {
        prefixed_text(self.namespace, &self.dbkey)
    }
}

pub fn prefixed_text(namespace: i64, dbkey: &str) -> String {
    let text = dbkey.replace('_', " ");
    match namespace_name(namespace) {
        Some("") => text,
        Some(name) => format!("{name}:{text}"),
        None => format!("Namespace{namespace}:{text}"),
    }
}

/// Converts free text to DB-key form: collapsed whitespace as underscores and
/// an uppercased first letter.
pub fn text_to_dbkey(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut previous_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() || ch == '_' {
            if !previous_was_space {
                collapsed.push('_');
                previous_was_space = true;
            }
        } else {
            collapsed.push(ch);
            previous_was_space = false;
        }
    }
    let trimmed = collapsed.trim_matches('_');

    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
