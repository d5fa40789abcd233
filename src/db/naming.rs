//! T-SQL object names and literals.
//!
//! Parses one- to four-part names (`[linked].[db].[schema].[table]`) with
//! bracket-aware splitting, and renders them back with every part quoted.

use crate::error::{HarvestError, Result};
use std::fmt;

/// Schema assumed when a linked-server name needs one and none was given.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// A possibly qualified reference to a table or view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableRef {
    /// Linked server name (four-part names only).
    pub server: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Creates an unqualified table reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a `schema.table` reference.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parses `table`, `schema.table`, `db.schema.table` or
    /// `server.db.schema.table`. Parts may be bracketed; `]]` inside brackets
    /// is an escaped `]`.
    pub fn parse(input: &str) -> Result<Self> {
        let parts = split_parts(input)?;
        let mut parts = parts.into_iter().rev();

        let name = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| HarvestError::config(format!("Invalid table name: '{input}'")))?;
        let schema = parts.next().filter(|p| !p.is_empty());
        let database = parts.next().filter(|p| !p.is_empty());
        let server = parts.next().filter(|p| !p.is_empty());

        Ok(Self {
            server,
            database,
            schema,
            name,
        })
    }

    /// Routes the reference through a linked server.
    ///
    /// A linked server needs the full four-part name, so the database falls
    /// back to `default_database` and the schema to `dbo`.
    pub fn via_linked_server(
        mut self,
        server: impl Into<String>,
        default_database: Option<&str>,
    ) -> Result<Self> {
        if self.database.is_none() {
            self.database = default_database.map(String::from);
        }
        if self.database.is_none() {
            return Err(HarvestError::config(format!(
                "Linked server query for '{}' needs a database name",
                self.name
            )));
        }
        if self.schema.is_none() {
            self.schema = Some(DEFAULT_SCHEMA.to_string());
        }
        self.server = Some(server.into());
        Ok(self)
    }

    /// Returns `schema.table` without brackets, as shown in reports.
    pub fn display_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Returns the fully quoted name, e.g. `[LINK].[Sales].[dbo].[Orders]`.
    pub fn quoted(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(4);
        if let Some(server) = &self.server {
            parts.push(quote_ident(server));
        }
        if let Some(database) = &self.database {
            parts.push(quote_ident(database));
        } else if self.server.is_some() {
            parts.push(String::new());
        }
        if let Some(schema) = &self.schema {
            parts.push(quote_ident(schema));
        } else if self.database.is_some() || self.server.is_some() {
            // `db..table` resolves to the default schema
            parts.push(String::new());
        }
        parts.push(quote_ident(&self.name));
        parts.join(".")
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted())
    }
}

/// Quotes an identifier with brackets, escaping `]`.
pub fn quote_ident(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// Quotes a Unicode string literal, escaping `'`.
pub fn quote_literal(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

/// Strips brackets from every part of a dotted name, keeping the dots.
pub fn strip_brackets(input: &str) -> String {
    input.replace(['[', ']'], "")
}

fn split_parts(input: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.trim().chars().peekable();
    let mut in_brackets = false;

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets => {
                if chars.peek() == Some(&']') {
                    chars.next();
                    current.push(']');
                } else {
                    in_brackets = false;
                }
            }
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_brackets {
        return Err(HarvestError::config(format!(
            "Unclosed bracket in name: '{input}'"
        )));
    }
    parts.push(current);

    if parts.len() > 4 {
        return Err(HarvestError::config(format!(
            "Too many name parts in '{input}' (at most server.database.schema.table)"
        )));
    }

    Ok(parts.into_iter().map(|p| p.trim().to_string()).collect())
}
