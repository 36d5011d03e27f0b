//! Renders requests as gcloud command lines or Datastore Admin API payloads.

use crate::request::{ExportRequest, ImportRequest, ListObjectsQuery, StatusQuery};
use serde::Serialize;
use std::fmt;

pub const GCLOUD: &str = "gcloud";

/// A program plus argv, executable as-is or printable for copy/paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn flag_value(self, flag: &str, value: &str) -> Self {
        self.arg(flag).arg(value)
    }

    fn identity(self, project_id: &str, account: Option<&str>) -> Self {
        let line = self.flag_value("--project", project_id);
        match account {
            Some(account) => line.flag_value("--account", account),
            None => line,
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            f.write_str(" ")?;
            match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    write!(f, "{}=\"{}\"", flag, escape_double_quoted(value))?
                }
                _ if arg.chars().all(is_shell_safe) && !arg.is_empty() => f.write_str(arg)?,
                _ => write!(f, "'{}'", arg.replace('\'', r"'\''"))?,
            }
        }
        Ok(())
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_./:@{}+%,".contains(c)
}

fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn kinds_arg(kinds: &[String]) -> String {
    format!("--kinds={}", kinds.join(","))
}

impl ExportRequest {
    pub fn to_command_line(&self) -> CommandLine {
        CommandLine::new(GCLOUD)
            .arg("datastore")
            .arg("export")
            .identity(&self.project_id, self.account.as_deref())
            .arg(kinds_arg(&self.kinds))
            .arg("--async")
            .arg(self.destination_uri())
    }

    pub fn to_api_payload(&self) -> ExportPayload<'_> {
        ExportPayload {
            output_url_prefix: self.destination_uri(),
            entity_filter: EntityFilter { kinds: &self.kinds },
        }
    }
}

impl ImportRequest {
    pub fn to_command_line(&self) -> CommandLine {
        CommandLine::new(GCLOUD)
            .arg("datastore")
            .arg("import")
            .identity(&self.project_id, self.account.as_deref())
            .arg(kinds_arg(&self.kinds))
            .arg("--async")
            .arg(self.metadata_uri())
    }

    pub fn to_api_payload(&self) -> ImportPayload<'_> {
        ImportPayload {
            input_url: self.metadata_uri(),
            entity_filter: EntityFilter { kinds: &self.kinds },
        }
    }
}

impl StatusQuery {
    pub fn to_command_line(&self) -> CommandLine {
        CommandLine::new(GCLOUD)
            .arg("datastore")
            .arg("operations")
            .arg("list")
            .identity(&self.project_id, self.account.as_deref())
    }
}

impl ListObjectsQuery {
    pub fn to_command_line(&self) -> CommandLine {
        CommandLine::new(GCLOUD)
            .arg("storage")
            .arg("ls")
            .identity(&self.project_id, self.account.as_deref())
            .arg(self.bucket.listing_prefix())
    }
}

/// `gcloud config get-value project`: the project gcloud acts on by default.
pub fn default_project_command() -> CommandLine {
    CommandLine::new(GCLOUD)
        .arg("config")
        .arg("get-value")
        .arg("project")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFilter<'a> {
    pub kinds: &'a [String],
}

/// Body of `POST /v1/projects/{projectId}:export`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload<'a> {
    pub output_url_prefix: String,
    pub entity_filter: EntityFilter<'a>,
}

/// Body of `POST /v1/projects/{projectId}:import`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload<'a> {
    pub input_url: String,
    pub entity_filter: EntityFilter<'a>,
}
