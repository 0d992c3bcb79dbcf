use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{what} could not be resolved{}", Error::format_msg_as_detail(hint))]
    Configuration { what: String, hint: Option<String> },

    #[error("Failed parsing {}{}", context, Error::format_msg_as_detail(msg))]
    Format { context: String, msg: Option<String> },

    #[error("Column '{column}' missing from {:?}", path)]
    MissingColumn { path: PathBuf, column: String },

    #[error(
        "Failed trying to execute '{tool}'. Make sure it is in your $PATH and you have execution permissions."
    )]
    ToolNotFound { tool: String },

    #[error("Tool '{}' failed on execute '{}'{}", tool, cmd, Error::format_msg_as_detail(msg))]
    ToolFailed {
        tool: String,
        cmd: String,
        msg: Option<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

impl Error {
    pub fn format_msg_as_detail(msg: &Option<String>) -> String {
        match msg {
            Some(m) => format!(" ({})", m),
            None => String::new(),
        }
    }

    #[cold]
    pub fn configuration<W: Into<String>, H: Into<String>>(what: W, hint: Option<H>) -> Self {
        Error::Configuration {
            what: what.into(),
            hint: hint.map(|h| h.into()),
        }
    }

    #[cold]
    pub fn format<C: Into<String>, M: Into<String>>(context: C, msg: Option<M>) -> Self {
        Error::Format {
            context: context.into(),
            msg: msg.map(|m| m.into()),
        }
    }

    #[cold]
    pub fn missing_column<P: Into<PathBuf>, C: Into<String>>(path: P, column: C) -> Self {
        Error::MissingColumn {
            path: path.into(),
            column: column.into(),
        }
    }

    #[cold]
    pub fn tool_failed<T: Into<String>, C: Into<String>, M: Into<String>>(
        tool: T,
        cmd: C,
        msg: Option<M>,
    ) -> Self {
        Error::ToolFailed {
            tool: tool.into(),
            cmd: cmd.into(),
            msg: msg.map(|m| m.into()),
        }
    }

    /// True for errors raised by an unexpected report or table layout.
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format { .. })
    }
}
