//! Structured representation of a single agent log line.

use serde::Serialize;
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

use super::parser::shell_split;

/// Normalized severity of an agent log line.
///
/// The agent reports its own level names (`dbug`, `info`, `warn`, `eror`,
/// `crit`); they are folded onto these three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Severe,
}

impl LogLevel {
    /// Map a normalized level name onto a `LogLevel`, treating anything
    /// unrecognized as `Info`.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Canonical upper-case name (`INFO`, `WARNING`, `SEVERE`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Severe => "SEVERE",
        }
    }
}

/// Fold an agent level token onto its normalized name.
///
/// `CRIT`, `ERR` and `EROR` become `SEVERE`, `WARN` becomes `WARNING`; any
/// other value is upper-cased and passed through.
fn normalize_level(value: &str) -> String {
    let upper = value.to_uppercase();
    match upper.as_str() {
        "CRIT" | "ERR" | "EROR" => LogLevel::Severe.as_str().to_string(),
        "WARN" => LogLevel::Warning.as_str().to_string(),
        _ => upper,
    }
}

/// A parsed agent log line.
///
/// Created once per line by [`LogRecord::parse`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    line: String,
    t: Option<String>,
    lvl: String,
    msg: Option<String>,
    err: Option<String>,
    addr: Option<String>,
    fields: BTreeMap<String, String>,
}

impl LogRecord {
    /// Parse a raw agent log line.
    ///
    /// Never fails: tokens that cannot be interpreted simply leave their
    /// fields unset. A line that is empty after trimming yields a record for
    /// which [`is_blank`](Self::is_blank) is true.
    pub fn parse(raw: &str) -> Self {
        let line = raw.trim().to_string();
        let mut record = Self {
            t: None,
            lvl: LogLevel::Info.as_str().to_string(),
            msg: None,
            err: None,
            addr: None,
            fields: BTreeMap::new(),
            line: String::new(),
        };

        for token in shell_split(&line) {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (token, String::new()),
            };

            let value = if key == "lvl" {
                if value.trim().is_empty() {
                    record.lvl.clone()
                } else {
                    normalize_level(&value)
                }
            } else {
                value
            };

            match key.as_str() {
                "t" => record.t = Some(value.clone()),
                "lvl" => record.lvl.clone_from(&value),
                "msg" => record.msg = Some(value.clone()),
                "err" => record.err = Some(value.clone()),
                "addr" => record.addr = Some(value.clone()),
                _ => {}
            }

            record.fields.insert(key, value);
        }

        record.line = line;
        record
    }

    /// The trimmed raw line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// True when the line carried no tokens and should be ignored.
    pub fn is_blank(&self) -> bool {
        self.line.is_empty()
    }

    /// Agent-supplied timestamp token.
    pub fn t(&self) -> Option<&str> {
        self.t.as_deref()
    }

    /// Normalized level; unrecognized agent levels report as `Info`.
    pub fn level(&self) -> LogLevel {
        LogLevel::from_name(&self.lvl)
    }

    /// Level name exactly as normalized by the parser, including unrecognized
    /// values such as `DBUG`.
    pub fn raw_level(&self) -> &str {
        &self.lvl
    }

    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    pub fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    /// Look up any token on the line by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Every key/value token found on the line.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_line() {
        let record = LogRecord::parse("lvl=INFO msg=Test");
        assert_eq!(record.level(), LogLevel::Info);
        assert_eq!(record.msg(), Some("Test"));
    }

    #[test]
    fn test_warn_is_warning() {
        let record = LogRecord::parse("lvl=WARN msg=Test");
        assert_eq!(record.level(), LogLevel::Warning);
        assert_eq!(record.raw_level(), "WARNING");
    }

    #[test]
    fn test_severe_aliases() {
        for lvl in ["CRIT", "ERR", "EROR", "crit", "eror"] {
            let record = LogRecord::parse(&format!("lvl={lvl} msg=boom"));
            assert_eq!(record.level(), LogLevel::Severe, "lvl={lvl}");
        }
    }

    #[test]
    fn test_msg_with_unterminated_quote() {
        let record = LogRecord::parse("lvl=WARN msg=\"Test=Test with spaces");
        assert_eq!(record.level(), LogLevel::Warning);
        assert_eq!(record.msg(), Some("Test=Test with spaces"));
    }

    #[test]
    fn test_err_without_msg() {
        let record = LogRecord::parse("lvl=ERR no_msg");
        assert_eq!(record.level(), LogLevel::Severe);
        assert_eq!(record.msg(), None);
        assert_eq!(record.get("no_msg"), Some(""));
    }

    #[test]
    fn test_crit_with_quoted_err() {
        let record = LogRecord::parse("lvl=CRIT err=\"Some error\"");
        assert_eq!(record.level(), LogLevel::Severe);
        assert_eq!(record.err(), Some("Some error"));
        assert_eq!(record.msg(), None);
    }

    #[test]
    fn test_blank_lvl_uses_default() {
        let record = LogRecord::parse("lvl=");
        assert_eq!(record.level(), LogLevel::Info);
        assert_eq!(record.msg(), None);
    }

    #[test]
    fn test_blank_lvl_uses_running_level() {
        let record = LogRecord::parse("lvl=warn lvl=");
        assert_eq!(record.level(), LogLevel::Warning);
    }

    #[test]
    fn test_timestamp() {
        let record = LogRecord::parse("t=123456789");
        assert_eq!(record.t(), Some("123456789"));
        assert_eq!(record.level(), LogLevel::Info);
    }

    #[test]
    fn test_unknown_level_reports_info() {
        let record = LogRecord::parse("lvl=dbug msg=noise");
        assert_eq!(record.raw_level(), "DBUG");
        assert_eq!(record.level(), LogLevel::Info);
        assert_eq!(record.get("lvl"), Some("DBUG"));
    }

    #[test]
    fn test_full_agent_line() {
        let record = LogRecord::parse(
            "  t=2024-01-01T00:00:00+0000 lvl=info msg=\"starting web service\" obj=web addr=127.0.0.1:4040  ",
        );
        assert_eq!(record.t(), Some("2024-01-01T00:00:00+0000"));
        assert_eq!(record.msg(), Some("starting web service"));
        assert_eq!(record.addr(), Some("127.0.0.1:4040"));
        assert_eq!(record.get("obj"), Some("web"));
        assert_eq!(record.fields().len(), 5);
        assert!(record.line().starts_with("t="));
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let record = LogRecord::parse("msg=first msg=second");
        assert_eq!(record.msg(), Some("second"));
        assert_eq!(record.get("msg"), Some("second"));
    }

    #[test]
    fn test_blank_line_is_sentinel() {
        let record = LogRecord::parse("   \t ");
        assert!(record.is_blank());
        assert!(record.fields().is_empty());
        assert_eq!(record.msg(), None);
        assert_eq!(record.err(), None);
        assert_eq!(record.addr(), None);
    }

    #[test]
    fn test_level_names() {
        assert_eq!(LogLevel::from_name("SEVERE"), LogLevel::Severe);
        assert_eq!(LogLevel::from_name("WARNING"), LogLevel::Warning);
        assert_eq!(LogLevel::from_name("bogus"), LogLevel::Info);
        assert_eq!(LogLevel::Severe.to_string(), "SEVERE");
    }
}
