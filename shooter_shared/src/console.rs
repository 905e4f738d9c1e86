//! Console system.
//!
//! Typed console variables with flags, plus a small line interpreter.
//! Node-specific commands (status, give, hurt, ...) are pattern-matched by
//! the owning client/server before falling through to this cvar layer.
//!
//! # Usage
//! ```ignore
//! let mut console = Console::new();
//! console.register_cvar("sv_tickrate", CvarValue::Int(64), "Server tick rate", CvarFlags::NONE);
//! console.exec("sv_tickrate 128")?;
//! ```

use std::collections::HashMap;

use anyhow::bail;

/// Console variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CvarValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl CvarValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CvarValue::Int(v) => Some(*v),
            CvarValue::Float(v) => Some(*v as i64),
            CvarValue::Bool(v) => Some(if *v { 1 } else { 0 }),
            CvarValue::String(s) => s.parse().ok(),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CvarValue::Float(v) => Some(*v),
            CvarValue::Int(v) => Some(*v as f64),
            CvarValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            CvarValue::Bool(v) => *v,
            CvarValue::Int(v) => *v != 0,
            CvarValue::Float(v) => *v != 0.0,
            CvarValue::String(s) => !s.is_empty() && s != "0" && s.to_lowercase() != "false",
        }
    }

    /// Parses `s` into the same variant as `self`.
    fn parse_as(&self, s: &str) -> anyhow::Result<CvarValue> {
        Ok(match self {
            CvarValue::Int(_) => CvarValue::Int(s.parse()?),
            CvarValue::Float(_) => CvarValue::Float(s.parse()?),
            CvarValue::Bool(_) => CvarValue::Bool(s.parse()?),
            CvarValue::String(_) => CvarValue::String(s.trim_matches('"').to_string()),
        })
    }
}

impl std::fmt::Display for CvarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CvarValue::Int(v) => write!(f, "{}", v),
            CvarValue::Float(v) => write!(f, "{}", v),
            CvarValue::String(v) => write!(f, "\"{}\"", v),
            CvarValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

bitflags::bitflags! {
    /// Cvar flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        const NONE = 0;
        const ARCHIVE = 1 << 0;      // Saved to config
        const CHEAT = 1 << 1;        // Requires sv_cheats
        const REPLICATED = 1 << 2;   // Server -> client
        const SERVER_ONLY = 1 << 3;  // Server-side only
    }
}

impl Default for CvarFlags {
    fn default() -> Self {
        Self::NONE
    }
}

/// Console variable metadata.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub value: CvarValue,
    pub default: CvarValue,
    pub description: String,
    pub flags: CvarFlags,
}

/// The console.
#[derive(Default)]
pub struct Console {
    cvars: HashMap<String, Cvar>,
    history: Vec<String>,
}

const MAX_HISTORY: usize = 100;

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a console variable.
    pub fn register_cvar(
        &mut self,
        name: &str,
        default: CvarValue,
        description: &str,
        flags: CvarFlags,
    ) {
        self.cvars.insert(
            name.to_string(),
            Cvar {
                name: name.to_string(),
                value: default.clone(),
                default,
                description: description.to_string(),
                flags,
            },
        );
    }

    pub fn get_cvar(&self, name: &str) -> Option<&CvarValue> {
        self.cvars.get(name).map(|c| &c.value)
    }

    pub fn set_cvar(&mut self, name: &str, value: CvarValue) -> anyhow::Result<()> {
        match self.cvars.get_mut(name) {
            Some(cvar) => {
                cvar.value = value;
                Ok(())
            }
            None => bail!("unknown cvar: {}", name),
        }
    }

    /// Executes a console line and returns its output lines.
    pub fn exec(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return Ok(Vec::new());
        }

        self.history.push(line.to_string());
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "echo" => Ok(vec![tokens[1..].join(" ")]),
            "cvarlist" => {
                let mut names: Vec<&String> = self.cvars.keys().collect();
                names.sort();
                Ok(names
                    .iter()
                    .map(|n| {
                        let c = &self.cvars[*n];
                        format!("  {} = {} (default: {})", c.name, c.value, c.default)
                    })
                    .collect())
            }
            name if self.cvars.contains_key(name) => {
                if tokens.len() == 1 {
                    let c = &self.cvars[name];
                    Ok(vec![format!("{} = {} - {}", c.name, c.value, c.description)])
                } else {
                    let current = self.cvars[name].value.clone();
                    let value = current.parse_as(&tokens[1..].join(" "))?;
                    self.set_cvar(name, value.clone())?;
                    Ok(vec![format!("{} = {}", name, value)])
                }
            }
            other => bail!("unknown command: {}", other),
        }
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console_with_tickrate() -> Console {
        let mut console = Console::new();
        console.register_cvar(
            "sv_tickrate",
            CvarValue::Int(64),
            "Server tick rate",
            CvarFlags::NONE,
        );
        console
    }

    #[test]
    fn get_and_set_roundtrip() {
        let mut console = console_with_tickrate();
        assert_eq!(console.get_cvar("sv_tickrate"), Some(&CvarValue::Int(64)));

        let out = console.exec("sv_tickrate 128").unwrap();
        assert_eq!(out, vec!["sv_tickrate = 128".to_string()]);
        assert_eq!(console.get_cvar("sv_tickrate"), Some(&CvarValue::Int(128)));
    }

    #[test]
    fn set_keeps_value_type() {
        let mut console = console_with_tickrate();
        assert!(console.exec("sv_tickrate not_a_number").is_err());
    }

    #[test]
    fn unknown_command_errors() {
        let mut console = Console::new();
        assert!(console.exec("frobnicate").is_err());
    }

    #[test]
    fn comments_and_blanks_are_ignored() {
        let mut console = Console::new();
        assert!(console.exec("// comment").unwrap().is_empty());
        assert!(console.exec("   ").unwrap().is_empty());
        assert!(console.history().is_empty());
    }
}
