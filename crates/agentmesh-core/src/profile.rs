//! Agent profiles and the markdown front-matter codec
//!
//! An agent is a markdown file: YAML front-matter between `---` delimiters,
//! body after the closing delimiter is the system prompt.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tool-access posture declared by the agent file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    Safe,
    #[default]
    Standard,
    Unrestricted,
}

/// Autonomous-mode knobs from the `autonomous:` front-matter section.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AutonomousConfig {
    #[serde(default, alias = "maxCycles")]
    pub max_cycles: Option<u32>,
    #[serde(default, alias = "stopWhenComplete")]
    pub stop_when_complete: bool,
    #[serde(default, alias = "resumeMission")]
    pub resume_mission: bool,
    #[serde(default, alias = "seedTaskWhenIdle")]
    pub seed_task_when_idle: bool,
}

/// Declarative definition of a prompt-template tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// name -> {type, description, required}
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "resultSchema")]
    pub result_schema: Option<serde_json::Value>,
}

/// Declared MCP server connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct McpServerDef {
    pub name: String,
    #[serde(default)]
    pub transport: McpTransport,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Http,
    Sse,
    Stdio,
}

/// Raw front-matter shape as written in the file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct FrontMatter {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, alias = "mode", skip_serializing_if = "Option::is_none")]
    safety_mode: Option<SafetyMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    autonomous: Option<AutonomousConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    custom_tools: Vec<CustomToolDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mcp_servers: Vec<McpServerDef>,
}

/// Parsed view of one agent file. Rebuilt on every write to its path.
#[derive(Clone, Debug)]
pub struct AgentProfile {
    pub path: String,
    pub name: String,
    pub model: Option<String>,
    pub safety_mode: SafetyMode,
    pub system_prompt: String,
    pub autonomous: Option<AutonomousConfig>,
    /// Allow-list of tool names; `None` means the full registry.
    pub tools: Option<Vec<String>>,
    pub custom_tools: Vec<CustomToolDef>,
    pub mcp_servers: Vec<McpServerDef>,
}

impl AgentProfile {
    /// Parse an agent markdown file. The front-matter must carry `name`.
    pub fn parse(path: &str, content: &str) -> Result<Self> {
        let (yaml, body) = split_front_matter(content).ok_or_else(|| Error::InvalidFrontMatter {
            path: path.to_string(),
            reason: "missing front-matter delimiters".into(),
        })?;

        let fm: FrontMatter =
            serde_yaml::from_str(yaml).map_err(|e| Error::InvalidFrontMatter {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        if fm.name.trim().is_empty() {
            return Err(Error::InvalidFrontMatter {
                path: path.to_string(),
                reason: "'name' is required".into(),
            });
        }

        Ok(Self {
            path: path.to_string(),
            name: fm.name,
            model: fm.model,
            safety_mode: fm.safety_mode.unwrap_or_default(),
            system_prompt: body.trim().to_string(),
            autonomous: fm.autonomous,
            tools: fm.tools,
            custom_tools: fm.custom_tools,
            mcp_servers: fm.mcp_servers,
        })
    }

    /// Serialize back to an agent markdown file. Round-trips `name`, `model`,
    /// and `safety_mode`.
    pub fn to_markdown(&self) -> String {
        let fm = FrontMatter {
            name: self.name.clone(),
            model: self.model.clone(),
            safety_mode: Some(self.safety_mode),
            autonomous: self.autonomous.clone(),
            tools: self.tools.clone(),
            custom_tools: self.custom_tools.clone(),
            mcp_servers: self.mcp_servers.clone(),
        };
        let yaml = serde_yaml::to_string(&fm).unwrap_or_default();
        format!("---\n{}---\n{}\n", yaml, self.system_prompt)
    }
}

/// Split `---\n<yaml>\n---\n<body>`. Returns `(yaml, body)`.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    for (close, skip) in [("\n---\n", 5), ("\n---\r\n", 6), ("\n---", 4)] {
        if let Some(at) = rest.find(close) {
            // The bare "\n---" form only closes at end-of-file
            if close == "\n---" && at + skip != rest.len() {
                continue;
            }
            return Some((&rest[..at], &rest[at + skip..]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_agent() {
        let profile =
            AgentProfile::parse("agents/echo.md", "---\nname: Echo\n---\nEcho the user.").unwrap();
        assert_eq!(profile.name, "Echo");
        assert_eq!(profile.system_prompt, "Echo the user.");
        assert_eq!(profile.safety_mode, SafetyMode::Standard);
        assert!(profile.model.is_none());
    }

    #[test]
    fn parse_full_front_matter() {
        let content = r#"---
name: Lead
model: claude-opus-4-6
safety_mode: safe
autonomous:
  max_cycles: 5
  stop_when_complete: true
tools:
  - vfs_read
  - spawn_agent
---
Coordinate the team."#;
        let profile = AgentProfile::parse("agents/lead.md", content).unwrap();
        assert_eq!(profile.name, "Lead");
        assert_eq!(profile.model.as_deref(), Some("claude-opus-4-6"));
        assert_eq!(profile.safety_mode, SafetyMode::Safe);
        let auto = profile.autonomous.unwrap();
        assert_eq!(auto.max_cycles, Some(5));
        assert!(auto.stop_when_complete);
        assert_eq!(
            profile.tools.as_deref(),
            Some(&["vfs_read".to_string(), "spawn_agent".to_string()][..])
        );
    }

    #[test]
    fn mode_alias_accepted() {
        let profile =
            AgentProfile::parse("agents/a.md", "---\nname: A\nmode: unrestricted\n---\nBody")
                .unwrap();
        assert_eq!(profile.safety_mode, SafetyMode::Unrestricted);
    }

    #[test]
    fn missing_name_rejected() {
        let err = AgentProfile::parse("agents/a.md", "---\nmodel: m\n---\nBody").unwrap_err();
        assert!(matches!(err, Error::InvalidFrontMatter { .. }));
    }

    #[test]
    fn missing_delimiters_rejected() {
        assert!(AgentProfile::parse("agents/a.md", "just a prompt").is_err());
    }

    #[test]
    fn round_trip_preserves_identity_fields() {
        let content = "---\nname: W\nmodel: claude-haiku-4-5\nsafety_mode: safe\n---\nHi";
        let profile = AgentProfile::parse("agents/w.md", content).unwrap();
        let reparsed = AgentProfile::parse("agents/w.md", &profile.to_markdown()).unwrap();
        assert_eq!(reparsed.name, "W");
        assert_eq!(reparsed.model.as_deref(), Some("claude-haiku-4-5"));
        assert_eq!(reparsed.safety_mode, SafetyMode::Safe);
        assert_eq!(reparsed.system_prompt, "Hi");
    }

    #[test]
    fn camel_case_autonomous_keys_accepted() {
        let content = "---\nname: A\nautonomous:\n  maxCycles: 3\n  seedTaskWhenIdle: true\n---\nB";
        let profile = AgentProfile::parse("agents/a.md", content).unwrap();
        let auto = profile.autonomous.unwrap();
        assert_eq!(auto.max_cycles, Some(3));
        assert!(auto.seed_task_when_idle);
    }
}
