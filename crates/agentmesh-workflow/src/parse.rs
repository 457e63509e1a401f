//! Workflow file parsing and DAG validation
//!
//! A workflow is markdown with YAML front-matter: `name`, optional
//! `description` and `trigger`, and `steps`. Parsing validates every step,
//! resolves dependencies, and computes a topological `execution_order`;
//! accumulated diagnostics abort the parse.

use agentmesh_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Auto,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub agent: String,
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WorkflowDefinition {
    pub path: String,
    pub name: String,
    pub description: String,
    pub trigger: Trigger,
    pub steps: Vec<WorkflowStep>,
    /// Topological order of step ids; dispatch ties break by position here.
    pub execution_order: Vec<String>,
}

#[derive(Deserialize)]
struct FrontMatter {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    trigger: Trigger,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn parse(path: &str, content: &str) -> Result<Self> {
        let yaml = extract_front_matter(content).ok_or_else(|| {
            Error::config(format!("{}: missing workflow front-matter", path))
        })?;
        let fm: FrontMatter = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("{}: {}", path, e)))?;

        let mut diagnostics = Vec::new();
        if fm.name.trim().is_empty() {
            diagnostics.push("workflow 'name' is required".to_string());
        }
        if fm.steps.is_empty() {
            diagnostics.push("workflow has no steps".to_string());
        }

        let mut seen = HashSet::new();
        for step in &fm.steps {
            if step.id.trim().is_empty() {
                diagnostics.push("step with empty id".to_string());
            } else if !seen.insert(step.id.clone()) {
                diagnostics.push(format!("duplicate step id '{}'", step.id));
            }
            if step.agent.trim().is_empty() {
                diagnostics.push(format!("step '{}' has no agent", step.id));
            }
            if step.prompt.trim().is_empty() {
                diagnostics.push(format!("step '{}' has no prompt", step.id));
            }
        }
        for step in &fm.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep) {
                    diagnostics.push(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    ));
                }
            }
        }

        if !diagnostics.is_empty() {
            return Err(Error::config(format!(
                "{}: {}",
                path,
                diagnostics.join("; ")
            )));
        }

        let execution_order = topological_order(&fm.steps)?;

        Ok(Self {
            path: path.to_string(),
            name: fm.name,
            description: fm.description,
            trigger: fm.trigger,
            steps: fm.steps,
            execution_order,
        })
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn order_index(&self, id: &str) -> usize {
        self.execution_order
            .iter()
            .position(|s| s == id)
            .unwrap_or(usize::MAX)
    }
}

fn extract_front_matter(content: &str) -> Option<&str> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let end = rest.find("\n---").map(|at| &rest[..at]);
    end.or(Some(rest))
}

/// Kahn's algorithm over the step graph. Errors name a step on a cycle.
fn topological_order(steps: &[WorkflowStep]) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = steps.iter().map(|s| (s.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        for dep in &step.depends_on {
            *in_degree.get_mut(step.id.as_str()).unwrap() += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    // Seed with roots in file order for a stable result.
    let mut ready: VecDeque<&str> = steps
        .iter()
        .filter(|s| in_degree[s.id.as_str()] == 0)
        .map(|s| s.id.as_str())
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            for child in children {
                let degree = in_degree.get_mut(child).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(child);
                }
            }
        }
    }

    if order.len() != steps.len() {
        let stuck = steps
            .iter()
            .find(|s| !order.contains(&s.id))
            .map(|s| s.id.clone())
            .unwrap_or_default();
        return Err(Error::WorkflowCycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_yaml() -> &'static str {
        r#"---
name: review-pipeline
description: two-step chain
steps:
  - id: a
    agent: agents/writer.md
    prompt: "draft it"
  - id: b
    agent: agents/reviewer.md
    prompt: "review {a.result}"
    depends_on: [a]
---
Notes body."#
    }

    #[test]
    fn parse_chain() {
        let wf = WorkflowDefinition::parse("workflows/review.md", chain_yaml()).unwrap();
        assert_eq!(wf.name, "review-pipeline");
        assert_eq!(wf.trigger, Trigger::Manual);
        assert_eq!(wf.execution_order, vec!["a", "b"]);
        assert_eq!(wf.step("b").unwrap().depends_on, vec!["a"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let content = r#"---
name: w
steps:
  - { id: a, agent: x.md, prompt: p }
  - { id: a, agent: y.md, prompt: q }
---"#;
        let err = WorkflowDefinition::parse("w.md", content).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let content = r#"---
name: w
steps:
  - { id: a, agent: x.md, prompt: p, depends_on: [ghost] }
---"#;
        let err = WorkflowDefinition::parse("w.md", content).unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn cycle_rejected() {
        let content = r#"---
name: w
steps:
  - { id: a, agent: x.md, prompt: p, depends_on: [b] }
  - { id: b, agent: y.md, prompt: q, depends_on: [a] }
---"#;
        let err = WorkflowDefinition::parse("w.md", content).unwrap_err();
        assert!(matches!(err, Error::WorkflowCycle(_)));
    }

    #[test]
    fn diamond_order_respects_dependencies() {
        let content = r#"---
name: diamond
steps:
  - { id: d, agent: x.md, prompt: p, depends_on: [b, c] }
  - { id: b, agent: x.md, prompt: p, depends_on: [a] }
  - { id: c, agent: x.md, prompt: p, depends_on: [a] }
  - { id: a, agent: x.md, prompt: p }
---"#;
        let wf = WorkflowDefinition::parse("w.md", content).unwrap();
        let pos = |id: &str| wf.order_index(id);
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn empty_fields_collected_as_diagnostics() {
        let content = r#"---
name: w
steps:
  - { id: "", agent: "", prompt: "" }
---"#;
        let err = WorkflowDefinition::parse("w.md", content).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("empty id"));
        assert!(text.contains("no agent"));
        assert!(text.contains("no prompt"));
    }
}
