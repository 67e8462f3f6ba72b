use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_yaml::Value;

use super::{read_text, ValidationContext, Validator, Verdict};
use crate::catalog::{Domain, Task};
use crate::error::ValidatorError;
use crate::execution::Sandbox;

const DEFINITION_SUFFIX: &str = ".component.yml";
const TEMPLATE_SUFFIX: &str = ".twig";

/// A single-directory component: `<dir>/<name>.component.yml` plus `<dir>/<name>.twig`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Component {
    dir: String,
    name: String,
}

impl Component {
    fn definition(&self) -> String {
        join(&self.dir, &format!("{}{DEFINITION_SUFFIX}", self.name))
    }

    fn template(&self) -> String {
        join(&self.dir, &format!("{}{TEMPLATE_SUFFIX}", self.name))
    }
}

fn join(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}

fn split(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn in_components_dir(dir: &str) -> bool {
    dir.split('/').any(|segment| segment == "components")
}

/// Components touched by the changed files.
fn touched_components(changed: &[String]) -> BTreeSet<Component> {
    changed
        .iter()
        .filter_map(|path| {
            let (dir, file) = split(path);
            let name = if let Some(name) = file.strip_suffix(DEFINITION_SUFFIX) {
                name
            } else if in_components_dir(dir) {
                file.strip_suffix(TEMPLATE_SUFFIX)?
            } else {
                return None;
            };
            Some(Component {
                dir: dir.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

fn declares_type(value: &Value) -> bool {
    match value {
        Value::Mapping(map) => map
            .iter()
            .any(|(k, v)| k.as_str() == Some("type") || declares_type(v)),
        Value::Sequence(items) => items.iter().any(declares_type),
        Value::Tagged(tagged) => declares_type(&tagged.value),
        _ => false,
    }
}

/// Structural problems in a component definition.
pub fn definition_violations(path: &str, source: &str) -> Vec<String> {
    let data: Value = match serde_yaml::from_str(source) {
        Ok(data) => data,
        Err(e) => return vec![format!("Error parsing {path}: {e}")],
    };
    let map = match &data {
        Value::Null => return vec![format!("Empty or invalid YAML in {path}")],
        Value::Mapping(map) if map.is_empty() => {
            return vec![format!("Empty or invalid YAML in {path}")]
        }
        Value::Mapping(map) => map,
        _ => return vec![format!("Component definition in {path} must be a mapping.")],
    };

    let mut out = Vec::new();
    if let Some(props) = map.get("props") {
        if !props.is_mapping() || !declares_type(props) {
            out.push(format!(
                "Props in {path} should define types (JSON schema style)."
            ));
        }
    }
    if let Some(slots) = map.get("slots") {
        if !slots.is_mapping() {
            out.push(format!("Slots in {path} should be a dictionary."));
        }
    }
    out
}

/// Checks single-directory components touched by the patch.
pub struct ComponentStructureValidator;

impl ComponentStructureValidator {
    pub fn new() -> Self {
        Self
    }

    async fn check(
        &self,
        sandbox: &dyn Sandbox,
        component: &Component,
    ) -> Result<Vec<String>, ValidatorError> {
        let definition = component.definition();
        let Some(source) = read_text(sandbox, &definition).await? else {
            // A deleted definition with no remaining template is a removed component.
            if !sandbox.exists(&component.template()).await? {
                return Ok(Vec::new());
            }
            return Ok(vec![format!(
                "Missing .component.yml file in SDC directory: {}",
                component.dir
            )]);
        };

        let mut out = Vec::new();
        if !sandbox.exists(&component.template()).await? {
            out.push(format!(
                "Missing {name}.twig for component {name}",
                name = component.name
            ));
        }
        out.extend(definition_violations(&definition, &source));
        Ok(out)
    }
}

impl Default for ComponentStructureValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for ComponentStructureValidator {
    fn name(&self) -> &'static str {
        "frontend_structure"
    }

    fn applicable(&self, task: &Task) -> bool {
        task.is_domain(Domain::Frontend)
    }

    async fn run(
        &self,
        sandbox: &dyn Sandbox,
        _task: &Task,
        ctx: &ValidationContext,
    ) -> Result<Verdict, ValidatorError> {
        let components = touched_components(&ctx.changed_files);
        if components.is_empty() {
            return Ok(Verdict::pass(
                "Frontend (SDC) Validation Passed. No components changed.",
            ));
        }

        let mut violations: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for component in &components {
            let found = self.check(sandbox, component).await?;
            if !found.is_empty() {
                violations
                    .entry(component.dir.clone())
                    .or_default()
                    .extend(found);
            }
        }
        Ok(Verdict::from_violations("Frontend (SDC)", &violations))
    }
}
