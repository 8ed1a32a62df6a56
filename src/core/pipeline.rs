//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    error::LoadError,
    graph::DependencyGraph,
    job::{JobInstance, JobTemplate},
    matrix::MatrixExpander,
    value::Value,
};
use std::collections::{BTreeMap, HashMap};

/// A loaded, validated pipeline with its instances expanded
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Pipeline variables before run overrides
    pub variables: BTreeMap<String, Value>,

    /// Job templates in declaration order
    templates: Vec<JobTemplate>,

    graph: DependencyGraph,

    /// Every job instance, grouped by template in declaration order
    instances: Vec<JobInstance>,

    /// Template id -> indices into `instances`
    by_template: HashMap<String, Vec<usize>>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LoadError> {
        config.check_unique_ids()?;
        let variables = config.variables()?;

        let templates = config
            .jobs
            .iter()
            .map(|job| JobTemplate::from_config(job, &config.defaults))
            .collect::<Result<Vec<_>, _>>()?;

        let graph = DependencyGraph::build(&templates)?;

        let mut instances = Vec::new();
        let mut by_template = HashMap::new();
        for template in &templates {
            let expanded = MatrixExpander::expand(template, instances.len());
            by_template.insert(
                template.id.clone(),
                expanded.iter().map(|i| i.index).collect::<Vec<_>>(),
            );
            instances.extend(expanded);
        }

        Ok(Pipeline {
            name: config.name.clone(),
            variables,
            templates,
            graph,
            instances,
            by_template,
        })
    }

    /// Load and build a pipeline from a YAML file
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, LoadError> {
        PipelineConfig::from_file(path)?.to_pipeline()
    }

    /// Build a pipeline from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, LoadError> {
        PipelineConfig::from_yaml(yaml)?.to_pipeline()
    }

    pub fn templates(&self) -> &[JobTemplate] {
        &self.templates
    }

    /// Get a template by id
    pub fn template(&self, id: &str) -> Option<&JobTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn instances(&self) -> &[JobInstance] {
        &self.instances
    }

    pub fn instance(&self, index: usize) -> Option<&JobInstance> {
        self.instances.get(index)
    }

    /// Instance indices of a template; empty for unknown ids
    pub fn instances_of(&self, template: &str) -> &[usize] {
        self.by_template
            .get(template)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Template ids, dependencies first
    pub fn execution_order(&self) -> Vec<&str> {
        self.graph.topological_order()
    }
}
