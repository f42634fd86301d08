//! GitLab CI YAML to pipeline model.

use serde_yaml::{Mapping, Value};
use stagehand_core::{Error, Job, PipelineDescriptor, Result};
use tracing::{debug, warn};

/// Stages GitLab assumes when the file declares none.
pub const DEFAULT_STAGES: &[&str] = &[".pre", "build", "test", "deploy", ".post"];
pub const DEFAULT_JOB_STAGE: &str = "test";

/// Top-level keys that configure the pipeline rather than name a job.
const RESERVED_KEYS: &[&str] = &[
    "stages",
    "variables",
    "default",
    "include",
    "workflow",
    "image",
    "services",
    "cache",
    "before_script",
    "after_script",
];

/// Parse a `.gitlab-ci.yml` with the built-in default image.
pub fn parse_gitlab_ci(content: &str) -> Result<PipelineDescriptor> {
    GitlabParser::new().parse(content)
}

#[derive(Debug, Clone, Default)]
pub struct GitlabParser {
    fallback_image: Option<String>,
}

impl GitlabParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image for jobs when neither the job nor the file names one.
    pub fn with_default_image(mut self, image: Option<String>) -> Self {
        self.fallback_image = image;
        self
    }

    pub fn parse(&self, content: &str) -> Result<PipelineDescriptor> {
        let mut document: Value = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Invalid YAML: {}", e)))?;
        // `<<: *template` is left as a literal key unless merged explicitly.
        document
            .apply_merge()
            .map_err(|e| Error::Parse(format!("Invalid merge key: {}", e)))?;
        let root = match document {
            Value::Mapping(root) => root,
            Value::Null => Mapping::new(),
            _ => return Err(Error::Parse("top level must be a mapping".to_string())),
        };

        let stages = parse_stages(&root)?;
        let defaults = Defaults::from_root(&root, self.fallback_image.as_deref())?;

        let mut jobs = Vec::new();
        for (key, value) in &root {
            let Some(name) = key.as_str() else {
                warn!(key = ?key, "Skipping non-string top-level key");
                continue;
            };
            if RESERVED_KEYS.contains(&name) || name.starts_with('.') {
                continue;
            }
            let Some(definition) = value.as_mapping() else {
                warn!(key = name, "Skipping top-level key that is not a job");
                continue;
            };
            if !definition.contains_key("script") {
                warn!(job = name, "Skipping job without script");
                continue;
            }

            let job = parse_job(name, definition, &defaults)?;
            debug!(job = name, stage = job.stage(), image = job.image(), "Parsed job");
            jobs.push(job);
        }

        PipelineDescriptor::new(stages, jobs)
    }
}

/// Pipeline-wide values a job inherits unless it overrides them.
struct Defaults {
    image: Option<String>,
    before_script: Option<Value>,
}

impl Defaults {
    fn from_root(root: &Mapping, fallback_image: Option<&str>) -> Result<Self> {
        let default = root.get("default").and_then(Value::as_mapping);
        let from_default = |key: &str| default.and_then(|d| d.get(key));

        let image = match from_default("image") {
            Some(value) => image_name(value)?,
            None => None,
        };
        let image = match (image, root.get("image")) {
            (Some(image), _) => Some(image),
            (None, Some(value)) => image_name(value)?,
            (None, None) => None,
        };

        Ok(Self {
            image: image.or_else(|| fallback_image.map(str::to_string)),
            before_script: from_default("before_script")
                .or_else(|| root.get("before_script"))
                .cloned(),
        })
    }
}

fn parse_stages(root: &Mapping) -> Result<Vec<String>> {
    let Some(value) = root.get("stages") else {
        return Ok(DEFAULT_STAGES.iter().map(|s| s.to_string()).collect());
    };
    let Some(items) = value.as_sequence() else {
        return Err(Error::Parse("stages must be a list".to_string()));
    };

    let mut stages = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(stage) => stages.push(stage.to_string()),
            None => warn!(stage = ?item, "Skipping stage that is not a string"),
        }
    }
    Ok(stages)
}

fn parse_job(name: &str, definition: &Mapping, defaults: &Defaults) -> Result<Job> {
    let stage = match definition.get("stage") {
        None => DEFAULT_JOB_STAGE,
        Some(value) => value
            .as_str()
            .ok_or_else(|| Error::Parse(format!("stage of job {} must be a string", name)))?,
    };

    let before = match definition.get("before_script").or(defaults.before_script.as_ref()) {
        Some(value) => commands(name, value)?,
        None => Vec::new(),
    };
    let script = match definition.get("script") {
        Some(value) => commands(name, value)?,
        None => Vec::new(),
    };

    let mut job = Job::new(name, stage, before.into_iter().chain(script).collect());

    let image = match definition.get("image") {
        Some(value) => image_name(value)?,
        None => None,
    };
    if let Some(image) = image.or_else(|| defaults.image.clone()) {
        job = job.with_image(image);
    }

    Ok(job)
}

/// A script is one string or a list of strings; nested lists are flattened once.
fn commands(job: &str, value: &Value) -> Result<Vec<String>> {
    let shape_error = || Error::UnknownScriptShape {
        job: job.to_string(),
    };

    match value {
        Value::String(command) => Ok(vec![command.clone()]),
        Value::Sequence(items) => {
            let mut commands = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(command) => commands.push(command.clone()),
                    Value::Sequence(nested) => {
                        for inner in nested {
                            let command = inner.as_str().ok_or_else(shape_error)?;
                            commands.push(command.to_string());
                        }
                    }
                    _ => return Err(shape_error()),
                }
            }
            Ok(commands)
        }
        _ => Err(shape_error()),
    }
}

/// `image: name` or `image: { name: ... }`.
fn image_name(value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(name) => Ok(Some(name.clone())),
        Value::Mapping(map) => match map.get("name") {
            Some(Value::String(name)) => Ok(Some(name.clone())),
            _ => Err(Error::Parse("image mapping needs a string name".to_string())),
        },
        _ => Err(Error::Parse(format!("unsupported image value: {:?}", value))),
    }
}
