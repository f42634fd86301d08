//! Tests for the GitLab CI parser.

#[cfg(test)]
mod tests {
    use crate::parser::{DEFAULT_STAGES, GitlabParser, parse_gitlab_ci};
    use pretty_assertions::assert_eq;
    use stagehand_core::{DEFAULT_IMAGE, Error, Job, PipelineDescriptor};

    fn stage_names(pipeline: &PipelineDescriptor) -> Vec<&str> {
        pipeline.stages().iter().map(|s| s.name()).collect()
    }

    fn commands(pipeline: &PipelineDescriptor, job: &str) -> Vec<String> {
        pipeline.job(job).unwrap().script().to_vec()
    }

    #[test]
    fn test_parse_simple_file() {
        let yaml = r#"
stages:
  - build

build_app:
  stage: build
  script:
    - echo "I'm building!"
"#;

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        let expected = PipelineDescriptor::new(
            ["build"],
            [Job::new(
                "build_app",
                "build",
                vec!["echo \"I'm building!\"".to_string()],
            )],
        )
        .unwrap();
        assert_eq!(pipeline, expected);
    }

    #[test]
    fn test_jobs_grouped_by_stage_in_file_order() {
        let yaml = r#"
stages: [build, test]
lint:
  stage: test
  script: cargo clippy
compile:
  stage: build
  script: cargo build
unit:
  stage: test
  script: cargo test
"#;

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        assert_eq!(stage_names(&pipeline), vec!["build", "test"]);
        let test_jobs: Vec<&str> = pipeline
            .stage("test")
            .unwrap()
            .jobs()
            .iter()
            .map(|j| j.name())
            .collect();
        assert_eq!(test_jobs, vec!["lint", "unit"]);
    }

    #[test]
    fn test_default_stages_and_stage() {
        let pipeline = parse_gitlab_ci("unit:\n  script: cargo test\n").unwrap();

        assert_eq!(stage_names(&pipeline), DEFAULT_STAGES.to_vec());
        assert_eq!(pipeline.job("unit").unwrap().stage(), "test");
    }

    #[test]
    fn test_non_string_stages_skipped() {
        let yaml = "stages:\n  - build\n  - 42\n  - [nested]\n  - test\n";

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        assert_eq!(stage_names(&pipeline), vec!["build", "test"]);
    }

    #[test]
    fn test_reserved_and_hidden_keys_are_not_jobs() {
        let yaml = r#"
stages: [build]
variables:
  RUST_LOG: debug
image: rust:1.85
.template:
  stage: build
  script: echo hidden
cache:
  paths: [target]
compile:
  stage: build
  script: cargo build
"#;

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        let jobs: Vec<&str> = pipeline.jobs().map(|j| j.name()).collect();
        assert_eq!(jobs, vec!["compile"]);
    }

    #[test]
    fn test_nested_script_lists_flattened() {
        let yaml = r#"
stages: [test]
unit:
  stage: test
  script:
    - echo one
    - - echo two
      - echo three
    - |
      if true; then
        echo four
      fi
"#;

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        assert_eq!(
            commands(&pipeline, "unit"),
            vec![
                "echo one".to_string(),
                "echo two".to_string(),
                "echo three".to_string(),
                "if true; then\n  echo four\nfi\n".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_script_shape() {
        let yaml = "stages: [test]\nunit:\n  stage: test\n  script:\n    run: cargo test\n";

        let err = parse_gitlab_ci(yaml).unwrap_err();

        assert!(matches!(err, Error::UnknownScriptShape { job } if job == "unit"));
    }

    #[test]
    fn test_non_string_command_rejected() {
        let yaml = "stages: [test]\nunit:\n  stage: test\n  script:\n    - echo ok\n    - 42\n";

        let err = parse_gitlab_ci(yaml).unwrap_err();

        assert!(matches!(err, Error::UnknownScriptShape { .. }));
    }

    #[test]
    fn test_undeclared_stage() {
        let yaml = "stages: [build]\ndeploy_prod:\n  stage: deploy\n  script: ./deploy.sh\n";

        let err = parse_gitlab_ci(yaml).unwrap_err();

        assert!(matches!(
            err,
            Error::UnknownStage { stage, job } if stage == "deploy" && job == "deploy_prod"
        ));
    }

    #[test]
    fn test_before_script_prepended() {
        let yaml = r#"
stages: [test]
default:
  before_script:
    - echo setup
unit:
  stage: test
  script: cargo test
lint:
  stage: test
  before_script: rustup component add clippy
  script: cargo clippy
"#;

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        assert_eq!(
            commands(&pipeline, "unit"),
            vec!["echo setup".to_string(), "cargo test".to_string()]
        );
        assert_eq!(
            commands(&pipeline, "lint"),
            vec![
                "rustup component add clippy".to_string(),
                "cargo clippy".to_string()
            ]
        );
    }

    #[test]
    fn test_image_precedence() {
        let yaml = r#"
stages: [test]
image: node:22
default:
  image: python:3.13
explicit:
  stage: test
  image:
    name: rust:1.85
    entrypoint: [""]
  script: cargo test
inherited:
  stage: test
  script: pytest
"#;

        let pipeline = GitlabParser::new()
            .with_default_image(Some("alpine:3.20".to_string()))
            .parse(yaml)
            .unwrap();

        assert_eq!(pipeline.job("explicit").unwrap().image(), "rust:1.85");
        assert_eq!(pipeline.job("inherited").unwrap().image(), "python:3.13");
    }

    #[test]
    fn test_image_fallbacks() {
        let yaml = "stages: [test]\nunit:\n  stage: test\n  script: make\n";

        let configured = GitlabParser::new()
            .with_default_image(Some("alpine:3.20".to_string()))
            .parse(yaml)
            .unwrap();
        let builtin = parse_gitlab_ci(yaml).unwrap();

        assert_eq!(configured.job("unit").unwrap().image(), "alpine:3.20");
        assert_eq!(builtin.job("unit").unwrap().image(), DEFAULT_IMAGE);
    }

    #[test]
    fn test_template_merged_into_job() {
        let yaml = r#"
stages: [build, test]
.base: &base
  stage: build
  script:
    - echo from template
build_job:
  <<: *base
unit:
  <<: *base
  stage: test
"#;

        let pipeline = parse_gitlab_ci(yaml).unwrap();

        assert_eq!(pipeline.job_count(), 2);
        let build = pipeline.job("build_job").unwrap();
        assert_eq!(build.stage(), "build");
        assert_eq!(build.script().to_vec(), vec!["echo from template".to_string()]);
        assert_eq!(pipeline.job("unit").unwrap().stage(), "test");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = parse_gitlab_ci("stages: [build\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_empty_file_gives_empty_default_pipeline() {
        let pipeline = parse_gitlab_ci("").unwrap();
        assert_eq!(pipeline.job_count(), 0);
        assert_eq!(pipeline.stages().len(), DEFAULT_STAGES.len());
    }
}
