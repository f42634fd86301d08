//! Command handlers.

use crate::commands::RunArgs;
use crate::config::CliConfig;
use crate::detector::find_ci_file;
use crate::parser::GitlabParser;
use console::style;
use stagehand_core::{Error, PipelineDescriptor, Result};
use stagehand_runner::{
    Cancellation, DockerRuntime, JobReport, OutputFormat, PipelineReport, PipelineRunner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Locate and parse the CI file under `path` (the working directory by default).
pub fn load_pipeline(
    config: &CliConfig,
    path: Option<PathBuf>,
) -> Result<(PathBuf, PipelineDescriptor)> {
    let root = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let ci_file = find_ci_file(&root)?;
    info!(path = %ci_file.display(), "Found CI file");

    let content = std::fs::read_to_string(&ci_file)?;
    let pipeline = GitlabParser::new()
        .with_default_image(config.default_image.clone())
        .parse(&content)?;
    Ok((ci_file, pipeline))
}

/// Run the whole pipeline, or one job of it.
pub async fn run(config: &CliConfig, args: RunArgs, cancel: Cancellation) -> Result<()> {
    let (ci_file, pipeline) = load_pipeline(config, args.path)?;
    eprintln!("{} Found CI file {}", style("→").cyan(), ci_file.display());

    let mut runner_config = config.runner_config();
    if args.plain {
        runner_config.output_format = OutputFormat::Plain;
    }
    if args.no_color || !console::colors_enabled_stderr() {
        runner_config.color = false;
    }
    if let Some(parallel) = args.parallel {
        runner_config.max_parallel_jobs = parallel;
    }
    if args.mount {
        runner_config.workspace = ci_file.parent().map(Path::to_path_buf);
    }

    let runtime = DockerRuntime::connect()?;
    runtime.ping().await?;
    let runner = PipelineRunner::new(Arc::new(runtime), runner_config).with_cancellation(cancel);

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    match args.job {
        Some(name) => {
            let job = pipeline
                .job(&name)
                .ok_or_else(|| Error::InvalidPipeline(format!("no job named {}", name)))?;
            let report = runner
                .run_pipeline_job(job, &mut stdout, &mut stderr)
                .await?;
            print_job(&report);
        }
        None => {
            let report = runner.run_pipeline(&pipeline, &mut stdout, &mut stderr).await?;
            print_report(&report);
        }
    }

    Ok(())
}

/// Validate the CI file and list what would run.
pub fn validate(config: &CliConfig, path: Option<PathBuf>) -> Result<()> {
    let (ci_file, pipeline) = load_pipeline(config, path)?;

    println!(
        "{} {} is valid",
        style("✓").green(),
        ci_file.display()
    );
    println!("  Stages: {}", pipeline.stages().len());

    for stage in pipeline.stages() {
        println!("    - {} ({} jobs)", stage.name(), stage.jobs().len());
        for job in stage.jobs() {
            println!(
                "        {} [{}] {} commands",
                job.name(),
                job.image(),
                job.script().len()
            );
        }
    }

    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("Current configuration:");
    println!(
        "  default_image: {}",
        config.default_image.as_deref().unwrap_or("(not set)")
    );
    println!("  readiness_timeout_secs: {}", config.readiness_timeout_secs);
    println!("  operation_timeout_secs: {}", config.operation_timeout_secs);
    println!("  pull_timeout_secs: {}", config.pull_timeout_secs);
    match config.job_timeout_secs {
        Some(secs) => println!("  job_timeout_secs: {}", secs),
        None => println!("  job_timeout_secs: (none)"),
    }
    println!("  max_parallel_jobs: {}", config.max_parallel_jobs);
    println!("  color: {}", config.color);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

fn print_job(report: &JobReport) {
    eprintln!(
        "{} {}/{} ({} ms)",
        style("✓").green(),
        report.stage,
        report.job,
        report.duration_ms
    );
    if let Some(cleanup) = &report.cleanup_error {
        eprintln!(
            "  {} container {} was not removed: {}",
            style("!").yellow(),
            report.container,
            cleanup
        );
    }
}

fn print_report(report: &PipelineReport) {
    for job in &report.jobs {
        print_job(job);
    }
    eprintln!(
        "{} Pipeline succeeded: {} jobs in {:.1}s",
        style("✓").green().bold(),
        report.jobs.len(),
        report.duration_ms as f64 / 1000.0
    );
}

/// Print a failed run.
pub fn print_failure(err: &Error) {
    eprintln!("{} {}", style("✗").red(), err);
    if let Error::Job {
        cleanup_error: Some(cleanup),
        ..
    } = err
    {
        eprintln!("  {} container was not removed: {}", style("!").yellow(), cleanup);
    }
}

/// Process exit code for a failed command.
pub fn exit_code(err: &Error) -> u8 {
    if err.is_cancelled() {
        return 130;
    }
    match err.root() {
        Error::CiFileNotFound(_)
        | Error::Parse(_)
        | Error::UnknownStage { .. }
        | Error::InvalidPipeline(_)
        | Error::UnknownScriptShape { .. }
        | Error::Io(_) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_exit_codes() {
        let job = |source: Error| Error::Job {
            stage: "test".to_string(),
            job: "unit".to_string(),
            source: Box::new(source),
            cleanup_error: None,
        };

        assert_eq!(exit_code(&job(Error::ScriptFailed { exit_code: 3 })), 1);
        assert_eq!(exit_code(&job(Error::Cancelled)), 130);
        assert_eq!(exit_code(&Error::Cancelled), 130);
        assert_eq!(exit_code(&Error::Parse("bad".to_string())), 2);
        assert_eq!(exit_code(&Error::CiFileNotFound(PathBuf::from("."))), 2);
        assert_eq!(exit_code(&Error::RuntimeUnavailable("down".to_string())), 1);
    }

    #[test]
    fn test_load_pipeline_applies_config_image() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".gitlab-ci.yml"),
            "build_app:\n  stage: build\n  script: make\n",
        )
        .unwrap();
        let config = CliConfig {
            default_image: Some("debian:trixie".to_string()),
            ..Default::default()
        };

        let (ci_file, pipeline) = load_pipeline(&config, Some(dir.path().to_path_buf())).unwrap();

        assert_eq!(ci_file, dir.path().join(".gitlab-ci.yml"));
        let job = pipeline.job("build_app").unwrap();
        assert_eq!(job.image(), "debian:trixie");
        assert_eq!(job.script(), ["make".to_string()]);
    }

    #[test]
    fn test_load_pipeline_without_file() {
        let dir = TempDir::new().unwrap();
        let err = load_pipeline(&CliConfig::default(), Some(dir.path().to_path_buf())).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }
}
