use mare_core::api::{CliError, Pipeline, Task, TaskOutcome};

use super::cli::SubmitArgs;

pub const EXIT_ESCALATED: i32 = 2;

pub fn task_from_args(args: SubmitArgs) -> Task {
    let mut task = match args.id {
        Some(id) => Task::with_id(id, args.description),
        None => Task::new(args.description),
    };
    if let Some(expected) = args.expected {
        task = task.expected_output(expected);
    }
    if let Some(archetype) = args.archetype {
        task = task.archetype(archetype);
    }
    if let Some(role) = args.role {
        task = task.role_hint(role);
    }
    if let Some(ms) = args.timeout_ms {
        task = task.timeout_ms(ms);
    }
    task
}

pub fn exit_code_for_outcome(outcome: &TaskOutcome) -> i32 {
    match outcome {
        TaskOutcome::Completed(_) => 0,
        TaskOutcome::Escalated(_) => EXIT_ESCALATED,
    }
}

#[tracing::instrument(name = "cli.submit", skip_all)]
pub async fn run_submit(pipeline: &Pipeline, args: SubmitArgs) -> Result<i32, CliError> {
    let task = task_from_args(args);
    tracing::debug!(task_id = %task.id, "submitting");
    let outcome = pipeline.submit(task).await?;

    let json = serde_json::to_string_pretty(&outcome).map_err(|e| CliError::Command(e.to_string()))?;
    println!("{json}");
    Ok(exit_code_for_outcome(&outcome))
}
