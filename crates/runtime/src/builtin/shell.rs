//! Command execution built-in: run_command

use cache::Payload;
use policy::Policy;
use serde_json::{Value, json};
use tracing::info;

use super::{BuiltinFunction, required_str, run};
use crate::result::ToolFailure;
use crate::schema::ToolCallArgs;

pub(super) const RUN_COMMAND: BuiltinFunction = BuiltinFunction {
    name: "run_command",
    description: "Run an allowlisted shell command in the workspace and return its output",
    read_only: false,
    schema: run_command_schema,
};

fn run_command_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "command": {
                "type": "string",
                "description": "The command line to execute"
            },
            "cwd": {
                "type": "string",
                "description": "Working directory relative to the workspace root (default: root)"
            }
        },
        "required": ["command"]
    })
}

pub(super) async fn run_command(
    args: &ToolCallArgs,
    policy: &Policy,
) -> Result<Payload, ToolFailure> {
    let command = required_str(args, "command")?;
    policy.require_command(command)?;
    let dir = policy.resolve(args.str("cwd").unwrap_or("."))?;

    info!(command, cwd = %dir.display(), "running command");
    let output = run("sh", &["-c", command], &dir).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut combined = stdout.into_owned();
    if !stderr.is_empty() {
        if !combined.is_empty() {
            combined.push_str("\n--- stderr ---\n");
        }
        combined.push_str(&stderr);
    }

    // Non-zero exit is reported in the output, not as a failure.
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        combined = format!("Command exited with code {code}\n{combined}");
    }

    Ok(Payload::Text(combined))
}
