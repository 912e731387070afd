//! Shared test helpers for integration tests

use sandbox_settle::sandbox::{EventLog, ExecutionContext, Sandbox, SandboxConfig};
use sandbox_settle::{Completion, ExecutionResult};

/// Run a script in a fresh default sandbox, returning its result and events
pub fn run_script<S>(script: S) -> (ExecutionResult, EventLog)
where
    S: FnOnce(&mut ExecutionContext) -> Completion,
{
    run_script_with(SandboxConfig::default(), script)
}

/// Run a script in a fresh sandbox built from `config`
pub fn run_script_with<S>(config: SandboxConfig, script: S) -> (ExecutionResult, EventLog)
where
    S: FnOnce(&mut ExecutionContext) -> Completion,
{
    let mut sandbox = Sandbox::new(config).expect("valid config");
    let log = EventLog::new();
    sandbox.on_event(log.listener());
    let result = sandbox.run(script).expect("execution reports a result");
    (result, log)
}

/// Run a built-in scenario by name
#[allow(dead_code)]
pub fn run_scenario(name: &str) -> (ExecutionResult, EventLog) {
    let scenario = sandbox_settle::scenarios::find(name).expect("known scenario");
    run_script(scenario.script)
}
