//! Built-in demonstration scripts
//!
//! Each scenario is a script the CLI can run by name. They cover the
//! behaviors hosts most often get wrong: results that only look
//! synchronous, tests that never finish, and failures raised after the
//! synchronous body already returned.

use crate::error::{Error, Result};
use crate::runtime::promise::AsyncValue;
use crate::runtime::value::{Completion, Value};
use crate::sandbox::ExecutionContext;
use crate::test_runner::TestBody;

/// A named script
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    /// Name used on the command line
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// The script itself
    pub script: fn(&mut ExecutionContext) -> Completion,
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "sync-only",
        description: "creates asynchronous values but never registers a continuation",
        script: sync_only,
    },
    Scenario {
        name: "resolved-then",
        description: "registers a continuation on a resolved value",
        script: resolved_then,
    },
    Scenario {
        name: "sync-test",
        description: "a passing and a failing synchronous test",
        script: sync_test,
    },
    Scenario {
        name: "async-test-passes",
        description: "async test calling done() from a continuation",
        script: async_test_passes,
    },
    Scenario {
        name: "async-test-hangs",
        description: "async test that never calls done()",
        script: async_test_hangs,
    },
    Scenario {
        name: "async-test-forwards-error",
        description: "async test passing an error to done()",
        script: async_test_forwards_error,
    },
    Scenario {
        name: "async-test-sync-throw",
        description: "async test throwing before its continuation calls done()",
        script: async_test_sync_throw,
    },
    Scenario {
        name: "unhandled-rejection",
        description: "rejects a value nobody handles",
        script: unhandled_rejection,
    },
    Scenario {
        name: "consecutive-promises",
        description: "three chained promises each resolved by a 2s timer",
        script: consecutive_promises,
    },
];

/// Every built-in scenario
pub fn all() -> &'static [Scenario] {
    SCENARIOS
}

/// Look a scenario up by name
pub fn find(name: &str) -> Result<&'static Scenario> {
    SCENARIOS
        .iter()
        .find(|scenario| scenario.name == name)
        .ok_or_else(|| Error::UnknownScenario(name.to_string()))
}

fn sync_only(cx: &mut ExecutionContext) -> Completion {
    cx.resolved(Value::from("x"));
    cx.new_promise(|_cx, _resolvers| Ok(Value::Undefined));
    Ok(Value::from("done"))
}

fn resolved_then(cx: &mut ExecutionContext) -> Completion {
    let message = cx.new_promise(|cx, resolvers| {
        resolvers.resolve(cx, Value::from("test"));
        Ok(Value::Undefined)
    });
    message.then(cx, |_cx, _result| Ok(Value::Undefined));
    Ok(Value::Undefined)
}

fn sync_test(cx: &mut ExecutionContext) -> Completion {
    cx.test("adds up", TestBody::sync(|_cx| Ok(Value::Undefined)));
    cx.test(
        "throws",
        TestBody::sync(|_cx| Err(Value::error("expected 1 to equal 2"))),
    );
    Ok(Value::Undefined)
}

fn async_test_passes(cx: &mut ExecutionContext) -> Completion {
    cx.test(
        "one test",
        TestBody::with_done(|cx, done| {
            let message = cx.resolved(Value::from("test"));
            message.then(cx, move |cx, _result| {
                done.pass(cx);
                Ok(Value::Undefined)
            });
            Ok(Value::Undefined)
        }),
    );
    Ok(Value::Undefined)
}

fn async_test_hangs(cx: &mut ExecutionContext) -> Completion {
    cx.test(
        "one test",
        TestBody::with_done(|cx, _done| {
            let message = cx.resolved(Value::from("test"));
            message.then(cx, |_cx, _result| Ok(Value::Undefined));
            Ok(Value::Undefined)
        }),
    );
    Ok(Value::Undefined)
}

fn async_test_forwards_error(cx: &mut ExecutionContext) -> Completion {
    cx.test(
        "one test",
        TestBody::with_done(|cx, done| {
            let message = cx.resolved(Value::from("Catch me if you can"));
            message.then(cx, move |cx, msg| {
                done.fail(cx, Value::error(&msg.to_js_string()));
                Ok(Value::Undefined)
            });
            Ok(Value::Undefined)
        }),
    );
    Ok(Value::Undefined)
}

fn async_test_sync_throw(cx: &mut ExecutionContext) -> Completion {
    cx.test(
        "one test",
        TestBody::with_done(|cx, done| {
            let message = cx.resolved(Value::from("Catch me if you can"));
            message.then(cx, move |cx, msg| {
                done.fail(cx, Value::error(&msg.to_js_string()));
                Ok(Value::Undefined)
            });
            Err(Value::error("there is no right way to do something wrong"))
        }),
    );
    Ok(Value::Undefined)
}

fn unhandled_rejection(cx: &mut ExecutionContext) -> Completion {
    cx.new_promise(|cx, resolvers| {
        resolvers.reject(cx, Value::from("there is no right way to do something wrong"));
        Ok(Value::Undefined)
    });
    Ok(Value::Undefined)
}

/// A promise resolved with `{data: "<text> 123"}` two seconds from now
fn delayed_data(cx: &mut ExecutionContext, text: &'static str) -> AsyncValue {
    cx.new_promise(move |cx, resolvers| {
        cx.set_timeout(2_000, move |cx| {
            let data = Value::new_object();
            data.set_property("data", Value::from(format!("{} 123", text)));
            resolvers.resolve(cx, data);
            Ok(Value::Undefined)
        });
        Ok(Value::Undefined)
    })
}

fn consecutive_promises(cx: &mut ExecutionContext) -> Completion {
    delayed_data(cx, "first")
        .then(cx, |cx, _v| Ok(Value::Promise(delayed_data(cx, "second"))))
        .then(cx, |cx, _v| Ok(Value::Promise(delayed_data(cx, "third"))));
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{EventLog, Sandbox, SandboxConfig};

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = all().iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn test_find_unknown() {
        assert!(matches!(find("nope"), Err(Error::UnknownScenario(name)) if name == "nope"));
        assert_eq!(find("resolved-then").unwrap().name, "resolved-then");
    }

    #[test]
    fn test_consecutive_promises_wait_for_every_timer() {
        let mut sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
        let log = EventLog::new();
        sandbox.on_event(log.listener());
        let scenario = find("consecutive-promises").unwrap();
        let result = sandbox.run(scenario.script).unwrap();
        assert!(result.is_async);
        assert!(result.terminated.is_none());
        assert!(log.errors().is_empty());
    }
}
