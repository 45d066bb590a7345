use std::path::{Path, PathBuf};

use sleuth_debugger::{
    DebuggerState, EventKind, ExecutionAction, ExecutionControl, ExitStatus, ExpressionEvaluator,
    LaunchOptions, PythonTarget, SourceProvider, StopReason, TargetEvent, TargetExit, Verdict,
};

const AVERAGE: &str = "\
def calculate_average(numbers):
    total = 0
    for n in numbers:
        total += n
    count = len(numbers)
    return total / count

print(calculate_average([1, 2, 3]))
print(calculate_average([]))
";

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

enum Outcome {
    Paused(StopReason),
    Exited(TargetExit),
}

async fn run_to_stop(target: &mut PythonTarget, control: &mut ExecutionControl) -> Outcome {
    loop {
        match target.next_event().await.unwrap() {
            TargetEvent::Trace(event) => match control.on_event(event, target).await {
                Verdict::Pause(reason) => return Outcome::Paused(reason),
                Verdict::Resume => target.resume(&control.interest()).await.unwrap(),
            },
            TargetEvent::Exited(exit) => {
                control.finish(exit.final_state());
                return Outcome::Exited(exit);
            }
        }
    }
}

async fn resume(target: &mut PythonTarget, control: &mut ExecutionControl, action: ExecutionAction) {
    control.resume(&action).unwrap();
    target.resume(&control.interest()).await.unwrap();
}

#[tokio::test]
async fn breakpoints_evaluation_and_post_mortem() {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "simple_bug.py", AVERAGE);
    let file = script.to_string_lossy().into_owned();

    let mut control = ExecutionControl::new();
    control
        .breakpoints_mut()
        .set(&SourceProvider::new(), &file, 6, None, false)
        .unwrap();
    control.set_skip_first_stop(true);
    control.begin_run();

    let mut target = PythonTarget::launch(&LaunchOptions::new(&script), &control.interest())
        .await
        .unwrap();
    assert!(!target.python_version().is_empty());

    let Outcome::Paused(reason) = run_to_stop(&mut target, &mut control).await else {
        panic!("expected a pause at the breakpoint");
    };
    assert_eq!(reason, StopReason::Breakpoint { number: 1 });
    let value = target.evaluate("total / count", None).await.unwrap();
    assert_eq!(value.display_value(), "2.0");

    let stack = target.stack().await.unwrap();
    assert_eq!(stack.frames().len(), 2);
    assert_eq!(stack.frames()[0].function, "<module>");
    assert_eq!(stack.current().unwrap().function, "calculate_average");
    assert_eq!(stack.current().unwrap().lineno, 6);

    resume(&mut target, &mut control, ExecutionAction::Continue).await;
    let Outcome::Paused(_) = run_to_stop(&mut target, &mut control).await else {
        panic!("expected the second call to hit the breakpoint");
    };
    assert_eq!(target.evaluate("count", None).await.unwrap().display_value(), "0");

    resume(&mut target, &mut control, ExecutionAction::Continue).await;
    let Outcome::Paused(reason) = run_to_stop(&mut target, &mut control).await else {
        panic!("expected a post-mortem stop");
    };
    assert_eq!(reason, StopReason::Exception);
    let event = control.current_event().unwrap();
    assert_eq!(event.kind, EventKind::Exception);
    assert_eq!(event.location.line, 6);
    assert_eq!(
        event.exception.as_ref().unwrap().type_name,
        "ZeroDivisionError"
    );

    resume(&mut target, &mut control, ExecutionAction::Continue).await;
    let Outcome::Exited(exit) = run_to_stop(&mut target, &mut control).await else {
        panic!("expected the program to end");
    };
    assert_eq!(exit.status, ExitStatus::Exception);
    assert!(exit.error.unwrap().starts_with("ZeroDivisionError"));
    assert_eq!(control.state(), DebuggerState::Crashed);
    assert_eq!(control.breakpoints().get(&file, 6).unwrap().hits, 2);
}

#[tokio::test]
async fn conditional_breakpoint_stops_only_when_true() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "avg.py", AVERAGE);
    let file = script.to_string_lossy().into_owned();

    let mut control = ExecutionControl::new();
    control
        .breakpoints_mut()
        .set(&SourceProvider::new(), &file, 4, Some("n == 3".into()), false)
        .unwrap();
    control.set_skip_first_stop(true);
    control.begin_run();
    let mut target = PythonTarget::launch(&LaunchOptions::new(&script), &control.interest())
        .await
        .unwrap();

    let Outcome::Paused(_) = run_to_stop(&mut target, &mut control).await else {
        panic!("expected the condition to hold once");
    };
    assert_eq!(target.evaluate("n", None).await.unwrap().display_value(), "3");
    assert_eq!(control.breakpoints().get(&file, 4).unwrap().hits, 3);

    let exit = target.quit().await;
    assert_eq!(exit.status, ExitStatus::Quit);
}

#[tokio::test]
async fn injected_break_reports_original_line_numbers() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "inject.py", "x = 1\ny = x + 1\nprint(y)\n");

    let mut control = ExecutionControl::new();
    control.set_skip_first_stop(true);
    control.begin_run();
    control.resume(&ExecutionAction::Continue);

    let mut options = LaunchOptions::new(&script);
    options.injected_lines = vec![2];
    let mut target = PythonTarget::launch(&options, &control.interest())
        .await
        .unwrap();

    let Outcome::Paused(reason) = run_to_stop(&mut target, &mut control).await else {
        panic!("expected the injected break");
    };
    assert_eq!(reason, StopReason::InjectedBreak);
    assert_eq!(control.current_event().unwrap().location.line, 2);
    assert_eq!(target.evaluate("x", None).await.unwrap().display_value(), "1");
    let missing = target.evaluate("y", None).await.unwrap();
    assert!(!missing.is_ok());

    let stack = target.stack().await.unwrap();
    assert_eq!(stack.current().unwrap().lineno, 2);

    let exit = target.quit().await;
    assert_eq!(exit.status, ExitStatus::Quit);
}

#[tokio::test]
async fn system_exit_code_is_reported() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "bye.py", "import sys\nsys.exit(3)\n");

    let mut control = ExecutionControl::new();
    control.begin_run();
    control.resume(&ExecutionAction::Continue);
    let mut target = PythonTarget::launch(&LaunchOptions::new(&script), &control.interest())
        .await
        .unwrap();

    let Outcome::Exited(exit) = run_to_stop(&mut target, &mut control).await else {
        panic!("no stops expected");
    };
    assert_eq!(exit.status, ExitStatus::SystemExit);
    assert_eq!(exit.code, Some(3));
    assert_eq!(control.state(), DebuggerState::Completed);
}
