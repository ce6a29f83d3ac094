use crate::e2e::*;

#[test]
fn build_executable() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "fun a() {}")?;
    space.write("b.stone", "fun b() {}")?;
    space.run_expect(&["a.stone", "b.stone"])?;

    assert!(space.exists("a.o"));
    assert!(space.exists("b.o"));
    assert!(space.exists("main"));
    assert_eq!(space.count_invocations("stone-compile"), 2);
    assert_eq!(space.count_invocations("clang"), 1);
    let link = space
        .invocations()
        .into_iter()
        .find(|line| line.starts_with("clang"))
        .unwrap();
    assert!(link.contains("a.o b.o"), "{}", link);
    Ok(())
}

#[test]
fn compile_only() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.write("b.stone", "")?;
    space.run_expect(&["-emit-object", "-j", "1", "a.stone", "b.stone"])?;

    let compiles = space.invocations();
    assert_eq!(compiles.len(), 2);
    // Each compile sees both files, with a distinct primary.
    assert!(compiles[0].contains("-primary-file a.stone b.stone"), "{}", compiles[0]);
    assert!(compiles[1].contains("a.stone -primary-file b.stone"), "{}", compiles[1]);
    assert!(!space.exists("main"));
    Ok(())
}

#[test]
fn link_objects() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.o", "")?;
    space.write("b.o", "")?;
    space.run_expect(&["a.o", "b.o", "-o", "prog"])?;
    assert_eq!(space.count_invocations("stone-compile"), 0);
    assert_eq!(space.count_invocations("clang"), 1);
    assert!(space.exists("prog"));
    Ok(())
}

#[test]
fn static_library() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.run_expect(&["-emit-library", "-static", "-module-name", "util", "a.stone"])?;
    assert!(space.exists("libutil.a"));
    let invocations = space.invocations();
    assert_eq!(invocations.last().map(String::as_str), Some("ar crs libutil.a a.o"));
    Ok(())
}

#[test]
fn print_jobs_lists_compiles_before_link() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.write("b.stone", "")?;
    let out = space.run_expect(&["-driver-print-jobs", "a.stone", "b.stone"])?;
    let stdout = String::from_utf8(out.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3, "{}", stdout);
    assert!(lines[0].starts_with("0: compile []"), "{}", lines[0]);
    assert!(lines[1].starts_with("1: compile []"), "{}", lines[1]);
    assert!(lines[2].starts_with("2: link [0, 1]"), "{}", lines[2]);
    // -driver-print-jobs still builds.
    assert!(space.exists("main"));
    Ok(())
}

#[test]
fn print_jobs_only_prints() -> anyhow::Result<()> {
    // No tools at all: names print bare, and nothing runs.
    let space = TestSpace::new()?;
    space.write("a.stone", "")?;
    let out = space.run_expect(&["-print-jobs", "a.stone"])?;
    assert_output_contains(&out, "0: compile [] stone-compile -frontend -c -emit-object");
    assert_output_contains(&out, "1: link [0] clang a.o");
    assert!(!space.exists("a.o"));
    Ok(())
}

#[test]
fn build_dir_and_output_file_map() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.write("b.stone", "")?;
    space.write("ofm.yaml", "a.stone: { object: \"objs/first.o\" }\n")?;
    space.run_expect(&[
        "-build-dir",
        "out",
        "-output-file-map",
        "ofm.yaml",
        "-emit-output-file-map",
        "emitted.yaml",
        "-emit-dependencies",
        "a.stone",
        "b.stone",
    ])?;
    assert!(space.exists("objs/first.o"));
    assert!(space.exists("out/b.o"));
    assert!(space.exists("out/b.d"));
    let emitted = String::from_utf8(space.read("emitted.yaml")?)?;
    assert!(emitted.contains("\"a.stone\":\n  object: \"objs/first.o\""), "{}", emitted);
    assert!(emitted.contains("  dependencies: \"out/b.d\""), "{}", emitted);
    Ok(())
}

#[test]
fn whole_module() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.write("b.stone", "")?;
    space.run_expect(&["-whole-module", "a.stone", "b.stone"])?;
    let invocations = space.invocations();
    assert_eq!(space.count_invocations("stone-compile"), 1);
    assert!(!invocations[0].contains("-primary-file"), "{}", invocations[0]);
    assert!(space.exists("main.o"));
    assert!(space.exists("main"));
    Ok(())
}

#[test]
fn version() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run_expect(&["-version"])?;
    assert_output_contains(&out, "stone version");
    Ok(())
}

#[test]
fn time_compilation_table() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    let out = space.run_expect(&["-driver-time-compilation", "a.stone"])?;
    assert_stderr_contains(&out, "===== job timing =====");
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.lines().any(|l| l.ends_with("compile a.stone")), "{}", err);
    assert!(err.lines().any(|l| l.ends_with("link main")), "{}", err);
    Ok(())
}

#[test]
fn print_lifecycle_logs_planning() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    let out = space.run_expect(&["-driver-print-lifecycle", "a.stone"])?;
    assert_stderr_contains(&out, "planned job");
    assert_stderr_contains(&out, "finished jobs");

    let quiet = space.run_expect(&["a.stone"])?;
    assert!(quiet.stderr.is_empty(), "{}", String::from_utf8_lossy(&quiet.stderr));
    Ok(())
}

#[test]
fn driver_trace_file() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.run_expect(&["-driver-trace", "trace.json", "a.stone"])?;
    let trace = String::from_utf8(space.read("trace.json")?)?;
    assert!(trace.starts_with('['), "{}", trace);
    assert!(trace.trim_end().ends_with(']'), "{}", trace);
    assert!(trace.contains("\"plan\""), "{}", trace);
    assert!(trace.contains("\"compile a.stone\""), "{}", trace);
    assert!(trace.contains("\"main\""), "{}", trace);
    Ok(())
}
