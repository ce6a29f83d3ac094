use crate::e2e::*;

#[test]
fn failed_compile_skips_link() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "")?;
    space.write("bad.stone", "")?;
    let out = space.run(&["a.stone", "bad.stone"])?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "bad.stone:1:1: error: bad input");
    assert_stderr_contains(&out, "compile bad.stone failed with exit code 1");
    assert_eq!(space.count_invocations("clang"), 0);
    assert!(!space.exists("main"));
    Ok(())
}

#[test]
fn stop_after_first_failure() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("bad.stone", "")?;
    space.write("b.stone", "")?;
    space.write("c.stone", "")?;
    let out = space.run(&["-j", "1", "-emit-object", "bad.stone", "b.stone", "c.stone"])?;
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(space.count_invocations("stone-compile"), 1);
    Ok(())
}

#[test]
fn continue_building_after_errors() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("bad.stone", "")?;
    space.write("b.stone", "")?;
    space.write("c.stone", "")?;
    let out = space.run(&[
        "-j",
        "1",
        "-continue-building-after-errors",
        "bad.stone",
        "b.stone",
        "c.stone",
    ])?;
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(space.count_invocations("stone-compile"), 3);
    assert!(space.exists("b.o"));
    assert!(space.exists("c.o"));
    // The link still depends on the failed compile.
    assert_eq!(space.count_invocations("clang"), 0);
    Ok(())
}

#[test]
fn missing_linker_fails_before_running() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.install_tool("stone-compile", "#!/bin/sh\necho \"stone-compile $*\" >> invocations.log\n")?;
    space.write("a.stone", "")?;
    let out = space.run(&["a.stone"])?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "stone: error: unable to find clang or gcc for linking");
    assert!(space.invocations().is_empty());

    // Compiling alone needs no linker.
    space.run_expect(&["-emit-object", "a.stone"])?;
    assert_eq!(space.count_invocations("stone-compile"), 1);
    Ok(())
}

#[test]
fn planning_errors() -> anyhow::Result<()> {
    let space = TestSpace::with_tools()?;
    space.write("notes.txt", "")?;

    let out = space.run(&[])?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "stone: error: no input files");

    let out = space.run(&["notes.txt"])?;
    assert_stderr_contains(&out, "notes.txt: unknown input file type");

    let out = space.run(&["gone.stone"])?;
    assert_stderr_contains(&out, "gone.stone: no such file or directory");

    space.write("dup.stone", "")?;
    let out = space.run(&["dup.stone", "dup.stone"])?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "dup.stone: input file given more than once");

    space.write("a.stone", "")?;
    let out = space.run(&["-emit-object", "-parse", "a.stone"])?;
    assert_stderr_contains(&out, "conflicting options");
    assert!(space.invocations().is_empty());
    Ok(())
}

#[test]
fn job_timeout_kills() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.install_tool("stone-compile", "#!/bin/sh\nexec /bin/sleep 30\n")?;
    space.write("a.stone", "")?;
    let start = std::time::Instant::now();
    let out = space.run(&["-emit-object", "-job-timeout", "1", "a.stone"])?;
    assert_eq!(out.status.code(), Some(1));
    assert!(start.elapsed() < std::time::Duration::from_secs(20));
    assert_stderr_contains(&out, "compile a.stone timed out after 1s");
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn job_memory_limit_applies_from_start() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.install_tool("stone-compile", "#!/bin/sh\nulimit -v > limit.txt\n")?;
    space.write("a.stone", "")?;
    space.run_expect(&["-emit-object", "-job-memory-limit", "256", "a.stone"])?;
    assert_eq!(String::from_utf8(space.read("limit.txt")?)?, "262144\n");
    Ok(())
}
