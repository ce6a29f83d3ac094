use crate::e2e::*;

fn build(space: &TestSpace) -> anyhow::Result<std::process::Output> {
    space.run_expect(&["-incremental", "-j", "1", "a.stone", "b.stone"])
}

fn setup() -> anyhow::Result<TestSpace> {
    let space = TestSpace::with_tools()?;
    space.write("a.stone", "fun a() {}")?;
    space.write("b.stone", "fun b() {}")?;
    build(&space)?;
    assert_eq!(space.count_invocations("stone-compile"), 2);
    assert_eq!(space.count_invocations("clang"), 1);
    assert!(space.exists("main.stonehistory"));
    space.clear_invocations()?;
    Ok(space)
}

#[test]
fn unchanged_build_runs_nothing() -> anyhow::Result<()> {
    let space = setup()?;
    build(&space)?;
    assert!(space.invocations().is_empty(), "{:?}", space.invocations());
    Ok(())
}

#[test]
fn changed_source_recompiles_and_relinks() -> anyhow::Result<()> {
    let space = setup()?;
    space.write("b.stone", "fun b() { c() }")?;
    space.touch_later("b.stone", 2)?;
    build(&space)?;

    let invocations = space.invocations();
    assert_eq!(invocations.len(), 2, "{:?}", invocations);
    assert!(invocations[0].contains("a.stone -primary-file b.stone"), "{}", invocations[0]);
    assert!(invocations[1].starts_with("clang"), "{}", invocations[1]);

    // The new content is now the recorded state.
    space.clear_invocations()?;
    build(&space)?;
    assert!(space.invocations().is_empty());
    Ok(())
}

#[test]
fn touched_but_unchanged_source_is_clean() -> anyhow::Result<()> {
    let space = setup()?;
    space.touch_later("a.stone", 2)?;
    build(&space)?;
    assert!(space.invocations().is_empty(), "{:?}", space.invocations());
    Ok(())
}

#[test]
fn missing_output_is_rebuilt() -> anyhow::Result<()> {
    let space = setup()?;
    std::fs::remove_file(space.path("a.o"))?;
    build(&space)?;
    let invocations = space.invocations();
    assert_eq!(invocations.len(), 2, "{:?}", invocations);
    assert!(invocations[0].contains("-primary-file a.stone"), "{}", invocations[0]);
    assert!(space.exists("a.o"));
    Ok(())
}

#[test]
fn new_input_compiles_alone() -> anyhow::Result<()> {
    let space = setup()?;
    space.write("c.stone", "fun c() {}")?;
    space.run_expect(&["-incremental", "-j", "1", "a.stone", "b.stone", "c.stone"])?;
    let invocations = space.invocations();
    assert_eq!(space.count_invocations("stone-compile"), 1, "{:?}", invocations);
    assert!(invocations[0].contains("-primary-file c.stone"), "{}", invocations[0]);
    assert_eq!(space.count_invocations("clang"), 1);
    Ok(())
}

#[test]
fn clean_forgets_history() -> anyhow::Result<()> {
    let space = setup()?;
    space.run_expect(&["-incremental", "-clean", "a.stone", "b.stone"])?;
    assert_eq!(space.count_invocations("stone-compile"), 2);
    assert_eq!(space.count_invocations("clang"), 1);
    Ok(())
}

#[test]
fn without_incremental_everything_runs() -> anyhow::Result<()> {
    let space = setup()?;
    space.run_expect(&["a.stone", "b.stone"])?;
    assert_eq!(space.count_invocations("stone-compile"), 2);
    Ok(())
}

#[test]
fn failed_link_is_retried() -> anyhow::Result<()> {
    let space = setup()?;
    space.install_tool(
        "clang",
        "#!/bin/sh\necho \"clang $*\" >> invocations.log\nexit 1\n",
    )?;
    space.write("a.stone", "fun a() { b() }")?;
    space.touch_later("a.stone", 2)?;
    let out = space.run(&["-incremental", "-j", "1", "a.stone", "b.stone"])?;
    assert!(!out.status.success());
    assert_eq!(space.count_invocations("stone-compile"), 1);

    // a.o is current now, yet main was never relinked from it.
    space.install_tool("clang", FAKE_LINKER)?;
    space.clear_invocations()?;
    build(&space)?;
    assert_eq!(space.count_invocations("stone-compile"), 0);
    assert_eq!(space.count_invocations("clang"), 1);

    space.clear_invocations()?;
    build(&space)?;
    assert!(space.invocations().is_empty(), "{:?}", space.invocations());
    Ok(())
}

#[test]
fn removed_input_relinks() -> anyhow::Result<()> {
    let space = setup()?;
    space.run_expect(&["-incremental", "-j", "1", "a.stone"])?;
    let invocations = space.invocations();
    assert_eq!(space.count_invocations("stone-compile"), 0, "{:?}", invocations);
    assert_eq!(space.count_invocations("clang"), 1, "{:?}", invocations);
    assert!(!invocations[0].contains("b.o"), "{}", invocations[0]);
    Ok(())
}
