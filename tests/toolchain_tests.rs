//! End-to-end runs through the whole pipeline: preprocessor, parser,
//! assembler and simulator.

use braid::codemap::OriginalPos;
use braid::isa::Reg;
use braid::preproc::preprocess;
use braid::resolver::MemoryResolver;
use braid::runtime::{Runner, EVENT_CODE_ADDR, SAVED_PC_ADDR};
use braid::AsmParser;

/// Assemble `files` (the first is the entry point) and run to completion.
fn run_program(files: &[(&str, &str)]) -> Runner {
    let mut resolver = MemoryResolver::new();
    for (path, contents) in files {
        resolver = resolver.with_file(*path, *contents);
    }
    let expanded = preprocess(&resolver, files[0].0).unwrap();
    let program = AsmParser::new(expanded.text()).parse().unwrap();
    let image = program.assemble(expanded.text()).unwrap();

    let mut runner = Runner::new();
    runner.load_image(&image).unwrap();
    runner.run().unwrap();
    runner
}

#[test]
fn arithmetic_program_stores_result() {
    let runner = run_program(&[(
        "main.s",
        "#define BASE 40\n\
         ld BASE, %a\n\
         add 2, %a\n\
         st %a, [900]\n\
         reset\n",
    )]);
    assert_eq!(runner.state().mem().read(900).unwrap(), 42);
}

#[test]
fn countdown_loop_with_labels() {
    let runner = run_program(&[(
        "main.s",
        "ld 5, %a\n\
         loop:\n\
         cmp 1, %a\n\
         jge done\n\
         sub 1, %a\n\
         jmp loop\n\
         done:\n\
         st %a, [900]\n\
         reset\n",
    )]);
    // jge fires once the register has counted down to 1
    assert_eq!(runner.state().mem().read(900).unwrap(), 1);
}

#[test]
fn labels_resolve_across_included_files() {
    let runner = run_program(&[
        (
            "main.s",
            "jmp start\n#include <lib.s>\nstart:\njmp helper\n",
        ),
        ("lib.s", "helper:\nld 9, %b\nst %b, [901]\nreset\n"),
    ]);
    assert_eq!(runner.state().mem().read(901).unwrap(), 9);
}

#[test]
fn division_by_zero_vectors_to_handler() {
    let runner = run_program(&[(
        "main.s",
        "ld 0, %a\n\
         div %a, %a\n\
         .addr 200\n\
         reset\n",
    )]);
    let state = runner.state();
    assert_eq!(state.mem().read(EVENT_CODE_ADDR).unwrap(), 1);
    // the faulting instruction was the second one
    assert_eq!(state.mem().read(SAVED_PC_ADDR).unwrap(), 2);
}

#[test]
fn privileged_instruction_in_user_mode_vectors() {
    let runner = run_program(&[(
        "main.s",
        "ld 5, %sr\n\
         .addr 200\n\
         reset\n",
    )]);
    assert_eq!(runner.state().mem().read(EVENT_CODE_ADDR).unwrap(), 3);
}

#[test]
fn trap_handler_may_inspect_and_resume() {
    let runner = run_program(&[(
        "main.s",
        "ld 1, %a\n\
         trap\n\
         st %a, [902]\n\
         reset\n\
         .addr 200\n\
         add 10, %a\n\
         ld [100], %b\n\
         add 2, %b\n\
         st %b, [100]\n\
         rti\n",
    )]);
    let state = runner.state();
    // handler bumped the saved pc past the trap and added 10
    assert_eq!(state.mem().read(902).unwrap(), 11);
    assert_eq!(state.mem().read(EVENT_CODE_ADDR).unwrap(), 4);
}

#[test]
fn preprocessor_mapping_survives_the_pipeline() {
    let mut resolver = MemoryResolver::new();
    resolver = resolver
        .with_file("main.s", "#include <a.s>\nadd FOO, %a")
        .with_file("a.s", "#define FOO 10");
    let expanded = preprocess(&resolver, "main.s").unwrap();
    assert_eq!(expanded.text(), "\nadd 10, %a");

    let a = expanded.file_id("a.s").unwrap();
    let map = expanded.map(expanded.root()).unwrap();
    let offs = expanded.text().find("10").unwrap();
    match map.convert_to_original(offs) {
        OriginalPos::InFile(file, pos) => {
            assert_eq!(file, a);
            assert_eq!(pos, "#define FOO ".len());
        }
        other => panic!("expected a cross-file mapping, got {other:?}"),
    }

    // and the expansion still assembles
    let program = AsmParser::new(expanded.text()).parse().unwrap();
    assert!(program.assemble(expanded.text()).is_ok());
}

#[test]
fn registers_restore_on_reset() {
    let runner = run_program(&[("main.s", "ld 123, %a\nld 45, %b\nreset\n")]);
    assert_eq!(runner.state().reg(Reg::A), 0);
    assert_eq!(runner.state().reg(Reg::B), 0);
}
