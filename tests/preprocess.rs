use easm_rs::pp::{preprocess, Defines, PpError};
use pretty_assertions::assert_eq;

fn run(src: &str) -> Result<String, PpError> {
    preprocess(src, &mut Defines::new())
}

fn lines(out: &str) -> Vec<&str> {
    out.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

#[test]
fn ifdef_takes_defined_branch() {
    let out = run("#define DEBUG\n#ifdef DEBUG\nnop\n#endif\nend_event").unwrap();
    assert_eq!(lines(&out), vec!["nop", "end_event"]);
}

#[test]
fn ifdef_else_takes_else_when_undefined() {
    let out = run("#ifdef DEBUG\nnop\n#else\nshow_dialog\n#endif").unwrap();
    assert_eq!(lines(&out), vec!["show_dialog"]);
}

#[test]
fn ifndef_inverts() {
    let out = run("#ifndef DEBUG\nnop\n#endif").unwrap();
    assert_eq!(lines(&out), vec!["nop"]);
}

#[test]
fn nested_blocks() {
    let src = "#define A\n#ifdef A\n#ifdef B\nb\n#else\nnot_b\n#endif\na\n#else\n#ifdef B\nnever\n#endif\n#endif";
    assert_eq!(lines(&run(src).unwrap()), vec!["not_b", "a"]);
}

#[test]
fn line_numbers_are_preserved() {
    let out = run("#ifdef X\nnop\n#endif\njump .End").unwrap();
    assert_eq!(out.lines().nth(3), Some("jump .End"));
}

#[test]
fn defines_substitute_whole_tokens_even_in_comments() {
    let out = run("#define KEY 0x9\nset_flag KEY ; KEY here too\nset_flag KEYS").unwrap();
    assert_eq!(lines(&out), vec!["set_flag 0x9 ; 0x9 here too", "set_flag KEYS"]);
}

#[test]
fn defines_in_disabled_blocks_are_ignored() {
    let mut defines = Defines::new();
    let out = preprocess("#ifdef NO\n#define X 1\n#endif\nX", &mut defines).unwrap();
    assert_eq!(lines(&out), vec!["X"]);
    assert!(defines.is_empty());
}

#[test]
fn caller_defines_are_visible_and_collected() {
    let mut defines = Defines::new();
    defines.insert("HARD".into(), String::new());
    let out = preprocess("#ifdef HARD\n#define HP 0x20\n#endif\ndelay HP", &mut defines).unwrap();
    assert_eq!(lines(&out), vec!["delay 0x20"]);
    assert_eq!(defines.get("HP").map(String::as_str), Some("0x20"));
}

#[test]
fn continued_define() {
    let out = run("#define TWO nop \\\nnop\nTWO").unwrap();
    assert_eq!(lines(&out), vec!["nop", "nop"]);
}

#[test]
fn missing_endif() {
    assert_eq!(
        run("nop\n#ifdef A\nnop"),
        Err(PpError::Unterminated {
            opened: 2,
            text: "#ifdef A".into()
        })
    );
}

#[test]
fn extra_endif() {
    assert_eq!(
        run("nop\n#endif"),
        Err(PpError::Unbalanced {
            directive: "#endif",
            line: 2
        })
    );
}

#[test]
fn else_without_if() {
    assert!(matches!(run("#else"), Err(PpError::Unbalanced { directive: "#else", .. })));
}

#[test]
fn second_else() {
    assert_eq!(
        run("#ifdef A\n#else\n#else\n#endif"),
        Err(PpError::DuplicateElse { line: 3, opened: 1 })
    );
}

#[test]
fn unknown_and_malformed_directives() {
    assert!(matches!(run("#include foo"), Err(PpError::UnknownDirective { line: 1, .. })));
    assert!(matches!(run("#ifdef"), Err(PpError::Malformed { line: 1, .. })));
}
